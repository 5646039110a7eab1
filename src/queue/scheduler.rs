//! Scheduler loop and batch selection
//!
//! One loop per queue. Each iteration parks on four gates in order: started,
//! pending work, spare capacity, pacing delay. Gates are `Notify` permits, so
//! a wake that lands while the loop is busy is kept and rapid pushes collapse
//! into a single cycle.

use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use super::core::Shared;
use super::task::{CancelReason, TaskInfo};

/// Run the scheduler loop until the task is aborted
pub(crate) async fn run<P, R>(shared: Arc<Shared<P, R>>)
where
    P: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    info!("Scheduler loop running");
    loop {
        wait_until(&shared.started_notify, || shared.lock().started).await;
        wait_until(&shared.added_notify, || shared.lock().store.pending_count() > 0).await;
        wait_until(&shared.free_notify, || {
            shared.lock().store.running_count() < shared.options.concurrent
        })
        .await;
        tokio::time::sleep(shared.options.delay()).await;

        let batch = {
            let inner = shared.lock();
            if !inner.started {
                debug!("run: stopped during delay, back to start gate");
                continue;
            }
            let capacity = shared.options.concurrent.saturating_sub(inner.store.running_count());
            inner.store.select_batch(capacity)
        };
        if batch.is_empty() {
            continue;
        }

        let batch = apply_before_work(&shared, batch);
        if !batch.is_empty() {
            shared.dispatch_batch(batch);
        }
    }
}

/// Park on `notify` until `ready` holds
async fn wait_until(notify: &Notify, mut ready: impl FnMut() -> bool) {
    while !ready() {
        notify.notified().await;
    }
}

/// Pass the selected batch through the before-work hook, if any
///
/// Selected tasks the hook leaves out are discarded. A hook error fails the
/// whole batch through the normal failure path, except that it is never
/// re-raised under `throw_on_error`: it runs on the scheduler loop, which
/// must keep going.
fn apply_before_work<P, R>(shared: &Arc<Shared<P, R>>, batch: Vec<TaskInfo<P>>) -> Vec<TaskInfo<P>>
where
    P: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    let Some(hook) = shared.before_work.as_ref() else {
        return batch;
    };

    match hook(batch.clone()) {
        Ok(None) => batch,
        Ok(Some(replacement)) => {
            for task in &batch {
                if !replacement.iter().any(|t| t.id == task.id) {
                    debug!(id = %task.id, "apply_before_work: task dropped by hook");
                    shared.cancel_task(task.id, CancelReason::BeforeWork);
                }
            }
            replacement
        }
        Err(err) => {
            warn!(error = %err, count = batch.len(), "before-work hook failed, failing batch");
            let err = Arc::new(err);
            for task in batch {
                shared.fail_pending(task.id, Arc::clone(&err));
            }
            Vec::new()
        }
    }
}

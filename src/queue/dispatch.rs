//! Dispatcher - runs tasks and routes their outcomes
//!
//! Every terminal path claims the task under the store lock before firing
//! anything: success and failure require `Running`, cancellation accepts
//! `Running` or `Pending`. Whoever loses a race (a worker settling after its
//! timeout, a stop racing a completion) finds the task already `Settled` and
//! does nothing, so no outcome is ever reported twice.
//!
//! Listeners and callbacks may call back into the queue, so nothing is
//! announced for a task without first checking it is still running. A
//! panicking callback or listener is logged and does not stop the task from
//! being finished.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use eyre::eyre;
use futures::FutureExt;
use tracing::{debug, info, warn};

use super::core::{GroupProgress, Shared};
use super::events::QueueEvent;
use super::store::TaskState;
use super::task::{CancelFn, CancelReason, DiscardedFn, GroupId, StartedFn, TaskCallbacks, TaskId, TaskInfo};

/// Outcome claimed for a task being cancelled
enum Claim<P> {
    /// Was running; gets the cancel callback
    Cancelled(TaskInfo<P>, Option<CancelFn>),
    /// Never ran; gets the discard callback
    Discarded(TaskInfo<P>, Option<DiscardedFn>),
}

impl<P, R> Shared<P, R>
where
    P: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    /// Start the tasks of a selected batch
    ///
    /// Tasks that are no longer pending are skipped, as is anything beyond
    /// free capacity or the whole batch once the queue has been stopped.
    pub(crate) fn dispatch_batch(self: &Arc<Self>, batch: Vec<TaskInfo<P>>) {
        let (group, started) = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            if !inner.started {
                debug!("Shared::dispatch_batch: queue no longer started, skipping batch");
                return;
            }

            let capacity = self.options.concurrent.saturating_sub(inner.store.running_count());
            let mut started: Vec<(TaskInfo<P>, Option<StartedFn>)> = Vec::new();
            for task in batch {
                if started.len() >= capacity {
                    break;
                }
                let Some(entry) = inner.store.get_mut(task.id) else {
                    continue;
                };
                if entry.state != TaskState::Pending {
                    continue;
                }
                entry.state = TaskState::Running;
                entry.info.payload = task.payload;
                started.push((entry.snapshot(), entry.callbacks.on_started.take()));
            }
            if started.is_empty() {
                return;
            }

            let group = inner.allocate_group();
            for (task, _) in &started {
                if let Some(entry) = inner.store.get_mut(task.id) {
                    entry.group = Some(group);
                }
            }
            inner.groups.insert(
                group,
                GroupProgress {
                    remaining: started.len(),
                    announced: false,
                },
            );
            let running = inner.store.running_count();
            inner.stats.peak_running = inner.stats.peak_running.max(running);
            (group, started)
        };

        let Some(tasks) = self.announce_group(group) else {
            debug!(%group, "Shared::dispatch_batch: whole batch settled before dispatch");
            return;
        };
        debug!(%group, count = tasks.len(), "Shared::dispatch_batch: dispatching");
        self.events.emit(QueueEvent::GroupStarted { group, tasks });

        for (task, on_started) in started {
            if !self.is_running(task.id) {
                debug!(id = %task.id, "Shared::dispatch_batch: task settled before start");
                continue;
            }
            if let Some(f) = on_started {
                guarded("on_started", task.id, f);
            }
            if !self.is_running(task.id) {
                continue;
            }
            self.events.emit(QueueEvent::TaskStarted(task.clone()));
            if self.arm_timeout(task.id) {
                self.spawn_worker(task);
            }
        }
    }

    /// Mark a batch announced and return its still-running tasks
    ///
    /// `None` once every task of the batch has already finished; the group
    /// is then dropped without any group event.
    fn announce_group(&self, group: GroupId) -> Option<Vec<TaskInfo<P>>> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let tasks: Vec<TaskInfo<P>> = inner
            .store
            .iter()
            .filter(|entry| entry.group == Some(group) && entry.state == TaskState::Running)
            .map(|entry| entry.snapshot())
            .collect();

        let progress = inner.groups.get_mut(&group)?;
        if progress.remaining == 0 {
            inner.groups.remove(&group);
            return None;
        }
        progress.announced = true;
        Some(tasks)
    }

    fn is_running(&self, id: TaskId) -> bool {
        self.lock()
            .store
            .get(id)
            .is_some_and(|entry| entry.state == TaskState::Running)
    }

    /// Arm the per-task timeout; false if the task stopped running meanwhile
    fn arm_timeout(self: &Arc<Self>, id: TaskId) -> bool {
        let mut inner = self.lock();
        let Some(entry) = inner.store.get_mut(id) else {
            return false;
        };
        if entry.state != TaskState::Running {
            return false;
        }
        if let Some(timeout) = self.options.timeout() {
            let shared = Arc::clone(self);
            let timer = tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                warn!(%id, ?timeout, "Task timed out");
                shared.cancel_task(id, CancelReason::Timeout);
            });
            entry.timeout = Some(timer.abort_handle());
        }
        true
    }

    /// Hand a task to the worker on its own tokio task
    fn spawn_worker(self: &Arc<Self>, task: TaskInfo<P>) {
        let shared = Arc::clone(self);
        let worker = Arc::clone(&self.worker);
        tokio::spawn(async move {
            let id = task.id;
            let result = AssertUnwindSafe(worker.work(task))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(eyre!("worker panicked: {}", panic_message(panic.as_ref()))));

            if let Some(err) = shared.settle(id, result) {
                // throw-on-error: surface the failure loudly once bookkeeping is done
                panic!("task {} failed: {:?}", id, err);
            }
        });
    }

    /// Route a worker result; returns the error to re-raise, if any
    pub(crate) fn settle(&self, id: TaskId, result: eyre::Result<R>) -> Option<Arc<eyre::Report>> {
        let task = {
            let mut inner = self.lock();
            let Some(entry) = inner.store.get_mut(id) else {
                debug!(%id, "Shared::settle: task already finished, ignoring result");
                return None;
            };
            if entry.state != TaskState::Running {
                debug!(%id, "Shared::settle: task already settled, ignoring result");
                return None;
            }
            entry.state = TaskState::Settled;
            entry.disarm();
            entry.snapshot()
        };

        match result {
            Ok(value) => {
                self.succeed(task, value);
                None
            }
            Err(err) => {
                let err = Arc::new(err);
                self.fail(task, Arc::clone(&err));
                self.options.throw_on_error.then_some(err)
            }
        }
    }

    fn succeed(&self, task: TaskInfo<P>, value: R) {
        debug!(id = %task.id, "Shared::succeed: called");
        let on_success = {
            let mut inner = self.lock();
            inner.stats.total_succeeded += 1;
            inner
                .store
                .get_mut(task.id)
                .and_then(|entry| entry.callbacks.on_success.take())
        };

        let value = Arc::new(value);
        if let Some(f) = on_success {
            guarded("on_success", task.id, || f(&value));
        }
        self.events.emit(QueueEvent::TaskSuccess(task.clone(), value));
        self.finish(task.id);
    }

    /// Report a claimed task as failed, requeueing its payload when retry is on
    pub(crate) fn fail(&self, task: TaskInfo<P>, err: Arc<eyre::Report>) {
        warn!(id = %task.id, error = %err, "Task failed");
        let on_failed = {
            let mut inner = self.lock();
            inner.stats.total_failed += 1;
            inner.store.get_mut(task.id).and_then(|entry| entry.callbacks.on_failed.take())
        };

        if let Some(f) = on_failed {
            guarded("on_failed", task.id, || f(&err));
        }
        self.events.emit(QueueEvent::TaskFailed(task.clone(), err));

        if self.options.will_retry(task.attempt) {
            self.lock().stats.total_retried += 1;
            let attempt = task.attempt + 1;
            let retried = self.insert(Arc::clone(&task.payload), 0, TaskCallbacks::new(), true, attempt);
            info!(id = %task.id, retry_id = %retried.id, attempt, "Requeued failed task");
        } else if self.options.retry {
            warn!(id = %task.id, attempts = task.attempt + 1, "Retries exhausted");
        }
        self.finish(task.id);
    }

    /// Fail a pending task without running it
    ///
    /// Used for before-work hook errors; never re-raised.
    pub(crate) fn fail_pending(&self, id: TaskId, err: Arc<eyre::Report>) {
        let task = {
            let mut inner = self.lock();
            let Some(entry) = inner.store.get_mut(id) else {
                return;
            };
            if entry.state != TaskState::Pending {
                return;
            }
            entry.state = TaskState::Settled;
            entry.snapshot()
        };
        self.fail(task, err);
    }

    /// Cancel a running task or discard a pending one
    ///
    /// Returns false if the task is unknown or already settling.
    pub(crate) fn cancel_task(&self, id: TaskId, reason: CancelReason) -> bool {
        let claim = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            let Some(entry) = inner.store.get_mut(id) else {
                return false;
            };
            let claim = match entry.state {
                TaskState::Settled => return false,
                TaskState::Running => {
                    inner.stats.total_cancelled += 1;
                    Claim::Cancelled(entry.snapshot(), entry.callbacks.on_cancel.take())
                }
                TaskState::Pending => {
                    inner.stats.total_discarded += 1;
                    Claim::Discarded(entry.snapshot(), entry.callbacks.on_discarded.take())
                }
            };
            entry.state = TaskState::Settled;
            entry.disarm();
            entry.info.mark_cancelled();
            claim
        };

        self.resolve(claim, &reason);
        self.finish(id);
        true
    }

    /// Cancel every task in the store with the same reason
    pub(crate) fn cancel_all(&self, reason: CancelReason) {
        let claims: Vec<Claim<P>> = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            let mut claims = Vec::new();
            for entry in inner.store.iter_mut() {
                let claim = match entry.state {
                    TaskState::Settled => continue,
                    TaskState::Running => {
                        inner.stats.total_cancelled += 1;
                        Claim::Cancelled(entry.snapshot(), entry.callbacks.on_cancel.take())
                    }
                    TaskState::Pending => {
                        inner.stats.total_discarded += 1;
                        Claim::Discarded(entry.snapshot(), entry.callbacks.on_discarded.take())
                    }
                };
                entry.state = TaskState::Settled;
                entry.disarm();
                entry.info.mark_cancelled();
                claims.push(claim);
            }
            claims
        };

        info!(count = claims.len(), %reason, "Cancelling all tasks");
        for claim in claims {
            let id = match &claim {
                Claim::Cancelled(task, _) | Claim::Discarded(task, _) => task.id,
            };
            self.resolve(claim, &reason);
            self.finish(id);
        }
    }

    fn resolve(&self, claim: Claim<P>, reason: &CancelReason) {
        match claim {
            Claim::Cancelled(task, on_cancel) => {
                debug!(id = %task.id, %reason, "Shared::resolve: cancelled running task");
                if let Some(f) = on_cancel {
                    guarded("on_cancel", task.id, || f(reason));
                }
                self.events.emit(QueueEvent::TaskCancelled(task, reason.clone()));
            }
            Claim::Discarded(task, on_discarded) => {
                debug!(id = %task.id, %reason, "Shared::resolve: discarded pending task");
                if let Some(f) = on_discarded {
                    guarded("on_discarded", task.id, || f(Some(reason)));
                }
                self.events.emit(QueueEvent::TaskDiscarded(task, Some(reason.clone())));
            }
        }
    }

    /// Remove a claimed task and publish the follow-up signals
    ///
    /// Idempotent: a task that is already gone is ignored.
    pub(crate) fn finish(&self, id: TaskId) {
        let (task, on_finished, group_done, free, idle) = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            let Some(mut entry) = inner.store.remove(id) else {
                return;
            };
            entry.disarm();

            let group_done = entry.group.filter(|group| {
                let Some(progress) = inner.groups.get_mut(group) else {
                    return false;
                };
                progress.remaining = progress.remaining.saturating_sub(1);
                // An unannounced batch is dropped by `announce_group` instead
                progress.remaining == 0 && progress.announced
            });
            if let Some(group) = group_done {
                inner.groups.remove(&group);
            }

            let mut task = entry.snapshot();
            task.running = false;
            (
                task,
                entry.callbacks.on_finished.take(),
                group_done,
                inner.store.running_count() < self.options.concurrent,
                inner.store.is_empty(),
            )
        };

        if let Some(f) = on_finished {
            guarded("on_finished", id, f);
        }
        debug!(%id, "Shared::finish: task finished");
        self.events.emit(QueueEvent::TaskFinished(task));

        if let Some(group) = group_done {
            self.events.emit(QueueEvent::GroupFinished { group });
        }
        if free {
            self.events.emit(QueueEvent::Free);
            self.free_notify.notify_one();
        }
        if idle {
            info!("Queue idle");
            self.events.emit(QueueEvent::Idle);
            self.events.emit(QueueEvent::Finished);
            self.idle_notify.notify_waiters();
        }
    }
}

/// Run a user callback, logging instead of unwinding if it panics
fn guarded(name: &str, id: TaskId, f: impl FnOnce()) {
    if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(f)) {
        warn!(%id, callback = name, panic = %panic_message(panic.as_ref()), "Task callback panicked");
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{Queue, QueueOptions};
    use std::sync::Mutex;
    use std::time::Duration;

    fn labelled<P, R>(event: &QueueEvent<P, R>) -> String {
        match event.task() {
            Some(task) => format!("{}#{}", event.name(), task.id),
            None => event.name().to_string(),
        }
    }

    fn position(log: &[String], entry: &str) -> usize {
        log.iter()
            .position(|e| e == entry)
            .unwrap_or_else(|| panic!("{} missing from {:?}", entry, log))
    }

    fn options() -> QueueOptions {
        QueueOptions {
            delay_ms: 0,
            throw_on_error: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }

    #[tokio::test]
    async fn test_worker_panic_is_a_failure() {
        let queue: Queue<u32, u32> = Queue::new(
            |task: TaskInfo<u32>| async move {
                if *task.payload() == 1 {
                    panic!("worker exploded");
                }
                Ok(*task.payload())
            },
            options(),
        )
        .unwrap();

        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        queue.on(move |event| {
            if let QueueEvent::TaskFailed(_, err) = event {
                sink.lock().unwrap().push(err.to_string());
            }
        });

        queue.push(1, 0);
        queue.push(2, 0);
        tokio::time::timeout(Duration::from_secs(5), queue.idle()).await.unwrap();

        assert_eq!(*errors.lock().unwrap(), vec!["worker panicked: worker exploded"]);
        assert_eq!(queue.stats().total_succeeded, 1);
    }

    #[tokio::test]
    async fn test_late_result_after_cancel_is_ignored() {
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let release_rx = Arc::new(tokio::sync::Mutex::new(Some(release_rx)));
        let queue: Queue<u32, u32> = Queue::new(
            move |task: TaskInfo<u32>| {
                let release_rx = Arc::clone(&release_rx);
                async move {
                    if let Some(rx) = release_rx.lock().await.take() {
                        let _ = rx.await;
                    }
                    Ok(*task.payload())
                }
            },
            options(),
        )
        .unwrap();

        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&outcomes);
        queue.on(move |event| {
            if matches!(
                event,
                QueueEvent::TaskSuccess(..) | QueueEvent::TaskCancelled(..) | QueueEvent::TaskFinished(_)
            ) {
                sink.lock().unwrap().push(event.name());
            }
        });

        let task = queue.push(1, 0);
        while queue.running() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(queue.get(task.id).unwrap().running);

        assert!(queue.cancel(task.id));
        assert_eq!(queue.size(), 0);
        release_tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(*outcomes.lock().unwrap(), vec!["task:cancelled", "task:finished"]);
        assert_eq!(queue.stats().total_succeeded, 0);
    }

    #[tokio::test]
    async fn test_cancelled_flag_visible_to_worker() {
        let observed = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&observed);
        let queue: Queue<u32, ()> = Queue::new(
            move |task: TaskInfo<u32>| {
                let sink = Arc::clone(&sink);
                async move {
                    while !task.is_cancelled() {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                    }
                    *sink.lock().unwrap() = Some(task.id);
                    Ok(())
                }
            },
            QueueOptions {
                timeout_ms: Some(30),
                ..options()
            },
        )
        .unwrap();

        let task = queue.push(7, 0);
        tokio::time::timeout(Duration::from_secs(5), queue.idle()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(*observed.lock().unwrap(), Some(task.id));
        assert_eq!(queue.stats().total_cancelled, 1);
    }

    #[tokio::test]
    async fn test_stop_from_group_listener_suppresses_start() {
        let queue: Queue<u32, u32> = Queue::new(
            |task: TaskInfo<u32>| async move { Ok(*task.payload()) },
            QueueOptions {
                concurrent: 2,
                auto_start: false,
                ..options()
            },
        )
        .unwrap();

        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let handle = queue.clone();
        queue.on(move |event| {
            sink.lock().unwrap().push(labelled(event));
            if let QueueEvent::GroupStarted { .. } = event {
                handle.stop();
            }
        });

        for payload in [1, 2] {
            let started = Arc::clone(&log);
            let finished = Arc::clone(&log);
            queue.push_with(
                payload,
                0,
                TaskCallbacks::new()
                    .on_started(move || started.lock().unwrap().push(format!("on_started#{}", payload)))
                    .on_finished(move || finished.lock().unwrap().push(format!("on_finished#{}", payload))),
            );
        }
        queue.start();
        tokio::time::timeout(Duration::from_secs(5), queue.idle()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let log = log.lock().unwrap().clone();
        assert!(
            !log.iter().any(|e| e.starts_with("task:started") || e.starts_with("on_started")),
            "{:?}",
            log
        );
        for id in [1, 2] {
            let finished = position(&log, &format!("task:finished#{}", id));
            let suffix = format!("#{}", id);
            let last = log.iter().rposition(|e| e.starts_with("task:") && e.ends_with(&suffix)).unwrap();
            assert_eq!(finished, last, "{:?}", log);
            assert!(position(&log, &format!("task:cancelled#{}", id)) < finished);
        }
        assert!(position(&log, "group:started") < position(&log, "group:finished"));
        assert_eq!(queue.stats().total_cancelled, 2);
        assert_eq!(queue.stats().total_succeeded, 0);
    }

    #[tokio::test]
    async fn test_cancel_from_started_callback_skips_worker() {
        let ran = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&ran);
        let queue: Queue<u32, ()> = Queue::new(
            move |_task: TaskInfo<u32>| {
                let counter = Arc::clone(&counter);
                async move {
                    *counter.lock().unwrap() += 1;
                    Ok(())
                }
            },
            QueueOptions {
                auto_start: false,
                ..options()
            },
        )
        .unwrap();

        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        queue.on(move |event| sink.lock().unwrap().push(labelled(event)));

        let handle = queue.clone();
        let task = queue.push_with(
            1,
            0,
            TaskCallbacks::new().on_started(move || {
                handle.clear(None);
            }),
        );
        queue.start();
        tokio::time::timeout(Duration::from_secs(5), queue.idle()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let log = log.lock().unwrap().clone();
        let finished = position(&log, &format!("task:finished#{}", task.id));
        assert!(!log.iter().any(|e| e.starts_with("task:started")), "{:?}", log);
        assert!(position(&log, &format!("task:cancelled#{}", task.id)) < finished);
        assert_eq!(*ran.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_settle_reraises_only_after_bookkeeping() {
        let queue: Queue<u32, u32> = Queue::new(
            |task: TaskInfo<u32>| async move { Ok(*task.payload()) },
            QueueOptions {
                auto_start: false,
                retry: true,
                throw_on_error: true,
                ..options()
            },
        )
        .unwrap();

        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        queue.on(move |event| sink.lock().unwrap().push(labelled(event)));

        let task = queue.push(1, 0);
        if let Some(entry) = queue.shared.lock().store.get_mut(task.id) {
            entry.state = TaskState::Running;
        }

        let raised = queue.shared.settle(task.id, Err(eyre!("boom")));
        assert_eq!(raised.map(|err| err.to_string()), Some("boom".to_string()));

        // Everything the failure triggers is already published
        let log = log.lock().unwrap().clone();
        let failed = position(&log, "task:failed#1");
        let requeued = position(&log, "task:added#2");
        let finished = position(&log, "task:finished#1");
        assert!(failed < requeued && requeued < finished, "{:?}", log);
        assert_eq!(queue.get(task.id).map(|t| t.id), None);
        assert_eq!(queue.pending(), 1);

        if let Some(entry) = queue.shared.lock().store.get_mut(TaskId(2)) {
            entry.state = TaskState::Running;
        }
        assert!(queue.shared.settle(TaskId(2), Ok(2)).is_none());
        assert_eq!(queue.stats().total_succeeded, 1);
    }

    #[tokio::test]
    async fn test_throw_on_error_keeps_queue_dispatching() {
        let queue: Queue<u32, u32> = Queue::new(
            |task: TaskInfo<u32>| async move {
                if *task.payload() == 1 {
                    eyre::bail!("always fails");
                }
                Ok(*task.payload())
            },
            QueueOptions {
                retry: true,
                max_retries: Some(1),
                throw_on_error: true,
                ..options()
            },
        )
        .unwrap();

        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        queue.on(move |event| sink.lock().unwrap().push(labelled(event)));

        queue.push(1, 0);
        tokio::time::timeout(Duration::from_secs(5), queue.idle()).await.unwrap();
        queue.push(2, 0);
        tokio::time::timeout(Duration::from_secs(5), queue.idle()).await.unwrap();

        let log = log.lock().unwrap().clone();
        assert!(position(&log, "task:failed#1") < position(&log, "task:added#2"));
        assert!(position(&log, "task:added#2") < position(&log, "task:finished#1"));
        assert!(position(&log, "task:failed#2") < position(&log, "task:finished#2"));
        assert!(position(&log, "task:finished#2") < position(&log, "task:success#3"));

        let stats = queue.stats();
        assert_eq!(stats.total_failed, 2);
        assert_eq!(stats.total_retried, 1);
        assert_eq!(stats.total_succeeded, 1);
    }

    #[tokio::test]
    async fn test_panicking_callbacks_still_finish() {
        let queue: Queue<u32, u32> =
            Queue::new(|task: TaskInfo<u32>| async move { Ok(*task.payload()) }, options()).unwrap();

        queue.on(|event| {
            if let QueueEvent::TaskSuccess(..) = event {
                panic!("listener exploded");
            }
        });

        let finished = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&finished);
        queue.push_with(
            1,
            0,
            TaskCallbacks::new()
                .on_success(|_| panic!("callback exploded"))
                .on_finished(move || *flag.lock().unwrap() = true),
        );
        tokio::time::timeout(Duration::from_secs(5), queue.idle()).await.unwrap();

        assert!(*finished.lock().unwrap());
        assert_eq!(queue.size(), 0);
        assert_eq!(queue.stats().total_succeeded, 1);
    }
}

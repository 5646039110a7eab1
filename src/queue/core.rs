//! Queue handle: construction, submission, lifecycle and introspection

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Notify, broadcast};
use tokio::task::AbortHandle;
use tracing::{debug, info};

use super::config::QueueOptions;
use super::error::QueueError;
use super::events::{EventBus, ListenerId, QueueEvent};
use super::scheduler;
use super::store::TaskStore;
use super::task::{CancelReason, GroupId, QueueStats, TaskCallbacks, TaskId, TaskInfo};
use super::worker::{BeforeWork, Worker};

/// Broadcast buffer for `subscribe()` receivers
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Mutable queue state, protected by a mutex that is never held across an
/// await or while callbacks and listeners run
pub(crate) struct QueueInner<P, R> {
    pub store: TaskStore<P, R>,
    pub started: bool,
    pub stats: QueueStats,
    /// Progress of each dispatched batch until its last task finishes
    pub groups: HashMap<GroupId, GroupProgress>,
    next_group: u64,
}

/// Unfinished task count of a batch, and whether `GroupStarted` went out
pub(crate) struct GroupProgress {
    pub remaining: usize,
    pub announced: bool,
}

impl<P, R> QueueInner<P, R> {
    pub fn allocate_group(&mut self) -> GroupId {
        self.next_group += 1;
        GroupId(self.next_group)
    }
}

/// State shared between queue handles, the scheduler loop and worker tasks
pub(crate) struct Shared<P, R> {
    pub options: QueueOptions,
    pub worker: Arc<dyn Worker<P, R>>,
    pub before_work: Option<BeforeWork<P>>,
    pub events: EventBus<P, R>,
    inner: Mutex<QueueInner<P, R>>,
    /// Scheduler gate 1: queue started
    pub started_notify: Notify,
    /// Scheduler gate 2: task added
    pub added_notify: Notify,
    /// Scheduler gate 3: capacity freed
    pub free_notify: Notify,
    /// Wakes `Queue::idle` waiters
    pub idle_notify: Notify,
}

impl<P, R> Shared<P, R>
where
    P: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    pub fn lock(&self) -> MutexGuard<'_, QueueInner<P, R>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a task at the tail or, for `front`, at the head
    pub fn add(&self, payload: Arc<P>, priority: i64, callbacks: TaskCallbacks<R>, front: bool) -> TaskInfo<P> {
        self.insert(payload, priority, callbacks, front, 0)
    }

    /// Insert a task carrying its retry `attempt`
    pub fn insert(
        &self,
        payload: Arc<P>,
        priority: i64,
        callbacks: TaskCallbacks<R>,
        front: bool,
        attempt: u32,
    ) -> TaskInfo<P> {
        let task = {
            let mut inner = self.lock();
            inner.stats.total_added += 1;
            let mut task = if front {
                inner.store.push_front(payload, priority, callbacks)
            } else {
                inner.store.push_back(payload, priority, callbacks)
            };
            if attempt > 0 {
                if let Some(entry) = inner.store.get_mut(task.id) {
                    entry.info.attempt = attempt;
                }
                task.attempt = attempt;
            }
            task
        };
        debug!(id = %task.id, priority, front, attempt, "Shared::add: task added");
        self.events.emit(QueueEvent::TaskAdded(task.clone()));
        self.added_notify.notify_one();
        task
    }
}

/// Aborts the scheduler loop once the last queue handle is dropped
struct SchedulerGuard(AbortHandle);

impl Drop for SchedulerGuard {
    fn drop(&mut self) {
        debug!("SchedulerGuard::drop: aborting scheduler loop");
        self.0.abort();
    }
}

/// Priority task queue with bounded concurrency
///
/// Tasks are run through one worker, lowest priority value first, at most
/// `concurrent` at a time. Every transition is published as a
/// [`QueueEvent`]; subscribe with [`Queue::on`] or [`Queue::subscribe`].
///
/// Failures are fire-and-forget: unless `throw_on_error` is set, a failed
/// task only surfaces through `TaskFailed` and the task's `on_failed`
/// callback. A caller that listens to neither sees the task disappear (or be
/// retried) without any error.
///
/// Handles are cheap to clone. The scheduler loop runs on the tokio runtime
/// the queue was created in and is aborted when the last handle is dropped.
pub struct Queue<P, R> {
    pub(crate) shared: Arc<Shared<P, R>>,
    _scheduler: Arc<SchedulerGuard>,
}

impl<P, R> Clone for Queue<P, R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            _scheduler: Arc::clone(&self._scheduler),
        }
    }
}

impl<P, R> fmt::Debug for Queue<P, R>
where
    P: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.lock();
        f.debug_struct("Queue")
            .field("options", &self.shared.options)
            .field("started", &inner.started)
            .field("size", &inner.store.len())
            .field("running", &inner.store.running_count())
            .finish()
    }
}

impl<P, R> Queue<P, R>
where
    P: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    /// Create a queue and spawn its scheduler loop
    ///
    /// Fails with [`QueueError::Config`] for invalid options and
    /// [`QueueError::NoRuntime`] outside a tokio runtime.
    pub fn new(worker: impl Worker<P, R> + 'static, options: QueueOptions) -> Result<Self, QueueError> {
        Self::build(Arc::new(worker), options, None)
    }

    /// Create a queue whose selected batches pass through `hook` first
    pub fn with_before_work(
        worker: impl Worker<P, R> + 'static,
        options: QueueOptions,
        hook: impl Fn(Vec<TaskInfo<P>>) -> eyre::Result<Option<Vec<TaskInfo<P>>>> + Send + Sync + 'static,
    ) -> Result<Self, QueueError> {
        Self::build(Arc::new(worker), options, Some(Box::new(hook)))
    }

    fn build(
        worker: Arc<dyn Worker<P, R>>,
        options: QueueOptions,
        before_work: Option<BeforeWork<P>>,
    ) -> Result<Self, QueueError> {
        debug!(?options, has_before_work = before_work.is_some(), "Queue::build: called");
        options.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| QueueError::NoRuntime)?;

        let shared = Arc::new(Shared {
            inner: Mutex::new(QueueInner {
                store: TaskStore::new(),
                started: options.auto_start,
                stats: QueueStats::default(),
                groups: HashMap::new(),
                next_group: 0,
            }),
            options,
            worker,
            before_work,
            events: EventBus::new(EVENT_CHANNEL_CAPACITY),
            started_notify: Notify::new(),
            added_notify: Notify::new(),
            free_notify: Notify::new(),
            idle_notify: Notify::new(),
        });

        let handle = runtime.spawn(scheduler::run(Arc::clone(&shared)));
        info!(
            concurrent = shared.options.concurrent,
            auto_start = shared.options.auto_start,
            "Queue created"
        );

        Ok(Self {
            shared,
            _scheduler: Arc::new(SchedulerGuard(handle.abort_handle())),
        })
    }

    /// The resolved options
    pub fn options(&self) -> &QueueOptions {
        &self.shared.options
    }

    // === Submission ===

    /// Enqueue a payload at the tail
    pub fn push(&self, payload: P, priority: i64) -> TaskInfo<P> {
        self.push_with(payload, priority, TaskCallbacks::new())
    }

    /// Enqueue a payload at the tail with lifecycle callbacks
    pub fn push_with(&self, payload: P, priority: i64, callbacks: TaskCallbacks<R>) -> TaskInfo<P> {
        debug!(priority, "Queue::push: called");
        self.shared.add(Arc::new(payload), priority, callbacks, false)
    }

    /// Enqueue a payload at the head
    pub fn unshift(&self, payload: P, priority: i64) -> TaskInfo<P> {
        self.unshift_with(payload, priority, TaskCallbacks::new())
    }

    /// Enqueue a payload at the head with lifecycle callbacks
    pub fn unshift_with(&self, payload: P, priority: i64, callbacks: TaskCallbacks<R>) -> TaskInfo<P> {
        debug!(priority, "Queue::unshift: called");
        self.shared.add(Arc::new(payload), priority, callbacks, true)
    }

    // === Lifecycle ===

    /// Begin dispatching; no-op if already started
    pub fn start(&self) {
        debug!("Queue::start: called");
        {
            let mut inner = self.shared.lock();
            if inner.started {
                debug!("Queue::start: already started");
                return;
            }
            inner.started = true;
        }
        info!("Queue started");
        self.shared.events.emit(QueueEvent::Started);
        self.shared.started_notify.notify_one();
    }

    /// Halt future dispatch, leaving running tasks alone; no-op if not started
    pub fn pause(&self) {
        debug!("Queue::pause: called");
        {
            let mut inner = self.shared.lock();
            if !inner.started {
                debug!("Queue::pause: not started");
                return;
            }
            inner.started = false;
        }
        info!("Queue paused");
        self.shared.events.emit(QueueEvent::Paused);
    }

    /// Halt dispatch and cancel every task; no-op if not started
    ///
    /// Running tasks are cancelled with [`CancelReason::Stopped`], pending
    /// ones discarded. The queue can be started again afterwards.
    pub fn stop(&self) {
        debug!("Queue::stop: called");
        {
            let mut inner = self.shared.lock();
            if !inner.started {
                debug!("Queue::stop: not started");
                return;
            }
            inner.started = false;
        }
        self.shared.cancel_all(CancelReason::Stopped);
        info!("Queue stopped");
        self.shared.events.emit(QueueEvent::Stopped);
    }

    /// Cancel every task without changing the started state
    pub fn clear(&self, reason: Option<&str>) {
        debug!(?reason, "Queue::clear: called");
        let reason = reason.map(CancelReason::from).unwrap_or(CancelReason::Cleared);
        self.shared.cancel_all(reason);
    }

    /// Cancel one task; returns false if it is unknown or already settling
    pub fn cancel(&self, id: TaskId) -> bool {
        debug!(%id, "Queue::cancel: called");
        self.shared.cancel_task(id, CancelReason::Cancelled)
    }

    /// Wait until the store is empty
    pub async fn idle(&self) {
        loop {
            let notified = self.shared.idle_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.size() == 0 {
                return;
            }
            notified.await;
        }
    }

    // === Introspection ===

    /// Get a task by id
    pub fn get(&self, id: TaskId) -> Option<TaskInfo<P>> {
        self.shared.lock().store.get(id).map(|e| e.snapshot())
    }

    /// Tasks matching a predicate, in store order
    ///
    /// The predicate runs after the lock is released, so it may call back
    /// into the queue.
    pub fn get_by(&self, predicate: impl Fn(&TaskInfo<P>) -> bool) -> Vec<TaskInfo<P>> {
        let snapshots: Vec<TaskInfo<P>> = self.shared.lock().store.iter().map(|e| e.snapshot()).collect();
        snapshots.into_iter().filter(|task| predicate(task)).collect()
    }

    /// Count of tasks matching a predicate
    pub fn size_by(&self, predicate: impl Fn(&TaskInfo<P>) -> bool) -> usize {
        self.get_by(predicate).len()
    }

    /// Total tasks in the store
    pub fn size(&self) -> usize {
        self.shared.lock().store.len()
    }

    /// Tasks whose worker call is in flight
    pub fn running(&self) -> usize {
        self.shared.lock().store.running_count()
    }

    /// Tasks waiting for dispatch
    pub fn pending(&self) -> usize {
        self.shared.lock().store.pending_count()
    }

    pub fn is_started(&self) -> bool {
        self.shared.lock().started
    }

    /// Lifetime counters
    pub fn stats(&self) -> QueueStats {
        self.shared.lock().stats.clone()
    }

    // === Events ===

    /// Register a synchronous listener for every event
    pub fn on(&self, listener: impl Fn(&QueueEvent<P, R>) + Send + Sync + 'static) -> ListenerId {
        self.shared.events.on(listener)
    }

    /// Unregister a listener
    pub fn off(&self, id: ListenerId) -> bool {
        self.shared.events.off(id)
    }

    /// Receive events through a broadcast channel
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent<P, R>> {
        self.shared.events.subscribe()
    }
}

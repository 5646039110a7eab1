//! Task types for the queue

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use serde::Serialize;

/// Unique task identifier, monotonically increasing per queue instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a dispatched batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct GroupId(pub u64);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a task was cancelled or discarded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelReason {
    /// The per-task timeout fired before the worker settled
    Timeout,
    /// The queue was stopped
    Stopped,
    /// The queue was cleared without a reason
    Cleared,
    /// A single task was cancelled by id
    Cancelled,
    /// The before-work hook dropped the task from its batch
    BeforeWork,
    /// Caller supplied reason
    Custom(String),
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Stopped => write!(f, "stopped"),
            Self::Cleared => write!(f, "cleared"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::BeforeWork => write!(f, "before-work"),
            Self::Custom(reason) => write!(f, "{}", reason),
        }
    }
}

impl From<&str> for CancelReason {
    fn from(reason: &str) -> Self {
        match reason {
            "timeout" => Self::Timeout,
            "stopped" => Self::Stopped,
            "cleared" => Self::Cleared,
            "cancelled" => Self::Cancelled,
            "before-work" => Self::BeforeWork,
            other => Self::Custom(other.to_string()),
        }
    }
}

/// Read-only snapshot of a task, handed to workers, hooks and listeners
///
/// The payload is shared, so snapshots are cheap to clone and the worker
/// sees exactly the value the caller pushed.
#[derive(Debug)]
pub struct TaskInfo<P> {
    pub id: TaskId,
    pub priority: i64,
    pub payload: Arc<P>,
    /// True exactly while the worker call is in flight
    pub running: bool,
    /// 0 for a pushed task, n for its n-th retry
    pub attempt: u32,
    pub added_at: Instant,
    cancelled: Arc<AtomicBool>,
}

impl<P> Clone for TaskInfo<P> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            priority: self.priority,
            payload: Arc::clone(&self.payload),
            running: self.running,
            attempt: self.attempt,
            added_at: self.added_at,
            cancelled: Arc::clone(&self.cancelled),
        }
    }
}

impl<P> TaskInfo<P> {
    pub(crate) fn new(id: TaskId, payload: Arc<P>, priority: i64) -> Self {
        Self {
            id,
            priority,
            payload,
            running: false,
            attempt: 0,
            added_at: Instant::now(),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Borrow the payload
    pub fn payload(&self) -> &P {
        &self.payload
    }

    /// Replace the payload, keeping identity (for before-work hooks)
    pub fn with_payload(mut self, payload: P) -> Self {
        self.payload = Arc::new(payload);
        self
    }

    /// Whether the queue has cancelled this task
    ///
    /// Cancellation never interrupts a running worker; long running workers
    /// may poll this to stop early. Their result is ignored either way.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub(crate) fn mark_cancelled(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

pub(crate) type StartedFn = Box<dyn FnOnce() + Send>;
pub(crate) type SuccessFn<R> = Box<dyn FnOnce(&R) + Send>;
pub(crate) type FailedFn = Box<dyn FnOnce(&eyre::Report) + Send>;
pub(crate) type CancelFn = Box<dyn FnOnce(&CancelReason) + Send>;
pub(crate) type DiscardedFn = Box<dyn FnOnce(Option<&CancelReason>) + Send>;
pub(crate) type FinishedFn = Box<dyn FnOnce() + Send>;

/// Optional per-task lifecycle callbacks, each invoked at most once
pub struct TaskCallbacks<R> {
    pub(crate) on_started: Option<StartedFn>,
    pub(crate) on_success: Option<SuccessFn<R>>,
    pub(crate) on_failed: Option<FailedFn>,
    pub(crate) on_cancel: Option<CancelFn>,
    pub(crate) on_discarded: Option<DiscardedFn>,
    pub(crate) on_finished: Option<FinishedFn>,
}

impl<R> Default for TaskCallbacks<R> {
    fn default() -> Self {
        Self {
            on_started: None,
            on_success: None,
            on_failed: None,
            on_cancel: None,
            on_discarded: None,
            on_finished: None,
        }
    }
}

impl<R> fmt::Debug for TaskCallbacks<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskCallbacks")
            .field("on_started", &self.on_started.is_some())
            .field("on_success", &self.on_success.is_some())
            .field("on_failed", &self.on_failed.is_some())
            .field("on_cancel", &self.on_cancel.is_some())
            .field("on_discarded", &self.on_discarded.is_some())
            .field("on_finished", &self.on_finished.is_some())
            .finish()
    }
}

impl<R> TaskCallbacks<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_started(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_started = Some(Box::new(f));
        self
    }

    pub fn on_success(mut self, f: impl FnOnce(&R) + Send + 'static) -> Self {
        self.on_success = Some(Box::new(f));
        self
    }

    pub fn on_failed(mut self, f: impl FnOnce(&eyre::Report) + Send + 'static) -> Self {
        self.on_failed = Some(Box::new(f));
        self
    }

    pub fn on_cancel(mut self, f: impl FnOnce(&CancelReason) + Send + 'static) -> Self {
        self.on_cancel = Some(Box::new(f));
        self
    }

    pub fn on_discarded(mut self, f: impl FnOnce(Option<&CancelReason>) + Send + 'static) -> Self {
        self.on_discarded = Some(Box::new(f));
        self
    }

    pub fn on_finished(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_finished = Some(Box::new(f));
        self
    }
}

/// Lifetime counters for a queue
#[derive(Debug, Default, Clone, Serialize)]
pub struct QueueStats {
    pub total_added: u64,
    pub total_succeeded: u64,
    pub total_failed: u64,
    pub total_cancelled: u64,
    pub total_discarded: u64,
    pub total_retried: u64,
    pub peak_running: usize,
}

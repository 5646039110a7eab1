//! Typed event bus
//!
//! Every state transition of a queue is published here. Listeners registered
//! with [`EventBus::on`] run synchronously on the emitting task, in
//! registration order; [`EventBus::subscribe`] hands out a broadcast receiver
//! for consumers that prefer to await events.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use super::dispatch::panic_message;
use super::task::{CancelReason, GroupId, TaskInfo};

/// Events published by a queue
#[derive(Debug)]
pub enum QueueEvent<P, R> {
    /// Queue transitioned to running
    Started,
    /// Future dispatch halted, running tasks left alone
    Paused,
    /// Queue halted and every task cancelled
    Stopped,
    /// Store became empty
    Idle,
    /// A batch was selected and is about to dispatch
    GroupStarted { group: GroupId, tasks: Vec<TaskInfo<P>> },
    /// Every task of a dispatched batch has finished
    GroupFinished { group: GroupId },
    TaskAdded(TaskInfo<P>),
    TaskStarted(TaskInfo<P>),
    TaskSuccess(TaskInfo<P>, Arc<R>),
    TaskFailed(TaskInfo<P>, Arc<eyre::Report>),
    /// A running task was cancelled (timeout, stop, clear)
    TaskCancelled(TaskInfo<P>, CancelReason),
    /// A pending task was removed without running
    TaskDiscarded(TaskInfo<P>, Option<CancelReason>),
    /// Terminal outcome reached; always the last event for a task
    TaskFinished(TaskInfo<P>),
    /// Running count dropped below the concurrency limit
    Free,
    /// All known work settled (fires right after `Idle`)
    Finished,
}

impl<P, R> Clone for QueueEvent<P, R> {
    fn clone(&self) -> Self {
        match self {
            Self::Started => Self::Started,
            Self::Paused => Self::Paused,
            Self::Stopped => Self::Stopped,
            Self::Idle => Self::Idle,
            Self::GroupStarted { group, tasks } => Self::GroupStarted {
                group: *group,
                tasks: tasks.clone(),
            },
            Self::GroupFinished { group } => Self::GroupFinished { group: *group },
            Self::TaskAdded(task) => Self::TaskAdded(task.clone()),
            Self::TaskStarted(task) => Self::TaskStarted(task.clone()),
            Self::TaskSuccess(task, value) => Self::TaskSuccess(task.clone(), Arc::clone(value)),
            Self::TaskFailed(task, err) => Self::TaskFailed(task.clone(), Arc::clone(err)),
            Self::TaskCancelled(task, reason) => Self::TaskCancelled(task.clone(), reason.clone()),
            Self::TaskDiscarded(task, reason) => Self::TaskDiscarded(task.clone(), reason.clone()),
            Self::TaskFinished(task) => Self::TaskFinished(task.clone()),
            Self::Free => Self::Free,
            Self::Finished => Self::Finished,
        }
    }
}

impl<P, R> QueueEvent<P, R> {
    /// Event label, e.g. `task:success`
    pub fn name(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Idle => "idle",
            Self::GroupStarted { .. } => "group:started",
            Self::GroupFinished { .. } => "group:finished",
            Self::TaskAdded(_) => "task:added",
            Self::TaskStarted(_) => "task:started",
            Self::TaskSuccess(..) => "task:success",
            Self::TaskFailed(..) => "task:failed",
            Self::TaskCancelled(..) => "task:cancelled",
            Self::TaskDiscarded(..) => "task:discarded",
            Self::TaskFinished(_) => "task:finished",
            Self::Free => "free",
            Self::Finished => "finished",
        }
    }

    /// The task this event concerns, if any
    pub fn task(&self) -> Option<&TaskInfo<P>> {
        match self {
            Self::TaskAdded(task)
            | Self::TaskStarted(task)
            | Self::TaskSuccess(task, _)
            | Self::TaskFailed(task, _)
            | Self::TaskCancelled(task, _)
            | Self::TaskDiscarded(task, _)
            | Self::TaskFinished(task) => Some(task),
            _ => None,
        }
    }
}

impl<P, R> fmt::Display for QueueEvent<P, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GroupStarted { group, tasks } => write!(f, "{} #{} ({} tasks)", self.name(), group, tasks.len()),
            Self::GroupFinished { group } => write!(f, "{} #{}", self.name(), group),
            Self::TaskFailed(task, err) => write!(f, "{} #{}: {}", self.name(), task.id, err),
            Self::TaskCancelled(task, reason) => write!(f, "{} #{}: {}", self.name(), task.id, reason),
            Self::TaskDiscarded(task, Some(reason)) => write!(f, "{} #{}: {}", self.name(), task.id, reason),
            _ => match self.task() {
                Some(task) => write!(f, "{} #{}", self.name(), task.id),
                None => write!(f, "{}", self.name()),
            },
        }
    }
}

/// Handle returned by [`EventBus::on`], used to unregister a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener<P, R> = Arc<dyn Fn(&QueueEvent<P, R>) + Send + Sync>;

/// Synchronous publish/subscribe for queue events
pub struct EventBus<P, R> {
    listeners: RwLock<Vec<(ListenerId, Listener<P, R>)>>,
    next_listener: AtomicU64,
    tx: broadcast::Sender<QueueEvent<P, R>>,
}

impl<P, R> EventBus<P, R>
where
    P: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            listeners: RwLock::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            tx,
        }
    }

    /// Register a listener invoked synchronously for every event
    pub fn on(&self, listener: impl Fn(&QueueEvent<P, R>) + Send + Sync + 'static) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        debug!(?id, "EventBus::on: called");
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener; returns false if it was not registered
    pub fn off(&self, id: ListenerId) -> bool {
        debug!(?id, "EventBus::off: called");
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        before != listeners.len()
    }

    /// Receive events asynchronously; slow receivers observe `Lagged`
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent<P, R>> {
        self.tx.subscribe()
    }

    /// Publish an event
    ///
    /// The listener list is copied before dispatch so listeners may register
    /// listeners or call back into the queue. A panicking listener is logged
    /// and skipped.
    pub fn emit(&self, event: QueueEvent<P, R>) {
        trace!(event = event.name(), "EventBus::emit");
        let listeners: Vec<Listener<P, R>> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| listener(&event))) {
                warn!(
                    event = event.name(),
                    panic = %panic_message(panic.as_ref()),
                    "Event listener panicked"
                );
            }
        }

        // No receivers is not an error
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::task::TaskId;
    use std::sync::Mutex;

    type Bus = EventBus<String, u32>;

    fn info(id: u64) -> TaskInfo<String> {
        TaskInfo::new(TaskId(id), Arc::new(format!("payload-{}", id)), 0)
    }

    #[test]
    fn test_event_names() {
        assert_eq!(QueueEvent::<String, u32>::Started.name(), "started");
        assert_eq!(QueueEvent::<String, u32>::TaskAdded(info(1)).name(), "task:added");
        assert_eq!(
            QueueEvent::<String, u32>::TaskCancelled(info(1), CancelReason::Timeout).name(),
            "task:cancelled"
        );
        assert_eq!(
            QueueEvent::<String, u32>::GroupFinished { group: GroupId(1) }.name(),
            "group:finished"
        );
    }

    #[test]
    fn test_event_display() {
        let event = QueueEvent::<String, u32>::TaskCancelled(info(4), CancelReason::Timeout);
        assert_eq!(event.to_string(), "task:cancelled #4: timeout");

        let event = QueueEvent::<String, u32>::TaskFailed(info(2), Arc::new(eyre::eyre!("boom")));
        assert_eq!(event.to_string(), "task:failed #2: boom");

        assert_eq!(QueueEvent::<String, u32>::Idle.to_string(), "idle");
    }

    #[test]
    fn test_listeners_receive_in_order() {
        let bus = Bus::new(16);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&seen);
        bus.on(move |event| first.lock().unwrap().push(format!("a:{}", event.name())));
        let second = Arc::clone(&seen);
        bus.on(move |event| second.lock().unwrap().push(format!("b:{}", event.name())));

        bus.emit(QueueEvent::Started);
        assert_eq!(*seen.lock().unwrap(), vec!["a:started", "b:started"]);
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let bus = Bus::new(16);
        let seen = Arc::new(Mutex::new(Vec::new()));

        bus.on(|event| {
            if let QueueEvent::Free = event {
                panic!("listener exploded");
            }
        });
        let sink = Arc::clone(&seen);
        bus.on(move |event| sink.lock().unwrap().push(event.name()));

        bus.emit(QueueEvent::Free);
        bus.emit(QueueEvent::Idle);
        assert_eq!(*seen.lock().unwrap(), vec!["free", "idle"]);
    }

    #[test]
    fn test_off_removes_listener() {
        let bus = Bus::new(16);
        let count = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&count);
        let id = bus.on(move |_| *counter.lock().unwrap() += 1);

        bus.emit(QueueEvent::Free);
        assert!(bus.off(id));
        assert!(!bus.off(id));
        bus.emit(QueueEvent::Free);

        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn test_listener_can_register_listener() {
        let bus = Arc::new(Bus::new(16));
        let inner_bus = Arc::clone(&bus);
        bus.on(move |event| {
            if matches!(event, QueueEvent::Started) {
                inner_bus.on(|_| {});
            }
        });

        bus.emit(QueueEvent::Started);
        assert_eq!(bus.listeners.read().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_subscribe_receives_events() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();

        bus.emit(QueueEvent::TaskAdded(info(9)));
        bus.emit(QueueEvent::TaskSuccess(info(9), Arc::new(3)));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.task().map(|t| t.id), Some(TaskId(9)));
        match rx.recv().await.unwrap() {
            QueueEvent::TaskSuccess(task, value) => {
                assert_eq!(task.payload(), "payload-9");
                assert_eq!(*value, 3);
            }
            other => panic!("Wrong event: {}", other),
        }
    }
}

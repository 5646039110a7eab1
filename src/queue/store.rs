//! Task store - the ordered collection of tasks owned by a queue

use std::sync::Arc;

use tokio::task::AbortHandle;

use super::task::{GroupId, TaskCallbacks, TaskId, TaskInfo};

/// Where a task is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskState {
    /// Waiting for dispatch
    Pending,
    /// Worker call in flight
    Running,
    /// Outcome claimed, waiting to be finished
    Settled,
}

/// A task as held by the store
pub(crate) struct TaskEntry<P, R> {
    pub info: TaskInfo<P>,
    pub state: TaskState,
    pub callbacks: TaskCallbacks<R>,
    /// Armed timeout timer, present only while armed
    pub timeout: Option<AbortHandle>,
    pub group: Option<GroupId>,
}

impl<P, R> TaskEntry<P, R> {
    /// Snapshot with `running` reflecting the current state
    pub fn snapshot(&self) -> TaskInfo<P> {
        let mut info = self.info.clone();
        info.running = self.state == TaskState::Running;
        info
    }

    /// Abort the timeout timer if one is armed
    pub fn disarm(&mut self) {
        if let Some(handle) = self.timeout.take() {
            handle.abort();
        }
    }
}

/// Ordered task collection
///
/// Insertion order only breaks priority ties; selection always re-sorts.
pub(crate) struct TaskStore<P, R> {
    entries: Vec<TaskEntry<P, R>>,
    next_id: u64,
}

impl<P, R> TaskStore<P, R> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 1,
        }
    }

    fn allocate_id(&mut self) -> TaskId {
        let id = TaskId(self.next_id);
        // Wraps back to the first id only once the whole u64 range is spent
        self.next_id = self.next_id.checked_add(1).unwrap_or(1);
        id
    }

    fn new_entry(&mut self, payload: Arc<P>, priority: i64, callbacks: TaskCallbacks<R>) -> TaskEntry<P, R> {
        let id = self.allocate_id();
        TaskEntry {
            info: TaskInfo::new(id, payload, priority),
            state: TaskState::Pending,
            callbacks,
            timeout: None,
            group: None,
        }
    }

    /// Append a task at the tail
    pub fn push_back(&mut self, payload: Arc<P>, priority: i64, callbacks: TaskCallbacks<R>) -> TaskInfo<P> {
        let entry = self.new_entry(payload, priority, callbacks);
        let info = entry.snapshot();
        self.entries.push(entry);
        info
    }

    /// Insert a task at the head
    pub fn push_front(&mut self, payload: Arc<P>, priority: i64, callbacks: TaskCallbacks<R>) -> TaskInfo<P> {
        let entry = self.new_entry(payload, priority, callbacks);
        let info = entry.snapshot();
        self.entries.insert(0, entry);
        info
    }

    pub fn get(&self, id: TaskId) -> Option<&TaskEntry<P, R>> {
        self.entries.iter().find(|e| e.info.id == id)
    }

    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut TaskEntry<P, R>> {
        self.entries.iter_mut().find(|e| e.info.id == id)
    }

    /// Remove a task; `None` if it was already removed
    pub fn remove(&mut self, id: TaskId) -> Option<TaskEntry<P, R>> {
        let index = self.entries.iter().position(|e| e.info.id == id)?;
        Some(self.entries.remove(index))
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskEntry<P, R>> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut TaskEntry<P, R>> {
        self.entries.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn running_count(&self) -> usize {
        self.entries.iter().filter(|e| e.state == TaskState::Running).count()
    }

    pub fn pending_count(&self) -> usize {
        self.entries.iter().filter(|e| e.state == TaskState::Pending).count()
    }

    /// Pick up to `limit` pending tasks, lowest priority value first
    ///
    /// The sort is stable so equal priorities keep store order.
    pub fn select_batch(&self, limit: usize) -> Vec<TaskInfo<P>> {
        let mut pending: Vec<&TaskEntry<P, R>> =
            self.entries.iter().filter(|e| e.state == TaskState::Pending).collect();
        pending.sort_by_key(|e| e.info.priority);
        pending.into_iter().take(limit).map(TaskEntry::snapshot).collect()
    }
}

//! Priority task queue with bounded concurrency
//!
//! The queue runs every submitted task through a single [`Worker`]:
//! - **Ordering:** lowest priority value first, FIFO within a priority
//! - **Capacity:** at most `concurrent` tasks running at once
//! - **Timeouts:** running tasks are cancelled cooperatively after `timeout-ms`
//! - **Retry:** failed payloads are requeued at the front when enabled
//!
//! Callers observe everything through typed [`QueueEvent`]s.

mod config;
mod core;
mod dispatch;
mod error;
mod events;
mod scheduler;
mod store;
mod task;
mod worker;

pub use config::QueueOptions;
pub use self::core::Queue;
pub use error::QueueError;
pub use events::{ListenerId, QueueEvent};
pub use task::{CancelReason, GroupId, QueueStats, TaskCallbacks, TaskId, TaskInfo};
pub use worker::{BeforeWork, Worker};

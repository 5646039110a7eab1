//! taskqueue - bounded-concurrency priority task queue
//!
//! Tasks carry a payload and a priority; a single scheduler loop per queue
//! pulls the lowest-priority-value pending tasks in batches and hands them to
//! a [`queue::Worker`], never running more than the configured number at once.
//! Every state change is published as a [`queue::QueueEvent`].
//!
//! # Modules
//!
//! - [`queue`] - the queue, its scheduler and event bus
//! - [`shell`] - shell-command jobs for the `tq` binary
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod queue;
pub mod shell;

pub use config::Config;
pub use queue::{
    BeforeWork, CancelReason, GroupId, ListenerId, Queue, QueueError, QueueEvent, QueueOptions, QueueStats,
    TaskCallbacks, TaskId, TaskInfo, Worker,
};

//! Queue error types

use thiserror::Error;

/// Errors raised by the queue itself
///
/// Task failures are not represented here: workers return `eyre::Result`
/// and their errors travel through [`QueueEvent::TaskFailed`](super::QueueEvent).
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Invalid queue configuration: {0}")]
    Config(String),

    #[error("Queue must be created inside a tokio runtime")]
    NoRuntime,
}

impl QueueError {
    /// Check if this is a configuration error
    pub fn is_config(&self) -> bool {
        matches!(self, QueueError::Config(_))
    }
}

//! Queue configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::error::QueueError;

/// Queue options, resolved once at construction and immutable afterwards
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueOptions {
    /// Max simultaneously running tasks
    #[serde(default = "default_concurrent")]
    pub concurrent: usize,

    /// Minimum spacing between dispatch cycles in milliseconds
    #[serde(rename = "delay-ms", default = "default_delay_ms")]
    pub delay_ms: u64,

    /// Begin processing immediately after construction
    #[serde(rename = "auto-start", default = "default_auto_start")]
    pub auto_start: bool,

    /// Re-insert the payload of a failed task at the front of the queue
    #[serde(default)]
    pub retry: bool,

    /// Requeue a payload at most this many times; unbounded when unset
    #[serde(rename = "max-retries", default)]
    pub max_retries: Option<u32>,

    /// Force-cancel a running task after this many milliseconds
    #[serde(rename = "timeout-ms", default)]
    pub timeout_ms: Option<u64>,

    /// Re-raise task failures after the failed event fires
    #[serde(rename = "throw-on-error", default = "default_throw_on_error")]
    pub throw_on_error: bool,
}

fn default_concurrent() -> usize {
    1
}

fn default_delay_ms() -> u64 {
    300
}

fn default_auto_start() -> bool {
    true
}

fn default_throw_on_error() -> bool {
    cfg!(debug_assertions)
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            concurrent: default_concurrent(),
            delay_ms: default_delay_ms(),
            auto_start: default_auto_start(),
            retry: false,
            max_retries: None,
            timeout_ms: None,
            throw_on_error: default_throw_on_error(),
        }
    }
}

impl QueueOptions {
    /// Get the dispatch pacing delay as a Duration
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Get the per-task timeout as a Duration, if one is configured
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Whether a task failing on its `attempt`-th retry (0 for the first run) is requeued
    pub fn will_retry(&self, attempt: u32) -> bool {
        self.retry && self.max_retries.is_none_or(|max| attempt < max)
    }

    /// Reject options the scheduler cannot honor
    pub fn validate(&self) -> Result<(), QueueError> {
        debug!(?self, "QueueOptions::validate: called");
        if self.concurrent == 0 {
            return Err(QueueError::Config("concurrent must be at least 1".to_string()));
        }
        if self.timeout_ms == Some(0) {
            return Err(QueueError::Config("timeout-ms must be greater than 0".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = QueueOptions::default();
        assert_eq!(options.concurrent, 1);
        assert_eq!(options.delay_ms, 300);
        assert!(options.auto_start);
        assert!(!options.retry);
        assert_eq!(options.timeout_ms, None);
        assert_eq!(options.throw_on_error, cfg!(debug_assertions));
    }

    #[test]
    fn test_durations() {
        let options = QueueOptions {
            delay_ms: 50,
            timeout_ms: Some(2000),
            ..Default::default()
        };
        assert_eq!(options.delay(), Duration::from_millis(50));
        assert_eq!(options.timeout(), Some(Duration::from_secs(2)));
        assert_eq!(QueueOptions::default().timeout(), None);
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let options = QueueOptions {
            concurrent: 0,
            ..Default::default()
        };
        assert!(matches!(options.validate(), Err(QueueError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let options = QueueOptions {
            timeout_ms: Some(0),
            ..Default::default()
        };
        assert!(options.validate().is_err());
        assert!(QueueOptions::default().validate().is_ok());
    }

    #[test]
    fn test_will_retry() {
        assert!(!QueueOptions::default().will_retry(0));

        let unbounded = QueueOptions {
            retry: true,
            ..Default::default()
        };
        assert!(unbounded.will_retry(0));
        assert!(unbounded.will_retry(1000));

        let bounded = QueueOptions {
            retry: true,
            max_retries: Some(2),
            ..Default::default()
        };
        assert!(bounded.will_retry(0));
        assert!(bounded.will_retry(1));
        assert!(!bounded.will_retry(2));

        let never = QueueOptions {
            retry: true,
            max_retries: Some(0),
            ..Default::default()
        };
        assert!(!never.will_retry(0));
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let options: QueueOptions = serde_yaml::from_str("concurrent: 4\nretry: true\ntimeout-ms: 1500\n").unwrap();
        assert_eq!(options.concurrent, 4);
        assert!(options.retry);
        assert_eq!(options.timeout_ms, Some(1500));
        assert_eq!(options.max_retries, None);
        assert_eq!(options.delay_ms, 300);
        assert!(options.auto_start);
    }
}

//! Shell jobs - the worker behind `tq run`
//!
//! A job file holds one command per line, optionally prefixed by a priority
//! and a tab. Blank lines and `#` comments are skipped.

use std::fmt;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use eyre::{Context, Result, eyre};
use serde::Serialize;
use tokio::process::Command;
use tracing::debug;

use crate::config::ShellConfig;
use crate::queue::{TaskInfo, Worker};

/// How often a running command checks whether its task was cancelled
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// One line of a job file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Job {
    /// 1-based line number in the source
    pub line: usize,
    pub priority: i64,
    pub command: String,
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.command)
    }
}

/// Parse job lines: `[priority<TAB>]command`
///
/// A prefix that is not an integer is treated as part of the command.
pub fn parse_jobs(text: &str) -> Vec<Job> {
    text.lines()
        .enumerate()
        .filter_map(|(index, raw)| {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            let (priority, command) = match line.split_once('\t') {
                Some((prefix, rest)) => match prefix.trim().parse::<i64>() {
                    Ok(priority) => (priority, rest.trim()),
                    Err(_) => (0, line),
                },
                None => (0, line),
            };
            if command.is_empty() {
                return None;
            }
            Some(Job {
                line: index + 1,
                priority,
                command: command.to_string(),
            })
        })
        .collect()
}

/// Captured result of a successful command
#[derive(Debug, Clone, Serialize)]
pub struct JobOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
}

/// Runs each job through the configured shell
pub struct ShellWorker {
    config: ShellConfig,
}

impl ShellWorker {
    pub fn new(config: ShellConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Worker<Job, JobOutput> for ShellWorker {
    async fn work(&self, task: TaskInfo<Job>) -> Result<JobOutput> {
        let job = task.payload();
        debug!(id = %task.id, command = %job.command, "ShellWorker::work: called");

        let child = Command::new(&self.config.program)
            .arg(&self.config.command_flag)
            .arg(&job.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(self.config.kill_on_cancel)
            .spawn()
            .context(format!("Failed to spawn {}", self.config.program))?;

        let output = child.wait_with_output();
        tokio::pin!(output);
        let mut poll = tokio::time::interval(CANCEL_POLL);

        let output = loop {
            tokio::select! {
                result = &mut output => break result.context("Failed to wait for command")?,
                _ = poll.tick() => {
                    if self.config.kill_on_cancel && task.is_cancelled() {
                        // Dropping the wait future kills the child
                        debug!(id = %task.id, "ShellWorker::work: task cancelled, killing command");
                        return Err(eyre!("cancelled"));
                    }
                }
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(eyre!("command exited with {}: {}", output.status, stderr.trim()));
        }

        Ok(JobOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).trim_end().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{Queue, QueueEvent, QueueOptions};
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_parse_jobs() {
        let text = "# build steps\n\necho one\n5\techo five\n  -2\techo urgent  \nnot-a-number\techo tabbed\n";
        let jobs = parse_jobs(text);

        assert_eq!(jobs.len(), 4);
        assert_eq!(jobs[0], Job { line: 3, priority: 0, command: "echo one".to_string() });
        assert_eq!(jobs[1].priority, 5);
        assert_eq!(jobs[1].command, "echo five");
        assert_eq!(jobs[2].priority, -2);
        assert_eq!(jobs[2].command, "echo urgent");
        assert_eq!(jobs[3].priority, 0);
        assert_eq!(jobs[3].command, "not-a-number\techo tabbed");
    }

    #[test]
    fn test_parse_jobs_skips_empty_command() {
        assert!(parse_jobs("3\t\n#only comments\n").is_empty());
    }

    fn options(timeout_ms: Option<u64>) -> QueueOptions {
        QueueOptions {
            concurrent: 2,
            delay_ms: 0,
            timeout_ms,
            throw_on_error: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_shell_worker_success_and_failure() {
        let queue = Queue::new(ShellWorker::new(ShellConfig::default()), options(None)).unwrap();

        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&outcomes);
        queue.on(move |event| match event {
            QueueEvent::TaskSuccess(task, output) => {
                sink.lock().unwrap().push(format!("{} ok {}", task.payload().line, output.stdout));
            }
            QueueEvent::TaskFailed(task, err) => {
                let failed = err.to_string().contains("exited with");
                sink.lock().unwrap().push(format!("{} failed {}", task.payload().line, failed));
            }
            _ => {}
        });

        for job in parse_jobs("echo hello\nexit 3\n") {
            queue.push(job.clone(), job.priority);
        }
        tokio::time::timeout(Duration::from_secs(10), queue.idle()).await.unwrap();

        let mut outcomes = outcomes.lock().unwrap().clone();
        outcomes.sort();
        assert_eq!(outcomes, vec!["1 ok hello", "2 failed true"]);
    }

    #[tokio::test]
    async fn test_shell_worker_timeout() {
        let queue = Queue::new(ShellWorker::new(ShellConfig::default()), options(Some(100))).unwrap();

        let reasons = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reasons);
        queue.on(move |event| {
            if let QueueEvent::TaskCancelled(_, reason) = event {
                sink.lock().unwrap().push(reason.to_string());
            }
        });

        queue.push(parse_jobs("sleep 5").remove(0), 0);
        tokio::time::timeout(Duration::from_secs(3), queue.idle()).await.unwrap();
        assert_eq!(*reasons.lock().unwrap(), vec!["timeout"]);
    }
}

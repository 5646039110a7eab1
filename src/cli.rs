//! CLI command definitions and subcommands

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::warn;

use crate::queue::QueueOptions;

/// Retry cap for `tq run --retry` when neither the flag nor the config sets one
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// tq - run shell jobs through a bounded priority queue
#[derive(Parser)]
#[command(
    name = "tq",
    about = "Run shell jobs through a bounded-concurrency priority queue",
    version = env!("CARGO_PKG_VERSION"),
    after_help = "Logs are written to: ~/.local/share/taskqueue/logs/tq.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Run jobs, one `[priority<TAB>]command` per line
    Run(RunArgs),

    /// Print the resolved configuration as YAML
    Config,
}

/// Flags of `tq run`; unset ones fall back to the config file
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Job file (reads stdin when omitted or `-`)
    #[arg(value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// Maximum number of jobs running at once
    #[arg(short = 'n', long)]
    pub concurrent: Option<usize>,

    /// Pause before each dispatch cycle, in milliseconds
    #[arg(long)]
    pub delay_ms: Option<u64>,

    /// Cancel jobs running longer than this, in milliseconds
    #[arg(short, long)]
    pub timeout_ms: Option<u64>,

    /// Requeue failed jobs at the front of the queue
    #[arg(short, long)]
    pub retry: bool,

    /// Give up on a job after this many retries [default: 3]
    #[arg(long, value_name = "N")]
    pub max_retries: Option<u32>,

    /// Output format
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

impl RunArgs {
    /// Queue options for a run: config values overridden by flags
    ///
    /// Jobs are all queued before the first dispatch, failures are reported
    /// rather than raised, and retries are always capped.
    pub fn apply(&self, base: &QueueOptions) -> QueueOptions {
        let mut options = base.clone();
        if let Some(concurrent) = self.concurrent {
            options.concurrent = concurrent;
        }
        if let Some(delay_ms) = self.delay_ms {
            options.delay_ms = delay_ms;
        }
        if self.timeout_ms.is_some() {
            options.timeout_ms = self.timeout_ms;
        }
        options.retry |= self.retry;
        options.max_retries = self.max_retries.or(base.max_retries).or(Some(DEFAULT_MAX_RETRIES));
        if base.throw_on_error {
            warn!("throw-on-error is ignored by `tq run`; failures are reported as events");
        }
        options.throw_on_error = false;
        options.auto_start = false;
        options
    }
}

/// Output format for event lines
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

//! tq - run shell jobs through a bounded priority queue
//!
//! CLI entry point for the `run` and `config` commands.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tracing::{info, warn};

use taskqueue::cli::{Cli, Command, OutputFormat, RunArgs};
use taskqueue::config::Config;
use taskqueue::queue::{Queue, QueueEvent};
use taskqueue::shell::{Job, JobOutput, ShellWorker, parse_jobs};

/// Environment variable holding a tracing filter for the log file
const LOG_FILTER_ENV: &str = "TQ_LOG";

/// Log file shared by every `tq` invocation
fn log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("taskqueue")
        .join("logs")
        .join("tq.log")
}

/// Log to file, appending so runs started from scripts keep their history
///
/// `TQ_LOG` takes a tracing filter; `--verbose` adds a debug directive.
fn setup_logging(verbose: bool) -> Result<()> {
    let path = log_path();
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).context("Failed to create log directory")?;
    }
    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .context(format!("Failed to open log file {}", path.display()))?;

    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let filter = tracing_subscriber::EnvFilter::try_from_env(LOG_FILTER_ENV)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(""))
        .add_directive(level.into());

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(filter)
        .init();

    info!(pid = std::process::id(), verbose, "tq starting");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    setup_logging(cli.verbose).context("Failed to setup logging")?;

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate()?;

    info!(
        "tq loaded config: concurrent={}, delay-ms={}, shell={}",
        config.queue.concurrent, config.queue.delay_ms, config.shell.program
    );

    match cli.command {
        Some(Command::Run(args)) => {
            let ok = cmd_run(&config, &args).await?;
            if !ok {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config) => cmd_config(&config),
        None => {
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
    }
}

/// Read the job list from a file, or stdin for `None` and `-`
fn read_jobs(file: Option<&Path>) -> Result<Vec<Job>> {
    let text = match file {
        Some(path) if path != Path::new("-") => {
            fs::read_to_string(path).context(format!("Failed to read job file {}", path.display()))?
        }
        _ => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read jobs from stdin")?;
            text
        }
    };
    Ok(parse_jobs(&text))
}

/// Run every job and report each queue event
///
/// Returns false if any job was cancelled or failed with no retry left.
async fn cmd_run(config: &Config, args: &RunArgs) -> Result<bool> {
    let options = args.apply(&config.queue);
    options.validate()?;

    let jobs = read_jobs(args.file.as_deref())?;
    info!(count = jobs.len(), "cmd_run: jobs loaded");
    if jobs.is_empty() {
        warn!("cmd_run: no jobs to run");
        return Ok(true);
    }

    let queue = Queue::new(ShellWorker::new(config.shell.clone()), options.clone())?;

    let failures = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&failures);
    let format = args.format;
    queue.on(move |event| {
        let terminal = match event {
            QueueEvent::TaskFailed(task, _) => !options.will_retry(task.attempt),
            QueueEvent::TaskCancelled(..) => true,
            _ => false,
        };
        if terminal {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        print_event(event, format);
    });

    for job in jobs {
        let priority = job.priority;
        queue.push(job, priority);
    }
    queue.start();

    tokio::select! {
        _ = queue.idle() => {}
        _ = tokio::signal::ctrl_c() => {
            warn!("cmd_run: interrupted, stopping queue");
            queue.stop();
            queue.idle().await;
        }
    }

    let stats = queue.stats();
    info!(
        succeeded = stats.total_succeeded,
        failed = stats.total_failed,
        cancelled = stats.total_cancelled,
        "cmd_run: queue drained"
    );
    match args.format {
        OutputFormat::Json => {
            println!("{}", serde_json::json!({ "event": "summary", "stats": stats }));
        }
        OutputFormat::Text => {
            println!(
                "{} succeeded, {} failed, {} cancelled, {} retried",
                stats.total_succeeded, stats.total_failed, stats.total_cancelled, stats.total_retried
            );
        }
    }

    Ok(failures.load(Ordering::SeqCst) == 0)
}

fn print_event(event: &QueueEvent<Job, JobOutput>, format: OutputFormat) {
    let time = chrono::Local::now().format("%H:%M:%S%.3f").to_string();
    match format {
        OutputFormat::Json => println!("{}", event_json(event, &time)),
        OutputFormat::Text => {
            let line = match event.task() {
                Some(task) if task.attempt > 0 => format!(
                    "{} {} {}",
                    event,
                    task.payload().command.dimmed(),
                    format!("(retry {})", task.attempt).dimmed()
                ),
                Some(task) => format!("{} {}", event, task.payload().command.dimmed()),
                None => event.to_string(),
            };
            let line = match event {
                QueueEvent::TaskSuccess(_, output) if !output.stdout.is_empty() => {
                    format!("{} {}\n{}", time.dimmed(), line.green(), output.stdout)
                }
                QueueEvent::TaskSuccess(..) => format!("{} {}", time.dimmed(), line.green()),
                QueueEvent::TaskFailed(..) => format!("{} {}", time.dimmed(), line.red()),
                QueueEvent::TaskCancelled(..) | QueueEvent::TaskDiscarded(..) => {
                    format!("{} {}", time.dimmed(), line.yellow())
                }
                _ => format!("{} {}", time.dimmed(), line),
            };
            println!("{}", line);
        }
    }
}

fn event_json(event: &QueueEvent<Job, JobOutput>, time: &str) -> serde_json::Value {
    let mut value = serde_json::json!({ "time": time, "event": event.name() });
    if let Some(task) = event.task() {
        value["id"] = serde_json::json!(task.id.0);
        value["priority"] = serde_json::json!(task.priority);
        value["attempt"] = serde_json::json!(task.attempt);
        value["command"] = serde_json::json!(task.payload().command);
    }
    match event {
        QueueEvent::GroupStarted { group, tasks } => {
            value["group"] = serde_json::json!(group.0);
            value["tasks"] = serde_json::json!(tasks.iter().map(|t| t.id.0).collect::<Vec<_>>());
        }
        QueueEvent::GroupFinished { group } => value["group"] = serde_json::json!(group.0),
        QueueEvent::TaskSuccess(_, output) => {
            value["exit_code"] = serde_json::json!(output.exit_code);
            value["stdout"] = serde_json::json!(output.stdout);
        }
        QueueEvent::TaskFailed(_, err) => value["error"] = serde_json::json!(err.to_string()),
        QueueEvent::TaskCancelled(_, reason) => value["reason"] = serde_json::json!(reason.to_string()),
        QueueEvent::TaskDiscarded(_, reason) => {
            value["reason"] = serde_json::json!(reason.as_ref().map(|r| r.to_string()))
        }
        _ => {}
    }
    value
}

fn cmd_config(config: &Config) -> Result<()> {
    print!("{}", serde_yaml::to_string(config).context("Failed to serialize config")?);
    Ok(())
}

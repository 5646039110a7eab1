//! Configuration types and loading for the `tq` binary

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::queue::QueueOptions;

/// Environment variable naming a config file
pub const CONFIG_ENV: &str = "TQ_CONFIG";

/// Project-local config file, looked up in the working directory
const LOCAL_CONFIG: &str = ".taskqueue.yml";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Queue options
    pub queue: QueueOptions,

    /// How job commands are executed
    pub shell: ShellConfig,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Call this early in startup to fail fast with clear error messages.
    pub fn validate(&self) -> Result<()> {
        self.queue.validate().context("Invalid queue section")?;
        if self.shell.program.trim().is_empty() {
            return Err(eyre::eyre!("shell.program must not be empty"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    ///
    /// An explicit path must load. Otherwise the first readable candidate
    /// from [`Config::candidate_paths`] wins, and defaults apply when none
    /// exists.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let candidates = Self::candidate_paths(std::env::var_os(CONFIG_ENV).map(PathBuf::from), dirs::config_dir());
        for candidate in candidates.iter().filter(|path| path.exists()) {
            match Self::load_from_file(candidate) {
                Ok(config) => return Ok(config),
                Err(e) => tracing::warn!("Skipping config {}: {:#}", candidate.display(), e),
            }
        }

        tracing::info!(searched = candidates.len(), "No config file found, using defaults");
        Ok(Self::default())
    }

    /// Config files tried in order when no path is given on the command line:
    /// `$TQ_CONFIG`, `./.taskqueue.yml`, then `<config dir>/taskqueue/taskqueue.yml`
    pub fn candidate_paths(env_path: Option<PathBuf>, config_dir: Option<PathBuf>) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = env_path.into_iter().collect();
        paths.push(PathBuf::from(LOCAL_CONFIG));
        if let Some(dir) = config_dir {
            paths.push(dir.join("taskqueue").join("taskqueue.yml"));
        }
        paths
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Shell used to run job commands
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Shell program
    pub program: String,

    /// Flag that makes the shell read the command from its next argument
    #[serde(rename = "command-flag")]
    pub command_flag: String,

    /// Kill the child process when its task is cancelled
    #[serde(rename = "kill-on-cancel")]
    pub kill_on_cancel: bool,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            program: "sh".to_string(),
            command_flag: "-c".to_string(),
            kill_on_cancel: true,
        }
    }
}

//! Configuration types for cluster-ferry
//!
//! Defines CLI arguments and the validated runtime configuration of a worker.

use crate::error::ConfigError;
use crate::transfer::TransferConfig;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Distributed document migration between search clusters
#[derive(Parser, Debug, Clone)]
#[command(
    name = "ferry",
    version,
    about = "Distributed document, index and template migration between search clusters",
    long_about = "Moves documents, index configurations and templates from one cluster to another.\n\n\
                  Operates in two phases:\n\
                  1. Planning: a task is split into size-balanced subtasks kept in Redis\n\
                  2. Transfer: any number of workers pull subtasks and copy them in parallel\n\n\
                  Scales horizontally by adding more worker processes.",
    after_help = "EXAMPLES:\n    \
        # Register a task and build its backlog\n    \
        ferry add logs2024 task.json --redis redis://localhost:6379\n\n    \
        # Start a worker\n    \
        ferry work --plugins plugins.json\n\n    \
        # Let workers pick up subtasks\n    \
        ferry resume\n\n    \
        # Watch progress\n    \
        ferry status logs2024 --watch"
)]
pub struct CliArgs {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Command,

    /// Redis URL for queue coordination
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379", global = true)]
    pub redis: String,

    /// JSON file declaring mutator and filter plugins
    #[arg(long, env = "FERRY_PLUGINS", value_name = "FILE", global = true)]
    pub plugins: Option<PathBuf>,

    /// Quiet mode - suppress progress output
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Verbose output
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run as a worker pulling subtasks from the backlog
    Work {
        /// Seconds to sleep when paused or idle
        #[arg(long, default_value_t = 2, value_name = "SECS")]
        poll_interval: u64,

        /// Seconds between background heartbeats
        #[arg(long, default_value_t = 2, value_name = "SECS")]
        heartbeat_interval: u64,

        /// Seconds without a heartbeat before a worker is purged
        #[arg(long, default_value_t = 10, value_name = "SECS")]
        liveness_timeout: u64,

        /// HTTP timeout for cluster requests in seconds
        #[arg(long, default_value_t = 60, value_name = "SECS")]
        timeout: u64,

        /// Documents fetched per scroll page
        #[arg(long, default_value_t = 500, value_name = "NUM")]
        scroll_size: usize,

        /// Minimum delay before resending rejected bulk items
        #[arg(long, default_value_t = 2000, value_name = "MS")]
        backoff_min: u64,

        /// Maximum delay before resending rejected bulk items
        #[arg(long, default_value_t = 7000, value_name = "MS")]
        backoff_max: u64,

        /// Exit once every backlog is empty instead of polling forever
        #[arg(long)]
        exit_when_drained: bool,
    },

    /// Register a task from a JSON definition and build its backlog
    Add {
        /// Task name (letters and digits, starting with a letter)
        #[arg(value_name = "NAME")]
        name: String,

        /// Task definition file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Size field recorded on the task when its definition names none
        /// (defaults to `_size`)
        #[arg(long, value_name = "FIELD")]
        size_field: Option<String>,
    },

    /// Remove a task with its backlog, progress and error log
    Remove {
        #[arg(value_name = "NAME")]
        name: String,

        /// Force removal without confirmation
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// List registered tasks
    List {
        /// Output format (text, json)
        #[arg(long, default_value = "text", value_name = "FORMAT")]
        format: String,
    },

    /// Regenerate the backlog of a task, skipping completed subtasks
    Rebuild {
        #[arg(value_name = "NAME")]
        name: String,

        /// Forget completed subtasks first so everything is copied again
        #[arg(long)]
        clear_completed: bool,
    },

    /// Show task progress and live workers
    Status {
        /// Task to show (all tasks if omitted)
        #[arg(value_name = "NAME")]
        name: Option<String>,

        /// Watch mode - continuously update status
        #[arg(short, long)]
        watch: bool,

        /// Update interval for watch mode (seconds)
        #[arg(long, default_value = "2", value_name = "SECS")]
        interval: u64,

        /// Output format (text, json)
        #[arg(long, default_value = "text", value_name = "FORMAT")]
        format: String,
    },

    /// Show the error log of a task
    Errors {
        #[arg(value_name = "NAME")]
        name: String,

        /// Clear the error log after printing it
        #[arg(long)]
        clear: bool,
    },

    /// Stop all workers from picking up new subtasks
    Pause,

    /// Let all workers pick up subtasks
    Resume,
}

/// Output format for listing commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::MissingRequired(format!(
                "unknown output format '{}', expected text or json",
                other
            ))),
        }
    }
}

/// Configuration for a worker process
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Sleep between polls when paused or idle
    pub poll_interval: Duration,
    /// Background heartbeat period
    pub heartbeat_interval: Duration,
    /// Silence after which a worker is purged
    pub liveness_timeout: Duration,
    /// HTTP timeout for cluster requests
    pub http_timeout: Duration,
    /// Subtask execution tunables
    pub transfer: TransferConfig,
    /// Keep polling when every backlog is empty
    pub continuous: bool,
    /// Show progress
    pub show_progress: bool,
    /// Verbose logging
    pub verbose: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            heartbeat_interval: Duration::from_secs(2),
            liveness_timeout: Duration::from_secs(10),
            http_timeout: Duration::from_secs(60),
            transfer: TransferConfig::default(),
            continuous: true,
            show_progress: true,
            verbose: false,
        }
    }
}

impl WorkerConfig {
    /// Create from CLI args
    #[allow(clippy::too_many_arguments)]
    pub fn from_work_args(
        poll_interval: u64,
        heartbeat_interval: u64,
        liveness_timeout: u64,
        timeout: u64,
        scroll_size: usize,
        backoff_min: u64,
        backoff_max: u64,
        exit_when_drained: bool,
        quiet: bool,
        verbose: bool,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            poll_interval: Duration::from_secs(poll_interval),
            heartbeat_interval: Duration::from_secs(heartbeat_interval),
            liveness_timeout: Duration::from_secs(liveness_timeout),
            http_timeout: Duration::from_secs(timeout),
            transfer: TransferConfig {
                scroll_page_size: scroll_size,
                backoff_min: Duration::from_millis(backoff_min),
                backoff_max: Duration::from_millis(backoff_max),
                ..Default::default()
            },
            continuous: !exit_when_drained,
            show_progress: !quiet,
            verbose,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("poll_interval", self.poll_interval),
            ("heartbeat_interval", self.heartbeat_interval),
            ("liveness_timeout", self.liveness_timeout),
            ("timeout", self.http_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::InvalidInterval {
                    name: name.to_string(),
                    reason: "must be positive".to_string(),
                });
            }
        }

        // A worker must beat at least once inside its own liveness window
        if self.heartbeat_interval >= self.liveness_timeout {
            return Err(ConfigError::InvalidInterval {
                name: "heartbeat_interval".to_string(),
                reason: format!(
                    "{:?} must be shorter than the liveness timeout {:?}",
                    self.heartbeat_interval, self.liveness_timeout
                ),
            });
        }

        self.transfer.validate()
    }
}

/// Settings shared by every subcommand
#[derive(Debug, Clone)]
pub struct FerryConfig {
    /// Redis URL
    pub redis_url: String,
    /// Plugin declaration file
    pub plugins: Option<PathBuf>,
    /// Quiet mode
    pub quiet: bool,
    /// Verbose mode
    pub verbose: bool,
}

impl From<&CliArgs> for FerryConfig {
    fn from(args: &CliArgs) -> Self {
        Self {
            redis_url: args.redis.clone(),
            plugins: args.plugins.clone(),
            quiet: args.quiet,
            verbose: args.verbose,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_work_defaults_parse() {
        let args = CliArgs::try_parse_from(["ferry", "work"]).unwrap();
        let Command::Work {
            poll_interval,
            heartbeat_interval,
            liveness_timeout,
            timeout,
            scroll_size,
            backoff_min,
            backoff_max,
            exit_when_drained,
        } = args.command
        else {
            panic!("expected work command");
        };

        let config = WorkerConfig::from_work_args(
            poll_interval,
            heartbeat_interval,
            liveness_timeout,
            timeout,
            scroll_size,
            backoff_min,
            backoff_max,
            exit_when_drained,
            false,
            false,
        )
        .unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.liveness_timeout, Duration::from_secs(10));
        assert_eq!(config.transfer.backoff_min, Duration::from_millis(2000));
        assert_eq!(config.transfer.backoff_max, Duration::from_millis(7000));
        assert!(config.continuous);
    }

    #[test]
    fn test_invalid_worker_config() {
        let slow_heartbeat = WorkerConfig {
            heartbeat_interval: Duration::from_secs(10),
            ..Default::default()
        };
        assert!(matches!(
            slow_heartbeat.validate(),
            Err(ConfigError::InvalidInterval { .. })
        ));

        let result = WorkerConfig::from_work_args(2, 2, 10, 60, 500, 9000, 100, false, false, false);
        assert!(matches!(result, Err(ConfigError::InvalidBackoff { .. })));

        let zero_poll = WorkerConfig {
            poll_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(zero_poll.validate().is_err());
    }

    #[test]
    fn test_global_flags() {
        let args = CliArgs::try_parse_from([
            "ferry",
            "errors",
            "logs2024",
            "--clear",
            "--redis",
            "redis://queue:6379",
            "--plugins",
            "plugins.json",
            "-q",
        ])
        .unwrap();
        let config = FerryConfig::from(&args);
        assert_eq!(config.redis_url, "redis://queue:6379");
        assert_eq!(config.plugins, Some(PathBuf::from("plugins.json")));
        assert!(config.quiet);
        assert!(matches!(args.command, Command::Errors { ref name, clear: true } if name == "logs2024"));
    }

    #[test]
    fn test_size_field_belongs_to_add() {
        let args = CliArgs::try_parse_from(["ferry", "add", "logs", "task.json", "--size-field", "bytes"]).unwrap();
        assert!(matches!(
            args.command,
            Command::Add { size_field: Some(ref field), .. } if field == "bytes"
        ));

        let args = CliArgs::try_parse_from(["ferry", "add", "logs", "task.json"]).unwrap();
        assert!(matches!(args.command, Command::Add { size_field: None, .. }));

        assert!(CliArgs::try_parse_from(["ferry", "work", "--size-field", "bytes"]).is_err());
        assert!(CliArgs::try_parse_from(["ferry", "rebuild", "logs", "--size-field", "bytes"]).is_err());
    }

    #[test]
    fn test_output_format() {
        assert_eq!(OutputFormat::parse("JSON").unwrap(), OutputFormat::Json);
        assert!(OutputFormat::parse("yaml").is_err());
    }
}

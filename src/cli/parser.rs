//! CLI argument parser using clap
//!
//! Defines the command-line surface of the `cadence` binary: global
//! configuration options and one subcommand per scheduler operation.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::build;

/// cadence - recurring task scheduler
#[derive(Parser, Debug)]
#[command(name = "cadence")]
#[command(version = build::CLAP_LONG_VERSION)]
#[command(about = "Recurring task scheduler with cron and periodical triggers")]
#[command(long_about = r#"
cadence runs tasks declared in configuration files on cron expressions
("0 9 * * *") or periodical expressions ("every 5 minutes").

Schedulers group tasks; one worker per scheduler polls for due tasks and
dispatches them through a shell command.

EXAMPLES:
    # Run every configured scheduler until interrupted
    cadence consume --all

    # Run the "reports" scheduler for at most 10 executions
    cadence consume reports --limit 10

    # Show the tasks due right now
    cadence list --due

    # Write a crontab fragment per scheduler
    cadence cron --directory /etc/cron.d

    # Use a specific configuration file
    cadence --config /path/to/config.toml list

CONFIGURATION:
    Configuration is loaded from TOML files in the following order:
    1. config/default.toml (base configuration)
    2. config/{environment}.toml (environment-specific overrides)
    3. config/local.toml (local overrides, not committed)
    4. Environment variables with CADENCE_ prefix
       (e.g. CADENCE_WORKER__POLL_INTERVAL_MS=500)

    --config loads a single file instead of the layered directory.
"#)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    ///
    /// Loads this file instead of the layered files under config/.
    /// The file must exist and be readable.
    #[arg(short, long, global = true, value_name = "FILE", value_parser = super::validation::validate_config_file_path)]
    pub config: Option<PathBuf>,

    /// Environment to run in
    ///
    /// Selects the config/{environment}.toml overlay.
    /// Overrides the CADENCE_APP_ENV environment variable.
    #[arg(short, long, global = true, value_enum)]
    pub env: Option<Environment>,

    /// Enable verbose output (debug level logging)
    ///
    /// Cannot be used with --quiet.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Suppress non-error output (error level logging only)
    ///
    /// Cannot be used with --verbose.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Consume due tasks of one or more schedulers
    ///
    /// Starts one worker per selected scheduler and runs until a limit is
    /// reached or the process receives Ctrl-C.
    #[command(alias = "scheduler:consume")]
    Consume {
        /// Names of the schedulers to consume
        #[arg(value_name = "SCHEDULER", required_unless_present = "all")]
        schedulers: Vec<String>,

        /// Consume every configured scheduler
        #[arg(long, conflicts_with = "schedulers")]
        all: bool,

        /// Stop each worker after this many executions
        #[arg(long, value_name = "N", value_parser = super::validation::validate_positive_count)]
        limit: Option<usize>,

        /// Stop each worker after this many seconds
        #[arg(long, value_name = "SECS", value_parser = super::validation::validate_positive_secs)]
        time_limit: Option<u64>,

        /// Idle sleep between two polls, in milliseconds
        #[arg(long, value_name = "MS", value_parser = super::validation::validate_poll_interval)]
        poll_interval: Option<u64>,

        /// Stop each worker after this many failed executions
        #[arg(long, value_name = "N", value_parser = super::validation::validate_positive_count)]
        failure_limit: Option<usize>,
    },

    /// List the tasks of the configured schedulers
    #[command(alias = "scheduler:list")]
    List {
        /// Limit the listing to these schedulers
        #[arg(value_name = "SCHEDULER")]
        schedulers: Vec<String>,

        /// Only show tasks due now
        #[arg(long)]
        due: bool,

        /// Only show tasks in this state
        #[arg(long, value_enum)]
        state: Option<TaskStateArg>,
    },

    /// List the recorded task failures
    #[command(alias = "scheduler:list-failed")]
    Failed {
        /// Limit the listing to these schedulers
        #[arg(value_name = "SCHEDULER")]
        schedulers: Vec<String>,
    },

    /// Export the tasks of a scheduler
    ///
    /// The cron format writes one crontab line per cron-shaped task; tasks
    /// using periodical expressions are skipped with a warning.
    #[command(alias = "scheduler:export")]
    Export {
        /// Name of the scheduler to export
        scheduler: String,

        /// Output format
        #[arg(long, value_enum, default_value_t = ExportFormat::Cron)]
        format: ExportFormat,

        /// Write to this file instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Write one crontab file per scheduler
    ///
    /// Each scheduler is written to DIR/<scheduler>.cron.
    #[command(alias = "scheduler:generate-cron")]
    Cron {
        /// Schedulers to generate; all when omitted
        #[arg(value_name = "SCHEDULER")]
        schedulers: Vec<String>,

        /// Directory receiving the generated files
        #[arg(short, long, value_name = "DIR")]
        directory: PathBuf,
    },

    /// Reboot a scheduler
    ///
    /// Clears tasks left running by an interrupted worker, then runs the
    /// tasks flagged with run_on_reboot.
    #[command(alias = "scheduler:reboot")]
    Reboot {
        /// Name of the scheduler to reboot
        scheduler: String,
    },

    /// Execute a single task now, whether it is due or not
    #[command(alias = "scheduler:execute")]
    Execute {
        /// Name of the scheduler owning the task
        scheduler: String,

        /// Name of the task to execute
        task: String,
    },
}

/// Environment options
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    #[value(name = "development", alias = "dev")]
    Development,
    #[value(name = "test")]
    Test,
    #[value(name = "staging", alias = "stage")]
    Staging,
    #[value(name = "production", alias = "prod")]
    Production,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    Cron,
    Json,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskStateArg {
    Scheduled,
    Paused,
    Running,
    Failed,
}

impl Cli {
    /// Level forced by `--verbose` or `--quiet`, if any
    pub fn log_level_override(&self) -> Option<&'static str> {
        if self.verbose {
            Some("debug")
        } else if self.quiet {
            Some("error")
        } else {
            None
        }
    }
}

impl From<Environment> for crate::config::Environment {
    fn from(env: Environment) -> Self {
        match env {
            Environment::Development => crate::config::Environment::Development,
            Environment::Test => crate::config::Environment::Test,
            Environment::Staging => crate::config::Environment::Staging,
            Environment::Production => crate::config::Environment::Production,
        }
    }
}

impl From<TaskStateArg> for crate::jobs::TaskState {
    fn from(state: TaskStateArg) -> Self {
        match state {
            TaskStateArg::Scheduled => crate::jobs::TaskState::Scheduled,
            TaskStateArg::Paused => crate::jobs::TaskState::Paused,
            TaskStateArg::Running => crate::jobs::TaskState::Running,
            TaskStateArg::Failed => crate::jobs::TaskState::Failed,
        }
    }
}

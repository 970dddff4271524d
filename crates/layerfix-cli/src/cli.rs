//! CLI argument definitions for layerfix.

use std::path::PathBuf;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand, ValueEnum};
use layerfix_config::{ConfigOverrides, LogFormat};

/// Output format for command reports.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    /// Line-oriented text for terminals.
    #[default]
    Human,
    /// One pretty-printed JSON document.
    Json,
}

/// Layered, fail-safe fixes for JavaScript and TypeScript sources.
#[derive(Parser, Debug)]
#[command(name = "layerfix", version, disable_help_subcommand = true)]
pub(crate) struct Cli {
    /// Configuration file to load instead of the discovered default.
    #[arg(long, global = true, value_name = "PATH")]
    pub(crate) config_path: Option<Utf8PathBuf>,
    /// Directory holding backups, the journal, rules, and rollback plans.
    #[arg(long, global = true, value_name = "DIR")]
    pub(crate) state_dir: Option<Utf8PathBuf>,
    /// Log filter expression, for example `layerfix=debug`.
    #[arg(long, global = true, value_name = "FILTER")]
    pub(crate) log_filter: Option<String>,
    /// Log output format.
    #[arg(long, global = true, value_name = "FORMAT")]
    pub(crate) log_format: Option<LogFormat>,
    /// The command to run.
    #[command(subcommand)]
    pub(crate) command: Command,
}

impl Cli {
    /// Configuration overrides taken from the global flags.
    pub(crate) fn overrides(&self) -> ConfigOverrides {
        let concurrency = match &self.command {
            Command::Analyze(run) => run.concurrency,
            Command::Fix(fix) => fix.run.concurrency,
            Command::Restore(_) | Command::Backups { .. } => None,
        };
        ConfigOverrides {
            config_path: self.config_path.clone(),
            state_dir: self.state_dir.clone(),
            log_filter: self.log_filter.clone(),
            log_format: self.log_format,
            concurrency,
        }
    }
}

/// Top-level commands.
#[derive(Subcommand, Debug, Clone)]
pub(crate) enum Command {
    /// Reports what the layers would change without writing anything.
    Analyze(RunArgs),
    /// Rewrites files in place.
    Fix(FixArgs),
    /// Restores the files listed in a rollback plan.
    Restore(RestoreArgs),
    /// Inspects or prunes stored snapshots.
    Backups {
        /// The backups action.
        #[command(subcommand)]
        action: BackupsAction,
    },
}

/// Arguments shared by `analyze` and `fix`.
#[derive(Args, Debug, Clone)]
pub(crate) struct RunArgs {
    /// Files or directories to process.
    #[arg(value_name = "PATH", required = true)]
    pub(crate) paths: Vec<PathBuf>,
    /// Comma-separated layer numbers. Defaults to every layer.
    #[arg(long, value_name = "N", value_delimiter = ',')]
    pub(crate) layers: Vec<i64>,
    /// Runs only the requested layers, without their prerequisites.
    #[arg(long)]
    pub(crate) no_deps: bool,
    /// Report format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Human)]
    pub(crate) output: OutputFormat,
    /// Worker threads for the batch.
    #[arg(long, value_name = "N")]
    pub(crate) concurrency: Option<usize>,
}

/// Arguments for `fix`.
#[derive(Args, Debug, Clone)]
pub(crate) struct FixArgs {
    #[command(flatten)]
    pub(crate) run: RunArgs,
    /// Runs every layer but writes nothing and takes no snapshots.
    #[arg(long)]
    pub(crate) dry_run: bool,
    /// Skips the per-layer snapshots.
    #[arg(long)]
    pub(crate) no_backup: bool,
    /// Logs every committed change.
    #[arg(long)]
    pub(crate) verbose: bool,
    /// Enables a named feature flag. Repeatable.
    #[arg(long = "flag", value_name = "NAME")]
    pub(crate) flags: Vec<String>,
}

/// Arguments for `restore`.
#[derive(Args, Debug, Clone)]
pub(crate) struct RestoreArgs {
    /// Rollback plan written by a previous `fix` run.
    #[arg(long, value_name = "FILE")]
    pub(crate) plan: PathBuf,
    /// Confirms the restore. Without it the plan is only listed.
    #[arg(long)]
    pub(crate) yes: bool,
}

/// Snapshot maintenance actions.
#[derive(Subcommand, Debug, Clone)]
pub(crate) enum BackupsAction {
    /// Lists snapshots, newest first.
    List {
        /// Only snapshots of this file.
        #[arg(long, value_name = "PATH")]
        file: Option<PathBuf>,
        /// Report format.
        #[arg(long, value_enum, default_value_t = OutputFormat::Human)]
        output: OutputFormat,
    },
    /// Removes snapshots outside the retention policy.
    Prune {
        /// Snapshots kept per file. Defaults to the configured retention.
        #[arg(long, value_name = "N")]
        keep: Option<usize>,
        /// Removes snapshots older than this many days. Zero disables the
        /// age check.
        #[arg(long, value_name = "DAYS")]
        older_than_days: Option<u64>,
    },
}

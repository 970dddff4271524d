//! Command-line runtime for layerfix.
//!
//! The module owns argument parsing, configuration bootstrapping, logging
//! setup, and the four commands. It is exercised both from the binary and
//! from tests, where the output streams are substituted.

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use clap::error::ErrorKind;
use layerfix_config::{Config, StatePaths};
use layerfix_pipeline::{
    BackupFilter, BackupStore, Confirmation, ExecutionMode, ExecutionOptions, FileStatus,
    RetentionPolicy, RollbackError, RollbackPlan, Session, resolve, telemetry,
};

mod cli;
mod discover;
mod errors;
mod output;

use cli::{BackupsAction, Cli, Command, FixArgs, RestoreArgs, RunArgs};
pub use cli::OutputFormat;
use errors::AppError;

/// Runs the CLI using the provided arguments and output streams.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) if matches!(error.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            return match write!(stdout, "{error}") {
                Ok(()) => ExitCode::SUCCESS,
                Err(_) => ExitCode::FAILURE,
            };
        }
        Err(error) => return report_error(stderr, &AppError::CliUsage(error)),
    };

    match execute(cli, stdout, stderr) {
        Ok(code) => code,
        Err(error) => report_error(stderr, &error),
    }
}

fn report_error<E: Write>(stderr: &mut E, error: &AppError) -> ExitCode {
    match error {
        // clap renders its own trailing newline and usage hint.
        AppError::CliUsage(usage) => write!(stderr, "{usage}").ok(),
        other => writeln!(stderr, "layerfix: {other}").ok(),
    };
    ExitCode::from(error.exit_status())
}

fn execute<W: Write, E: Write>(cli: Cli, stdout: &mut W, stderr: &mut E) -> Result<ExitCode, AppError> {
    let config = Config::load(&cli.overrides())?;
    telemetry::initialise(&config)?;

    match cli.command {
        Command::Analyze(run) => run_files(&config, &run, ExecutionOptions::new(ExecutionMode::Analyze), stdout, stderr),
        Command::Fix(fix) => {
            let (config, options) = fix_options(config, &fix);
            run_files(&config, &fix.run, options, stdout, stderr)
        }
        Command::Restore(restore) => restore_plan(&config, &restore, stdout),
        Command::Backups { action } => backups(&config, action, stdout),
    }
}

fn fix_options(mut config: Config, fix: &FixArgs) -> (Config, ExecutionOptions) {
    if fix.no_backup {
        config.backups_enabled = false;
    }
    let mut options = ExecutionOptions::new(ExecutionMode::Fix);
    options.dry_run = fix.dry_run;
    options.verbose = fix.verbose;
    options.feature_flags = fix.flags.iter().map(String::as_str).collect();
    (config, options)
}

fn run_files<W: Write, E: Write>(
    config: &Config,
    run: &RunArgs,
    mut options: ExecutionOptions,
    stdout: &mut W,
    stderr: &mut E,
) -> Result<ExitCode, AppError> {
    let resolution = resolve(&run.layers, run.no_deps);
    for number in &resolution.rejected {
        writeln!(stderr, "layerfix: ignoring unknown layer {number}; expected 1 through 7")?;
    }
    options.layers = resolution.order;

    let files = discover::discover(&run.paths);
    if files.is_empty() {
        return Err(AppError::NoFiles(run.paths.clone()));
    }

    let mode = options.mode;
    let session = Session::from_config(config, options)?;
    let report = session.run(&files);

    match run.output {
        cli::OutputFormat::Human => output::render_session(stdout, mode, &report)?,
        cli::OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *stdout, &report)?;
            writeln!(stdout)?;
        }
    }
    stdout.flush()?;

    if report.batch.all_fatal() {
        return Err(AppError::AllFatal(report.batch.count(FileStatus::Fatal)));
    }
    Ok(ExitCode::SUCCESS)
}

/// Confirms a plan only when `--yes` was given.
struct FlagConfirmation(bool);

impl Confirmation for FlagConfirmation {
    fn confirm(&self, _plan: &RollbackPlan) -> bool {
        self.0
    }
}

fn restore_plan<W: Write>(config: &Config, restore: &RestoreArgs, stdout: &mut W) -> Result<ExitCode, AppError> {
    let plan = RollbackPlan::load(&restore.plan)?;
    let paths = StatePaths::from_config(config)?;
    let store = BackupStore::new(paths.backups_dir());

    if !restore.yes {
        output::render_plan(stdout, &plan)?;
    }
    let report = match plan.apply(&store, &FlagConfirmation(restore.yes)) {
        Ok(report) => report,
        Err(RollbackError::NotConfirmed) => {
            return Err(AppError::RestoreNotConfirmed(plan.entries.len()));
        }
        Err(error) => return Err(error.into()),
    };

    for path in &report.restored {
        writeln!(stdout, "restored {}", path.display())?;
    }
    for (path, error) in &report.failed {
        writeln!(stdout, "not restored {}: {error}", path.display())?;
    }
    if report.failed.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        Err(AppError::RestoreIncomplete(report.failed.len()))
    }
}

fn backups<W: Write>(config: &Config, action: BackupsAction, stdout: &mut W) -> Result<ExitCode, AppError> {
    let paths = StatePaths::from_config(config)?;
    let store = BackupStore::new(paths.backups_dir());
    match action {
        BackupsAction::List { file, output } => {
            let filter = file.map(BackupFilter::for_file).unwrap_or_default();
            let records = store.list_backups(&filter)?;
            match output {
                cli::OutputFormat::Human => output::render_backups(stdout, &records)?,
                cli::OutputFormat::Json => {
                    serde_json::to_writer_pretty(&mut *stdout, &records)?;
                    writeln!(stdout)?;
                }
            }
        }
        BackupsAction::Prune { keep, older_than_days } => {
            let mut retention = config.retention.clone();
            if let Some(keep) = keep {
                retention.keep_latest = keep;
            }
            if let Some(days) = older_than_days {
                retention.max_age_days = days;
            }
            let report = store.prune(&RetentionPolicy::from_settings(&retention))?;
            output::render_prune(stdout, &report)?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_capture(args: &[&str]) -> (ExitCode, String, String) {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let args = std::iter::once("layerfix")
            .chain(args.iter().copied())
            .map(OsString::from);
        let code = run(args, &mut stdout, &mut stderr);
        (
            code,
            String::from_utf8(stdout).expect("utf-8 stdout"),
            String::from_utf8(stderr).expect("utf-8 stderr"),
        )
    }

    #[test]
    fn help_goes_to_stdout_and_succeeds() {
        let (code, stdout, stderr) = run_capture(&["--help"]);
        assert_eq!(code, ExitCode::SUCCESS);
        assert!(stdout.contains("analyze"));
        assert!(stderr.is_empty());
    }

    #[test]
    fn usage_errors_exit_with_two() {
        let (code, _, stderr) = run_capture(&["frobnicate"]);
        assert_eq!(code, ExitCode::from(2));
        assert!(stderr.contains("frobnicate"));
    }

    #[test]
    fn fix_flags_shape_the_options() {
        let cli = Cli::try_parse_from([
            "layerfix", "fix", "src", "--no-backup", "--verbose", "--flag", "no-use-client",
        ])
        .expect("parse");
        let Command::Fix(fix) = cli.command else {
            panic!("expected fix");
        };
        let (config, options) = fix_options(Config::default(), &fix);
        assert!(!config.backups_enabled);
        assert!(options.verbose);
        assert!(!options.dry_run);
        assert!(options.feature_flags.is_enabled("no-use-client"));
    }
}

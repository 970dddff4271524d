//! Error types for the CLI runtime.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use layerfix_config::{ConfigError, StatePathsError};
use layerfix_pipeline::{BackupError, RollbackError, SessionError, TelemetryError};

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("{0}")]
    CliUsage(clap::Error),
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(#[from] ConfigError),
    #[error("failed to initialise logging: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("failed to prepare the run: {0}")]
    Session(#[from] SessionError),
    #[error("failed to prepare the state directory: {0}")]
    State(#[from] StatePathsError),
    #[error(transparent)]
    Backup(#[from] BackupError),
    #[error(transparent)]
    Rollback(#[from] RollbackError),
    #[error("no JavaScript or TypeScript sources found under {}", display_paths(.0))]
    NoFiles(Vec<PathBuf>),
    #[error("every file failed: {0} fatal error(s)")]
    AllFatal(usize),
    #[error("{0} file(s) could not be restored")]
    RestoreIncomplete(usize),
    #[error("restore was not confirmed; rerun with --yes to restore {0} file(s)")]
    RestoreNotConfirmed(usize),
    #[error("failed to serialise the report: {0}")]
    Serialise(#[from] serde_json::Error),
    #[error("failed to write output: {0}")]
    Write(#[from] io::Error),
}

impl AppError {
    /// Usage problems exit with 2, everything else with 1.
    pub(crate) const fn exit_status(&self) -> u8 {
        match self {
            Self::CliUsage(_) => 2,
            _ => 1,
        }
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

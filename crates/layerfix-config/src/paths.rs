//! Derives the state directory layout shared by the pipeline and the CLI.
//!
//! Backups, journal entries, learned rules, and rollback plans all live under
//! the configured state directory so restore commands can find what a fix
//! run wrote.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::Config;

/// Canonical paths for persisted pipeline state.
#[derive(Debug, Clone)]
pub struct StatePaths {
    state_dir: PathBuf,
    backups_dir: PathBuf,
    journal_dir: PathBuf,
    rules_path: PathBuf,
}

impl StatePaths {
    /// Derives state paths from the configuration and creates the
    /// directories.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory cannot be created.
    pub fn from_config(config: &Config) -> Result<Self, StatePathsError> {
        Self::under(config.state_dir.as_std_path())
    }

    /// Derives state paths rooted at `state_dir` and creates the
    /// directories.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory cannot be created.
    pub fn under(state_dir: &Path) -> Result<Self, StatePathsError> {
        let paths = Self {
            backups_dir: state_dir.join("backups"),
            journal_dir: state_dir.join("journal"),
            rules_path: state_dir.join("rules.json"),
            state_dir: state_dir.to_path_buf(),
        };
        for dir in [&paths.state_dir, &paths.backups_dir, &paths.journal_dir] {
            fs::create_dir_all(dir).map_err(|source| StatePathsError::Directory {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(paths)
    }

    /// Root of the persisted state.
    #[must_use]
    pub fn state_dir(&self) -> &Path {
        self.state_dir.as_path()
    }

    /// Directory holding snapshots and their sidecars.
    #[must_use]
    pub fn backups_dir(&self) -> &Path {
        self.backups_dir.as_path()
    }

    /// Directory holding execution state records.
    #[must_use]
    pub fn journal_dir(&self) -> &Path {
        self.journal_dir.as_path()
    }

    /// File holding learned adaptive rules.
    #[must_use]
    pub fn rules_path(&self) -> &Path {
        self.rules_path.as_path()
    }
}

/// Errors raised while preparing the state directory.
#[derive(Debug, Error)]
pub enum StatePathsError {
    /// Creating a state directory failed.
    #[error("failed to prepare state directory '{path}': {source}")]
    Directory {
        /// The directory that could not be created.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

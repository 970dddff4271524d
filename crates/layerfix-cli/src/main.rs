//! CLI entrypoint for layerfix.
//!
//! The binary delegates to [`layerfix_cli::run`], which parses arguments,
//! loads configuration, and dispatches to the analyze, fix, restore, and
//! backups commands.

use std::io::{self, StderrLock, StdoutLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout: StdoutLock<'_> = io::stdout().lock();
    let mut stderr: StderrLock<'_> = io::stderr().lock();
    layerfix_cli::run(std::env::args_os(), &mut stdout, &mut stderr)
}

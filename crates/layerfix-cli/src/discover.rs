//! Expands command-line paths into the files a run should process.

use std::path::{Path, PathBuf};

use walkdir::{DirEntry, WalkDir};

const SCRIPT_EXTENSIONS: &[&str] = &["js", "jsx", "mjs", "cjs", "ts", "tsx", "mts", "cts"];
const SKIPPED_DIRECTORIES: &[&str] = &["node_modules", "dist", "build", "coverage", "out"];

/// Returns every candidate file under `roots`, in walk order.
///
/// Files named directly are kept whatever their extension, and paths that
/// do not exist are passed through so the run reports them as fatal.
/// Directories are walked without following links, skipping hidden and
/// build output directories.
pub(crate) fn discover(roots: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for root in roots {
        if !root.is_dir() {
            files.push(root.clone());
            continue;
        }
        let walk = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_skipped(entry));
        for entry in walk {
            match entry {
                Ok(entry) if entry.file_type().is_file() && is_candidate(entry.path()) => {
                    files.push(entry.into_path());
                }
                Ok(_) => {}
                Err(error) => tracing::warn!(
                    target: "layerfix::cli",
                    event = "walk_error",
                    root = %root.display(),
                    %error,
                    "skipping unreadable entry"
                ),
            }
        }
    }
    files
}

fn is_skipped(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    entry.file_type().is_dir()
        && (name.starts_with('.') || SKIPPED_DIRECTORIES.contains(&name.as_ref()))
}

/// Scripts plus the configuration files the first layer rewrites.
fn is_candidate(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
        return false;
    };
    if name.ends_with(".d.ts") {
        return false;
    }
    if name == "tsconfig.json" || name.starts_with("next.config.") {
        return true;
    }
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SCRIPT_EXTENSIONS.contains(&ext))
}

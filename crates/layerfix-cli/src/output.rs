//! Human-readable rendering of command reports.

use std::io::{self, Write};

use layerfix_pipeline::{
    BackupRecord, ExecutionMode, FileReport, FileStatus, LayerStatus, PruneReport, RollbackPlan,
    SessionReport,
};

fn status_label(mode: ExecutionMode, status: FileStatus) -> &'static str {
    match (mode, status) {
        (ExecutionMode::Analyze, FileStatus::Fixed) => "fixable",
        (_, status) => status.label(),
    }
}

/// Writes one line per file, followed by its reverted and failed layers.
pub(crate) fn render_file<W: Write>(out: &mut W, mode: ExecutionMode, file: &FileReport) -> io::Result<()> {
    writeln!(
        out,
        "{}: {} ({} change(s))",
        file.path.display(),
        status_label(mode, file.status),
        file.total_changes
    )?;
    if let Some(error) = &file.error {
        writeln!(out, "  error: {error}")?;
    }
    for outcome in &file.outcomes {
        match &outcome.status {
            LayerStatus::Reverted { reason } => {
                writeln!(out, "  layer {} reverted: {reason}", outcome.id)?;
            }
            LayerStatus::Failed { error } => {
                writeln!(
                    out,
                    "  layer {} failed after {} attempt(s): {error}",
                    outcome.id, outcome.attempts
                )?;
            }
            LayerStatus::Applied | LayerStatus::Unchanged => {}
        }
    }
    Ok(())
}

/// Writes every file followed by the run summary.
pub(crate) fn render_session<W: Write>(out: &mut W, mode: ExecutionMode, report: &SessionReport) -> io::Result<()> {
    for file in &report.batch.files {
        render_file(out, mode, file)?;
    }
    let batch = &report.batch;
    write!(
        out,
        "{} file(s): {} {}, {} rolled back, {} failed, {} nothing to fix, {} fatal",
        batch.files.len(),
        batch.count(FileStatus::Fixed),
        status_label(mode, FileStatus::Fixed),
        batch.count(FileStatus::RolledBack),
        batch.count(FileStatus::Failed),
        batch.count(FileStatus::NothingToFix),
        batch.count(FileStatus::Fatal),
    )?;
    if !batch.skipped.is_empty() {
        write!(out, ", {} skipped", batch.skipped.len())?;
    }
    writeln!(out, "; {} change(s)", batch.total_changes())?;
    if let Some(plan) = &report.rollback_plan {
        writeln!(out, "rollback plan: {}", plan.display())?;
    }
    if report.rules_learned > 0 {
        writeln!(out, "learned {} rule(s)", report.rules_learned)?;
    }
    Ok(())
}

/// Writes one line per snapshot.
pub(crate) fn render_backups<W: Write>(out: &mut W, records: &[BackupRecord]) -> io::Result<()> {
    if records.is_empty() {
        return writeln!(out, "no backups");
    }
    for record in records {
        writeln!(
            out,
            "{}  {}  {}  {}",
            record.created_at,
            record.operation_tag,
            record.original_path.display(),
            record.backup_path.display()
        )?;
    }
    Ok(())
}

/// Summarises a prune.
pub(crate) fn render_prune<W: Write>(out: &mut W, report: &PruneReport) -> io::Result<()> {
    writeln!(
        out,
        "removed {} snapshot(s), kept {}",
        report.removed.len(),
        report.kept
    )?;
    for (path, error) in &report.failed {
        writeln!(out, "  could not remove {}: {error}", path.display())?;
    }
    Ok(())
}

/// Lists what a plan would restore.
pub(crate) fn render_plan<W: Write>(out: &mut W, plan: &RollbackPlan) -> io::Result<()> {
    writeln!(
        out,
        "rollback plan from {} restores {} file(s):",
        plan.created_at,
        plan.entries.len()
    )?;
    for entry in &plan.entries {
        writeln!(
            out,
            "  {} <- {}",
            entry.original_path.display(),
            entry.backup_path.display()
        )?;
    }
    for path in &plan.unrestorable {
        writeln!(out, "  {} has no pre-run snapshot", path.display())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use layerfix_pipeline::{BatchReport, LayerId, LayerOutcome};
    use std::path::PathBuf;

    fn file(path: &str, status: FileStatus, outcomes: Vec<LayerOutcome>, changes: usize) -> FileReport {
        FileReport {
            path: PathBuf::from(path),
            status,
            applied: 0,
            reverted: 0,
            failed: 0,
            unchanged: 0,
            total_changes: changes,
            first_backup: None,
            written: false,
            outcomes,
            error: None,
        }
    }

    fn render(mode: ExecutionMode, report: &SessionReport) -> String {
        let mut out = Vec::new();
        render_session(&mut out, mode, report).expect("render");
        String::from_utf8(out).expect("utf-8")
    }

    fn report() -> SessionReport {
        let reverted = LayerOutcome {
            id: LayerId::Components,
            status: LayerStatus::Reverted {
                reason: "unbalanced braces".to_owned(),
            },
            changes: Vec::new(),
            warnings: Vec::new(),
            attempts: 1,
            backup: None,
        };
        SessionReport {
            batch: BatchReport {
                files: vec![
                    file("app/page.tsx", FileStatus::Fixed, Vec::new(), 2),
                    file("lib/a.ts", FileStatus::RolledBack, vec![reverted], 0),
                ],
                ..BatchReport::default()
            },
            rollback_plan: None,
            rules_learned: 0,
        }
    }

    #[test]
    fn analyze_summaries_say_fixable() {
        insta::assert_snapshot!(render(ExecutionMode::Analyze, &report()), @r"
        app/page.tsx: fixable (2 change(s))
        lib/a.ts: rolled back (0 change(s))
          layer 3 (components) reverted: unbalanced braces
        2 file(s): 1 fixable, 1 rolled back, 0 failed, 0 nothing to fix, 0 fatal; 2 change(s)
        ");
    }

    #[test]
    fn fix_summaries_name_the_rollback_plan() {
        let mut report = report();
        report.rollback_plan = Some(PathBuf::from("state/rollback-1-0.json"));
        let text = render(ExecutionMode::Fix, &report);
        assert!(text.contains("1 fixed"));
        assert!(text.ends_with("rollback plan: state/rollback-1-0.json\n"));
    }
}

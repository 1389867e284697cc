use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::runner::task::{RunReport, RunStatus, TaskStatus};

/// Renders the run report as textfile-collector gauge/counter lines.
/// One scrape artifact per run; the scraper only ever sees whole files
/// because `write_textfile` replaces the target via rename.
pub fn render(report: &RunReport) -> String {
    let mut out = String::new();

    let success = if report.status == RunStatus::Success { 1 } else { 0 };
    out.push_str(&format!("upkeep_run_success {}\n", success));
    out.push_str(&format!(
        "upkeep_run_duration_seconds {:.3}\n",
        report.duration().as_secs_f64()
    ));
    out.push_str(&format!(
        "upkeep_run_timestamp_seconds {}\n",
        report.finished_at.timestamp()
    ));

    for status in [
        TaskStatus::Success,
        TaskStatus::Failure,
        TaskStatus::Skipped,
        TaskStatus::Cancelled,
    ] {
        out.push_str(&format!(
            "upkeep_tasks_total{{status=\"{}\"}} {}\n",
            status.as_str(),
            report.count(status)
        ));
    }

    for result in &report.results {
        out.push_str(&format!(
            "upkeep_task_result{{task=\"{}\",status=\"{}\"}} 1\n",
            result.id,
            result.status.as_str()
        ));
        if result.status == TaskStatus::Success || result.status == TaskStatus::Failure {
            out.push_str(&format!(
                "upkeep_task_duration_seconds{{task=\"{}\"}} {:.3}\n",
                result.id,
                result.duration().as_secs_f64()
            ));
        }
    }

    out
}

/// Writes next to the target and renames into place, so a concurrent
/// scrape never reads a torn file.
pub fn write_textfile(report: &RunReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).context("Failed to create metrics directory")?;
        }
    }
    let tmp = path.with_extension("prom.tmp");
    fs::write(&tmp, render(report)).context("Failed to write metrics tempfile")?;
    fs::rename(&tmp, path).context("Failed to publish metrics file")?;
    Ok(())
}

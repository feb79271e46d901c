//! CLI output formatting

use crate::{
    core::state::{AuditEntry, PipelineRun, RunStatus, StageResult, StageStatus},
    persistence::{RunStatistics, RunSummary},
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");

/// Create a progress bar over the run's stages
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    if let Ok(bar_style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        progress.set_style(bar_style.progress_chars("#>-"));
    }
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format a stage status for display
pub fn format_stage_status(status: StageStatus) -> String {
    match status {
        StageStatus::Pending => style("PENDING").dim().to_string(),
        StageStatus::Running => style("RUNNING").yellow().to_string(),
        StageStatus::Retried => style("RETRYING").yellow().to_string(),
        StageStatus::Succeeded => style("SUCCEEDED").green().to_string(),
        StageStatus::Failed => style("FAILED").red().to_string(),
        StageStatus::Skipped => style("SKIPPED").dim().to_string(),
        StageStatus::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

/// Format a run status for display
pub fn format_status(status: RunStatus) -> String {
    match status {
        RunStatus::Pending => style("PENDING").dim().to_string(),
        RunStatus::Running => style("RUNNING").yellow().to_string(),
        RunStatus::Succeeded => style("SUCCEEDED").green().to_string(),
        RunStatus::Failed => style("FAILED").red().to_string(),
        RunStatus::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

fn stage_icon(status: StageStatus) -> Emoji<'static, 'static> {
    match status {
        StageStatus::Succeeded => CHECK,
        StageStatus::Failed => CROSS,
        StageStatus::Skipped => SKIP,
        StageStatus::Cancelled => WARN,
        _ => SPINNER,
    }
}

/// One line per finished stage, printed as the audit trail grows
pub fn format_audit_entry(entry: &AuditEntry) -> String {
    let mut line = format!(
        "{} {} {}",
        stage_icon(entry.status),
        style(&entry.stage).cyan(),
        format_stage_status(entry.status)
    );
    if entry.attempts > 1 {
        line.push_str(&style(format!(" ({} attempts)", entry.attempts)).dim().to_string());
    }
    if let Some(message) = &entry.message {
        line.push_str(&format!(": {}", style(message).dim()));
    }
    fit_to_terminal(&line)
}

/// Format run summary for display
pub fn format_run_summary(summary: &RunSummary) -> String {
    let status_icon = match summary.status {
        RunStatus::Succeeded => CHECK,
        RunStatus::Failed => CROSS,
        RunStatus::Running | RunStatus::Pending => SPINNER,
        RunStatus::Cancelled => WARN,
    };

    format!(
        "{} {} - {} - {} ({}/{}) - {}",
        status_icon,
        style(short_id(&summary.run_id.to_string())).dim(),
        style(&summary.pipeline_name).bold(),
        format_status(summary.status),
        summary.succeeded_stages,
        summary.total_stages,
        style(summary.created_at.format("%Y-%m-%d %H:%M:%S")).dim()
    )
}

fn format_stage_row(result: &StageResult) -> String {
    let duration = result
        .duration_ms
        .map(|ms| format_duration(Duration::from_millis(ms)))
        .unwrap_or_else(|| "-".to_string());

    let mut row = format!(
        "  {:<16} {:<20} {:<10} attempts {}",
        result.stage,
        format_stage_status(result.status),
        duration,
        result.attempts
    );
    if let Some(error) = &result.error {
        row.push_str(&format!("  {}", style(error).red()));
    }
    fit_to_terminal(&row)
}

/// Full description of a run, used by `run` and `show`
pub fn format_run_details(run: &PipelineRun) -> String {
    let mut lines = vec![
        format!("{} Run {}", INFO, style(run.id).cyan()),
        format!("  Pipeline: {}", style(&run.pipeline_name).bold()),
        format!("  Status: {}", format_status(run.status)),
        format!("  Created: {}", style(run.created_at.to_rfc3339()).dim()),
    ];

    if let (Some(started), Some(finished)) = (run.started_at, run.finished_at) {
        if let Ok(duration) = finished.signed_duration_since(started).to_std() {
            lines.push(format!("  Duration: {}", style(format_duration(duration)).dim()));
        }
    }
    lines.push(format!(
        "  Progress: {} ({}/{} succeeded)",
        style(format!("{:.0}%", run.progress() * 100.0)).cyan(),
        run.count(StageStatus::Succeeded),
        run.stages.len()
    ));
    if let Some(error) = &run.error {
        lines.push(format!("  Error: {}", style(error).red()));
    }

    lines.push(String::new());
    lines.extend(run.stages.iter().map(format_stage_row));
    lines.join("\n")
}

/// Multi-line statistics block
pub fn format_statistics(stats: &RunStatistics) -> String {
    let millis = |ms: Option<u64>| {
        ms.map(|ms| format_duration(Duration::from_millis(ms)))
            .unwrap_or_else(|| "-".to_string())
    };

    [
        format!("Total runs:    {}", stats.total_runs),
        format!(
            "Succeeded:     {} ({:.1}%)",
            style(stats.succeeded_runs).green(),
            stats.success_rate() * 100.0
        ),
        format!("Failed:        {}", style(stats.failed_runs).red()),
        format!("Cancelled:     {}", style(stats.cancelled_runs).yellow()),
        format!("Avg duration:  {}", millis(stats.avg_duration_ms.map(|ms| ms.round() as u64))),
        format!("Min duration:  {}", millis(stats.min_duration_ms)),
        format!("Max duration:  {}", millis(stats.max_duration_ms)),
    ]
    .join("\n")
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs == 0 {
        format!("{}ms", duration.as_millis())
    } else if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

/// Truncate a line to the terminal width (80 when unknown)
pub fn fit_to_terminal(line: &str) -> String {
    let width = term_size::dimensions_stdout().map(|(w, _)| w).unwrap_or(80);
    truncate_visible(line, width)
}

fn truncate_visible(line: &str, width: usize) -> String {
    if console::measure_text_width(line) <= width {
        return line.to_string();
    }
    console::truncate_str(line, width, "…").into_owned()
}

/// Format agent output with truncation
pub fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        output.to_string()
    } else {
        let truncated = lines[..max_lines].join("\n");
        format!(
            "{}\n{}... ({} more lines)",
            truncated,
            style("[truncated]").dim(),
            lines.len() - max_lines
        )
    }
}

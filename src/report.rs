// Analysis report rendering.
// One renderer per output format: aligned console text, JSON, and Markdown tables.

use std::fmt::{self, Write};

use crate::analyze::{AnalysisReport, DurationStats};
use crate::config::OutputFormat;
use crate::error::{PipekitError, Result};

/// Render `report` in the requested format.
pub fn render(format: OutputFormat, report: &AnalysisReport) -> Result<String> {
    match format {
        OutputFormat::Console => console(report).map_err(render_error),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(report)?),
        OutputFormat::Markdown => markdown(report).map_err(render_error),
    }
}

fn render_error(error: fmt::Error) -> PipekitError {
    PipekitError::Other(format!("failed to render report: {}", error))
}

/// Format seconds as `1h02m`, `3m05s`, or `42s`.
pub fn format_secs(secs: f64) -> String {
    let secs = secs.round() as i64;
    if secs >= 3600 {
        format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

fn format_rate(rate: Option<f64>) -> String {
    rate.map_or_else(|| "-".to_string(), |r| format!("{:.1}%", r * 100.0))
}

fn duration_columns(duration: Option<&DurationStats>) -> [String; 3] {
    match duration {
        Some(d) => [
            format_secs(d.mean_secs),
            format_secs(d.median_secs),
            format_secs(d.p95_secs as f64),
        ],
        None => ["-".into(), "-".into(), "-".into()],
    }
}

fn console(report: &AnalysisReport) -> std::result::Result<String, fmt::Error> {
    let mut out = String::new();
    writeln!(
        out,
        "Workflow analysis for {} ({})",
        report.repositories.join(", "),
        report.generated_at.format("%Y-%m-%d %H:%M UTC")
    )?;

    if report.workflows.is_empty() {
        writeln!(out, "\nNo workflow runs found.")?;
    } else {
        writeln!(
            out,
            "\n{:<28} {:<28} {:>5} {:>8} {:>8} {:>8} {:>8}",
            "REPOSITORY", "WORKFLOW", "RUNS", "SUCCESS", "MEAN", "MEDIAN", "P95"
        )?;
        for w in &report.workflows {
            let [mean, median, p95] = duration_columns(w.duration.as_ref());
            writeln!(
                out,
                "{:<28} {:<28} {:>5} {:>8} {:>8} {:>8} {:>8}",
                truncate(&w.repository, 28),
                truncate(&w.workflow, 28),
                w.total_runs,
                format_rate(w.success_rate),
                mean,
                median,
                p95
            )?;
        }
    }

    if !report.jobs.is_empty() {
        writeln!(
            out,
            "\n{:<28} {:<28} {:>5} {:>8} {:>8} {:>8} {:>8}",
            "REPOSITORY", "JOB", "RUNS", "FAILED", "MEAN", "MEDIAN", "P95"
        )?;
        for j in &report.jobs {
            let [mean, median, p95] = duration_columns(j.duration.as_ref());
            writeln!(
                out,
                "{:<28} {:<28} {:>5} {:>8} {:>8} {:>8} {:>8}",
                truncate(&j.repository, 28),
                truncate(&j.job, 28),
                j.runs,
                j.failures,
                mean,
                median,
                p95
            )?;
        }
    }

    if !report.findings.is_empty() {
        writeln!(out, "\nFindings:")?;
        for f in &report.findings {
            writeln!(
                out,
                "  [{}] {} / {}: {}",
                f.severity, f.repository, f.workflow, f.message
            )?;
        }
    }

    if !report.benchmarks.is_empty() {
        writeln!(out, "\nBenchmarks:")?;
        for b in &report.benchmarks {
            writeln!(
                out,
                "  {}: {} iterations, mean {:.1}ms, min {}ms, max {}ms, {} errors",
                b.repository, b.iterations, b.mean_ms, b.min_ms, b.max_ms, b.errors
            )?;
        }
    }

    if !report.failures.is_empty() {
        writeln!(out, "\nFailures:")?;
        for f in &report.failures {
            writeln!(out, "  {}: {}", f.repository, f.error)?;
        }
    }

    Ok(out)
}

fn markdown(report: &AnalysisReport) -> std::result::Result<String, fmt::Error> {
    let mut out = String::new();
    writeln!(out, "# Workflow analysis\n")?;
    writeln!(
        out,
        "Generated {} for {}.",
        report.generated_at.to_rfc3339(),
        report
            .repositories
            .iter()
            .map(|r| format!("`{}`", r))
            .collect::<Vec<_>>()
            .join(", ")
    )?;

    writeln!(out, "\n## Workflows\n")?;
    if report.workflows.is_empty() {
        writeln!(out, "_No workflow runs found._")?;
    } else {
        writeln!(
            out,
            "| Repository | Workflow | Runs | Success | Failed | Cancelled | Mean | Median | p95 |"
        )?;
        writeln!(out, "|---|---|---:|---:|---:|---:|---:|---:|---:|")?;
        for w in &report.workflows {
            let [mean, median, p95] = duration_columns(w.duration.as_ref());
            writeln!(
                out,
                "| {} | {} | {} | {} | {} | {} | {} | {} | {} |",
                escape_cell(&w.repository),
                escape_cell(&w.workflow),
                w.total_runs,
                format_rate(w.success_rate),
                w.failures,
                w.cancelled,
                mean,
                median,
                p95
            )?;
        }
    }

    if !report.jobs.is_empty() {
        writeln!(out, "\n## Jobs\n")?;
        writeln!(out, "| Repository | Job | Runs | Failed | Mean | Median | p95 |")?;
        writeln!(out, "|---|---|---:|---:|---:|---:|---:|")?;
        for j in &report.jobs {
            let [mean, median, p95] = duration_columns(j.duration.as_ref());
            writeln!(
                out,
                "| {} | {} | {} | {} | {} | {} | {} |",
                escape_cell(&j.repository),
                escape_cell(&j.job),
                j.runs,
                j.failures,
                mean,
                median,
                p95
            )?;
        }
    }

    if !report.findings.is_empty() {
        writeln!(out, "\n## Findings\n")?;
        for f in &report.findings {
            writeln!(
                out,
                "- **{}** `{}` {}: {}",
                f.severity, f.repository, f.workflow, f.message
            )?;
        }
    }

    if !report.benchmarks.is_empty() {
        writeln!(out, "\n## Benchmarks\n")?;
        writeln!(out, "| Repository | Iterations | Mean (ms) | Min (ms) | Max (ms) | Errors |")?;
        writeln!(out, "|---|---:|---:|---:|---:|---:|")?;
        for b in &report.benchmarks {
            writeln!(
                out,
                "| {} | {} | {:.1} | {} | {} | {} |",
                escape_cell(&b.repository),
                b.iterations,
                b.mean_ms,
                b.min_ms,
                b.max_ms,
                b.errors
            )?;
        }
    }

    if !report.failures.is_empty() {
        writeln!(out, "\n## Failures\n")?;
        for f in &report.failures {
            writeln!(out, "- `{}`: {}", f.repository, f.error)?;
        }
    }

    Ok(out)
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(width.saturating_sub(3)).collect();
    cut.push_str("...");
    cut
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::{Finding, RepoFailure, Severity, WorkflowStats};
    use chrono::{TimeZone, Utc};

    fn sample_report() -> AnalysisReport {
        AnalysisReport {
            generated_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            repositories: vec!["octo/app".into(), "octo/gone".into()],
            workflows: vec![WorkflowStats {
                repository: "octo/app".into(),
                workflow: "Build | Test".into(),
                total_runs: 10,
                completed: 8,
                successes: 6,
                failures: 2,
                cancelled: 0,
                success_rate: Some(0.75),
                duration: DurationStats::from_samples(vec![60, 120, 185, 3700]),
            }],
            jobs: Vec::new(),
            findings: vec![Finding {
                severity: Severity::Warning,
                repository: "octo/app".into(),
                workflow: "Build | Test".into(),
                message: "success rate 75% over 8 completed runs".into(),
            }],
            benchmarks: Vec::new(),
            failures: vec![RepoFailure {
                repository: "octo/gone".into(),
                error: "task failed: resource not found: /repos/octo/gone/actions/runs".into(),
                fatal: false,
            }],
        }
    }

    #[test]
    fn test_format_secs() {
        assert_eq!(format_secs(42.0), "42s");
        assert_eq!(format_secs(185.0), "3m05s");
        assert_eq!(format_secs(3720.0), "1h02m");
    }

    #[test]
    fn test_console_report() {
        let text = render(OutputFormat::Console, &sample_report()).unwrap();
        assert!(text.contains("octo/app, octo/gone"));
        assert!(text.contains("75.0%"));
        assert!(text.contains("[warning]"));
        assert!(text.contains("Failures:"));
        assert!(!text.contains("Benchmarks:"));
    }

    #[test]
    fn test_json_report_round_trips_as_value() {
        let text = render(OutputFormat::Json, &sample_report()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["workflows"][0]["successes"], 6);
        assert_eq!(value["findings"][0]["severity"], "warning");
        assert_eq!(value["failures"][0]["fatal"], false);
    }

    #[test]
    fn test_markdown_report_escapes_cells() {
        let text = render(OutputFormat::Markdown, &sample_report()).unwrap();
        assert!(text.starts_with("# Workflow analysis"));
        assert!(text.contains("| octo/app | Build \\| Test | 10 | 75.0% |"));
        assert!(text.contains("## Failures"));
        assert!(!text.contains("## Jobs"));
    }

    #[test]
    fn test_empty_report() {
        let mut report = sample_report();
        report.workflows.clear();
        report.findings.clear();
        report.failures.clear();
        assert!(
            render(OutputFormat::Console, &report)
                .unwrap()
                .contains("No workflow runs found.")
        );
        assert!(
            render(OutputFormat::Markdown, &report)
                .unwrap()
                .contains("_No workflow runs found._")
        );
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a-very-long-workflow-name", 10), "a-very-...");
    }
}

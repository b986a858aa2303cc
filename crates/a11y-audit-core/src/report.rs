use std::{fmt::Write, path::Path};

use colored::{ColoredString, Colorize};
use serde::Serialize;

use crate::scanner::{AbortReason, FileFailure, Finding, ScanOutcome, Severity, SeverityCounts};

/// Format styles supported in default reporter implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Json,
}

/// Produce a report string from a `ScanOutcome` using the desired format.
pub fn render_report(outcome: &ScanOutcome, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Human => render_human(outcome),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(&JsonReport::from(outcome))?),
    }
}

fn render_human(outcome: &ScanOutcome) -> anyhow::Result<String> {
    let mut out = String::new();
    let counts = outcome.severity_counts();
    writeln!(
        out,
        "Scanned {} file(s), {} failed • {} finding(s): {} critical, {} warning, {} info",
        outcome.scanned_files.len(),
        outcome.failed_files.len(),
        outcome.findings.len(),
        counts.critical,
        counts.warning,
        counts.info
    )?;

    if outcome.findings.is_empty() {
        writeln!(out, "\nNo findings detected.")?;
    }

    let mut current: Option<&Path> = None;
    for finding in &outcome.findings {
        if current != Some(finding.file_path.as_path()) {
            writeln!(out, "\n{}", finding.file_path.display().to_string().bold())?;
            current = Some(finding.file_path.as_path());
        }
        let line = if finding.line_number == 0 {
            "line ?".to_string()
        } else {
            format!("line {}", finding.line_number)
        };
        writeln!(
            out,
            "  {sev} {line:<9} {rule:<12} {desc}",
            sev = severity_label(finding.severity),
            line = line,
            rule = finding.rule_id,
            desc = sanitize(&finding.description),
        )?;
        if !finding.short_recommendation.is_empty() {
            writeln!(out, "      → {}", sanitize(&finding.short_recommendation))?;
        }
    }

    if !outcome.failed_files.is_empty() {
        writeln!(out, "\nFailed files:")?;
        for FileFailure { path, reason } in &outcome.failed_files {
            writeln!(out, "  - {}: {}", path.display(), reason)?;
        }
    }

    if let Some(reason) = &outcome.abort {
        let line = format!("Scan stopped early: {reason}");
        let line = match reason {
            AbortReason::Cancelled => line.yellow(),
            _ => line.red().bold(),
        };
        writeln!(out, "\n{line}")?;
    }

    Ok(out)
}

fn severity_label(severity: Severity) -> ColoredString {
    let label = format!("[{}]", severity.as_str());
    match severity {
        Severity::Critical => label.red().bold(),
        Severity::Warning => label.yellow(),
        Severity::Info => label.cyan(),
    }
}

fn sanitize(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            '\n' | '\r' => ' ',
            _ => c,
        })
        .collect()
}

#[derive(Debug, Serialize)]
struct JsonReport<'a> {
    complete: bool,
    counts: SeverityCounts,
    findings: &'a [Finding],
    scanned_files: &'a [std::path::PathBuf],
    failed_files: &'a [FileFailure],
    abort: Option<&'a AbortReason>,
}

impl<'a> From<&'a ScanOutcome> for JsonReport<'a> {
    fn from(outcome: &'a ScanOutcome) -> Self {
        Self {
            complete: outcome.is_complete(),
            counts: outcome.severity_counts(),
            findings: &outcome.findings,
            scanned_files: &outcome.scanned_files,
            failed_files: &outcome.failed_files,
            abort: outcome.abort.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_outcome() -> ScanOutcome {
        ScanOutcome {
            findings: vec![
                Finding {
                    file_path: "Assets/UI/Hud.prefab".into(),
                    line_number: 5,
                    severity: Severity::Critical,
                    description: "Low contrast\nbutton".into(),
                    short_recommendation: "Use darker text color".into(),
                    full_recommendation: "Use darker text color".into(),
                    rule_id: "WCAG 1.4.3".into(),
                },
                Finding {
                    file_path: "Assets/UI/Hud.prefab".into(),
                    line_number: 0,
                    severity: Severity::Info,
                    description: "Icon has no label".into(),
                    short_recommendation: String::new(),
                    full_recommendation: String::new(),
                    rule_id: "unspecified".into(),
                },
            ],
            scanned_files: vec!["Assets/UI/Hud.prefab".into()],
            failed_files: vec![FileFailure {
                path: "Assets/Scripts/Menu.cs".into(),
                reason: "gave up after 3 attempt(s): transient failure: HTTP 503".into(),
            }],
            abort: None,
        }
    }

    #[test]
    fn human_report_groups_findings_by_file() {
        colored::control::set_override(false);
        let output = render_report(&sample_outcome(), OutputFormat::Human).unwrap();
        assert!(output.starts_with(
            "Scanned 1 file(s), 1 failed • 2 finding(s): 1 critical, 0 warning, 1 info"
        ));
        assert_eq!(output.matches("Assets/UI/Hud.prefab").count(), 1);
        assert!(output.contains("[Critical] line 5"));
        assert!(output.contains("Low contrast button"));
        assert!(output.contains("line ?"));
        assert!(output.contains("→ Use darker text color"));
        assert!(output.contains("Assets/Scripts/Menu.cs: gave up after 3 attempt(s)"));
        assert!(!output.contains("stopped early"));
    }

    #[test]
    fn human_report_mentions_abort_reason() {
        colored::control::set_override(false);
        let outcome = ScanOutcome {
            abort: Some(AbortReason::AuthFailure {
                message: "Incorrect API key provided".into(),
            }),
            ..ScanOutcome::default()
        };
        let output = render_report(&outcome, OutputFormat::Human).unwrap();
        assert!(output.contains("No findings detected."));
        assert!(output
            .contains("Scan stopped early: authentication failed: Incorrect API key provided"));
    }

    #[test]
    fn json_report_serializes() {
        let output = render_report(&sample_outcome(), OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["complete"], serde_json::json!(true));
        assert_eq!(value["counts"]["critical"], serde_json::json!(1));
        assert_eq!(value["findings"][0]["severity"], "Critical");
        assert_eq!(value["findings"][0]["rule_id"], "WCAG 1.4.3");
        assert!(value["abort"].is_null());
        assert_eq!(value["failed_files"][0]["path"], "Assets/Scripts/Menu.cs");
    }
}

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod normalize;
pub mod scheduler;
mod source;

pub use source::{ContentLoader, FsContentLoader, InMemoryContentLoader, SourceFile};

/// Closed severity set for findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

impl Severity {
    /// Map a free-text severity label from the model. Unknown or missing labels become `Info`.
    pub fn from_label(label: Option<&str>) -> Self {
        let Some(label) = label else {
            return Self::Info;
        };
        match label.trim().to_ascii_lowercase().as_str() {
            "critical" | "error" | "high" => Self::Critical,
            "warning" | "medium" => Self::Warning,
            _ => Self::Info,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "Critical",
            Self::Warning => "Warning",
            Self::Info => "Info",
        }
    }
}

/// One accessibility defect decoded from the model's answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub file_path: PathBuf,
    /// 1-based line, or 0 when the model gave none.
    pub line_number: u32,
    pub severity: Severity,
    pub description: String,
    /// At most 15 words of the recommendation, with a trailing `…` when shortened.
    pub short_recommendation: String,
    pub full_recommendation: String,
    pub rule_id: String,
}

/// Unit of work handed to the per-file pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanTask {
    pub file_path: PathBuf,
    pub content: String,
    pub related_paths: Vec<PathBuf>,
}

impl ScanTask {
    pub fn new(
        file_path: impl Into<PathBuf>,
        content: impl Into<String>,
        related_paths: Vec<PathBuf>,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            content: content.into(),
            related_paths,
        }
    }

    pub fn file_name(&self) -> String {
        self.file_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.file_path.display().to_string())
    }
}

/// A file whose pipeline settled without contributing findings for a reason worth reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFailure {
    pub path: PathBuf,
    pub reason: String,
}

/// Why a run stopped before scheduling every batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbortReason {
    Cancelled,
    AuthFailure { message: String },
    Unexpected { message: String },
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cancelled => write!(f, "cancelled"),
            Self::AuthFailure { message } => write!(f, "authentication failed: {message}"),
            Self::Unexpected { message } => write!(f, "unexpected failure: {message}"),
        }
    }
}

/// Per-severity totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub critical: usize,
    pub warning: usize,
    pub info: usize,
}

/// Result of one scan run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanOutcome {
    /// Findings in (batch index, submission index) order.
    pub findings: Vec<Finding>,
    /// Files whose pipeline ran to completion, including those that yielded zero findings.
    pub scanned_files: Vec<PathBuf>,
    /// Files that could not be loaded or exhausted their retries.
    pub failed_files: Vec<FileFailure>,
    pub abort: Option<AbortReason>,
}

impl ScanOutcome {
    pub fn is_complete(&self) -> bool {
        self.abort.is_none()
    }

    pub fn severity_counts(&self) -> SeverityCounts {
        let mut counts = SeverityCounts::default();
        for finding in &self.findings {
            match finding.severity {
                Severity::Critical => counts.critical += 1,
                Severity::Warning => counts.warning += 1,
                Severity::Info => counts.info += 1,
            }
        }
        counts
    }
}

/// Errors that prevent a run from starting at all.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScanError {
    #[error("a scan is already running; wait for it to settle before starting another")]
    AlreadyRunning,
    #[error("invalid scan options: {0}")]
    InvalidOptions(String),
}

/// Progress hooks for presentation layers. All methods default to no-ops.
pub trait ScanObserver: Send + Sync {
    fn batch_started(&self, _batch_index: usize, _files: &[PathBuf]) {}

    fn file_finished(&self, _path: &std::path::Path, _findings: usize) {}

    fn batch_finished(&self, _batch_index: usize) {}

    fn run_finished(&self, _outcome: &ScanOutcome) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn severity_table_is_total() {
        let cases: &[(Option<&str>, Severity)] = &[
            (Some("critical"), Severity::Critical),
            (Some("error"), Severity::Critical),
            (Some("high"), Severity::Critical),
            (Some("warning"), Severity::Warning),
            (Some("medium"), Severity::Warning),
            (Some("low"), Severity::Info),
            (Some("info"), Severity::Info),
            (Some(""), Severity::Info),
            (None, Severity::Info),
            (Some("bogus"), Severity::Info),
            (Some("  CRITICAL "), Severity::Critical),
            (Some("Medium"), Severity::Warning),
        ];
        for (label, expected) in cases {
            assert_eq!(Severity::from_label(*label), *expected, "label {label:?}");
        }
    }

    proptest! {
        #[test]
        fn arbitrary_labels_never_panic(label in ".{0,24}") {
            let severity = Severity::from_label(Some(&label));
            prop_assert!(matches!(
                severity,
                Severity::Critical | Severity::Warning | Severity::Info
            ));
        }
    }

    #[test]
    fn severity_counts_tally_findings() {
        let finding = |severity| Finding {
            file_path: "a.cs".into(),
            line_number: 0,
            severity,
            description: "d".into(),
            short_recommendation: String::new(),
            full_recommendation: String::new(),
            rule_id: "WCAG 1.1.1".into(),
        };
        let outcome = ScanOutcome {
            findings: vec![
                finding(Severity::Critical),
                finding(Severity::Info),
                finding(Severity::Critical),
            ],
            ..ScanOutcome::default()
        };
        assert_eq!(
            outcome.severity_counts(),
            SeverityCounts {
                critical: 2,
                warning: 0,
                info: 1
            }
        );
        assert!(outcome.is_complete());
    }

    #[test]
    fn abort_reason_serializes_with_kind_tag() {
        let value = serde_json::to_value(AbortReason::AuthFailure {
            message: "Incorrect API key provided".into(),
        })
        .unwrap();
        assert_eq!(value["kind"], "auth_failure");
        assert_eq!(value["message"], "Incorrect API key provided");
    }
}

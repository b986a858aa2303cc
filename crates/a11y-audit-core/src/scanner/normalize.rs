use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use super::{Finding, Severity};

/// Word budget for `Finding::short_recommendation`.
pub const SHORT_RECOMMENDATION_WORDS: usize = 15;
/// Rule id recorded when the model omits `wcag_rule`.
pub const UNSPECIFIED_RULE: &str = "unspecified";

/// Tolerant view of one answer element: every field optional, any JSON type accepted.
#[derive(Debug, Default, Deserialize)]
struct RawFinding {
    #[serde(default)]
    line: Option<Value>,
    #[serde(default)]
    severity: Option<Value>,
    #[serde(default)]
    description: Option<Value>,
    #[serde(default)]
    recommendation: Option<Value>,
    #[serde(default)]
    wcag_rule: Option<Value>,
}

/// Map an extracted JSON array into findings for `file_path`.
///
/// Elements without a description, or that are not objects, are skipped and
/// logged; they never stop the remaining elements from being processed. Text
/// that is not a JSON array yields no findings.
pub fn normalize(json_array_text: &str, file_path: &Path) -> Vec<Finding> {
    let elements = match serde_json::from_str::<Vec<Value>>(json_array_text) {
        Ok(elements) => elements,
        Err(err) => {
            warn!(
                file = %file_path.display(),
                error = %err,
                "findings payload is not a JSON array"
            );
            return Vec::new();
        }
    };

    let mut findings = Vec::with_capacity(elements.len());
    for (idx, element) in elements.into_iter().enumerate() {
        if !element.is_object() {
            warn!(file = %file_path.display(), index = idx, "skipping non-object finding element");
            continue;
        }
        let raw: RawFinding = match serde_json::from_value(element) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(
                    file = %file_path.display(),
                    index = idx,
                    error = %err,
                    "skipping malformed finding element"
                );
                continue;
            }
        };
        match finding_from_raw(raw, file_path) {
            Some(finding) => findings.push(finding),
            None => {
                warn!(
                    file = %file_path.display(),
                    index = idx,
                    "skipping finding without description"
                );
            }
        }
    }
    findings
}

fn finding_from_raw(raw: RawFinding, file_path: &Path) -> Option<Finding> {
    let description = text_field(raw.description.as_ref())?;
    let full_recommendation = text_field(raw.recommendation.as_ref()).unwrap_or_default();
    let rule_id = text_field(raw.wcag_rule.as_ref()).unwrap_or_else(|| UNSPECIFIED_RULE.into());
    let severity = Severity::from_label(raw.severity.as_ref().and_then(Value::as_str));
    Some(Finding {
        file_path: file_path.to_path_buf(),
        line_number: line_field(raw.line.as_ref()),
        severity,
        description,
        short_recommendation: shorten_words(&full_recommendation, SHORT_RECOMMENDATION_WORDS),
        full_recommendation,
        rule_id,
    })
}

/// Non-empty trimmed string, or `None`.
fn text_field(value: Option<&Value>) -> Option<String> {
    let text = value?.as_str()?.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

/// Non-negative integer that fits `u32`; anything else is 0.
fn line_field(value: Option<&Value>) -> u32 {
    value
        .and_then(Value::as_u64)
        .and_then(|line| u32::try_from(line).ok())
        .unwrap_or(0)
}

/// Keep the first `max_words` words, appending `…` when anything was cut.
pub fn shorten_words(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        return words.join(" ");
    }
    let mut short = words[..max_words].join(" ");
    short.push('…');
    short
}

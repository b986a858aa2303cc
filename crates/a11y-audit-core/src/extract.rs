//! Recovery of the JSON findings array from free-text model answers.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

static GREEDY_ARRAY: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(?s)\[.*\]").ok());

/// Locate the single JSON array embedded in `raw` and return it as JSON text.
///
/// Tries, in order: the bracket-balanced span starting at the first `[`, the
/// greedy outermost `[...]` span, and (for answers cut off mid-array) the
/// balanced span truncated after its last complete element. Each candidate is
/// parsed strictly and then leniently. `None` means no candidate parsed; it is
/// never an error.
pub fn extract(raw: &str) -> Option<String> {
    let start = raw.find('[')?;
    let scan = scan_balanced(raw, start);

    if let Some(end) = scan.end {
        if let Some(json) = parse_array(&raw[start..=end]) {
            return Some(json);
        }
    }

    if let Some(greedy) = GREEDY_ARRAY.as_ref().and_then(|re| re.find(raw)) {
        if let Some(json) = parse_array(greedy.as_str()) {
            debug!("recovered findings array through greedy match");
            return Some(json);
        }
    }

    if scan.end.is_none() {
        if let Some(last) = scan.last_element_end {
            let repaired = format!("{}]", &raw[start..=last]);
            if let Some(json) = parse_array(&repaired) {
                debug!("recovered complete elements from truncated findings array");
                return Some(json);
            }
        }
    }

    None
}

struct BalancedScan {
    /// Byte index of the `]` closing the array opened at `start`.
    end: Option<usize>,
    /// Byte index of the delimiter closing the most recent top-level element.
    last_element_end: Option<usize>,
}

fn scan_balanced(text: &str, start: usize) -> BalancedScan {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape = false;
    let mut last_element_end = None;

    for (offset, ch) in text[start..].char_indices() {
        let idx = start + offset;
        if in_string {
            if escape {
                escape = false;
            } else if ch == '\\' {
                escape = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '[' | '{' => depth += 1,
            ']' | '}' => {
                depth = depth.saturating_sub(1);
                match depth {
                    0 => {
                        return BalancedScan {
                            end: Some(idx),
                            last_element_end,
                        }
                    }
                    1 => last_element_end = Some(idx),
                    _ => {}
                }
            }
            _ => {}
        }
    }

    BalancedScan {
        end: None,
        last_element_end,
    }
}

/// Strict JSON first; relaxed JSON5 (trailing commas, single quotes) re-serialized as strict JSON.
fn parse_array(candidate: &str) -> Option<String> {
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Array(_)) => return Some(candidate.to_string()),
        Ok(_) => return None,
        Err(_) => {}
    }
    match json5::from_str::<Value>(candidate) {
        Ok(value @ Value::Array(_)) => serde_json::to_string(&value).ok(),
        _ => None,
    }
}

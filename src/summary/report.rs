//! Locating and parsing the runner's structured JSON report.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// Characters of raw output kept when no report can be parsed.
pub const ERROR_PREFIX_CHARS: usize = 500;

/// The parts of a runner report the dashboard relies on. Suites and errors
/// are passed through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestReport {
    #[serde(default)]
    pub suites: Vec<Value>,
    #[serde(default)]
    pub errors: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<ReportStats>,
}

/// Summary block as emitted by Playwright's JSON reporter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportStats {
    pub expected: Option<u64>,
    pub unexpected: Option<u64>,
    pub skipped: Option<u64>,
    pub flaky: Option<u64>,
    /// Runner-measured duration in milliseconds.
    pub duration: Option<f64>,
}

impl TestReport {
    /// Report standing in for output that held no parseable JSON.
    pub fn unparsed(output: &str) -> Self {
        let prefix: String = output.chars().take(ERROR_PREFIX_CHARS).collect();
        Self {
            suites: Vec::new(),
            errors: vec![Value::String(prefix)],
            stats: None,
        }
    }

    /// Top-level errors reduced to display strings.
    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(error_message).collect()
    }
}

/// Find and parse the report embedded in `output`, synthesizing a minimal
/// one when nothing parses.
pub fn parse_report(output: &str) -> TestReport {
    match extract_report(output) {
        Some(report) => report,
        None => {
            warn!(output_len = output.len(), "no parseable report in runner output");
            TestReport::unparsed(output)
        }
    }
}

/// Look for a JSON object in `output`.
///
/// The last `{` that opens a line is tried first since the report is the
/// final thing the runner prints; the first `{` anywhere is the fallback.
/// Text following the object is ignored.
pub fn extract_report(output: &str) -> Option<TestReport> {
    let last_line_start = output.rfind("\n{").map(|i| i + 1);
    let first_brace = output.find('{');

    let mut candidates = Vec::with_capacity(2);
    candidates.extend(last_line_start);
    if first_brace != last_line_start {
        candidates.extend(first_brace);
    }

    candidates.into_iter().find_map(|start| {
        let parsed = parse_object_at(&output[start..]);
        if parsed.is_none() {
            debug!(offset = start, "candidate report did not parse");
        }
        parsed
    })
}

fn parse_object_at(text: &str) -> Option<TestReport> {
    let mut stream = serde_json::Deserializer::from_str(text).into_iter::<Value>();
    match stream.next()? {
        Ok(value @ Value::Object(_)) => serde_json::from_value(value).ok(),
        _ => None,
    }
}

fn error_message(error: &Value) -> String {
    match error {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_report_after_console_lines() {
        let output = "Running 2 tests using 1 worker\n[1/2] a\n[2/2] b\n{\n  \"suites\": [],\n  \"errors\": [],\n  \"stats\": {\"expected\": 2, \"unexpected\": 0, \"skipped\": 0}\n}\n";
        let report = extract_report(output).unwrap();
        assert_eq!(report.stats.unwrap().expected, Some(2));
    }

    #[test]
    fn test_trailing_text_is_ignored() {
        let output = "{\"suites\": [], \"errors\": []}\nnpm notice: update available\n";
        assert!(extract_report(output).is_some());
    }

    #[test]
    fn test_falls_back_to_first_brace() {
        // The last line-opening brace is a broken fragment; the first one is the report.
        let output = "log: {\"suites\": [{\"title\": \"a\"}], \"errors\": []}\n{oops\n";
        let report = extract_report(output).unwrap();
        assert_eq!(report.suites.len(), 1);
    }

    #[test]
    fn test_non_object_json_rejected() {
        assert!(extract_report("[1, 2, 3]").is_none());
    }

    #[test]
    fn test_no_brace_synthesizes_truncated_error() {
        let output = "x".repeat(2_000);
        let report = parse_report(&output);
        assert!(report.suites.is_empty());
        assert_eq!(report.errors.len(), 1);
        let messages = report.error_messages();
        assert_eq!(messages[0].chars().count(), ERROR_PREFIX_CHARS);
    }

    #[test]
    fn test_truncation_counts_characters_not_bytes() {
        let output = "✘".repeat(600);
        let messages = TestReport::unparsed(&output).error_messages();
        assert_eq!(messages[0].chars().count(), 500);
    }

    #[test]
    fn test_error_messages_from_objects() {
        let report = TestReport {
            errors: vec![json!({"message": "config not found", "stack": "..."}), json!("plain")],
            ..TestReport::default()
        };
        assert_eq!(report.error_messages(), vec!["config not found", "plain"]);
    }
}

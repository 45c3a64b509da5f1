//! Result summarizer -- authoritative stats once a run has ended.
//!
//! Priority order:
//! 1. The report's own `stats` block (`expected`/`unexpected`/`skipped`).
//!    The runner has already reconciled retries and flaky tests there.
//! 2. A recursive count of every leaf test in the suite tree.
//!
//! `duration` is always the dashboard's wall-clock measurement of the whole
//! run so that runs stay comparable regardless of the runner's own clock.

pub mod report;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

pub use self::report::{extract_report, parse_report, ReportStats, TestReport};

/// Final figures stored with a run. `duration` is in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub total: u64,
    pub passed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub duration: u64,
}

/// Where the counts in a [`Summary`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatsSource {
    ReportStats,
    LeafCount,
}

/// Parsed report plus derived stats.
#[derive(Debug, Clone)]
pub struct Summary {
    pub report: TestReport,
    pub stats: RunStats,
    pub source: StatsSource,
}

/// Summarize the combined output of a finished run.
pub fn summarize(output: &str, elapsed: Duration) -> Summary {
    let report = parse_report(output);
    summarize_report(report, elapsed.as_millis() as u64)
}

/// Derive stats for an already-parsed report.
pub fn summarize_report(report: TestReport, duration_ms: u64) -> Summary {
    let (mut stats, source) = derive_stats(&report);
    stats.duration = duration_ms;
    debug!(
        total = stats.total,
        passed = stats.passed,
        failed = stats.failed,
        skipped = stats.skipped,
        source = ?source,
        "run summarized"
    );
    Summary {
        report,
        stats,
        source,
    }
}

/// Counts only; `duration` is left at zero.
pub fn derive_stats(report: &TestReport) -> (RunStats, StatsSource) {
    if let Some(ReportStats {
        expected: Some(expected),
        unexpected: Some(unexpected),
        skipped: Some(skipped),
        ..
    }) = report.stats
    {
        let stats = RunStats {
            total: expected.saturating_add(unexpected).saturating_add(skipped),
            passed: expected,
            failed: unexpected,
            skipped,
            duration: 0,
        };
        return (stats, StatsSource::ReportStats);
    }

    let mut stats = RunStats::default();
    for suite in &report.suites {
        count_leaves(suite, &mut stats);
    }
    stats.total = stats
        .passed
        .saturating_add(stats.failed)
        .saturating_add(stats.skipped);
    (stats, StatsSource::LeafCount)
}

/// Child collections walked when looking for leaf tests.
const TREE_KEYS: &[&str] = &["suites", "specs", "tests"];

/// A node carrying its own `status` is a leaf test; anything else is a
/// group whose children are searched.
fn count_leaves(node: &Value, stats: &mut RunStats) {
    let Value::Object(map) = node else {
        return;
    };

    if let Some(status) = map.get("status").and_then(Value::as_str) {
        match normalize_status(status) {
            Some(LeafStatus::Passed) => stats.passed += 1,
            Some(LeafStatus::Failed) => stats.failed += 1,
            Some(LeafStatus::Skipped) => stats.skipped += 1,
            None => debug!(status, "leaf test with unknown status ignored"),
        }
        return;
    }

    for key in TREE_KEYS {
        if let Some(Value::Array(children)) = map.get(*key) {
            for child in children {
                count_leaves(child, stats);
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum LeafStatus {
    Passed,
    Failed,
    Skipped,
}

fn normalize_status(status: &str) -> Option<LeafStatus> {
    match status {
        "passed" | "expected" | "flaky" => Some(LeafStatus::Passed),
        "failed" | "unexpected" | "timedOut" | "interrupted" => Some(LeafStatus::Failed),
        "skipped" => Some(LeafStatus::Skipped),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixture() -> String {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("fixtures")
            .join("playwright")
            .join("report.json");
        std::fs::read_to_string(path).unwrap()
    }

    #[test]
    fn test_report_stats_are_authoritative() {
        let report = TestReport {
            // Leaf counts deliberately disagree with the stats block.
            suites: vec![json!({"title": "a", "specs": [{"tests": [{"status": "unexpected"}]}]})],
            errors: vec![],
            stats: Some(ReportStats {
                expected: Some(5),
                unexpected: Some(1),
                skipped: Some(2),
                ..ReportStats::default()
            }),
        };
        let (stats, source) = derive_stats(&report);
        assert_eq!(source, StatsSource::ReportStats);
        assert_eq!(
            stats,
            RunStats { total: 8, passed: 5, failed: 1, skipped: 2, duration: 0 }
        );
    }

    #[test]
    fn test_oversized_report_stats_saturate() {
        let report = TestReport {
            suites: vec![],
            errors: vec![],
            stats: Some(ReportStats {
                expected: Some(u64::MAX),
                unexpected: Some(1),
                skipped: Some(1),
                ..ReportStats::default()
            }),
        };
        let (stats, _) = derive_stats(&report);
        assert_eq!(stats.total, u64::MAX);
        assert_eq!(stats.passed, u64::MAX);
    }

    #[test]
    fn test_leaf_count_fallback() {
        let report = TestReport {
            suites: vec![json!({
                "title": "root",
                "tests": [
                    {"title": "one", "status": "passed", "duration": 10},
                    {"title": "two", "status": "failed", "duration": 20, "errors": ["boom"]}
                ],
                "suites": [
                    {"title": "nested", "tests": [{"title": "three", "status": "skipped", "duration": 0}]}
                ]
            })],
            ..TestReport::default()
        };
        let (stats, source) = derive_stats(&report);
        assert_eq!(source, StatsSource::LeafCount);
        assert_eq!(
            stats,
            RunStats { total: 3, passed: 1, failed: 1, skipped: 1, duration: 0 }
        );
    }

    #[test]
    fn test_partial_stats_block_falls_back() {
        let report = TestReport {
            suites: vec![json!({"tests": [{"status": "expected"}]})],
            stats: Some(ReportStats { expected: Some(9), ..ReportStats::default() }),
            ..TestReport::default()
        };
        let (stats, source) = derive_stats(&report);
        assert_eq!(source, StatsSource::LeafCount);
        assert_eq!(stats.passed, 1);
    }

    #[test]
    fn test_duration_is_wall_clock() {
        let summary = summarize(&fixture(), Duration::from_millis(12_345));
        assert_eq!(summary.stats.duration, 12_345);
    }

    #[test]
    fn test_playwright_fixture() {
        let output = format!("[1/4] a\n[2/4] b\n  1) [chromium] › b\n[3/4] c\n[4/4] d\n{}", fixture());
        let summary = summarize(&output, Duration::from_secs(8));
        assert_eq!(summary.source, StatsSource::ReportStats);
        assert_eq!(
            summary.stats,
            RunStats { total: 4, passed: 2, failed: 1, skipped: 1, duration: 8_000 }
        );
        assert_eq!(summary.report.suites.len(), 1);
    }

    #[test]
    fn test_playwright_fixture_leaf_walk_agrees() {
        let mut report: TestReport = serde_json::from_str(&fixture()).unwrap();
        report.stats = None;
        let (stats, _) = derive_stats(&report);
        assert_eq!((stats.passed, stats.failed, stats.skipped), (2, 1, 1));
    }

    #[test]
    fn test_unparseable_output() {
        let summary = summarize("Error: Cannot find module '@playwright/test'", Duration::ZERO);
        assert!(summary.report.suites.is_empty());
        assert_eq!(summary.stats.total, 0);
        assert!(summary.report.error_messages()[0].contains("Cannot find module"));
    }
}

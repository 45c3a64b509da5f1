//! Line classification for runner console output.
//!
//! Each rule recognises one marker kind. Rules are evaluated in a fixed
//! order and a single line may yield several markers; applying them to the
//! counters is the parser's job, not the rules'.

use std::sync::LazyLock;

use regex::Regex;

/// Terminal control sequences: CSI (colors, cursor moves) and OSC (titles,
/// hyperlinks).
static ANSI_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]")
        .expect("Invalid ANSI regex pattern")
});

/// `  3) [chromium] › login.spec.ts:12:5 › rejects bad password`
static FAILURE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+)\)\s+\[[^\]]+\]").expect("Invalid failure marker regex pattern")
});

/// `  2 skipped`
static SKIP_TOTAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\s)(\d+)\s+skipped\b").expect("Invalid skip total regex pattern")
});

/// `  -   7 [chromium] › cart.spec.ts:40:3 › coupon flow`
static SKIP_ORDINAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*-\s+(\d+)\s+\[[^\]]+\]").expect("Invalid skip ordinal regex pattern")
});

/// `[3/10] [chromium] › checkout.spec.ts:8:1 › pays with card`
static PROGRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(\d+)/(\d+)\]").expect("Invalid progress marker regex pattern")
});

/// Something a console line says about the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// A numbered failure; the runner enumerates failures by absolute rank.
    FailureRank(u64),
    /// An aggregate "N skipped" summary count.
    SkippedTotal(u64),
    /// A single test, identified by its ordinal, reported as skipped.
    SkippedOrdinal(u64),
    /// `current/total` tests concluded.
    Progress { current: u64, total: u64 },
}

/// One classification rule.
struct Rule {
    name: &'static str,
    extract: fn(&str) -> Option<Marker>,
}

/// Evaluation order. Failure and skip ranks are read before progress so the
/// pass count recomputed on a progress line already reflects them.
static RULES: &[Rule] = &[
    Rule {
        name: "failure-rank",
        extract: failure_rank,
    },
    Rule {
        name: "skipped-total",
        extract: skipped_total,
    },
    Rule {
        name: "skipped-ordinal",
        extract: skipped_ordinal,
    },
    Rule {
        name: "progress",
        extract: progress,
    },
];

/// Remove terminal escape sequences.
pub fn strip_ansi(line: &str) -> std::borrow::Cow<'_, str> {
    ANSI_RE.replace_all(line, "")
}

/// Apply every rule, in order, to an already-stripped line.
pub fn classify(line: &str) -> Vec<Marker> {
    RULES
        .iter()
        .filter_map(|rule| {
            let marker = (rule.extract)(line)?;
            tracing::trace!(rule = rule.name, ?marker, "line matched");
            Some(marker)
        })
        .collect()
}

fn failure_rank(line: &str) -> Option<Marker> {
    let cap = FAILURE_RE.captures(line)?;
    cap[1].parse().ok().map(Marker::FailureRank)
}

fn skipped_total(line: &str) -> Option<Marker> {
    let cap = SKIP_TOTAL_RE.captures(line)?;
    cap[1].parse().ok().map(Marker::SkippedTotal)
}

fn skipped_ordinal(line: &str) -> Option<Marker> {
    let cap = SKIP_ORDINAL_RE.captures(line)?;
    cap[1].parse().ok().map(Marker::SkippedOrdinal)
}

fn progress(line: &str) -> Option<Marker> {
    let cap = PROGRESS_RE.captures(line)?;
    let current = cap[1].parse().ok()?;
    let total = cap[2].parse().ok()?;
    Some(Marker::Progress { current, total })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_ansi_colors() {
        assert_eq!(strip_ansi("\x1b[31m  1) [chromium]\x1b[39m"), "  1) [chromium]");
        assert_eq!(strip_ansi("\x1b[1A\x1b[2K[4/9] a"), "[4/9] a");
        assert_eq!(strip_ansi("plain"), "plain");
    }

    #[test]
    fn test_failure_marker() {
        assert_eq!(
            classify("  2) [chromium] › login.spec.ts:12:5 › rejects bad password"),
            vec![Marker::FailureRank(2)]
        );
        // A numbered list item without a project qualifier is not a failure.
        assert!(classify("  2) see docs").is_empty());
    }

    #[test]
    fn test_skip_markers() {
        assert_eq!(classify("  3 skipped"), vec![Marker::SkippedTotal(3)]);
        assert_eq!(
            classify("  -   7 [chromium] › cart.spec.ts:40:3 › coupon flow"),
            vec![Marker::SkippedOrdinal(7)]
        );
    }

    #[test]
    fn test_progress_marker() {
        assert_eq!(
            classify("[3/10] [chromium] › checkout.spec.ts:8:1 › pays with card"),
            vec![Marker::Progress { current: 3, total: 10 }]
        );
    }

    #[test]
    fn test_rule_order_on_combined_line() {
        assert_eq!(
            classify("[5/6] 2 skipped"),
            vec![Marker::SkippedTotal(2), Marker::Progress { current: 5, total: 6 }]
        );
    }

    #[test]
    fn test_unrelated_lines() {
        assert!(classify("Running 10 tests using 4 workers").is_empty());
        assert!(classify("").is_empty());
    }
}

//! Live progress derived from the runner's console output.
//!
//! The parser is fed decoded stdout chunks in arrival order. It buffers the
//! incomplete trailing line, classifies each complete line and folds the
//! resulting markers into its counters under the monotonic adoption rule:
//! an observed value replaces a counter only when it is larger. Counters
//! therefore never regress, whatever order the runner prints things in.
//!
//! The numbers are an approximation for the live bar. The final figures come
//! from the structured report (see [`crate::summary`]).

pub mod rules;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use self::rules::Marker;

/// Counter state broadcast with every progress event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub completed: u64,
    pub passed: u64,
    pub failed: u64,
    pub skipped: u64,
    /// Best-known denominator: the progress marker's total, else the count
    /// from the listing pass.
    pub expected_total: Option<u64>,
}

/// Incremental parser owned by exactly one in-flight run.
#[derive(Debug, Default)]
pub struct ProgressParser {
    completed: u64,
    passed: u64,
    failed: u64,
    skipped: u64,
    /// Ordinals already counted as skipped.
    skipped_ordinals: HashSet<u64>,
    /// Highest aggregate `N skipped` seen.
    skipped_total: u64,
    listed_total: Option<u64>,
    marker_total: Option<u64>,
    partial: String,
}

impl ProgressParser {
    /// `listed_total` is the count obtained before the run started, if any.
    pub fn new(listed_total: Option<u64>) -> Self {
        Self {
            listed_total,
            ..Self::default()
        }
    }

    /// Consume one chunk. Returns a snapshot for every complete line that
    /// changed a counter, in order.
    pub fn feed(&mut self, chunk: &str) -> Vec<ProgressSnapshot> {
        self.partial.push_str(chunk);

        let mut events = Vec::new();
        while let Some(end) = self.partial.find(|c: char| c == '\n' || c == '\r') {
            let line: String = self.partial.drain(..=end).collect();
            if self.process_line(&line[..end]) {
                events.push(self.snapshot());
            }
        }
        events
    }

    /// Flush a final unterminated line once the stream has ended.
    pub fn finish(&mut self) -> Option<ProgressSnapshot> {
        if self.partial.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.partial);
        self.process_line(&line).then(|| self.snapshot())
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            completed: self.completed,
            passed: self.passed,
            failed: self.failed,
            skipped: self.skipped,
            expected_total: self.expected_total(),
        }
    }

    pub fn expected_total(&self) -> Option<u64> {
        self.marker_total.or(self.listed_total)
    }

    fn process_line(&mut self, raw: &str) -> bool {
        let line = rules::strip_ansi(raw);
        let line = line.trim_end();
        if line.is_empty() {
            return false;
        }

        let mut changed = false;
        for marker in rules::classify(line) {
            changed |= self.apply(marker);
        }
        if changed {
            self.passed = self
                .completed
                .saturating_sub(self.failed.saturating_add(self.skipped));
            debug!(
                completed = self.completed,
                passed = self.passed,
                failed = self.failed,
                skipped = self.skipped,
                "progress advanced"
            );
        }
        changed
    }

    fn apply(&mut self, marker: Marker) -> bool {
        match marker {
            Marker::FailureRank(rank) => adopt(&mut self.failed, rank),
            Marker::SkippedTotal(count) => {
                adopt(&mut self.skipped_total, count);
                self.reconcile_skips()
            }
            Marker::SkippedOrdinal(ordinal) => {
                self.skipped_ordinals.insert(ordinal) && self.reconcile_skips()
            }
            Marker::Progress { current, total } => {
                let total_changed = self.marker_total != Some(total);
                self.marker_total = Some(total);
                adopt(&mut self.completed, current) || total_changed
            }
        }
    }

    /// The aggregate and the per-test markers describe the same skips, in
    /// either order; the larger of the two is the count.
    fn reconcile_skips(&mut self) -> bool {
        let observed = self.skipped_total.max(self.skipped_ordinals.len() as u64);
        adopt(&mut self.skipped, observed)
    }
}

/// Monotonic adoption: take `observed` only if it exceeds the current value.
fn adopt(counter: &mut u64, observed: u64) -> bool {
    if observed > *counter {
        *counter = observed;
        true
    } else {
        false
    }
}

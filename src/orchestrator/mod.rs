//! Run orchestrator -- sequences one project run end to end.
//!
//! ```text
//! idle -> started -> running (progress*) -> completed | errored
//! ```
//!
//! * `started`: the project is runnable; a listing pass supplies the
//!   expected total and `tests:started` goes out.
//! * `running`: the runner streams stdout into this run's own
//!   [`ProgressParser`]; every counter change becomes `tests:progress`.
//! * `completed`: the runner resolved (exit or timeout); the summary is
//!   appended to history and `tests:completed` carries the record.
//! * `errored`: the runner could not start or history could not be
//!   written; `tests:error` goes out and nothing is stored.
//!
//! Once `tests:started` has been sent, exactly one of `tests:completed` or
//! `tests:error` follows. A queued request turned away before it starts
//! gets a single `tests:error` through [`RunOrchestrator::reject`].
//!
//! Batches hold the batch lane for their whole duration, so two batches
//! never overlap.

pub mod queue;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::RunnerConfig;
use crate::live::{Broadcaster, EventKind};
use crate::progress::{ProgressParser, ProgressSnapshot};
use crate::projects::ProjectDescriptor;
use crate::runner::{self, count_listed_tests, ProcessOutcome, RunnerCommand};
use crate::storage::{HistoryStore, RunRecord};
use crate::summary;

pub use self::queue::{run_queue_loop, JobKind, RunJob, RunQueue};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("project '{project_id}' not found")]
    ProjectNotFound { project_id: String },

    #[error("project '{project_id}' cannot be run from the dashboard")]
    NotRunnable { project_id: String },

    #[error("project '{project_id}' already has a run in progress")]
    AlreadyRunning { project_id: String },

    #[error("test runner could not be started: {message}")]
    Spawn { message: String },

    #[error("failed to record run in history: {message}")]
    History { message: String },

    #[error("uploaded body holds no runner report")]
    InvalidReport,
}

/// Where an in-flight run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Started,
    Running,
    Completed,
    Errored,
}

/// Snapshot of an in-flight run, for status queries.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveRun {
    pub project_id: String,
    pub run_id: String,
    pub grep: Option<String>,
    pub phase: RunPhase,
    pub start_time: DateTime<Utc>,
    pub progress: ProgressSnapshot,
}

/// Outcome of a sequential batch.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub completed: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub skipped: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProgressPayload<'a> {
    project_id: &'a str,
    #[serde(flatten)]
    snapshot: ProgressSnapshot,
}

type ActiveMap = Arc<Mutex<HashMap<String, ActiveRun>>>;

// ---------------------------------------------------------------------------
// RunOrchestrator
// ---------------------------------------------------------------------------

pub struct RunOrchestrator {
    runner: RunnerConfig,
    store: HistoryStore,
    live: Broadcaster,
    active: ActiveMap,
    batch_lane: tokio::sync::Mutex<()>,
}

impl RunOrchestrator {
    pub fn new(runner: RunnerConfig, store: HistoryStore, live: Broadcaster) -> Self {
        Self {
            runner,
            store,
            live,
            active: Arc::new(Mutex::new(HashMap::new())),
            batch_lane: tokio::sync::Mutex::new(()),
        }
    }

    pub fn store(&self) -> &HistoryStore {
        &self.store
    }

    pub fn live(&self) -> &Broadcaster {
        &self.live
    }

    /// Runs currently in flight, ordered by project id.
    pub fn active_runs(&self) -> Vec<ActiveRun> {
        let mut runs: Vec<_> = lock(&self.active).values().cloned().collect();
        runs.sort_by(|a, b| a.project_id.cmp(&b.project_id));
        runs
    }

    pub fn is_running(&self, project_id: &str) -> bool {
        lock(&self.active).contains_key(project_id)
    }

    /// Report a request that was accepted but will never start.
    pub fn reject(&self, project_id: &str, err: &RunError) {
        warn!(project_id, error = %err, "run request rejected");
        self.live.broadcast(
            EventKind::Error,
            json!({ "projectId": project_id, "error": err.to_string() }),
        );
    }

    /// Run one project's suite to completion.
    ///
    /// `grep` must already have been validated by the caller.
    pub async fn start_run(
        &self,
        project: &ProjectDescriptor,
        grep: Option<&str>,
    ) -> Result<RunRecord, RunError> {
        if !project.can_run_from_ui {
            return Err(RunError::NotRunnable {
                project_id: project.id.clone(),
            });
        }

        let start_time = Utc::now();
        let run_id = RunRecord::new_id(start_time);
        let _claim = InFlight::claim(&self.active, project, &run_id, grep, start_time)?;

        // -- started --------------------------------------------------------
        let expected_total = self.list_expected_total(project, grep).await;
        self.transition(&project.id, &run_id, RunPhase::Started);
        self.live.broadcast(
            EventKind::Started,
            json!({
                "projectId": project.id,
                "grep": grep,
                "expectedTotal": expected_total,
                "startTime": start_time.to_rfc3339(),
            }),
        );

        // -- running --------------------------------------------------------
        self.transition(&project.id, &run_id, RunPhase::Running);
        let command = RunnerCommand::for_run(&self.runner, project, grep);
        let clock = Instant::now();
        let mut parser = ProgressParser::new(expected_total);

        let output = runner::run_streaming(&command, |chunk| {
            for snapshot in parser.feed(chunk) {
                self.publish_progress(&project.id, snapshot);
            }
        })
        .await;
        if let Some(snapshot) = parser.finish() {
            self.publish_progress(&project.id, snapshot);
        }
        let elapsed = clock.elapsed();

        if output.outcome == ProcessOutcome::SpawnFailed {
            let err = RunError::Spawn {
                message: output.combined_output,
            };
            self.fail(&project.id, &run_id, &err);
            return Err(err);
        }
        if output.outcome == ProcessOutcome::TimedOut {
            warn!(project_id = %project.id, run_id = %run_id, "run hit its timeout, summarizing partial output");
        }

        // -- completed ------------------------------------------------------
        let summary = summary::summarize(&output.combined_output, elapsed);
        let errors = summary.report.error_messages();
        let run = RunRecord {
            id: run_id.clone(),
            timestamp: start_time,
            stats: summary.stats,
            grep: grep.map(str::to_string),
            exit_code: output.exit_code,
            suites: summary.report.suites,
            errors,
        };

        if let Err(e) = self.store.append_async(&project.id, &run).await {
            let err = RunError::History {
                message: format!("{:#}", e),
            };
            self.fail(&project.id, &run_id, &err);
            return Err(err);
        }

        self.transition(&project.id, &run_id, RunPhase::Completed);
        info!(
            project_id = %project.id,
            run_id = %run_id,
            exit_code = run.exit_code,
            total = run.stats.total,
            passed = run.stats.passed,
            failed = run.stats.failed,
            skipped = run.stats.skipped,
            duration_ms = run.stats.duration,
            "run completed"
        );
        self.live.broadcast(
            EventKind::Completed,
            json!({ "projectId": project.id, "run": run }),
        );

        Ok(run)
    }

    /// Record a report produced outside the dashboard, e.g. by CI.
    ///
    /// The report's own `stats.duration` stands in for the wall clock. The
    /// exit code is inferred: non-zero when anything failed.
    pub async fn record_uploaded(&self, project_id: &str, body: &str) -> Result<RunRecord, RunError> {
        let report = summary::extract_report(body).ok_or(RunError::InvalidReport)?;
        let duration_ms = report
            .stats
            .as_ref()
            .and_then(|s| s.duration)
            .filter(|d| d.is_finite() && *d >= 0.0)
            .map(|d| d.round() as u64)
            .unwrap_or(0);

        let summary = summary::summarize_report(report, duration_ms);
        let timestamp = Utc::now();
        let run = RunRecord {
            id: RunRecord::new_id(timestamp),
            timestamp,
            stats: summary.stats,
            grep: None,
            exit_code: i32::from(summary.stats.failed > 0),
            errors: summary.report.error_messages(),
            suites: summary.report.suites,
        };

        self.store
            .append_async(project_id, &run)
            .await
            .map_err(|e| RunError::History {
                message: format!("{:#}", e),
            })?;

        info!(project_id, run_id = %run.id, total = run.stats.total, "uploaded report recorded");
        self.live.broadcast(
            EventKind::Completed,
            json!({ "projectId": project_id, "run": run }),
        );
        Ok(run)
    }

    /// Run each project in turn, never two at once: runs share the host's
    /// target environment and ports. One failure does not stop the batch.
    pub async fn start_batch_run(
        &self,
        projects: &[ProjectDescriptor],
        grep: Option<&str>,
    ) -> BatchSummary {
        let _lane = match self.batch_lane.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                info!("previous batch still running, waiting for it");
                self.batch_lane.lock().await
            }
        };
        info!(projects = projects.len(), ?grep, "batch run starting");
        let mut summary = BatchSummary::default();

        for project in projects {
            if !project.can_run_from_ui {
                summary.skipped.push(project.id.clone());
                continue;
            }
            match self.start_run(project, grep).await {
                Ok(_) => summary.completed.push(project.id.clone()),
                Err(e) => {
                    // Spawn and history failures have already reported themselves.
                    if matches!(e, RunError::AlreadyRunning { .. }) {
                        self.reject(&project.id, &e);
                    }
                    error!(project_id = %project.id, error = %e, "batch member failed, continuing");
                    summary.failed.push((project.id.clone(), e.to_string()));
                }
            }
        }

        info!(
            completed = summary.completed.len(),
            failed = summary.failed.len(),
            skipped = summary.skipped.len(),
            "batch run finished"
        );
        summary
    }

    /// Listing pass. Any failure just means there is no denominator yet.
    async fn list_expected_total(&self, project: &ProjectDescriptor, grep: Option<&str>) -> Option<u64> {
        let command = RunnerCommand::for_listing(&self.runner, project, grep);
        let listing = runner::run_streaming(&command, |_| {}).await;
        if listing.outcome != ProcessOutcome::Exited {
            warn!(project_id = %project.id, outcome = ?listing.outcome, "listing pass failed");
            return None;
        }
        let total = count_listed_tests(&listing.combined_output);
        if total.is_none() {
            warn!(project_id = %project.id, "listing pass reported no test count");
        }
        total
    }

    fn publish_progress(&self, project_id: &str, snapshot: ProgressSnapshot) {
        if let Some(run) = lock(&self.active).get_mut(project_id) {
            run.progress = snapshot;
        }
        let payload = ProgressPayload {
            project_id,
            snapshot,
        };
        // Serializing plain integers and strings cannot fail.
        let data = serde_json::to_value(&payload).unwrap_or_default();
        self.live.broadcast(EventKind::Progress, data);
    }

    fn fail(&self, project_id: &str, run_id: &str, err: &RunError) {
        self.transition(project_id, run_id, RunPhase::Errored);
        error!(project_id, run_id, error = %err, "run errored");
        self.live.broadcast(
            EventKind::Error,
            json!({ "projectId": project_id, "error": err.to_string() }),
        );
    }

    fn transition(&self, project_id: &str, run_id: &str, phase: RunPhase) {
        if let Some(run) = lock(&self.active).get_mut(project_id) {
            run.phase = phase;
        }
        info!(project_id, run_id, phase = ?phase, "run state changed");
    }
}

// ---------------------------------------------------------------------------
// In-flight bookkeeping
// ---------------------------------------------------------------------------

/// Holds a project's slot in the active map; released on drop, whatever
/// path the run takes out of `start_run`.
struct InFlight {
    active: ActiveMap,
    project_id: String,
}

impl InFlight {
    fn claim(
        active: &ActiveMap,
        project: &ProjectDescriptor,
        run_id: &str,
        grep: Option<&str>,
        start_time: DateTime<Utc>,
    ) -> Result<Self, RunError> {
        let mut map = lock(active);
        if map.contains_key(&project.id) {
            return Err(RunError::AlreadyRunning {
                project_id: project.id.clone(),
            });
        }
        map.insert(
            project.id.clone(),
            ActiveRun {
                project_id: project.id.clone(),
                run_id: run_id.to_string(),
                grep: grep.map(str::to_string),
                phase: RunPhase::Idle,
                start_time,
                progress: ProgressSnapshot::default(),
            },
        );
        Ok(Self {
            active: Arc::clone(active),
            project_id: project.id.clone(),
        })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        lock(&self.active).remove(&self.project_id);
    }
}

fn lock(active: &ActiveMap) -> MutexGuard<'_, HashMap<String, ActiveRun>> {
    active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Per-project run history, newest first, capped at [`HISTORY_LIMIT`].
//!
//! The store is the only writer. An append inserts the new run and evicts
//! the oldest overflow rows inside one transaction, so a crash mid-write
//! leaves the previous log intact for the next read. Overlapping appends to
//! the same project serialize on SQLite's write lock; the later commit wins
//! the newest slot.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use super::Pool;
use crate::summary::RunStats;

/// Runs retained per project.
pub const HISTORY_LIMIT: usize = 20;

/// One completed (or failed) test execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub stats: RunStats,
    /// Filter the run was restricted to; `None` for a full run.
    pub grep: Option<String>,
    pub exit_code: i32,
    /// Runner suite tree, passed through untouched.
    pub suites: Vec<Value>,
    pub errors: Vec<String>,
}

impl RunRecord {
    /// Time-ordered id: creation millis plus a random suffix.
    pub fn new_id(timestamp: DateTime<Utc>) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("{}-{}", timestamp.timestamp_millis(), &suffix[..8])
    }
}

/// A project's log as served to readers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunHistory {
    pub runs: Vec<RunRecord>,
    pub last_run: Option<RunRecord>,
}

/// Durable run history keyed by project id.
///
/// The plain methods block on SQLite; async callers use the `_async`
/// variants, which run the same query on the blocking pool.
#[derive(Clone)]
pub struct HistoryStore {
    pool: Pool,
}

impl HistoryStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Prepend `run` to the project's log and evict anything past the cap.
    pub fn append(&self, project_id: &str, run: &RunRecord) -> Result<()> {
        let run_json = serde_json::to_string(run).context("failed to serialize run record")?;

        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT OR REPLACE INTO run_history
                (project_id, run_id, exit_code, total, passed, failed, skipped, duration_ms, run_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                project_id,
                run.id,
                run.exit_code,
                run.stats.total as i64,
                run.stats.passed as i64,
                run.stats.failed as i64,
                run.stats.skipped as i64,
                run.stats.duration as i64,
                run_json,
                run.timestamp.to_rfc3339(),
            ],
        )
        .context("failed to insert run")?;

        let evicted = tx.execute(
            "DELETE FROM run_history
             WHERE project_id = ?1
               AND id NOT IN (
                   SELECT id FROM run_history
                   WHERE project_id = ?1
                   ORDER BY id DESC
                   LIMIT ?2
               )",
            params![project_id, HISTORY_LIMIT as i64],
        )?;

        tx.commit().context("failed to commit run history")?;

        debug!(project_id, run_id = %run.id, evicted, "run appended to history");
        Ok(())
    }

    /// The full log; an empty default when the project has none yet.
    pub fn read_all(&self, project_id: &str) -> Result<RunHistory> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT run_id, run_json FROM run_history
             WHERE project_id = ?1
             ORDER BY id DESC
             LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![project_id, HISTORY_LIMIT as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut runs = Vec::new();
        for row in rows {
            let (run_id, json) = row?;
            match serde_json::from_str::<RunRecord>(&json) {
                Ok(run) => runs.push(run),
                Err(e) => warn!(project_id, run_id = %run_id, error = %e, "skipping unreadable run"),
            }
        }

        let last_run = runs.first().cloned();
        Ok(RunHistory { runs, last_run })
    }

    /// [`append`](Self::append) off the async runtime.
    pub async fn append_async(&self, project_id: &str, run: &RunRecord) -> Result<()> {
        let store = self.clone();
        let project_id = project_id.to_string();
        let run = run.clone();
        tokio::task::spawn_blocking(move || store.append(&project_id, &run))
            .await
            .context("history append task failed")?
    }

    /// [`read_all`](Self::read_all) off the async runtime.
    pub async fn read_all_async(&self, project_id: &str) -> Result<RunHistory> {
        let store = self.clone();
        let project_id = project_id.to_string();
        tokio::task::spawn_blocking(move || store.read_all(&project_id))
            .await
            .context("history read task failed")?
    }

    /// [`read_last`](Self::read_last) off the async runtime.
    pub async fn read_last_async(&self, project_id: &str) -> Result<Option<RunRecord>> {
        let store = self.clone();
        let project_id = project_id.to_string();
        tokio::task::spawn_blocking(move || store.read_last(&project_id))
            .await
            .context("history read task failed")?
    }

    /// The newest run, if any.
    pub fn read_last(&self, project_id: &str) -> Result<Option<RunRecord>> {
        let conn = self.pool.get()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT run_json FROM run_history
                 WHERE project_id = ?1
                 ORDER BY id DESC
                 LIMIT 1",
                params![project_id],
                |row| row.get(0),
            )
            .optional()?;

        json.map(|j| serde_json::from_str(&j).context("failed to parse stored run"))
            .transpose()
    }
}

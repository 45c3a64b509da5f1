//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Current schema version recorded in `schema_version`.
pub const SCHEMA_VERSION: i64 = 1;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS run_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id TEXT NOT NULL,
            run_id TEXT NOT NULL,
            exit_code INTEGER NOT NULL,
            total INTEGER NOT NULL,
            passed INTEGER NOT NULL,
            failed INTEGER NOT NULL,
            skipped INTEGER NOT NULL,
            duration_ms INTEGER NOT NULL,
            run_json TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE (project_id, run_id)
        );

        CREATE INDEX IF NOT EXISTS idx_run_history_project ON run_history(project_id, id);",
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [SCHEMA_VERSION],
    )?;

    Ok(())
}

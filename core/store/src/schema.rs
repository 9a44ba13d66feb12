//! Database schema and idempotent migrations.

use rusqlite::Connection;
use tracing::info;

use invigil_common::{Error, Result};

/// Current schema version, tracked via `PRAGMA user_version`.
pub const SCHEMA_VERSION: i32 = 1;

/// Apply migrations up to [`SCHEMA_VERSION`].
///
/// Every DDL statement checks for existence before creating, so applying
/// this to an already-migrated database is harmless.
pub fn migrate(conn: &Connection) -> Result<()> {
    let version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(|e| Error::Storage(format!("Failed to read schema version: {}", e)))?;

    if version >= SCHEMA_VERSION {
        return Ok(());
    }

    conn.execute_batch(
        r#"
        BEGIN;

        CREATE TABLE IF NOT EXISTS proctoring_logs (
            id TEXT PRIMARY KEY,
            submission_id INTEGER NOT NULL,
            log_type TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            encrypted INTEGER NOT NULL,
            payload TEXT,
            media BLOB,
            taken_at INTEGER
        );

        CREATE TABLE IF NOT EXISTS offline_submissions (
            id TEXT PRIMARY KEY,
            submission_id INTEGER NOT NULL,
            test_id INTEGER NOT NULL,
            answers TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            synced INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS sync_checkpoints (
            log_id TEXT PRIMARY KEY,
            log_type TEXT NOT NULL,
            status TEXT NOT NULL,
            attempt_count INTEGER NOT NULL DEFAULT 0,
            last_attempt INTEGER,
            last_error TEXT
        );

        CREATE TABLE IF NOT EXISTS metadata (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_logs_type ON proctoring_logs(log_type);
        CREATE INDEX IF NOT EXISTS idx_logs_submission ON proctoring_logs(submission_id);
        CREATE INDEX IF NOT EXISTS idx_checkpoints_status ON sync_checkpoints(status);
        CREATE INDEX IF NOT EXISTS idx_submissions_synced ON offline_submissions(synced);

        PRAGMA user_version = 1;

        COMMIT;
        "#,
    )
    .map_err(|e| Error::Storage(format!("Schema migration failed: {}", e)))?;

    info!(version = SCHEMA_VERSION, "Applied local store schema");
    Ok(())
}

//! v003 -- Sync audit trail.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS sync_sessions (
    id             TEXT PRIMARY KEY NOT NULL,
    source_node_id TEXT,                      -- NULL for hub pushes
    target_node_id TEXT,
    status         TEXT NOT NULL DEFAULT 'pending',
    sync_type      TEXT NOT NULL DEFAULT 'incremental',
    records_synced INTEGER NOT NULL DEFAULT 0,
    started_at     TEXT NOT NULL,
    completed_at   TEXT
);

CREATE INDEX IF NOT EXISTS idx_sync_sessions_started ON sync_sessions(started_at);

CREATE TABLE IF NOT EXISTS sync_operation_logs (
    id         TEXT PRIMARY KEY NOT NULL,
    session_id TEXT NOT NULL,
    model      TEXT NOT NULL,
    entity_id  TEXT NOT NULL,
    action     TEXT NOT NULL,
    synced_at  TEXT NOT NULL,

    FOREIGN KEY (session_id) REFERENCES sync_sessions(id) ON DELETE CASCADE
);
"#;

pub fn up(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(UP_SQL)
}

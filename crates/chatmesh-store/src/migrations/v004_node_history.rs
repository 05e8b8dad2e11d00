//! v004 -- Heartbeat history and the system log.
//!
//! Heartbeat rows go with their endpoint. Log rows outlive it, so
//! `system_logs.node_id` is a plain column.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS node_heartbeats (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    node_id            TEXT NOT NULL,
    status             TEXT NOT NULL,
    load               REAL NOT NULL DEFAULT 0,
    current_rooms      INTEGER NOT NULL DEFAULT 0,
    active_connections INTEGER,
    cpu_usage          REAL,
    memory_usage       REAL,
    disk_usage         REAL,
    received_at        TEXT NOT NULL,

    FOREIGN KEY (node_id) REFERENCES node_endpoints(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_node_heartbeats_node
    ON node_heartbeats(node_id, received_at);

CREATE TABLE IF NOT EXISTS system_logs (
    id         TEXT PRIMARY KEY NOT NULL,
    level      TEXT NOT NULL,
    category   TEXT NOT NULL,
    message    TEXT NOT NULL,
    details    TEXT,
    node_id    TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_system_logs_created ON system_logs(created_at);
"#;

pub fn up(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(UP_SQL)
}

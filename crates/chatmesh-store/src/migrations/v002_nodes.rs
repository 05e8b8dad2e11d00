//! v002 -- Node endpoints and registration requests.
//!
//! On the hub `node_endpoints` is the registry of approved nodes. On a node
//! the same table holds the peers pushed by the hub plus the node's own
//! identity row.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS node_endpoints (
    id                 TEXT PRIMARY KEY NOT NULL,
    name               TEXT NOT NULL UNIQUE,
    url                TEXT NOT NULL UNIQUE,
    status             TEXT NOT NULL DEFAULT 'offline',
    load               REAL NOT NULL DEFAULT 0,
    current_rooms      INTEGER NOT NULL DEFAULT 0,
    max_rooms          INTEGER NOT NULL DEFAULT 50,
    last_heartbeat     TEXT,
    api_key            TEXT NOT NULL UNIQUE,
    sync_enabled       INTEGER NOT NULL DEFAULT 1,
    auto_sync_interval INTEGER NOT NULL DEFAULT 300,
    last_sync          TEXT,
    created_at         TEXT NOT NULL,
    updated_at         TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_node_endpoints_status ON node_endpoints(status);

CREATE TABLE IF NOT EXISTS node_registrations (
    id                 TEXT PRIMARY KEY NOT NULL,
    node_name          TEXT NOT NULL UNIQUE,
    node_url           TEXT NOT NULL,
    admin_email        TEXT NOT NULL DEFAULT '',
    description        TEXT NOT NULL DEFAULT '',
    max_rooms_capacity INTEGER NOT NULL DEFAULT 50,
    status             TEXT NOT NULL DEFAULT 'pending',
    approved_by        TEXT,
    approved_at        TEXT,
    endpoint_id        TEXT,
    created_at         TEXT NOT NULL,
    updated_at         TEXT NOT NULL
);
"#;

pub fn up(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(UP_SQL)
}

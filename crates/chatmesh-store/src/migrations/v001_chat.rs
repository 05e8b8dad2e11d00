//! v001 -- Replicated chat entities.
//!
//! Every table is keyed by a globally unique UUID and carries `updated_at`,
//! which drives incremental resync and the optional timestamp conflict
//! policy.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id            TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    username      TEXT NOT NULL UNIQUE,
    email         TEXT NOT NULL DEFAULT '',
    password_hash TEXT NOT NULL DEFAULT '',
    bio           TEXT NOT NULL DEFAULT '',
    is_online     INTEGER NOT NULL DEFAULT 0,
    last_seen     TEXT,
    created_at    TEXT NOT NULL,              -- RFC-3339, UTC
    updated_at    TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Chat rooms
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chat_rooms (
    id          TEXT PRIMARY KEY NOT NULL,
    name        TEXT NOT NULL,
    description TEXT,
    room_type   TEXT NOT NULL DEFAULT 'public',
    node_id     TEXT,                         -- hosting node, not a FK
    created_by  TEXT NOT NULL,
    is_active   INTEGER NOT NULL DEFAULT 1,
    max_members INTEGER NOT NULL DEFAULT 100,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL,

    FOREIGN KEY (created_by) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_chat_rooms_node ON chat_rooms(node_id, is_active);

-- ----------------------------------------------------------------
-- Room memberships
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS room_memberships (
    id         TEXT PRIMARY KEY NOT NULL,
    room_id    TEXT NOT NULL,
    user_id    TEXT NOT NULL,
    role       TEXT NOT NULL DEFAULT 'member',
    joined_at  TEXT NOT NULL,
    last_read  TEXT,
    updated_at TEXT NOT NULL,

    UNIQUE (room_id, user_id),
    FOREIGN KEY (room_id) REFERENCES chat_rooms(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id           TEXT PRIMARY KEY NOT NULL,
    room_id      TEXT NOT NULL,
    sender_id    TEXT NOT NULL,
    content      TEXT NOT NULL,
    message_type TEXT NOT NULL DEFAULT 'text',
    is_edited    INTEGER NOT NULL DEFAULT 0,
    is_deleted   INTEGER NOT NULL DEFAULT 0,
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL,

    FOREIGN KEY (room_id) REFERENCES chat_rooms(id) ON DELETE CASCADE,
    FOREIGN KEY (sender_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_room_created ON messages(room_id, created_at);

-- ----------------------------------------------------------------
-- Read receipts
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS message_read_status (
    id         TEXT PRIMARY KEY NOT NULL,
    message_id TEXT NOT NULL,
    user_id    TEXT NOT NULL,
    read_at    TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    UNIQUE (message_id, user_id),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- User sessions
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS user_sessions (
    id            TEXT PRIMARY KEY NOT NULL,
    user_id       TEXT NOT NULL,
    session_key   TEXT NOT NULL UNIQUE,
    ip_address    TEXT,
    user_agent    TEXT,
    node_id       TEXT,
    last_activity TEXT NOT NULL,
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL,

    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_users_updated        ON users(updated_at);
CREATE INDEX IF NOT EXISTS idx_chat_rooms_updated   ON chat_rooms(updated_at);
CREATE INDEX IF NOT EXISTS idx_memberships_updated  ON room_memberships(updated_at);
CREATE INDEX IF NOT EXISTS idx_messages_updated     ON messages(updated_at);
CREATE INDEX IF NOT EXISTS idx_read_status_updated  ON message_read_status(updated_at);
CREATE INDEX IF NOT EXISTS idx_sessions_updated     ON user_sessions(updated_at);
"#;

/// Apply the v001 migration.
pub fn up(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(UP_SQL)
}

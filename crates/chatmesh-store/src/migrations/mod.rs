//! Database migration runner.
//!
//! Migrations are executed in order on every [`Database::open_at`] call.
//! Each migration is guarded by a `user_version` pragma so it runs exactly
//! once.
//!
//! [`Database::open_at`]: crate::Database::open_at

pub mod v001_chat;
pub mod v002_nodes;
pub mod v003_sync_audit;
pub mod v004_node_history;

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.  Bump this and add a new migration module whenever
/// the schema changes.
const CURRENT_VERSION: u32 = 4;

type Step = fn(&Connection) -> rusqlite::Result<()>;

const STEPS: [(u32, &str, Step); 4] = [
    (1, "v001_chat", v001_chat::up),
    (2, "v002_nodes", v002_nodes::up),
    (3, "v003_sync_audit", v003_sync_audit::up),
    (4, "v004_node_history", v004_node_history::up),
];

/// Run all pending migrations against the open connection.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    tracing::info!(
        current_version = current,
        target_version = CURRENT_VERSION,
        "checking database migrations"
    );

    for (version, name, up) in STEPS {
        if current < version {
            tracing::info!(migration = name, "applying migration");
            up(conn).map_err(|e| StoreError::Migration(format!("{name}: {e}")))?;
            conn.pragma_update(None, "user_version", version)?;
        }
    }

    Ok(())
}

//! CRUD operations for [`UserSession`] records.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::Result;
use crate::models::UserSession;
use crate::row;

const COLUMNS: &str = "id, user_id, session_key, ip_address, user_agent, node_id,
                       last_activity, created_at, updated_at";

impl Database {
    /// Insert or overwrite a session keyed by id. A session holding the same
    /// `session_key` under another id is replaced.
    pub fn upsert_session(&self, session: &UserSession) -> Result<()> {
        self.conn().execute(
            "DELETE FROM user_sessions WHERE session_key = ?1 AND id <> ?2",
            params![session.session_key, session.id.to_string()],
        )?;
        self.conn().execute(
            "INSERT INTO user_sessions (id, user_id, session_key, ip_address, user_agent,
                                        node_id, last_activity, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                user_id       = excluded.user_id,
                session_key   = excluded.session_key,
                ip_address    = excluded.ip_address,
                user_agent    = excluded.user_agent,
                node_id       = excluded.node_id,
                last_activity = excluded.last_activity,
                created_at    = excluded.created_at,
                updated_at    = excluded.updated_at",
            params![
                session.id.to_string(),
                session.user_id.to_string(),
                session.session_key,
                session.ip_address,
                session.user_agent,
                session.node_id.map(|n| n.to_string()),
                row::fmt_ts(&session.last_activity),
                row::fmt_ts(&session.created_at),
                row::fmt_ts(&session.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn find_session(&self, id: Uuid) -> Result<Option<UserSession>> {
        row::optional(self.conn().query_row(
            &format!("SELECT {COLUMNS} FROM user_sessions WHERE id = ?1"),
            params![id.to_string()],
            row_to_session,
        ))
    }

    pub fn list_sessions_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<UserSession>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {COLUMNS} FROM user_sessions
             WHERE ?1 IS NULL OR updated_at > ?1
             ORDER BY updated_at ASC"
        ))?;

        let rows = stmt.query_map(params![row::fmt_opt_ts(&since)], row_to_session)?;

        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?);
        }
        Ok(sessions)
    }

    pub fn delete_session(&self, id: Uuid) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM user_sessions WHERE id = ?1", params![id.to_string()])?;
        Ok(affected > 0)
    }
}

fn row_to_session(r: &rusqlite::Row<'_>) -> rusqlite::Result<UserSession> {
    Ok(UserSession {
        id: row::uuid(r, 0)?,
        user_id: row::uuid(r, 1)?,
        session_key: r.get(2)?,
        ip_address: r.get(3)?,
        user_agent: r.get(4)?,
        node_id: row::opt_uuid(r, 5)?,
        last_activity: row::ts(r, 6)?,
        created_at: row::ts(r, 7)?,
        updated_at: row::ts(r, 8)?,
    })
}

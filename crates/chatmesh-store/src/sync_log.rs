//! Sync sessions and per-entity operation logs.
//!
//! Append-only audit trail. Nothing in the replication path reads it back.

use chatmesh_shared::{ModelKind, SessionStatus, SyncAction};
use chrono::Utc;
use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{SyncOperationLog, SyncSession};
use crate::row;

const SESSION_COLUMNS: &str = "id, source_node_id, target_node_id, status, sync_type,
                               records_synced, started_at, completed_at";

impl Database {
    /// Persist a new session in `in_progress`.
    pub fn open_sync_session(
        &self,
        source_node_id: Option<Uuid>,
        target_node_id: Option<Uuid>,
        sync_type: &str,
    ) -> Result<SyncSession> {
        let session = SyncSession {
            id: Uuid::new_v4(),
            source_node_id,
            target_node_id,
            status: SessionStatus::InProgress,
            sync_type: sync_type.to_string(),
            records_synced: 0,
            started_at: Utc::now(),
            completed_at: None,
        };

        self.conn().execute(
            &format!("INSERT INTO sync_sessions ({SESSION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
            params![
                session.id.to_string(),
                session.source_node_id.map(|id| id.to_string()),
                session.target_node_id.map(|id| id.to_string()),
                session.status.as_str(),
                session.sync_type,
                session.records_synced,
                row::fmt_ts(&session.started_at),
                row::fmt_opt_ts(&session.completed_at),
            ],
        )?;
        Ok(session)
    }

    /// Finalize a session with its terminal status and synced count.
    pub fn close_sync_session(
        &self,
        id: Uuid,
        status: SessionStatus,
        records_synced: i64,
    ) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE sync_sessions
             SET status = ?2, records_synced = ?3, completed_at = ?4
             WHERE id = ?1",
            params![
                id.to_string(),
                status.as_str(),
                records_synced,
                row::fmt_ts(&Utc::now()),
            ],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub fn get_sync_session(&self, id: Uuid) -> Result<SyncSession> {
        row::required(self.conn().query_row(
            &format!("SELECT {SESSION_COLUMNS} FROM sync_sessions WHERE id = ?1"),
            params![id.to_string()],
            row_to_session,
        ))
    }

    /// Most recent sessions first.
    pub fn list_sync_sessions(&self, limit: u32) -> Result<Vec<SyncSession>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM sync_sessions ORDER BY started_at DESC LIMIT ?1"
        ))?;

        let rows = stmt.query_map(params![limit], row_to_session)?;

        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?);
        }
        Ok(sessions)
    }

    pub fn log_sync_operation(
        &self,
        session_id: Uuid,
        model: ModelKind,
        entity_id: &str,
        action: SyncAction,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO sync_operation_logs (id, session_id, model, entity_id, action, synced_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                Uuid::new_v4().to_string(),
                session_id.to_string(),
                model.as_str(),
                entity_id,
                action.as_str(),
                row::fmt_ts(&Utc::now()),
            ],
        )?;
        Ok(())
    }

    pub fn list_sync_operations(&self, session_id: Uuid) -> Result<Vec<SyncOperationLog>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, session_id, model, entity_id, action, synced_at
             FROM sync_operation_logs
             WHERE session_id = ?1
             ORDER BY synced_at ASC, rowid ASC",
        )?;

        let rows = stmt.query_map(params![session_id.to_string()], |r| {
            Ok(SyncOperationLog {
                id: row::uuid(r, 0)?,
                session_id: row::uuid(r, 1)?,
                model: row::parsed(r, 2)?,
                entity_id: r.get(3)?,
                action: row::parsed(r, 4)?,
                synced_at: row::ts(r, 5)?,
            })
        })?;

        let mut ops = Vec::new();
        for row in rows {
            ops.push(row?);
        }
        Ok(ops)
    }
}

fn row_to_session(r: &rusqlite::Row<'_>) -> rusqlite::Result<SyncSession> {
    Ok(SyncSession {
        id: row::uuid(r, 0)?,
        source_node_id: row::opt_uuid(r, 1)?,
        target_node_id: row::opt_uuid(r, 2)?,
        status: row::parsed(r, 3)?,
        sync_type: r.get(4)?,
        records_synced: r.get(5)?,
        started_at: row::ts(r, 6)?,
        completed_at: row::opt_ts(r, 7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_lifecycle() {
        let db = Database::open_in_memory().unwrap();
        let source = Uuid::new_v4();
        let session = db.open_sync_session(Some(source), None, "incremental").unwrap();
        assert_eq!(session.status, SessionStatus::InProgress);

        db.log_sync_operation(session.id, ModelKind::Message, "m-1", SyncAction::Create)
            .unwrap();
        db.log_sync_operation(session.id, ModelKind::Message, "m-2", SyncAction::Delete)
            .unwrap();
        db.close_sync_session(session.id, SessionStatus::Completed, 2)
            .unwrap();

        let closed = db.get_sync_session(session.id).unwrap();
        assert_eq!(closed.status, SessionStatus::Completed);
        assert_eq!(closed.records_synced, 2);
        assert!(closed.completed_at.is_some());
        assert_eq!(closed.source_node_id, Some(source));

        let ops = db.list_sync_operations(session.id).unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[1].action, SyncAction::Delete);
    }

    #[test]
    fn test_closing_unknown_session_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let err = db
            .close_sync_session(Uuid::new_v4(), SessionStatus::Failed, 0)
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }
}

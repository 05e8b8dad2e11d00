//! CRUD operations for [`MessageReadStatus`] records.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::Result;
use crate::models::MessageReadStatus;
use crate::row;

const COLUMNS: &str = "id, message_id, user_id, read_at, updated_at";

impl Database {
    /// Insert or overwrite a read receipt keyed by id. A receipt for the same
    /// (message, user) pair under another id is replaced.
    pub fn upsert_read_status(&self, status: &MessageReadStatus) -> Result<()> {
        self.conn().execute(
            "DELETE FROM message_read_status
             WHERE message_id = ?1 AND user_id = ?2 AND id <> ?3",
            params![
                status.message_id.to_string(),
                status.user_id.to_string(),
                status.id.to_string(),
            ],
        )?;
        self.conn().execute(
            "INSERT INTO message_read_status (id, message_id, user_id, read_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                message_id = excluded.message_id,
                user_id    = excluded.user_id,
                read_at    = excluded.read_at,
                updated_at = excluded.updated_at",
            params![
                status.id.to_string(),
                status.message_id.to_string(),
                status.user_id.to_string(),
                row::fmt_ts(&status.read_at),
                row::fmt_ts(&status.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn find_read_status(&self, id: Uuid) -> Result<Option<MessageReadStatus>> {
        row::optional(self.conn().query_row(
            &format!("SELECT {COLUMNS} FROM message_read_status WHERE id = ?1"),
            params![id.to_string()],
            row_to_read_status,
        ))
    }

    pub fn list_read_statuses_since(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<MessageReadStatus>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {COLUMNS} FROM message_read_status
             WHERE ?1 IS NULL OR updated_at > ?1
             ORDER BY updated_at ASC"
        ))?;

        let rows = stmt.query_map(params![row::fmt_opt_ts(&since)], row_to_read_status)?;

        let mut statuses = Vec::new();
        for row in rows {
            statuses.push(row?);
        }
        Ok(statuses)
    }

    pub fn delete_read_status(&self, id: Uuid) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM message_read_status WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_read_status(r: &rusqlite::Row<'_>) -> rusqlite::Result<MessageReadStatus> {
    Ok(MessageReadStatus {
        id: row::uuid(r, 0)?,
        message_id: row::uuid(r, 1)?,
        user_id: row::uuid(r, 2)?,
        read_at: row::ts(r, 3)?,
        updated_at: row::ts(r, 4)?,
    })
}

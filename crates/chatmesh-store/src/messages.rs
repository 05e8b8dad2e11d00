use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::Result;
use crate::models::Message;
use crate::row;

const COLUMNS: &str = "id, room_id, sender_id, content, message_type, is_edited, is_deleted,
                       created_at, updated_at";

impl Database {
    pub fn upsert_message(&self, message: &Message) -> Result<()> {
        self.conn().execute(
            "INSERT INTO messages (id, room_id, sender_id, content, message_type,
                                   is_edited, is_deleted, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                room_id      = excluded.room_id,
                sender_id    = excluded.sender_id,
                content      = excluded.content,
                message_type = excluded.message_type,
                is_edited    = excluded.is_edited,
                is_deleted   = excluded.is_deleted,
                created_at   = excluded.created_at,
                updated_at   = excluded.updated_at",
            params![
                message.id.to_string(),
                message.room_id.to_string(),
                message.sender_id.to_string(),
                message.content,
                message.message_type,
                message.is_edited,
                message.is_deleted,
                row::fmt_ts(&message.created_at),
                row::fmt_ts(&message.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_message(&self, id: Uuid) -> Result<Message> {
        row::required(self.conn().query_row(
            &format!("SELECT {COLUMNS} FROM messages WHERE id = ?1"),
            params![id.to_string()],
            row_to_message,
        ))
    }

    pub fn find_message(&self, id: Uuid) -> Result<Option<Message>> {
        row::optional(self.conn().query_row(
            &format!("SELECT {COLUMNS} FROM messages WHERE id = ?1"),
            params![id.to_string()],
            row_to_message,
        ))
    }

    pub fn message_exists(&self, id: Uuid) -> Result<bool> {
        let found: i64 = self.conn().query_row(
            "SELECT EXISTS(SELECT 1 FROM messages WHERE id = ?1)",
            params![id.to_string()],
            |r| r.get(0),
        )?;
        Ok(found != 0)
    }

    /// Messages of one room, oldest first.
    pub fn get_messages_for_room(
        &self,
        room_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {COLUMNS} FROM messages
             WHERE room_id = ?1
             ORDER BY created_at ASC
             LIMIT ?2 OFFSET ?3"
        ))?;

        let rows = stmt.query_map(params![room_id.to_string(), limit, offset], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    pub fn list_messages_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {COLUMNS} FROM messages
             WHERE ?1 IS NULL OR updated_at > ?1
             ORDER BY updated_at ASC"
        ))?;

        let rows = stmt.query_map(params![row::fmt_opt_ts(&since)], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    pub fn delete_message(&self, id: Uuid) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM messages WHERE id = ?1", params![id.to_string()])?;
        Ok(affected > 0)
    }
}

fn row_to_message(r: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row::uuid(r, 0)?,
        room_id: row::uuid(r, 1)?,
        sender_id: row::uuid(r, 2)?,
        content: r.get(3)?,
        message_type: r.get(4)?,
        is_edited: r.get(5)?,
        is_deleted: r.get(6)?,
        created_at: row::ts(r, 7)?,
        updated_at: row::ts(r, 8)?,
    })
}

//! CRUD operations for [`ChatRoom`] records.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::Result;
use crate::models::ChatRoom;
use crate::row;

const COLUMNS: &str = "id, name, description, room_type, node_id, created_by, is_active,
                       max_members, created_at, updated_at";

impl Database {
    // ------------------------------------------------------------------
    // Write
    // ------------------------------------------------------------------

    /// Insert or overwrite a room keyed by id.
    pub fn upsert_room(&self, room: &ChatRoom) -> Result<()> {
        self.conn().execute(
            "INSERT INTO chat_rooms (id, name, description, room_type, node_id, created_by,
                                     is_active, max_members, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                name        = excluded.name,
                description = excluded.description,
                room_type   = excluded.room_type,
                node_id     = excluded.node_id,
                created_by  = excluded.created_by,
                is_active   = excluded.is_active,
                max_members = excluded.max_members,
                created_at  = excluded.created_at,
                updated_at  = excluded.updated_at",
            params![
                room.id.to_string(),
                room.name,
                room.description,
                room.room_type,
                room.node_id.map(|n| n.to_string()),
                room.created_by.to_string(),
                room.is_active,
                room.max_members,
                row::fmt_ts(&room.created_at),
                row::fmt_ts(&room.updated_at),
            ],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single room by UUID.
    pub fn get_room(&self, id: Uuid) -> Result<ChatRoom> {
        row::required(self.conn().query_row(
            &format!("SELECT {COLUMNS} FROM chat_rooms WHERE id = ?1"),
            params![id.to_string()],
            row_to_room,
        ))
    }

    pub fn find_room(&self, id: Uuid) -> Result<Option<ChatRoom>> {
        row::optional(self.conn().query_row(
            &format!("SELECT {COLUMNS} FROM chat_rooms WHERE id = ?1"),
            params![id.to_string()],
            row_to_room,
        ))
    }

    pub fn room_exists(&self, id: Uuid) -> Result<bool> {
        let found: i64 = self.conn().query_row(
            "SELECT EXISTS(SELECT 1 FROM chat_rooms WHERE id = ?1)",
            params![id.to_string()],
            |r| r.get(0),
        )?;
        Ok(found != 0)
    }

    /// Rooms modified after `since` (all rooms when `None`), oldest first.
    pub fn list_rooms_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<ChatRoom>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {COLUMNS} FROM chat_rooms
             WHERE ?1 IS NULL OR updated_at > ?1
             ORDER BY updated_at ASC"
        ))?;

        let rows = stmt.query_map(params![row::fmt_opt_ts(&since)], row_to_room)?;

        let mut rooms = Vec::new();
        for row in rows {
            rooms.push(row?);
        }
        Ok(rooms)
    }

    /// Number of active rooms hosted by `node_id`, or by anyone when `None`.
    pub fn count_active_rooms(&self, node_id: Option<Uuid>) -> Result<i64> {
        let count = self.conn().query_row(
            "SELECT COUNT(*) FROM chat_rooms
             WHERE is_active = 1 AND (?1 IS NULL OR node_id = ?1)",
            params![node_id.map(|n| n.to_string())],
            |r| r.get(0),
        )?;
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a room and, by cascade, its memberships and messages.
    pub fn delete_room(&self, id: Uuid) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM chat_rooms WHERE id = ?1", params![id.to_string()])?;
        Ok(affected > 0)
    }
}

fn row_to_room(r: &rusqlite::Row<'_>) -> rusqlite::Result<ChatRoom> {
    Ok(ChatRoom {
        id: row::uuid(r, 0)?,
        name: r.get(1)?,
        description: r.get(2)?,
        room_type: r.get(3)?,
        node_id: row::opt_uuid(r, 4)?,
        created_by: row::uuid(r, 5)?,
        is_active: r.get(6)?,
        max_members: r.get(7)?,
        created_at: row::ts(r, 8)?,
        updated_at: row::ts(r, 9)?,
    })
}

//! CRUD operations for [`RoomMembership`] records.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::Result;
use crate::models::RoomMembership;
use crate::row;

const COLUMNS: &str = "id, room_id, user_id, role, joined_at, last_read, updated_at";

impl Database {
    /// Insert or overwrite a membership keyed by id.
    ///
    /// Two nodes may add the same user to the same room concurrently under
    /// different ids; the row arriving last replaces the other one.
    pub fn upsert_membership(&self, membership: &RoomMembership) -> Result<()> {
        self.conn().execute(
            "DELETE FROM room_memberships WHERE room_id = ?1 AND user_id = ?2 AND id <> ?3",
            params![
                membership.room_id.to_string(),
                membership.user_id.to_string(),
                membership.id.to_string(),
            ],
        )?;
        self.conn().execute(
            "INSERT INTO room_memberships (id, room_id, user_id, role, joined_at, last_read,
                                           updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                room_id    = excluded.room_id,
                user_id    = excluded.user_id,
                role       = excluded.role,
                joined_at  = excluded.joined_at,
                last_read  = excluded.last_read,
                updated_at = excluded.updated_at",
            params![
                membership.id.to_string(),
                membership.room_id.to_string(),
                membership.user_id.to_string(),
                membership.role,
                row::fmt_ts(&membership.joined_at),
                row::fmt_opt_ts(&membership.last_read),
                row::fmt_ts(&membership.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_membership(&self, id: Uuid) -> Result<RoomMembership> {
        row::required(self.conn().query_row(
            &format!("SELECT {COLUMNS} FROM room_memberships WHERE id = ?1"),
            params![id.to_string()],
            row_to_membership,
        ))
    }

    pub fn find_membership(&self, id: Uuid) -> Result<Option<RoomMembership>> {
        row::optional(self.conn().query_row(
            &format!("SELECT {COLUMNS} FROM room_memberships WHERE id = ?1"),
            params![id.to_string()],
            row_to_membership,
        ))
    }

    pub fn list_members_of_room(&self, room_id: Uuid) -> Result<Vec<RoomMembership>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {COLUMNS} FROM room_memberships WHERE room_id = ?1 ORDER BY joined_at ASC"
        ))?;

        let rows = stmt.query_map(params![room_id.to_string()], row_to_membership)?;

        let mut members = Vec::new();
        for row in rows {
            members.push(row?);
        }
        Ok(members)
    }

    pub fn list_memberships_since(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RoomMembership>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {COLUMNS} FROM room_memberships
             WHERE ?1 IS NULL OR updated_at > ?1
             ORDER BY updated_at ASC"
        ))?;

        let rows = stmt.query_map(params![row::fmt_opt_ts(&since)], row_to_membership)?;

        let mut members = Vec::new();
        for row in rows {
            members.push(row?);
        }
        Ok(members)
    }

    pub fn delete_membership(&self, id: Uuid) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM room_memberships WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_membership(r: &rusqlite::Row<'_>) -> rusqlite::Result<RoomMembership> {
    Ok(RoomMembership {
        id: row::uuid(r, 0)?,
        room_id: row::uuid(r, 1)?,
        user_id: row::uuid(r, 2)?,
        role: r.get(3)?,
        joined_at: row::ts(r, 4)?,
        last_read: row::opt_ts(r, 5)?,
        updated_at: row::ts(r, 6)?,
    })
}

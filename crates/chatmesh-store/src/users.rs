//! CRUD operations for [`User`] records.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::User;
use crate::row;

const COLUMNS: &str =
    "id, username, email, password_hash, bio, is_online, last_seen, created_at, updated_at";

impl Database {
    // ------------------------------------------------------------------
    // Write
    // ------------------------------------------------------------------

    /// Insert or overwrite a user keyed by id.
    ///
    /// Fails with [`StoreError::Conflict`] when another id already owns the
    /// username, since replacing that row would cascade into its rooms.
    pub fn upsert_user(&self, user: &User) -> Result<()> {
        let owner: Option<String> = row::optional(self.conn().query_row(
            "SELECT id FROM users WHERE username = ?1 AND id <> ?2",
            params![user.username, user.id.to_string()],
            |r| r.get(0),
        ))?;
        if let Some(owner) = owner {
            return Err(StoreError::Conflict(format!(
                "username '{}' belongs to user {owner}",
                user.username
            )));
        }

        self.conn().execute(
            "INSERT INTO users (id, username, email, password_hash, bio, is_online,
                                last_seen, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                username      = excluded.username,
                email         = excluded.email,
                password_hash = excluded.password_hash,
                bio           = excluded.bio,
                is_online     = excluded.is_online,
                last_seen     = excluded.last_seen,
                created_at    = excluded.created_at,
                updated_at    = excluded.updated_at",
            params![
                user.id.to_string(),
                user.username,
                user.email,
                user.password_hash,
                user.bio,
                user.is_online,
                row::fmt_opt_ts(&user.last_seen),
                row::fmt_ts(&user.created_at),
                row::fmt_ts(&user.updated_at),
            ],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_user(&self, id: Uuid) -> Result<User> {
        row::required(self.conn().query_row(
            &format!("SELECT {COLUMNS} FROM users WHERE id = ?1"),
            params![id.to_string()],
            row_to_user,
        ))
    }

    pub fn find_user(&self, id: Uuid) -> Result<Option<User>> {
        row::optional(self.conn().query_row(
            &format!("SELECT {COLUMNS} FROM users WHERE id = ?1"),
            params![id.to_string()],
            row_to_user,
        ))
    }

    pub fn user_exists(&self, id: Uuid) -> Result<bool> {
        let found: i64 = self.conn().query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
            params![id.to_string()],
            |r| r.get(0),
        )?;
        Ok(found != 0)
    }

    /// Users modified after `since` (all users when `None`), oldest first.
    pub fn list_users_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<User>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {COLUMNS} FROM users
             WHERE ?1 IS NULL OR updated_at > ?1
             ORDER BY updated_at ASC"
        ))?;

        let rows = stmt.query_map(params![row::fmt_opt_ts(&since)], row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a user by UUID.  Returns `true` if a row was deleted.
    pub fn delete_user(&self, id: Uuid) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM users WHERE id = ?1", params![id.to_string()])?;
        Ok(affected > 0)
    }
}

fn row_to_user(r: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row::uuid(r, 0)?,
        username: r.get(1)?,
        email: r.get(2)?,
        password_hash: r.get(3)?,
        bio: r.get(4)?,
        is_online: r.get(5)?,
        last_seen: row::opt_ts(r, 6)?,
        created_at: row::ts(r, 7)?,
        updated_at: row::ts(r, 8)?,
    })
}

//! CRUD operations for [`NodeRegistration`] records.

use chatmesh_shared::RegistrationStatus;
use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::NodeRegistration;
use crate::row;

const COLUMNS: &str = "id, node_name, node_url, admin_email, description, max_rooms_capacity,
                       status, approved_by, approved_at, endpoint_id, created_at, updated_at";

impl Database {
    pub fn insert_registration(&self, reg: &NodeRegistration) -> Result<()> {
        self.conn().execute(
            &format!(
                "INSERT INTO node_registrations ({COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
            ),
            params![
                reg.id.to_string(),
                reg.node_name,
                reg.node_url,
                reg.admin_email,
                reg.description,
                reg.max_rooms_capacity,
                reg.status.as_str(),
                reg.approved_by,
                row::fmt_opt_ts(&reg.approved_at),
                reg.endpoint_id.map(|id| id.to_string()),
                row::fmt_ts(&reg.created_at),
                row::fmt_ts(&reg.updated_at),
            ],
        )?;
        Ok(())
    }

    /// Persist a status transition.
    pub fn update_registration(&self, reg: &NodeRegistration) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE node_registrations
             SET status = ?2, approved_by = ?3, approved_at = ?4, endpoint_id = ?5,
                 updated_at = ?6
             WHERE id = ?1",
            params![
                reg.id.to_string(),
                reg.status.as_str(),
                reg.approved_by,
                row::fmt_opt_ts(&reg.approved_at),
                reg.endpoint_id.map(|id| id.to_string()),
                row::fmt_ts(&reg.updated_at),
            ],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Put the registration that produced `endpoint_id` back to `pending`
    /// so the slot can be approved again. Returns `false` if none matched.
    pub fn reset_registration_for_endpoint(&self, endpoint_id: Uuid) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE node_registrations
             SET status = 'pending', approved_by = NULL, approved_at = NULL,
                 endpoint_id = NULL, updated_at = ?2
             WHERE endpoint_id = ?1",
            params![
                endpoint_id.to_string(),
                row::fmt_ts(&chrono::Utc::now())
            ],
        )?;
        Ok(affected > 0)
    }

    pub fn get_registration(&self, id: Uuid) -> Result<NodeRegistration> {
        row::required(self.conn().query_row(
            &format!("SELECT {COLUMNS} FROM node_registrations WHERE id = ?1"),
            params![id.to_string()],
            row_to_registration,
        ))
    }

    pub fn find_registration_by_name(&self, node_name: &str) -> Result<Option<NodeRegistration>> {
        row::optional(self.conn().query_row(
            &format!("SELECT {COLUMNS} FROM node_registrations WHERE node_name = ?1"),
            params![node_name],
            row_to_registration,
        ))
    }

    /// Registrations, newest first, optionally filtered by status.
    pub fn list_registrations(
        &self,
        status: Option<RegistrationStatus>,
    ) -> Result<Vec<NodeRegistration>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {COLUMNS} FROM node_registrations
             WHERE ?1 IS NULL OR status = ?1
             ORDER BY created_at DESC"
        ))?;

        let rows = stmt.query_map(params![status.map(|s| s.as_str())], row_to_registration)?;

        let mut regs = Vec::new();
        for row in rows {
            regs.push(row?);
        }
        Ok(regs)
    }
}

fn row_to_registration(r: &rusqlite::Row<'_>) -> rusqlite::Result<NodeRegistration> {
    Ok(NodeRegistration {
        id: row::uuid(r, 0)?,
        node_name: r.get(1)?,
        node_url: r.get(2)?,
        admin_email: r.get(3)?,
        description: r.get(4)?,
        max_rooms_capacity: r.get(5)?,
        status: row::parsed(r, 6)?,
        approved_by: r.get(7)?,
        approved_at: row::opt_ts(r, 8)?,
        endpoint_id: row::opt_uuid(r, 9)?,
        created_at: row::ts(r, 10)?,
        updated_at: row::ts(r, 11)?,
    })
}

//! CRUD operations for [`NodeEndpoint`] records.
//!
//! The endpoint table is read on every inbound sync (key lookup) and every
//! outbound fan-out (target selection), and written by heartbeats and the
//! liveness sweep.

use chatmesh_shared::NodeStatus;
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter};
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::NodeEndpoint;
use crate::row;

const COLUMNS: &str = "id, name, url, status, load, current_rooms, max_rooms, last_heartbeat,
                       api_key, sync_enabled, auto_sync_interval, last_sync, created_at,
                       updated_at";

impl Database {
    // ------------------------------------------------------------------
    // Write
    // ------------------------------------------------------------------

    /// Insert a new endpoint. Fails if the name, URL or key is taken.
    pub fn insert_endpoint(&self, endpoint: &NodeEndpoint) -> Result<()> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO node_endpoints ({COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
                ),
                params_from_iter(endpoint_params(endpoint)),
            )
            .map_err(|e| taken(e, format!("endpoint '{}' already exists", endpoint.name)))?;
        Ok(())
    }

    /// Overwrite an existing endpoint in place. Unlike [`upsert_endpoint`],
    /// a name, URL or key held by another endpoint is a `Conflict` and
    /// nothing is dropped.
    ///
    /// [`upsert_endpoint`]: Database::upsert_endpoint
    pub fn update_endpoint(&self, endpoint: &NodeEndpoint) -> Result<()> {
        let affected = self
            .conn()
            .execute(
                "UPDATE node_endpoints
                 SET name = ?2, url = ?3, status = ?4, load = ?5, current_rooms = ?6,
                     max_rooms = ?7, last_heartbeat = ?8, api_key = ?9, sync_enabled = ?10,
                     auto_sync_interval = ?11, last_sync = ?12, updated_at = ?14
                 WHERE id = ?1",
                params_from_iter(endpoint_params(endpoint)),
            )
            .map_err(|e| {
                taken(
                    e,
                    format!("name, URL or key of '{}' is used by another node", endpoint.name),
                )
            })?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Insert or overwrite an endpoint keyed by id.
    ///
    /// Used when the hub pushes topology to a node: a stale row carrying the
    /// same name or URL under another id is dropped first.
    pub fn upsert_endpoint(&self, endpoint: &NodeEndpoint) -> Result<()> {
        self.conn().execute(
            "DELETE FROM node_endpoints
             WHERE (name = ?1 OR url = ?2 OR api_key = ?3) AND id <> ?4",
            params![
                endpoint.name,
                endpoint.url,
                endpoint.api_key,
                endpoint.id.to_string()
            ],
        )?;
        self.conn().execute(
            &format!(
                "INSERT INTO node_endpoints ({COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                 ON CONFLICT(id) DO UPDATE SET
                    name               = excluded.name,
                    url                = excluded.url,
                    status             = excluded.status,
                    load               = excluded.load,
                    current_rooms      = excluded.current_rooms,
                    max_rooms          = excluded.max_rooms,
                    last_heartbeat     = excluded.last_heartbeat,
                    api_key            = excluded.api_key,
                    sync_enabled       = excluded.sync_enabled,
                    auto_sync_interval = excluded.auto_sync_interval,
                    last_sync          = excluded.last_sync,
                    updated_at         = excluded.updated_at"
            ),
            params_from_iter(endpoint_params(endpoint)),
        )?;
        Ok(())
    }

    /// Apply one heartbeat. Always brings the endpoint back to the reported
    /// status, which is the only way out of `offline`.
    pub fn record_heartbeat(
        &self,
        id: Uuid,
        status: NodeStatus,
        load: f64,
        current_rooms: i64,
        max_rooms: i64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let stamp = row::fmt_ts(&at);
        let affected = self.conn().execute(
            "UPDATE node_endpoints
             SET status = ?2, load = ?3, current_rooms = ?4, max_rooms = ?5,
                 last_heartbeat = ?6, updated_at = ?6
             WHERE id = ?1",
            params![
                id.to_string(),
                status.as_str(),
                load.clamp(0.0, 100.0),
                current_rooms,
                max_rooms,
                stamp,
            ],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Flip every `online` endpoint whose last heartbeat is older than
    /// `cutoff` (or missing) to `offline`. Returns the names that changed.
    pub fn mark_stale_offline(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        let cutoff = row::fmt_ts(&cutoff);
        let now = row::fmt_ts(&Utc::now());

        let mut stmt = self.conn().prepare(
            "UPDATE node_endpoints
             SET status = 'offline', updated_at = ?2
             WHERE status = 'online' AND (last_heartbeat IS NULL OR last_heartbeat < ?1)
             RETURNING name",
        )?;
        let rows = stmt.query_map(params![cutoff, now], |r| r.get::<_, String>(0))?;

        let mut names = Vec::new();
        for row in rows {
            names.push(row?);
        }
        Ok(names)
    }

    pub fn set_last_sync(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            "UPDATE node_endpoints SET last_sync = ?2 WHERE id = ?1",
            params![id.to_string(), row::fmt_ts(&at)],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_endpoint(&self, id: Uuid) -> Result<NodeEndpoint> {
        row::required(self.conn().query_row(
            &format!("SELECT {COLUMNS} FROM node_endpoints WHERE id = ?1"),
            params![id.to_string()],
            row_to_endpoint,
        ))
    }

    pub fn find_endpoint(&self, id: Uuid) -> Result<Option<NodeEndpoint>> {
        row::optional(self.conn().query_row(
            &format!("SELECT {COLUMNS} FROM node_endpoints WHERE id = ?1"),
            params![id.to_string()],
            row_to_endpoint,
        ))
    }

    pub fn find_endpoint_by_api_key(&self, api_key: &str) -> Result<Option<NodeEndpoint>> {
        row::optional(self.conn().query_row(
            &format!("SELECT {COLUMNS} FROM node_endpoints WHERE api_key = ?1"),
            params![api_key],
            row_to_endpoint,
        ))
    }

    pub fn find_endpoint_by_name(&self, name: &str) -> Result<Option<NodeEndpoint>> {
        row::optional(self.conn().query_row(
            &format!("SELECT {COLUMNS} FROM node_endpoints WHERE name = ?1"),
            params![name],
            row_to_endpoint,
        ))
    }

    /// All endpoints, by name.
    pub fn list_endpoints(&self) -> Result<Vec<NodeEndpoint>> {
        let mut stmt = self
            .conn()
            .prepare(&format!("SELECT {COLUMNS} FROM node_endpoints ORDER BY name ASC"))?;

        let rows = stmt.query_map([], row_to_endpoint)?;

        let mut endpoints = Vec::new();
        for row in rows {
            endpoints.push(row?);
        }
        Ok(endpoints)
    }

    /// Online, sync-enabled endpoints, optionally leaving one out.
    pub fn list_sync_targets(&self, exclude: Option<Uuid>) -> Result<Vec<NodeEndpoint>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {COLUMNS} FROM node_endpoints
             WHERE status = 'online' AND sync_enabled = 1 AND (?1 IS NULL OR id <> ?1)
             ORDER BY name ASC"
        ))?;

        let rows = stmt.query_map(params![exclude.map(|id| id.to_string())], row_to_endpoint)?;

        let mut endpoints = Vec::new();
        for row in rows {
            endpoints.push(row?);
        }
        Ok(endpoints)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    pub fn delete_endpoint(&self, id: Uuid) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM node_endpoints WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(affected > 0)
    }
}

fn taken(e: rusqlite::Error, message: String) -> StoreError {
    match e {
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StoreError::Conflict(message)
        }
        other => StoreError::Sqlite(other),
    }
}

fn endpoint_params(e: &NodeEndpoint) -> Vec<Box<dyn rusqlite::ToSql + '_>> {
    vec![
        Box::new(e.id.to_string()),
        Box::new(e.name.as_str()),
        Box::new(e.url.as_str()),
        Box::new(e.status.as_str()),
        Box::new(e.load),
        Box::new(e.current_rooms),
        Box::new(e.max_rooms),
        Box::new(row::fmt_opt_ts(&e.last_heartbeat)),
        Box::new(e.api_key.as_str()),
        Box::new(e.sync_enabled),
        Box::new(e.auto_sync_interval),
        Box::new(row::fmt_opt_ts(&e.last_sync)),
        Box::new(row::fmt_ts(&e.created_at)),
        Box::new(row::fmt_ts(&e.updated_at)),
    ]
}

fn row_to_endpoint(r: &rusqlite::Row<'_>) -> rusqlite::Result<NodeEndpoint> {
    Ok(NodeEndpoint {
        id: row::uuid(r, 0)?,
        name: r.get(1)?,
        url: r.get(2)?,
        status: row::parsed(r, 3)?,
        load: r.get(4)?,
        current_rooms: r.get(5)?,
        max_rooms: r.get(6)?,
        last_heartbeat: row::opt_ts(r, 7)?,
        api_key: r.get(8)?,
        sync_enabled: r.get(9)?,
        auto_sync_interval: r.get(10)?,
        last_sync: row::opt_ts(r, 11)?,
        created_at: row::ts(r, 12)?,
        updated_at: row::ts(r, 13)?,
    })
}

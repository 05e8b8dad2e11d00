//! Heartbeat history and the system log.
//!
//! Both are written by the hub only. Heartbeats are pruned by age; log
//! entries are kept.

use chatmesh_shared::protocol::SystemMetrics;
use chatmesh_shared::LogLevel;
use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::Result;
use crate::models::{NodeEndpoint, NodeHeartbeat, SystemLog};
use crate::row;

const HEARTBEAT_COLUMNS: &str = "id, node_id, status, load, current_rooms, active_connections,
                                 cpu_usage, memory_usage, disk_usage, received_at";

const LOG_COLUMNS: &str = "id, level, category, message, details, node_id, created_at";

impl Database {
    /// Append a heartbeat row from the endpoint state it produced.
    pub fn record_node_heartbeat(
        &self,
        endpoint: &NodeEndpoint,
        metrics: Option<&SystemMetrics>,
        received_at: DateTime<Utc>,
    ) -> Result<()> {
        let metrics = metrics.cloned().unwrap_or_default();
        self.conn().execute(
            "INSERT INTO node_heartbeats (node_id, status, load, current_rooms, active_connections,
                                          cpu_usage, memory_usage, disk_usage, received_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                endpoint.id.to_string(),
                endpoint.status.as_str(),
                endpoint.load,
                endpoint.current_rooms,
                metrics
                    .active_connections
                    .and_then(|c| i64::try_from(c).ok()),
                metrics.cpu_usage,
                metrics.memory_usage,
                metrics.disk_usage,
                row::fmt_ts(&received_at),
            ],
        )?;
        Ok(())
    }

    /// Latest heartbeats of one node, newest first.
    pub fn list_node_heartbeats(&self, node_id: Uuid, limit: u32) -> Result<Vec<NodeHeartbeat>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {HEARTBEAT_COLUMNS} FROM node_heartbeats
             WHERE node_id = ?1
             ORDER BY received_at DESC, id DESC
             LIMIT ?2"
        ))?;

        let rows = stmt.query_map(params![node_id.to_string(), limit], row_to_heartbeat)?;

        let mut beats = Vec::new();
        for row in rows {
            beats.push(row?);
        }
        Ok(beats)
    }

    pub fn count_node_heartbeats(&self, node_id: Uuid) -> Result<i64> {
        Ok(self.conn().query_row(
            "SELECT COUNT(*) FROM node_heartbeats WHERE node_id = ?1",
            params![node_id.to_string()],
            |r| r.get(0),
        )?)
    }

    /// Drop heartbeats received before `before`. Returns how many went.
    pub fn prune_node_heartbeats(&self, before: DateTime<Utc>) -> Result<usize> {
        Ok(self.conn().execute(
            "DELETE FROM node_heartbeats WHERE received_at < ?1",
            params![row::fmt_ts(&before)],
        )?)
    }

    pub fn log_event(
        &self,
        level: LogLevel,
        category: &str,
        message: &str,
        details: Option<&str>,
        node_id: Option<Uuid>,
    ) -> Result<SystemLog> {
        let entry = SystemLog {
            id: Uuid::new_v4(),
            level,
            category: category.to_string(),
            message: message.to_string(),
            details: details.map(str::to_string),
            node_id,
            created_at: Utc::now(),
        };

        self.conn().execute(
            &format!("INSERT INTO system_logs ({LOG_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
            params![
                entry.id.to_string(),
                entry.level.as_str(),
                entry.category,
                entry.message,
                entry.details,
                entry.node_id.map(|id| id.to_string()),
                row::fmt_ts(&entry.created_at),
            ],
        )?;
        Ok(entry)
    }

    /// Most recent entries first.
    pub fn list_system_logs(&self, limit: u32) -> Result<Vec<SystemLog>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {LOG_COLUMNS} FROM system_logs ORDER BY created_at DESC, rowid DESC LIMIT ?1"
        ))?;

        let rows = stmt.query_map(params![limit], |r| {
            Ok(SystemLog {
                id: row::uuid(r, 0)?,
                level: row::parsed(r, 1)?,
                category: r.get(2)?,
                message: r.get(3)?,
                details: r.get(4)?,
                node_id: row::opt_uuid(r, 5)?,
                created_at: row::ts(r, 6)?,
            })
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }
}

fn row_to_heartbeat(r: &rusqlite::Row<'_>) -> rusqlite::Result<NodeHeartbeat> {
    Ok(NodeHeartbeat {
        id: r.get(0)?,
        node_id: row::uuid(r, 1)?,
        status: row::parsed(r, 2)?,
        load: r.get(3)?,
        current_rooms: r.get(4)?,
        active_connections: r.get(5)?,
        cpu_usage: r.get(6)?,
        memory_usage: r.get(7)?,
        disk_usage: r.get(8)?,
        received_at: row::ts(r, 9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::sample_endpoint;
    use chrono::Duration;

    #[test]
    fn test_heartbeats_newest_first_with_metrics() {
        let db = Database::open_in_memory().unwrap();
        let mut node = sample_endpoint("node1");
        db.insert_endpoint(&node).unwrap();

        let t0 = Utc::now();
        db.record_node_heartbeat(&node, None, t0).unwrap();
        node.load = 40.0;
        node.current_rooms = 2;
        let metrics = SystemMetrics {
            cpu_usage: Some(12.5),
            memory_usage: Some(61.0),
            disk_usage: None,
            active_connections: Some(7),
        };
        db.record_node_heartbeat(&node, Some(&metrics), t0 + Duration::seconds(30))
            .unwrap();

        let beats = db.list_node_heartbeats(node.id, 10).unwrap();
        assert_eq!(beats.len(), 2);
        assert_eq!(beats[0].load, 40.0);
        assert_eq!(beats[0].current_rooms, 2);
        assert_eq!(beats[0].cpu_usage, Some(12.5));
        assert_eq!(beats[0].active_connections, Some(7));
        assert_eq!(beats[1].cpu_usage, None);
        assert_eq!(db.count_node_heartbeats(node.id).unwrap(), 2);
        assert_eq!(db.list_node_heartbeats(node.id, 1).unwrap().len(), 1);
    }

    #[test]
    fn test_prune_keeps_recent_heartbeats() {
        let db = Database::open_in_memory().unwrap();
        let node = sample_endpoint("node1");
        db.insert_endpoint(&node).unwrap();

        let now = Utc::now();
        db.record_node_heartbeat(&node, None, now - Duration::hours(30))
            .unwrap();
        db.record_node_heartbeat(&node, None, now - Duration::hours(2))
            .unwrap();
        db.record_node_heartbeat(&node, None, now).unwrap();

        let pruned = db.prune_node_heartbeats(now - Duration::hours(24)).unwrap();
        assert_eq!(pruned, 1);
        assert_eq!(db.count_node_heartbeats(node.id).unwrap(), 2);
    }

    #[test]
    fn test_heartbeats_go_with_their_endpoint() {
        let db = Database::open_in_memory().unwrap();
        let node = sample_endpoint("node1");
        db.insert_endpoint(&node).unwrap();
        db.record_node_heartbeat(&node, None, Utc::now()).unwrap();
        db.log_event(LogLevel::Info, "node", "Node approved: node1", None, Some(node.id))
            .unwrap();

        db.delete_endpoint(node.id).unwrap();

        assert_eq!(db.count_node_heartbeats(node.id).unwrap(), 0);
        let logs = db.list_system_logs(10).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].node_id, Some(node.id));
    }

    #[test]
    fn test_system_log_round_trip() {
        let db = Database::open_in_memory().unwrap();
        db.log_event(LogLevel::Info, "node", "Node registration: node1", None, None)
            .unwrap();
        db.log_event(
            LogLevel::Warning,
            "node",
            "Node went offline: node1",
            Some(r#"{"last_heartbeat":null}"#),
            None,
        )
        .unwrap();

        let logs = db.list_system_logs(10).unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].level, LogLevel::Warning);
        assert_eq!(logs[0].details.as_deref(), Some(r#"{"last_heartbeat":null}"#));
        assert_eq!(logs[1].message, "Node registration: node1");
    }
}

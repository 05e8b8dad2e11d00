//! Heartbeat bookkeeping and liveness.
//!
//! The hub keeps the latest system metrics reported by each node in a short
//! lived cache, derives an advisory health score from them, and runs a
//! periodic sweep that flips silent nodes to offline. Nothing here ever
//! rejects a heartbeat.

use std::collections::HashMap;
use std::sync::Arc;

use chatmesh_shared::constants::{
    HEALTH_TTL_SECS, HEARTBEAT_RETENTION_HOURS, LOG_CATEGORY_NODE, METRICS_TTL_SECS,
    STALE_HEARTBEAT_SECS,
};
use chatmesh_shared::protocol::SystemMetrics;
use chatmesh_shared::LogLevel;
use chatmesh_store::Database;
use chrono::{DateTime, Duration, Utc};
use sysinfo::{Disks, System};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Health score
// ---------------------------------------------------------------------------

/// 100 minus penalties for CPU, memory and room load, clamped to 0..=100.
pub fn health_score(metrics: &SystemMetrics, load: f64) -> u8 {
    let mut score: i32 = 100;

    if let Some(cpu) = metrics.cpu_usage {
        score -= match cpu {
            c if c > 90.0 => 30,
            c if c > 80.0 => 15,
            c if c > 70.0 => 5,
            _ => 0,
        };
    }
    if let Some(memory) = metrics.memory_usage {
        score -= match memory {
            m if m > 90.0 => 20,
            m if m > 80.0 => 10,
            _ => 0,
        };
    }
    score -= match load {
        l if l > 90.0 => 20,
        l if l > 80.0 => 10,
        _ => 0,
    };

    score.clamp(0, 100) as u8
}

fn log_warnings(node: &str, metrics: &SystemMetrics, load: f64) {
    if metrics.cpu_usage.is_some_and(|v| v > 90.0) {
        warn!(node, cpu = ?metrics.cpu_usage, "High CPU usage");
    }
    if metrics.memory_usage.is_some_and(|v| v > 90.0) {
        warn!(node, memory = ?metrics.memory_usage, "High memory usage");
    }
    if metrics.disk_usage.is_some_and(|v| v > 90.0) {
        warn!(node, disk = ?metrics.disk_usage, "High disk usage");
    }
    if load > 95.0 {
        warn!(node, load, "Node near room capacity");
    }
}

// ---------------------------------------------------------------------------
// Metrics cache
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct CachedMetrics {
    metrics: SystemMetrics,
    recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct CachedHealth {
    score: u8,
    computed_at: DateTime<Utc>,
}

/// Ephemeral per-node metrics and health scores.
#[derive(Clone, Default)]
pub struct Monitor {
    metrics: Arc<RwLock<HashMap<Uuid, CachedMetrics>>>,
    health: Arc<RwLock<HashMap<Uuid, CachedHealth>>>,
}

impl Monitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a heartbeat's metrics and return the node's health score.
    pub async fn record(
        &self,
        node_id: Uuid,
        node_name: &str,
        load: f64,
        metrics: Option<SystemMetrics>,
    ) -> u8 {
        let metrics = metrics.unwrap_or_default();
        let score = health_score(&metrics, load);
        log_warnings(node_name, &metrics, load);

        let now = Utc::now();
        self.metrics.write().await.insert(
            node_id,
            CachedMetrics {
                metrics,
                recorded_at: now,
            },
        );
        self.health.write().await.insert(
            node_id,
            CachedHealth {
                score,
                computed_at: now,
            },
        );

        debug!(node = node_name, score, "Health score updated");
        score
    }

    /// Latest metrics, if reported within the metrics TTL.
    pub async fn metrics(&self, node_id: Uuid) -> Option<SystemMetrics> {
        let cutoff = Utc::now() - Duration::seconds(METRICS_TTL_SECS);
        self.metrics
            .read()
            .await
            .get(&node_id)
            .filter(|entry| entry.recorded_at > cutoff)
            .map(|entry| entry.metrics.clone())
    }

    /// Latest health score, if computed within the health TTL.
    pub async fn health(&self, node_id: Uuid) -> Option<u8> {
        let cutoff = Utc::now() - Duration::seconds(HEALTH_TTL_SECS);
        self.health
            .read()
            .await
            .get(&node_id)
            .filter(|entry| entry.computed_at > cutoff)
            .map(|entry| entry.score)
    }

    pub async fn forget(&self, node_id: Uuid) {
        self.metrics.write().await.remove(&node_id);
        self.health.write().await.remove(&node_id);
    }

    /// Drop expired cache entries.
    pub async fn purge_expired(&self) {
        let now = Utc::now();
        let metrics_cutoff = now - Duration::seconds(METRICS_TTL_SECS);
        let health_cutoff = now - Duration::seconds(HEALTH_TTL_SECS);
        self.metrics
            .write()
            .await
            .retain(|_, entry| entry.recorded_at > metrics_cutoff);
        self.health
            .write()
            .await
            .retain(|_, entry| entry.computed_at > health_cutoff);
    }
}

// ---------------------------------------------------------------------------
// Liveness sweep
// ---------------------------------------------------------------------------

/// Mark every online node whose last heartbeat is older than the staleness
/// threshold as offline, with a system log entry each. Returns the names of
/// the nodes flipped.
pub fn sweep_stale(db: &Database, now: DateTime<Utc>) -> chatmesh_store::Result<Vec<String>> {
    let cutoff = now - Duration::seconds(STALE_HEARTBEAT_SECS);
    db.in_transaction(|db| {
        let flipped = db.mark_stale_offline(cutoff)?;
        for name in &flipped {
            info!(node = %name, "Node marked as offline");
            let node_id = db.find_endpoint_by_name(name)?.map(|e| e.id);
            db.log_event(
                LogLevel::Warning,
                LOG_CATEGORY_NODE,
                &format!("Node went offline: {name}"),
                None,
                node_id,
            )?;
        }
        Ok(flipped)
    })
}

/// Drop heartbeat history older than the retention window.
pub fn prune_history(db: &Database, now: DateTime<Utc>) -> chatmesh_store::Result<usize> {
    let pruned = db.prune_node_heartbeats(now - Duration::hours(HEARTBEAT_RETENTION_HOURS))?;
    if pruned > 0 {
        debug!(pruned, "Pruned heartbeat history");
    }
    Ok(pruned)
}

// ---------------------------------------------------------------------------
// Local metrics (node side)
// ---------------------------------------------------------------------------

/// Samples host CPU, memory and disk usage for heartbeats.
pub struct HostSampler {
    system: System,
}

impl HostSampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    pub fn sample(&mut self) -> SystemMetrics {
        self.system.refresh_cpu();
        self.system.refresh_memory();

        let cpu = self.system.global_cpu_info().cpu_usage() as f64;
        let memory = percent(self.system.used_memory(), self.system.total_memory());

        let disks = Disks::new_with_refreshed_list();
        let (total, available) = disks.list().iter().fold((0u64, 0u64), |(t, a), d| {
            (t + d.total_space(), a + d.available_space())
        });
        let disk = percent(total.saturating_sub(available), total);

        SystemMetrics {
            cpu_usage: Some(round1(cpu)),
            memory_usage: memory.map(round1),
            disk_usage: disk.map(round1),
            active_connections: None,
        }
    }
}

impl Default for HostSampler {
    fn default() -> Self {
        Self::new()
    }
}

fn percent(used: u64, total: u64) -> Option<f64> {
    (total > 0).then(|| used as f64 / total as f64 * 100.0)
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatmesh_shared::NodeStatus;
    use chatmesh_store::NodeEndpoint;

    fn metrics(cpu: f64, memory: f64) -> SystemMetrics {
        SystemMetrics {
            cpu_usage: Some(cpu),
            memory_usage: Some(memory),
            ..Default::default()
        }
    }

    #[test]
    fn test_health_score_penalties() {
        assert_eq!(health_score(&metrics(10.0, 10.0), 10.0), 100);
        assert_eq!(health_score(&metrics(75.0, 10.0), 10.0), 95);
        assert_eq!(health_score(&metrics(85.0, 85.0), 85.0), 65);
        assert_eq!(health_score(&metrics(95.0, 95.0), 95.0), 30);
        assert_eq!(health_score(&SystemMetrics::default(), 0.0), 100);
    }

    #[tokio::test]
    async fn test_monitor_caches_score() {
        let monitor = Monitor::new();
        let id = Uuid::new_v4();
        let score = monitor
            .record(id, "node1", 50.0, Some(metrics(95.0, 10.0)))
            .await;
        assert_eq!(score, 70);
        assert_eq!(monitor.health(id).await, Some(70));
        assert_eq!(monitor.metrics(id).await.unwrap().cpu_usage, Some(95.0));

        monitor.forget(id).await;
        assert!(monitor.health(id).await.is_none());
    }

    fn endpoint(name: &str, last_heartbeat: Option<DateTime<Utc>>) -> NodeEndpoint {
        let now = Utc::now();
        NodeEndpoint {
            id: Uuid::new_v4(),
            name: name.into(),
            url: format!("http://{name}:8000"),
            status: NodeStatus::Online,
            load: 0.0,
            current_rooms: 0,
            max_rooms: 50,
            last_heartbeat,
            api_key: format!("key-{name}"),
            sync_enabled: true,
            auto_sync_interval: 300,
            last_sync: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_sweep_flips_only_stale_nodes() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let stale = endpoint("stale", Some(now - Duration::seconds(STALE_HEARTBEAT_SECS + 60)));
        let fresh = endpoint("fresh", Some(now - Duration::seconds(10)));
        db.insert_endpoint(&stale).unwrap();
        db.insert_endpoint(&fresh).unwrap();

        let flipped = sweep_stale(&db, now).unwrap();
        assert_eq!(flipped, vec!["stale".to_string()]);
        assert_eq!(db.get_endpoint(stale.id).unwrap().status, NodeStatus::Offline);
        assert_eq!(db.get_endpoint(fresh.id).unwrap().status, NodeStatus::Online);

        assert!(sweep_stale(&db, now).unwrap().is_empty());

        let logs = db.list_system_logs(10).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].level, LogLevel::Warning);
        assert_eq!(logs[0].node_id, Some(stale.id));
        assert_eq!(logs[0].message, "Node went offline: stale");
    }

    #[test]
    fn test_prune_history_keeps_the_retention_window() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let node = endpoint("node1", Some(now));
        db.insert_endpoint(&node).unwrap();
        db.record_node_heartbeat(&node, None, now - Duration::hours(HEARTBEAT_RETENTION_HOURS + 1))
            .unwrap();
        db.record_node_heartbeat(&node, None, now - Duration::minutes(1))
            .unwrap();

        assert_eq!(prune_history(&db, now).unwrap(), 1);
        assert_eq!(db.count_node_heartbeats(node.id).unwrap(), 1);
        assert_eq!(prune_history(&db, now).unwrap(), 0);
    }
}

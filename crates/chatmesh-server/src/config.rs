//! Server configuration loaded from environment variables.
//!
//! All settings have defaults so a hub can start with zero configuration
//! for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use chatmesh_shared::constants::{
    CENTRAL_HUB, DEFAULT_HTTP_PORT, DEFAULT_HUB_SECRET, DEFAULT_MAX_ROOMS,
    MIN_HEARTBEAT_INTERVAL_SECS,
};
use chatmesh_shared::Role;
use chatmesh_sync::{ConflictPolicy, LocalIdentity};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// `hub` or `node`.
    /// Env: `ROLE`
    pub role: Role,

    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8000`
    pub http_addr: SocketAddr,

    /// Listener for the `/local/*` write surface. Keep it on loopback.
    /// Env: `LOCAL_ADDR`
    /// Default: `127.0.0.1:8001`
    pub local_addr: SocketAddr,

    /// SQLite file. `None` means the platform data directory.
    /// Env: `DATABASE_PATH`
    pub database_path: Option<PathBuf>,

    /// Env: `NODE_NAME`
    /// Default: `CENTRAL_HUB` on the hub, `node` otherwise.
    pub node_name: String,

    /// Public base URL of this process.
    /// Env: `NODE_URL`
    pub node_url: String,

    /// Env: `HUB_URL`
    pub hub_url: Option<String>,

    /// Bypass credential carried in `X-AUTH` on hub-to-node calls.
    /// Env: `HUB_SHARED_SECRET`
    pub hub_secret: String,

    /// Bearer token for `/admin/*`. Admin API is disabled without it.
    /// Env: `ADMIN_TOKEN`
    pub admin_token: Option<String>,

    /// Env: `SYNC_ENABLED`
    pub sync_enabled: bool,

    /// Env: `CONFLICT_POLICY` (`arrival` or `timestamp`)
    pub conflict_policy: ConflictPolicy,

    /// Room capacity advertised in heartbeats.
    /// Env: `MAX_ROOMS`
    pub max_rooms: i64,

    /// Env: `HEARTBEAT_INTERVAL_SECS` (never below 30)
    pub heartbeat_interval_secs: u64,

    /// Env: `AUTO_SYNC_INTERVAL_SECS`
    pub auto_sync_interval_secs: u64,

    /// Env: `DELIVERY_CONCURRENCY`
    pub delivery_concurrency: usize,

    /// Env: `DELIVERY_QUEUE`
    pub delivery_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            role: Role::Hub,
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            local_addr: ([127, 0, 0, 1], DEFAULT_HTTP_PORT + 1).into(),
            database_path: None,
            node_name: CENTRAL_HUB.to_string(),
            node_url: format!("http://127.0.0.1:{DEFAULT_HTTP_PORT}"),
            hub_url: None,
            hub_secret: DEFAULT_HUB_SECRET.to_string(),
            admin_token: None,
            sync_enabled: true,
            conflict_policy: ConflictPolicy::Arrival,
            max_rooms: DEFAULT_MAX_ROOMS,
            heartbeat_interval_secs: MIN_HEARTBEAT_INTERVAL_SECS,
            auto_sync_interval_secs: 300,
            delivery_concurrency: 8,
            delivery_queue: 1024,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ServerConfig::from_env`] with an arbitrary variable source.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(role) = var("ROLE") {
            match role.parse::<Role>() {
                Ok(parsed) => config.role = parsed,
                Err(e) => tracing::warn!(error = %e, "Invalid ROLE, using hub"),
            }
        }
        if config.role == Role::Node {
            config.node_name = "node".to_string();
        }

        if let Some(addr) = var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(addr) = var("LOCAL_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => {
                    if !parsed.ip().is_loopback() {
                        tracing::warn!(addr = %parsed, "LOCAL_ADDR is not a loopback address");
                    }
                    config.local_addr = parsed;
                }
                Err(_) => tracing::warn!(value = %addr, "Invalid LOCAL_ADDR, using default"),
            }
        }

        if let Some(path) = non_empty(var("DATABASE_PATH")) {
            config.database_path = Some(PathBuf::from(path));
        }
        if let Some(name) = non_empty(var("NODE_NAME")) {
            config.node_name = name;
        }
        if let Some(url) = non_empty(var("NODE_URL")) {
            config.node_url = url;
        }
        config.hub_url = non_empty(var("HUB_URL"));

        match non_empty(var("HUB_SHARED_SECRET")) {
            Some(secret) => config.hub_secret = secret,
            None => tracing::warn!(
                "HUB_SHARED_SECRET not set, using the development default"
            ),
        }
        config.admin_token = non_empty(var("ADMIN_TOKEN"));

        if let Some(val) = var("SYNC_ENABLED") {
            config.sync_enabled = val != "false" && val != "0";
        }

        if let Some(val) = var("CONFLICT_POLICY") {
            match val.parse::<ConflictPolicy>() {
                Ok(policy) => config.conflict_policy = policy,
                Err(e) => tracing::warn!(error = %e, "Invalid CONFLICT_POLICY, using arrival"),
            }
        }

        parse_into(&var, "MAX_ROOMS", &mut config.max_rooms);
        parse_into(&var, "HEARTBEAT_INTERVAL_SECS", &mut config.heartbeat_interval_secs);
        parse_into(&var, "AUTO_SYNC_INTERVAL_SECS", &mut config.auto_sync_interval_secs);
        parse_into(&var, "DELIVERY_CONCURRENCY", &mut config.delivery_concurrency);
        parse_into(&var, "DELIVERY_QUEUE", &mut config.delivery_queue);

        config.heartbeat_interval_secs = config
            .heartbeat_interval_secs
            .max(MIN_HEARTBEAT_INTERVAL_SECS);

        config
    }

    pub fn is_hub(&self) -> bool {
        self.role == Role::Hub
    }

    /// Default database file name for this role.
    pub fn database_file_name(&self) -> String {
        match self.role {
            Role::Hub => "chatmesh-hub.db".to_string(),
            Role::Node => "chatmesh-node.db".to_string(),
        }
    }

    pub fn identity(&self) -> Arc<LocalIdentity> {
        Arc::new(LocalIdentity {
            role: self.role,
            name: self.node_name.clone(),
            url: self.node_url.clone(),
            hub_url: self.hub_url.clone(),
            hub_secret: self.hub_secret.clone(),
            sync_enabled: self.sync_enabled,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_into<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    if let Some(raw) = var(key) {
        match raw.trim().parse::<T>() {
            Ok(value) => *slot = value,
            Err(_) => tracing::warn!(key, value = %raw, "Invalid value, using default"),
        }
    }
}

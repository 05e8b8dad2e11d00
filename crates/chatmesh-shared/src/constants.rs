/// Header carrying the sender's (or, on hub relays, the author's) API key.
pub const HEADER_NODE_API_KEY: &str = "x-node-api-key";

/// Header carrying the original author's API key when the hub relays.
pub const HEADER_ORIGIN_NODE_API_KEY: &str = "x-origin-node-api-key";

/// Header carrying the hub bypass credential.
pub const HEADER_AUTH: &str = "x-auth";

/// Header naming the sending process.
pub const HEADER_ORIGIN: &str = "x-origin";

/// Value of `X-ORIGIN` on every hub-to-node push.
pub const ORIGIN_CENTRAL_SERVER: &str = "CENTRAL_SERVER";

/// Origin name used when the hub itself is the pass-through author.
/// Mutations carrying it are never re-broadcast.
pub const CENTRAL_HUB: &str = "CENTRAL_HUB";

/// Development default for the hub bypass credential.
pub const DEFAULT_HUB_SECRET: &str = "BYPASS_AUTH";

/// A node whose last heartbeat is older than this is swept offline.
pub const STALE_HEARTBEAT_SECS: i64 = 120;

/// Lower bound between two heartbeats sent by the same node.
pub const MIN_HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Ephemeral system metrics expire after this many seconds.
pub const METRICS_TTL_SECS: i64 = 120;

/// Cached health scores expire after this many seconds.
pub const HEALTH_TTL_SECS: i64 = 300;

/// Heartbeat history older than this is pruned by the liveness sweep.
pub const HEARTBEAT_RETENTION_HOURS: i64 = 24;

/// Heartbeats returned with a single node's status.
pub const RECENT_HEARTBEATS: u32 = 10;

/// System log category for node lifecycle events.
pub const LOG_CATEGORY_NODE: &str = "node";

/// Timeout for a single replication push.
pub const PUSH_TIMEOUT_SECS: u64 = 10;

/// Timeout for heartbeat and registration calls.
pub const CONTROL_TIMEOUT_SECS: u64 = 10;

/// Timeout for metadata and bulk calls.
pub const BULK_TIMEOUT_SECS: u64 = 30;

/// Connect timeout applied to every outbound call.
pub const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Default room capacity advertised by a node.
pub const DEFAULT_MAX_ROOMS: i64 = 50;

/// Default HTTP API port.
pub const DEFAULT_HTTP_PORT: u16 = 8000;

/// Records per batch envelope during bulk resync.
pub const RESYNC_BATCH_SIZE: usize = 500;

//! # chatmesh-server
//!
//! HTTP process for both roles of the chat mesh.
//!
//! Run as the **hub** it provides:
//! - node registration with an admin approval workflow
//! - heartbeat intake, a cached health score per node, and a liveness sweep
//!   that flips silent nodes offline
//! - relay of every replicated write to the other nodes
//!
//! Run as a **node** it registers with the hub, heartbeats, accepts the
//! identity and peer topology the hub pushes, and replicates its own writes
//! upstream (live through the dispatcher, periodically in bulk).
//!
//! `/sync/receive`, `/health` and `/info` exist in both roles. The `/local/*`
//! write surface is served on a separate loopback listener (`LOCAL_ADDR`).

pub mod api;
pub mod config;
pub mod error;
pub mod fanout;
pub mod local_api;
pub mod monitor;
pub mod nodes_api;
pub mod peers_api;
pub mod registry;
pub mod sync_api;
pub mod tasks;

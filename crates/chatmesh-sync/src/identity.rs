//! Who this process is.

use chatmesh_shared::Role;
use chatmesh_store::{Database, NodeEndpoint};

/// Static identity of the running process, built once from configuration
/// and shared by reference.
///
/// A node's id and API key are not part of it: they are issued by the hub
/// after approval and live in the node's own endpoint row, looked up by
/// name whenever they are needed.
#[derive(Debug, Clone)]
pub struct LocalIdentity {
    pub role: Role,
    pub name: String,
    pub url: String,
    /// Hub base URL. Only meaningful for nodes.
    pub hub_url: Option<String>,
    /// Bypass credential carried in `X-AUTH` on hub-to-node pushes.
    pub hub_secret: String,
    /// Administrative replication switch.
    pub sync_enabled: bool,
}

impl LocalIdentity {
    pub fn is_hub(&self) -> bool {
        self.role == Role::Hub
    }

    /// This node's own endpoint row, once the hub has pushed it.
    pub fn own_endpoint(&self, db: &Database) -> chatmesh_store::Result<Option<NodeEndpoint>> {
        if self.is_hub() {
            return Ok(None);
        }
        db.find_endpoint_by_name(&self.name)
    }
}

//! Node onboarding: registration, approval, rejection and removal.
//!
//! These run on the hub, synchronously against the store. Pushing the
//! outcome to the nodes is the caller's job (see [`crate::fanout`]).

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chatmesh_shared::constants::LOG_CATEGORY_NODE;
use chatmesh_shared::protocol::RegistrationRequest;
use chatmesh_shared::{LogLevel, NodeStatus, RegistrationStatus};
use chatmesh_store::{Database, NodeEndpoint, NodeRegistration, StoreError};
use chrono::Utc;
use rand::RngCore;
use tracing::info;
use uuid::Uuid;

type Result<T> = std::result::Result<T, StoreError>;

/// A fresh node API key: 32 random bytes, URL-safe base64.
pub fn generate_api_key() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// File a registration. A second request for the same node name returns
/// the existing registration unchanged. The flag is `true` when a new row
/// was created.
pub fn register(db: &Database, req: &RegistrationRequest) -> Result<(NodeRegistration, bool)> {
    db.in_transaction(|db| {
        if let Some(existing) = db.find_registration_by_name(&req.node_name)? {
            return Ok((existing, false));
        }

        let now = Utc::now();
        let reg = NodeRegistration {
            id: Uuid::new_v4(),
            node_name: req.node_name.clone(),
            node_url: req.node_url.clone(),
            admin_email: req.admin_email.clone(),
            description: req.description.clone(),
            max_rooms_capacity: req.max_rooms_capacity,
            status: RegistrationStatus::Pending,
            approved_by: None,
            approved_at: None,
            endpoint_id: None,
            created_at: now,
            updated_at: now,
        };
        db.insert_registration(&reg)?;
        db.log_event(
            LogLevel::Info,
            LOG_CATEGORY_NODE,
            &format!("Node registration: {}", reg.node_name),
            Some(&serde_json::json!({ "node_url": reg.node_url }).to_string()),
            None,
        )?;
        info!(node = %reg.node_name, registration = %reg.id, "Registration received");
        Ok((reg, true))
    })
}

/// Approve a pending registration: create its endpoint with a new API key.
/// The endpoint starts offline until its first heartbeat.
pub fn approve(db: &Database, registration_id: Uuid, approver: &str) -> Result<NodeEndpoint> {
    db.in_transaction(|db| {
        let mut reg = db.get_registration(registration_id)?;
        match reg.status {
            RegistrationStatus::Pending => {}
            RegistrationStatus::Approved => {
                return Err(StoreError::Conflict(format!(
                    "registration for '{}' is already approved",
                    reg.node_name
                )))
            }
            RegistrationStatus::Rejected => {
                return Err(StoreError::Conflict(format!(
                    "registration for '{}' was rejected",
                    reg.node_name
                )))
            }
        }

        let now = Utc::now();
        let endpoint = NodeEndpoint {
            id: Uuid::new_v4(),
            name: reg.node_name.clone(),
            url: reg.node_url.clone(),
            status: NodeStatus::Offline,
            load: 0.0,
            current_rooms: 0,
            max_rooms: reg.max_rooms_capacity,
            last_heartbeat: None,
            api_key: generate_api_key(),
            sync_enabled: true,
            auto_sync_interval: 300,
            last_sync: None,
            created_at: now,
            updated_at: now,
        };
        db.insert_endpoint(&endpoint)?;

        reg.status = RegistrationStatus::Approved;
        reg.approved_by = Some(approver.to_string());
        reg.approved_at = Some(now);
        reg.endpoint_id = Some(endpoint.id);
        reg.updated_at = now;
        db.update_registration(&reg)?;
        db.log_event(
            LogLevel::Info,
            LOG_CATEGORY_NODE,
            &format!("Node approved: {} by {approver}", endpoint.name),
            None,
            Some(endpoint.id),
        )?;

        info!(node = %endpoint.name, endpoint = %endpoint.id, by = approver, "Node approved");
        Ok(endpoint)
    })
}

/// Reject a pending registration. Rejection is terminal.
pub fn reject(db: &Database, registration_id: Uuid, approver: &str) -> Result<NodeRegistration> {
    db.in_transaction(|db| {
        let mut reg = db.get_registration(registration_id)?;
        if reg.status != RegistrationStatus::Pending {
            return Err(StoreError::Conflict(format!(
                "registration for '{}' is {}",
                reg.node_name,
                reg.status.as_str()
            )));
        }

        let now = Utc::now();
        reg.status = RegistrationStatus::Rejected;
        reg.approved_by = Some(approver.to_string());
        reg.approved_at = Some(now);
        reg.updated_at = now;
        db.update_registration(&reg)?;
        db.log_event(
            LogLevel::Warning,
            LOG_CATEGORY_NODE,
            &format!("Node registration rejected: {} by {approver}", reg.node_name),
            None,
            None,
        )?;

        info!(node = %reg.node_name, by = approver, "Registration rejected");
        Ok(reg)
    })
}

/// Delete an endpoint that hosts no active room, and put its registration
/// back to pending.
pub fn remove_endpoint(db: &Database, endpoint_id: Uuid) -> Result<NodeEndpoint> {
    db.in_transaction(|db| {
        let endpoint = db.get_endpoint(endpoint_id)?;
        let active = db.count_active_rooms(Some(endpoint_id))?;
        if active > 0 {
            return Err(StoreError::Precondition(format!(
                "node '{}' still hosts {active} active room(s)",
                endpoint.name
            )));
        }

        db.delete_endpoint(endpoint_id)?;
        let reset = db.reset_registration_for_endpoint(endpoint_id)?;
        db.log_event(
            LogLevel::Warning,
            LOG_CATEGORY_NODE,
            &format!("Node deleted: {}", endpoint.name),
            None,
            Some(endpoint_id),
        )?;
        info!(node = %endpoint.name, registration_reset = reset, "Node deleted");
        Ok(endpoint)
    })
}

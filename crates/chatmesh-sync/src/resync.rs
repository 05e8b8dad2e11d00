//! Bulk resync planning.
//!
//! Realtime pushes are best effort, so a periodic pass re-sends everything
//! that changed since the last successful one. Batches follow dependency
//! order so a receiver never sees a record before what it refers to.
//!
//! The watermark of a pass (`last_sync`) may only move forward when every
//! batch of it was applied in full; [`PassReport`] keeps that tally.

use chatmesh_shared::constants::RESYNC_BATCH_SIZE;
use chatmesh_shared::{AckStatus, ModelKind, SyncAck, SyncAction, SyncEnvelope};
use chatmesh_store::Database;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::apply::records_since;
use crate::error::ApplyError;

pub const FULL: &str = "full";
pub const INCREMENTAL: &str = "incremental";

/// Batch envelopes for every entity of `kinds` modified after `since`
/// (everything when `None`), in dependency order.
pub fn plan_batches(
    db: &Database,
    kinds: &[ModelKind],
    since: Option<DateTime<Utc>>,
    origin_node_id: Option<Uuid>,
) -> Result<Vec<SyncEnvelope>, ApplyError> {
    let sync_type = if since.is_some() { INCREMENTAL } else { FULL };
    let now = Utc::now();
    let mut envelopes = Vec::new();

    for kind in ModelKind::DEPENDENCY_ORDER {
        if !kinds.contains(&kind) {
            continue;
        }
        let records = records_since(db, kind, since)?;
        for chunk in records.chunks(RESYNC_BATCH_SIZE) {
            envelopes.push(SyncEnvelope {
                model: kind,
                action: SyncAction::Update,
                data: chatmesh_shared::SyncPayload::Batch(chunk.to_vec()),
                timestamp: now,
                origin_node_id,
                relayed: false,
                sync_type: Some(sync_type.to_string()),
            });
        }
    }

    Ok(envelopes)
}

/// Tally of the acks of one bulk pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub batches: usize,
    pub records: usize,
    pub applied: usize,
    /// Batches that came back `partial` or `failed`, or short of records.
    pub incomplete: usize,
}

impl PassReport {
    /// Count the ack of a batch of `sent` records.
    pub fn record_ack(&mut self, sent: usize, ack: &SyncAck) {
        self.batches += 1;
        self.records += sent;
        self.applied += ack.applied;
        if ack.status != AckStatus::Success || ack.applied < sent {
            self.incomplete += 1;
        }
    }

    /// Count a batch that never produced an ack.
    pub fn record_error(&mut self, sent: usize) {
        self.batches += 1;
        self.records += sent;
        self.incomplete += 1;
    }

    pub fn merge(&mut self, other: &PassReport) {
        self.batches += other.batches;
        self.records += other.records;
        self.applied += other.applied;
        self.incomplete += other.incomplete;
    }

    /// True when the watermark may advance.
    pub fn complete(&self) -> bool {
        self.incomplete == 0
    }
}

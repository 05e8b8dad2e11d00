//! Origin tracking.
//!
//! Every mutation runs with an [`Origin`] recording where it came from.
//! Organic writes are [`Origin::Local`]; writes applied on behalf of a sync
//! push carry the sending node (or the hub). The dispatcher reads it to
//! decide whether a change may travel further, which is what keeps a change
//! from bouncing between hub and nodes forever.
//!
//! The value lives in a tokio task-local, so concurrent requests never see
//! each other's origin. Code outside any [`scope`] always reads `Local`.

use std::cell::RefCell;
use std::future::Future;

use chatmesh_shared::constants::CENTRAL_HUB;
use uuid::Uuid;

tokio::task_local! {
    static SYNC_ORIGIN: RefCell<Origin>;
}

/// Where the mutation currently being processed came from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Origin {
    /// User-initiated on this process. The only origin that propagates
    /// from a node.
    #[default]
    Local,
    /// Applied on behalf of a known node.
    Peer { node_id: Uuid, node_name: String },
    /// Pushed by the hub. `author` is the node that wrote the change, when
    /// the hub relayed it, and is kept for the audit trail only.
    Hub { author: Option<Uuid> },
}

impl Origin {
    pub fn is_local(&self) -> bool {
        matches!(self, Origin::Local)
    }

    /// The node id this origin designates, if any.
    pub fn node_id(&self) -> Option<Uuid> {
        match self {
            Origin::Local => None,
            Origin::Peer { node_id, .. } => Some(*node_id),
            Origin::Hub { author } => *author,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Origin::Local => "local",
            Origin::Peer { node_name, .. } => node_name,
            Origin::Hub { .. } => CENTRAL_HUB,
        }
    }
}

/// Current origin, or [`Origin::Local`] when none is set.
pub fn get_origin() -> Origin {
    SYNC_ORIGIN
        .try_with(|cell| cell.borrow().clone())
        .unwrap_or_default()
}

/// Set the origin for the rest of the enclosing scope. Returns `false`
/// (and does nothing) when called outside a scope.
pub fn set_origin(origin: Origin) -> bool {
    SYNC_ORIGIN
        .try_with(|cell| *cell.borrow_mut() = origin)
        .is_ok()
}

/// Reset the enclosing scope to [`Origin::Local`].
pub fn clear_origin() {
    let _ = SYNC_ORIGIN.try_with(|cell| *cell.borrow_mut() = Origin::Local);
}

/// Run a future with its own origin slot, initialized to `origin`.
pub async fn scope<F: Future>(origin: Origin, f: F) -> F::Output {
    SYNC_ORIGIN.scope(RefCell::new(origin), f).await
}

/// Synchronous counterpart of [`scope`], for blocking sections.
pub fn sync_scope<R>(origin: Origin, f: impl FnOnce() -> R) -> R {
    SYNC_ORIGIN.sync_scope(RefCell::new(origin), f)
}

/// Sets an origin on creation and clears it on drop, on every exit path
/// including unwinding.
#[must_use = "the origin is cleared as soon as the guard is dropped"]
pub struct OriginGuard {
    _private: (),
}

impl OriginGuard {
    pub fn enter(origin: Origin) -> Self {
        if !set_origin(origin) {
            tracing::warn!("origin set outside of an origin scope; ignored");
        }
        Self { _private: () }
    }
}

impl Drop for OriginGuard {
    fn drop(&mut self) {
        clear_origin();
    }
}

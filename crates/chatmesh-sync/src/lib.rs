//! Replication core shared by the hub and the nodes.
//!
//! A local write goes through [`LocalWriter`], which persists it and hands a
//! [`ChangeSet`] to the [`Dispatcher`]. The dispatcher reads the current
//! [`Origin`] to decide where (if anywhere) the change goes and queues one
//! [`Delivery`] per target; the delivery workers push them over HTTP.
//! On the other side [`SyncReceiver`] authenticates the push, applies it
//! under the sender's origin and lets its own dispatcher relay it onwards.

pub mod apply;
pub mod conflict;
pub mod dispatcher;
pub mod error;
pub mod identity;
pub mod local;
pub mod origin;
pub mod receiver;
pub mod record;
pub mod resync;
pub mod store;
pub mod transport;

pub use apply::{apply_record, Applied, ConflictPolicy, Outcome};
pub use dispatcher::{spawn_delivery_workers, ChangeSet, Delivery, Dispatcher};
pub use error::{ApplyError, ReceiveError, TransportError};
pub use identity::LocalIdentity;
pub use local::LocalWriter;
pub use origin::Origin;
pub use receiver::{InboundHeaders, SyncReceiver};
pub use record::Replicated;
pub use store::SharedStore;
pub use transport::HttpTransport;

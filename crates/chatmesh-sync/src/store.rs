//! Process-wide handle to the database.

use std::sync::{Arc, Mutex};

use chatmesh_store::Database;

/// Cloneable handle around the single SQLite connection.
///
/// Every access is a short synchronous critical section; async callers go
/// through `spawn_blocking`.
#[derive(Clone)]
pub struct SharedStore {
    inner: Arc<Mutex<Database>>,
}

impl SharedStore {
    pub fn new(db: Database) -> Self {
        Self {
            inner: Arc::new(Mutex::new(db)),
        }
    }

    /// Run `f` with exclusive access to the database. A lock poisoned by a
    /// panicking holder is taken over rather than propagated.
    pub fn with<T>(&self, f: impl FnOnce(&Database) -> T) -> T {
        let guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("store mutex was poisoned; recovering");
                poisoned.into_inner()
            }
        };
        f(&guard)
    }
}

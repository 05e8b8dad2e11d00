//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and guarantees that
//! migrations are run before any other operation.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use rusqlite::Connection;

use crate::error::{Result, StoreError};
use crate::migrations;

const RECORD_SAVEPOINT: &str = "sync_record";

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) `file_name` in the platform data directory:
    /// - Linux:   `~/.local/share/chatmesh/<file_name>`
    /// - macOS:   `~/Library/Application Support/org.chatmesh.chatmesh/<file_name>`
    pub fn open_default(file_name: &str) -> Result<Self> {
        let data_dir = default_data_dir()?;
        std::fs::create_dir_all(&data_dir)?;

        let db_path = data_dir.join(file_name);

        tracing::info!(path = %db_path.display(), "opening database");

        Self::open_at(&db_path)
    }

    /// Open (or create) a database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    /// Open a private in-memory database. Used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        migrations::run_migrations(&conn)?;

        Ok(Self { conn })
    }

    /// Return a reference to the underlying `rusqlite::Connection`.
    ///
    /// Callers should prefer the typed CRUD helpers, but direct access is
    /// occasionally needed for ad-hoc queries.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }

    /// Cheap liveness check for `/health`.
    pub fn ping(&self) -> Result<()> {
        self.conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    /// Run `f` inside one transaction. Commits on `Ok`, rolls back on `Err`.
    pub fn in_transaction<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&Database) -> std::result::Result<T, E>,
        E: From<StoreError>,
    {
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(StoreError::from)?;

        match f(self) {
            Ok(value) => {
                self.conn.execute_batch("COMMIT").map_err(StoreError::from)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = self.conn.execute_batch("ROLLBACK") {
                    tracing::error!(error = %rollback, "transaction rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Run `f` inside a savepoint so that a failure undoes only its own
    /// writes. Must be called from within [`Database::in_transaction`] for
    /// the surrounding writes to stay atomic.
    pub fn with_savepoint<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&Database) -> std::result::Result<T, E>,
        E: From<StoreError>,
    {
        self.conn
            .execute_batch(&format!("SAVEPOINT {RECORD_SAVEPOINT}"))
            .map_err(StoreError::from)?;

        match f(self) {
            Ok(value) => {
                self.conn
                    .execute_batch(&format!("RELEASE {RECORD_SAVEPOINT}"))
                    .map_err(StoreError::from)?;
                Ok(value)
            }
            Err(e) => {
                let undo = format!("ROLLBACK TO {RECORD_SAVEPOINT}; RELEASE {RECORD_SAVEPOINT}");
                if let Err(rollback) = self.conn.execute_batch(&undo) {
                    tracing::error!(error = %rollback, "savepoint rollback failed");
                }
                Err(e)
            }
        }
    }
}

fn default_data_dir() -> Result<PathBuf> {
    let project_dirs =
        ProjectDirs::from("org", "chatmesh", "chatmesh").ok_or(StoreError::NoDataDir)?;
    Ok(project_dirs.data_dir().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        let db = Database::open_at(&path).expect("should open");
        assert!(db.path().is_some());
        db.ping().unwrap();
    }

    #[test]
    fn test_failed_savepoint_keeps_earlier_writes() {
        let db = Database::open_in_memory().unwrap();
        db.conn()
            .execute_batch("CREATE TABLE t (v INTEGER PRIMARY KEY)")
            .unwrap();

        let result: std::result::Result<(), StoreError> = db.in_transaction(|db| {
            db.with_savepoint(|db| {
                db.conn().execute("INSERT INTO t (v) VALUES (1)", [])?;
                Ok::<_, StoreError>(())
            })?;
            let failed = db.with_savepoint(|db| {
                db.conn().execute("INSERT INTO t (v) VALUES (2)", [])?;
                Err::<(), _>(StoreError::NotFound)
            });
            assert!(failed.is_err());
            Ok(())
        });
        result.unwrap();

        let values: Vec<i64> = db
            .conn()
            .prepare("SELECT v FROM t ORDER BY v")
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(values, vec![1]);
    }

    #[test]
    fn test_failed_transaction_rolls_back() {
        let db = Database::open_in_memory().unwrap();
        db.conn()
            .execute_batch("CREATE TABLE t (v INTEGER PRIMARY KEY)")
            .unwrap();

        let result: std::result::Result<(), StoreError> = db.in_transaction(|db| {
            db.conn().execute("INSERT INTO t (v) VALUES (7)", [])?;
            Err(StoreError::Precondition("abort".into()))
        });
        assert!(result.is_err());

        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}

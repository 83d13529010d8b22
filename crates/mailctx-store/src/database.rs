use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::schema;

/// Shared handle to the mailctx SQLite database.
///
/// Clones share one connection behind a `parking_lot::Mutex`; every repository
/// call holds the lock for the duration of its closure only.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    location: Option<PathBuf>,
}

impl Database {
    /// Opens (creating if needed) the database file and brings its schema up to date.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|source| StoreError::Io {
                path: dir.to_owned(),
                source,
            })?;
        }
        let db = Self::prepare(Connection::open(path)?, Some(path.to_owned()))?;
        info!(path = %path.display(), "database opened");
        Ok(db)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::prepare(Connection::open_in_memory()?, None)
    }

    fn prepare(conn: Connection, location: Option<PathBuf>) -> Result<Self, StoreError> {
        conn.execute_batch(schema::PRAGMAS)?;
        conn.execute_batch(schema::CREATE_TABLES)?;
        stamp_version(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            location,
        })
    }

    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T, StoreError>) -> Result<T, StoreError> {
        f(&self.conn.lock())
    }

    /// Runs `f` inside `BEGIN IMMEDIATE`. The write lock is taken up front so
    /// read-then-write sequences cannot interleave with another writer.
    /// Any `Err` from `f` rolls back.
    pub fn with_transaction<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// File backing this database, `None` for in-memory ones.
    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }
}

fn stamp_version(conn: &Connection) -> Result<(), StoreError> {
    let found: Option<u32> = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
        .optional()?
        .flatten();
    match found {
        None => {
            conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [schema::SCHEMA_VERSION])?;
            debug!(version = schema::SCHEMA_VERSION, "schema stamped");
        }
        Some(found) if found > schema::SCHEMA_VERSION => {
            return Err(StoreError::SchemaTooNew {
                found,
                supported: schema::SCHEMA_VERSION,
            });
        }
        Some(_) => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("mailctx-db-{}", uuid::Uuid::now_v7()))
            .join("mailctx.db")
    }

    #[test]
    fn in_memory_has_no_location() {
        let db = Database::in_memory().unwrap();
        assert!(db.location().is_none());
    }

    #[test]
    fn every_table_exists() {
        let db = Database::in_memory().unwrap();
        let tables: Vec<String> = db
            .with_conn(|conn| {
                let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table'")?;
                let names = stmt.query_map([], |row| row.get(0))?.collect::<Result<_, _>>()?;
                Ok(names)
            })
            .unwrap();
        for expected in ["contexts", "context_revisions", "templates", "template_analytics", "responses"] {
            assert!(tables.iter().any(|t| t == expected), "missing {expected}");
        }
    }

    #[test]
    fn reopening_stamps_the_version_once() {
        let path = scratch_path();
        let first = Database::open(&path).unwrap();
        assert_eq!(first.location(), Some(path.as_path()));
        let second = Database::open(&path).unwrap();
        let (rows, version): (u32, u32) = second
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT COUNT(*), MAX(version) FROM schema_version", [], |r| {
                    Ok((r.get(0)?, r.get(1)?))
                })?)
            })
            .unwrap();
        assert_eq!((rows, version), (1, schema::SCHEMA_VERSION));
        drop((first, second));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn newer_schema_is_refused() {
        let path = scratch_path();
        let db = Database::open(&path).unwrap();
        db.with_conn(|conn| {
            conn.execute("UPDATE schema_version SET version = ?1", [schema::SCHEMA_VERSION + 1])?;
            Ok(())
        })
        .unwrap();
        drop(db);

        let err = Database::open(&path).err().unwrap();
        assert!(matches!(err, StoreError::SchemaTooNew { .. }));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn failed_transaction_leaves_nothing_behind() {
        let db = Database::in_memory().unwrap();
        let result: Result<(), StoreError> = db.with_transaction(|tx| {
            tx.execute(
                "INSERT INTO responses (response_id, email_id, tone, status, document, generated_at)
                 VALUES ('r1', 'e1', 'FORMAL', 'DRAFT', '{}', 'now')",
                [],
            )?;
            Err(StoreError::Conflict("abort".into()))
        });
        assert!(result.unwrap_err().is_conflict());

        let count: u32 = db
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM responses", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 0);
    }
}

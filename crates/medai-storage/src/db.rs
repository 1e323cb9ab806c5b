//! SQLite handle for accounts, medical profiles, conversation turns and
//! sessions.
//!
//! `medai init-db` opens and closes it once; `medai serve` opens it at
//! startup, shares it with every repository and closes it after the server
//! drains.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::info;

use medai_core::error::MedaiError;

use crate::migrations;

/// The single connection behind all MedAI repositories.
///
/// Requests serialize on the mutex; registration holds it for the whole
/// user-plus-profile transaction.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open `medai.db`, creating the file and its directory on first run,
    /// and bring the schema up to date.
    ///
    /// Foreign keys are on so profiles, turns and sessions cannot outlive
    /// their user.
    pub fn new(path: &Path) -> Result<Self, MedaiError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| MedaiError::Storage(format!("Failed to open database: {}", e)))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| MedaiError::Storage(format!("Failed to set pragmas: {}", e)))?;

        info!("Database opened at {}", path.display());

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Fresh schema with no file behind it. Used by tests.
    pub fn in_memory() -> Result<Self, MedaiError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| MedaiError::Storage(format!("Failed to open in-memory db: {}", e)))?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| MedaiError::Storage(format!("Failed to set pragmas: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Run one repository query under the lock.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, MedaiError>
    where
        F: FnOnce(&Connection) -> Result<T, MedaiError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| MedaiError::Storage(format!("Database lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Run `f` in a transaction. An `Err` from `f` rolls everything back.
    pub fn with_tx<F, T>(&self, f: F) -> Result<T, MedaiError>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<T, MedaiError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| MedaiError::Storage(format!("Database lock poisoned: {}", e)))?;
        let tx = conn
            .transaction()
            .map_err(|e| MedaiError::Storage(format!("Failed to begin transaction: {}", e)))?;
        let value = f(&tx)?;
        tx.commit()
            .map_err(|e| MedaiError::Storage(format!("Failed to commit: {}", e)))?;
        Ok(value)
    }

    /// Checkpoint and close at shutdown. Requires the last `Arc` to be gone.
    pub fn close(self) -> Result<(), MedaiError> {
        let conn = self
            .conn
            .into_inner()
            .map_err(|e| MedaiError::Storage(format!("Database lock poisoned: {}", e)))?;
        conn.close()
            .map_err(|(_, e)| MedaiError::Storage(format!("Failed to close database: {}", e)))?;
        info!("Database closed");
        Ok(())
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}

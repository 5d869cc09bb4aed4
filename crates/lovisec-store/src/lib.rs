pub mod migrations;
pub mod prefs;
pub mod queries;
pub mod reactions;

use anyhow::Result;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

pub use prefs::Theme;
pub use reactions::{Namespace, ReactionRecord};

/// Client-local key/value state: the per-browser storage of the web client.
///
/// Values are JSON text keyed by a namespaced string. The store is owned by
/// whoever builds it and handed to the components that need it.
pub struct LocalStore {
    conn: Mutex<Connection>,
}

impl LocalStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        migrations::run(&conn)?;

        info!("Local state opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Throwaway store, used by tests and `--ephemeral` runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Local store lock poisoned: {}", e))?;
        f(&conn)
    }
}

use anyhow::Result;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::LocalStore;

impl LocalStore {
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_conn(|conn| query_value(conn, key))
    }

    pub fn put(&self, key: &str, value: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO local_state (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = datetime('now')",
                (key, value),
            )?;
            Ok(())
        })
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM local_state WHERE key = ?1", [key])?;
            Ok(())
        })
    }

    /// Read a JSON value. A value that no longer parses is logged and treated
    /// as absent so a corrupt entry never blocks start-up.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.get(key)? else {
            return Ok(None);
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!("Ignoring unreadable local state '{}': {}", key, e);
                Ok(None)
            }
        }
    }

    pub fn put_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.put(key, &raw)
    }
}

fn query_value(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row(
            "SELECT value FROM local_state WHERE key = ?1",
            [key],
            |row| row.get(0),
        )
        .optional()?;

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_overwrite_remove() {
        let store = LocalStore::open_in_memory().unwrap();
        assert_eq!(store.get("k").unwrap(), None);

        store.put("k", "1").unwrap();
        store.put("k", "2").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("2"));

        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn corrupt_json_reads_as_absent() {
        let store = LocalStore::open_in_memory().unwrap();
        store.put("broken", "{not json").unwrap();
        let value: Option<Vec<u32>> = store.get_json("broken").unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");

        LocalStore::open(&path).unwrap().put("lovisec-theme", "matrix").unwrap();

        let reopened = LocalStore::open(&path).unwrap();
        assert_eq!(reopened.get("lovisec-theme").unwrap().as_deref(), Some("matrix"));
    }
}

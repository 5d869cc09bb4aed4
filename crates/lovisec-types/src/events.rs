use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::api::Table;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
}

/// A row change delivered by the backend change feed. `record` is the full
/// row snapshot after the change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub table: Table,
    pub record: serde_json::Value,
}

impl ChangeEvent {
    pub fn insert(table: Table, record: serde_json::Value) -> Self {
        Self {
            kind: ChangeKind::Insert,
            table,
            record,
        }
    }

    pub fn update(table: Table, record: serde_json::Value) -> Self {
        Self {
            kind: ChangeKind::Update,
            table,
            record,
        }
    }

    /// Value of a string column in the snapshot, used for filter matching.
    pub fn column(&self, name: &str) -> Option<&str> {
        self.record.get(name).and_then(|v| v.as_str())
    }

    pub fn decode<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        T::deserialize(&self.record)
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;
use tracing::{debug, warn};

use lovisec_types::models::ReactionKind;

use crate::LocalStore;

const SECRETS_KEY: &str = "lovisec-reactions";
const COMMENTS_KEY_PREFIX: &str = "lovisec-comment-reactions-";

/// Which feed a reaction record belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Namespace {
    Secrets,
    Comments { secret_id: String },
}

impl Namespace {
    pub fn key(&self) -> String {
        match self {
            Self::Secrets => SECRETS_KEY.to_string(),
            Self::Comments { secret_id } => format!("{COMMENTS_KEY_PREFIX}{secret_id}"),
        }
    }
}

/// The viewer's own reactions in one namespace: item id -> kind.
///
/// This is the only record of what *this* client reacted with; server tallies
/// aggregate everyone and cannot answer that. Every mutation is written back
/// to the store immediately.
pub struct ReactionRecord {
    store: Arc<LocalStore>,
    namespace: Namespace,
    entries: HashMap<String, ReactionKind>,
}

impl ReactionRecord {
    pub fn load(store: Arc<LocalStore>, namespace: Namespace) -> Result<Self> {
        let raw: HashMap<String, Value> = store.get_json(&namespace.key())?.unwrap_or_default();
        let entries = valid_entries(&namespace, raw);

        debug!("Loaded {} reactions for {}", entries.len(), namespace.key());
        Ok(Self {
            store,
            namespace,
            entries,
        })
    }

    pub fn get(&self, item_id: &str) -> Option<ReactionKind> {
        self.entries.get(item_id).copied()
    }

    /// Record `kind` for `item_id`, or clear it when `kind` is `None`, then
    /// write the whole map back.
    ///
    /// The in-memory map is updated even if the write fails; the error only
    /// means the change will not survive a restart.
    pub fn record(&mut self, item_id: &str, kind: Option<ReactionKind>) -> Result<()> {
        match kind {
            Some(kind) => {
                self.entries.insert(item_id.to_string(), kind);
            }
            None => {
                self.entries.remove(item_id);
            }
        }

        self.store.put_json(&self.namespace.key(), &self.entries)
    }
}

/// Keep the entries that name a known kind. A single bad value only costs
/// that one entry, never the rest of the record.
fn valid_entries(
    namespace: &Namespace,
    raw: HashMap<String, Value>,
) -> HashMap<String, ReactionKind> {
    raw.into_iter()
        .filter_map(|(item_id, value)| match serde_json::from_value(value.clone()) {
            Ok(kind) => Some((item_id, kind)),
            Err(_) => {
                warn!(
                    "Dropping unreadable reaction {} for {} in {}",
                    value,
                    item_id,
                    namespace.key()
                );
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Arc<LocalStore> {
        Arc::new(LocalStore::open_in_memory().unwrap())
    }

    #[test]
    fn namespaces_use_distinct_keys() {
        assert_eq!(Namespace::Secrets.key(), "lovisec-reactions");
        assert_eq!(
            Namespace::Comments { secret_id: "abc".into() }.key(),
            "lovisec-comment-reactions-abc"
        );
    }

    #[test]
    fn record_is_saved_on_every_mutation() {
        let store = store();
        let mut record = ReactionRecord::load(store.clone(), Namespace::Secrets).unwrap();
        assert_eq!(record.get("s1"), None);

        record.record("s1", Some(ReactionKind::Turbio)).unwrap();
        record.record("s2", Some(ReactionKind::NoMeGusta)).unwrap();
        record.record("s1", None).unwrap();

        let reloaded = ReactionRecord::load(store.clone(), Namespace::Secrets).unwrap();
        assert_eq!(reloaded.get("s1"), None);
        assert_eq!(reloaded.get("s2"), Some(ReactionKind::NoMeGusta));
        assert_eq!(
            store.get("lovisec-reactions").unwrap().as_deref(),
            Some(r#"{"s2":"noMeGusta"}"#)
        );
    }

    #[test]
    fn stored_format_is_a_plain_json_object() {
        let store = store();
        let mut record = ReactionRecord::load(store.clone(), Namespace::Secrets).unwrap();
        record.record("s1", Some(ReactionKind::Impresionante)).unwrap();

        let raw = store.get("lovisec-reactions").unwrap().unwrap();
        assert_eq!(raw, r#"{"s1":"impresionante"}"#);
    }

    #[test]
    fn namespaces_do_not_share_entries() {
        let store = store();
        let comments = Namespace::Comments { secret_id: "s1".into() };

        let mut a = ReactionRecord::load(store.clone(), Namespace::Secrets).unwrap();
        a.record("x", Some(ReactionKind::Turbio)).unwrap();

        let b = ReactionRecord::load(store, comments).unwrap();
        assert_eq!(b.get("x"), None);
    }

    #[test]
    fn one_bad_entry_does_not_erase_the_others() {
        let store = store();
        store
            .put("lovisec-reactions", r#"{"s1":"turbio","s2":"like"}"#)
            .unwrap();

        let mut record = ReactionRecord::load(store.clone(), Namespace::Secrets).unwrap();
        assert_eq!(record.get("s1"), Some(ReactionKind::Turbio));
        assert_eq!(record.get("s2"), None);

        record.record("s3", Some(ReactionKind::Impresionante)).unwrap();
        let reloaded = ReactionRecord::load(store, Namespace::Secrets).unwrap();
        assert_eq!(reloaded.get("s1"), Some(ReactionKind::Turbio));
        assert_eq!(reloaded.get("s3"), Some(ReactionKind::Impresionante));
    }
}

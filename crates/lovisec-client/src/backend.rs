use std::future::Future;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use lovisec_store::Namespace;
use lovisec_types::api::{Bucket, Credentials, ProfilePatch, Session, Table};
use lovisec_types::events::ChangeEvent;
use lovisec_types::models::{Profile, ReactionTally};

use crate::error::Result;

/// A queryable list: all secrets, or the comments of one secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    pub table: Table,
    /// Parent filter (`secret_id = ...`), only set for comment threads.
    pub secret_id: Option<String>,
}

impl Collection {
    pub fn secrets() -> Self {
        Self {
            table: Table::Secrets,
            secret_id: None,
        }
    }

    pub fn comments_of(secret_id: impl Into<String>) -> Self {
        Self {
            table: Table::Comments,
            secret_id: Some(secret_id.into()),
        }
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        event.table == self.table
            && self
                .secret_id
                .as_deref()
                .is_none_or(|id| event.column("secret_id") == Some(id))
    }

    pub fn namespace(&self) -> Namespace {
        match &self.secret_id {
            Some(secret_id) => Namespace::Comments {
                secret_id: secret_id.clone(),
            },
            None => Namespace::Secrets,
        }
    }

    /// Name of the realtime channel for this collection.
    pub fn channel_name(&self) -> String {
        match &self.secret_id {
            Some(secret_id) => format!("comments-{secret_id}"),
            None => "secrets-realtime".to_string(),
        }
    }
}

/// Offset/limit window over a newest-first listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRange {
    pub offset: usize,
    pub limit: usize,
}

/// Live change feed for one collection. Dropping it unsubscribes.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<ChangeEvent>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(rx: mpsc::UnboundedReceiver<ChangeEvent>, task: Option<JoinHandle<()>>) -> Self {
        Self { rx, task }
    }

    /// Next change, or `None` once the feed has closed.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// The hosted backend: rows, files, change feed and auth.
///
/// Every failure is returned to the caller; implementations never retry.
pub trait Backend: Send + Sync + 'static {
    /// Rows of `collection`, newest first, with the author profile joined.
    fn fetch_page<T>(
        &self,
        collection: &Collection,
        range: PageRange,
    ) -> impl Future<Output = Result<Vec<T>>> + Send
    where
        T: DeserializeOwned + Send;

    fn insert<T>(&self, table: Table, row: &T) -> impl Future<Output = Result<()>> + Send
    where
        T: Serialize + Sync;

    /// Overwrite the whole `reactions` column of one row.
    fn update_reactions(
        &self,
        table: Table,
        id: &str,
        tally: &ReactionTally,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Store an image and return its public URL.
    fn upload_image(
        &self,
        bucket: Bucket,
        name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> impl Future<Output = Result<String>> + Send;

    fn subscribe(
        &self,
        collection: &Collection,
    ) -> impl Future<Output = Result<Subscription>> + Send;

    fn sign_in(&self, credentials: &Credentials) -> impl Future<Output = Result<Session>> + Send;

    fn sign_up(&self, credentials: &Credentials) -> impl Future<Output = Result<Session>> + Send;

    fn sign_out(&self) -> impl Future<Output = Result<()>> + Send;

    /// The active session, if signed in.
    fn session(&self) -> Option<Session>;

    /// Reuse a session persisted by an earlier run.
    fn restore_session(&self, session: Session);

    fn fetch_profile(&self, user_id: &str) -> impl Future<Output = Result<Option<Profile>>> + Send;

    fn update_profile(
        &self,
        user_id: &str,
        patch: &ProfilePatch,
    ) -> impl Future<Output = Result<()>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn comment_collection_filters_by_parent() {
        let thread = Collection::comments_of("s1");
        let ours = ChangeEvent::insert(Table::Comments, json!({ "id": "c1", "secret_id": "s1" }));
        let theirs = ChangeEvent::insert(Table::Comments, json!({ "id": "c2", "secret_id": "s2" }));
        let secret = ChangeEvent::insert(Table::Secrets, json!({ "id": "s1" }));

        assert!(thread.matches(&ours));
        assert!(!thread.matches(&theirs));
        assert!(!thread.matches(&secret));
    }

    #[test]
    fn secrets_collection_matches_any_secret() {
        let feed = Collection::secrets();
        assert!(feed.matches(&ChangeEvent::update(Table::Secrets, json!({ "id": "s9" }))));
        assert!(!feed.matches(&ChangeEvent::update(Table::Comments, json!({ "id": "c9" }))));
    }

    #[test]
    fn namespaces_follow_collection() {
        assert_eq!(Collection::secrets().namespace(), Namespace::Secrets);
        assert_eq!(
            Collection::comments_of("s1").namespace(),
            Namespace::Comments { secret_id: "s1".into() }
        );
    }
}

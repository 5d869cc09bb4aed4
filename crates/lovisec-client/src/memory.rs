//! In-process backend.
//!
//! Rows are kept as JSON objects so they go through the same (de)serialization
//! as rows fetched over HTTP, and every insert/update is broadcast on a change
//! feed. Used by the test suites and for running the client without a server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use lovisec_types::api::{Bucket, Credentials, ProfilePatch, Session, Table};
use lovisec_types::events::ChangeEvent;
use lovisec_types::models::{Profile, ReactionTally};

use crate::backend::{Backend, Collection, PageRange, Subscription};
use crate::error::{ClientError, Result};

#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    /// table -> rows in insertion order
    tables: Mutex<HashMap<Table, Vec<Value>>>,

    /// "bucket/name" -> (content type, bytes)
    objects: Mutex<HashMap<String, (String, Vec<u8>)>>,

    /// email -> account
    accounts: Mutex<HashMap<String, MemoryAccount>>,

    session: Mutex<Option<Session>>,

    changes: broadcast::Sender<ChangeEvent>,

    /// When set, every remote operation fails as if the network were down.
    offline: AtomicBool,
}

struct MemoryAccount {
    user_id: String,
    password: String,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(MemoryInner {
                tables: Mutex::new(HashMap::new()),
                objects: Mutex::new(HashMap::new()),
                accounts: Mutex::new(HashMap::new()),
                session: Mutex::new(None),
                changes,
                offline: AtomicBool::new(false),
            }),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Insert a row with an explicit timestamp and no change event, as if it
    /// had been written before this client connected.
    pub fn seed(&self, table: Table, mut row: Value, created_at: DateTime<Utc>) -> String {
        let id = fill_defaults(table, &mut row, created_at);
        lock(&self.inner.tables).entry(table).or_default().push(row);
        id
    }

    /// Insert a row as another client would: stored, then broadcast.
    pub fn insert_external(&self, table: Table, mut row: Value) -> String {
        let id = fill_defaults(table, &mut row, Utc::now());
        lock(&self.inner.tables)
            .entry(table)
            .or_default()
            .push(row.clone());
        self.broadcast(ChangeEvent::insert(table, row));
        id
    }

    /// Publish a change without touching the stored rows.
    pub fn broadcast(&self, event: ChangeEvent) {
        let _ = self.inner.changes.send(event);
    }

    /// Snapshot of a stored row.
    pub fn row(&self, table: Table, id: &str) -> Option<Value> {
        lock(&self.inner.tables)
            .get(&table)
            .and_then(|rows| rows.iter().find(|r| row_id(r) == Some(id)).cloned())
    }

    pub fn row_count(&self, table: Table) -> usize {
        lock(&self.inner.tables).get(&table).map_or(0, Vec::len)
    }

    /// Stored object bytes, looked up by bucket and name.
    pub fn object(&self, bucket: Bucket, name: &str) -> Option<Vec<u8>> {
        lock(&self.inner.objects)
            .get(&object_key(bucket, name))
            .map(|(_, bytes)| bytes.clone())
    }

    fn ensure_online(&self, operation: &'static str) -> Result<()> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(ClientError::backend(operation, "backend unreachable"));
        }
        Ok(())
    }

    fn profile_value(&self, user_id: &str) -> Option<Value> {
        self.row(Table::Profiles, user_id)
    }

    fn start_session(&self, user_id: String, email: &str) -> Session {
        let session = Session {
            user_id,
            email: Some(email.to_string()),
            access_token: Uuid::new_v4().to_string(),
            refresh_token: None,
            expires_at: None,
        };
        *lock(&self.inner.session) = Some(session.clone());
        session
    }
}

impl Backend for MemoryBackend {
    async fn fetch_page<T>(&self, collection: &Collection, range: PageRange) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send,
    {
        self.ensure_online("fetch")?;

        let mut rows: Vec<Value> = {
            let tables = lock(&self.inner.tables);
            tables
                .get(&collection.table)
                .map(|rows| {
                    rows.iter()
                        .rev()
                        .filter(|row| match &collection.secret_id {
                            Some(id) => {
                                row.get("secret_id").and_then(Value::as_str) == Some(id.as_str())
                            }
                            None => true,
                        })
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };

        // Stable sort over reverse insertion order: equal timestamps list the
        // most recent insert first.
        rows.sort_by_key(|row| std::cmp::Reverse(created_at(row)));

        rows.into_iter()
            .skip(range.offset)
            .take(range.limit)
            .map(|mut row| {
                let profile = row
                    .get("user_id")
                    .and_then(Value::as_str)
                    .and_then(|uid| self.profile_value(uid));
                if let (Some(profile), Some(obj)) = (profile, row.as_object_mut()) {
                    obj.insert("profile".into(), profile);
                }
                serde_json::from_value(row).map_err(ClientError::from)
            })
            .collect()
    }

    async fn insert<T>(&self, table: Table, row: &T) -> Result<()>
    where
        T: Serialize + Sync,
    {
        self.ensure_online("insert")?;

        let row = serde_json::to_value(row)?;
        if !row.is_object() {
            return Err(ClientError::backend("insert", "row must be a JSON object"));
        }

        let id = self.insert_external(table, row);
        debug!("Inserted {} row {}", table, id);
        Ok(())
    }

    async fn update_reactions(&self, table: Table, id: &str, tally: &ReactionTally) -> Result<()> {
        self.ensure_online("update")?;

        let snapshot = {
            let mut tables = lock(&self.inner.tables);
            let row = tables
                .get_mut(&table)
                .and_then(|rows| rows.iter_mut().find(|r| row_id(r) == Some(id)));
            match row {
                Some(row) => {
                    row["reactions"] = serde_json::to_value(tally)?;
                    Some(row.clone())
                }
                None => None,
            }
        };

        match snapshot {
            Some(row) => self.broadcast(ChangeEvent::update(table, row)),
            // Filtered updates that match nothing are not an error.
            None => debug!("Update of {} row {} matched nothing", table, id),
        }
        Ok(())
    }

    async fn upload_image(
        &self,
        bucket: Bucket,
        name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String> {
        self.ensure_online("upload")?;

        let key = object_key(bucket, name);
        let mut objects = lock(&self.inner.objects);
        if objects.contains_key(&key) {
            return Err(ClientError::backend("upload", format!("{key} already exists")));
        }
        objects.insert(key.clone(), (content_type.to_string(), bytes));

        Ok(format!("memory://{key}"))
    }

    async fn subscribe(&self, collection: &Collection) -> Result<Subscription> {
        self.ensure_online("subscribe")?;

        let mut changes = self.inner.changes.subscribe();
        let (tx, rx) = mpsc::unbounded_channel();
        let collection = collection.clone();

        let task = tokio::spawn(async move {
            loop {
                let event = match changes.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Change feed lagged by {} events", n);
                        continue;
                    }
                    Err(_) => break,
                };

                if collection.matches(&event) && tx.send(event).is_err() {
                    break;
                }
            }
        });

        Ok(Subscription::new(rx, Some(task)))
    }

    async fn sign_in(&self, credentials: &Credentials) -> Result<Session> {
        self.ensure_online("sign in")?;

        let user_id = {
            let accounts = lock(&self.inner.accounts);
            match accounts.get(&credentials.email) {
                Some(account) if account.password == credentials.password => {
                    account.user_id.clone()
                }
                _ => return Err(ClientError::Auth("Invalid login credentials".into())),
            }
        };

        Ok(self.start_session(user_id, &credentials.email))
    }

    async fn sign_up(&self, credentials: &Credentials) -> Result<Session> {
        self.ensure_online("sign up")?;

        let user_id = Uuid::new_v4().to_string();
        {
            let mut accounts = lock(&self.inner.accounts);
            if accounts.contains_key(&credentials.email) {
                return Err(ClientError::Auth("User already registered".into()));
            }
            accounts.insert(
                credentials.email.clone(),
                MemoryAccount {
                    user_id: user_id.clone(),
                    password: credentials.password.clone(),
                },
            );
        }

        // The hosted backend creates the profile from a sign-up trigger.
        let now = Utc::now();
        self.seed(
            Table::Profiles,
            json!({
                "id": user_id,
                "username": format!("anon_{}", &user_id[..8]),
                "avatar_seed": Uuid::new_v4().to_string(),
                "updated_at": now,
            }),
            now,
        );

        Ok(self.start_session(user_id, &credentials.email))
    }

    async fn sign_out(&self) -> Result<()> {
        lock(&self.inner.session).take();
        Ok(())
    }

    fn session(&self) -> Option<Session> {
        lock(&self.inner.session).clone()
    }

    fn restore_session(&self, session: Session) {
        *lock(&self.inner.session) = Some(session);
    }

    async fn fetch_profile(&self, user_id: &str) -> Result<Option<Profile>> {
        self.ensure_online("fetch profile")?;

        self.profile_value(user_id)
            .map(serde_json::from_value)
            .transpose()
            .map_err(ClientError::from)
    }

    async fn update_profile(&self, user_id: &str, patch: &ProfilePatch) -> Result<()> {
        self.ensure_online("update profile")?;

        let mut tables = lock(&self.inner.tables);
        let profiles = tables.entry(Table::Profiles).or_default();

        if let Some(username) = &patch.username {
            let taken = profiles.iter().any(|p| {
                row_id(p) != Some(user_id)
                    && p.get("username").and_then(Value::as_str) == Some(username.as_str())
            });
            if taken {
                return Err(ClientError::UsernameTaken);
            }
        }

        let Some(profile) = profiles.iter_mut().find(|p| row_id(p) == Some(user_id)) else {
            return Err(ClientError::backend("update profile", "profile not found"));
        };
        if let Some(username) = &patch.username {
            profile["username"] = json!(username);
        }
        if let Some(seed) = &patch.avatar_seed {
            profile["avatar_seed"] = json!(seed);
        }
        profile["updated_at"] = json!(Utc::now());

        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // State stays consistent even if a holder panicked: every critical
    // section is a single map operation.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn object_key(bucket: Bucket, name: &str) -> String {
    format!("{}/{}", bucket.as_str(), name)
}

fn row_id(row: &Value) -> Option<&str> {
    row.get("id").and_then(Value::as_str)
}

fn created_at(row: &Value) -> Option<DateTime<Utc>> {
    row.get("created_at")
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
}

/// Give a new row the columns the database would default. Returns its id.
fn fill_defaults(table: Table, row: &mut Value, created_at: DateTime<Utc>) -> String {
    let id = row_id(row)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    if let Some(obj) = row.as_object_mut() {
        obj.insert("id".into(), json!(id));
        obj.entry("created_at").or_insert_with(|| json!(created_at));
        if table != Table::Profiles {
            obj.entry("reactions")
                .or_insert_with(|| json!(ReactionTally::default()));
        }
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use lovisec_types::models::Secret;

    #[tokio::test]
    async fn fetch_orders_newest_first_with_offsets() {
        let backend = MemoryBackend::new();
        let base = Utc::now();
        for i in 0..5 {
            backend.seed(
                Table::Secrets,
                json!({ "id": format!("s{i}"), "content": format!("#{i}") }),
                base + chrono::Duration::seconds(i),
            );
        }

        let page: Vec<Secret> = backend
            .fetch_page(&Collection::secrets(), PageRange { offset: 1, limit: 2 })
            .await
            .unwrap();
        let ids: Vec<_> = page.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["s3", "s2"]);
    }

    #[tokio::test]
    async fn offline_mode_fails_every_call() {
        let backend = MemoryBackend::new();
        backend.set_offline(true);

        let fetched: Result<Vec<Secret>> = backend
            .fetch_page(&Collection::secrets(), PageRange { offset: 0, limit: 10 })
            .await;
        assert!(matches!(fetched, Err(ClientError::Backend { .. })));
        assert!(backend.subscribe(&Collection::secrets()).await.is_err());
    }

    #[tokio::test]
    async fn subscription_receives_inserts_and_updates() {
        let backend = MemoryBackend::new();
        let mut sub = backend.subscribe(&Collection::secrets()).await.unwrap();

        let id = backend.insert_external(Table::Secrets, json!({ "content": "hola" }));
        backend
            .update_reactions(Table::Secrets, &id, &ReactionTally::new(1, 0, 0))
            .await
            .unwrap();

        let first = sub.next().await.unwrap();
        let second = sub.next().await.unwrap();
        assert_eq!(first.column("id"), Some(id.as_str()));
        assert_eq!(second.record["reactions"]["turbio"], 1);
    }

    #[tokio::test]
    async fn sign_up_creates_profile_and_session() {
        let backend = MemoryBackend::new();
        let creds = Credentials {
            email: "a@b.c".into(),
            password: "hunter22".into(),
        };

        let session = backend.sign_up(&creds).await.unwrap();
        let profile = backend.fetch_profile(&session.user_id).await.unwrap().unwrap();
        assert!(profile.username.starts_with("anon_"));
        assert!(backend.sign_up(&creds).await.is_err());

        backend.sign_out().await.unwrap();
        assert!(backend.session().is_none());

        let wrong = Credentials {
            email: "a@b.c".into(),
            password: "nope".into(),
        };
        assert!(matches!(backend.sign_in(&wrong).await, Err(ClientError::Auth(_))));
        assert!(backend.sign_in(&creds).await.is_ok());
    }
}

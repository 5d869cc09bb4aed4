//! HTTP backend speaking the hosted service's REST, auth and storage APIs.

use std::sync::RwLock;

use chrono::{Duration, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use lovisec_types::api::{Bucket, Credentials, ProfilePatch, ReactionsPatch, Session, Table};
use lovisec_types::models::{Profile, ReactionTally};

use crate::backend::{Backend, Collection, PageRange, Subscription};
use crate::error::{ClientError, Result};
use crate::realtime::RealtimeClient;

/// Postgres unique-violation code, reported when a username is taken.
const UNIQUE_VIOLATION: &str = "23505";

const JOINED_SELECT: &str = "*,profile:profiles(*)";

pub struct RestBackend {
    http: Client,
    base_url: String,
    anon_key: String,
    realtime: RealtimeClient,
    session: RwLock<Option<Session>>,
}

impl RestBackend {
    pub fn new(base_url: &str, anon_key: &str) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            http: Client::new(),
            realtime: RealtimeClient::new(&base_url, anon_key),
            base_url,
            anon_key: anon_key.to_string(),
            session: RwLock::new(None),
        }
    }

    fn table_url(&self, table: Table) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    pub fn public_object_url(&self, bucket: Bucket, name: &str) -> String {
        format!("{}/storage/v1/object/public/{}/{}", self.base_url, bucket, name)
    }

    fn access_token(&self) -> Option<String> {
        self.session
            .read()
            .ok()
            .and_then(|s| s.as_ref().map(|s| s.access_token.clone()))
    }

    fn set_session(&self, session: Option<Session>) {
        match self.session.write() {
            Ok(mut guard) => *guard = session,
            Err(e) => error!("Session lock poisoned: {}", e),
        }
    }

    /// Attach the API key and the bearer token (the session's, else the key).
    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        let token = self
            .access_token()
            .unwrap_or_else(|| self.anon_key.clone());
        req.header("apikey", &self.anon_key).bearer_auth(token)
    }

    async fn token_request(&self, url: String, credentials: &Credentials) -> Result<Session> {
        let resp = self
            .http
            .post(url)
            .header("apikey", &self.anon_key)
            .json(credentials)
            .send()
            .await?;

        if !resp.status().is_success() {
            let failure = ErrorBody::read(resp).await;
            return Err(ClientError::Auth(failure.message()));
        }

        let body: TokenResponse = resp.json().await?;
        let Some(access_token) = body.access_token else {
            return Err(ClientError::Auth(
                "account created, confirm the email address before signing in".into(),
            ));
        };

        let user = body
            .user
            .ok_or_else(|| ClientError::Auth("auth response has no user".into()))?;
        let session = Session {
            user_id: user.id,
            email: user.email,
            access_token,
            refresh_token: body.refresh_token,
            expires_at: body.expires_in.map(|secs| Utc::now() + Duration::seconds(secs)),
        };

        self.set_session(Some(session.clone()));
        Ok(session)
    }
}

impl Backend for RestBackend {
    async fn fetch_page<T>(&self, collection: &Collection, range: PageRange) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send,
    {
        let mut query = vec![
            ("select", JOINED_SELECT.to_string()),
            ("order", "created_at.desc".to_string()),
            ("offset", range.offset.to_string()),
            ("limit", range.limit.to_string()),
        ];
        if let Some(secret_id) = &collection.secret_id {
            query.push(("secret_id", format!("eq.{secret_id}")));
        }

        let resp = self
            .authed(self.http.get(self.table_url(collection.table)))
            .query(&query)
            .send()
            .await?;
        let resp = check(resp, "fetch").await?;

        let rows: Vec<T> = resp.json().await?;
        debug!(
            "Fetched {} {} rows at offset {}",
            rows.len(),
            collection.table,
            range.offset
        );
        Ok(rows)
    }

    async fn insert<T>(&self, table: Table, row: &T) -> Result<()>
    where
        T: Serialize + Sync,
    {
        let resp = self
            .authed(self.http.post(self.table_url(table)))
            .header("Prefer", "return=minimal")
            .json(row)
            .send()
            .await?;
        check(resp, "insert").await?;
        Ok(())
    }

    async fn update_reactions(&self, table: Table, id: &str, tally: &ReactionTally) -> Result<()> {
        let patch = ReactionsPatch { reactions: *tally };
        let resp = self
            .authed(self.http.patch(self.table_url(table)))
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", "return=minimal")
            .json(&patch)
            .send()
            .await?;
        check(resp, "update").await?;
        Ok(())
    }

    async fn upload_image(
        &self,
        bucket: Bucket,
        name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String> {
        let url = format!("{}/storage/v1/object/{}/{}", self.base_url, bucket, name);
        let size = bytes.len();
        let resp = self
            .authed(self.http.post(url))
            .header("Content-Type", content_type)
            .header("x-upsert", "false")
            .body(bytes)
            .send()
            .await?;
        check(resp, "upload").await?;

        info!("Uploaded {} ({} bytes) to {}", name, size, bucket);
        Ok(self.public_object_url(bucket, name))
    }

    async fn subscribe(&self, collection: &Collection) -> Result<Subscription> {
        self.realtime
            .subscribe(collection, self.access_token())
            .await
    }

    async fn sign_in(&self, credentials: &Credentials) -> Result<Session> {
        self.token_request(self.auth_url("token?grant_type=password"), credentials)
            .await
    }

    async fn sign_up(&self, credentials: &Credentials) -> Result<Session> {
        self.token_request(self.auth_url("signup"), credentials).await
    }

    async fn sign_out(&self) -> Result<()> {
        let token = self.access_token();
        self.set_session(None);

        let Some(token) = token else {
            return Ok(());
        };

        let resp = self
            .http
            .post(self.auth_url("logout"))
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
            .send()
            .await?;
        // An already-expired token still counts as signed out.
        if resp.status() != StatusCode::UNAUTHORIZED {
            check(resp, "sign out").await?;
        }
        Ok(())
    }

    fn session(&self) -> Option<Session> {
        self.session.read().ok().and_then(|s| s.clone())
    }

    fn restore_session(&self, session: Session) {
        self.set_session(Some(session));
    }

    async fn fetch_profile(&self, user_id: &str) -> Result<Option<Profile>> {
        let resp = self
            .authed(self.http.get(self.table_url(Table::Profiles)))
            .query(&[("select", "*".to_string()), ("id", format!("eq.{user_id}"))])
            .send()
            .await?;
        let resp = check(resp, "fetch profile").await?;

        let mut profiles: Vec<Profile> = resp.json().await?;
        Ok(profiles.pop())
    }

    async fn update_profile(&self, user_id: &str, patch: &ProfilePatch) -> Result<()> {
        let resp = self
            .authed(self.http.patch(self.table_url(Table::Profiles)))
            .query(&[("id", format!("eq.{user_id}"))])
            .header("Prefer", "return=minimal")
            .json(patch)
            .send()
            .await?;

        if resp.status().is_success() {
            return Ok(());
        }

        let failure = ErrorBody::read(resp).await;
        if failure.code.as_deref() == Some(UNIQUE_VIOLATION) {
            return Err(ClientError::UsernameTaken);
        }
        Err(ClientError::backend("update profile", failure.message()))
    }
}

/// Turn a non-2xx response into a `Backend` error carrying the server message.
async fn check(resp: Response, operation: &'static str) -> Result<Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }

    let status = resp.status();
    let failure = ErrorBody::read(resp).await;
    warn!("{} failed ({}): {}", operation, status, failure.message());
    Err(ClientError::backend(operation, failure.message()))
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(skip)]
    status: Option<StatusCode>,
}

impl ErrorBody {
    async fn read(resp: Response) -> Self {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        let mut body: ErrorBody = serde_json::from_str(&text).unwrap_or_else(|_| ErrorBody {
            message: (!text.is_empty()).then_some(text),
            ..Default::default()
        });
        body.status = Some(status);
        body
    }

    /// The most specific human-readable message the service gave.
    fn message(&self) -> String {
        self.error_description
            .as_ref()
            .or(self.msg.as_ref())
            .or(self.message.as_ref())
            .or(self.error.as_ref())
            .cloned()
            .unwrap_or_else(|| match self.status {
                Some(status) => status.to_string(),
                None => "unknown error".to_string(),
            })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    user: Option<AuthUser>,
}

#[derive(Debug, Deserialize)]
struct AuthUser {
    id: String,
    email: Option<String>,
}

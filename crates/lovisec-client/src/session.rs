use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use lovisec_store::LocalStore;
use lovisec_types::api::{Credentials, ProfilePatch, Session};
use lovisec_types::models::Profile;

use crate::backend::Backend;
use crate::error::{ClientError, Result, ValidationError};

pub const MIN_USERNAME_CHARS: usize = 3;
pub const MIN_PASSWORD_CHARS: usize = 6;

pub fn validate_credentials(credentials: &Credentials) -> std::result::Result<(), ValidationError> {
    if credentials.email.trim().is_empty() {
        return Err(ValidationError::MissingEmail);
    }
    if credentials.password.chars().count() < MIN_PASSWORD_CHARS {
        return Err(ValidationError::PasswordTooShort {
            min: MIN_PASSWORD_CHARS,
        });
    }
    Ok(())
}

/// The viewer's account: sign-in state mirrored into the local store so it
/// survives restarts, plus profile edits.
pub struct Account<B> {
    backend: Arc<B>,
    store: Arc<LocalStore>,
}

impl<B: Backend> Account<B> {
    /// Hand any saved, unexpired session to the backend.
    pub fn new(backend: Arc<B>, store: Arc<LocalStore>) -> Result<Self> {
        match store.session()? {
            Some(session) if session.is_expired(Utc::now()) => {
                info!("Saved session for {} has expired", session.user_id);
                store.set_session(None)?;
            }
            Some(session) => backend.restore_session(session),
            None => {}
        }

        Ok(Self { backend, store })
    }

    pub fn session(&self) -> Option<Session> {
        self.backend.session()
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        let credentials = credentials(email, password);
        validate_credentials(&credentials)?;

        let session = self.backend.sign_in(&credentials).await?;
        self.remember(&session);
        info!("Signed in as {}", credentials.email);
        Ok(session)
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<Session> {
        let credentials = credentials(email, password);
        validate_credentials(&credentials)?;

        let session = self.backend.sign_up(&credentials).await?;
        self.remember(&session);
        info!("Created account for {}", credentials.email);
        Ok(session)
    }

    /// Forget the session locally even if the backend call fails.
    pub async fn sign_out(&self) -> Result<()> {
        let result = self.backend.sign_out().await;
        if let Err(e) = self.store.set_session(None) {
            warn!("Could not clear saved session: {}", e);
        }
        result
    }

    pub async fn profile(&self) -> Result<Profile> {
        let session = self.require_session()?;
        self.backend
            .fetch_profile(&session.user_id)
            .await?
            .ok_or_else(|| ClientError::backend("fetch profile", "no profile for this account"))
    }

    /// Change the username. Returns the stored (trimmed) name.
    pub async fn rename(&self, username: &str) -> Result<String> {
        let username = username.trim();
        if username.chars().count() < MIN_USERNAME_CHARS {
            return Err(ValidationError::UsernameTooShort {
                min: MIN_USERNAME_CHARS,
            }
            .into());
        }
        let session = self.require_session()?;

        let patch = ProfilePatch {
            username: Some(username.to_string()),
            ..Default::default()
        };
        self.backend.update_profile(&session.user_id, &patch).await?;

        info!("Username changed to {}", username);
        Ok(username.to_string())
    }

    /// Pick a fresh avatar seed. Returns the new seed.
    pub async fn reroll_avatar(&self) -> Result<String> {
        let session = self.require_session()?;
        let seed = Uuid::new_v4().to_string();

        let patch = ProfilePatch {
            avatar_seed: Some(seed.clone()),
            ..Default::default()
        };
        self.backend.update_profile(&session.user_id, &patch).await?;
        Ok(seed)
    }

    fn require_session(&self) -> Result<Session> {
        self.backend.session().ok_or(ClientError::NotSignedIn)
    }

    fn remember(&self, session: &Session) {
        if let Err(e) = self.store.set_session(Some(session)) {
            warn!("Signed in, but the session was not saved: {}", e);
        }
    }
}

fn credentials(email: &str, password: &str) -> Credentials {
    Credentials {
        email: email.trim().to_string(),
        password: password.to_string(),
    }
}

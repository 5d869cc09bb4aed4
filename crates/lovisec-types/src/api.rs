use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::ReactionTally;

// -- Collections --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Secrets,
    Comments,
    Profiles,
}

impl Table {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Secrets => "secrets",
            Self::Comments => "comments",
            Self::Profiles => "profiles",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Public object-storage buckets for user images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    SecretImages,
    CommentImages,
}

impl Bucket {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SecretImages => "secret-images",
            Self::CommentImages => "comment-images",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// -- Inserts --

#[derive(Debug, Clone, Serialize)]
pub struct NewSecret {
    pub content: String,
    pub encrypted_content: Option<String>,
    pub image_url: Option<String>,
    pub user_id: Option<String>,
    pub reactions: ReactionTally,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewComment {
    pub secret_id: String,
    pub content: String,
    pub encrypted_content: Option<String>,
    pub image_url: Option<String>,
    pub user_id: Option<String>,
    pub reactions: ReactionTally,
}

// -- Updates --

#[derive(Debug, Clone, Serialize)]
pub struct ReactionsPatch {
    pub reactions: ReactionTally,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfilePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_seed: Option<String>,
}

// -- Auth --

#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// A signed-in session. Persisted client-side so the CLI survives restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    pub email: Option<String>,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

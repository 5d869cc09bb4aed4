use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub username: String,
    pub avatar_seed: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The three reactions a viewer can leave. Serialized names are the keys the
/// backend stores in the `reactions` JSON column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReactionKind {
    Turbio,
    Impresionante,
    NoMeGusta,
}

impl ReactionKind {
    pub const ALL: [ReactionKind; 3] = [
        ReactionKind::Turbio,
        ReactionKind::Impresionante,
        ReactionKind::NoMeGusta,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Turbio => "turbio",
            Self::Impresionante => "impresionante",
            Self::NoMeGusta => "noMeGusta",
        }
    }
}

impl fmt::Display for ReactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown reaction '{0}' (expected turbio, impresionante or noMeGusta)")]
pub struct UnknownReaction(pub String);

impl FromStr for ReactionKind {
    type Err = UnknownReaction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownReaction(s.to_string()))
    }
}

/// Aggregate reaction counts across all users. Counts are unsigned so a tally
/// can never go negative; missing keys read as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReactionTally {
    pub turbio: u32,
    pub impresionante: u32,
    #[serde(rename = "noMeGusta")]
    pub no_me_gusta: u32,
}

impl ReactionTally {
    pub fn new(turbio: u32, impresionante: u32, no_me_gusta: u32) -> Self {
        Self {
            turbio,
            impresionante,
            no_me_gusta,
        }
    }

    pub fn get(&self, kind: ReactionKind) -> u32 {
        match kind {
            ReactionKind::Turbio => self.turbio,
            ReactionKind::Impresionante => self.impresionante,
            ReactionKind::NoMeGusta => self.no_me_gusta,
        }
    }

    pub fn get_mut(&mut self, kind: ReactionKind) -> &mut u32 {
        match kind {
            ReactionKind::Turbio => &mut self.turbio,
            ReactionKind::Impresionante => &mut self.impresionante,
            ReactionKind::NoMeGusta => &mut self.no_me_gusta,
        }
    }
}

/// A top-level anonymous post, as stored by the backend.
///
/// `content` is the plaintext column. When `encrypted_content` is present the
/// client shows its revealed form instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Secret {
    pub id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub reactions: ReactionTally,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<Profile>,
}

/// A reply attached to a [`Secret`] through `secret_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub secret_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub reactions: ReactionTally,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<Profile>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tally_uses_backend_key_names() {
        let tally = ReactionTally::new(2, 0, 1);
        let json = serde_json::to_value(tally).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "turbio": 2, "impresionante": 0, "noMeGusta": 1 })
        );
    }

    #[test]
    fn missing_tally_keys_default_to_zero() {
        let tally: ReactionTally = serde_json::from_str(r#"{ "turbio": 4 }"#).unwrap();
        assert_eq!(tally, ReactionTally::new(4, 0, 0));
    }

    #[test]
    fn negative_counts_are_rejected() {
        let result = serde_json::from_str::<ReactionTally>(r#"{ "turbio": -1 }"#);
        assert!(result.is_err());
    }

    #[test]
    fn reaction_kind_parses_wire_names() {
        assert_eq!("noMeGusta".parse::<ReactionKind>(), Ok(ReactionKind::NoMeGusta));
        assert_eq!("TURBIO".parse::<ReactionKind>(), Ok(ReactionKind::Turbio));
        let err = "meh".parse::<ReactionKind>().unwrap_err();
        assert_eq!(
            err.to_string(),
            "unknown reaction 'meh' (expected turbio, impresionante or noMeGusta)"
        );
        assert_eq!(
            serde_json::to_string(&ReactionKind::NoMeGusta).unwrap(),
            "\"noMeGusta\""
        );
    }

    #[test]
    fn secret_row_parses_backend_snapshot() {
        let row = serde_json::json!({
            "id": "5b1f",
            "content": "hola",
            "encrypted_content": null,
            "image_url": null,
            "category": null,
            "created_at": "2025-03-01T10:15:00.123456+00:00",
            "user_id": null,
            "reactions": { "turbio": 1, "impresionante": 0, "noMeGusta": 0 }
        });
        let secret: Secret = serde_json::from_value(row).unwrap();
        assert_eq!(secret.id, "5b1f");
        assert_eq!(secret.reactions.turbio, 1);
        assert!(secret.encrypted_content.is_none());
        assert!(secret.profile.is_none());
    }
}

use std::fmt;
use std::str::FromStr;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::warn;

use lovisec_types::api::Session;

use crate::LocalStore;

const THEME_KEY: &str = "lovisec-theme";
const SESSION_KEY: &str = "lovisec-session";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
    Matrix,
}

impl Theme {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Dark => "dark",
            Self::Matrix => "matrix",
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Theme {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "light" => Ok(Self::Light),
            "dark" => Ok(Self::Dark),
            "matrix" => Ok(Self::Matrix),
            other => Err(anyhow!("unknown theme '{}'", other)),
        }
    }
}

impl LocalStore {
    /// Stored as the bare theme name, not JSON.
    pub fn theme(&self) -> Result<Theme> {
        let Some(raw) = self.get(THEME_KEY)? else {
            return Ok(Theme::default());
        };

        Ok(raw.parse().unwrap_or_else(|e| {
            warn!("{}, falling back to light", e);
            Theme::default()
        }))
    }

    pub fn set_theme(&self, theme: Theme) -> Result<()> {
        self.put(THEME_KEY, theme.as_str())
    }

    pub fn session(&self) -> Result<Option<Session>> {
        self.get_json(SESSION_KEY)
    }

    pub fn set_session(&self, session: Option<&Session>) -> Result<()> {
        match session {
            Some(session) => self.put_json(SESSION_KEY, session),
            None => self.remove(SESSION_KEY),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn theme_defaults_to_light() {
        let store = LocalStore::open_in_memory().unwrap();
        assert_eq!(store.theme().unwrap(), Theme::Light);

        store.put(THEME_KEY, "neon").unwrap();
        assert_eq!(store.theme().unwrap(), Theme::Light);
    }

    #[test]
    fn theme_roundtrips_as_bare_name() {
        let store = LocalStore::open_in_memory().unwrap();
        store.set_theme(Theme::Matrix).unwrap();
        assert_eq!(store.get(THEME_KEY).unwrap().as_deref(), Some("matrix"));
        assert_eq!(store.theme().unwrap(), Theme::Matrix);
    }

    #[test]
    fn session_save_and_clear() {
        let store = LocalStore::open_in_memory().unwrap();
        let session = Session {
            user_id: "u1".into(),
            email: Some("a@b.c".into()),
            access_token: "tok".into(),
            refresh_token: None,
            expires_at: None,
        };

        store.set_session(Some(&session)).unwrap();
        assert_eq!(store.session().unwrap(), Some(session));

        store.set_session(None).unwrap();
        assert_eq!(store.session().unwrap(), None);
    }
}

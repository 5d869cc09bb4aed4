use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{debug, warn};

pub const DEFAULT_PAGE_SIZE: usize = 10;
const DEFAULT_STATE_PATH: &str = "lovisec.db";

/// Settings read from the environment (after `.env` is loaded by the binary).
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the hosted backend, e.g. `https://xyz.supabase.co`.
    pub backend_url: Option<String>,
    /// Public anonymous API key sent with every request.
    pub anon_key: String,
    pub state_path: PathBuf,
    pub page_size: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let backend_url = env::var("LOVISEC_BACKEND_URL")
            .ok()
            .map(|url| url.trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty());
        if backend_url.is_none() {
            debug!("LOVISEC_BACKEND_URL not set, only offline commands are available");
        }

        let anon_key = env::var("LOVISEC_ANON_KEY").unwrap_or_else(|_| {
            if backend_url.is_some() {
                warn!("LOVISEC_ANON_KEY not set, requests will be unauthenticated");
            }
            String::new()
        });

        let state_path = env::var("LOVISEC_STATE_PATH")
            .unwrap_or_else(|_| DEFAULT_STATE_PATH.into())
            .into();

        let page_size = match env::var("LOVISEC_PAGE_SIZE") {
            Ok(raw) => raw
                .parse::<usize>()
                .with_context(|| format!("Invalid LOVISEC_PAGE_SIZE '{}'", raw))?
                .max(1),
            Err(_) => DEFAULT_PAGE_SIZE,
        };

        Ok(Self {
            backend_url,
            anon_key,
            state_path,
            page_size,
        })
    }
}

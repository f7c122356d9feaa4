//! Environment-driven settings for the Telraam client.
//!
//! Values are read from the process environment after `.env` has been
//! loaded with `dotenvy`.

use anyhow::{Context, Result};

use crate::infra::telraam::client::DEFAULT_BASE_URL;

pub const API_KEY_VAR: &str = "TELRAAM_API_KEY";
pub const BASE_URL_VAR: &str = "TELRAAM_BASE_URL";

#[derive(Debug, Clone)]
pub struct Settings {
    pub api_key: String,
    pub base_url: String,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds settings from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_key = lookup(API_KEY_VAR)
            .filter(|v| !v.trim().is_empty())
            .with_context(|| format!("{API_KEY_VAR} must be set"))?;
        let base_url = lookup(BASE_URL_VAR)
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        Ok(Self { api_key, base_url })
    }
}

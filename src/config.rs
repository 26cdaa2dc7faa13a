use std::time::Duration;

use anyhow::{Context, Result};

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Settings read from the environment once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub project_id: Option<String>,
    pub storage_bucket: Option<String>,
    pub port: u16,
    pub poll_interval: Duration,
    pub log_json: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let port = match lookup("PORT") {
            Some(port) => port.parse().context("PORT is not a valid port number")?,
            None => DEFAULT_PORT,
        };

        let poll_ms = match lookup("CHAT_POLL_INTERVAL_MS") {
            Some(ms) => ms
                .parse()
                .context("CHAT_POLL_INTERVAL_MS is not a number of milliseconds")?,
            None => DEFAULT_POLL_INTERVAL_MS,
        };

        Ok(Config {
            project_id: lookup("GCP_PROJECT_ID"),
            storage_bucket: lookup("CHAT_STORAGE_BUCKET"),
            port,
            poll_interval: Duration::from_millis(poll_ms),
            log_json: lookup("LOG_JSON").is_some(),
        })
    }

    pub fn project_id(&self) -> Result<&str> {
        self.project_id
            .as_deref()
            .context("Expected GCP_PROJECT_ID env var.")
    }

    pub fn storage_bucket(&self) -> Result<&str> {
        self.storage_bucket
            .as_deref()
            .context("Expected CHAT_STORAGE_BUCKET env var.")
    }
}

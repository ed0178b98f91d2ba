//! Sync engine configuration
//!
//! ## Environment Variables
//!
//! Every setting can be overridden from the environment (the binary also
//! loads a `.env` file first):
//!
//! - `BILLSYNC_SERVER_URL` - Backend base URL
//! - `BILLSYNC_DB_PATH` - Replica database file (defaults to the user data dir)
//! - `BILLSYNC_APP_NAME` - Data directory name when no path is given
//! - `BILLSYNC_SYNC_INTERVAL_SECS` - Periodic sync interval
//! - `BILLSYNC_PROBE_INTERVAL_SECS` - Connectivity probe interval, 0 disables polling
//! - `BILLSYNC_REQUEST_TIMEOUT_SECS` - HTTP request timeout
//! - `BILLSYNC_AUTH_TOKEN` - Bearer token for the backend
//! - `BILLSYNC_AUTO_SYNC` - Install the periodic schedule on init
//! - `BILLSYNC_PUSH_ON_WRITE` - Start a cycle after each local write when online
//! - `BILLSYNC_STRATEGY` - Default conflict strategy (smart, local, server)

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, SyncError};
use crate::sync::Strategy;

pub const ENV_SERVER_URL: &str = "BILLSYNC_SERVER_URL";
pub const ENV_DB_PATH: &str = "BILLSYNC_DB_PATH";
pub const ENV_APP_NAME: &str = "BILLSYNC_APP_NAME";
pub const ENV_SYNC_INTERVAL_SECS: &str = "BILLSYNC_SYNC_INTERVAL_SECS";
pub const ENV_PROBE_INTERVAL_SECS: &str = "BILLSYNC_PROBE_INTERVAL_SECS";
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "BILLSYNC_REQUEST_TIMEOUT_SECS";
pub const ENV_AUTH_TOKEN: &str = "BILLSYNC_AUTH_TOKEN";
pub const ENV_AUTO_SYNC: &str = "BILLSYNC_AUTO_SYNC";
pub const ENV_PUSH_ON_WRITE: &str = "BILLSYNC_PUSH_ON_WRITE";
pub const ENV_STRATEGY: &str = "BILLSYNC_STRATEGY";

/// Configuration for the sync manager
#[derive(Clone, Debug, PartialEq)]
pub struct SyncConfig {
    /// Backend base URL
    pub server_url: String,
    /// Replica database file; `None` uses the user data directory
    pub database_path: Option<PathBuf>,
    /// Data directory name under the user data directory
    pub app_name: String,
    /// Periodic sync interval
    pub sync_interval_secs: u64,
    /// Connectivity probe interval (0 = only explicit reports)
    pub probe_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub auth_token: Option<String>,
    /// Install the periodic schedule on init
    pub auto_sync: bool,
    /// Nudge a sync after each local write while online
    pub push_on_write: bool,
    pub default_strategy: Strategy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8080".to_string(),
            database_path: None,
            app_name: "billsync".to_string(),
            sync_interval_secs: 300,
            probe_interval_secs: 15,
            request_timeout_secs: 30,
            auth_token: None,
            auto_sync: true,
            push_on_write: true,
            default_strategy: Strategy::Smart,
        }
    }
}

impl SyncConfig {
    /// Defaults overridden by `BILLSYNC_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup(ENV_SERVER_URL) {
            config.server_url = url;
        }
        if let Some(path) = lookup(ENV_DB_PATH) {
            config.database_path = Some(PathBuf::from(path));
        }
        if let Some(name) = lookup(ENV_APP_NAME) {
            config.app_name = name;
        }
        if let Some(v) = lookup(ENV_SYNC_INTERVAL_SECS) {
            config.sync_interval_secs = parse_number(ENV_SYNC_INTERVAL_SECS, &v)?;
        }
        if let Some(v) = lookup(ENV_PROBE_INTERVAL_SECS) {
            config.probe_interval_secs = parse_number(ENV_PROBE_INTERVAL_SECS, &v)?;
        }
        if let Some(v) = lookup(ENV_REQUEST_TIMEOUT_SECS) {
            config.request_timeout_secs = parse_number(ENV_REQUEST_TIMEOUT_SECS, &v)?;
        }
        if let Some(token) = lookup(ENV_AUTH_TOKEN).filter(|t| !t.is_empty()) {
            config.auth_token = Some(token);
        }
        if let Some(v) = lookup(ENV_AUTO_SYNC) {
            config.auto_sync = parse_flag(ENV_AUTO_SYNC, &v)?;
        }
        if let Some(v) = lookup(ENV_PUSH_ON_WRITE) {
            config.push_on_write = parse_flag(ENV_PUSH_ON_WRITE, &v)?;
        }
        if let Some(v) = lookup(ENV_STRATEGY) {
            config.default_strategy = v.parse()?;
        }

        Ok(config)
    }

    /// Check the settings are usable before wiring anything up
    pub fn validate(&self) -> Result<()> {
        if !(self.server_url.starts_with("http://") || self.server_url.starts_with("https://")) {
            return Err(SyncError::InvalidConfig(format!(
                "server_url must be an http(s) URL, got '{}'",
                self.server_url
            )));
        }
        if self.sync_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "sync_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "request_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.app_name.trim().is_empty() {
            return Err(SyncError::InvalidConfig("app_name is empty".to_string()));
        }
        Ok(())
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    /// `None` when connectivity polling is disabled
    pub fn probe_interval(&self) -> Option<Duration> {
        (self.probe_interval_secs > 0).then(|| Duration::from_secs(self.probe_interval_secs))
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| SyncError::InvalidConfig(format!("{} must be a number, got '{}'", key, value)))
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(SyncError::InvalidConfig(format!(
            "{} must be a boolean, got '{}'",
            key, value
        ))),
    }
}

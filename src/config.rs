//! Configuration parsing and validation.
//!
//! Stitchboard reads a single TOML file (default `./config/stitch.toml`).
//!
//! ```toml
//! [db]
//! path = "./data/stitch.sqlite"
//!
//! [server]
//! bind = "127.0.0.1:7340"
//! allowed_origins = ["https://shop.example.com"]
//!
//! [analytics]
//! device_policy = "user_agent"     # or "viewport_width"
//! popular_pages_limit = 5
//! popular_pages_window = 1000
//! recent_limit = 10
//! refresh_interval_secs = 30
//! session_idle_minutes = 30
//!
//! [auth]
//! admin_email = "owner@example.com"
//! admin_password_sha256 = "<hex sha256 of the password>"
//! session_secret = "<long random string>"
//! session_ttl_hours = 12
//!
//! [logging]
//! level = "info"
//! json = false
//!
//! [[catalog.products]]
//! id = "1"
//! name = "Apple Keychain"
//! price = 100
//! ```

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use stitchboard_core::classify::{Classifier, DevicePolicy};
use stitchboard_core::orders::Catalog;
use stitchboard_core::snapshot::{
    SnapshotOptions, DEFAULT_POPULAR_PAGES_LIMIT, DEFAULT_POPULAR_PAGES_WINDOW,
    DEFAULT_RECENT_LIMIT,
};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub catalog: Catalog,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    /// Origins allowed by CORS. Empty allows any origin.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalyticsConfig {
    #[serde(default)]
    pub device_policy: DevicePolicy,
    #[serde(default = "default_popular_pages_limit")]
    pub popular_pages_limit: usize,
    /// `0` groups every stored page view.
    #[serde(default = "default_popular_pages_window")]
    pub popular_pages_window: usize,
    #[serde(default = "default_recent_limit")]
    pub recent_limit: usize,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_session_idle_minutes")]
    pub session_idle_minutes: i64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            device_policy: DevicePolicy::default(),
            popular_pages_limit: default_popular_pages_limit(),
            popular_pages_window: default_popular_pages_window(),
            recent_limit: default_recent_limit(),
            refresh_interval_secs: default_refresh_interval_secs(),
            session_idle_minutes: default_session_idle_minutes(),
        }
    }
}

impl AnalyticsConfig {
    pub fn classifier(&self) -> Classifier {
        Classifier::with_policy(self.device_policy)
    }

    /// Snapshot options with "today" anchored to `now`'s time zone.
    pub fn snapshot_options<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> SnapshotOptions {
        SnapshotOptions {
            popular_pages_limit: self.popular_pages_limit,
            popular_pages_window: match self.popular_pages_window {
                0 => None,
                n => Some(n),
            },
            recent_limit: self.recent_limit,
            ..SnapshotOptions::at(now)
        }
    }
}

fn default_popular_pages_limit() -> usize {
    DEFAULT_POPULAR_PAGES_LIMIT
}
fn default_popular_pages_window() -> usize {
    DEFAULT_POPULAR_PAGES_WINDOW
}
fn default_recent_limit() -> usize {
    DEFAULT_RECENT_LIMIT
}
fn default_refresh_interval_secs() -> u64 {
    30
}
fn default_session_idle_minutes() -> i64 {
    30
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub admin_email: Option<String>,
    /// Hex-encoded SHA-256 of the admin password.
    #[serde(default)]
    pub admin_password_sha256: Option<String>,
    #[serde(default)]
    pub session_secret: Option<String>,
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: i64,
}

fn default_session_ttl_hours() -> i64 {
    12
}

impl AuthConfig {
    /// The dashboard is only served when an admin account is configured.
    pub fn is_enabled(&self) -> bool {
        self.admin_email.is_some()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Longest idle gap, in minutes, before a tracking session is forgotten (one week).
pub const MAX_SESSION_IDLE_MINUTES: i64 = 7 * 24 * 60;

/// Longest dashboard session lifetime, in hours (one year).
pub const MAX_SESSION_TTL_HOURS: i64 = 365 * 24;

pub fn validate(config: &Config) -> Result<()> {
    let analytics = &config.analytics;
    if analytics.popular_pages_limit < 1 {
        anyhow::bail!("analytics.popular_pages_limit must be >= 1");
    }
    if analytics.recent_limit < 1 {
        anyhow::bail!("analytics.recent_limit must be >= 1");
    }
    if analytics.refresh_interval_secs < 1 {
        anyhow::bail!("analytics.refresh_interval_secs must be >= 1");
    }
    if !(1..=MAX_SESSION_IDLE_MINUTES).contains(&analytics.session_idle_minutes) {
        anyhow::bail!(
            "analytics.session_idle_minutes must be between 1 and {}",
            MAX_SESSION_IDLE_MINUTES
        );
    }

    let auth = &config.auth;
    if auth.is_enabled() {
        match auth.admin_password_sha256.as_deref() {
            Some(h) if h.len() == 64 && h.chars().all(|c| c.is_ascii_hexdigit()) => {}
            _ => anyhow::bail!(
                "auth.admin_password_sha256 must be a 64-character hex SHA-256 digest when auth.admin_email is set"
            ),
        }
        match auth.session_secret.as_deref() {
            Some(s) if s.len() >= 16 => {}
            _ => anyhow::bail!(
                "auth.session_secret must be at least 16 characters when auth.admin_email is set"
            ),
        }
        if !(1..=MAX_SESSION_TTL_HOURS).contains(&auth.session_ttl_hours) {
            anyhow::bail!(
                "auth.session_ttl_hours must be between 1 and {}",
                MAX_SESSION_TTL_HOURS
            );
        }
    }

    let mut seen = std::collections::HashSet::new();
    for product in &config.catalog.products {
        if product.id.trim().is_empty() || product.id == stitchboard_core::orders::CUSTOM_PRODUCT_ID {
            anyhow::bail!("catalog product ids must be non-empty and not 'custom'");
        }
        if !seen.insert(product.id.as_str()) {
            anyhow::bail!("duplicate catalog product id: '{}'", product.id);
        }
    }

    match config.logging.level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        other => anyhow::bail!(
            "Unknown logging.level: '{}'. Must be trace, debug, info, warn, or error.",
            other
        ),
    }

    Ok(())
}

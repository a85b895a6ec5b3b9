//! Configuration for the governance service

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::constants::*;

/// Top-level service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceConfig {
    /// Database connection URL (MySQL, Postgres or SQLite)
    pub database_url: String,

    /// Maximum database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Database connection timeout in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// Enable SQL query logging
    #[serde(default)]
    pub enable_sql_logging: bool,

    /// Listen address for the HTTP server
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Name of the registered auth provider resolving request identities
    #[serde(default = "default_auth_provider")]
    pub auth_provider: String,

    #[serde(default)]
    pub rate_limits: RateLimitDefaults,

    #[serde(default)]
    pub batch: BatchDefaults,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            max_connections: default_max_connections(),
            connection_timeout_secs: default_connection_timeout(),
            enable_sql_logging: false,
            listen_addr: default_listen_addr(),
            auth_provider: default_auth_provider(),
            rate_limits: RateLimitDefaults::default(),
            batch: BatchDefaults::default(),
        }
    }
}

/// Default and global batch submission limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitDefaults {
    #[serde(default = "default_max_pending_parents")]
    pub max_pending_parents: u64,
    #[serde(default = "default_max_pending_children")]
    pub max_pending_children: u64,
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
    #[serde(default = "default_global_max_pending_parents")]
    pub global_max_pending_parents: u64,
    #[serde(default = "default_global_max_submissions")]
    pub global_max_submissions_per_window: u64,
    #[serde(default = "default_global_window")]
    pub global_window_seconds: u64,
    #[serde(default = "default_pending_retry_after")]
    pub pending_retry_after_seconds: u64,
}

impl Default for RateLimitDefaults {
    fn default() -> Self {
        Self {
            max_pending_parents: default_max_pending_parents(),
            max_pending_children: default_max_pending_children(),
            cooldown_seconds: default_cooldown_seconds(),
            global_max_pending_parents: default_global_max_pending_parents(),
            global_max_submissions_per_window: default_global_max_submissions(),
            global_window_seconds: default_global_window(),
            pending_retry_after_seconds: default_pending_retry_after(),
        }
    }
}

/// Batch shape and polling settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchDefaults {
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    #[serde(default = "default_poll_retry_after")]
    pub status_poll_retry_after_seconds: u64,
    #[serde(default = "default_status_url_prefix")]
    pub status_url_prefix: String,
}

impl Default for BatchDefaults {
    fn default() -> Self {
        Self {
            max_items: default_max_items(),
            status_poll_retry_after_seconds: default_poll_retry_after(),
            status_url_prefix: default_status_url_prefix(),
        }
    }
}

fn default_max_connections() -> u32 {
    50
}

fn default_connection_timeout() -> u64 {
    30
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_auth_provider() -> String {
    "header".to_string()
}

fn default_max_pending_parents() -> u64 {
    DEFAULT_MAX_PENDING_PARENTS
}

fn default_max_pending_children() -> u64 {
    DEFAULT_MAX_PENDING_CHILDREN
}

fn default_cooldown_seconds() -> u64 {
    DEFAULT_COOLDOWN_SECONDS
}

fn default_global_max_pending_parents() -> u64 {
    GLOBAL_MAX_PENDING_PARENTS
}

fn default_global_max_submissions() -> u64 {
    GLOBAL_MAX_SUBMISSIONS_PER_WINDOW
}

fn default_global_window() -> u64 {
    GLOBAL_SUBMISSION_WINDOW_SECONDS
}

fn default_pending_retry_after() -> u64 {
    PENDING_LIMIT_RETRY_AFTER_SECONDS
}

fn default_max_items() -> usize {
    MAX_BATCH_ITEMS
}

fn default_poll_retry_after() -> u64 {
    STATUS_POLL_RETRY_AFTER_SECONDS
}

fn default_status_url_prefix() -> String {
    BATCH_STATUS_URL_PREFIX.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: GovernanceConfig = serde_json::from_str(
            r#"{
                "database_url": "sqlite::memory:",
                "rate_limits": { "cooldown_seconds": 10 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.max_connections, 50);
        assert_eq!(config.auth_provider, "header");
        assert_eq!(config.rate_limits.cooldown_seconds, 10);
        assert_eq!(config.rate_limits.max_pending_parents, 3);
        assert_eq!(config.rate_limits.max_pending_children, 30);
        assert_eq!(config.rate_limits.global_max_pending_parents, 100);
        assert_eq!(config.rate_limits.global_max_submissions_per_window, 1000);
        assert_eq!(config.batch.max_items, 100);
        assert_eq!(config.batch.status_poll_retry_after_seconds, 2);
    }
}

//!
//! Configuration management for PoolMux.
//!
//! This module provides a layered configuration system using:
//! - Platform-native configuration directories (XDG on Linux, standard paths on macOS/Windows)
//! - TOML format for human-readable configuration files
//! - Multi-layered configuration hierarchy (env vars > user config > system config > defaults)
//!
//! Split into:
//! - `loader.rs` - Configuration loading logic
//! - `paths.rs` - Platform-native path resolution
//! - `validation.rs` - Configuration validation
//! - `cli.rs` - CLI configuration commands
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- modules --------------------------------------------------------------------------------- */

pub mod cli;
pub mod loader;
pub mod paths;
pub mod validation;

/* --- uses ------------------------------------------------------------------------------------ */

use std::collections::BTreeSet;
use std::time::Duration;

use crate::error::{ProxyError, Result};
use serde::{Deserialize, Serialize};

/* --- types ----------------------------------------------------------------------------------- */

///
/// Main application configuration structure.
///
/// Every section has serde defaults so partial TOML files are accepted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Backend endpoint configuration
    #[serde(default)]
    pub backend: BackendConfig,
    /// Retry and auto-disable policy
    #[serde(default)]
    pub retry: RetryConfig,
    /// Credential source and selection policy
    #[serde(default)]
    pub credentials: CredentialsConfig,
    /// Truncation recovery settings
    #[serde(default)]
    pub truncation: TruncationConfig,
    /// Synthetic streaming settings
    #[serde(default)]
    pub fake_stream: FakeStreamConfig,
}

///
/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_host")]
    pub host: String,
    /// HTTP server port number
    #[serde(default = "default_port")]
    pub port: u16,
    /// Application logging level
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,
    /// Optional key inbound clients must present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

///
/// Backend endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the internal generate-content API
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// User-Agent sent with every backend call
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Ceiling for a single unary call (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Execute unary calls as a streaming call and collect the result
    #[serde(default = "default_collect_stream_for_unary")]
    pub collect_stream_for_unary: bool,
}

///
/// Retry and auto-disable policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Whether retryable failures are retried at all
    #[serde(default = "default_retry_enabled")]
    pub enabled: bool,
    /// Additional attempts after the first one
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Wait between attempts (milliseconds)
    #[serde(default = "default_retry_interval")]
    pub interval_ms: u64,
    /// Whether auto-ban status codes disable credentials
    #[serde(default)]
    pub auto_ban_enabled: bool,
    /// Status codes that count toward auto-disable
    #[serde(default = "default_auto_ban_error_codes")]
    pub auto_ban_error_codes: Vec<u16>,
    /// Number of matching history entries that disables a credential
    #[serde(default = "default_auto_ban_threshold")]
    pub auto_ban_threshold: usize,
    /// Whether empty 200 responses count toward auto-disable
    #[serde(default)]
    pub count_silent_failures: bool,
}

///
/// Credential source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// Directory holding one JSON file per credential
    #[serde(default = "default_credentials_dir")]
    pub dir: String,
    /// Selection policy among eligible credentials
    #[serde(default)]
    pub selection: SelectionPolicy,
}

///
/// Truncation recovery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TruncationConfig {
    /// Upper bound on continuation calls per logical stream (1..=10)
    #[serde(default = "default_truncation_attempts")]
    pub max_attempts: u32,
}

///
/// Synthetic streaming configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FakeStreamConfig {
    /// Interval between keep-alive events (milliseconds)
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,
    /// Characters per emitted content chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

///
/// Credential selection policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// Rotate through credentials ordered by id
    #[default]
    RoundRobin,
    /// Pick the eligible credential that was handed out longest ago
    LeastRecentlyUsed,
}

///
/// Logging level enumeration.
///
/// Defines available log levels compatible with tracing crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/* --- defaults -------------------------------------------------------------------------------- */

fn default_host() -> String {
    "0.0.0.0".to_string()
}

/// Default HTTP port
fn default_port() -> u16 {
    7861
}

/// Default logging level
fn default_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_base_url() -> String {
    "https://daily-cloudcode-pa.sandbox.googleapis.com".to_string()
}

fn default_user_agent() -> String {
    "antigravity/1.11.3 windows/amd64".to_string()
}

/// Default unary ceiling (5 minutes)
fn default_request_timeout() -> u64 {
    300
}

fn default_collect_stream_for_unary() -> bool {
    true
}

/// Default retry behavior
fn default_retry_enabled() -> bool {
    true
}

/// Default maximum retry attempts
fn default_max_retries() -> u32 {
    5
}

/// Default wait between attempts (100 ms)
fn default_retry_interval() -> u64 {
    100
}

fn default_auto_ban_error_codes() -> Vec<u16> {
    vec![400, 403]
}

fn default_auto_ban_threshold() -> usize {
    1
}

fn default_credentials_dir() -> String {
    "./creds".to_string()
}

fn default_truncation_attempts() -> u32 {
    3
}

/// Default keep-alive interval (3 seconds)
fn default_heartbeat_interval() -> u64 {
    3000
}

fn default_chunk_size() -> usize {
    50
}

/* --- implementations --------------------------------------------------------------------- */

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            api_key: None,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            request_timeout_secs: default_request_timeout(),
            collect_stream_for_unary: default_collect_stream_for_unary(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: default_retry_enabled(),
            max_retries: default_max_retries(),
            interval_ms: default_retry_interval(),
            auto_ban_enabled: false,
            auto_ban_error_codes: default_auto_ban_error_codes(),
            auto_ban_threshold: default_auto_ban_threshold(),
            count_silent_failures: false,
        }
    }
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self { dir: default_credentials_dir(), selection: SelectionPolicy::default() }
    }
}

impl Default for TruncationConfig {
    fn default() -> Self {
        Self { max_attempts: default_truncation_attempts() }
    }
}

impl Default for FakeStreamConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval(),
            chunk_size: default_chunk_size(),
        }
    }
}

impl Config {
    /// Load configuration from the standard hierarchy:
    /// 1. Environment variables (highest priority, `.env` included)
    /// 2. User config file (~/.config/poolmux/config.toml)
    /// 3. System config file (/etc/poolmux/config.toml)
    /// 4. Built-in defaults (lowest priority)
    ///
    /// # Returns
    /// * `Ok(Config)` - Successfully loaded configuration
    /// * `Err(ProxyError)` - Configuration loading failed
    ///
    /// # Examples
    /// ```rust,no_run
    /// use poolmux::config::Config;
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let config = Config::load()?;
    /// println!("Server will run on port {}", config.server.port);
    /// # Ok(())
    /// # }
    /// ```
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();

        loader::ConfigLoader::new()
            .with_defaults()
            .with_system_config()?
            .with_user_config()?
            .with_env_vars()?
            .build_base()
    }

    /// Validate the current configuration
    ///
    /// # Returns
    /// * `Ok(())` - Configuration is valid
    /// * `Err(ProxyError)` - Configuration validation failed with details
    pub fn validate(&self) -> Result<()> {
        validation::ConfigValidator::new(self).validate()
    }

    /// Get configuration file example as TOML string
    pub fn example_toml() -> &'static str {
        r#"# PoolMux Configuration
# This file should be placed at:
#   Linux/Unix: ~/.config/poolmux/config.toml
#   macOS: ~/Library/Application Support/com.SkyCorp.poolmux/config.toml
#   Windows: %APPDATA%/SkyCorp/poolmux/config/config.toml

[server]
host = "0.0.0.0"
port = 7861
# trace, debug, info, warn, error
log_level = "info"
# api_key = "change-me"

[backend]
base_url = "https://daily-cloudcode-pa.sandbox.googleapis.com"
request_timeout_secs = 300
# Execute non-streaming calls as a stream and collect the result
collect_stream_for_unary = true

[retry]
enabled = true
max_retries = 5
interval_ms = 100
auto_ban_enabled = false
auto_ban_error_codes = [400, 403]
auto_ban_threshold = 1
# Count empty 200 responses toward auto-disable
count_silent_failures = false

[credentials]
# One JSON file per credential: {"access_token": "...", "project_id": "..."}
dir = "~/.config/poolmux/creds"
# round_robin or least_recently_used
selection = "round_robin"

[truncation]
max_attempts = 3

[fake_stream]
heartbeat_interval_ms = 3000
chunk_size = 50
"#
    }
}

impl BackendConfig {
    /// Ceiling applied to unary transport calls
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl RetryConfig {
    /// Wait applied between attempts
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Effective auto-ban set; empty while auto-ban is switched off
    pub fn auto_ban_codes(&self) -> BTreeSet<u16> {
        if self.auto_ban_enabled {
            self.auto_ban_error_codes.iter().copied().collect()
        } else {
            BTreeSet::new()
        }
    }
}

impl FakeStreamConfig {
    /// Keep-alive interval
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

impl LogLevel {
    /// Convert to tracing::Level for logging setup
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }

    /// Check if trace-level logging is enabled
    pub fn is_trace_enabled(self) -> bool {
        matches!(self, LogLevel::Trace | LogLevel::Debug)
    }

    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(ProxyError::Config(format!(
                "Invalid log level '{}'. Valid levels are: trace, debug, info, warn, error",
                s
            ))),
        }
    }

    /// Filter directive for tracing-subscriber's EnvFilter
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl SelectionPolicy {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "round_robin" | "rr" => Ok(SelectionPolicy::RoundRobin),
            "least_recently_used" | "lru" => Ok(SelectionPolicy::LeastRecentlyUsed),
            _ => Err(ProxyError::Config(format!(
                "Invalid selection policy '{}'. Valid policies are: round_robin, least_recently_used",
                s
            ))),
        }
    }
}

/* --- tests ----------------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_toml_parses() {
        let config: Config = toml::from_str(Config::example_toml()).expect("example must parse");
        assert_eq!(config.server.port, 7861);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.credentials.selection, SelectionPolicy::RoundRobin);
        assert_eq!(config.fake_stream.chunk_size, 50);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str("[retry]\nmax_retries = 2\n").unwrap();
        assert_eq!(config.retry.max_retries, 2);
        assert!(config.retry.enabled);
        assert_eq!(config.truncation.max_attempts, 3);
        assert_eq!(config.backend.request_timeout_secs, 300);
    }

    #[test]
    fn test_auto_ban_codes_respect_switch() {
        let mut retry = RetryConfig::default();
        assert!(retry.auto_ban_codes().is_empty());

        retry.auto_ban_enabled = true;
        assert_eq!(retry.auto_ban_codes().into_iter().collect::<Vec<_>>(), vec![400, 403]);
    }

    #[test]
    fn test_selection_policy_parsing() {
        assert_eq!(SelectionPolicy::from_str("LRU").unwrap(), SelectionPolicy::LeastRecentlyUsed);
        assert_eq!(SelectionPolicy::from_str("round-robin").unwrap(), SelectionPolicy::RoundRobin);
        assert!(SelectionPolicy::from_str("random").is_err());
    }
}

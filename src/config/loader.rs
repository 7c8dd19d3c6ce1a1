//!
//! Configuration loading system for PoolMux.
//!
//! Layers, highest priority first:
//! 1. Environment variables (`POOLMUX_*`)
//! 2. Explicit config file (`with_config_file`)
//! 3. User config file (~/.config/poolmux/config.toml)
//! 4. System config file (/etc/poolmux/config.toml)
//! 5. Built-in defaults
//!
//! File layers are merged as TOML tables, so a user file that sets only
//! `[retry] max_retries` keeps everything the system file configured.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use crate::config::paths;
use crate::config::{Config, LogLevel, SelectionPolicy};
use crate::error::{ProxyError, Result};

use std::collections::BTreeMap;
use std::env;
use std::path::Path;
use std::str::FromStr;

/* --- constants ------------------------------------------------------------------------------- */

/// Prefix shared by every recognised environment variable
pub const ENV_PREFIX: &str = "POOLMUX_";

/* --- types ----------------------------------------------------------------------------------- */

///
/// Configuration loader implementing the Builder pattern.
///
/// Each method returns self for chaining; `build_base` deserializes the merged
/// table and applies environment overrides on top.
pub struct ConfigLoader {
    /// Merged TOML table from every file layer seen so far
    table: toml::Table,
    /// Environment variable overrides collected
    env_overrides: BTreeMap<String, String>,
    /// Whether defaults have been applied
    defaults_applied: bool,
}

/* --- implementations --------------------------------------------------------------------- */

impl ConfigLoader {
    /// Create a new configuration loader
    ///
    /// # Examples
    /// ```rust,no_run
    /// use poolmux::config::loader::ConfigLoader;
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let config = ConfigLoader::new()
    ///     .with_defaults()
    ///     .with_user_config()?
    ///     .with_env_vars()?
    ///     .build_base()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new() -> Self {
        Self { table: toml::Table::new(), env_overrides: BTreeMap::new(), defaults_applied: false }
    }

    /// Apply built-in default values
    ///
    /// Should be called first in the loading chain.
    pub fn with_defaults(mut self) -> Self {
        self.table = toml::Table::new();
        self.defaults_applied = true;
        self
    }

    /// Load system-wide configuration file
    ///
    /// A missing file is not an error.
    ///
    /// # Returns
    /// * `Ok(Self)` - System config loaded or skipped (file not found)
    /// * `Err(ProxyError)` - System config exists but failed to load
    pub fn with_system_config(mut self) -> Result<Self> {
        let system_config_path = paths::system_config_file()?;

        if system_config_path.exists() {
            tracing::debug!("Loading system config from: {}", system_config_path.display());
            self.load_config_file(&system_config_path)?;
        } else {
            tracing::debug!("System config not found at: {}", system_config_path.display());
        }

        Ok(self)
    }

    /// Load user configuration file
    ///
    /// A missing file is not an error.
    ///
    /// # Returns
    /// * `Ok(Self)` - User config loaded or skipped (file not found)
    /// * `Err(ProxyError)` - User config exists but failed to load
    pub fn with_user_config(mut self) -> Result<Self> {
        let user_config_path = paths::user_config_file()?;

        if user_config_path.exists() {
            tracing::debug!("Loading user config from: {}", user_config_path.display());
            self.load_config_file(&user_config_path)?;
        } else {
            tracing::debug!("User config not found at: {}", user_config_path.display());
        }

        Ok(self)
    }

    /// Load configuration from specific file path
    ///
    /// # Arguments
    /// * `path` - Path to configuration file to load
    ///
    /// # Returns
    /// * `Ok(Self)` - Config loaded successfully
    /// * `Err(ProxyError)` - Failed to load or parse config file
    pub fn with_config_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!("Loading custom config from: {}", path.display());
        self.load_config_file(path)?;
        Ok(self)
    }

    /// Collect `POOLMUX_*` environment variables
    ///
    /// Supported environment variables:
    /// - POOLMUX_SERVER_HOST, POOLMUX_SERVER_PORT, POOLMUX_SERVER_LOG_LEVEL, POOLMUX_SERVER_API_KEY
    /// - POOLMUX_BACKEND_BASE_URL, POOLMUX_BACKEND_USER_AGENT,
    ///   POOLMUX_BACKEND_REQUEST_TIMEOUT_SECS, POOLMUX_BACKEND_COLLECT_STREAM_FOR_UNARY
    /// - POOLMUX_RETRY_ENABLED, POOLMUX_RETRY_MAX_RETRIES, POOLMUX_RETRY_INTERVAL_MS,
    ///   POOLMUX_RETRY_AUTO_BAN_ENABLED, POOLMUX_RETRY_AUTO_BAN_ERROR_CODES,
    ///   POOLMUX_RETRY_AUTO_BAN_THRESHOLD, POOLMUX_RETRY_COUNT_SILENT_FAILURES
    /// - POOLMUX_CREDENTIALS_DIR, POOLMUX_CREDENTIALS_SELECTION
    /// - POOLMUX_TRUNCATION_MAX_ATTEMPTS
    /// - POOLMUX_FAKE_STREAM_HEARTBEAT_INTERVAL_MS, POOLMUX_FAKE_STREAM_CHUNK_SIZE
    ///
    /// Values are applied in `build_base`, after every file layer.
    pub fn with_env_vars(mut self) -> Result<Self> {
        tracing::debug!("Loading configuration from environment variables");

        for (key, value) in env::vars() {
            if key.starts_with(ENV_PREFIX) {
                self.env_overrides.insert(key, value);
            }
        }

        Ok(self)
    }

    /// Build the final configuration and validate it
    ///
    /// # Returns
    /// * `Ok(Config)` - Valid, fully-loaded configuration
    /// * `Err(ProxyError)` - Configuration validation failed
    pub fn build(self) -> Result<Config> {
        let config = self.build_base()?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration without running the validator
    ///
    /// # Returns
    /// * `Ok(Config)` - Merged configuration
    /// * `Err(ProxyError)` - Merge or environment parsing failed
    pub fn build_base(self) -> Result<Config> {
        if !self.defaults_applied {
            return Err(ProxyError::Config(
                "Configuration loader must call with_defaults() before build()".to_string(),
            ));
        }

        let mut config: Config = toml::Value::Table(self.table).try_into().map_err(|e| {
            ProxyError::Config(format!("Failed to apply merged configuration: {}", e))
        })?;

        apply_env_overrides(&mut config, &self.env_overrides)?;

        tracing::debug!(
            "Base config: server.port={}, server.log_level={:?}, credentials.dir={}, retry.max_retries={}",
            config.server.port,
            config.server.log_level,
            config.credentials.dir,
            config.retry.max_retries
        );

        Ok(config)
    }

    /* --- private methods ----------------------------------------------------------------- */

    /// Load and merge configuration from a TOML file
    fn load_config_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();

        paths::validate_config_file(path)?;

        let contents = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::Config(format!(
                "Failed to read configuration file '{}': {}",
                path.display(),
                e
            ))
        })?;

        let parse_error = |e: &dyn std::fmt::Display| {
            ProxyError::Config(format!(
                "Failed to parse TOML configuration file '{}': {}\n\
                 \n\
                 Please check the syntax of your configuration file.\n\
                 Common issues:\n\
                 1. Missing quotes around string values\n\
                 2. Invalid TOML syntax\n\
                 3. Incorrect section names or field names\n\
                 \n\
                 Run 'poolmux config validate' for more details.",
                path.display(),
                e
            ))
        };

        let file_table: toml::Table = contents.parse().map_err(|e| parse_error(&e))?;

        // Type-check the file on its own so errors name the file at fault.
        let _: Config =
            toml::Value::Table(file_table.clone()).try_into().map_err(|e| parse_error(&e))?;

        merge_tables(&mut self.table, file_table);

        tracing::debug!("Successfully loaded config from: {}", path.display());
        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/* --- utility functions ------------------------------------------------------------------- */

/// Deep-merge `other` into `base`; scalar values in `other` win
fn merge_tables(base: &mut toml::Table, other: toml::Table) {
    for (key, value) in other {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Apply environment variable overrides to a built configuration
fn apply_env_overrides(config: &mut Config, vars: &BTreeMap<String, String>) -> Result<()> {
    for (key, value) in vars {
        match key.as_str() {
            "POOLMUX_SERVER_HOST" => config.server.host = value.clone(),
            "POOLMUX_SERVER_PORT" => {
                config.server.port = value.parse().map_err(|e| {
                    ProxyError::Config(format!(
                        "Invalid POOLMUX_SERVER_PORT value '{}': {}\n\
                         Port must be a number between 1 and 65535.",
                        value, e
                    ))
                })?;
            }
            "POOLMUX_SERVER_LOG_LEVEL" => config.server.log_level = LogLevel::from_str(value)?,
            "POOLMUX_SERVER_API_KEY" => {
                config.server.api_key = if value.is_empty() { None } else { Some(value.clone()) };
            }

            "POOLMUX_BACKEND_BASE_URL" => config.backend.base_url = value.clone(),
            "POOLMUX_BACKEND_USER_AGENT" => config.backend.user_agent = value.clone(),
            "POOLMUX_BACKEND_REQUEST_TIMEOUT_SECS" => {
                config.backend.request_timeout_secs = parse_number(value, key)?;
            }
            "POOLMUX_BACKEND_COLLECT_STREAM_FOR_UNARY" => {
                config.backend.collect_stream_for_unary = parse_bool_env(value, key)?;
            }

            "POOLMUX_RETRY_ENABLED" => config.retry.enabled = parse_bool_env(value, key)?,
            "POOLMUX_RETRY_MAX_RETRIES" => config.retry.max_retries = parse_number(value, key)?,
            "POOLMUX_RETRY_INTERVAL_MS" => config.retry.interval_ms = parse_number(value, key)?,
            "POOLMUX_RETRY_AUTO_BAN_ENABLED" => {
                config.retry.auto_ban_enabled = parse_bool_env(value, key)?;
            }
            "POOLMUX_RETRY_AUTO_BAN_ERROR_CODES" => {
                config.retry.auto_ban_error_codes = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| parse_number(s, key))
                    .collect::<Result<Vec<u16>>>()?;
            }
            "POOLMUX_RETRY_AUTO_BAN_THRESHOLD" => {
                config.retry.auto_ban_threshold = parse_number(value, key)?;
            }
            "POOLMUX_RETRY_COUNT_SILENT_FAILURES" => {
                config.retry.count_silent_failures = parse_bool_env(value, key)?;
            }

            "POOLMUX_CREDENTIALS_DIR" => config.credentials.dir = value.clone(),
            "POOLMUX_CREDENTIALS_SELECTION" => {
                config.credentials.selection = SelectionPolicy::from_str(value)?;
            }

            "POOLMUX_TRUNCATION_MAX_ATTEMPTS" => {
                config.truncation.max_attempts = parse_number(value, key)?;
            }

            "POOLMUX_FAKE_STREAM_HEARTBEAT_INTERVAL_MS" => {
                config.fake_stream.heartbeat_interval_ms = parse_number(value, key)?;
            }
            "POOLMUX_FAKE_STREAM_CHUNK_SIZE" => {
                config.fake_stream.chunk_size = parse_number(value, key)?;
            }

            // Consumed by the credential store, not the config tree.
            "POOLMUX_CREDENTIALS_B64" => {}

            _ => {
                tracing::debug!("Ignoring unknown environment variable: {}", key);
            }
        }
    }

    Ok(())
}

/// Parse a numeric environment value
fn parse_number<T>(value: &str, var_name: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| {
        ProxyError::Config(format!("Invalid {} value '{}': {}", var_name, value, e))
    })
}

/// Parse boolean value from environment variable
fn parse_bool_env(value: &str, var_name: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "true" | "yes" | "1" | "on" | "enabled" => Ok(true),
        "false" | "no" | "0" | "off" | "disabled" => Ok(false),
        _ => Err(ProxyError::Config(format!(
            "Invalid boolean value for {}: '{}'\n\
             Valid values: true/false, yes/no, 1/0, on/off, enabled/disabled",
            var_name, value
        ))),
    }
}

/* --- tests ------------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_config_loader_defaults() {
        let config =
            ConfigLoader::new().with_defaults().build_base().expect("Should build with defaults");

        assert_eq!(config.server.port, 7861);
        assert!(matches!(config.server.log_level, LogLevel::Info));
        assert!(config.retry.enabled);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.credentials.dir, "./creds");
    }

    #[test]
    fn test_config_loader_with_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join("config.toml");

        let config_content = r#"
[server]
port = 8080
log_level = "debug"

[credentials]
dir = "/var/lib/poolmux/creds"
selection = "least_recently_used"
"#;

        fs::write(&config_file, config_content).unwrap();

        let config = ConfigLoader::new()
            .with_defaults()
            .with_config_file(&config_file)
            .expect("Should create loader")
            .build_base()
            .expect("Should load custom config file");

        assert_eq!(config.server.port, 8080);
        assert!(matches!(config.server.log_level, LogLevel::Debug));
        assert_eq!(config.credentials.selection, SelectionPolicy::LeastRecentlyUsed);
    }

    #[test]
    fn test_layers_merge_per_key() {
        let temp_dir = TempDir::new().unwrap();
        let system = temp_dir.path().join("system.toml");
        let user = temp_dir.path().join("user.toml");

        fs::write(&system, "[retry]\nmax_retries = 9\ninterval_ms = 250\n").unwrap();
        fs::write(&user, "[retry]\nmax_retries = 2\n").unwrap();

        let config = ConfigLoader::new()
            .with_defaults()
            .with_config_file(&system)
            .unwrap()
            .with_config_file(&user)
            .unwrap()
            .build_base()
            .unwrap();

        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.retry.interval_ms, 250);
    }

    #[test]
    fn test_env_var_overrides() {
        temp_env::with_vars(
            [
                ("POOLMUX_SERVER_PORT", Some("9090")),
                ("POOLMUX_SERVER_LOG_LEVEL", Some("error")),
                ("POOLMUX_RETRY_AUTO_BAN_ERROR_CODES", Some("401, 403")),
                ("POOLMUX_CREDENTIALS_SELECTION", Some("lru")),
            ],
            || {
                let config = ConfigLoader::new()
                    .with_defaults()
                    .with_env_vars()
                    .expect("Should apply env vars")
                    .build_base()
                    .expect("Should build with env vars");

                assert_eq!(config.server.port, 9090);
                assert!(matches!(config.server.log_level, LogLevel::Error));
                assert_eq!(config.retry.auto_ban_error_codes, vec![401, 403]);
                assert_eq!(config.credentials.selection, SelectionPolicy::LeastRecentlyUsed);
            },
        );
    }

    #[test]
    fn test_precedence_order() {
        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join("config.toml");

        fs::write(&config_file, "[server]\nport = 7070\n").unwrap();

        temp_env::with_vars([("POOLMUX_SERVER_PORT", Some("8080"))], || {
            let config = ConfigLoader::new()
                .with_defaults()
                .with_env_vars()
                .expect("Should apply env vars")
                .with_config_file(&config_file)
                .expect("Should create loader")
                .build_base()
                .expect("Should build with precedence");

            // Env wins even when the file layer was added later.
            assert_eq!(config.server.port, 8080);
        });
    }

    #[test]
    fn test_invalid_toml_error() {
        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join("config.toml");

        fs::write(&config_file, "[server\nport = 8080\n").unwrap();

        let result = ConfigLoader::new()
            .with_defaults()
            .with_config_file(&config_file)
            .and_then(|loader| loader.build_base());

        assert!(result.is_err());
        let error_msg = format!("{}", result.unwrap_err());
        assert!(error_msg.contains("Failed to parse TOML"));
    }

    #[test]
    fn test_wrong_type_names_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join("config.toml");

        fs::write(&config_file, "[retry]\nmax_retries = \"many\"\n").unwrap();

        let err = ConfigLoader::new()
            .with_defaults()
            .with_config_file(&config_file)
            .err()
            .expect("type mismatch must fail");
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn test_invalid_env_number() {
        temp_env::with_vars([("POOLMUX_RETRY_MAX_RETRIES", Some("lots"))], || {
            let result = ConfigLoader::new().with_defaults().with_env_vars().unwrap().build_base();
            assert!(result.is_err());
        });
    }

    #[test]
    fn test_boolean_env_parsing() {
        assert!(parse_bool_env("true", "TEST").unwrap());
        assert!(parse_bool_env("yes", "TEST").unwrap());
        assert!(parse_bool_env("1", "TEST").unwrap());
        assert!(parse_bool_env("on", "TEST").unwrap());
        assert!(parse_bool_env("enabled", "TEST").unwrap());

        assert!(!parse_bool_env("false", "TEST").unwrap());
        assert!(!parse_bool_env("no", "TEST").unwrap());
        assert!(!parse_bool_env("0", "TEST").unwrap());
        assert!(!parse_bool_env("off", "TEST").unwrap());
        assert!(!parse_bool_env("disabled", "TEST").unwrap());

        assert!(parse_bool_env("invalid", "TEST").is_err());
    }
}

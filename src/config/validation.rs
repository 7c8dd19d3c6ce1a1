//!
//! Configuration validation for PoolMux.
//!
//! Checks network settings, backend endpoint, retry and auto-disable policy,
//! the credential directory and the streaming knobs. Every issue is collected
//! before a single error is returned.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use crate::config::paths;
use crate::config::{Config, LogLevel};
use crate::error::{ProxyError, Result};
use std::path::Path;

/* --- constants ------------------------------------------------------------------------------- */

/// Accepted range for `truncation.max_attempts`
pub const TRUNCATION_ATTEMPTS_RANGE: std::ops::RangeInclusive<u32> = 1..=10;

/* --- types ----------------------------------------------------------------------------------- */

///
/// Configuration validator.
///
/// Errors fail validation; warnings are logged and otherwise ignored.
pub struct ConfigValidator<'a> {
    /// Configuration to validate
    config: &'a Config,
    /// Validation errors collected during validation
    errors: Vec<String>,
    /// Validation warnings collected during validation
    warnings: Vec<String>,
}

/* --- implementations --------------------------------------------------------------------- */

impl<'a> ConfigValidator<'a> {
    /// Create a new configuration validator
    pub fn new(config: &'a Config) -> Self {
        Self { config, errors: Vec::new(), warnings: Vec::new() }
    }

    /// Run every check and fold the errors into one message
    ///
    /// # Returns
    /// * `Ok(())` - Configuration is valid
    /// * `Err(ProxyError)` - Configuration validation failed with detailed errors
    pub fn validate(mut self) -> Result<()> {
        self.run_checks();

        for warning in &self.warnings {
            tracing::warn!("Configuration warning: {}", warning);
        }

        if !self.errors.is_empty() {
            let error_msg = format!(
                "Configuration validation failed with {} error(s):\n\n{}\n\
                 \n\
                 Please fix these issues and try again.\n\
                 Run 'poolmux config init' to write an example configuration.",
                self.errors.len(),
                self.errors
                    .iter()
                    .enumerate()
                    .map(|(i, e)| format!("{}. {}", i + 1, e))
                    .collect::<Vec<_>>()
                    .join("\n")
            );
            return Err(ProxyError::Config(error_msg));
        }

        tracing::info!("Configuration validation passed");
        if !self.warnings.is_empty() {
            tracing::info!("Configuration has {} warning(s) but is valid", self.warnings.len());
        }

        Ok(())
    }

    /// Run every check and return the collected warnings instead of logging them
    pub fn warnings(mut self) -> Vec<String> {
        self.run_checks();
        self.warnings
    }

    /* --- private validation methods ------------------------------------------------------ */

    fn run_checks(&mut self) {
        self.validate_server_config();
        self.validate_backend_config();
        self.validate_retry_config();
        self.validate_credentials_config();
        self.validate_streaming_config();
        self.validate_security_requirements();
    }

    fn validate_server_config(&mut self) {
        let server = &self.config.server;

        if server.port == 0 {
            self.add_error(format!(
                "Invalid server port {}: must be between 1 and 65535",
                server.port
            ));
        } else if server.port < 1024 {
            self.add_warning(format!(
                "Server port {} requires root/administrator privileges",
                server.port
            ));
        }

        if server.host.trim().is_empty() {
            self.add_error("server.host cannot be empty".to_string());
        }

        if matches!(&server.api_key, Some(key) if key.trim().is_empty()) {
            self.add_error(
                "server.api_key is set but empty. Remove it to disable inbound key checks."
                    .to_string(),
            );
        }
    }

    fn validate_backend_config(&mut self) {
        let backend = &self.config.backend;

        if !(backend.base_url.starts_with("http://") || backend.base_url.starts_with("https://")) {
            self.add_error(format!(
                "Invalid backend.base_url '{}': must start with http:// or https://",
                backend.base_url
            ));
        }

        if backend.base_url.ends_with('/') {
            self.add_warning(format!(
                "backend.base_url '{}' ends with '/'; endpoint paths are appended directly",
                backend.base_url
            ));
        }

        if backend.request_timeout_secs == 0 {
            self.add_error("backend.request_timeout_secs cannot be zero".to_string());
        }

        if backend.user_agent.trim().is_empty() {
            self.add_warning("backend.user_agent is empty".to_string());
        }
    }

    fn validate_retry_config(&mut self) {
        let retry = &self.config.retry;

        if retry.max_retries > 20 {
            self.add_warning(format!(
                "High retry count ({}): may cause long delays on failures",
                retry.max_retries
            ));
        }

        if retry.interval_ms > 60_000 {
            self.add_warning(format!(
                "Long retry interval ({}ms): clients may time out before a retry lands",
                retry.interval_ms
            ));
        }

        if retry.auto_ban_threshold == 0 {
            self.add_error("retry.auto_ban_threshold must be at least 1".to_string());
        }

        let bad_codes: Vec<String> = retry
            .auto_ban_error_codes
            .iter()
            .filter(|code| !(100..=599).contains(*code))
            .map(|code| code.to_string())
            .collect();
        if !bad_codes.is_empty() {
            self.add_error(format!(
                "retry.auto_ban_error_codes contains invalid HTTP status codes: {}",
                bad_codes.join(", ")
            ));
        }

        if retry.auto_ban_enabled && retry.auto_ban_error_codes.is_empty() {
            self.add_warning(
                "retry.auto_ban_enabled is set but auto_ban_error_codes is empty".to_string(),
            );
        }

        if retry.auto_ban_enabled && retry.auto_ban_error_codes.contains(&429) {
            self.add_warning(
                "429 in retry.auto_ban_error_codes disables credentials on ordinary rate limits"
                    .to_string(),
            );
        }
    }

    fn validate_credentials_config(&mut self) {
        let dir = &self.config.credentials.dir;

        let expanded = match paths::expand_path(dir) {
            Ok(path) => path,
            Err(e) => {
                self.add_error(format!("Failed to expand credentials.dir '{}': {}", dir, e));
                return;
            }
        };

        if !expanded.exists() {
            if std::env::var("POOLMUX_CREDENTIALS_B64").is_err() {
                self.add_warning(format!(
                    "Credential directory '{}' does not exist; the pool will start empty.\n\
                     Create it and add one JSON file per credential:\n\
                       mkdir -p {}\n\
                       echo '{{\"access_token\":\"...\",\"project_id\":\"...\"}}' > {}/account-1.json",
                    expanded.display(),
                    expanded.display(),
                    expanded.display()
                ));
            }
            return;
        }

        if !expanded.is_dir() {
            self.add_error(format!(
                "credentials.dir '{}' exists but is not a directory",
                expanded.display()
            ));
            return;
        }

        if let Ok(entries) = std::fs::read_dir(&expanded) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == "json") {
                    self.validate_file_permissions(&path);
                }
            }
        }
    }

    /// Credential files hold bearer tokens; warn when others can read them
    fn validate_file_permissions(&mut self, path: &Path) {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            if let Ok(metadata) = std::fs::metadata(path) {
                let mode = metadata.permissions().mode();

                if mode & 0o044 != 0 {
                    self.add_warning(format!(
                        "Credential file '{}' is readable by group/others (permissions: {:o}). \
                         Consider restricting permissions: chmod 600 '{}'",
                        path.display(),
                        mode & 0o777,
                        path.display()
                    ));
                }
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = std::fs::File::open(path) {
                self.add_error(format!("Cannot open credential file '{}': {}", path.display(), e));
            }
        }
    }

    fn validate_streaming_config(&mut self) {
        let truncation = &self.config.truncation;
        if !TRUNCATION_ATTEMPTS_RANGE.contains(&truncation.max_attempts) {
            self.add_error(format!(
                "truncation.max_attempts {} is out of range: must be between {} and {}",
                truncation.max_attempts,
                TRUNCATION_ATTEMPTS_RANGE.start(),
                TRUNCATION_ATTEMPTS_RANGE.end()
            ));
        }

        let fake = &self.config.fake_stream;
        if fake.heartbeat_interval_ms == 0 {
            self.add_error("fake_stream.heartbeat_interval_ms cannot be zero".to_string());
        } else if fake.heartbeat_interval_ms > 30_000 {
            self.add_warning(format!(
                "Long heartbeat interval ({}ms): proxies may close idle connections first",
                fake.heartbeat_interval_ms
            ));
        }

        if fake.chunk_size == 0 {
            self.add_error("fake_stream.chunk_size cannot be zero".to_string());
        }
    }

    fn validate_security_requirements(&mut self) {
        if self.config.server.log_level == LogLevel::Trace {
            self.add_warning(
                "Trace log level enabled: may log sensitive information in production".to_string(),
            );
        }

        if self.config.server.api_key.is_none() && self.config.server.host != "127.0.0.1" {
            self.add_warning(format!(
                "No server.api_key set while listening on {}: anyone who can reach the port \
                 can spend the credential pool",
                self.config.server.host
            ));
        }

        if !self.config.retry.enabled {
            self.add_warning(
                "Retries are disabled: a single rate limit fails the client request".to_string(),
            );
        }
    }

    fn add_error(&mut self, error: String) {
        tracing::debug!("Validation error: {}", error);
        self.errors.push(error);
    }

    fn add_warning(&mut self, warning: String) {
        tracing::debug!("Validation warning: {}", warning);
        self.warnings.push(warning);
    }
}

/* --- tests ------------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn create_test_config(creds_dir: &Path) -> Config {
        let mut config = Config::default();
        config.server.api_key = Some("secret".to_string());
        config.credentials.dir = creds_dir.to_string_lossy().to_string();
        config
    }

    #[test]
    fn test_valid_config_passes_validation() {
        let temp_dir = TempDir::new().unwrap();
        let config = create_test_config(temp_dir.path());
        assert!(ConfigValidator::new(&config).validate().is_ok());
    }

    #[test]
    fn test_invalid_port_fails_validation() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = create_test_config(temp_dir.path());
        config.server.port = 0;

        let error_msg = ConfigValidator::new(&config).validate().unwrap_err().to_string();
        assert!(error_msg.contains("Invalid server port 0"));
    }

    #[test]
    fn test_truncation_attempts_range() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = create_test_config(temp_dir.path());

        config.truncation.max_attempts = 0;
        assert!(ConfigValidator::new(&config).validate().is_err());

        config.truncation.max_attempts = 11;
        assert!(ConfigValidator::new(&config).validate().is_err());

        config.truncation.max_attempts = 10;
        assert!(ConfigValidator::new(&config).validate().is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = create_test_config(temp_dir.path());
        config.backend.base_url = "ftp://backend".to_string();
        config.fake_stream.chunk_size = 0;
        config.retry.auto_ban_error_codes = vec![403, 999];

        let error_msg = ConfigValidator::new(&config).validate().unwrap_err().to_string();
        assert!(error_msg.contains("3 error(s)"));
        assert!(error_msg.contains("base_url"));
        assert!(error_msg.contains("999"));
    }

    #[test]
    fn test_credentials_dir_must_be_directory() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("not-a-dir");
        fs::write(&file, "x").unwrap();

        let config = create_test_config(&file);
        let error_msg = ConfigValidator::new(&config).validate().unwrap_err().to_string();
        assert!(error_msg.contains("not a directory"));
    }

    #[test]
    fn test_missing_credentials_dir_only_warns() {
        let temp_dir = TempDir::new().unwrap();
        let config = create_test_config(&temp_dir.path().join("absent"));

        temp_env::with_var_unset("POOLMUX_CREDENTIALS_B64", || {
            let warnings = ConfigValidator::new(&config).warnings();
            assert!(warnings.iter().any(|w| w.contains("will start empty")));
            assert!(ConfigValidator::new(&config).validate().is_ok());
        });
    }

    #[test]
    fn test_open_listener_without_key_warns() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = create_test_config(temp_dir.path());
        config.server.api_key = None;

        let warnings = ConfigValidator::new(&config).warnings();
        assert!(warnings.iter().any(|w| w.contains("server.api_key")));
    }

    #[cfg(unix)]
    #[test]
    fn test_world_readable_credential_warns() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let cred = temp_dir.path().join("a.json");
        fs::write(&cred, r#"{"access_token":"t","project_id":"p"}"#).unwrap();
        fs::set_permissions(&cred, fs::Permissions::from_mode(0o644)).unwrap();

        let config = create_test_config(temp_dir.path());
        let warnings = ConfigValidator::new(&config).warnings();
        assert!(warnings.iter().any(|w| w.contains("chmod 600")));
    }
}

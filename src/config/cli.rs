//!
//! CLI configuration commands for PoolMux.
//!
//! - `config init [--force]` - Write the example configuration to the user config file
//! - `config show` - Display the effective configuration
//! - `config validate` - Validate configuration and inspect the credential directory
//! - `config path` - Print the configuration file search order
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use crate::config::Config;
use crate::config::paths;
use crate::config::validation::ConfigValidator;
use crate::error::{ProxyError, Result};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

/* --- types ----------------------------------------------------------------------------------- */

///
/// CLI configuration command handler.
pub struct ConfigCli;

/* --- implementations --------------------------------------------------------------------- */

impl ConfigCli {
    ///
    /// Handle the `config init` command.
    ///
    /// # Arguments
    ///  * `force` - overwrite an existing configuration file
    pub fn init(force: bool) -> Result<()> {
        let config_file = paths::user_config_file()?;
        Self::init_at(&config_file, force)?;

        println!("Configuration saved to: {}", config_file.display());
        println!();
        println!("Next steps:");
        println!("  1. Put one JSON file per credential into the credentials.dir directory");
        println!("  2. Run 'poolmux config validate' to verify your configuration");

        Ok(())
    }

    ///
    /// Write the example configuration to `path`.
    ///
    /// # Returns
    ///  * `Err(ProxyError::Config)` when the file exists and `force` is false
    pub fn init_at(path: &Path, force: bool) -> Result<()> {
        if path.exists() && !force {
            return Err(ProxyError::Config(format!(
                "Configuration file already exists at '{}'.\n\
                 Re-run with 'poolmux config init --force' to overwrite it.",
                path.display()
            )));
        }

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| {
                ProxyError::Config(format!(
                    "Failed to create config directory '{}': {}",
                    dir.display(),
                    e
                ))
            })?;
        }

        fs::write(path, Config::example_toml()).map_err(|e| {
            ProxyError::Config(format!(
                "Failed to write configuration file '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Handle the `config show` command
    pub fn show() -> Result<()> {
        let config = Config::load()?;
        print!("{}", Self::render(&config));

        println!("Configuration Sources:");
        let config_paths = paths::config_file_paths();
        for (i, path) in config_paths.iter().enumerate() {
            let priority = if i == 0 { "highest priority" } else { "lowest priority" };
            let status = if path.exists() { "exists" } else { "not found" };
            println!("  {} ({}): {}", path.display(), priority, status);
        }

        Ok(())
    }

    /// Render the effective configuration; the API key is masked
    pub fn render(config: &Config) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Current PoolMux Configuration");
        let _ = writeln!(out, "=============================");
        let _ = writeln!(out);

        let _ = writeln!(out, "Server:");
        let _ = writeln!(out, "  Listen: {}:{}", config.server.host, config.server.port);
        let _ = writeln!(out, "  Log Level: {:?}", config.server.log_level);
        let _ = writeln!(
            out,
            "  API Key: {}",
            if config.server.api_key.is_some() { "configured" } else { "none" }
        );
        let _ = writeln!(out);

        let _ = writeln!(out, "Backend:");
        let _ = writeln!(out, "  Base URL: {}", config.backend.base_url);
        let _ = writeln!(out, "  User-Agent: {}", config.backend.user_agent);
        let _ = writeln!(out, "  Request Timeout: {}s", config.backend.request_timeout_secs);
        let _ = writeln!(out, "  Collect Stream For Unary: {}", config.backend.collect_stream_for_unary);
        let _ = writeln!(out);

        let retry = &config.retry;
        let _ = writeln!(out, "Retry:");
        let _ = writeln!(out, "  Enabled: {}", retry.enabled);
        let _ = writeln!(out, "  Max Retries: {}", retry.max_retries);
        let _ = writeln!(out, "  Interval: {}ms", retry.interval_ms);
        let _ = writeln!(
            out,
            "  Auto-ban: {} (codes {:?}, threshold {}, count silent failures {})",
            retry.auto_ban_enabled,
            retry.auto_ban_error_codes,
            retry.auto_ban_threshold,
            retry.count_silent_failures
        );
        let _ = writeln!(out);

        let _ = writeln!(out, "Credentials:");
        let _ = writeln!(out, "  Directory: {}", config.credentials.dir);
        let _ = writeln!(out, "  Selection: {:?}", config.credentials.selection);
        let _ = writeln!(out);

        let _ = writeln!(out, "Streaming:");
        let _ = writeln!(out, "  Truncation Max Attempts: {}", config.truncation.max_attempts);
        let _ = writeln!(out, "  Heartbeat Interval: {}ms", config.fake_stream.heartbeat_interval_ms);
        let _ = writeln!(out, "  Chunk Size: {} chars", config.fake_stream.chunk_size);
        let _ = writeln!(out);

        out
    }

    /// Handle the `config validate` command
    pub fn validate() -> Result<()> {
        println!("Validating PoolMux Configuration");
        println!("================================");
        println!();

        let config = Config::load().inspect_err(|e| {
            println!("Configuration loading failed:");
            println!("{}", e);
        })?;
        println!("Loading configuration... ok");

        for warning in ConfigValidator::new(&config).warnings() {
            println!("  warning: {}", warning);
        }

        ConfigValidator::new(&config).validate().inspect_err(|e| {
            println!("Configuration validation failed:");
            println!("{}", e);
        })?;
        println!("Validating configuration... ok");

        println!();
        println!("Additional Checks:");

        match paths::expand_path(&config.credentials.dir) {
            Ok(dir) => match count_credential_files(&dir) {
                Some(count) => println!("  Credential files in {}: {}", dir.display(), count),
                None => println!("  Credential directory {} is not readable", dir.display()),
            },
            Err(e) => println!("  Credential directory cannot be resolved: {}", e),
        }

        match std::net::TcpListener::bind((config.server.host.as_str(), config.server.port)) {
            Ok(_) => println!("  Port {} appears to be available", config.server.port),
            Err(_) => println!("  Port {} may be in use", config.server.port),
        }

        Ok(())
    }

    /// Handle the `config path` command
    pub fn path() -> Result<()> {
        for path in paths::config_file_paths() {
            println!("{}", path.display());
        }
        Ok(())
    }
}

/// Number of `*.json` files in a credential directory
fn count_credential_files(dir: &Path) -> Option<usize> {
    let entries = fs::read_dir(dir).ok()?;
    Some(
        entries
            .flatten()
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
            .count(),
    )
}

/* --- tests ------------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_writes_example_and_refuses_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("nested").join("config.toml");

        ConfigCli::init_at(&target, false).expect("first init succeeds");
        let written = fs::read_to_string(&target).unwrap();
        assert_eq!(written, Config::example_toml());

        let err = ConfigCli::init_at(&target, false).unwrap_err();
        assert!(err.to_string().contains("--force"));

        fs::write(&target, "# edited").unwrap();
        ConfigCli::init_at(&target, true).expect("forced init succeeds");
        assert_eq!(fs::read_to_string(&target).unwrap(), Config::example_toml());
    }

    #[test]
    fn test_render_masks_api_key() {
        let mut config = Config::default();
        config.server.api_key = Some("super-secret".to_string());

        let rendered = ConfigCli::render(&config);
        assert!(rendered.contains("API Key: configured"));
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("Max Retries: 5"));
    }

    #[test]
    fn test_count_credential_files() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.json"), "{}").unwrap();
        fs::write(temp_dir.path().join("b.json"), "{}").unwrap();
        fs::write(temp_dir.path().join("notes.txt"), "").unwrap();

        assert_eq!(count_credential_files(temp_dir.path()), Some(2));
        assert_eq!(count_credential_files(&temp_dir.path().join("missing")), None);
    }
}

//!
//! Platform-native path resolution for PoolMux.
//!
//! Config files live in the XDG config dir on Linux, Application Support on
//! macOS and %APPDATA% on Windows. Credential directories from the config are
//! expanded here before the file store reads them.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use crate::error::{ProxyError, Result};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/* --- constants ------------------------------------------------------------------------------- */

/// Application name for directory resolution
pub const APP_NAME: &str = "poolmux";
/// Organization qualifier for directory resolution
const ORGANIZATION: &str = "com";
/// Organization name for directory resolution
const ORG_NAME: &str = "SkyCorp";

/* --- public functions ------------------------------------------------------------------------ */

/// Get the user configuration directory, creating it when missing
///
/// # Returns
/// * `Ok(PathBuf)` - Path to user configuration directory
/// * `Err(ProxyError)` - Unable to determine or create config directory
pub fn user_config_dir() -> Result<PathBuf> {
    let project_dirs = get_project_dirs()?;
    let config_dir = project_dirs.config_dir();

    ensure_directory_exists(config_dir)?;
    Ok(config_dir.to_path_buf())
}

/// Get the system configuration directory
///
/// - Linux: /etc/poolmux/
/// - macOS: /Library/Preferences/poolmux/
/// - Windows: %PROGRAMDATA%/poolmux/
///
/// Never created here; that needs admin privileges.
pub fn system_config_dir() -> Result<PathBuf> {
    #[cfg(all(unix, not(target_os = "macos")))]
    {
        Ok(PathBuf::from("/etc").join(APP_NAME))
    }

    #[cfg(target_os = "macos")]
    {
        Ok(PathBuf::from("/Library/Preferences").join(APP_NAME))
    }

    #[cfg(windows)]
    {
        std::env::var("PROGRAMDATA").map(|path| PathBuf::from(path).join(APP_NAME)).map_err(|_| {
            ProxyError::Config("PROGRAMDATA environment variable not found".to_string())
        })
    }
}

/// Path of the user configuration file (`config.toml` in the user config dir)
pub fn user_config_file() -> Result<PathBuf> {
    Ok(user_config_dir()?.join("config.toml"))
}

/// Path of the system configuration file
pub fn system_config_file() -> Result<PathBuf> {
    Ok(system_config_dir()?.join("config.toml"))
}

/// Suggested credential directory next to the user config file
pub fn default_credentials_dir() -> Result<PathBuf> {
    Ok(user_config_dir()?.join("creds"))
}

///
/// Expand `~` and environment variables in a path.
///
/// # Arguments
///  * `path` - Path string that may contain ~ or `$VAR` references
///
/// # Returns
///  * `Ok(PathBuf)` - Expanded path
///  * `Err(ProxyError)` - A referenced variable is undefined or home is unknown
pub fn expand_path<P: AsRef<Path>>(path: P) -> Result<PathBuf> {
    let path_str = path.as_ref().to_string_lossy();

    if let Some(rest) = path_str.strip_prefix("~/") {
        let dirs = directories::UserDirs::new().ok_or_else(|| {
            ProxyError::Config(
                "Unable to determine user home directory for tilde expansion".to_string(),
            )
        })?;
        return Ok(dirs.home_dir().join(rest));
    }

    if path_str.contains('$') {
        let expanded = shellexpand::full(&path_str).map_err(|e| {
            ProxyError::Config(format!(
                "Failed to expand environment variables in path '{}': {}",
                path_str, e
            ))
        })?;
        return Ok(PathBuf::from(expanded.as_ref()));
    }

    Ok(path.as_ref().to_path_buf())
}

/// Check that a configuration file exists, is a regular file and is readable
pub fn validate_config_file<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(ProxyError::Config(format!(
            "Configuration file '{}' does not exist",
            path.display()
        )));
    }

    if !path.is_file() {
        return Err(ProxyError::Config(format!(
            "Configuration path '{}' exists but is not a regular file",
            path.display()
        )));
    }

    std::fs::File::open(path).map_err(|e| {
        ProxyError::Config(format!(
            "Configuration file '{}' exists but cannot be read: {}\n\
             \n\
             Please check file permissions. You can fix this with: chmod 644 '{}'",
            path.display(),
            e,
            path.display()
        ))
    })?;

    Ok(())
}

/// Configuration file paths, highest priority first (user, then system)
pub fn config_file_paths() -> Vec<PathBuf> {
    [user_config_file(), system_config_file()].into_iter().filter_map(|p| p.ok()).collect()
}

/* --- private functions ----------------------------------------------------------------------- */

fn get_project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from(ORGANIZATION, ORG_NAME, APP_NAME).ok_or_else(|| {
        ProxyError::Config(
            "Unable to determine user directories.\n\
             Please ensure your user account has a valid home directory."
                .to_string(),
        )
    })
}

fn ensure_directory_exists<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();

    if path.exists() {
        if !path.is_dir() {
            return Err(ProxyError::Config(format!(
                "Path '{}' exists but is not a directory",
                path.display()
            )));
        }
        return Ok(());
    }

    std::fs::create_dir_all(path).map_err(|e| {
        ProxyError::Config(format!(
            "Failed to create configuration directory '{}': {}",
            path.display(),
            e
        ))
    })
}

/* --- tests ----------------------------------------------------------------------------------- */

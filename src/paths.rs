//! Centralized path resolution for pgperm
//!
//! # Environment Variables
//!
//! - `PGPERM_CONFIG_DIR` - Override config directory (where `objects.toml` lives)
//! - `PGPERM_STATE_DIR` - Override state directory (snapshot and emitted scripts)
//!
//! # Path Resolution Priority
//!
//! For config_dir():
//! 1. `PGPERM_CONFIG_DIR` environment variable
//! 2. `XDG_CONFIG_HOME/pgperm` (if set)
//! 3. Platform default:
//!    - Windows: `%APPDATA%\pgperm`
//!    - macOS/Linux: `~/.config/pgperm`
//!
//! For state_dir():
//! 1. `PGPERM_STATE_DIR` environment variable
//! 2. `XDG_STATE_HOME/pgperm` (if set)
//! 3. Platform default:
//!    - Windows: `%LOCALAPPDATA%\pgperm`
//!    - macOS/Linux: `~/.local/state/pgperm`

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment variable for config directory override
pub const ENV_CONFIG_DIR: &str = "PGPERM_CONFIG_DIR";

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "PGPERM_STATE_DIR";

const APP_DIR: &str = "pgperm";

/// Get the pgperm config directory path
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = expand(&dir);
        log::debug!(
            "Using config dir from {}: {}",
            ENV_CONFIG_DIR,
            path.display()
        );
        return Ok(path);
    }

    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(xdg_config).join(APP_DIR);
        log::debug!("Using XDG_CONFIG_HOME: {}", path.display());
        return Ok(path);
    }

    #[cfg(windows)]
    {
        if let Some(app_data) = dirs::config_dir() {
            let path = app_data.join(APP_DIR);
            log::debug!("Using Windows config dir: {}", path.display());
            return Ok(path);
        }
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".config").join(APP_DIR);
    log::debug!("Using default config dir: {}", path.display());
    Ok(path)
}

/// Get the pgperm state directory path
pub fn state_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {}: {}", ENV_STATE_DIR, path.display());
        return Ok(path);
    }

    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        let path = PathBuf::from(xdg_state).join(APP_DIR);
        log::debug!("Using XDG_STATE_HOME: {}", path.display());
        return Ok(path);
    }

    #[cfg(windows)]
    {
        if let Some(local_app_data) = dirs::data_local_dir() {
            let path = local_app_data.join(APP_DIR);
            log::debug!("Using Windows state dir: {}", path.display());
            return Ok(path);
        }
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".local").join("state").join(APP_DIR);
    log::debug!("Using default state dir: {}", path.display());
    Ok(path)
}

/// The objects document to use: an explicit path, else `objects.toml` or
/// `objects.json` in the config directory
pub fn objects_file(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(expand(&path.to_string_lossy()));
    }
    let dir = config_dir()?;
    let json = dir.join("objects.json");
    if !dir.join("objects.toml").exists() && json.exists() {
        return Ok(json);
    }
    Ok(dir.join("objects.toml"))
}

/// The observed-state snapshot: an explicit path, else `snapshot.json` in the
/// state directory
pub fn snapshot_file(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(expand(&path.to_string_lossy())),
        None => Ok(state_dir()?.join("snapshot.json")),
    }
}

/// Where `apply` writes the emitted SQL when no `--script` is given
pub fn default_script_file() -> Result<PathBuf> {
    Ok(state_dir()?.join("last-apply.sql"))
}

/// Expand ~ and environment variables in a path string.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

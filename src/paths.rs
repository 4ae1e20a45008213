//! Centralized path resolution for iamsync
//!
//! # Environment Variables
//!
//! - `IAMSYNC_CONFIG_DIR` - Override config directory (e.g., `~/dotfiles/iamsync`)
//!
//! # Path Resolution Priority
//!
//! For config_dir():
//! 1. `IAMSYNC_CONFIG_DIR` environment variable
//! 2. `XDG_CONFIG_HOME/iamsync` (if set)
//! 3. Platform default:
//!    - Windows: `%APPDATA%\iamsync`
//!    - macOS/Linux: `~/.config/iamsync`

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment variable for config directory override
pub const ENV_CONFIG_DIR: &str = "IAMSYNC_CONFIG_DIR";

/// Name of the config file inside the config directory
pub const CONFIG_FILE: &str = "config.toml";

const APP_DIR: &str = "iamsync";

/// Get the iamsync config directory path
pub fn config_dir() -> Result<PathBuf> {
    resolve_config_dir(
        std::env::var(ENV_CONFIG_DIR).ok(),
        std::env::var("XDG_CONFIG_HOME").ok(),
        platform_config_dir(),
    )
}

/// Get the config file path
pub fn config_file() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE))
}

/// Pick the config directory from the candidate sources, in priority order.
fn resolve_config_dir(
    env_override: Option<String>,
    xdg_config_home: Option<String>,
    platform_default: Option<PathBuf>,
) -> Result<PathBuf> {
    if let Some(dir) = env_override.filter(|d| !d.is_empty()) {
        let path = expand(&dir);
        log::debug!(
            "Using config dir from {}: {}",
            ENV_CONFIG_DIR,
            path.display()
        );
        return Ok(path);
    }

    if let Some(xdg) = xdg_config_home.filter(|d| !d.is_empty()) {
        let path = PathBuf::from(xdg).join(APP_DIR);
        log::debug!("Using XDG_CONFIG_HOME: {}", path.display());
        return Ok(path);
    }

    let base = platform_default.context("Could not determine home directory")?;
    let path = base.join(APP_DIR);
    log::debug!("Using default config dir: {}", path.display());
    Ok(path)
}

#[cfg(windows)]
fn platform_config_dir() -> Option<PathBuf> {
    dirs::config_dir()
}

#[cfg(not(windows))]
fn platform_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".config"))
}

/// Expand ~ and environment variables in a path string.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

/// Render a path relative to the home directory when possible.
pub fn display(path: &Path) -> String {
    if let Some(home) = dirs::home_dir()
        && let Ok(rest) = path.strip_prefix(&home)
    {
        return format!("~/{}", rest.display());
    }
    path.display().to_string()
}

// ============================================================================
// Tests
// ============================================================================

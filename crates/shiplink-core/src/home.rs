//! Canonical home directory resolution
//!
//! Single source of truth for home resolution across the shiplink crates,
//! used when falling back to the user-level configuration file.
//!
//! # Precedence
//!
//! 1. `SHIPLINK_HOME` environment variable (if set and non-empty)
//! 2. `dirs::home_dir()` platform default
//!
//! Integration tests should set `SHIPLINK_HOME` to point the daemon at a
//! temporary directory instead of the real user profile.

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Get the home directory for shiplink operations.
///
/// # Errors
///
/// Returns an error if `SHIPLINK_HOME` is not set and the platform home
/// directory cannot be determined.
///
/// # Examples
///
/// ```
/// use shiplink_core::home::get_home_dir;
///
/// # fn example() -> anyhow::Result<()> {
/// let home = get_home_dir()?;
/// let config_path = home.join(".config/shiplink/shiplink.toml");
/// # Ok(())
/// # }
/// # example().unwrap();
/// ```
pub fn get_home_dir() -> Result<PathBuf> {
    // SHIPLINK_HOME first, for testing and custom deployments
    if let Ok(home) = std::env::var("SHIPLINK_HOME") {
        let trimmed = home.trim();
        if !trimmed.is_empty() {
            return Ok(PathBuf::from(trimmed));
        }
    }

    dirs::home_dir().context("Could not determine home directory")
}

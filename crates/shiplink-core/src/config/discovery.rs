//! Configuration discovery and validation

use super::types::{BuildConfig, Config, DistributeTarget, MirrorTarget, RawConfig};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    Parse(#[from] toml::de::Error),

    /// No config file in any searched location
    #[error("no configuration file found; create ./shiplink.toml or pass --config")]
    NotFound,

    /// Required `port` key missing
    #[error("configuration is missing the required `port` key")]
    MissingPort,

    /// Required `output_dir` key missing
    #[error("configuration is missing the required `output_dir` key")]
    MissingOutputDir,

    /// `disk_deploy = true` requested
    #[error(
        "`disk_deploy = true` is not supported: output is pushed into the connected runtime, not written to disk"
    )]
    DiskDeployUnsupported,

    /// Any other rejected value
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Command-line overrides for configuration
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    /// Path to config file override
    pub config_path: Option<PathBuf>,
}

/// Resolve configuration from the supported locations.
///
/// Priority (highest to lowest):
/// 1. Explicit path override (`--config`)
/// 2. Repo-local config (shiplink.toml in the current directory)
/// 3. Global config (~/.config/shiplink/shiplink.toml)
///
/// There are no built-in defaults: `port` and `output_dir` are required, so
/// when none of the locations exist the result is [`ConfigError::NotFound`].
pub fn resolve_config(
    overrides: &ConfigOverrides,
    current_dir: &Path,
    home_dir: &Path,
) -> Result<Config, ConfigError> {
    if let Some(path) = &overrides.config_path {
        return load_config_file(path);
    }

    let local = current_dir.join("shiplink.toml");
    if local.exists() {
        return load_config_file(&local);
    }

    let global = home_dir.join(".config/shiplink/shiplink.toml");
    if global.exists() {
        return load_config_file(&global);
    }

    Err(ConfigError::NotFound)
}

/// Load and validate a config file
fn load_config_file(path: &Path) -> Result<Config, ConfigError> {
    debug!("Loading configuration from {path:?}");
    let contents = std::fs::read_to_string(path)?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    parse_config(&contents, base_dir)
}

/// Parse and validate configuration text.
///
/// `base_dir` anchors relative paths from the file (normally the config
/// file's own directory), so `output_dir = "build"` next to
/// `project/shiplink.toml` resolves to `project/build` no matter where the
/// daemon was started from.
pub fn parse_config(text: &str, base_dir: &Path) -> Result<Config, ConfigError> {
    let raw: RawConfig = toml::from_str(text)?;
    validate(raw, base_dir)
}

fn validate(raw: RawConfig, base_dir: &Path) -> Result<Config, ConfigError> {
    if raw.disk_deploy {
        return Err(ConfigError::DiskDeployUnsupported);
    }

    let port = raw.port.ok_or(ConfigError::MissingPort)?;
    if port == 0 {
        return Err(ConfigError::Invalid("`port` must be non-zero".to_string()));
    }

    let output_dir = match raw.output_dir {
        Some(dir) if !dir.is_empty() => base_dir.join(dir),
        _ => return Err(ConfigError::MissingOutputDir),
    };

    let build = match raw.build {
        Some(b) => {
            if b.command.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "[build] `command` must not be empty".to_string(),
                ));
            }
            Some(BuildConfig {
                command: b.command,
                watch: b.watch.iter().map(|w| base_dir.join(w)).collect(),
                debounce_ms: b.debounce_ms,
                ignore: b.ignore,
            })
        }
        None => None,
    };

    let mirror = raw
        .mirror
        .into_iter()
        .map(|(path, servers)| {
            if servers.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "[mirror] entry {path:?} has no servers"
                )));
            }
            Ok(MirrorTarget {
                local_path: base_dir.join(&path),
                servers,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let distribute = raw
        .distribute
        .into_iter()
        .map(|(path, servers)| {
            if servers.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "[distribute] entry {path:?} has no servers"
                )));
            }
            Ok(DistributeTarget {
                local_path: base_dir.join(&path),
                servers,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Config {
        port,
        output_dir,
        types: raw.types.map(|t| base_dir.join(t)),
        use_polling: raw.use_polling,
        build,
        mirror,
        distribute,
    })
}

//! Configuration loading and validation
//!
//! Resolves the daemon configuration from one of:
//! 1. An explicit path (passed as a parameter, usually from `--config`)
//! 2. Repo-local config (./shiplink.toml)
//! 3. Global config (~/.config/shiplink/shiplink.toml)
//!
//! There is no default configuration: `port` and `output_dir` are required,
//! so a missing file is a fatal error rather than a silent fallback.

mod discovery;
mod types;

pub use discovery::{ConfigError, ConfigOverrides, parse_config, resolve_config};
pub use types::{BuildConfig, Config, DistributeTarget, MirrorTarget};

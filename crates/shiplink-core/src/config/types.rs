//! Configuration types

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Validated daemon configuration.
///
/// Produced by [`parse_config`](super::parse_config). Relative paths from the
/// file have already been resolved against the config file's directory, so
/// consumers never need to know where the file came from.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the remote link listens on.
    pub port: u16,
    /// Directory the build writes compiled output into.
    pub output_dir: PathBuf,
    /// Where to write the runtime's type-definition artifact, if anywhere.
    pub types: Option<PathBuf>,
    /// Use polling file watchers instead of native change notifications.
    pub use_polling: bool,
    /// Build command configuration; `None` disables the watch/build loop.
    pub build: Option<BuildConfig>,
    /// Mirrored directories, sorted by local path.
    pub mirror: Vec<MirrorTarget>,
    /// Distribution fan-out entries, sorted by local path.
    pub distribute: Vec<DistributeTarget>,
}

/// `[build]` section: how to produce the output directory.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Shell command run on every change batch.
    pub command: String,
    /// Source roots to watch.
    pub watch: Vec<PathBuf>,
    /// Quiet window before a change batch triggers a build.
    pub debounce_ms: u64,
    /// Glob patterns whose changes are ignored.
    pub ignore: Vec<String>,
}

/// One `[mirror]` entry: a local directory kept in live sync with servers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorTarget {
    pub local_path: PathBuf,
    pub servers: Vec<String>,
}

/// One `[distribute]` entry: a local path fanned out to several servers on
/// each new connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributeTarget {
    pub local_path: PathBuf,
    pub servers: Vec<String>,
}

/// On-disk schema, before validation. Field names match the TOML keys;
/// everything optional here so that validation can produce errors more
/// descriptive than serde's.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct RawConfig {
    pub port: Option<u16>,
    pub output_dir: Option<String>,
    pub types: Option<String>,
    #[serde(default)]
    pub use_polling: bool,
    #[serde(default)]
    pub disk_deploy: bool,
    pub build: Option<RawBuildConfig>,
    #[serde(default)]
    pub mirror: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub distribute: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawBuildConfig {
    pub command: String,
    #[serde(default = "default_watch")]
    pub watch: Vec<String>,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default)]
    pub ignore: Vec<String>,
}

fn default_watch() -> Vec<String> {
    vec!["src".to_string()]
}

fn default_debounce_ms() -> u64 {
    200
}

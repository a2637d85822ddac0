//! Core types for shiplink
//!
//! This crate provides the configuration schema, discovery and validation
//! used by the deploy daemon, plus shared logging initialization. The
//! orchestration itself lives in `shiplink-daemon`; everything here is
//! deliberately free of async machinery so the daemon and any embedding
//! tool can share one config story.

pub mod config;
pub mod home;
pub mod logging;

pub use config::{
    BuildConfig, Config, ConfigError, ConfigOverrides, DistributeTarget, MirrorTarget,
    resolve_config,
};

//! Extension hooks around the deploy lifecycle
//!
//! Embedders observe and extend the pipeline by registering extensions at
//! daemon build time. Every hook is optional (default no-ops); dispatch is
//! concurrent, and a failing extension never blocks its siblings, later
//! hooks, or the pipeline itself.

use crate::remote::RemoteLink;
use async_trait::async_trait;
use futures_util::future::join_all;
use shiplink_core::Config;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Shared services available to extension hooks
#[derive(Clone)]
pub struct HookContext {
    /// Application configuration
    pub config: Arc<Config>,
    /// Link to the runtime
    pub link: Arc<dyn RemoteLink>,
}

impl HookContext {
    pub fn new(config: Arc<Config>, link: Arc<dyn RemoteLink>) -> Self {
        Self { config, link }
    }
}

/// Pipeline positions an extension can hook into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    Setup,
    BeforeConnect,
    AfterConnect,
    BeforeBuild,
    AfterBuild,
    BeforeDistribute,
    AfterDistribute,
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Hook::Setup => "setup",
            Hook::BeforeConnect => "before_connect",
            Hook::AfterConnect => "after_connect",
            Hook::BeforeBuild => "before_build",
            Hook::AfterBuild => "after_build",
            Hook::BeforeDistribute => "before_distribute",
            Hook::AfterDistribute => "after_distribute",
        };
        f.write_str(name)
    }
}

/// One registered extension.
///
/// Implement only the hooks you need; the rest default to no-ops. Hook
/// results are diagnostic only: an `Err` is logged with the extension's
/// name and then discarded.
#[async_trait]
pub trait Extension: Send + Sync {
    /// Name used in failure diagnostics.
    fn name(&self) -> &str;

    /// Once at daemon startup, before anything else.
    async fn setup(&self, _cx: &HookContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Once, just before the listener comes up.
    async fn before_connect(&self, _cx: &HookContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// On every new client connection.
    async fn after_connect(&self, _cx: &HookContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// When a build starts, after the previous output has been cleared.
    async fn before_build(&self, _cx: &HookContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// After a fully successful push and cost cycle.
    async fn after_build(&self, _cx: &HookContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Before the distribution fan-out on a new connection.
    async fn before_distribute(&self, _cx: &HookContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// After the distribution fan-out settles.
    async fn after_distribute(&self, _cx: &HookContext) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Ordered set of registered extensions.
///
/// Built once at daemon construction time, read-only afterwards.
#[derive(Default)]
pub struct ExtensionSet {
    extensions: Vec<Arc<dyn Extension>>,
}

impl ExtensionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an extension. Registration order is kept for diagnostics;
    /// dispatch itself is concurrent.
    pub fn register(&mut self, extension: Arc<dyn Extension>) {
        debug!("Registered extension '{}'", extension.name());
        self.extensions.push(extension);
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    /// Invoke `hook` on every extension concurrently and wait for all of
    /// them to settle.
    ///
    /// Failures are logged per extension and discarded. Callers can rely on
    /// every extension having finished (or failed) when this returns.
    pub async fn dispatch(&self, hook: Hook, cx: &HookContext) {
        if self.extensions.is_empty() {
            return;
        }
        debug!("Dispatching {hook} to {} extension(s)", self.extensions.len());

        let invocations = self.extensions.iter().map(|ext| {
            let ext = Arc::clone(ext);
            async move {
                let result = match hook {
                    Hook::Setup => ext.setup(cx).await,
                    Hook::BeforeConnect => ext.before_connect(cx).await,
                    Hook::AfterConnect => ext.after_connect(cx).await,
                    Hook::BeforeBuild => ext.before_build(cx).await,
                    Hook::AfterBuild => ext.after_build(cx).await,
                    Hook::BeforeDistribute => ext.before_distribute(cx).await,
                    Hook::AfterDistribute => ext.after_distribute(cx).await,
                };
                (ext, result)
            }
        });

        for (ext, result) in join_all(invocations).await {
            if let Err(e) = result {
                warn!("Extension '{}' failed during {hook}: {e:#}", ext.name());
            }
        }
    }
}

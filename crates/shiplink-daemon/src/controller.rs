//! Build lifecycle controller
//!
//! Turns build and connection events into the deploy pipeline. On the build
//! side: clear output → `before_build` → (build runs) → single-flight gate →
//! connection wait → resolve → push all → cost all → `after_build` → status.
//! On the connection side: `after_connect` → definition export →
//! distribution fan-out (wrapped in its hook pair) → one-time mirror
//! startup.

use crate::distribute::distribute_all;
use crate::extensions::{ExtensionSet, Hook, HookContext};
use crate::mirror::MirrorOrchestrator;
use crate::queue::{DeployQueue, PushTicket};
use crate::remote::{FilePush, FileRef, LinkEvent, RemoteLink};
use crate::resolver::{OutputFile, resolve_output_dir};
use crate::status::StatusWriter;
use anyhow::Context;
use futures_util::future::join_all;
use shiplink_core::Config;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, error, info, warn};

/// Result of one build run.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOutcome {
    /// Number of build errors; any nonzero count skips deployment.
    pub errors: usize,
}

/// Orchestrates the deploy pipeline around build and connection events.
///
/// Shared across the daemon loop and the build runner behind an `Arc`; all
/// methods take `&self`.
pub struct DeployController {
    config: Arc<Config>,
    link: Arc<dyn RemoteLink>,
    extensions: ExtensionSet,
    hook_cx: HookContext,
    queue: DeployQueue,
    mirrors: Mutex<Option<MirrorOrchestrator>>,
    mirrors_started: AtomicBool,
    status: StatusWriter,
}

impl DeployController {
    pub fn new(config: Arc<Config>, link: Arc<dyn RemoteLink>, extensions: ExtensionSet) -> Self {
        let hook_cx = HookContext::new(Arc::clone(&config), Arc::clone(&link));
        let status = StatusWriter::new(
            &config.output_dir,
            config.port,
            env!("CARGO_PKG_VERSION").to_string(),
        );
        Self {
            config,
            link,
            extensions,
            hook_cx,
            queue: DeployQueue::new(),
            mirrors: Mutex::new(None),
            mirrors_started: AtomicBool::new(false),
            status,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Gate state, for diagnostics.
    pub fn queue(&self) -> &DeployQueue {
        &self.queue
    }

    /// Dispatch the `setup` hooks. Once, at daemon startup.
    pub async fn setup(&self) {
        self.extensions.dispatch(Hook::Setup, &self.hook_cx).await;
    }

    /// Dispatch the `before_connect` hooks. Once, before listening.
    pub async fn before_connect(&self) {
        self.extensions
            .dispatch(Hook::BeforeConnect, &self.hook_cx)
            .await;
    }

    /// A build is starting: note the instant, clear the previous output and
    /// let extensions prepare.
    ///
    /// A missing output directory is normal (first build, or nothing ever
    /// built); any other clearing failure is logged and the build proceeds.
    pub async fn build_started(&self) {
        self.queue.note_build_started();

        match tokio::fs::remove_dir_all(&self.config.output_dir).await {
            Ok(()) => debug!("Cleared output directory {:?}", self.config.output_dir),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to clear output directory {:?}: {e}",
                self.config.output_dir
            ),
        }

        self.extensions
            .dispatch(Hook::BeforeBuild, &self.hook_cx)
            .await;
    }

    /// A build finished: deploy it, unless it had errors or a deploy is
    /// already in flight.
    ///
    /// Builds with errors never touch the gate. A build completing while a
    /// sequence is in flight is dropped, not queued; the next change
    /// triggers a fresh build anyway. The gate is released when this
    /// returns, on success and failure paths alike.
    pub async fn build_finished(&self, outcome: &BuildOutcome) {
        if outcome.errors > 0 {
            info!(
                "Build finished with {} error(s); deploy skipped",
                outcome.errors
            );
            return;
        }

        let Some(ticket) = self.queue.try_begin_push() else {
            debug!("Deploy already in flight; dropping this build result");
            return;
        };

        if let Err(e) = self.push_cycle(&ticket).await {
            error!("Deploy cycle failed: {e:#}");
        }
        // Ticket drop releases the gate.
    }

    async fn push_cycle(&self, ticket: &PushTicket) -> anyhow::Result<()> {
        if !self.link.connection().connected {
            ticket.mark_waiting();
            info!("No client connected; deploy suspended until one attaches");
            self.wait_for_client().await?;
        }
        ticket.mark_pushing();

        // Resolve only after the wait: if builds kept completing while no
        // client was attached, the connect should deploy the latest one.
        let files = resolve_output_dir(&self.config.output_dir)
            .await
            .context("resolving output directory")?;

        if files.is_empty() {
            debug!("Output directory is empty; nothing to push");
        }

        self.push_all(&files).await?;
        let total_ram = self.cost_all(&files).await?;

        self.extensions
            .dispatch(Hook::AfterBuild, &self.hook_cx)
            .await;

        match self.queue.build_elapsed() {
            Some(elapsed) => info!(
                "Deployed {} file(s), {total_ram:.2}GB total, {:.2}s after build start",
                files.len(),
                elapsed.as_secs_f64()
            ),
            None => info!("Deployed {} file(s), {total_ram:.2}GB total", files.len()),
        }

        self.status
            .record_push(files.len(), total_ram, self.link.connection().connected);
        Ok(())
    }

    /// Suspend until a `ClientConnected` event arrives.
    ///
    /// Subscribes before re-checking the connection, so a client attaching
    /// between the caller's check and ours cannot be missed.
    async fn wait_for_client(&self) -> anyhow::Result<()> {
        let mut events = self.link.subscribe();
        if self.link.connection().connected {
            return Ok(());
        }

        loop {
            match events.recv().await {
                Ok(LinkEvent::ClientConnected) => return Ok(()),
                Ok(LinkEvent::Closed) => anyhow::bail!("link closed while waiting for a client"),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    if self.link.connection().connected {
                        return Ok(());
                    }
                    warn!("Link event stream lagged by {n}; still waiting for a client");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    anyhow::bail!("link event stream closed while waiting for a client")
                }
            }
        }
    }

    /// Push every file concurrently, in resolver order, and wait for all
    /// pushes to settle. First failure aborts the cycle; siblings are not
    /// cancelled mid-push.
    async fn push_all(&self, files: &[OutputFile]) -> anyhow::Result<()> {
        let pushes = files.iter().map(|file| async move {
            let content = tokio::fs::read_to_string(&file.absolute_path)
                .await
                .with_context(|| format!("reading {}", file.absolute_path.display()))?;
            self.link
                .push_file(FilePush {
                    server: file.server.clone(),
                    filename: file.filename.clone(),
                    content,
                })
                .await
                .with_context(|| format!("pushing {}:{}", file.server, file.filename))?;
            debug!("Pushed {}:{}", file.server, file.filename);
            Ok::<_, anyhow::Error>(())
        });

        for result in join_all(pushes).await {
            result?;
        }
        Ok(())
    }

    /// Compute the RAM cost of every pushed file concurrently. Starts only
    /// after the push barrier has cleared. Returns the total.
    async fn cost_all(&self, files: &[OutputFile]) -> anyhow::Result<f64> {
        let costs = files.iter().map(|file| async move {
            let file_ref = FileRef {
                server: file.server.clone(),
                filename: file.filename.clone(),
            };
            let ram = self
                .link
                .calculate_ram(&file_ref)
                .await
                .with_context(|| {
                    format!("calculating RAM for {}:{}", file.server, file.filename)
                })?;
            info!("{}:{} costs {ram:.2}GB", file.server, file.filename);
            Ok::<_, anyhow::Error>(ram)
        });

        let mut total = 0.0;
        for result in join_all(costs).await {
            total += result?;
        }
        Ok(total)
    }

    /// A new client attached: run the per-connection work.
    ///
    /// Every stage is isolated; a failing export or fan-out is logged and
    /// the remaining stages still run. Never terminates the daemon.
    pub async fn client_connected(&self) {
        info!("Client connected");
        self.status.record_connection(true);

        self.extensions
            .dispatch(Hook::AfterConnect, &self.hook_cx)
            .await;

        if let Err(e) = self.export_definitions().await {
            warn!("Definition export failed: {e:#}");
        }

        if !self.config.distribute.is_empty() {
            self.extensions
                .dispatch(Hook::BeforeDistribute, &self.hook_cx)
                .await;
            match distribute_all(self.link.as_ref(), &self.config.distribute).await {
                Ok(()) => {
                    self.extensions
                        .dispatch(Hook::AfterDistribute, &self.hook_cx)
                        .await;
                }
                Err(e) => error!("Distribution failed: {e:#}"),
            }
        }

        self.start_mirrors_once().await;
    }

    /// Fetch the runtime's type definitions and write them to the
    /// configured path. No-op when `types` is not configured.
    async fn export_definitions(&self) -> anyhow::Result<()> {
        let Some(path) = &self.config.types else {
            return Ok(());
        };

        let text = self
            .link
            .definition_file()
            .await
            .context("fetching definition file")?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        tokio::fs::write(path, text)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        info!("Wrote runtime definitions to {}", path.display());
        Ok(())
    }

    /// Start the mirror subsystem on the first connection of the process.
    ///
    /// Mirror sessions survive reconnects, so later connections are no-ops.
    /// A failed startup is logged and not retried: its sessions were already
    /// disposed and the lifecycle does not permit re-running init.
    async fn start_mirrors_once(&self) {
        if self.config.mirror.is_empty() {
            return;
        }
        if self.mirrors_started.swap(true, Ordering::SeqCst) {
            return;
        }

        match MirrorOrchestrator::start(self.link.as_ref(), &self.config).await {
            Ok(orchestrator) => {
                let mut mirrors = self.mirrors.lock().await;
                *mirrors = Some(orchestrator);
            }
            Err(e) => {
                error!("Mirror startup failed, not retrying (restart the daemon to retry): {e:#}");
            }
        }
    }

    /// Dispose mirror sessions and record the final status. Idempotent.
    pub async fn shutdown(&self) {
        let mut mirrors = self.mirrors.lock().await;
        if let Some(orchestrator) = mirrors.as_mut() {
            orchestrator.dispose_all().await;
        }
        self.status.record_connection(self.link.connection().connected);
    }
}

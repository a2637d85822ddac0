//! Source tree watcher and build runner
//!
//! Watches the configured source roots, debounces change bursts and runs the
//! build command once per quiet window. Completed builds are handed to the
//! [`DeployController`], which owns everything from there.

use crate::controller::{BuildOutcome, DeployController};
use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use notify::{Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use sha2::{Digest, Sha256};
use shiplink_core::BuildConfig;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::channel;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Decides whether a file system event should count as a source change.
///
/// Filters out the output directory (builds write there), the configured
/// ignore globs, directories, and files whose content hash has not moved
/// since the last sighting. Editors that touch without writing, and watch
/// backends that report duplicate events, both collapse to nothing here.
struct ChangeFilter {
    output_dir: PathBuf,
    watch_roots: Vec<PathBuf>,
    ignore: GlobSet,
    seen: HashMap<PathBuf, String>,
}

impl ChangeFilter {
    fn new(output_dir: PathBuf, watch_roots: Vec<PathBuf>, ignore: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in ignore {
            let glob = Glob::new(pattern)
                .with_context(|| format!("invalid ignore pattern '{pattern}'"))?;
            builder.add(glob);
        }
        let ignore = builder.build().context("building ignore glob set")?;

        Ok(Self {
            output_dir,
            watch_roots,
            ignore,
            seen: HashMap::new(),
        })
    }

    fn is_relevant(&mut self, path: &Path) -> bool {
        if path.starts_with(&self.output_dir) {
            return false;
        }
        if self.ignore.is_match(self.relative(path)) {
            return false;
        }
        if path.is_dir() {
            return false;
        }
        self.content_changed(path)
    }

    /// Ignore globs are written against the watch root, so match against the
    /// path relative to whichever root contains it.
    fn relative(&self, path: &Path) -> PathBuf {
        for root in &self.watch_roots {
            if let Ok(rel) = path.strip_prefix(root) {
                return rel.to_path_buf();
            }
        }
        path.to_path_buf()
    }

    /// True when the file's content differs from the last time it was seen.
    /// A vanished file counts as a change only if it was seen before.
    fn content_changed(&mut self, path: &Path) -> bool {
        match std::fs::read(path) {
            Ok(bytes) => {
                let mut hasher = Sha256::new();
                hasher.update(&bytes);
                let digest = format!("{:x}", hasher.finalize());
                match self.seen.insert(path.to_path_buf(), digest.clone()) {
                    Some(previous) => previous != digest,
                    None => true,
                }
            }
            Err(_) => self.seen.remove(path).is_some(),
        }
    }
}

fn relevant_kind(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// Watch the build's source roots and rebuild on changes until cancelled.
///
/// Runs one build at startup, then one per debounce quiet window. Returns
/// immediately when the configuration has no `[build]` section.
pub async fn run_build_runner(
    controller: Arc<DeployController>,
    cancel: CancellationToken,
) -> Result<()> {
    let Some(build) = controller.config().build.clone() else {
        return Ok(());
    };

    let mut filter = ChangeFilter::new(
        controller.config().output_dir.clone(),
        build.watch.clone(),
        &build.ignore,
    )?;

    // Channel for raw file system events from notify
    let (tx, rx) = channel();
    let handler = move |res: notify::Result<Event>| match res {
        Ok(event) => {
            if let Err(e) = tx.send(event) {
                error!("Failed to send file system event: {e}");
            }
        }
        Err(e) => error!("File system watcher error: {e}"),
    };

    let mut watcher: Box<dyn Watcher + Send> = if controller.config().use_polling {
        let poll = notify::Config::default().with_poll_interval(Duration::from_millis(500));
        Box::new(PollWatcher::new(handler, poll).context("Failed to create polling watcher")?)
    } else {
        Box::new(
            RecommendedWatcher::new(handler, notify::Config::default())
                .context("Failed to create file system watcher")?,
        )
    };

    let mut watched = 0usize;
    for root in &build.watch {
        match watcher.watch(root, RecursiveMode::Recursive) {
            Ok(()) => {
                info!("Watching {} for changes", root.display());
                watched += 1;
            }
            Err(e) => warn!("Cannot watch {}: {e}", root.display()),
        }
    }
    if watched == 0 {
        warn!("No watchable source directories; rebuild on change is disabled");
    }

    // Filtered changes cross from the notify thread into the async loop here
    let (change_tx, mut change_rx) = mpsc::channel::<PathBuf>(256);
    let cancel_fwd = cancel.clone();
    let forwarder = tokio::task::spawn_blocking(move || {
        loop {
            if cancel_fwd.is_cancelled() {
                break;
            }

            // Use recv_timeout to avoid busy-wait polling
            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(event) => {
                    if !relevant_kind(&event.kind) {
                        continue;
                    }
                    for path in event.paths {
                        if filter.is_relevant(&path) {
                            // Use blocking_send since we're in a blocking task
                            if let Err(e) = change_tx.blocking_send(path) {
                                error!("Failed to forward change event: {e}");
                            }
                        }
                    }
                }
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    warn!("Watcher channel disconnected");
                    break;
                }
            }
        }
    });

    info!("Running initial build");
    build_and_deploy(&controller, &build).await;

    let debounce = Duration::from_millis(build.debounce_ms);
    let mut pending = false;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Build runner cancelled");
                break;
            }
            changed = change_rx.recv() => match changed {
                Some(path) => {
                    debug!("Source change: {path:?}");
                    pending = true;
                }
                None => break,
            },
            // The sleep restarts on every received change, so the build only
            // fires after a full quiet window.
            _ = tokio::time::sleep(debounce), if pending => {
                pending = false;
                build_and_deploy(&controller, &build).await;
            }
        }
    }

    forwarder.await.context("Watcher task panicked")?;
    Ok(())
}

/// Run one build and hand the outcome to the controller.
///
/// The deploy detaches into its own task: a deploy suspended on a missing
/// client must not stall rebuilding.
async fn build_and_deploy(controller: &Arc<DeployController>, build: &BuildConfig) {
    let outcome = run_build(controller, build).await;
    let controller = Arc::clone(controller);
    tokio::spawn(async move {
        controller.build_finished(&outcome).await;
    });
}

async fn run_build(controller: &DeployController, build: &BuildConfig) -> BuildOutcome {
    controller.build_started().await;

    info!("Running build command: {}", build.command);
    let (shell, flag) = if cfg!(windows) { ("cmd", "/C") } else { ("sh", "-c") };

    match Command::new(shell).arg(flag).arg(&build.command).status().await {
        Ok(status) if status.success() => BuildOutcome::default(),
        Ok(status) => {
            warn!("Build command exited with {status}");
            BuildOutcome { errors: 1 }
        }
        Err(e) => {
            error!("Failed to run build command: {e}");
            BuildOutcome { errors: 1 }
        }
    }
}

//! Mirror orchestration
//!
//! Brings up one mirror session per configured directory and drives the
//! shared lifecycle in phase batches: every cache init settles before any
//! remote sync starts, and every sync settles before any watcher starts.
//! A failure during startup aborts the whole mirror subsystem rather than
//! leaving a partially-synced directory silently watching.

use crate::remote::{MirrorHandle, MirrorSpec, RemoteLink};
use anyhow::Context;
use futures_util::future::join_all;
use shiplink_core::Config;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Lifecycle state of one mirror session.
///
/// Sessions only ever move forward: `Watching` is unreachable without
/// passing through `Synced`, and `Synced` without `CacheInitialized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    CacheInitialized,
    Synced,
    Watching,
    Disposed,
}

#[derive(Debug, Clone, Copy)]
enum StartupPhase {
    InitCache,
    Sync,
    Watch,
}

/// One mirrored directory and its link-side handle.
///
/// Owned exclusively by the orchestrator; nothing else drives the handle.
pub struct MirrorSession {
    local_path: PathBuf,
    servers: Vec<String>,
    state: SessionState,
    handle: Box<dyn MirrorHandle>,
}

impl MirrorSession {
    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    pub fn servers(&self) -> &[String] {
        &self.servers
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    async fn advance(&mut self, phase: StartupPhase) -> anyhow::Result<()> {
        match phase {
            StartupPhase::InitCache => {
                self.handle.init_file_cache().await.with_context(|| {
                    format!("initializing file cache for {}", self.local_path.display())
                })?;
                self.state = SessionState::CacheInitialized;
            }
            StartupPhase::Sync => {
                self.handle.sync_with_remote().await.with_context(|| {
                    format!("syncing {} with remote", self.local_path.display())
                })?;
                self.state = SessionState::Synced;
            }
            StartupPhase::Watch => {
                self.handle
                    .watch()
                    .await
                    .with_context(|| format!("watching {}", self.local_path.display()))?;
                self.state = SessionState::Watching;
            }
        }
        Ok(())
    }
}

/// Owns every mirror session and sequences their shared lifecycle.
pub struct MirrorOrchestrator {
    sessions: Vec<MirrorSession>,
}

impl MirrorOrchestrator {
    /// Establish every configured mirror and run the phased startup.
    ///
    /// Local directories are created first, then a session is opened per
    /// `[mirror]` entry. A failure in any startup phase aborts with the
    /// first error after disposing whatever was already established, so a
    /// returned orchestrator always has every session `Watching`.
    pub async fn start(link: &dyn RemoteLink, config: &Config) -> anyhow::Result<Self> {
        let mut sessions = Vec::with_capacity(config.mirror.len());

        for target in &config.mirror {
            tokio::fs::create_dir_all(&target.local_path)
                .await
                .with_context(|| {
                    format!("creating mirror directory {}", target.local_path.display())
                })?;

            let handle = link
                .mirror(MirrorSpec {
                    local_path: target.local_path.clone(),
                    servers: target.servers.clone(),
                    use_polling: config.use_polling,
                })
                .await
                .with_context(|| {
                    format!("establishing mirror for {}", target.local_path.display())
                })?;

            sessions.push(MirrorSession {
                local_path: target.local_path.clone(),
                servers: target.servers.clone(),
                state: SessionState::Created,
                handle,
            });
        }

        let mut orchestrator = Self { sessions };

        if let Err(e) = orchestrator.run_startup().await {
            orchestrator.dispose_all().await;
            return Err(e);
        }

        info!("{} mirror session(s) watching", orchestrator.sessions.len());
        Ok(orchestrator)
    }

    pub fn sessions(&self) -> &[MirrorSession] {
        &self.sessions
    }

    async fn run_startup(&mut self) -> anyhow::Result<()> {
        self.run_phase(StartupPhase::InitCache).await?;
        self.run_phase(StartupPhase::Sync).await?;
        self.run_phase(StartupPhase::Watch).await?;
        Ok(())
    }

    /// Run one phase across every session concurrently and wait for all of
    /// them to settle before reporting the first failure. Siblings are not
    /// cancelled mid-operation.
    async fn run_phase(&mut self, phase: StartupPhase) -> anyhow::Result<()> {
        debug!("Running mirror phase {phase:?} across {} session(s)", self.sessions.len());
        let results = join_all(self.sessions.iter_mut().map(|s| s.advance(phase))).await;
        for result in results {
            result?;
        }
        Ok(())
    }

    /// Dispose every session.
    ///
    /// Idempotent: already-disposed sessions are skipped and each session
    /// reaches `Disposed` exactly once. Per-session failures are logged and
    /// do not stop the remaining disposals.
    pub async fn dispose_all(&mut self) {
        for session in &mut self.sessions {
            if session.state == SessionState::Disposed {
                continue;
            }
            if let Err(e) = session.handle.dispose().await {
                warn!(
                    "Failed to dispose mirror for {}: {e}",
                    session.local_path.display()
                );
            }
            session.state = SessionState::Disposed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryLink;
    use shiplink_core::MirrorTarget;
    use tempfile::TempDir;

    fn config_with_mirrors(paths: &[PathBuf]) -> Config {
        Config {
            port: 1,
            output_dir: PathBuf::from("/tmp/build"),
            types: None,
            use_polling: false,
            build: None,
            mirror: paths
                .iter()
                .map(|p| MirrorTarget {
                    local_path: p.clone(),
                    servers: vec!["home".to_string()],
                })
                .collect(),
            distribute: Vec::new(),
        }
    }

    fn ops_for(calls: &[(String, PathBuf)], op: &str) -> Vec<usize> {
        calls
            .iter()
            .enumerate()
            .filter(|(_, (o, _))| o == op)
            .map(|(i, _)| i)
            .collect()
    }

    #[tokio::test]
    async fn startup_creates_local_directories() {
        let temp_dir = TempDir::new().unwrap();
        let a = temp_dir.path().join("mirror/home");
        let b = temp_dir.path().join("mirror/deep/worker");

        let link = MemoryLink::new();
        link.connect_client();

        let config = config_with_mirrors(&[a.clone(), b.clone()]);
        let orchestrator = MirrorOrchestrator::start(&link, &config).await.unwrap();

        assert!(a.is_dir());
        assert!(b.is_dir());
        assert_eq!(orchestrator.sessions().len(), 2);
        for session in orchestrator.sessions() {
            assert_eq!(session.state(), SessionState::Watching);
            assert_eq!(session.servers(), ["home"]);
        }
    }

    #[tokio::test]
    async fn phases_are_batched_across_sessions() {
        let temp_dir = TempDir::new().unwrap();
        let slow = temp_dir.path().join("slow");
        let fast = temp_dir.path().join("fast");

        let link = MemoryLink::new();
        link.connect_client();
        // The slow directory lags each phase; without the barrier the fast
        // one would reach sync/watch while slow was still initializing.
        link.set_mirror_latency(&slow, 40);

        let config = config_with_mirrors(&[slow, fast]);
        let _orchestrator = MirrorOrchestrator::start(&link, &config).await.unwrap();

        let calls = link.mirror_calls();
        let inits = ops_for(&calls, "init");
        let syncs = ops_for(&calls, "sync");
        let watches = ops_for(&calls, "watch");

        assert_eq!(inits.len(), 2);
        assert_eq!(syncs.len(), 2);
        assert_eq!(watches.len(), 2);

        let last_init = *inits.iter().max().unwrap();
        let first_sync = *syncs.iter().min().unwrap();
        let last_sync = *syncs.iter().max().unwrap();
        let first_watch = *watches.iter().min().unwrap();

        assert!(last_init < first_sync, "a sync started before every init settled");
        assert!(last_sync < first_watch, "a watch started before every sync settled");
    }

    #[tokio::test]
    async fn sync_failure_aborts_startup_without_watching() {
        let temp_dir = TempDir::new().unwrap();
        let bad = temp_dir.path().join("bad");
        let good = temp_dir.path().join("good");

        let link = MemoryLink::new();
        link.connect_client();
        link.set_fail_sync_for(&bad);

        let config = config_with_mirrors(&[bad, good]);
        let result = MirrorOrchestrator::start(&link, &config).await;
        assert!(result.is_err());

        let calls = link.mirror_calls();
        assert_eq!(ops_for(&calls, "init").len(), 2);
        assert_eq!(ops_for(&calls, "sync").len(), 2, "siblings are not cancelled");
        assert!(ops_for(&calls, "watch").is_empty(), "no session may start watching");
        // Both sessions were disposed on the failure path.
        assert_eq!(ops_for(&calls, "dispose").len(), 2);
    }

    #[tokio::test]
    async fn dispose_all_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("m");

        let link = MemoryLink::new();
        link.connect_client();

        let config = config_with_mirrors(&[dir]);
        let mut orchestrator = MirrorOrchestrator::start(&link, &config).await.unwrap();

        orchestrator.dispose_all().await;
        orchestrator.dispose_all().await;

        let calls = link.mirror_calls();
        assert_eq!(ops_for(&calls, "dispose").len(), 1);
        assert_eq!(orchestrator.sessions()[0].state(), SessionState::Disposed);
    }

    #[tokio::test]
    async fn empty_mirror_config_yields_no_sessions() {
        let link = MemoryLink::new();
        link.connect_client();

        let config = config_with_mirrors(&[]);
        let orchestrator = MirrorOrchestrator::start(&link, &config).await.unwrap();
        assert!(orchestrator.sessions().is_empty());
    }
}

//! In-process loopback link
//!
//! Implements [`RemoteLink`] against an in-memory runtime image instead of a
//! real connection. Tests drive connection events and failure modes through
//! it, and the binary uses it as a dry-run harness when no protocol crate is
//! embedded.

use super::api::{
    ConnectionState, FilePush, FileRef, LinkError, LinkEvent, MirrorHandle, MirrorSpec,
    RemoteLink, Result,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::time::{Duration, sleep};

/// In-memory state for the loopback link
#[derive(Debug, Default)]
struct LinkState {
    /// Runtime file image: (server, filename) -> content
    files: HashMap<(String, String), String>,

    /// Whether a client is connected
    connected: bool,

    /// Port passed to `listen`
    listen_port: Option<u16>,

    /// Text served by `definition_file`
    definition: String,

    /// Simulate listener failure
    fail_listen: bool,

    /// Simulate push failures
    fail_push: bool,

    /// Simulate RAM-calculation failures
    fail_ram: bool,

    /// Simulate distribution failures
    fail_distribute: bool,

    /// Simulated per-push latency in milliseconds
    push_latency_ms: u64,

    /// Simulated latency per mirror directory
    mirror_latency: HashMap<PathBuf, u64>,

    /// Mirror directory whose sync step fails
    fail_sync_for: Option<PathBuf>,

    /// Completed pushes, in completion order
    push_calls: Vec<FileRef>,

    /// Completed RAM calculations, in completion order
    ram_calls: Vec<FileRef>,

    /// Completed distributions
    distribute_calls: Vec<(PathBuf, Vec<String>)>,
}

/// Loopback implementation of [`RemoteLink`].
///
/// Thread-safe via `Arc<Mutex<...>>`; clones share one runtime image.
/// Mirror handles created by this link append to a shared call log so tests
/// can assert lifecycle ordering across directories.
#[derive(Debug, Clone)]
pub struct MemoryLink {
    state: Arc<Mutex<LinkState>>,
    events: broadcast::Sender<LinkEvent>,
    mirror_log: Arc<Mutex<Vec<(String, PathBuf)>>>,
}

impl MemoryLink {
    /// Create a new disconnected loopback link
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            state: Arc::new(Mutex::new(LinkState {
                definition: "// loopback runtime definitions\n".to_string(),
                ..Default::default()
            })),
            events,
            mirror_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Simulate a client connecting
    pub fn connect_client(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.connected = true;
        }
        let _ = self.events.send(LinkEvent::ClientConnected);
    }

    /// Simulate the link closing for good
    pub fn close(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.connected = false;
        }
        let _ = self.events.send(LinkEvent::Closed);
    }

    /// Set simulated latency for push operations
    pub fn set_push_latency(&self, latency_ms: u64) {
        let mut state = self.state.lock().unwrap();
        state.push_latency_ms = latency_ms;
    }

    /// Set simulated latency for one mirror directory's lifecycle steps
    pub fn set_mirror_latency(&self, local_path: &Path, latency_ms: u64) {
        let mut state = self.state.lock().unwrap();
        state.mirror_latency.insert(local_path.to_path_buf(), latency_ms);
    }

    /// Enable listener failure simulation
    pub fn set_fail_listen(&self, fail: bool) {
        let mut state = self.state.lock().unwrap();
        state.fail_listen = fail;
    }

    /// Enable push failure simulation
    pub fn set_fail_push(&self, fail: bool) {
        let mut state = self.state.lock().unwrap();
        state.fail_push = fail;
    }

    /// Enable RAM-calculation failure simulation
    pub fn set_fail_ram(&self, fail: bool) {
        let mut state = self.state.lock().unwrap();
        state.fail_ram = fail;
    }

    /// Enable distribution failure simulation
    pub fn set_fail_distribute(&self, fail: bool) {
        let mut state = self.state.lock().unwrap();
        state.fail_distribute = fail;
    }

    /// Make the sync step fail for one mirror directory
    pub fn set_fail_sync_for(&self, local_path: &Path) {
        let mut state = self.state.lock().unwrap();
        state.fail_sync_for = Some(local_path.to_path_buf());
    }

    /// Replace the served definition text
    pub fn set_definition(&self, text: &str) {
        let mut state = self.state.lock().unwrap();
        state.definition = text.to_string();
    }

    /// Get a file from the runtime image (for assertions)
    pub fn file(&self, server: &str, filename: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state
            .files
            .get(&(server.to_string(), filename.to_string()))
            .cloned()
    }

    /// Number of files in the runtime image
    pub fn file_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.files.len()
    }

    /// Port passed to `listen`, if any
    pub fn listen_port(&self) -> Option<u16> {
        let state = self.state.lock().unwrap();
        state.listen_port
    }

    /// Completed pushes, in completion order
    pub fn push_calls(&self) -> Vec<FileRef> {
        let state = self.state.lock().unwrap();
        state.push_calls.clone()
    }

    /// Completed RAM calculations, in completion order
    pub fn ram_calls(&self) -> Vec<FileRef> {
        let state = self.state.lock().unwrap();
        state.ram_calls.clone()
    }

    /// Completed distributions
    pub fn distribute_calls(&self) -> Vec<(PathBuf, Vec<String>)> {
        let state = self.state.lock().unwrap();
        state.distribute_calls.clone()
    }

    /// Mirror lifecycle calls across all handles, in call order.
    ///
    /// Entries are `(op, local_path)` where op is one of `"init"`, `"sync"`,
    /// `"watch"`, `"dispose"`.
    pub fn mirror_calls(&self) -> Vec<(String, PathBuf)> {
        let log = self.mirror_log.lock().unwrap();
        log.clone()
    }

    /// Simulate push latency if configured
    async fn simulate_push_latency(&self) {
        let latency_ms = {
            let state = self.state.lock().unwrap();
            state.push_latency_ms
        };

        if latency_ms > 0 {
            sleep(Duration::from_millis(latency_ms)).await;
        }
    }
}

impl Default for MemoryLink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteLink for MemoryLink {
    async fn listen(&self, port: u16) -> Result<()> {
        let mut state = self.state.lock().unwrap();

        if state.fail_listen {
            return Err(LinkError::Rejected {
                message: format!("simulated listener failure on port {port}"),
            });
        }

        state.listen_port = Some(port);
        Ok(())
    }

    fn connection(&self) -> ConnectionState {
        let state = self.state.lock().unwrap();
        ConnectionState {
            connected: state.connected,
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }

    async fn push_file(&self, push: FilePush) -> Result<()> {
        self.simulate_push_latency().await;

        let mut state = self.state.lock().unwrap();

        if !state.connected {
            return Err(LinkError::NotConnected {
                message: "no client connected".to_string(),
            });
        }

        if state.fail_push {
            return Err(LinkError::Rejected {
                message: "simulated push failure".to_string(),
            });
        }

        state.push_calls.push(FileRef {
            server: push.server.clone(),
            filename: push.filename.clone(),
        });
        state
            .files
            .insert((push.server, push.filename), push.content);

        Ok(())
    }

    async fn calculate_ram(&self, file: &FileRef) -> Result<f64> {
        let mut state = self.state.lock().unwrap();

        if !state.connected {
            return Err(LinkError::NotConnected {
                message: "no client connected".to_string(),
            });
        }

        if state.fail_ram {
            return Err(LinkError::Rejected {
                message: "simulated RAM calculation failure".to_string(),
            });
        }

        let key = (file.server.clone(), file.filename.clone());
        let content = state.files.get(&key).ok_or_else(|| LinkError::Rejected {
            message: format!("unknown file {}:{}", file.server, file.filename),
        })?;

        // Deterministic stand-in for the runtime's analysis: base cost plus
        // a size-dependent term.
        let cost = 1.6 + (content.len() as f64) / 1024.0;

        state.ram_calls.push(file.clone());
        Ok(cost)
    }

    async fn definition_file(&self) -> Result<String> {
        let state = self.state.lock().unwrap();

        if !state.connected {
            return Err(LinkError::NotConnected {
                message: "no client connected".to_string(),
            });
        }

        Ok(state.definition.clone())
    }

    async fn mirror(&self, spec: MirrorSpec) -> Result<Box<dyn MirrorHandle>> {
        let state = self.state.lock().unwrap();

        if !state.connected {
            return Err(LinkError::NotConnected {
                message: "no client connected".to_string(),
            });
        }

        let latency_ms = state
            .mirror_latency
            .get(&spec.local_path)
            .copied()
            .unwrap_or(0);
        let fail_sync = state.fail_sync_for.as_deref() == Some(spec.local_path.as_path());

        Ok(Box::new(MemoryMirrorHandle {
            local_path: spec.local_path,
            latency_ms,
            fail_sync,
            disposed: false,
            log: Arc::clone(&self.mirror_log),
        }))
    }

    async fn distribute(&self, local_path: &Path, servers: &[String]) -> Result<()> {
        {
            let state = self.state.lock().unwrap();

            if !state.connected {
                return Err(LinkError::NotConnected {
                    message: "no client connected".to_string(),
                });
            }

            if state.fail_distribute {
                return Err(LinkError::Rejected {
                    message: "simulated distribution failure".to_string(),
                });
            }
        } // Lock is dropped here

        let content = tokio::fs::read_to_string(local_path).await?;

        let filename = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| LinkError::Rejected {
                message: format!("path has no usable filename: {}", local_path.display()),
            })?
            .to_string();

        let mut state = self.state.lock().unwrap();
        for server in servers {
            state
                .files
                .insert((server.clone(), filename.clone()), content.clone());
        }
        state
            .distribute_calls
            .push((local_path.to_path_buf(), servers.to_vec()));

        Ok(())
    }
}

/// Mirror handle backed by the shared call log
struct MemoryMirrorHandle {
    local_path: PathBuf,
    latency_ms: u64,
    fail_sync: bool,
    disposed: bool,
    log: Arc<Mutex<Vec<(String, PathBuf)>>>,
}

impl MemoryMirrorHandle {
    async fn step(&self, op: &str) {
        if self.latency_ms > 0 {
            sleep(Duration::from_millis(self.latency_ms)).await;
        }
        let mut log = self.log.lock().unwrap();
        log.push((op.to_string(), self.local_path.clone()));
    }
}

#[async_trait]
impl MirrorHandle for MemoryMirrorHandle {
    async fn init_file_cache(&mut self) -> Result<()> {
        self.step("init").await;
        Ok(())
    }

    async fn sync_with_remote(&mut self) -> Result<()> {
        self.step("sync").await;
        if self.fail_sync {
            return Err(LinkError::Rejected {
                message: format!("simulated sync failure for {}", self.local_path.display()),
            });
        }
        Ok(())
    }

    async fn watch(&mut self) -> Result<()> {
        self.step("watch").await;
        Ok(())
    }

    async fn dispose(&mut self) -> Result<()> {
        if self.disposed {
            return Ok(());
        }
        self.disposed = true;
        self.step("dispose").await;
        Ok(())
    }
}

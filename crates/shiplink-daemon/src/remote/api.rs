//! Remote link trait for the deploy daemon
//!
//! Defines the abstraction over the connection/protocol layer that talks to
//! the runtime. Implementations include a real wire protocol (supplied by
//! embedders) and the in-process loopback (`MemoryLink`) used for tests and
//! dry runs. The orchestrator only ever sees these traits.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;

/// Result type for link operations
pub type Result<T> = std::result::Result<T, LinkError>;

/// Link errors
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// No client is connected to serve the request
    #[error("Not connected: {message}")]
    NotConnected { message: String },

    /// The runtime refused the operation
    #[error("Remote rejected operation: {message}")]
    Rejected { message: String },

    /// IO error while reading local data for the operation
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Events published by a link.
///
/// `ClientConnected` fires once per new connection; `Closed` fires once when
/// the link shuts down for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    ClientConnected,
    Closed,
}

/// Snapshot of the link's connection status.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectionState {
    pub connected: bool,
}

/// One file to push into the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePush {
    /// Target server inside the runtime.
    pub server: String,
    /// Server-relative filename, forward slashes.
    pub filename: String,
    pub content: String,
}

/// Reference to a file already present in the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    pub server: String,
    pub filename: String,
}

/// Request to mirror a local directory against a set of servers.
#[derive(Debug, Clone)]
pub struct MirrorSpec {
    pub local_path: PathBuf,
    pub servers: Vec<String>,
    /// Forwarded to the link's file watcher; not interpreted here.
    pub use_polling: bool,
}

/// Connection/protocol abstraction for the runtime.
///
/// Implementations must be thread-safe (Send + Sync): the controller pushes
/// files concurrently and the daemon loop holds the link across await points.
#[async_trait]
pub trait RemoteLink: Send + Sync {
    /// Start listening for the runtime client on `port`.
    ///
    /// Resolves once the listener is up; client connections are reported
    /// through [`RemoteLink::subscribe`] afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be established. This is fatal
    /// to the daemon.
    async fn listen(&self, port: u16) -> Result<()>;

    /// Current connection status. Cheap, never blocks.
    fn connection(&self) -> ConnectionState;

    /// Subscribe to link events.
    ///
    /// The receiver must be created before re-checking
    /// [`connection`](RemoteLink::connection) when waiting for a client, so a
    /// concurrent connect cannot slip between check and subscribe.
    fn subscribe(&self) -> broadcast::Receiver<LinkEvent>;

    /// Push one file into the runtime, overwriting any previous version.
    ///
    /// # Errors
    ///
    /// Returns an error if no client is connected or the runtime refuses
    /// the write.
    async fn push_file(&self, push: FilePush) -> Result<()>;

    /// Compute the RAM cost of a file already pushed to the runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is unknown to the runtime or no client
    /// is connected.
    async fn calculate_ram(&self, file: &FileRef) -> Result<f64>;

    /// Fetch the runtime's type-definition artifact.
    async fn definition_file(&self) -> Result<String>;

    /// Establish a mirror of a local directory against remote servers.
    ///
    /// The returned handle is inert: the caller drives it through the
    /// [`MirrorHandle`] lifecycle.
    async fn mirror(&self, spec: MirrorSpec) -> Result<Box<dyn MirrorHandle>>;

    /// Copy a local file to every server in `servers`.
    ///
    /// # Errors
    ///
    /// Returns an error if the local file cannot be read or any server
    /// refuses the copy.
    async fn distribute(&self, local_path: &Path, servers: &[String]) -> Result<()>;
}

/// Lifecycle of one mirror session.
///
/// Drive order is `init_file_cache` then `sync_with_remote` then `watch`;
/// the orchestrator enforces that order across all sessions. `dispose` is
/// idempotent and must release the link-side watcher.
#[async_trait]
pub trait MirrorHandle: Send + Sync {
    /// Prime the handle's cache of local file state.
    async fn init_file_cache(&mut self) -> Result<()>;

    /// Reconcile local and remote state once.
    async fn sync_with_remote(&mut self) -> Result<()>;

    /// Start continuous watching. Resolves once watching is established.
    async fn watch(&mut self) -> Result<()>;

    /// Stop watching and release resources. Safe to call more than once.
    async fn dispose(&mut self) -> Result<()>;
}

//! shiplink-daemon - deploy-on-build service for connected runtimes
//!
//! Watches a project's sources, rebuilds on change, and ships the compiled
//! output into whatever runtime is attached to the remote link: every file
//! under the output directory is pushed to its server, priced for RAM, and
//! kept fresh across reconnects. Library users embed [`Daemon`] with their
//! own [`RemoteLink`] implementation and [`Extension`] hooks; the binary
//! wires the same pieces around the in-process loopback link.

pub mod controller;
pub mod daemon;
pub mod distribute;
pub mod extensions;
pub mod mirror;
pub mod queue;
pub mod remote;
pub mod resolver;
pub mod runner;
pub mod status;

pub use controller::{BuildOutcome, DeployController};
pub use daemon::Daemon;
pub use extensions::{Extension, ExtensionSet, Hook, HookContext};
pub use remote::{
    ConnectionState, FilePush, FileRef, LinkError, LinkEvent, MemoryLink, MirrorHandle, MirrorSpec,
    RemoteLink,
};

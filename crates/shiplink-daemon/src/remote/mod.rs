//! Remote runtime interface
//!
//! The traits in [`api`] are the daemon's only view of the connection layer;
//! [`memory`] provides the in-process loopback implementation.

pub mod api;
pub mod memory;

pub use api::{
    ConnectionState, FilePush, FileRef, LinkError, LinkEvent, MirrorHandle, MirrorSpec, RemoteLink,
};
pub use memory::MemoryLink;

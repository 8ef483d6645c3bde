//! File staging (rsync) and HTTP forwards to the Remote Server
//! (spec.md §4.3): the Local Proxy's only path to the remote cluster.

pub mod client;
pub mod error;
pub mod lock;
pub mod stage;

pub use client::RemoteClient;
pub use error::BridgeError;
pub use lock::StagingLocks;
pub use stage::{copy_to_temp, rsync_push, SshTarget};

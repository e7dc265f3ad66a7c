//! Finch Distributed
//!
//! Process-group rendezvous and barrier primitives shared by all workers.
//!
//! Two implementations of the same seam: `TcpSynchronizer` performs a real
//! localhost rendezvous with a bounded startup wait, `LocalSynchronizer`
//! wraps an in-process barrier for tests and single-process runs.
//!
//! Barriers have no timeout: a crashed peer blocks every survivor
//! indefinitely. Only the initial rendezvous has a bounded wait.

pub mod local;
pub mod tcp;

pub use local::LocalSynchronizer;
pub use tcp::TcpSynchronizer;

use async_trait::async_trait;
use thiserror::Error;

/// Result type for synchronizer operations.
pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Synchronizer errors. Everything here is fatal to the run.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A worker failed to join the process group within the startup
    /// window. The group can never form, so all workers must abort.
    #[error("rendezvous timed out after {waited_secs}s: {joined} of {world_size} workers joined")]
    RendezvousTimeout { waited_secs: u64, joined: usize, world_size: usize },

    /// A peer sent something other than the expected message, or closed
    /// its connection mid-protocol.
    #[error("synchronizer protocol error: {0}")]
    Protocol(String),

    /// IO error on the group's sockets.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed wire message.
    #[error("wire decode error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Rendezvous/barrier handle owned by one worker.
#[async_trait]
pub trait Synchronizer: Send + Sync {
    fn rank(&self) -> usize;

    fn world_size(&self) -> usize;

    /// Block until every worker in the group has also called `barrier`
    /// since the last barrier. No partial or timeout variant exists.
    async fn barrier(&self) -> SyncResult<()>;
}

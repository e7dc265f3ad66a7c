//! Finch Orchestrator
//!
//! The top-level driver: per-worker stage orchestration (freeze
//! transitions, epoch loop, checkpoint cadence, barriers) and the worker
//! pool that launches one orchestrator per device.

pub mod orchestrator;
pub mod pool;

pub use orchestrator::{RunState, StageOrchestrator, CHECKPOINT_EVERY_EPOCHS};
pub use pool::{SyncMode, WorkerPool};

use thiserror::Error;

/// Result type for orchestration operations.
pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;

/// Orchestration errors. Per-step numeric overflow never appears here;
/// it is absorbed inside the step executor.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Startup configuration is invalid.
    #[error(transparent)]
    Config(#[from] finch_core::ConfigError),

    /// Schedule, checkpoint, dataset or model failure.
    #[error(transparent)]
    Training(#[from] finch_training::TrainingError),

    /// Rendezvous or barrier failure.
    #[error(transparent)]
    Sync(#[from] finch_distributed::SyncError),

    /// A worker task aborted without reporting an error.
    #[error("worker {rank} panicked")]
    WorkerPanicked { rank: usize },
}

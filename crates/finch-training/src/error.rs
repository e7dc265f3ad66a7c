use std::path::PathBuf;
use thiserror::Error;

/// Result type for training operations.
pub type TrainingResult<T> = std::result::Result<T, TrainingError>;

/// Training errors.
///
/// Everything here is fatal to the run except where a caller explicitly
/// recovers. Gradient overflow has no variant here: it is absorbed by
/// the scaler inside the step executor, never surfaced as an error.
#[derive(Debug, Error)]
pub enum TrainingError {
    /// The stage schedule itself is malformed.
    #[error("invalid stage schedule: {0}")]
    InvalidSchedule(String),

    /// Requested resume epoch exceeds the total scheduled epochs.
    #[error("resume epoch {requested} is past the end of the schedule ({total} total epochs)")]
    ScheduleExhausted { requested: u64, total: u64 },

    /// Resume requested for an epoch with no checkpoint file.
    #[error("checkpoint not found: {path}")]
    CheckpointMissing { path: PathBuf },

    /// Checkpoint file exists but cannot be decoded or fails its digest.
    #[error("checkpoint unreadable: {path}: {reason}")]
    CheckpointCorrupt { path: PathBuf, reason: String },

    /// Dataset directory problems (missing split, no classes, ...).
    #[error("dataset error: {0}")]
    Dataset(String),

    /// Model/parameter-group problems (unknown group, shape mismatch, ...).
    #[error("model error: {0}")]
    Model(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Blob encoding/decoding failed.
    #[error("state encoding error: {0}")]
    Encode(#[from] bincode::Error),
}

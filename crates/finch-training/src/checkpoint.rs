use crate::error::{TrainingError, TrainingResult};
use crate::layout::CheckpointLayout;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::info;

/// A durable snapshot of training state at an absolute epoch. The model
/// and optimizer blobs are always taken from the same instant; a
/// checkpoint is the unit of resume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub epoch: u64,
    pub model_state: Vec<u8>,
    pub optimizer_state: Vec<u8>,
}

/// On-disk record: the checkpoint plus digests of both blobs, so a
/// truncated or bit-rotted file is reported as corrupt rather than
/// silently restored.
#[derive(Serialize, Deserialize)]
struct CheckpointRecord {
    epoch: u64,
    model_sha256: String,
    optimizer_sha256: String,
    model_state: Vec<u8>,
    optimizer_state: Vec<u8>,
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Persists and reloads checkpoints atomically. Only rank 0 ever writes;
/// other ranks read at most once, at startup.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    layout: CheckpointLayout,
}

impl CheckpointStore {
    #[must_use]
    pub fn new(layout: CheckpointLayout) -> Self {
        Self { layout }
    }

    #[must_use]
    pub fn path_for(&self, epoch: u64) -> std::path::PathBuf {
        self.layout.checkpoint_path(epoch)
    }

    /// Write via a temp file in the run directory, then rename into
    /// place, so a crash never leaves a half-written checkpoint at the
    /// final path.
    pub fn save(&self, checkpoint: &Checkpoint) -> TrainingResult<std::path::PathBuf> {
        self.layout.ensure_run_dir()?;
        let record = CheckpointRecord {
            epoch: checkpoint.epoch,
            model_sha256: sha256_hex(&checkpoint.model_state),
            optimizer_sha256: sha256_hex(&checkpoint.optimizer_state),
            model_state: checkpoint.model_state.clone(),
            optimizer_state: checkpoint.optimizer_state.clone(),
        };
        let bytes = bincode::serialize(&record)?;

        let path = self.path_for(checkpoint.epoch);
        let tmp = path.with_extension("pth.tmp");
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, &path)?;
        info!(epoch = checkpoint.epoch, path = %path.display(), "saved checkpoint");
        Ok(path)
    }

    pub fn load(&self, epoch: u64) -> TrainingResult<Checkpoint> {
        let path = self.path_for(epoch);
        if !path.exists() {
            return Err(TrainingError::CheckpointMissing { path });
        }
        let bytes = std::fs::read(&path)?;
        let record: CheckpointRecord = bincode::deserialize(&bytes).map_err(|e| {
            TrainingError::CheckpointCorrupt { path: path.clone(), reason: e.to_string() }
        })?;
        Self::verify(&path, &record)?;
        if record.epoch != epoch {
            return Err(TrainingError::CheckpointCorrupt {
                path,
                reason: format!("file claims epoch {}, expected {epoch}", record.epoch),
            });
        }
        Ok(Checkpoint {
            epoch: record.epoch,
            model_state: record.model_state,
            optimizer_state: record.optimizer_state,
        })
    }

    fn verify(path: &Path, record: &CheckpointRecord) -> TrainingResult<()> {
        if sha256_hex(&record.model_state) != record.model_sha256 {
            return Err(TrainingError::CheckpointCorrupt {
                path: path.to_path_buf(),
                reason: "model state digest mismatch".to_string(),
            });
        }
        if sha256_hex(&record.optimizer_state) != record.optimizer_sha256 {
            return Err(TrainingError::CheckpointCorrupt {
                path: path.to_path_buf(),
                reason: "optimizer state digest mismatch".to_string(),
            });
        }
        Ok(())
    }
}

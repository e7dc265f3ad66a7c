use crate::error::TrainingResult;
use finch_core::ModelTier;
use std::path::{Path, PathBuf};

/// Filesystem layout for checkpoint files.
///
/// Each run gets a directory keyed by model tier and split,
/// `<runs_root>/<tier>_<split>/`, holding `checkpoint_epoch{N}.pth` files
/// where `N` is the absolute epoch count completed.
#[derive(Debug, Clone)]
pub struct CheckpointLayout {
    run_dir: PathBuf,
}

impl CheckpointLayout {
    #[must_use]
    pub fn new(runs_root: &Path, tier: ModelTier, split: &str) -> Self {
        Self { run_dir: runs_root.join(format!("{}_{split}", tier.short_name())) }
    }

    #[must_use]
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    #[must_use]
    pub fn checkpoint_path(&self, epoch: u64) -> PathBuf {
        self.run_dir.join(format!("checkpoint_epoch{epoch}.pth"))
    }

    pub fn ensure_run_dir(&self) -> TrainingResult<()> {
        std::fs::create_dir_all(&self.run_dir)?;
        Ok(())
    }
}

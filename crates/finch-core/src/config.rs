use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Number of output classes in the species classifier head.
pub const NUM_CLASSES: usize = 14_991;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid run config: {0}")]
    Invalid(String),

    #[error("unknown model tier '{0}' (expected s, m or l)")]
    UnknownTier(String),
}

/// Pretrained backbone size tier. Selects the per-device batch size and
/// the input resolution used for that size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Small,
    Medium,
    Large,
}

impl ModelTier {
    /// Per-device batch size for this tier.
    #[must_use]
    pub fn batch_size(self) -> usize {
        match self {
            Self::Small => 256,
            Self::Medium => 96,
            Self::Large => 48,
        }
    }

    /// Square input resolution in pixels.
    #[must_use]
    pub fn resolution(self) -> u32 {
        match self {
            Self::Small => 300,
            Self::Medium | Self::Large => 384,
        }
    }

    /// Short name used in run directories and checkpoint paths.
    #[must_use]
    pub fn short_name(self) -> &'static str {
        match self {
            Self::Small => "s",
            Self::Medium => "m",
            Self::Large => "l",
        }
    }
}

impl std::str::FromStr for ModelTier {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "s" | "small" => Ok(Self::Small),
            "m" | "medium" => Ok(Self::Medium),
            "l" | "large" => Ok(Self::Large),
            other => Err(ConfigError::UnknownTier(other.to_string())),
        }
    }
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.short_name())
    }
}

/// Immutable configuration for one fine-tuning run.
///
/// Constructed once at startup from CLI arguments, then passed by
/// reference to every component. Workers never consult environment
/// variables or any other ambient state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Backbone size tier.
    pub tier: ModelTier,
    /// Dataset split identifier (selects `dataset_root/<split>`).
    pub split: String,
    /// Absolute epoch to resume from, or `None` for a fresh run.
    pub resume_epoch: Option<u64>,
    /// Localhost port used for the worker rendezvous.
    pub port: u16,
    /// Fixed number of worker processes, one per compute device.
    pub world_size: usize,
    /// Root directory holding class-per-directory image splits.
    pub dataset_root: PathBuf,
    /// Root directory for per-run checkpoint directories.
    pub runs_root: PathBuf,
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.split.trim().is_empty() {
            return Err(ConfigError::Invalid("split must not be empty".to_string()));
        }
        if self.world_size == 0 {
            return Err(ConfigError::Invalid("world_size must be >= 1".to_string()));
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid("port must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Per-device batch size implied by the tier.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.tier.batch_size()
    }

    /// Directory containing this run's split, one subdirectory per class.
    #[must_use]
    pub fn split_dir(&self) -> PathBuf {
        self.dataset_root.join(&self.split)
    }
}

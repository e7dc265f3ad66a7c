use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};

/// Rule determining which parameter groups become trainable upon entering
/// a stage. Applied exactly once, at stage entry; transitions assert only
/// the newly-named groups and rely on earlier transitions having run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum FreezePolicy {
    /// Only the classifier head trains.
    ClassifierOnly,
    /// The layers adjoining the classifier (final norm + projection).
    UnfreezeBoundary,
    /// One backbone block, counted from the output side (1 = the block
    /// feeding the classifier). Resolved against the model's declared
    /// block count at apply time; out of range is an error, not
    /// wraparound.
    UnfreezeBlock { depth_from_output: usize },
    /// The entire model.
    UnfreezeAll,
}

/// One contiguous span of epochs with a fixed trainable-parameter set.
/// Immutable once the schedule is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingStage {
    /// Dense index starting at 0.
    pub ordinal: usize,
    /// Number of epochs this stage runs for.
    pub epoch_count: u64,
    /// Applied at stage entry, before the stage's first step.
    pub freeze_policy: FreezePolicy,
}

/// Where a run is inside the schedule. Always derived from the absolute
/// epoch and the schedule, never stored independently, so the two cannot
/// drift apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingPosition {
    pub absolute_epoch: u64,
    pub stage_ordinal: usize,
    pub epoch_within_stage: u64,
    pub global_step: u64,
}

/// An ordered, immutable list of training stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSchedule {
    stages: Vec<TrainingStage>,
}

impl StageSchedule {
    pub fn new(specs: Vec<(u64, FreezePolicy)>) -> TrainingResult<Self> {
        if specs.is_empty() {
            return Err(TrainingError::InvalidSchedule("schedule must have at least one stage".to_string()));
        }
        let stages = specs
            .into_iter()
            .enumerate()
            .map(|(ordinal, (epoch_count, freeze_policy))| {
                if epoch_count == 0 {
                    return Err(TrainingError::InvalidSchedule(format!(
                        "stage {ordinal} has zero epochs"
                    )));
                }
                Ok(TrainingStage { ordinal, epoch_count, freeze_policy })
            })
            .collect::<TrainingResult<Vec<_>>>()?;
        Ok(Self { stages })
    }

    /// Build a schedule from a bare epoch-count list: the first stage
    /// trains the classifier, the last fine-tunes the whole model, and
    /// each middle entry unfreezes one more block from the output side.
    pub fn from_epoch_counts(counts: &[u64]) -> TrainingResult<Self> {
        if counts.len() < 2 {
            return Err(TrainingError::InvalidSchedule(
                "need at least a classifier stage and a full fine-tune stage".to_string(),
            ));
        }
        let last = counts.len() - 1;
        let specs = counts
            .iter()
            .enumerate()
            .map(|(i, &epochs)| {
                let policy = if i == 0 {
                    FreezePolicy::ClassifierOnly
                } else if i == last {
                    FreezePolicy::UnfreezeAll
                } else {
                    FreezePolicy::UnfreezeBlock { depth_from_output: i }
                };
                (epochs, policy)
            })
            .collect();
        Self::new(specs)
    }

    #[must_use]
    pub fn stages(&self) -> &[TrainingStage] {
        &self.stages
    }

    #[must_use]
    pub fn stage(&self, ordinal: usize) -> Option<&TrainingStage> {
        self.stages.get(ordinal)
    }

    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Sum of all stages' epoch counts.
    #[must_use]
    pub fn total_epochs(&self) -> u64 {
        self.stages.iter().map(|s| s.epoch_count).sum()
    }

    /// Absolute epoch at which `ordinal` begins.
    #[must_use]
    pub fn stage_start_epoch(&self, ordinal: usize) -> u64 {
        self.stages[..ordinal].iter().map(|s| s.epoch_count).sum()
    }

    /// Derive the position for an absolute epoch strictly inside the
    /// schedule. Returns `None` past the end.
    #[must_use]
    pub fn position_of(&self, absolute_epoch: u64, steps_per_epoch: u64) -> Option<TrainingPosition> {
        let mut cumulative = 0u64;
        for stage in &self.stages {
            if absolute_epoch < cumulative + stage.epoch_count {
                return Some(TrainingPosition {
                    absolute_epoch,
                    stage_ordinal: stage.ordinal,
                    epoch_within_stage: absolute_epoch - cumulative,
                    global_step: absolute_epoch * steps_per_epoch,
                });
            }
            cumulative += stage.epoch_count;
        }
        None
    }
}

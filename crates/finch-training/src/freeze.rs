use crate::error::TrainingResult;
use crate::model::{Model, CLASSIFIER, HEAD};
use crate::schedule::{FreezePolicy, TrainingStage};
use tracing::debug;

/// Applies a stage's freeze policy to the model's trainable flags.
///
/// Must be called exactly once per stage, in stage order, before the
/// stage's first training step — including for stages skipped during
/// resume, so the cumulative trainable set is reached. Each call asserts
/// only the groups its policy names; nothing re-asserts groups unfrozen
/// by earlier stages, and no monotonicity is enforced, so a schedule that
/// re-freezes parameters is applied as written.
#[derive(Debug, Default)]
pub struct FreezeController;

impl FreezeController {
    pub fn apply(&self, model: &mut Model, stage: &TrainingStage) -> TrainingResult<()> {
        match stage.freeze_policy {
            FreezePolicy::ClassifierOnly => {
                model.set_group_trainable(CLASSIFIER, true)?;
            }
            FreezePolicy::UnfreezeBoundary => {
                model.set_group_trainable(HEAD, true)?;
            }
            FreezePolicy::UnfreezeBlock { depth_from_output } => {
                // The first block transition also opens the boundary
                // layers between that block and the classifier.
                if depth_from_output == 1 {
                    model.set_group_trainable(HEAD, true)?;
                }
                let block = model.block_name_from_output(depth_from_output)?;
                model.set_group_trainable(&block, true)?;
            }
            FreezePolicy::UnfreezeAll => {
                model.set_all_trainable();
            }
        }
        debug!(
            stage = stage.ordinal,
            trainable = model.trainable_param_count(),
            "applied freeze policy"
        );
        Ok(())
    }
}

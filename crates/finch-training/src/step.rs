use crate::dataset::Batch;
use crate::error::TrainingResult;
use crate::lr::LrSchedule;
use crate::model::{Backbone, Model};
use crate::optimizer::Rmsprop;
use crate::scaler::GradScaler;
use tracing::trace;

/// Result of one mini-batch step.
#[derive(Debug, Clone, Copy)]
pub struct StepOutcome {
    /// Unscaled loss, for logging.
    pub loss: f32,
    /// False when a gradient overflow made the executor skip the
    /// optimizer update for this batch.
    pub applied: bool,
    /// Rate in effect for this step.
    pub lr: f64,
}

/// Runs one mini-batch with the fixed order of operations that keeps
/// reduced-precision training correct: zero grads, forward + scaled-loss
/// backward, unscale, conditional optimizer update, scaler update, rate
/// advance.
///
/// One executor lives for one optimizer's lifetime; stage transitions
/// construct a new one scoped to the new trainable set. The scaler is
/// passed in because it outlives stages.
pub struct TrainingStepExecutor {
    backbone: Box<dyn Backbone>,
    optimizer: Rmsprop,
    lr: LrSchedule,
}

impl TrainingStepExecutor {
    #[must_use]
    pub fn new(backbone: Box<dyn Backbone>, optimizer: Rmsprop, lr: LrSchedule) -> Self {
        Self { backbone, optimizer, lr }
    }

    /// A detected overflow is absorbed, never escalated: the update is
    /// skipped and the scaler halves its factor, so the next batch
    /// retries at a smaller scale.
    pub fn step(
        &mut self,
        model: &mut Model,
        scaler: &mut GradScaler,
        batch: &Batch,
    ) -> TrainingResult<StepOutcome> {
        model.zero_grads();

        let loss = self.backbone.forward_backward(model, batch, scaler.scale());

        let mut found_inf = false;
        for group in model.trainable_groups_mut() {
            found_inf |= scaler.unscale(&mut group.grads);
        }

        let lr = self.lr.current();
        if found_inf {
            trace!(loss, scale = scaler.scale(), "non-finite gradients, skipping update");
        } else {
            self.optimizer.step(model, lr)?;
        }
        scaler.update(found_inf);
        self.lr.advance();

        Ok(StepOutcome { loss, applied: !found_inf, lr })
    }

    #[must_use]
    pub fn optimizer(&self) -> &Rmsprop {
        &self.optimizer
    }

    pub fn optimizer_mut(&mut self) -> &mut Rmsprop {
        &mut self.optimizer
    }

    /// Consume the executor, releasing the backbone for the next stage's
    /// executor.
    #[must_use]
    pub fn into_backbone(self) -> Box<dyn Backbone> {
        self.backbone
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ReferenceBackbone, CLASSIFIER};
    use crate::optimizer::RmspropConfig;
    use finch_core::ModelTier;

    /// Backbone that emits non-finite gradients on chosen steps.
    struct OverflowingBackbone {
        inner: ReferenceBackbone,
        overflow_on: Vec<usize>,
        calls: usize,
    }

    impl Backbone for OverflowingBackbone {
        fn forward_backward(&mut self, model: &mut Model, batch: &Batch, loss_scale: f32) -> f32 {
            let loss = self.inner.forward_backward(model, batch, loss_scale);
            if self.overflow_on.contains(&self.calls) {
                if let Some(group) = model.trainable_groups_mut().next() {
                    group.grads[0] = f32::INFINITY;
                }
            }
            self.calls += 1;
            loss
        }
    }

    fn executor_with(backbone: Box<dyn Backbone>) -> (Model, TrainingStepExecutor) {
        let mut model = Model::for_tier(ModelTier::Small);
        model.freeze_all();
        model.set_group_trainable(CLASSIFIER, true).unwrap();
        let optimizer = Rmsprop::for_trainable(&model, RmspropConfig::default());
        let lr = LrSchedule::new(1e-2, 0, 4);
        (model, TrainingStepExecutor::new(backbone, optimizer, lr))
    }

    fn batch() -> Batch {
        Batch { sample_ids: vec![0, 1, 2], labels: vec![0, 0, 1] }
    }

    #[test]
    fn test_step_applies_update_and_reports_loss() {
        let (mut model, mut executor) = executor_with(Box::new(ReferenceBackbone));
        let mut scaler = GradScaler::default();
        let before: Vec<f32> =
            model.groups().iter().find(|g| g.name == CLASSIFIER).unwrap().values.clone();
        let outcome = executor.step(&mut model, &mut scaler, &batch()).unwrap();
        assert!(outcome.applied);
        assert!(outcome.loss.is_finite());
        let after = &model.groups().iter().find(|g| g.name == CLASSIFIER).unwrap().values;
        assert_ne!(&before, after);
    }

    #[test]
    fn test_loss_decreases_over_steps() {
        let (mut model, mut executor) = executor_with(Box::new(ReferenceBackbone));
        let mut scaler = GradScaler::default();
        let first = executor.step(&mut model, &mut scaler, &batch()).unwrap().loss;
        let mut last = first;
        for _ in 0..20 {
            last = executor.step(&mut model, &mut scaler, &batch()).unwrap().loss;
        }
        assert!(last < first);
    }

    #[test]
    fn test_overflow_skips_update_and_backs_off() {
        let backbone = OverflowingBackbone {
            inner: ReferenceBackbone,
            overflow_on: vec![0],
            calls: 0,
        };
        let (mut model, mut executor) = executor_with(Box::new(backbone));
        let mut scaler = GradScaler::default();
        let before: Vec<f32> =
            model.groups().iter().find(|g| g.name == CLASSIFIER).unwrap().values.clone();

        let outcome = executor.step(&mut model, &mut scaler, &batch()).unwrap();
        assert!(!outcome.applied);
        assert!((scaler.scale() - 32_768.0).abs() < f32::EPSILON);
        let after: Vec<f32> =
            model.groups().iter().find(|g| g.name == CLASSIFIER).unwrap().values.clone();
        assert_eq!(before, after, "skipped step must not touch weights");

        // Next batch proceeds normally at the smaller scale.
        let outcome = executor.step(&mut model, &mut scaler, &batch()).unwrap();
        assert!(outcome.applied);
    }

    #[test]
    fn test_rate_advances_every_step_including_skipped() {
        let backbone = OverflowingBackbone {
            inner: ReferenceBackbone,
            overflow_on: vec![0],
            calls: 0,
        };
        let (mut model, mut executor) = executor_with(Box::new(backbone));
        let mut scaler = GradScaler::default();
        let skipped = executor.step(&mut model, &mut scaler, &batch()).unwrap();
        let next = executor.step(&mut model, &mut scaler, &batch()).unwrap();
        assert!(next.lr < skipped.lr);
    }
}

use crate::dataset::Batch;
use crate::error::{TrainingError, TrainingResult};
use finch_core::ModelTier;
use serde::{Deserialize, Serialize};

/// Name of the classifier head group.
pub const CLASSIFIER: &str = "classifier";
/// Name of the boundary group (final norm + projection adjoining the
/// classifier).
pub const HEAD: &str = "head";
/// Name of the input stem group.
pub const STEM: &str = "stem";

/// One named set of parameters sharing a trainable flag, the granularity
/// at which freeze policies operate.
#[derive(Debug, Clone)]
pub struct ParamGroup {
    pub name: String,
    pub values: Vec<f32>,
    pub grads: Vec<f32>,
    pub trainable: bool,
}

impl ParamGroup {
    fn new(name: impl Into<String>, len: usize, group_index: usize) -> Self {
        let values = (0..len).map(|i| init_value(group_index, i)).collect();
        Self { name: name.into(), values, grads: vec![0.0; len], trainable: true }
    }
}

/// Deterministic pseudo-random initial weight in roughly [-0.05, 0.05].
fn init_value(group: usize, i: usize) -> f32 {
    let mut x = ((group as u64) << 32) ^ (i as u64) ^ 0x9e37_79b9_7f4a_7c15;
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^= x >> 31;
    ((x % 10_000) as f32 / 10_000.0 - 0.5) * 0.1
}

/// Parameter-level stand-in for the pretrained classifier backbone.
///
/// The real forward/backward kernels are out of scope; what matters here
/// is the parameter-group structure the freeze policies and optimizer
/// operate on: an input stem, an ordered list of blocks, the boundary
/// layers adjoining the classifier, and the classifier head.
#[derive(Debug, Clone)]
pub struct Model {
    groups: Vec<ParamGroup>,
    block_count: usize,
}

/// Serialized weight blob: group names paired with values, in model order.
#[derive(Serialize, Deserialize)]
struct ModelState {
    groups: Vec<(String, Vec<f32>)>,
}

impl Model {
    /// Build a replica for the given tier. All groups start trainable;
    /// the orchestrator freezes everything before applying the first
    /// stage's policy.
    #[must_use]
    pub fn for_tier(tier: ModelTier) -> Self {
        let block_count = match tier {
            ModelTier::Small => 6,
            ModelTier::Medium | ModelTier::Large => 7,
        };
        let mut groups = Vec::with_capacity(block_count + 3);
        groups.push(ParamGroup::new(STEM, 32, 0));
        for i in 0..block_count {
            groups.push(ParamGroup::new(format!("block{i}"), 64 + 8 * i, 1 + i));
        }
        groups.push(ParamGroup::new(HEAD, 48, block_count + 1));
        groups.push(ParamGroup::new(CLASSIFIER, 128, block_count + 2));
        Self { groups, block_count }
    }

    #[must_use]
    pub fn block_count(&self) -> usize {
        self.block_count
    }

    #[must_use]
    pub fn groups(&self) -> &[ParamGroup] {
        &self.groups
    }

    pub fn groups_mut(&mut self) -> &mut [ParamGroup] {
        &mut self.groups
    }

    pub fn trainable_groups_mut(&mut self) -> impl Iterator<Item = &mut ParamGroup> {
        self.groups.iter_mut().filter(|g| g.trainable)
    }

    /// Names of the currently trainable groups, in model order. The
    /// optimizer is scoped to exactly this set at (re)construction.
    #[must_use]
    pub fn trainable_group_names(&self) -> Vec<String> {
        self.groups.iter().filter(|g| g.trainable).map(|g| g.name.clone()).collect()
    }

    #[must_use]
    pub fn trainable_param_count(&self) -> usize {
        self.groups.iter().filter(|g| g.trainable).map(|g| g.values.len()).sum()
    }

    pub fn freeze_all(&mut self) {
        for group in &mut self.groups {
            group.trainable = false;
        }
    }

    pub fn set_all_trainable(&mut self) {
        for group in &mut self.groups {
            group.trainable = true;
        }
    }

    pub fn set_group_trainable(&mut self, name: &str, trainable: bool) -> TrainingResult<()> {
        let group = self
            .groups
            .iter_mut()
            .find(|g| g.name == name)
            .ok_or_else(|| TrainingError::Model(format!("unknown parameter group '{name}'")))?;
        group.trainable = trainable;
        Ok(())
    }

    /// Resolve a depth counted from the output side (1 = the block feeding
    /// the classifier) to a concrete group name. Out-of-range depths are
    /// rejected instead of wrapping around.
    pub fn block_name_from_output(&self, depth: usize) -> TrainingResult<String> {
        if depth == 0 || depth > self.block_count {
            return Err(TrainingError::Model(format!(
                "block depth {depth} out of range for {} blocks",
                self.block_count
            )));
        }
        Ok(format!("block{}", self.block_count - depth))
    }

    pub fn zero_grads(&mut self) {
        for group in &mut self.groups {
            group.grads.fill(0.0);
        }
    }

    /// Weight blob for checkpointing. Trainable flags are not part of the
    /// state; they are re-derived from the schedule on resume.
    pub fn state_bytes(&self) -> TrainingResult<Vec<u8>> {
        let state = ModelState {
            groups: self.groups.iter().map(|g| (g.name.clone(), g.values.clone())).collect(),
        };
        Ok(bincode::serialize(&state)?)
    }

    pub fn load_state_bytes(&mut self, bytes: &[u8]) -> TrainingResult<()> {
        let state: ModelState = bincode::deserialize(bytes)?;
        if state.groups.len() != self.groups.len() {
            return Err(TrainingError::Model(format!(
                "state has {} groups, model has {}",
                state.groups.len(),
                self.groups.len()
            )));
        }
        for (group, (name, values)) in self.groups.iter_mut().zip(state.groups) {
            if group.name != name {
                return Err(TrainingError::Model(format!(
                    "state group '{name}' does not match model group '{}'",
                    group.name
                )));
            }
            if group.values.len() != values.len() {
                return Err(TrainingError::Model(format!(
                    "group '{name}' has {} values in state, {} in model",
                    values.len(),
                    group.values.len()
                )));
            }
            group.values = values;
        }
        Ok(())
    }
}

/// Seam for the forward/backward numeric kernels, which are out of scope
/// here. Implementations run one mini-batch under reduced precision,
/// write `loss_scale`-scaled gradients into the trainable groups, and
/// return the unscaled loss.
pub trait Backbone: Send {
    fn forward_backward(&mut self, model: &mut Model, batch: &Batch, loss_scale: f32) -> f32;
}

/// Deterministic stand-in backbone used by tests and the demo path: a
/// quadratic loss over the trainable weights with a small per-batch
/// perturbation, so optimizer steps visibly reduce the loss.
#[derive(Debug, Default)]
pub struct ReferenceBackbone;

impl Backbone for ReferenceBackbone {
    fn forward_backward(&mut self, model: &mut Model, batch: &Batch, loss_scale: f32) -> f32 {
        let jitter = (batch.sample_ids.iter().sum::<usize>() % 997) as f32 * 1e-6;
        let mut loss = 0.0f64;
        let mut count = 0usize;
        for group in model.trainable_groups_mut() {
            for (value, grad) in group.values.iter().zip(group.grads.iter_mut()) {
                loss += f64::from(0.5 * value * value);
                *grad = loss_scale * (value + jitter);
                count += 1;
            }
        }
        if count == 0 {
            return 0.0;
        }
        (loss / count as f64) as f32 + jitter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_depth_resolution() {
        let model = Model::for_tier(ModelTier::Small);
        assert_eq!(model.block_count(), 6);
        assert_eq!(model.block_name_from_output(1).unwrap(), "block5");
        assert_eq!(model.block_name_from_output(6).unwrap(), "block0");
        assert!(model.block_name_from_output(0).is_err());
        assert!(model.block_name_from_output(7).is_err());
    }

    #[test]
    fn test_freeze_all_then_selective_unfreeze() {
        let mut model = Model::for_tier(ModelTier::Small);
        model.freeze_all();
        assert_eq!(model.trainable_param_count(), 0);
        model.set_group_trainable(CLASSIFIER, true).unwrap();
        assert_eq!(model.trainable_group_names(), vec![CLASSIFIER.to_string()]);
        assert!(model.set_group_trainable("block99", true).is_err());
    }

    #[test]
    fn test_state_round_trip_is_exact() {
        let mut a = Model::for_tier(ModelTier::Medium);
        for group in a.groups_mut() {
            for v in &mut group.values {
                *v *= 1.5;
            }
        }
        let bytes = a.state_bytes().unwrap();
        let mut b = Model::for_tier(ModelTier::Medium);
        b.load_state_bytes(&bytes).unwrap();
        for (ga, gb) in a.groups().iter().zip(b.groups()) {
            assert_eq!(ga.values, gb.values);
        }
    }

    #[test]
    fn test_state_rejects_other_tier() {
        let small = Model::for_tier(ModelTier::Small).state_bytes().unwrap();
        let mut large = Model::for_tier(ModelTier::Large);
        assert!(large.load_state_bytes(&small).is_err());
    }

    #[test]
    fn test_reference_backbone_scales_gradients() {
        let mut model = Model::for_tier(ModelTier::Small);
        let batch = Batch { sample_ids: vec![1, 2], labels: vec![0, 1] };
        let mut backbone = ReferenceBackbone;
        let loss1 = backbone.forward_backward(&mut model, &batch, 1.0);
        let grads1: Vec<f32> = model.groups()[0].grads.clone();
        model.zero_grads();
        let loss2 = backbone.forward_backward(&mut model, &batch, 4.0);
        assert!((loss1 - loss2).abs() < 1e-6);
        for (g1, g4) in grads1.iter().zip(&model.groups()[0].grads) {
            assert!((g4 - g1 * 4.0).abs() < 1e-5);
        }
    }
}

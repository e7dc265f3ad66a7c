use crate::error::{TrainingError, TrainingResult};
use crate::model::Model;
use serde::{Deserialize, Serialize};

/// RMSprop hyperparameters used across all stages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RmspropConfig {
    pub alpha: f64,
    pub eps: f64,
    pub weight_decay: f64,
    pub momentum: f64,
}

impl Default for RmspropConfig {
    fn default() -> Self {
        Self { alpha: 0.9, eps: 1e-8, weight_decay: 1e-5, momentum: 0.9 }
    }
}

/// Per-group optimizer state.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GroupState {
    name: String,
    square_avg: Vec<f32>,
    momentum_buf: Vec<f32>,
}

#[derive(Serialize, Deserialize)]
struct OptimizerState {
    groups: Vec<GroupState>,
}

/// RMSprop with momentum, scoped at construction to the model's trainable
/// groups. A new optimizer is built at every stage entry (the trainable
/// set changes); its state blob round-trips through checkpoints for
/// mid-stage resume.
#[derive(Debug, Clone)]
pub struct Rmsprop {
    config: RmspropConfig,
    groups: Vec<GroupState>,
}

impl Rmsprop {
    /// Build state for exactly the groups currently trainable.
    #[must_use]
    pub fn for_trainable(model: &Model, config: RmspropConfig) -> Self {
        let groups = model
            .groups()
            .iter()
            .filter(|g| g.trainable)
            .map(|g| GroupState {
                name: g.name.clone(),
                square_avg: vec![0.0; g.values.len()],
                momentum_buf: vec![0.0; g.values.len()],
            })
            .collect();
        Self { config, groups }
    }

    /// Names of the groups this optimizer covers, in model order.
    #[must_use]
    pub fn group_names(&self) -> Vec<&str> {
        self.groups.iter().map(|g| g.name.as_str()).collect()
    }

    /// Apply one update to the trainable groups with unscaled gradients.
    pub fn step(&mut self, model: &mut Model, lr: f64) -> TrainingResult<()> {
        let RmspropConfig { alpha, eps, weight_decay, momentum } = self.config;
        for state in &mut self.groups {
            let group = model
                .groups_mut()
                .iter_mut()
                .find(|g| g.name == state.name)
                .ok_or_else(|| TrainingError::Model(format!("optimizer group '{}' missing from model", state.name)))?;
            for i in 0..group.values.len() {
                let mut grad = f64::from(group.grads[i]);
                grad += weight_decay * f64::from(group.values[i]);
                let sq = alpha * f64::from(state.square_avg[i]) + (1.0 - alpha) * grad * grad;
                state.square_avg[i] = sq as f32;
                let avg = sq.sqrt() + eps;
                let buf = momentum * f64::from(state.momentum_buf[i]) + grad / avg;
                state.momentum_buf[i] = buf as f32;
                group.values[i] -= (lr * buf) as f32;
            }
        }
        Ok(())
    }

    /// Momentum/state blob for checkpointing.
    pub fn state_bytes(&self) -> TrainingResult<Vec<u8>> {
        Ok(bincode::serialize(&OptimizerState { groups: self.groups.clone() })?)
    }

    /// Restore state saved by an optimizer over the same trainable set.
    pub fn load_state_bytes(&mut self, bytes: &[u8]) -> TrainingResult<()> {
        let state: OptimizerState = bincode::deserialize(bytes)?;
        if state.groups.len() != self.groups.len() {
            return Err(TrainingError::Model(format!(
                "optimizer state has {} groups, expected {}",
                state.groups.len(),
                self.groups.len()
            )));
        }
        for (current, loaded) in self.groups.iter_mut().zip(state.groups) {
            if current.name != loaded.name || current.square_avg.len() != loaded.square_avg.len() {
                return Err(TrainingError::Model(format!(
                    "optimizer state group '{}' does not match '{}'",
                    loaded.name, current.name
                )));
            }
            *current = loaded;
        }
        Ok(())
    }
}

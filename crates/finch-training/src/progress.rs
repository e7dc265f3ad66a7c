use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

/// Observable milestones of a worker's run. The orchestrator emits these;
/// sinks decide what to do with them (log, record in tests, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    StageEntered {
        rank: usize,
        stage: usize,
        trainable_params: usize,
    },
    StepCompleted {
        rank: usize,
        epoch: u64,
        step: u64,
        loss: f32,
        lr: f64,
        applied: bool,
    },
    EpochCompleted {
        rank: usize,
        epoch: u64,
    },
    CheckpointSaved {
        epoch: u64,
        path: PathBuf,
    },
    RunCompleted {
        rank: usize,
    },
}

pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: ProgressEvent);
}

/// Default sink: structured log lines. Per-step lines only come from rank
/// 0 to keep multi-worker output readable.
#[derive(Debug, Default)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::StageEntered { rank, stage, trainable_params } => {
                info!(rank, stage, trainable_params, "entered stage");
            }
            ProgressEvent::StepCompleted { rank, epoch, step, loss, lr, applied } => {
                if rank == 0 {
                    info!(epoch, step, loss, lr, applied, "step");
                }
            }
            ProgressEvent::EpochCompleted { rank, epoch } => {
                info!(rank, epoch, "epoch completed");
            }
            ProgressEvent::CheckpointSaved { epoch, path } => {
                info!(epoch, path = %path.display(), "checkpoint saved");
            }
            ProgressEvent::RunCompleted { rank } => {
                info!(rank, "run completed");
            }
        }
    }
}

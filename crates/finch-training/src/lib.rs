//! Finch Training
//!
//! Single-worker training primitives for staged progressive fine-tuning:
//! - Stage schedules and freeze policies (`schedule`, `freeze`)
//! - Resume planning against a schedule (`resume`)
//! - Exponential learning-rate decay (`lr`)
//! - Loss scaling for reduced-precision arithmetic (`scaler`)
//! - The fixed-order mini-batch step executor (`step`)
//! - Atomic checkpoint persistence (`checkpoint`, `layout`)
//! - Image-folder datasets and per-rank shards (`dataset`)
//!
//! Everything here is per-worker state; cross-worker coordination lives in
//! `finch-distributed` and the driving loop in `finch-orchestrator`.

pub mod checkpoint;
pub mod dataset;
pub mod error;
pub mod freeze;
pub mod layout;
pub mod lr;
pub mod model;
pub mod optimizer;
pub mod progress;
pub mod resume;
pub mod scaler;
pub mod schedule;
pub mod step;

pub use checkpoint::{Checkpoint, CheckpointStore};
pub use dataset::{Batch, DatasetShard, ImageFolderDataset};
pub use error::{TrainingError, TrainingResult};
pub use freeze::FreezeController;
pub use layout::CheckpointLayout;
pub use lr::{base_rate_for, rate_at, LrSchedule, LR_DECAY};
pub use model::{Backbone, Model, ParamGroup, ReferenceBackbone};
pub use optimizer::{Rmsprop, RmspropConfig};
pub use progress::{ProgressEvent, ProgressSink, TracingProgressSink};
pub use resume::{ResumePlan, ResumePlanner};
pub use scaler::GradScaler;
pub use schedule::{FreezePolicy, StageSchedule, TrainingPosition, TrainingStage};
pub use step::{StepOutcome, TrainingStepExecutor};

use crate::OrchestratorResult;
use finch_core::{RunConfig, WorkerContext};
use finch_distributed::Synchronizer;
use finch_training::{
    base_rate_for, Backbone, Checkpoint, CheckpointLayout, CheckpointStore, DatasetShard,
    FreezeController, GradScaler, ImageFolderDataset, LrSchedule, Model, ProgressEvent,
    ProgressSink, ResumePlanner, Rmsprop, RmspropConfig, StageSchedule, TrainingStepExecutor,
};
use std::sync::Arc;
use tracing::{debug, info};

/// A checkpoint is written after every 5th completed absolute epoch.
pub const CHECKPOINT_EVERY_EPOCHS: u64 = 5;

/// Run-level state of one worker's orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Before the resume plan has been applied.
    Initializing,
    /// Driving epochs of one stage.
    Training { stage: usize },
    /// Terminal; every scheduled epoch has run.
    Completed,
}

impl RunState {
    /// Valid transitions: Initializing enters any stage (resume may skip
    /// earlier ones), stages advance monotonically, and only the last
    /// stage completes the run. There is no failure state; errors abort
    /// the worker instead.
    #[must_use]
    pub fn can_transition_to(&self, to: Self) -> bool {
        match (self, to) {
            (Self::Initializing, Self::Training { .. }) => true,
            (Self::Training { stage }, Self::Training { stage: next }) => next == stage + 1,
            (Self::Training { .. }, Self::Completed) => true,
            _ => false,
        }
    }
}

/// Per-worker driver for the staged fine-tuning run.
///
/// Each worker owns one of these, operating on its own model replica and
/// optimizer; replicas stay identical because every worker executes the
/// same schedule over the same seeded shuffles and crosses the same
/// barriers. Only rank 0 writes checkpoints.
pub struct StageOrchestrator {
    ctx: WorkerContext,
    config: RunConfig,
    schedule: StageSchedule,
    shard: DatasetShard,
    store: CheckpointStore,
    model: Model,
    scaler: GradScaler,
    state: RunState,
    backbone: Option<Box<dyn Backbone>>,
    optimizer_config: RmspropConfig,
    sink: Arc<dyn ProgressSink>,
}

impl StageOrchestrator {
    /// Open this worker's view of the dataset and build its replica.
    /// Cheap validation happens here, before any collective operation.
    pub fn new(
        ctx: WorkerContext,
        config: RunConfig,
        schedule: StageSchedule,
        backbone: Box<dyn Backbone>,
        sink: Arc<dyn ProgressSink>,
    ) -> OrchestratorResult<Self> {
        config.validate()?;
        let dataset = ImageFolderDataset::open(&config.split_dir())?;
        let shard = DatasetShard::new(dataset, ctx.rank, ctx.world_size, config.batch_size())?;
        let store = CheckpointStore::new(CheckpointLayout::new(
            &config.runs_root,
            config.tier,
            &config.split,
        ));
        let model = Model::for_tier(config.tier);
        Ok(Self {
            ctx,
            config,
            schedule,
            shard,
            store,
            model,
            scaler: GradScaler::default(),
            state: RunState::Initializing,
            backbone: Some(backbone),
            optimizer_config: RmspropConfig::default(),
            sink,
        })
    }

    #[must_use]
    pub fn state(&self) -> RunState {
        self.state
    }

    fn transition(&mut self, to: RunState) -> OrchestratorResult<()> {
        if !self.state.can_transition_to(to) {
            return Err(finch_training::TrainingError::InvalidSchedule(format!(
                "invalid run state transition {:?} -> {to:?}",
                self.state
            ))
            .into());
        }
        self.state = to;
        Ok(())
    }

    /// Drive the whole run: resume plan, freeze transitions, stage and
    /// epoch loops, checkpoints and barriers. Returns once the schedule
    /// is exhausted or the first fatal error occurs.
    pub async fn run(&mut self, sync: &dyn Synchronizer) -> OrchestratorResult<()> {
        let steps_per_epoch = self.shard.steps_per_epoch();
        let plan = ResumePlanner::new(&self.schedule)
            .plan(self.config.resume_epoch, steps_per_epoch)?;
        info!(
            rank = self.ctx.rank,
            stage = plan.position.stage_ordinal,
            epoch = plan.position.absolute_epoch,
            restore_optimizer = plan.needs_optimizer_restore,
            "resume plan ready"
        );

        // Reconstructing training position starts from a fully frozen
        // model; freeze transitions widen it stage by stage.
        self.model.freeze_all();
        let controller = FreezeController;
        for &ordinal in &plan.completed_stages {
            let stage = self.schedule.stage(ordinal).copied().ok_or_else(|| {
                finch_training::TrainingError::InvalidSchedule(format!("missing stage {ordinal}"))
            })?;
            controller.apply(&mut self.model, &stage)?;
        }

        // Resume state is read exactly once, at startup, by every rank.
        let checkpoint = match self.config.resume_epoch {
            Some(epoch) => Some(self.store.load(epoch)?),
            None => None,
        };

        let first_stage = plan.position.stage_ordinal;
        let stages: Vec<_> = self.schedule.stages()[first_stage..].to_vec();
        for stage in stages {
            let ordinal = stage.ordinal;
            self.transition(RunState::Training { stage: ordinal })?;
            controller.apply(&mut self.model, &stage)?;

            let entering_resumed_stage = ordinal == first_stage;
            if entering_resumed_stage {
                if let Some(cp) = &checkpoint {
                    self.model.load_state_bytes(&cp.model_state)?;
                }
            }

            // A fresh optimizer scoped to the now-current trainable set.
            let mut optimizer = Rmsprop::for_trainable(&self.model, self.optimizer_config);
            if entering_resumed_stage && plan.needs_optimizer_restore {
                if let Some(cp) = &checkpoint {
                    optimizer.load_state_bytes(&cp.optimizer_state)?;
                }
            }

            // The decay curve is anchored at the epoch the optimizer was
            // created, so a mid-stage resume continues it seamlessly.
            let stage_start = self.schedule.stage_start_epoch(ordinal);
            let epoch_position = stage_start.max(self.config.resume_epoch.unwrap_or(0));
            let lr = LrSchedule::new(
                base_rate_for(self.ctx.world_size, self.config.batch_size()),
                epoch_position,
                steps_per_epoch,
            );
            let backbone = self.backbone.take().ok_or_else(|| {
                finch_training::TrainingError::Model("backbone already in use".to_string())
            })?;
            let mut executor = TrainingStepExecutor::new(backbone, optimizer, lr);

            self.sink.on_event(ProgressEvent::StageEntered {
                rank: self.ctx.rank,
                stage: ordinal,
                trainable_params: self.model.trainable_param_count(),
            });

            // One pre-training checkpoint on fresh runs, for sanity
            // checking the untouched pretrained weights.
            if ordinal == 0 && self.config.resume_epoch.is_none() && self.ctx.is_chief() {
                let path = self.store.save(&Checkpoint {
                    epoch: 0,
                    model_state: self.model.state_bytes()?,
                    optimizer_state: executor.optimizer().state_bytes()?,
                })?;
                self.sink.on_event(ProgressEvent::CheckpointSaved { epoch: 0, path });
            }
            // All ranks agree on the stage entry state before stepping.
            sync.barrier().await?;

            let start_epoch = if entering_resumed_stage { plan.position.epoch_within_stage } else { 0 };
            for epoch_in_stage in start_epoch..stage.epoch_count {
                let absolute_epoch = stage_start + epoch_in_stage;
                self.run_epoch(&mut executor, absolute_epoch).await?;
                self.sink.on_event(ProgressEvent::EpochCompleted {
                    rank: self.ctx.rank,
                    epoch: absolute_epoch,
                });
                // No worker begins the next epoch until every worker has
                // finished this one.
                sync.barrier().await?;

                let completed = absolute_epoch + 1;
                if completed % CHECKPOINT_EVERY_EPOCHS == 0 {
                    if self.ctx.is_chief() {
                        let path = self.store.save(&Checkpoint {
                            epoch: completed,
                            model_state: self.model.state_bytes()?,
                            optimizer_state: executor.optimizer().state_bytes()?,
                        })?;
                        self.sink.on_event(ProgressEvent::CheckpointSaved { epoch: completed, path });
                    }
                    // Nobody continues until the checkpointed state is
                    // durable on rank 0.
                    sync.barrier().await?;
                }
            }

            self.backbone = Some(executor.into_backbone());
        }

        self.transition(RunState::Completed)?;
        self.sink.on_event(ProgressEvent::RunCompleted { rank: self.ctx.rank });
        Ok(())
    }

    async fn run_epoch(
        &mut self,
        executor: &mut TrainingStepExecutor,
        absolute_epoch: u64,
    ) -> OrchestratorResult<()> {
        debug!(rank = self.ctx.rank, epoch = absolute_epoch, "epoch start");
        for (step, batch) in self.shard.epoch_batches(absolute_epoch).iter().enumerate() {
            let outcome = executor.step(&mut self.model, &mut self.scaler, batch)?;
            self.sink.on_event(ProgressEvent::StepCompleted {
                rank: self.ctx.rank,
                epoch: absolute_epoch,
                step: step as u64,
                loss: outcome.loss,
                lr: outcome.lr,
                applied: outcome.applied,
            });
        }
        Ok(())
    }
}

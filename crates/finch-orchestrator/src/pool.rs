use crate::orchestrator::StageOrchestrator;
use crate::{OrchestratorError, OrchestratorResult};
use finch_core::{RunConfig, WorkerContext};
use finch_distributed::{LocalSynchronizer, Synchronizer, TcpSynchronizer};
use finch_training::{Backbone, ProgressSink, ResumePlanner, StageSchedule};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// How workers form their process group.
#[derive(Debug, Clone, Copy)]
pub enum SyncMode {
    /// In-process barrier; no network. Used by tests and dry runs.
    Local,
    /// Localhost TCP rendezvous on the configured port, with a bounded
    /// startup wait.
    Tcp { rendezvous_timeout: Duration },
}

/// Launches a fixed pool of `world_size` workers, one per compute device,
/// alive for the whole run. There is no dynamic spawning or retiring, and
/// no cancellation: a run stops by process termination and resumes later
/// from its last checkpoint.
pub struct WorkerPool;

impl WorkerPool {
    /// Validate the cheap-to-check startup errors, then launch all
    /// workers and wait for them. The first worker error aborts the run.
    pub async fn launch<F>(
        config: RunConfig,
        schedule: StageSchedule,
        mode: SyncMode,
        sink: Arc<dyn ProgressSink>,
        backbone_factory: F,
    ) -> OrchestratorResult<()>
    where
        F: Fn(&WorkerContext) -> Box<dyn Backbone>,
    {
        config.validate()?;
        // Surface ScheduleExhausted before any worker begins; the step
        // count is irrelevant to exhaustion.
        ResumePlanner::new(&schedule).plan(config.resume_epoch, 1)?;

        info!(
            world_size = config.world_size,
            tier = %config.tier,
            split = %config.split,
            resume = ?config.resume_epoch,
            "launching worker pool"
        );

        let mut local_group = match mode {
            SyncMode::Local => LocalSynchronizer::group(config.world_size),
            SyncMode::Tcp { .. } => Vec::new(),
        };

        let mut handles = Vec::with_capacity(config.world_size);
        for rank in 0..config.world_size {
            let ctx = WorkerContext::new(rank, config.world_size);
            let mut orchestrator = StageOrchestrator::new(
                ctx,
                config.clone(),
                schedule.clone(),
                backbone_factory(&ctx),
                Arc::clone(&sink),
            )?;
            let local_sync = match mode {
                SyncMode::Local => Some(local_group.remove(0)),
                SyncMode::Tcp { .. } => None,
            };
            let port = config.port;
            let handle = tokio::spawn(async move {
                let sync: Box<dyn Synchronizer> = match (mode, local_sync) {
                    (SyncMode::Local, Some(sync)) => Box::new(sync),
                    (SyncMode::Tcp { rendezvous_timeout }, _) => Box::new(
                        TcpSynchronizer::rendezvous(
                            ctx.rank,
                            ctx.world_size,
                            port,
                            rendezvous_timeout,
                        )
                        .await?,
                    ),
                    (SyncMode::Local, None) => unreachable!("local group handles out"),
                };
                orchestrator.run(sync.as_ref()).await
            });
            handles.push((rank, handle));
        }

        let mut first_error: Option<OrchestratorError> = None;
        for (rank, handle) in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(rank, error = %e, "worker failed");
                    first_error.get_or_insert(e);
                }
                Err(_) => {
                    error!(rank, "worker panicked");
                    first_error.get_or_insert(OrchestratorError::WorkerPanicked { rank });
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

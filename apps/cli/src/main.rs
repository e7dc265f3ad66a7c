//! Finch CLI - staged progressive fine-tuning driver
//!
//! Launches a fixed pool of workers, one per compute device, that
//! fine-tune the species classifier through the staged freeze schedule,
//! checkpointing every five epochs and resuming from any checkpointed
//! epoch.

use anyhow::Context;
use clap::Parser;
use finch_core::{ModelTier, RunConfig, WorkerContext};
use finch_orchestrator::{SyncMode, WorkerPool};
use finch_training::{Backbone, ReferenceBackbone, StageSchedule, TracingProgressSink};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Finch - staged distributed fine-tuning for the species classifier
#[derive(Parser, Debug)]
#[command(
    name = "finch",
    author,
    version,
    about = "Staged progressive fine-tuning with checkpoint/resume",
    long_about = "Fine-tunes the pretrained species classifier in freeze stages across a \
                  fixed pool of workers, persisting checkpoints so multi-day runs can be \
                  interrupted and resumed without losing training position."
)]
struct Args {
    /// Model size tier (s, m, l); selects batch size and input resolution
    #[arg(short, long, default_value = "s")]
    tier: String,

    /// Dataset split to train on (subdirectory of the dataset root)
    #[arg(short, long)]
    split: String,

    /// Absolute epoch to resume from, or "none" for a fresh run
    #[arg(short, long, default_value = "none")]
    resume: String,

    /// Localhost port for the worker rendezvous
    #[arg(short, long, default_value_t = 29_500)]
    port: u16,

    /// Number of workers to launch, one per device
    #[arg(short, long, default_value_t = 4)]
    world_size: usize,

    /// Root directory of class-per-directory image splits
    #[arg(long, default_value = "dataset")]
    dataset_root: PathBuf,

    /// Root directory for checkpoint run directories
    #[arg(long, default_value = ".")]
    runs_root: PathBuf,

    /// Comma-separated epochs per stage: classifier stage first, full
    /// fine-tune last, one unfrozen block per middle entry
    #[arg(long, default_value = "5,495")]
    epochs: String,

    /// Seconds to wait for all workers to join the process group
    #[arg(long, default_value_t = 60)]
    rendezvous_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn backbone_for(_ctx: &WorkerContext) -> Box<dyn Backbone> {
    // The numeric kernels live behind this seam; the reference backbone
    // stands in until a device-backed implementation is wired up.
    Box::new(ReferenceBackbone)
}

fn parse_resume(raw: &str) -> anyhow::Result<Option<u64>> {
    if raw.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    raw.parse::<u64>()
        .map(Some)
        .with_context(|| format!("invalid resume epoch '{raw}' (expected an integer or \"none\")"))
}

fn parse_epochs(raw: &str) -> anyhow::Result<Vec<u64>> {
    raw.split(',')
        .map(|part| {
            part.trim()
                .parse::<u64>()
                .with_context(|| format!("invalid stage epoch count '{part}'"))
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber =
        FmtSubscriber::builder().with_max_level(level).without_time().with_target(false).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let tier: ModelTier = args.tier.parse()?;
    let config = RunConfig {
        tier,
        split: args.split,
        resume_epoch: parse_resume(&args.resume)?,
        port: args.port,
        world_size: args.world_size,
        dataset_root: args.dataset_root,
        runs_root: args.runs_root,
    };
    let schedule = StageSchedule::from_epoch_counts(&parse_epochs(&args.epochs)?)?;

    WorkerPool::launch(
        config,
        schedule,
        SyncMode::Tcp { rendezvous_timeout: Duration::from_secs(args.rendezvous_timeout) },
        Arc::new(TracingProgressSink),
        backbone_for,
    )
    .await
    .context("fine-tuning run failed")?;

    Ok(())
}

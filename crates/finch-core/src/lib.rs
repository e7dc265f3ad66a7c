//! Finch Core
//!
//! Shared value types for the fine-tuning system:
//! - Immutable run configuration (`RunConfig`) and the model tier table
//! - Per-process worker identity (`WorkerContext`)
//!
//! Nothing here reads ambient process state; configuration is built once
//! at startup and passed by reference everywhere else.

pub mod config;
pub mod worker;

pub use config::{ConfigError, ModelTier, RunConfig, NUM_CLASSES};
pub use worker::WorkerContext;

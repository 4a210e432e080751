//! audiorelay - Resumable bulk audio acquisition with relay to remote storage.
//!
//! ## Architecture
//!
//! Each identifier becomes one job that flows through three stages:
//! - **Filter** (optional): skip identifiers the music catalog already has
//! - **Fetch**: run the acquisition tool and locate the produced artifact
//! - **Relay**: push the artifact to the remote destination, then delete it
//!
//! ## Pipelines
//!
//! - **Pull**: sorted, sliced identifier list, run sequentially or on a
//!   bounded pool, resumable through a checkpoint file and guarded by a
//!   consecutive-failure circuit breaker
//! - **Watch**: relay every new artifact that appears in a directory,
//!   whoever created it

pub mod checkpoint;
pub mod client;
pub mod models;
pub mod pipeline;
pub mod pool;

#[cfg(test)]
mod testing;

// Re-exports for convenience
pub use checkpoint::CheckpointStore;
pub use client::{
    AcquisitionWorker, AvailabilityFilter, InnerTubeClient, Rsync, TransferSink, YtDlp,
};
pub use models::{Config, Identifier, JobOutcome, RelayError, Result, RunStats};
pub use pipeline::{CreationEvents, PipelineOptions, PullPipeline, WatchPipeline};
pub use pool::{CircuitBreaker, JobRunner};

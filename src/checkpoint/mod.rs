//! Checkpoint module for resumable pipeline execution.
//!
//! Provides:
//! - `CheckpointStore`: the durable set of relayed identifiers

mod store;

pub use store::*;

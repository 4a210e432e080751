//! Core data models for audiorelay.

mod config;
mod error;
mod job;

pub use config::*;
pub use error::*;
pub use job::*;

//! Client module - the external tools and services the pipeline drives.

pub mod process;

mod acquire;
mod catalog;
mod transfer;

pub use acquire::*;
pub use catalog::*;
pub use transfer::*;

//! Pool module - per-job runner and the failure circuit breaker.

mod breaker;
mod worker;

pub use breaker::*;
pub use worker::*;

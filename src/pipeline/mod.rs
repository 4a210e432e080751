//! Pipeline module - identifier source, pull-mode driver and watch-triggered relay.

mod driver;
mod source;
mod watch;

pub use driver::*;
pub use source::*;
pub use watch::*;

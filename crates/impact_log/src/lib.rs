//! Logging facade.

#[macro_use]
mod macros;

pub use log::{Level, debug, error, info, log, log_enabled, trace, warn};

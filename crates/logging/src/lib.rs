//! Logging for Model API
//!
//! This crate installs the process-wide tracing subscriber that receives the
//! pipeline's informational and warning diagnostics.

pub mod logger;

// Re-export commonly used types
pub use logger::{init_logging, LogFormat, LogGuard, LogSettings};

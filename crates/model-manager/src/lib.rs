//! Model description management for Model API
//!
//! This crate reads model descriptions (tensor names, shapes, declared layouts,
//! runtime metadata and the compute graph) and reports what a model looks like.

pub mod description;
pub mod loader;
pub mod metadata;

// Re-export commonly used types
pub use description::{GraphNode, GraphOp, ModelDescription};
pub use loader::{ModelReader, ModelSource, StaticModelSource};
pub use metadata::log_basic_model_info;

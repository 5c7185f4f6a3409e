//! Configuration management for Model API
//!
//! This crate provides the immutable pipeline configuration, the parser for
//! per-input layout overrides, and the file/environment configuration sources.

pub mod defaults;
pub mod layout_map;
pub mod manager;
pub mod settings;

// Re-export commonly used types
pub use layout_map::LayoutMap;
pub use manager::ConfigManager;
pub use settings::{PipelineConfig, ResizeType};

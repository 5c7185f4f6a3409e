//! Common utilities and types for Model API
//! 
//! This crate provides shared functionality used across the inference pipeline,
//! including the error taxonomy, tensor descriptors, layouts and utility functions.

pub mod error;
pub mod tensor;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use error::{Error, Result};
pub use tensor::{Tensor, TensorMap};
pub use types::*;

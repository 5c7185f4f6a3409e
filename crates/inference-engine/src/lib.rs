//! Model execution for Model API
//!
//! This crate defines the contract every execution backend satisfies and ships
//! the built-in reference backend used when the caller supplies none.

pub mod adapter;
pub mod backends;

// Re-export commonly used types
pub use adapter::{default_adapter, ConcurrencyContract, ExecutionAdapter, ExecutionContext};
pub use backends::ReferenceAdapter;

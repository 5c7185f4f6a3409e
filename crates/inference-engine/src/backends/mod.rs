//! Built-in execution backends

mod ops;
pub mod reference;

pub use reference::ReferenceAdapter;

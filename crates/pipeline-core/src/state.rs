//! State management for the pipeline
//!
//! This module tracks whether a pipeline has an execution adapter bound.

use std::fmt;
use serde::{Serialize, Deserialize};

/// Binding state of an inference pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineState {
    /// No adapter bound; `infer` is not allowed
    Unloaded,

    /// An adapter is bound and holds the compiled model
    Loaded {
        /// Name of the bound adapter
        adapter: String,
    },
}

impl PipelineState {
    /// Creates the initial state
    pub fn new() -> Self {
        PipelineState::Unloaded
    }

    /// Returns true if an adapter is bound
    pub fn is_loaded(&self) -> bool {
        matches!(self, PipelineState::Loaded { .. })
    }

    /// Name of the bound adapter
    pub fn adapter_name(&self) -> Option<&str> {
        match self {
            PipelineState::Loaded { adapter } => Some(adapter),
            PipelineState::Unloaded => None,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Unloaded => write!(f, "Unloaded"),
            PipelineState::Loaded { adapter } => write!(f, "Loaded ({})", adapter),
        }
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_methods() {
        let unloaded = PipelineState::Unloaded;
        assert!(!unloaded.is_loaded());
        assert_eq!(unloaded.adapter_name(), None);

        let loaded = PipelineState::Loaded { adapter: "reference".to_string() };
        assert!(loaded.is_loaded());
        assert_eq!(loaded.adapter_name(), Some("reference"));
    }

    #[test]
    fn test_display() {
        assert_eq!(PipelineState::Unloaded.to_string(), "Unloaded");
        assert_eq!(
            PipelineState::Loaded { adapter: "remote".to_string() }.to_string(),
            "Loaded (remote)"
        );
    }

    #[test]
    fn test_default() {
        assert_eq!(PipelineState::default(), PipelineState::Unloaded);
    }
}

//! Execution adapter contract
//!
//! An execution adapter compiles a model description for a device and runs
//! synchronous inference on named tensors. The pipeline controller only ever
//! talks to this trait; which backend sits behind it is the caller's choice.

use std::collections::BTreeMap;

use common::error::{Error, Result};
use common::TensorMap;
use model_manager::ModelDescription;

use crate::backends::ReferenceAdapter;

/// Device hint that lets the backend pick a device
pub const AUTO_DEVICE: &str = "AUTO";

/// Whether an adapter tolerates concurrent `infer` calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConcurrencyContract {
    /// Calls must not overlap; the caller serializes them
    #[default]
    Serialized,
    /// Calls may run concurrently on the same adapter
    Concurrent,
}

/// Backend-wide state shared by the adapters created from it
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Devices the backend can compile for, in preference order
    devices: Vec<String>,
}

impl ExecutionContext {
    /// Creates a context exposing the given devices
    pub fn new<I, S>(devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            devices: devices.into_iter().map(|d| d.into().to_ascii_uppercase()).collect(),
        }
    }

    /// Devices available to adapters
    pub fn devices(&self) -> &[String] {
        &self.devices
    }

    /// Maps a device hint onto an available device.
    ///
    /// `AUTO` selects the first available device; any other hint must name one.
    pub fn resolve_device(&self, hint: &str) -> Result<String> {
        let hint = hint.trim().to_ascii_uppercase();
        if hint == AUTO_DEVICE {
            return self
                .devices
                .first()
                .cloned()
                .ok_or_else(|| Error::ModelLoad("No execution device available".to_string()));
        }
        if self.devices.iter().any(|d| *d == hint) {
            Ok(hint)
        } else {
            Err(Error::ModelLoad(format!(
                "Device '{}' is not available (available: {})",
                hint,
                self.devices.join(", ")
            )))
        }
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new(["CPU"])
    }
}

/// Loads a compiled model onto a backend and runs inference on it.
///
/// `load_model` may be called again to replace the compiled model; the previous
/// one is released. `infer` fails with [`Error::Execution`], carrying the
/// backend's diagnostic text, when the tensor map does not fit the model.
pub trait ExecutionAdapter: Send + Sync {
    /// Short backend name for diagnostics
    fn name(&self) -> &str;

    /// Compiles `model` for the device selected by `device` within `context`.
    ///
    /// `options` are backend-specific and passed through uninterpreted.
    fn load_model(
        &mut self,
        model: &ModelDescription,
        context: &ExecutionContext,
        device: &str,
        options: &BTreeMap<String, String>,
    ) -> Result<()>;

    /// Runs synchronous inference
    fn infer(&self, inputs: TensorMap) -> Result<TensorMap>;

    /// Concurrency guarantee of `infer`
    fn concurrency(&self) -> ConcurrencyContract {
        ConcurrencyContract::Serialized
    }
}

/// Adapter bound when the caller supplies none
pub fn default_adapter() -> Box<dyn ExecutionAdapter> {
    Box::new(ReferenceAdapter::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_device() {
        let context = ExecutionContext::new(["cpu", "gpu"]);
        assert_eq!(context.resolve_device("auto").unwrap(), "CPU");
        assert_eq!(context.resolve_device("GPU").unwrap(), "GPU");
        assert!(context.resolve_device("NPU").unwrap_err().is_model_load());

        let empty = ExecutionContext::new(Vec::<String>::new());
        assert!(empty.resolve_device("AUTO").is_err());
    }

    #[test]
    fn test_default_adapter() {
        let adapter = default_adapter();
        assert_eq!(adapter.name(), "reference");
        assert_eq!(adapter.concurrency(), ConcurrencyContract::Concurrent);
    }
}

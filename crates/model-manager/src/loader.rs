//! Model description loader
//!
//! This module reads model descriptions from disk and checks that they are
//! structurally usable before any backend sees them.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use common::error::{Error, Result};

use crate::description::ModelDescription;

/// Source of model descriptions
pub trait ModelSource: Send + Sync {
    /// Returns the description of the model at `path`.
    ///
    /// Fails with [`Error::ModelLoad`] when the model is missing or corrupt.
    fn read_model(&self, path: &Path) -> Result<ModelDescription>;
}

/// Reads model descriptions from JSON, YAML or TOML files
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelReader;

impl ModelReader {
    /// Creates a new model reader
    pub fn new() -> Self {
        Self
    }

    /// Reads and validates a model description
    pub fn read(&self, path: &Path) -> Result<ModelDescription> {
        info!("Reading model {:?}", path);

        let text = fs::read_to_string(path)
            .map_err(|e| Error::ModelLoad(format!("Cannot read model {:?}: {}", path, e)))?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        let mut description: ModelDescription = match extension.as_str() {
            "json" => serde_json::from_str(&text)
                .map_err(|e| Error::ModelLoad(format!("Corrupt model {:?}: {}", path, e)))?,
            "yaml" | "yml" => serde_yaml::from_str(&text)
                .map_err(|e| Error::ModelLoad(format!("Corrupt model {:?}: {}", path, e)))?,
            "toml" => toml::from_str(&text)
                .map_err(|e| Error::ModelLoad(format!("Corrupt model {:?}: {}", path, e)))?,
            other => {
                return Err(Error::ModelLoad(format!(
                    "Unsupported model format '{}' for {:?}",
                    other, path
                )))
            }
        };

        if description.name.is_empty() {
            description.name = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();
        }

        validate_structure(&description)?;

        debug!(
            "Model {} has {} inputs, {} outputs, {} graph nodes",
            description.name,
            description.inputs.len(),
            description.outputs.len(),
            description.graph.len()
        );

        Ok(description)
    }
}

impl ModelSource for ModelReader {
    fn read_model(&self, path: &Path) -> Result<ModelDescription> {
        self.read(path)
    }
}

/// Serves one in-memory description regardless of the requested path
#[derive(Debug, Clone)]
pub struct StaticModelSource {
    description: ModelDescription,
}

impl StaticModelSource {
    pub fn new(description: ModelDescription) -> Self {
        Self { description }
    }
}

impl ModelSource for StaticModelSource {
    fn read_model(&self, _path: &Path) -> Result<ModelDescription> {
        validate_structure(&self.description)?;
        Ok(self.description.clone())
    }
}

/// Checks tensor names and declared layouts of a description
pub fn validate_structure(description: &ModelDescription) -> Result<()> {
    if description.inputs.is_empty() {
        return Err(Error::ModelLoad(format!("Model '{}' has no inputs", description.name)));
    }
    if description.outputs.is_empty() {
        return Err(Error::ModelLoad(format!("Model '{}' has no outputs", description.name)));
    }

    let mut seen = HashSet::new();
    for tensor in description.inputs.iter().chain(description.outputs.iter()) {
        if tensor.name.is_empty() {
            return Err(Error::ModelLoad(format!(
                "Model '{}' has an unnamed tensor",
                description.name
            )));
        }
        if !seen.insert(tensor.name.as_str()) {
            return Err(Error::ModelLoad(format!(
                "Tensor name '{}' is used more than once in model '{}'",
                tensor.name, description.name
            )));
        }
        if let Some(layout) = tensor.declared_layout() {
            if layout.rank() != tensor.rank() {
                return Err(Error::ModelLoad(format!(
                    "Tensor '{}' declares layout {} for a rank-{} shape",
                    tensor.name,
                    layout,
                    tensor.rank()
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Layout, TensorDescriptor};

    fn write(dir: &tempfile::TempDir, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_read_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "resnet.json",
            r#"{
                "inputs": [{"name": "data", "shape": [1, 3, 4, 4], "layout": "NCHW"}],
                "outputs": [{"name": "prob", "shape": [1, 10]}],
                "model_info": {"model_type": "classification"},
                "graph": [{"input": "data", "output": "prob", "op": {"type": "identity"}}]
            }"#,
        );

        let description = ModelReader::new().read(&path).unwrap();
        assert_eq!(description.name, "resnet");
        assert_eq!(description.inputs[0].declared_layout(), Some(&Layout::nchw()));
        assert_eq!(description.model_type(), Some("classification"));
        assert_eq!(description.graph.len(), 1);
    }

    #[test]
    fn test_read_yaml_and_toml() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = write(
            &dir,
            "net.yaml",
            "name: net\ninputs:\n  - name: x\n    shape: [1, 4]\noutputs:\n  - name: y\n    shape: [1, 4]\n",
        );
        assert_eq!(ModelReader::new().read(&yaml).unwrap().inputs[0].shape, vec![1, 4]);

        let toml = write(
            &dir,
            "net.toml",
            "[[inputs]]\nname = \"x\"\nshape = [1, 4]\n\n[[outputs]]\nname = \"y\"\nshape = [1, 4]\n\n[[graph]]\ninput = \"x\"\noutput = \"y\"\nop = { type = \"sigmoid\" }\n",
        );
        let description = ModelReader::new().read(&toml).unwrap();
        assert_eq!(description.output_names(), vec!["y"]);
    }

    #[test]
    fn test_missing_and_corrupt_files_are_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let reader = ModelReader::new();

        assert!(reader.read(&dir.path().join("absent.json")).unwrap_err().is_model_load());

        let corrupt = write(&dir, "bad.json", "{ not json");
        assert!(reader.read(&corrupt).unwrap_err().is_model_load());

        let unknown = write(&dir, "model.bin", "\u{0}\u{1}");
        assert!(reader.read(&unknown).unwrap_err().is_model_load());
    }

    #[test]
    fn test_structural_validation() {
        let no_outputs = ModelDescription::new("m", vec![TensorDescriptor::new("x", vec![1])], vec![]);
        assert!(validate_structure(&no_outputs).unwrap_err().is_model_load());

        let duplicate = ModelDescription::new(
            "m",
            vec![TensorDescriptor::new("x", vec![1])],
            vec![TensorDescriptor::new("x", vec![1])],
        );
        assert!(validate_structure(&duplicate).is_err());

        let bad_layout = ModelDescription::new(
            "m",
            vec![TensorDescriptor::new("x", vec![1, 3]).with_layout(Layout::nchw())],
            vec![TensorDescriptor::new("y", vec![1])],
        );
        assert!(validate_structure(&bad_layout).is_err());
    }

    #[test]
    fn test_static_source() {
        let description = ModelDescription::new(
            "m",
            vec![TensorDescriptor::new("x", vec![1, 2])],
            vec![TensorDescriptor::new("y", vec![1, 2])],
        );
        let source = StaticModelSource::new(description.clone());
        assert_eq!(source.read_model(Path::new("ignored")).unwrap(), description);
    }
}

//! Model family hooks
//!
//! A model family knows what a model's inputs and outputs mean. The controller
//! calls its hooks at fixed points: once while loading, to inspect and annotate
//! the model description, and twice per `infer` call, to build the input tensors
//! and to interpret the outputs.

use common::error::{Error, Result};
use common::TensorMap;
use model_config::PipelineConfig;
use model_manager::ModelDescription;

use crate::families::{
    ClassificationFamily, DetectionFamily, InstanceSegmentationFamily, RawFamily,
    SegmentationFamily,
};
use crate::input::InputData;
use crate::layout::LayoutResolver;
use crate::result::{InternalModelData, ResultEnvelope, ResultKind};

/// Extension points implemented per model family
pub trait ModelFamily: Send + Sync {
    /// Family name, as accepted by [`create_family`]
    fn name(&self) -> &str;

    /// Inspects the model before compilation.
    ///
    /// May rewrite input and output descriptors, e.g. to declare the layouts the
    /// family will feed. Fails with [`Error::ModelLoad`] when the model does not
    /// fit the family.
    fn prepare_inputs_outputs(
        &mut self,
        model: &mut ModelDescription,
        layouts: &LayoutResolver,
    ) -> Result<()>;

    /// Builds a tensor for every model input, plus the context postprocessing needs
    fn preprocess(&self, input: &InputData) -> Result<(TensorMap, InternalModelData)>;

    /// Interprets the outputs of one call
    fn postprocess(&self, envelope: &ResultEnvelope) -> Result<ResultKind>;
}

/// Family names accepted by [`create_family`]
pub const FAMILY_NAMES: &[&str] = &[
    "raw",
    "classification",
    "detection",
    "segmentation",
    "instance_segmentation",
];

/// Creates the family registered under `name`
pub fn create_family(name: &str, config: &PipelineConfig) -> Result<Box<dyn ModelFamily>> {
    let family: Box<dyn ModelFamily> = match name.trim().to_ascii_lowercase().as_str() {
        "raw" => Box::new(RawFamily::new()),
        "classification" => Box::new(ClassificationFamily::new(config)?),
        "detection" | "ssd" => Box::new(DetectionFamily::new(config)?),
        "segmentation" => Box::new(SegmentationFamily::new(config)),
        "instance_segmentation" | "maskrcnn" => Box::new(InstanceSegmentationFamily::new(config)?),
        other => {
            return Err(Error::Configuration(format!(
                "Unknown model type '{}' (expected one of: {})",
                other,
                FAMILY_NAMES.join(", ")
            )))
        }
    };
    Ok(family)
}

/// Label of a class id, `#id` when unknown
pub(crate) fn label_name(labels: &[String], id: usize) -> String {
    labels.get(id).cloned().unwrap_or_else(|| format!("#{}", id))
}

/// Labels from the configuration, falling back to the model's own
pub(crate) fn fill_labels(labels: &mut Vec<String>, model: &ModelDescription) {
    if labels.is_empty() {
        *labels = model.labels();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_family() {
        let config = PipelineConfig::default();
        assert_eq!(create_family("raw", &config).unwrap().name(), "raw");
        assert_eq!(create_family("SSD", &config).unwrap().name(), "detection");
        assert_eq!(
            create_family("MaskRCNN", &config).unwrap().name(),
            "instance_segmentation"
        );

        let err = create_family("yolo", &config).err().unwrap();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("yolo"));
    }

    #[test]
    fn test_label_name() {
        let labels = vec!["cat".to_string(), "dog".to_string()];
        assert_eq!(label_name(&labels, 1), "dog");
        assert_eq!(label_name(&labels, 7), "#7");
    }
}

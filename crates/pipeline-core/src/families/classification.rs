//! Image classification: one image in, class scores out

use tracing::warn;

use common::error::{Error, Result};
use common::tensor::{describe_shape, require_output};
use common::TensorMap;
use model_config::PipelineConfig;
use model_manager::ModelDescription;

use crate::families::preprocessing::{ImageInput, ImageSettings};
use crate::family::{fill_labels, label_name, ModelFamily};
use crate::input::InputData;
use crate::layout::LayoutResolver;
use crate::result::{
    Classification, ClassificationResult, InternalModelData, ResultEnvelope, ResultKind,
};

/// Reports the `top_k` best scoring classes
#[derive(Debug)]
pub struct ClassificationFamily {
    settings: ImageSettings,
    labels: Vec<String>,
    top_k: usize,
    image: Option<ImageInput>,
    output: String,
}

impl ClassificationFamily {
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        Ok(Self {
            settings: ImageSettings::from_config(config),
            labels: config.resolve_labels()?,
            top_k: config.top_k,
            image: None,
            output: String::new(),
        })
    }

    fn image_input(&self) -> Result<&ImageInput> {
        self.image
            .as_ref()
            .ok_or_else(|| Error::Precondition("Classification model is not prepared".to_string()))
    }
}

impl ModelFamily for ClassificationFamily {
    fn name(&self) -> &str {
        "classification"
    }

    fn prepare_inputs_outputs(
        &mut self,
        model: &mut ModelDescription,
        layouts: &LayoutResolver,
    ) -> Result<()> {
        let (image, others) = ImageInput::prepare(&self.settings, model, layouts)?;
        if !others.is_empty() {
            return Err(Error::ModelLoad(format!(
                "Classification model '{}' has unexpected inputs: {}",
                model.name,
                others.join(", ")
            )));
        }

        let [output] = model.outputs.as_slice() else {
            return Err(Error::ModelLoad(format!(
                "Classification model '{}' must have exactly one output, found {}",
                model.name,
                model.outputs.len()
            )));
        };

        // Scores may come as [N, C] or [N, C, 1, 1].
        let classes = match output.shape.as_slice() {
            [_, classes] => *classes,
            [_, classes, 1, 1] => *classes,
            other => {
                return Err(Error::ModelLoad(format!(
                    "Classification output '{}' has unsupported shape {}",
                    output.name,
                    describe_shape(other)
                )))
            }
        };

        if self.top_k > classes {
            return Err(Error::Configuration(format!(
                "top_k is {} but the model has only {} classes",
                self.top_k, classes
            )));
        }

        fill_labels(&mut self.labels, model);
        if !self.labels.is_empty() && self.labels.len() != classes {
            warn!(
                "Model '{}' has {} classes but {} labels are configured",
                model.name,
                classes,
                self.labels.len()
            );
        }

        self.output = output.name.clone();
        self.image = Some(image);
        Ok(())
    }

    fn preprocess(&self, input: &InputData) -> Result<(TensorMap, InternalModelData)> {
        let image_input = self.image_input()?;
        let (tensor, geometry) = image_input.preprocess(image_input.image(input)?)?;
        let mut inputs = TensorMap::new();
        inputs.insert(image_input.name().to_string(), tensor);
        Ok((inputs, InternalModelData::Image(geometry)))
    }

    fn postprocess(&self, envelope: &ResultEnvelope) -> Result<ResultKind> {
        let scores = require_output(&envelope.outputs, &self.output)?;
        let mut ranked: Vec<(usize, f32)> = scores.iter().copied().enumerate().collect();
        if ranked.len() < self.top_k {
            return Err(Error::Postprocess(format!(
                "Output '{}' has {} scores, fewer than top_k {}",
                self.output,
                ranked.len(),
                self.top_k
            )));
        }
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        let top_labels = ranked
            .into_iter()
            .take(self.top_k)
            .map(|(id, score)| Classification {
                id,
                label: label_name(&self.labels, id),
                score,
            })
            .collect();
        Ok(ResultKind::Classification(ClassificationResult { top_labels }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::tensor::tensor_from_vec;
    use common::TensorDescriptor;

    fn model() -> ModelDescription {
        ModelDescription::new(
            "net",
            vec![TensorDescriptor::new("data", vec![1, 3, 2, 2])],
            vec![TensorDescriptor::new("prob", vec![1, 4])],
        )
        .with_info("labels", "zero one two three")
    }

    fn prepared(config: &PipelineConfig) -> ClassificationFamily {
        let mut family = ClassificationFamily::new(config).unwrap();
        family
            .prepare_inputs_outputs(&mut model(), &LayoutResolver::new(None))
            .unwrap();
        family
    }

    #[test]
    fn test_top_k_uses_model_labels() {
        let config = PipelineConfig { top_k: 2, ..PipelineConfig::default() };
        let family = prepared(&config);

        let mut outputs = TensorMap::new();
        outputs.insert("prob".to_string(), tensor_from_vec(&[1, 4], vec![0.1, 0.6, 0.05, 0.25]).unwrap());
        let kind = family.postprocess(&ResultEnvelope::new(outputs, InternalModelData::None)).unwrap();

        let ResultKind::Classification(result) = kind else {
            panic!("expected classification");
        };
        assert_eq!(result.top_labels.len(), 2);
        assert_eq!(result.top_labels[0].label, "one");
        assert_eq!(result.top_labels[1].id, 3);
    }

    #[test]
    fn test_top_k_larger_than_classes() {
        let config = PipelineConfig { top_k: 5, ..PipelineConfig::default() };
        let mut family = ClassificationFamily::new(&config).unwrap();
        let err = family
            .prepare_inputs_outputs(&mut model(), &LayoutResolver::new(None))
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_missing_output_is_postprocess_error() {
        let family = prepared(&PipelineConfig::default());
        let err = family.postprocess(&ResultEnvelope::default()).unwrap_err();
        assert!(err.is_postprocess());
    }

    #[test]
    fn test_preprocess_requires_image() {
        let family = prepared(&PipelineConfig::default());
        assert!(family.preprocess(&InputData::Tensors(TensorMap::new())).is_err());
    }
}

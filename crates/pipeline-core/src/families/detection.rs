//! SSD-style object detection
//!
//! The single output holds rows of `(image_id, label, confidence, x_min, y_min,
//! x_max, y_max)` with coordinates relative to the model input. A negative
//! image id ends the list.

use common::error::{Error, Result};
use common::tensor::{describe_shape, require_output};
use common::{TensorDescriptor, TensorMap};
use model_config::PipelineConfig;
use model_manager::ModelDescription;

use crate::families::preprocessing::{image_info_tensor, ImageInput, ImageSettings};
use crate::family::{fill_labels, label_name, ModelFamily};
use crate::input::InputData;
use crate::layout::LayoutResolver;
use crate::result::{
    DetectedObject, DetectionResult, InternalModelData, ResultEnvelope, ResultKind,
};

const DETECTION_ROW: usize = 7;

/// Detections above a confidence threshold, in original image coordinates
#[derive(Debug)]
pub struct DetectionFamily {
    settings: ImageSettings,
    labels: Vec<String>,
    confidence_threshold: f32,
    image: Option<ImageInput>,
    image_info: Option<TensorDescriptor>,
    output: String,
}

impl DetectionFamily {
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        Ok(Self {
            settings: ImageSettings::from_config(config),
            labels: config.resolve_labels()?,
            confidence_threshold: config.confidence_threshold,
            image: None,
            image_info: None,
            output: String::new(),
        })
    }
}

impl ModelFamily for DetectionFamily {
    fn name(&self) -> &str {
        "detection"
    }

    fn prepare_inputs_outputs(
        &mut self,
        model: &mut ModelDescription,
        layouts: &LayoutResolver,
    ) -> Result<()> {
        let (image, others) = ImageInput::prepare(&self.settings, model, layouts)?;
        self.image_info = match others.as_slice() {
            [] => None,
            [info] => model.input(info).cloned(),
            _ => {
                return Err(Error::ModelLoad(format!(
                    "Detection model '{}' has unexpected inputs: {}",
                    model.name,
                    others.join(", ")
                )))
            }
        };

        let [output] = model.outputs.as_slice() else {
            return Err(Error::ModelLoad(format!(
                "Detection model '{}' must have exactly one output, found {}",
                model.name,
                model.outputs.len()
            )));
        };
        if output.rank() != 4 || output.shape[3] != DETECTION_ROW {
            return Err(Error::ModelLoad(format!(
                "Detection output '{}' must be [1,1,N,{}], got {}",
                output.name,
                DETECTION_ROW,
                describe_shape(&output.shape)
            )));
        }

        self.output = output.name.clone();
        fill_labels(&mut self.labels, model);
        self.image = Some(image);
        Ok(())
    }

    fn preprocess(&self, input: &InputData) -> Result<(TensorMap, InternalModelData)> {
        let image_input = self
            .image
            .as_ref()
            .ok_or_else(|| Error::Precondition("Detection model is not prepared".to_string()))?;
        let (tensor, geometry) = image_input.preprocess(image_input.image(input)?)?;

        let mut inputs = TensorMap::new();
        inputs.insert(image_input.name().to_string(), tensor);
        if let Some(info) = &self.image_info {
            let tensor = image_info_tensor(info, image_input.net_height(), image_input.net_width())?;
            inputs.insert(info.name.clone(), tensor);
        }
        Ok((inputs, InternalModelData::Image(geometry)))
    }

    fn postprocess(&self, envelope: &ResultEnvelope) -> Result<ResultKind> {
        let geometry = envelope.internal_data.image()?;
        let detections = require_output(&envelope.outputs, &self.output)?;
        let values: Vec<f32> = detections.iter().copied().collect();
        if values.len() % DETECTION_ROW != 0 {
            return Err(Error::Postprocess(format!(
                "Output '{}' of shape {} is not made of {}-value rows",
                self.output,
                describe_shape(detections.shape()),
                DETECTION_ROW
            )));
        }

        let net_width = geometry.net_width as f32;
        let net_height = geometry.net_height as f32;
        let max_x = geometry.original_width as f32;
        let max_y = geometry.original_height as f32;

        let mut objects = Vec::new();
        for row in values.chunks_exact(DETECTION_ROW) {
            if row[0] < 0.0 {
                break;
            }
            let confidence = row[2];
            if confidence <= self.confidence_threshold {
                continue;
            }
            let label_id = row[1].max(0.0).round() as usize;
            let (x_min, y_min) = geometry.to_original(row[3] * net_width, row[4] * net_height);
            let (x_max, y_max) = geometry.to_original(row[5] * net_width, row[6] * net_height);

            objects.push(DetectedObject {
                x_min: x_min.round().clamp(0.0, max_x),
                y_min: y_min.round().clamp(0.0, max_y),
                x_max: x_max.round().clamp(0.0, max_x),
                y_max: y_max.round().clamp(0.0, max_y),
                label_id,
                label: label_name(&self.labels, label_id),
                confidence,
            });
        }

        Ok(ResultKind::Detection(DetectionResult { objects }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::tensor::tensor_from_vec;
    use image::RgbImage;
    use crate::result::InternalImageData;

    fn model() -> ModelDescription {
        ModelDescription::new(
            "ssd",
            vec![
                TensorDescriptor::new("image", vec![1, 3, 10, 10]),
                TensorDescriptor::new("image_info", vec![1, 3]),
            ],
            vec![TensorDescriptor::new("detection_out", vec![1, 1, 3, 7])],
        )
    }

    fn prepared() -> DetectionFamily {
        let config = PipelineConfig {
            labels: vec!["background".to_string(), "person".to_string()],
            ..PipelineConfig::default()
        };
        let mut family = DetectionFamily::new(&config).unwrap();
        family
            .prepare_inputs_outputs(&mut model(), &LayoutResolver::new(None))
            .unwrap();
        family
    }

    #[test]
    fn test_preprocess_feeds_image_info() {
        let family = prepared();
        let (inputs, internal) = family.preprocess(&InputData::from(RgbImage::new(20, 40))).unwrap();
        assert_eq!(inputs["image"].shape(), &[1, 3, 10, 10]);
        assert_eq!(inputs["image_info"].as_slice().unwrap(), &[10.0, 10.0, 1.0]);
        assert_eq!(internal.image().unwrap().scale_y, 4.0);
    }

    #[test]
    fn test_postprocess_rescales_and_filters() {
        let family = prepared();
        let rows = vec![
            0.0, 1.0, 0.9, 0.1, 0.2, 0.5, 0.6, //
            0.0, 1.0, 0.3, 0.0, 0.0, 1.0, 1.0, //
            -1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0,
        ];
        let mut outputs = TensorMap::new();
        outputs.insert("detection_out".to_string(), tensor_from_vec(&[1, 1, 3, 7], rows).unwrap());
        let geometry = InternalImageData {
            original_width: 200,
            original_height: 100,
            net_width: 10,
            net_height: 10,
            scale_x: 20.0,
            scale_y: 10.0,
            pad_left: 0,
            pad_top: 0,
        };
        let envelope = ResultEnvelope::new(outputs, InternalModelData::Image(geometry));

        let ResultKind::Detection(result) = family.postprocess(&envelope).unwrap() else {
            panic!("expected detection");
        };
        assert_eq!(result.objects.len(), 1);
        let object = &result.objects[0];
        assert_eq!(object.label, "person");
        assert_eq!((object.x_min, object.y_min, object.x_max, object.y_max), (20.0, 20.0, 100.0, 60.0));
    }

    #[test]
    fn test_postprocess_needs_geometry() {
        let family = prepared();
        let err = family.postprocess(&ResultEnvelope::default()).unwrap_err();
        assert!(err.is_postprocess());
    }

    #[test]
    fn test_rejects_non_ssd_output() {
        let mut model = model();
        model.outputs[0].shape = vec![1, 100, 5];
        let mut family = DetectionFamily::new(&PipelineConfig::default()).unwrap();
        let err = family
            .prepare_inputs_outputs(&mut model, &LayoutResolver::new(None))
            .unwrap_err();
        assert!(err.is_model_load());
    }
}

//! Mask R-CNN style instance segmentation
//!
//! Two output conventions are recognised. The common one has labels, boxes with
//! a trailing score column, and one mask per box, either unbatched (ranks 1, 2
//! and 3) or batched (ranks 2, 3 and 4). Models with a second `image_info`
//! input instead name their outputs `boxes`, `classes`, `scores` and
//! `raw_masks`, with one mask per class, and count labels from zero.

use ndarray::{s, Array2, ArrayView2, Axis, Ix1, Ix2};

use common::error::{Error, Result};
use common::tensor::require_output;
use common::{TensorDescriptor, TensorMap};
use model_config::PipelineConfig;
use model_manager::ModelDescription;

use crate::families::preprocessing::{image_info_tensor, ImageInput, ImageSettings};
use crate::family::{fill_labels, label_name, ModelFamily};
use crate::input::InputData;
use crate::layout::LayoutResolver;
use crate::result::{
    InstanceSegmentationResult, InternalImageData, InternalModelData, ResultEnvelope,
    ResultKind, SegmentedObject,
};

/// Outputs that never carry detections
const AUXILIARY_OUTPUTS: &[&str] = &["saliency_map", "feature_vector"];

/// Output names by role
#[derive(Debug, Clone, Default, PartialEq)]
struct OutputNames {
    labels: String,
    boxes: String,
    masks: String,
    /// Separate scores, only with an image info input
    scores: Option<String>,
}

#[derive(Debug)]
pub struct InstanceSegmentationFamily {
    settings: ImageSettings,
    labels: Vec<String>,
    confidence_threshold: f32,
    postprocess_semantic_masks: bool,
    image: Option<ImageInput>,
    image_info: Option<TensorDescriptor>,
    outputs: OutputNames,
}

impl InstanceSegmentationFamily {
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        Ok(Self {
            settings: ImageSettings::from_config(config),
            labels: config.resolve_labels()?,
            confidence_threshold: config.confidence_threshold,
            postprocess_semantic_masks: config.postprocess_semantic_masks,
            image: None,
            image_info: None,
            outputs: OutputNames::default(),
        })
    }

    fn has_image_info(&self) -> bool {
        self.image_info.is_some()
    }
}

impl ModelFamily for InstanceSegmentationFamily {
    fn name(&self) -> &str {
        "instance_segmentation"
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
                    "Instance segmentation model '{}' has unexpected inputs: {}",
                    model.name,
                    others.join(", ")
                )))
            }
        };

        self.outputs = if self.has_image_info() {
            named_outputs(model)?
        } else {
            ranked_outputs(model, [1, 2, 3])
                .or_else(|| ranked_outputs(model, [2, 3, 4]))
                .ok_or_else(|| {
                    Error::ModelLoad(format!(
                        "Model '{}' has unexpected outputs: {}",
                        model.name,
                        model.output_names().join(", ")
                    ))
                })?
        };

        fill_labels(&mut self.labels, model);
        self.image = Some(image);
        Ok(())
    }

    fn preprocess(&self, input: &InputData) -> Result<(TensorMap, InternalModelData)> {
        let image_input = self.image.as_ref().ok_or_else(|| {
            Error::Precondition("Instance segmentation model is not prepared".to_string())
        })?;
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

        let mut labels = require_output(&envelope.outputs, &self.outputs.labels)?.view();
        let mut boxes = require_output(&envelope.outputs, &self.outputs.boxes)?.view();
        let mut masks = require_output(&envelope.outputs, &self.outputs.masks)?.view();
        if labels.ndim() == 2 && boxes.ndim() == 3 && masks.ndim() == 4 {
            labels = labels.index_axis_move(Axis(0), 0);
            boxes = boxes.index_axis_move(Axis(0), 0);
            masks = masks.index_axis_move(Axis(0), 0);
        }

        let labels = into_postprocess(labels.into_dimensionality::<Ix1>(), "labels")?;
        let boxes = into_postprocess(boxes.into_dimensionality::<Ix2>(), "boxes")?;
        let scores = match &self.outputs.scores {
            Some(name) => {
                let scores = require_output(&envelope.outputs, name)?.view();
                into_postprocess(scores.into_dimensionality::<Ix1>(), "scores")?.to_vec()
            }
            None => {
                if boxes.ncols() < 5 {
                    return Err(Error::Postprocess(format!(
                        "Boxes output '{}' has no score column",
                        self.outputs.boxes
                    )));
                }
                boxes.column(4).to_vec()
            }
        };

        let count = labels.len().min(boxes.nrows()).min(scores.len()).min(masks.shape()[0]);
        let mut objects = Vec::new();

        for i in 0..count {
            let confidence = scores[i];
            let mut label_id = labels[i].max(0.0).round() as usize;
            if !self.has_image_info() {
                label_id += 1;
            }

            let bbox = rescale_box(
                [boxes[[i, 0]], boxes[[i, 1]], boxes[[i, 2]], boxes[[i, 3]]],
                geometry,
            );
            let area = (bbox[2] - bbox[0]) * (bbox[3] - bbox[1]);
            if area < 1.0 || confidence <= self.confidence_threshold {
                continue;
            }
            if !self.labels.is_empty() && label_id >= self.labels.len() {
                continue;
            }
            let label = label_name(&self.labels, label_id);

            let mask = masks.index_axis(Axis(0), i);
            let raw_mask = if self.has_image_info() {
                if label_id >= mask.shape()[0] {
                    continue;
                }
                mask.index_axis_move(Axis(0), label_id)
            } else {
                mask
            };
            let raw_mask = into_postprocess(raw_mask.into_dimensionality::<Ix2>(), "masks")?;

            let mask = if self.postprocess_semantic_masks {
                paste_mask(&bbox, raw_mask, geometry.original_height, geometry.original_width)
            } else {
                raw_mask.to_owned()
            };

            objects.push(SegmentedObject {
                x_min: bbox[0] as i32,
                y_min: bbox[1] as i32,
                x_max: bbox[2] as i32,
                y_max: bbox[3] as i32,
                label_id,
                label,
                confidence,
                mask,
            });
        }

        Ok(ResultKind::InstanceSegmentation(InstanceSegmentationResult { objects }))
    }
}

/// Assigns labels, boxes and masks by rank; `None` unless all three are found
fn ranked_outputs(model: &ModelDescription, ranks: [usize; 3]) -> Option<OutputNames> {
    let mut names = OutputNames::default();
    for output in &model.outputs {
        if AUXILIARY_OUTPUTS.contains(&output.name.as_str()) || output.name.starts_with("TopK") {
            continue;
        }
        let slot = match output.rank() {
            r if r == ranks[0] => &mut names.labels,
            r if r == ranks[1] => &mut names.boxes,
            r if r == ranks[2] => &mut names.masks,
            _ => continue,
        };
        *slot = output.name.clone();
    }
    let complete = !names.labels.is_empty() && !names.boxes.is_empty() && !names.masks.is_empty();
    complete.then_some(names)
}

/// Outputs of models taking an image info input, matched by name and rank
fn named_outputs(model: &ModelDescription) -> Result<OutputNames> {
    let mut names = OutputNames::default();
    for output in &model.outputs {
        match (output.name.as_str(), output.rank()) {
            ("boxes", 2) => names.boxes = output.name.clone(),
            ("classes", 1) => names.labels = output.name.clone(),
            ("scores", 1) => names.scores = Some(output.name.clone()),
            ("raw_masks", 4) => names.masks = output.name.clone(),
            _ => {
                return Err(Error::ModelLoad(format!(
                    "Unexpected output {} in model '{}'",
                    output, model.name
                )))
            }
        }
    }
    if names.boxes.is_empty() || names.labels.is_empty() || names.masks.is_empty() || names.scores.is_none() {
        return Err(Error::ModelLoad(format!(
            "Model '{}' lacks one of the outputs boxes, classes, scores, raw_masks",
            model.name
        )));
    }
    Ok(names)
}

fn into_postprocess<T>(view: std::result::Result<T, ndarray::ShapeError>, role: &str) -> Result<T> {
    view.map_err(|e| Error::Postprocess(format!("Unexpected {} output: {}", role, e)))
}

/// Maps a box from model input pixels to rounded, clipped original pixels
fn rescale_box(bbox: [f32; 4], geometry: &InternalImageData) -> [f32; 4] {
    let (x0, y0) = geometry.to_original(bbox[0], bbox[1]);
    let (x1, y1) = geometry.to_original(bbox[2], bbox[3]);
    let max_x = geometry.original_width as f32;
    let max_y = geometry.original_height as f32;
    [
        x0.round().clamp(0.0, max_x),
        y0.round().clamp(0.0, max_y),
        x1.round().clamp(0.0, max_x),
        y1.round().clamp(0.0, max_y),
    ]
}

/// Scales a box about its centre
fn expand_box(bbox: &[f32; 4], scale: f32) -> [f32; 4] {
    let w_half = (bbox[2] - bbox[0]) * 0.5 * scale;
    let h_half = (bbox[3] - bbox[1]) * 0.5 * scale;
    let x_c = (bbox[2] + bbox[0]) * 0.5;
    let y_c = (bbox[3] + bbox[1]) * 0.5;
    [x_c - w_half, y_c - h_half, x_c + w_half, y_c + h_half]
}

/// Resizes a low-resolution mask into its box and returns a full image mask of 0 and 1
fn paste_mask(bbox: &[f32; 4], raw: ArrayView2<'_, f32>, image_height: u32, image_width: u32) -> Array2<f32> {
    let (raw_height, raw_width) = raw.dim();

    // A zero border keeps upsampling from smearing the mask edges.
    let mut padded = Array2::<f32>::zeros((raw_height + 2, raw_width + 2));
    padded.slice_mut(s![1..raw_height + 1, 1..raw_width + 1]).assign(&raw);

    let scale = (raw_height + 2) as f32 / raw_height.max(1) as f32;
    let extended = expand_box(bbox, scale).map(|v| v as i64);
    let width = (extended[2] - extended[0] + 1).max(1) as usize;
    let height = (extended[3] - extended[1] + 1).max(1) as usize;

    let (im_w, im_h) = (image_width as i64, image_height as i64);
    let x0 = extended[0].clamp(0, im_w);
    let y0 = extended[1].clamp(0, im_h);
    let x1 = (extended[2] + 1).clamp(0, im_w);
    let y1 = (extended[3] + 1).clamp(0, im_h);

    let resized = resize_bilinear(padded.view(), height, width);
    let mut mask = Array2::<f32>::zeros((image_height as usize, image_width as usize));
    for y in y0..y1 {
        for x in x0..x1 {
            let (my, mx) = ((y - extended[1]) as usize, (x - extended[0]) as usize);
            if my < height && mx < width && resized[[my, mx]] > 0.5 {
                mask[[y as usize, x as usize]] = 1.0;
            }
        }
    }
    mask
}

/// Bilinear resize with pixel-centre alignment
fn resize_bilinear(src: ArrayView2<'_, f32>, height: usize, width: usize) -> Array2<f32> {
    let (src_height, src_width) = src.dim();
    let fy = src_height as f32 / height as f32;
    let fx = src_width as f32 / width as f32;

    let sample = |pos: f32, limit: usize| -> (usize, usize, f32) {
        let pos = pos.max(0.0);
        let low = (pos.floor() as usize).min(limit - 1);
        let high = (low + 1).min(limit - 1);
        (low, high, pos - low as f32)
    };

    Array2::from_shape_fn((height, width), |(y, x)| {
        let (y0, y1, wy) = sample((y as f32 + 0.5) * fy - 0.5, src_height);
        let (x0, x1, wx) = sample((x as f32 + 0.5) * fx - 0.5, src_width);
        let top = src[[y0, x0]] * (1.0 - wx) + src[[y0, x1]] * wx;
        let bottom = src[[y1, x0]] * (1.0 - wx) + src[[y1, x1]] * wx;
        top * (1.0 - wy) + bottom * wy
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::tensor::tensor_from_vec;
    use common::Tensor;
    use image::RgbImage;
    use ndarray::IxDyn;

    fn geometry() -> InternalImageData {
        InternalImageData {
            original_width: 20,
            original_height: 20,
            net_width: 10,
            net_height: 10,
            scale_x: 2.0,
            scale_y: 2.0,
            pad_left: 0,
            pad_top: 0,
        }
    }

    fn model(outputs: Vec<TensorDescriptor>) -> ModelDescription {
        ModelDescription::new("maskrcnn", vec![TensorDescriptor::new("image", vec![1, 3, 10, 10])], outputs)
    }

    fn prepared(config: &PipelineConfig) -> InstanceSegmentationFamily {
        let mut model = model(vec![
            TensorDescriptor::new("labels", vec![2]),
            TensorDescriptor::new("boxes", vec![2, 5]),
            TensorDescriptor::new("masks", vec![2, 4, 4]),
        ]);
        let mut family = InstanceSegmentationFamily::new(config).unwrap();
        family.prepare_inputs_outputs(&mut model, &LayoutResolver::new(None)).unwrap();
        family
    }

    fn envelope() -> ResultEnvelope {
        let mut outputs = TensorMap::new();
        outputs.insert("labels".to_string(), tensor_from_vec(&[2], vec![0.0, 1.0]).unwrap());
        outputs.insert(
            "boxes".to_string(),
            tensor_from_vec(&[2, 5], vec![2.0, 2.0, 6.0, 6.0, 0.9, 1.0, 1.0, 3.0, 3.0, 0.2]).unwrap(),
        );
        outputs.insert("masks".to_string(), Tensor::ones(IxDyn(&[2, 4, 4])));
        ResultEnvelope::new(outputs, InternalModelData::Image(geometry()))
    }

    #[test]
    fn test_outputs_by_rank() {
        let batched = model(vec![
            TensorDescriptor::new("labels", vec![1, 100]),
            TensorDescriptor::new("boxes", vec![1, 100, 5]),
            TensorDescriptor::new("masks", vec![1, 100, 28, 28]),
            TensorDescriptor::new("saliency_map", vec![1, 2]),
        ]);
        let names = ranked_outputs(&batched, [1, 2, 3]).or_else(|| ranked_outputs(&batched, [2, 3, 4]));
        let names = names.unwrap();
        assert_eq!(names.labels, "labels");
        assert_eq!(names.masks, "masks");
        assert!(ranked_outputs(&model(vec![TensorDescriptor::new("x", vec![2])]), [1, 2, 3]).is_none());
    }

    #[test]
    fn test_postprocess_filters_and_pastes_masks() {
        let config = PipelineConfig {
            labels: vec!["background".to_string(), "cat".to_string(), "dog".to_string()],
            ..PipelineConfig::default()
        };
        let family = prepared(&config);
        let ResultKind::InstanceSegmentation(result) = family.postprocess(&envelope()).unwrap() else {
            panic!("expected instance segmentation");
        };

        assert_eq!(result.objects.len(), 1);
        let object = &result.objects[0];
        assert_eq!(object.label, "cat");
        assert_eq!((object.x_min, object.y_min, object.x_max, object.y_max), (4, 4, 12, 12));
        assert_eq!(object.mask.dim(), (20, 20));
        assert_eq!(object.mask[[8, 8]], 1.0);
        assert_eq!(object.mask[[0, 0]], 0.0);
        assert_eq!(object.mask[[19, 19]], 0.0);
    }

    #[test]
    fn test_raw_masks_when_postprocessing_disabled() {
        let config = PipelineConfig { postprocess_semantic_masks: false, ..PipelineConfig::default() };
        let family = prepared(&config);
        let ResultKind::InstanceSegmentation(result) = family.postprocess(&envelope()).unwrap() else {
            panic!("expected instance segmentation");
        };
        assert_eq!(result.objects[0].mask.dim(), (4, 4));
        assert_eq!(result.objects[0].label, "#1");
    }

    fn image_info_model(extra: Option<TensorDescriptor>) -> ModelDescription {
        let mut outputs = vec![
            TensorDescriptor::new("boxes", vec![2, 4]),
            TensorDescriptor::new("classes", vec![2]),
            TensorDescriptor::new("scores", vec![2]),
            TensorDescriptor::new("raw_masks", vec![2, 3, 4, 4]),
        ];
        outputs.extend(extra);
        ModelDescription::new(
            "segmentoly",
            vec![
                TensorDescriptor::new("image", vec![1, 3, 10, 10]),
                TensorDescriptor::new("im_info", vec![1, 3]),
            ],
            outputs,
        )
    }

    #[test]
    fn test_image_info_outputs_by_name() {
        let config = PipelineConfig {
            labels: vec!["background".to_string(), "cat".to_string(), "dog".to_string()],
            postprocess_semantic_masks: false,
            ..PipelineConfig::default()
        };
        let mut family = InstanceSegmentationFamily::new(&config).unwrap();
        family
            .prepare_inputs_outputs(&mut image_info_model(None), &LayoutResolver::new(None))
            .unwrap();

        let (inputs, _) = family.preprocess(&InputData::from(RgbImage::new(20, 20))).unwrap();
        assert_eq!(inputs["im_info"].as_slice().unwrap(), &[10.0, 10.0, 1.0]);

        // Each detection carries one mask per class; only its own class is filled.
        let raw_masks = Tensor::from_shape_fn(IxDyn(&[2, 3, 4, 4]), |index| match (index[0], index[1]) {
            (0, 2) => 0.7,
            (1, 1) => 0.3,
            _ => 0.0,
        });
        let mut outputs = TensorMap::new();
        outputs.insert(
            "boxes".to_string(),
            tensor_from_vec(&[2, 4], vec![1.0, 1.0, 5.0, 5.0, 0.0, 0.0, 4.0, 4.0]).unwrap(),
        );
        outputs.insert("classes".to_string(), tensor_from_vec(&[2], vec![2.0, 1.0]).unwrap());
        outputs.insert("scores".to_string(), tensor_from_vec(&[2], vec![0.9, 0.8]).unwrap());
        outputs.insert("raw_masks".to_string(), raw_masks);
        let envelope = ResultEnvelope::new(outputs, InternalModelData::Image(geometry()));

        let ResultKind::InstanceSegmentation(result) = family.postprocess(&envelope).unwrap() else {
            panic!("expected instance segmentation");
        };
        assert_eq!(result.objects.len(), 2);

        let first = &result.objects[0];
        assert_eq!((first.label_id, first.label.as_str()), (2, "dog"));
        assert_eq!(first.confidence, 0.9);
        assert_eq!((first.x_min, first.y_min, first.x_max, first.y_max), (2, 2, 10, 10));
        assert!(first.mask.iter().all(|&v| v == 0.7));

        let second = &result.objects[1];
        assert_eq!((second.label_id, second.label.as_str()), (1, "cat"));
        assert!(second.mask.iter().all(|&v| v == 0.3));
    }

    #[test]
    fn test_image_info_rejects_unexpected_output() {
        let mut model = image_info_model(Some(TensorDescriptor::new("extra", vec![2])));
        let mut family = InstanceSegmentationFamily::new(&PipelineConfig::default()).unwrap();
        let err = family
            .prepare_inputs_outputs(&mut model, &LayoutResolver::new(None))
            .unwrap_err();
        assert!(err.is_model_load());
        assert!(err.to_string().contains("extra"));
    }

    #[test]
    fn test_expand_box() {
        assert_eq!(expand_box(&[2.0, 2.0, 6.0, 4.0], 2.0), [0.0, 1.0, 8.0, 5.0]);
    }

    #[test]
    fn test_resize_bilinear_keeps_constant() {
        let src = Array2::from_elem((3, 3), 0.75f32);
        let out = resize_bilinear(src.view(), 7, 5);
        assert_eq!(out.dim(), (7, 5));
        assert!(out.iter().all(|v| (v - 0.75).abs() < 1e-6));
    }
}

//! Inference results
//!
//! The controller wraps the backend outputs and the preprocessing context of a
//! call into a [`ResultEnvelope`]. The family postprocess hook reads the envelope
//! and returns a [`ResultKind`]; the envelope is then moved, field by field, into
//! the final [`ModelResult`] together with that payload.

use ndarray::Array2;
use serde::Serialize;

use common::error::{Error, Result};
use common::TensorMap;

/// Geometry of one preprocessed image
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InternalImageData {
    /// Width of the image given to `infer`
    pub original_width: u32,

    /// Height of the image given to `infer`
    pub original_height: u32,

    /// Spatial width of the model input
    pub net_width: u32,

    /// Spatial height of the model input
    pub net_height: u32,

    /// Original pixels per model pixel, horizontally
    pub scale_x: f32,

    /// Original pixels per model pixel, vertically
    pub scale_y: f32,

    /// Padding columns left of the resized image
    pub pad_left: u32,

    /// Padding rows above the resized image
    pub pad_top: u32,
}

impl InternalImageData {
    /// Maps a point in model input pixels back onto the original image
    pub fn to_original(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_left as f32) * self.scale_x,
            (y - self.pad_top as f32) * self.scale_y,
        )
    }
}

/// Context produced by preprocessing and required by postprocessing
#[derive(Debug, Clone, PartialEq, Default)]
pub enum InternalModelData {
    /// The family needs no context
    #[default]
    None,

    /// Image geometry for rescaling outputs
    Image(InternalImageData),
}

impl InternalModelData {
    /// Image geometry, failing when preprocessing did not record any
    pub fn image(&self) -> Result<&InternalImageData> {
        match self {
            InternalModelData::Image(data) => Ok(data),
            InternalModelData::None => Err(Error::Postprocess(
                "Image geometry missing from preprocessing context".to_string(),
            )),
        }
    }
}

/// Raw outputs and preprocessing context of one `infer` call
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultEnvelope {
    /// Backend outputs by name
    pub outputs: TensorMap,

    /// Context recorded by preprocessing
    pub internal_data: InternalModelData,
}

impl ResultEnvelope {
    pub fn new(outputs: TensorMap, internal_data: InternalModelData) -> Self {
        Self { outputs, internal_data }
    }

    /// Moves the envelope into a typed result
    pub fn into_result(self, kind: ResultKind) -> ModelResult {
        ModelResult {
            outputs: self.outputs,
            internal_data: self.internal_data,
            kind,
        }
    }
}

/// One classified label
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    /// Class index
    pub id: usize,

    /// Class label, `#id` when no labels are known
    pub label: String,

    /// Class score
    pub score: f32,
}

/// Top classes, best first
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub top_labels: Vec<Classification>,
}

/// One detected box in original image coordinates
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectedObject {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,

    /// Class index
    pub label_id: usize,

    /// Class label
    pub label: String,

    /// Detection confidence
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionResult {
    pub objects: Vec<DetectedObject>,
}

/// Per-pixel class ids at original image size
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentationResult {
    pub class_map: Array2<u32>,
}

/// One instance with its box and mask
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentedObject {
    pub x_min: i32,
    pub y_min: i32,
    pub x_max: i32,
    pub y_max: i32,

    /// Class index
    pub label_id: usize,

    /// Class label
    pub label: String,

    /// Detection confidence
    pub confidence: f32,

    /// Binary mask over the whole original image, or the raw low-resolution
    /// mask when mask postprocessing is disabled
    pub mask: Array2<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceSegmentationResult {
    pub objects: Vec<SegmentedObject>,
}

/// Family-specific payload of a result
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResultKind {
    /// No interpretation; see [`ModelResult::outputs`]
    Raw,
    Classification(ClassificationResult),
    Detection(DetectionResult),
    Segmentation(SegmentationResult),
    InstanceSegmentation(InstanceSegmentationResult),
}

/// Typed result of one `infer` call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelResult {
    /// Raw backend outputs
    #[serde(skip)]
    pub outputs: TensorMap,

    /// Preprocessing context of the call
    #[serde(skip)]
    pub internal_data: InternalModelData,

    /// Family payload
    #[serde(flatten)]
    pub kind: ResultKind,
}

impl ModelResult {
    pub fn outputs(&self) -> &TensorMap {
        &self.outputs
    }

    pub fn internal_data(&self) -> &InternalModelData {
        &self.internal_data
    }

    pub fn kind(&self) -> &ResultKind {
        &self.kind
    }

    pub fn as_classification(&self) -> Option<&ClassificationResult> {
        match &self.kind {
            ResultKind::Classification(result) => Some(result),
            _ => None,
        }
    }

    pub fn as_detection(&self) -> Option<&DetectionResult> {
        match &self.kind {
            ResultKind::Detection(result) => Some(result),
            _ => None,
        }
    }

    pub fn as_segmentation(&self) -> Option<&SegmentationResult> {
        match &self.kind {
            ResultKind::Segmentation(result) => Some(result),
            _ => None,
        }
    }

    pub fn as_instance_segmentation(&self) -> Option<&InstanceSegmentationResult> {
        match &self.kind {
            ResultKind::InstanceSegmentation(result) => Some(result),
            _ => None,
        }
    }
}

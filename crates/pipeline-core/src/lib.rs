//! Inference pipeline core for Model API
//!
//! This crate provides the pipeline controller that binds an execution adapter,
//! resolves input layouts and runs the preprocess, execute and postprocess steps
//! of the model families.

pub mod controller;
pub mod families;
pub mod family;
pub mod input;
pub mod layout;
pub mod result;
pub mod state;

// Re-export commonly used types
pub use controller::{AdapterFactory, InferencePipeline};
pub use family::{create_family, ModelFamily, FAMILY_NAMES};
pub use input::{ImageInputData, InputData};
pub use layout::{layout_from_shape, LayoutResolver};
pub use result::{
    Classification, ClassificationResult, DetectedObject, DetectionResult,
    InstanceSegmentationResult, InternalImageData, InternalModelData, ModelResult,
    ResultEnvelope, ResultKind, SegmentationResult, SegmentedObject,
};
pub use state::PipelineState;

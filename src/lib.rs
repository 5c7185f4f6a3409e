//! Model API
//!
//! Model-agnostic inference. A configuration names a model description; the
//! pipeline picks the model family, resolves input layouts, binds an execution
//! backend and turns raw outputs into typed results.
//!
//! ```no_run
//! use model_api::{load_pipeline, InputData};
//!
//! # fn main() -> anyhow::Result<()> {
//! let pipeline = load_pipeline("pipeline.toml")?;
//! let image = image::open("cat.jpg")?.to_rgb8();
//! let result = pipeline.infer(&InputData::from(image))?;
//! println!("{:?}", result.as_classification());
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use image::RgbImage;
use ndarray::{ArrayD, IxDyn};
use tracing::info;

pub use common::{Error, Layout, Tensor, TensorDescriptor, TensorMap};
pub use inference_engine::{
    default_adapter, ConcurrencyContract, ExecutionAdapter, ExecutionContext, ReferenceAdapter,
};
pub use model_config::{ConfigManager, LayoutMap, PipelineConfig, ResizeType};
pub use model_manager::{ModelDescription, ModelReader, ModelSource};
pub use pipeline_core::{
    create_family, layout_from_shape, AdapterFactory, ClassificationResult, DetectionResult,
    InferencePipeline, InputData, InstanceSegmentationResult, LayoutResolver, ModelFamily,
    ModelResult, PipelineState, ResultKind, SegmentationResult, FAMILY_NAMES,
};

/// Builds an unloaded pipeline from a configuration
pub fn create_pipeline(config: PipelineConfig) -> Result<InferencePipeline> {
    let model_path = config.model_path.clone();
    InferencePipeline::from_config(config)
        .with_context(|| format!("Cannot create a pipeline for {:?}", model_path))
}

/// Reads a configuration file and returns a pipeline bound to the default backend
pub fn load_pipeline(config_path: impl AsRef<Path>) -> Result<InferencePipeline> {
    let config_path = config_path.as_ref();
    let config = ConfigManager::from_file(config_path)
        .with_context(|| format!("Cannot read configuration {:?}", config_path))?
        .into_config();

    let mut pipeline = create_pipeline(config)?;
    pipeline
        .load(None)
        .with_context(|| format!("Cannot load the model configured in {:?}", config_path))?;

    info!("Pipeline ready: {}", pipeline.state());
    Ok(pipeline)
}

/// Zero-filled tensors for every input of a loaded pipeline
pub fn zero_inputs(pipeline: &InferencePipeline) -> common::Result<TensorMap> {
    let mut inputs = TensorMap::new();
    for name in pipeline.input_names()? {
        let shape = pipeline.input_shape(&name)?;
        inputs.insert(name, ArrayD::zeros(IxDyn(&shape)));
    }
    Ok(inputs)
}

/// Builds, loads and runs a pipeline once.
///
/// The image feeds image families; without one every model input is zero-filled,
/// which suits `raw` models.
pub fn run_once(config: PipelineConfig, image: Option<RgbImage>) -> common::Result<ModelResult> {
    let mut pipeline = InferencePipeline::from_config(config)?;
    pipeline.load(None)?;

    let input = match image {
        Some(image) => InputData::from(image),
        None => InputData::Tensors(zero_inputs(&pipeline)?),
    };
    pipeline.infer(&input)
}

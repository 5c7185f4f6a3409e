//! Inference pipeline controller
//!
//! [`InferencePipeline`] owns the configuration, the model family and, once
//! loaded, the execution adapter with the compiled model. `load` reads the model,
//! lets the family prepare it, forces a batch of one and compiles it on the
//! adapter. `infer` runs preprocess, execute and postprocess for one input.

use std::fmt;

use parking_lot::Mutex;
use tracing::{debug, info};

use common::error::{Error, Result};
use common::utils::{format_duration, measure_execution_time};
use common::{Layout, TensorDescriptor, TensorMap};
use inference_engine::{default_adapter, ConcurrencyContract, ExecutionAdapter, ExecutionContext};
use model_config::PipelineConfig;
use model_manager::{log_basic_model_info, ModelDescription, ModelReader, ModelSource};

use crate::family::{create_family, ModelFamily};
use crate::input::InputData;
use crate::layout::{with_unit_batch, LayoutResolver};
use crate::result::{ModelResult, ResultEnvelope};
use crate::state::PipelineState;

/// Builds the adapter bound when `load` is given none
pub type AdapterFactory = Box<dyn Fn() -> Box<dyn ExecutionAdapter> + Send + Sync>;

/// Adapter and the model it compiled
struct Binding {
    /// Bound execution adapter
    adapter: Box<dyn ExecutionAdapter>,

    /// Model description as compiled
    model: ModelDescription,
}

/// Model-agnostic inference pipeline
pub struct InferencePipeline {
    /// Options, fixed at construction
    config: PipelineConfig,

    /// Where model descriptions are read from
    source: Box<dyn ModelSource>,

    /// Model family hooks; chosen from the model's metadata on first load when absent
    family: Option<Box<dyn ModelFamily>>,

    /// Input layouts, resolved once per input
    layouts: LayoutResolver,

    /// Backend-wide context handed to adapters
    context: ExecutionContext,

    /// Default adapter construction
    default_adapter: AdapterFactory,

    /// Bound adapter, present only after a successful load
    binding: Option<Binding>,

    /// Serializes `infer` on adapters that do not support concurrent calls
    exec_lock: Mutex<()>,
}

impl InferencePipeline {
    /// Creates a pipeline with an explicit model family
    pub fn new(config: PipelineConfig, family: Box<dyn ModelFamily>) -> Self {
        Self::build(config, Some(family))
    }

    /// Creates a pipeline whose family is named by `config.model_type`.
    ///
    /// Without a configured type the family is taken from the model's own
    /// metadata when it is loaded.
    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let family = match &config.model_type {
            Some(name) => Some(create_family(name, &config)?),
            None => None,
        };
        Ok(Self::build(config, family))
    }

    fn build(config: PipelineConfig, family: Option<Box<dyn ModelFamily>>) -> Self {
        let layouts = LayoutResolver::new(config.layout.clone());
        Self {
            config,
            source: Box::new(ModelReader::new()),
            family,
            layouts,
            context: ExecutionContext::default(),
            default_adapter: Box::new(default_adapter),
            binding: None,
            exec_lock: Mutex::new(()),
        }
    }

    /// Reads models from `source` instead of the filesystem
    pub fn with_model_source(mut self, source: Box<dyn ModelSource>) -> Self {
        self.source = source;
        self
    }

    /// Uses `context` when compiling
    pub fn with_execution_context(mut self, context: ExecutionContext) -> Self {
        self.context = context;
        self
    }

    /// Replaces the factory used when `load` is given no adapter
    pub fn with_default_adapter<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn ExecutionAdapter> + Send + Sync + 'static,
    {
        self.default_adapter = Box::new(factory);
        self
    }

    /// Reads, prepares and compiles the model on `adapter`, or on the default
    /// adapter when `None`.
    ///
    /// Any previously bound adapter is released first. On failure the pipeline
    /// is left unloaded.
    pub fn load(&mut self, adapter: Option<Box<dyn ExecutionAdapter>>) -> Result<()> {
        if let Some(previous) = self.binding.take() {
            info!("Releasing model '{}' from adapter '{}'", previous.model.name, previous.adapter.name());
        }

        let mut model = self.source.read_model(&self.config.model_path)?;
        log_basic_model_info(&model);

        if self.family.is_none() {
            let name = model.model_type().ok_or_else(|| {
                Error::Configuration(format!(
                    "No model type configured and model '{}' does not declare one",
                    model.name
                ))
            })?;
            self.family = Some(create_family(name, &self.config)?);
        }
        let family = self
            .family
            .as_mut()
            .ok_or_else(|| Error::Internal("Model family was not created".to_string()))?;

        family.prepare_inputs_outputs(&mut model, &self.layouts)?;
        force_unit_batch(&mut model, &self.layouts)?;

        let mut adapter = adapter.unwrap_or_else(|| (self.default_adapter)());
        info!(
            "Compiling model '{}' as {} on adapter '{}' (device hint {})",
            model.name,
            family.name(),
            adapter.name(),
            self.config.device
        );
        adapter.load_model(&model, &self.context, &self.config.device, &self.config.compilation_options)?;

        self.binding = Some(Binding { adapter, model });
        Ok(())
    }

    /// Runs one inference.
    ///
    /// Fails with [`Error::Precondition`] before a successful `load`, and with
    /// the adapter's [`Error::Execution`] when it rejects the tensors.
    pub fn infer(&self, input: &InputData) -> Result<ModelResult> {
        let binding = self.binding.as_ref().ok_or_else(|| {
            Error::Precondition("infer called before a successful load".to_string())
        })?;
        let family = self
            .family
            .as_ref()
            .ok_or_else(|| Error::Internal("Loaded pipeline has no model family".to_string()))?;

        let (result, elapsed) = measure_execution_time(|| {
            let (inputs, internal_data) = family.preprocess(input)?;
            check_inputs(&binding.model, &inputs)?;

            let outputs = match binding.adapter.concurrency() {
                ConcurrencyContract::Concurrent => binding.adapter.infer(inputs)?,
                ConcurrencyContract::Serialized => {
                    let _guard = self.exec_lock.lock();
                    binding.adapter.infer(inputs)?
                }
            };

            let envelope = ResultEnvelope::new(outputs, internal_data);
            let kind = family.postprocess(&envelope)?;
            Ok(envelope.into_result(kind))
        })?;

        debug!("Inference on '{}' took {}", binding.model.name, format_duration(elapsed));
        Ok(result)
    }

    /// Layout of a model input, resolved once and cached
    pub fn get_input_layout(&self, input: &TensorDescriptor) -> Result<Layout> {
        let binding = self.binding()?;
        self.layouts.resolve(input, &binding.model)
    }

    /// Layout of the named model input
    pub fn input_layout(&self, name: &str) -> Result<Layout> {
        let input = self.input(name)?;
        self.get_input_layout(input)
    }

    fn binding(&self) -> Result<&Binding> {
        self.binding
            .as_ref()
            .ok_or_else(|| Error::Precondition("Model is not loaded".to_string()))
    }

    fn input(&self, name: &str) -> Result<&TensorDescriptor> {
        let binding = self.binding()?;
        binding
            .model
            .input(name)
            .ok_or_else(|| Error::NotFound(format!("Model '{}' has no input '{}'", binding.model.name, name)))
    }

    /// Compiled model description
    pub fn model(&self) -> Option<&ModelDescription> {
        self.binding.as_ref().map(|binding| &binding.model)
    }

    /// Input names in model order
    pub fn input_names(&self) -> Result<Vec<String>> {
        Ok(self.binding()?.model.input_names())
    }

    /// Output names in model order
    pub fn output_names(&self) -> Result<Vec<String>> {
        Ok(self.binding()?.model.output_names())
    }

    /// Shape of the named input, batch included
    pub fn input_shape(&self, name: &str) -> Result<Vec<usize>> {
        Ok(self.input(name)?.shape.clone())
    }

    /// Shape of the named output
    pub fn output_shape(&self, name: &str) -> Result<Vec<usize>> {
        let binding = self.binding()?;
        binding
            .model
            .output(name)
            .map(|output| output.shape.clone())
            .ok_or_else(|| Error::NotFound(format!("Model '{}' has no output '{}'", binding.model.name, name)))
    }

    /// Name of the model family, once known
    pub fn family_name(&self) -> Option<&str> {
        self.family.as_ref().map(|family| family.name())
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn is_loaded(&self) -> bool {
        self.binding.is_some()
    }

    pub fn state(&self) -> PipelineState {
        match &self.binding {
            Some(binding) => PipelineState::Loaded {
                adapter: binding.adapter.name().to_string(),
            },
            None => PipelineState::Unloaded,
        }
    }
}

/// Sets the batch dimension of every input to 1.
///
/// Inputs are resolved through the same tiers as `get_input_layout`. A shape the
/// heuristic cannot classify, or an input the configured map leaves without a
/// layout, has its first axis treated as the batch.
fn force_unit_batch(model: &mut ModelDescription, layouts: &LayoutResolver) -> Result<()> {
    let resolved = model
        .inputs
        .iter()
        .map(|input| match layouts.resolve(input, model) {
            Ok(layout) => Ok(layout),
            Err(e) if layouts.configured()?.is_empty() => {
                debug!("No layout for input '{}' ({}), using axis 0 as batch", input.name, e);
                Ok(Layout::empty())
            }
            Err(e) => Err(e),
        })
        .collect::<Result<Vec<_>>>()?;

    for (input, layout) in model.inputs.iter_mut().zip(resolved) {
        let shape = with_unit_batch(&input.shape, &layout);
        if shape != input.shape {
            debug!("Input '{}' reshaped to batch 1", input.name);
            input.shape = shape;
        }
    }
    Ok(())
}

/// Preprocessing must provide every model input
fn check_inputs(model: &ModelDescription, inputs: &TensorMap) -> Result<()> {
    match model.inputs.iter().find(|input| !inputs.contains_key(&input.name)) {
        Some(missing) => Err(Error::Execution(format!(
            "Preprocessing produced no tensor for input '{}'",
            missing.name
        ))),
        None => Ok(()),
    }
}

impl fmt::Debug for InferencePipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InferencePipeline")
            .field("model_path", &self.config.model_path)
            .field("family", &self.family_name())
            .field("state", &self.state())
            .finish()
    }
}

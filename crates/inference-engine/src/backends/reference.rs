//! Reference CPU backend
//!
//! Interprets the graph carried by a model description. Compilation resolves
//! the device, checks every node against the shapes flowing into it and keeps
//! an immutable execution plan, so `infer` can run concurrently.

use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

use common::error::{Error, Result};
use common::tensor::describe_shape;
use common::{TensorDescriptor, TensorMap};
use model_manager::{GraphNode, ModelDescription};

use crate::adapter::{ConcurrencyContract, ExecutionAdapter, ExecutionContext};
use crate::backends::ops;

/// Compiled form of a model description
#[derive(Debug, Clone)]
struct CompiledGraph {
    /// Model name
    name: String,

    /// Device the graph was compiled for
    device: String,

    /// Expected inputs
    inputs: Vec<TensorDescriptor>,

    /// Output names to return
    outputs: Vec<String>,

    /// Nodes in execution order
    nodes: Vec<GraphNode>,
}

/// Built-in backend interpreting description graphs on the CPU
#[derive(Debug, Default)]
pub struct ReferenceAdapter {
    /// Currently compiled graph
    compiled: Option<CompiledGraph>,

    /// Compilation options of the current graph
    options: BTreeMap<String, String>,
}

impl ReferenceAdapter {
    /// Creates an adapter with no model loaded
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true once a model has been compiled
    pub fn is_loaded(&self) -> bool {
        self.compiled.is_some()
    }

    /// Device of the compiled graph
    pub fn device(&self) -> Option<&str> {
        self.compiled.as_ref().map(|graph| graph.device.as_str())
    }

    /// Compilation options recorded for the compiled graph
    pub fn options(&self) -> &BTreeMap<String, String> {
        &self.options
    }

    fn compile(model: &ModelDescription, device: String) -> Result<CompiledGraph> {
        let mut shapes: HashMap<&str, Vec<usize>> = model
            .inputs
            .iter()
            .map(|input| (input.name.as_str(), input.shape.clone()))
            .collect();

        for node in &model.graph {
            let input_shape = shapes.get(node.input.as_str()).ok_or_else(|| {
                Error::ModelLoad(format!(
                    "Node producing '{}' reads unknown tensor '{}'",
                    node.output, node.input
                ))
            })?;
            let output_shape = ops::infer_shape(&node.op, input_shape)?;
            if shapes.insert(node.output.as_str(), output_shape).is_some() {
                return Err(Error::ModelLoad(format!(
                    "Tensor '{}' is produced more than once",
                    node.output
                )));
            }
        }

        for output in &model.outputs {
            let produced = shapes.get(output.name.as_str()).ok_or_else(|| {
                Error::ModelLoad(format!("Output '{}' is not produced by the graph", output.name))
            })?;
            if produced.len() != output.shape.len() {
                return Err(Error::ModelLoad(format!(
                    "Output '{}' is declared as {} but the graph produces {}",
                    output.name,
                    describe_shape(&output.shape),
                    describe_shape(produced)
                )));
            }
        }

        Ok(CompiledGraph {
            name: model.name.clone(),
            device,
            inputs: model.inputs.clone(),
            outputs: model.output_names(),
            nodes: model.graph.clone(),
        })
    }

    fn check_inputs(graph: &CompiledGraph, inputs: &TensorMap) -> Result<()> {
        for expected in &graph.inputs {
            let tensor = inputs.get(&expected.name).ok_or_else(|| {
                Error::Execution(format!("Missing input tensor '{}'", expected.name))
            })?;
            if tensor.shape() != expected.shape.as_slice() {
                return Err(Error::Execution(format!(
                    "Input '{}' expects shape {}, got {}",
                    expected.name,
                    describe_shape(&expected.shape),
                    describe_shape(tensor.shape())
                )));
            }
        }
        if let Some(unknown) = inputs
            .keys()
            .find(|name| !graph.inputs.iter().any(|input| &input.name == *name))
        {
            return Err(Error::Execution(format!(
                "Model '{}' has no input named '{}'",
                graph.name, unknown
            )));
        }
        Ok(())
    }
}

impl ExecutionAdapter for ReferenceAdapter {
    fn name(&self) -> &str {
        "reference"
    }

    fn load_model(
        &mut self,
        model: &ModelDescription,
        context: &ExecutionContext,
        device: &str,
        options: &BTreeMap<String, String>,
    ) -> Result<()> {
        // Release the previous graph before compiling, so a failure leaves nothing bound.
        self.compiled = None;
        self.options.clear();

        let device = context.resolve_device(device)?;
        let compiled = Self::compile(model, device)?;

        for (key, value) in options {
            debug!("Compilation option {}={} recorded for '{}'", key, value, model.name);
        }

        info!(
            "Model '{}' compiled on {} ({} nodes)",
            compiled.name,
            compiled.device,
            compiled.nodes.len()
        );

        self.compiled = Some(compiled);
        self.options = options.clone();
        Ok(())
    }

    fn infer(&self, inputs: TensorMap) -> Result<TensorMap> {
        let graph = self
            .compiled
            .as_ref()
            .ok_or_else(|| Error::Precondition("No model compiled on reference backend".to_string()))?;

        Self::check_inputs(graph, &inputs)?;

        let mut tensors = inputs;
        for node in &graph.nodes {
            let source = tensors.get(&node.input).ok_or_else(|| {
                Error::Execution(format!("Tensor '{}' was not computed", node.input))
            })?;
            let result = ops::apply(&node.op, source)?;
            tensors.insert(node.output.clone(), result);
        }

        let mut outputs = TensorMap::with_capacity(graph.outputs.len());
        for name in &graph.outputs {
            let tensor = tensors
                .remove(name)
                .ok_or_else(|| Error::Execution(format!("Output '{}' was not computed", name)))?;
            outputs.insert(name.clone(), tensor);
        }
        Ok(outputs)
    }

    fn concurrency(&self) -> ConcurrencyContract {
        ConcurrencyContract::Concurrent
    }
}

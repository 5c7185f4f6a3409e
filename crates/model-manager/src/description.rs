//! Model description
//!
//! A model description is the backend-independent view of a compiled model:
//! its inputs and outputs, runtime metadata (`model_info`) and the compute graph
//! interpreted by the built-in backend.

use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};

use common::TensorDescriptor;

/// Key in `model_info` naming the model family
pub const MODEL_TYPE_KEY: &str = "model_type";

/// Key in `model_info` holding space-separated class labels
pub const LABELS_KEY: &str = "labels";

/// Operation of one graph node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GraphOp {
    /// Copies its input
    Identity,
    /// Normalized exponentials along `axis` (negative counts from the end)
    Softmax {
        #[serde(default = "last_axis")]
        axis: isize,
    },
    /// Element-wise logistic function
    Sigmoid,
    /// Element-wise `x * scale + bias`
    Affine {
        scale: f32,
        #[serde(default)]
        bias: f32,
    },
    /// Axis permutation
    Transpose { perm: Vec<usize> },
    /// Shape change preserving element count
    Reshape { shape: Vec<usize> },
    /// Index of the maximum along `axis`, which is removed
    Argmax {
        #[serde(default = "last_axis")]
        axis: isize,
    },
}

fn last_axis() -> isize {
    -1
}

/// One node: reads `input`, writes `output`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Tensor the node reads
    pub input: String,

    /// Tensor the node produces
    pub output: String,

    /// Operation applied
    pub op: GraphOp,
}

/// Description of a model graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescription {
    /// Model name, for diagnostics
    #[serde(default)]
    pub name: String,

    /// Model inputs
    pub inputs: Vec<TensorDescriptor>,

    /// Model outputs
    pub outputs: Vec<TensorDescriptor>,

    /// Runtime metadata
    #[serde(default)]
    pub model_info: BTreeMap<String, String>,

    /// Compute graph, in execution order
    #[serde(default)]
    pub graph: Vec<GraphNode>,
}

impl ModelDescription {
    /// Creates a description with no metadata and an empty graph
    pub fn new(
        name: impl Into<String>,
        inputs: Vec<TensorDescriptor>,
        outputs: Vec<TensorDescriptor>,
    ) -> Self {
        Self {
            name: name.into(),
            inputs,
            outputs,
            model_info: BTreeMap::new(),
            graph: Vec::new(),
        }
    }

    /// Appends a graph node
    pub fn with_node(mut self, input: impl Into<String>, output: impl Into<String>, op: GraphOp) -> Self {
        self.graph.push(GraphNode {
            input: input.into(),
            output: output.into(),
            op,
        });
        self
    }

    /// Sets a runtime metadata entry
    pub fn with_info(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.model_info.insert(key.into(), value.into());
        self
    }

    pub fn input(&self, name: &str) -> Option<&TensorDescriptor> {
        self.inputs.iter().find(|t| t.name == name)
    }

    pub fn input_mut(&mut self, name: &str) -> Option<&mut TensorDescriptor> {
        self.inputs.iter_mut().find(|t| t.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&TensorDescriptor> {
        self.outputs.iter().find(|t| t.name == name)
    }

    pub fn output_mut(&mut self, name: &str) -> Option<&mut TensorDescriptor> {
        self.outputs.iter_mut().find(|t| t.name == name)
    }

    pub fn input_names(&self) -> Vec<String> {
        self.inputs.iter().map(|t| t.name.clone()).collect()
    }

    pub fn output_names(&self) -> Vec<String> {
        self.outputs.iter().map(|t| t.name.clone()).collect()
    }

    /// Model family recorded in the runtime metadata
    pub fn model_type(&self) -> Option<&str> {
        self.model_info.get(MODEL_TYPE_KEY).map(String::as_str)
    }

    /// Class labels recorded in the runtime metadata
    pub fn labels(&self) -> Vec<String> {
        self.model_info
            .get(LABELS_KEY)
            .map(|labels| labels.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }
}

//! Common types for Model API
//!
//! This module defines the tensor metadata shared between the model description,
//! the execution backends and the pipeline controller.

use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Batch axis label
pub const AXIS_BATCH: char = 'N';
/// Channel axis label
pub const AXIS_CHANNELS: char = 'C';
/// Height axis label
pub const AXIS_HEIGHT: char = 'H';
/// Width axis label
pub const AXIS_WIDTH: char = 'W';
/// Depth axis label
pub const AXIS_DEPTH: char = 'D';
/// Placeholder for an axis with no semantic role
pub const AXIS_ANY: char = '?';

/// Semantic labeling of a tensor's axes, e.g. `NCHW`.
///
/// An empty layout means "undefined": nothing is known about the axes and the
/// caller has to decide what to do with the tensor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Layout {
    axes: Vec<char>,
}

impl Layout {
    /// Parses a layout tag.
    ///
    /// Accepts the compact form (`"NCHW"`) and the bracketed form (`"[N,C,H,W]"`).
    /// Axis labels are single letters or `?`; a named axis may appear only once.
    ///
    /// ```
    /// use common::Layout;
    ///
    /// let layout = Layout::parse("[N,H,W,C]").unwrap();
    /// assert_eq!(layout.to_string(), "NHWC");
    /// assert_eq!(layout.channels_index(), Some(3));
    /// ```
    pub fn parse(tag: &str) -> Result<Self> {
        let tag = tag.trim();
        let body = if tag.starts_with('[') {
            tag.strip_suffix(']')
                .map(|inner| &inner[1..])
                .ok_or_else(|| Error::Configuration(format!("Unterminated layout '{}'", tag)))?
                .split(',')
                .map(str::trim)
                .collect::<Vec<_>>()
                .concat()
        } else {
            tag.to_string()
        };

        let mut axes = Vec::with_capacity(body.len());
        for axis in body.chars() {
            let axis = axis.to_ascii_uppercase();
            if !(axis.is_ascii_alphabetic() || axis == AXIS_ANY) {
                return Err(Error::Configuration(format!(
                    "Invalid axis '{}' in layout '{}'",
                    axis, tag
                )));
            }
            if axis != AXIS_ANY && axes.contains(&axis) {
                return Err(Error::Configuration(format!(
                    "Axis '{}' repeated in layout '{}'",
                    axis, tag
                )));
            }
            axes.push(axis);
        }

        Ok(Self { axes })
    }

    /// Creates an undefined layout
    pub fn empty() -> Self {
        Self::default()
    }

    /// Channel-first image layout
    pub fn nchw() -> Self {
        Self { axes: vec!['N', 'C', 'H', 'W'] }
    }

    /// Channel-last image layout
    pub fn nhwc() -> Self {
        Self { axes: vec!['N', 'H', 'W', 'C'] }
    }

    /// Returns true if nothing is known about the axes
    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }

    /// Number of labeled axes
    pub fn rank(&self) -> usize {
        self.axes.len()
    }

    /// Position of the given axis label
    pub fn index_of(&self, axis: char) -> Option<usize> {
        self.axes.iter().position(|a| *a == axis.to_ascii_uppercase())
    }

    /// Returns true if the layout names the given axis
    pub fn has(&self, axis: char) -> bool {
        self.index_of(axis).is_some()
    }

    pub fn batch_index(&self) -> Option<usize> {
        self.index_of(AXIS_BATCH)
    }

    pub fn channels_index(&self) -> Option<usize> {
        self.index_of(AXIS_CHANNELS)
    }

    pub fn height_index(&self) -> Option<usize> {
        self.index_of(AXIS_HEIGHT)
    }

    pub fn width_index(&self) -> Option<usize> {
        self.index_of(AXIS_WIDTH)
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for axis in &self.axes {
            write!(f, "{}", axis)?;
        }
        Ok(())
    }
}

impl FromStr for Layout {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Layout::parse(s)
    }
}

impl TryFrom<String> for Layout {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Layout::parse(&value)
    }
}

impl From<Layout> for String {
    fn from(layout: Layout) -> Self {
        layout.to_string()
    }
}

/// Name, shape and optional declared layout of a model input or output.
///
/// A declared layout is ground truth: layout resolution never overrides it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorDescriptor {
    /// Tensor name as known to the backend
    pub name: String,

    /// Dimension sizes, outermost first
    pub shape: Vec<usize>,

    /// Declared layout, if the model carries one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<Layout>,
}

impl TensorDescriptor {
    /// Creates a descriptor without a declared layout
    pub fn new(name: impl Into<String>, shape: Vec<usize>) -> Self {
        Self {
            name: name.into(),
            shape,
            layout: None,
        }
    }

    /// Declares a layout for this tensor
    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = Some(layout);
        self
    }

    /// Number of dimensions
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Total number of elements
    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }

    /// Declared layout, ignoring an explicitly empty one
    pub fn declared_layout(&self) -> Option<&Layout> {
        self.layout.as_ref().filter(|layout| !layout.is_empty())
    }
}

impl fmt::Display for TensorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, crate::tensor::describe_shape(&self.shape))?;
        if let Some(layout) = self.declared_layout() {
            write!(f, " {}", layout)?;
        }
        Ok(())
    }
}

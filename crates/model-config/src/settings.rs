//! Pipeline configuration
//!
//! `PipelineConfig` is resolved once, when the pipeline is constructed, and never
//! changes afterwards. Validation is deliberately shallow; entries that can only
//! be checked against the model (layout names, label counts) are checked when the
//! pipeline first needs them.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};

use common::error::{Error, Result};
use logging::LogSettings;

use crate::defaults::{DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_DEVICE, DEFAULT_TOP_K};

/// How an input image is fitted into the model's spatial dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeType {
    /// Stretch to the model size, ignoring aspect ratio
    #[default]
    Standard,
    /// Keep aspect ratio, pad right and bottom
    FitToWindow,
    /// Keep aspect ratio, pad evenly on both sides
    FitToWindowLetterbox,
}

/// Options for one inference pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Path of the model description
    pub model_path: PathBuf,

    /// Model family; taken from the model's own metadata when absent
    pub model_type: Option<String>,

    /// Device hint handed to the execution backend
    pub device: String,

    /// Layout overrides, e.g. `"NCHW"` or `"image:NHWC,info:NC"`
    pub layout: Option<String>,

    /// Backend compilation options, passed through uninterpreted
    pub compilation_options: BTreeMap<String, String>,

    /// Class labels, indexed by class id
    pub labels: Vec<String>,

    /// File with one label per line; overrides `labels`
    pub labels_file: Option<PathBuf>,

    /// Minimum score of reported detections
    pub confidence_threshold: f32,

    /// Number of classes reported by classification models
    pub top_k: usize,

    /// Image resize policy
    pub resize_type: ResizeType,

    /// Per-channel values subtracted from input pixels
    pub mean_values: Vec<f32>,

    /// Per-channel divisors applied after mean subtraction
    pub scale_values: Vec<f32>,

    /// Feed BGR instead of RGB
    pub reverse_input_channels: bool,

    /// Resize and threshold instance masks to the original image
    pub postprocess_semantic_masks: bool,

    /// Logging sink settings
    pub logging: LogSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::new(),
            model_type: None,
            device: DEFAULT_DEVICE.to_string(),
            layout: None,
            compilation_options: BTreeMap::new(),
            labels: Vec::new(),
            labels_file: None,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            top_k: DEFAULT_TOP_K,
            resize_type: ResizeType::default(),
            mean_values: Vec::new(),
            scale_values: Vec::new(),
            reverse_input_channels: false,
            postprocess_semantic_masks: true,
            logging: LogSettings::default(),
        }
    }
}

impl PipelineConfig {
    /// Creates a configuration for the given model with default options
    pub fn for_model(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            ..Self::default()
        }
    }

    /// Checks the options that can be checked without the model
    pub fn validate(&self) -> Result<()> {
        if self.model_path.as_os_str().is_empty() {
            return Err(Error::Configuration("model_path is not set".to_string()));
        }
        if self.device.trim().is_empty() {
            return Err(Error::Configuration("device hint is empty".to_string()));
        }
        if self.top_k == 0 {
            return Err(Error::Configuration("top_k must be at least 1".to_string()));
        }
        if !self.mean_values.is_empty()
            && !self.scale_values.is_empty()
            && self.mean_values.len() != self.scale_values.len()
        {
            return Err(Error::Configuration(format!(
                "mean_values has {} entries but scale_values has {}",
                self.mean_values.len(),
                self.scale_values.len()
            )));
        }
        if self.scale_values.iter().any(|v| *v == 0.0) {
            return Err(Error::Configuration("scale_values must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Labels from `labels_file` if set, else the inline list
    pub fn resolve_labels(&self) -> Result<Vec<String>> {
        match &self.labels_file {
            Some(path) => {
                let text = fs::read_to_string(path).map_err(|e| {
                    Error::Configuration(format!("Cannot read labels file {:?}: {}", path, e))
                })?;
                Ok(text
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(str::to_string)
                    .collect())
            }
            None => Ok(self.labels.clone()),
        }
    }

    /// Makes relative paths relative to `base` (the configuration file's directory)
    pub fn resolve_relative_paths(&mut self, base: &Path) {
        if self.model_path.is_relative() && !self.model_path.as_os_str().is_empty() {
            self.model_path = base.join(&self.model_path);
        }
        if let Some(labels) = &self.labels_file {
            if labels.is_relative() {
                self.labels_file = Some(base.join(labels));
            }
        }
    }
}

//! Configuration sources
//!
//! Settings come from one file (TOML, YAML or JSON, chosen by extension) with
//! `MODEL_API__*` environment variables layered on top.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use common::error::{Error, Result};

use crate::defaults::{CONFIG_DIR_NAME, CONFIG_FILE_NAME, ENV_PREFIX, ENV_SEPARATOR};
use crate::settings::PipelineConfig;

/// Loads and holds the pipeline configuration
#[derive(Debug, Clone)]
pub struct ConfigManager {
    /// Resolved configuration
    config: PipelineConfig,

    /// File the configuration was read from, if any
    source: Option<PathBuf>,
}

impl ConfigManager {
    /// Wraps an already-built configuration
    pub fn from_config(config: PipelineConfig) -> Self {
        Self { config, source: None }
    }

    /// Reads a configuration file and applies environment overrides.
    ///
    /// Relative paths inside the file are resolved against the file's directory.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::NotFound(format!("Configuration file not found: {:?}", path)));
        }

        info!("Reading configuration from {:?}", path);

        let built = config::Config::builder()
            .add_source(config::File::from(path.to_path_buf()))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator(ENV_SEPARATOR))
            .build()
            .map_err(|e| Error::Configuration(format!("Cannot load {:?}: {}", path, e)))?;

        let mut config: PipelineConfig = built
            .try_deserialize()
            .map_err(|e| Error::Configuration(format!("Invalid configuration in {:?}: {}", path, e)))?;

        if let Some(base) = path.parent() {
            config.resolve_relative_paths(base);
        }

        debug!("Configuration for model {:?}: device {}", config.model_path, config.device);

        Ok(Self {
            config,
            source: Some(path.to_path_buf()),
        })
    }

    /// Reads `<config dir>/model-api/config.toml`
    pub fn from_default_location() -> Result<Self> {
        let path = Self::default_path()
            .ok_or_else(|| Error::NotFound("No configuration directory on this platform".to_string()))?;
        Self::from_file(path)
    }

    /// Platform-specific default configuration path
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Resolved configuration
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// File the configuration came from
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Consumes the manager, returning the configuration
    pub fn into_config(self) -> PipelineConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use crate::settings::ResizeType;

    #[test]
    fn test_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        fs::write(
            &path,
            r#"
model_path = "net.json"
model_type = "classification"
device = "CPU"
layout = "data:NCHW"
top_k = 3
resize_type = "fit_to_window"
labels = ["a", "b", "c"]

[compilation_options]
PERFORMANCE_HINT = "LATENCY"
"#,
        )
        .unwrap();

        let manager = ConfigManager::from_file(&path).unwrap();
        let config = manager.config();
        assert_eq!(config.model_path, dir.path().join("net.json"));
        assert_eq!(config.model_type.as_deref(), Some("classification"));
        assert_eq!(config.top_k, 3);
        assert_eq!(config.resize_type, ResizeType::FitToWindow);
        assert_eq!(config.labels.len(), 3);
        assert_eq!(
            config.compilation_options.get("PERFORMANCE_HINT").map(String::as_str),
            Some("LATENCY")
        );
        assert_eq!(manager.source(), Some(path.as_path()));
    }

    #[test]
    fn test_from_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.yaml");
        fs::write(&path, "model_path: /models/ssd.json\nconfidence_threshold: 0.25\n").unwrap();

        let config = ConfigManager::from_file(&path).unwrap().into_config();
        assert_eq!(config.model_path, PathBuf::from("/models/ssd.json"));
        assert!((config.confidence_threshold - 0.25).abs() < f32::EPSILON);
        assert_eq!(config.device, "AUTO");
    }

    #[test]
    fn test_missing_file() {
        let err = ConfigManager::from_file("/nonexistent/pipeline.toml").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        fs::write(&path, "top_k = \"many\"\n").unwrap();
        assert!(ConfigManager::from_file(&path).unwrap_err().is_configuration());
    }
}

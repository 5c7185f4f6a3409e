//! Default configuration values

/// Device hint passed to the backend when none is configured
pub const DEFAULT_DEVICE: &str = "AUTO";

/// Minimum confidence for detections and segmented objects
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

/// Number of classes reported by classification models
pub const DEFAULT_TOP_K: usize = 1;

/// Prefix of environment variables overriding file settings (`MODEL_API__DEVICE=CPU`)
pub const ENV_PREFIX: &str = "MODEL_API";

/// Separator between the prefix and nested keys in environment variables
pub const ENV_SEPARATOR: &str = "__";

/// Application directory under the platform configuration directory
pub const CONFIG_DIR_NAME: &str = "model-api";

/// File name looked up in the application configuration directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

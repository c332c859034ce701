//! Pipeline configuration.
//!
//! [`PipelineConfig`] is built once at process start and handed by reference to
//! [`DiagnosisPipeline::from_config`](crate::pipeline::DiagnosisPipeline::from_config).
//! Nothing in the crate reads configuration from ambient globals.

use super::{ConfigError, ConfigValidator, OrtSessionConfig};
use crate::impl_config_validator;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Square input resolution the classifier was trained with.
///
/// Overridable through [`PipelineConfig::input_size`]; checked against the
/// model's declared input shape when the model is loaded.
pub const DEFAULT_INPUT_SIZE: u32 = 256;

/// Default bound on a single classifier call.
pub const DEFAULT_CLASSIFICATION_TIMEOUT_MS: u64 = 30_000;

/// Default location of the classifier model.
pub const DEFAULT_MODEL_PATH: &str = "models/mobilenetv2.onnx";

/// Configuration for the diagnosis pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Path to the ONNX classifier.
    pub model_path: PathBuf,
    /// Optional labels file, one raw class label per line in training order.
    /// The built-in PlantVillage vocabulary is used when absent.
    pub labels_path: Option<PathBuf>,
    /// Optional JSON knowledge table. The built-in table is used when absent.
    pub knowledge_path: Option<PathBuf>,
    /// Square input size fed to the classifier.
    pub input_size: u32,
    /// Minimum confidence, in percent, for a Diagnosed verdict. `0` disables the gate.
    pub confidence_threshold: f32,
    /// SQLite database for prediction history. History is disabled when absent.
    pub history_path: Option<PathBuf>,
    /// Upper bound for one classifier call, in milliseconds. `None` waits forever.
    pub classification_timeout_ms: Option<u64>,
    /// Number of ONNX sessions to keep for concurrent requests.
    pub session_pool_size: usize,
    /// Fail startup when the model cannot be loaded instead of running degraded.
    pub strict_model_load: bool,
    /// ONNX Runtime session options.
    pub ort_session: Option<OrtSessionConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            labels_path: None,
            knowledge_path: None,
            input_size: DEFAULT_INPUT_SIZE,
            confidence_threshold: 0.0,
            history_path: None,
            classification_timeout_ms: Some(DEFAULT_CLASSIFICATION_TIMEOUT_MS),
            session_pool_size: 1,
            strict_model_load: false,
            ort_session: None,
        }
    }
}

impl_config_validator!(PipelineConfig {
    input_size: min(1),
    confidence_threshold: range(0.0, 100.0),
    session_pool_size: min(1),
    classification_timeout_ms: optional_min(1),
    labels_path: optional_path,
    knowledge_path: optional_path,
});

impl PipelineConfig {
    /// Creates a configuration for the given model with default settings.
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            ..Self::default()
        }
    }

    /// Loads a configuration from a JSON file. Missing keys take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Parse {
            message: format!("{}: {e}", path.display()),
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| ConfigError::Parse {
            message: format!("{}: {e}", path.display()),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the minimum confidence percentage.
    pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// Sets the classifier input size.
    pub fn with_input_size(mut self, size: u32) -> Self {
        self.input_size = size;
        self
    }

    /// Enables history persistence at the given path.
    pub fn with_history_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.history_path = Some(path.into());
        self
    }

    /// Sets or clears the classification timeout.
    pub fn with_classification_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.classification_timeout_ms = timeout.map(|t| t.as_millis() as u64);
        self
    }

    /// The classification timeout as a [`Duration`].
    pub fn classification_timeout(&self) -> Option<Duration> {
        self.classification_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.input_size, DEFAULT_INPUT_SIZE);
        assert_eq!(config.confidence_threshold, 0.0);
        assert_eq!(
            config.classification_timeout(),
            Some(Duration::from_millis(DEFAULT_CLASSIFICATION_TIMEOUT_MS))
        );
    }

    #[test]
    fn test_threshold_range() {
        assert!(
            PipelineConfig::default()
                .with_confidence_threshold(100.0)
                .validate()
                .is_ok()
        );
        assert!(
            PipelineConfig::default()
                .with_confidence_threshold(100.5)
                .validate()
                .is_err()
        );
        assert!(
            PipelineConfig::default()
                .with_confidence_threshold(-1.0)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = PipelineConfig::default().with_classification_timeout(Some(Duration::ZERO));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_knowledge_file_rejected() {
        let config = PipelineConfig {
            knowledge_path: Some(PathBuf::from("/no/such/knowledge.json")),
            ..PipelineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::PathNotFound { .. })
        ));
    }

    #[test]
    fn test_from_json_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "model_path": "m.onnx", "confidence_threshold": 70.0 }}"#
        )
        .unwrap();

        let config = PipelineConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.model_path, PathBuf::from("m.onnx"));
        assert_eq!(config.confidence_threshold, 70.0);
        assert_eq!(config.input_size, DEFAULT_INPUT_SIZE);
        assert!(config.history_path.is_none());
    }
}

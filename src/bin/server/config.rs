//! Configuration types for the diagnosis server and CLI.

use clap::Args;
use leafdx::core::PipelineConfig;
use leafdx::core::config::{ConfigError, OrtSessionConfig};
use std::path::PathBuf;
use std::time::Duration;

/// Options shared by every subcommand that loads the pipeline.
#[derive(Args, Debug, Clone)]
pub struct PipelineArgs {
    /// JSON pipeline configuration; flags given on the command line override it
    #[arg(long, env = "LEAFDX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Path to the ONNX leaf classifier
    #[arg(long, env = "LEAFDX_MODEL")]
    pub model: Option<PathBuf>,

    /// Labels file, one raw class name per line in training order
    #[arg(long, env = "LEAFDX_LABELS")]
    pub labels: Option<PathBuf>,

    /// JSON knowledge table (label -> description, remedy)
    #[arg(long, env = "LEAFDX_KNOWLEDGE")]
    pub knowledge: Option<PathBuf>,

    /// Square input size the model was trained with
    #[arg(long = "input-size", env = "LEAFDX_INPUT_SIZE")]
    pub input_size: Option<u32>,

    /// Minimum confidence percentage for a diagnosis (0 disables the gate)
    #[arg(long, env = "LEAFDX_THRESHOLD")]
    pub threshold: Option<f32>,

    /// SQLite database for prediction history
    #[arg(long = "history-db", env = "LEAFDX_HISTORY_DB")]
    pub history_db: Option<PathBuf>,

    /// Classification timeout in seconds (0 waits forever)
    #[arg(long = "timeout-secs", env = "LEAFDX_TIMEOUT_SECS")]
    pub timeout_secs: Option<u64>,

    /// Device to use (cpu, cuda, cuda:0, etc.)
    #[arg(long, default_value = "cpu", env = "LEAFDX_DEVICE")]
    pub device: String,

    /// Number of ONNX sessions for concurrent requests
    #[arg(long = "sessions", env = "LEAFDX_SESSIONS")]
    pub sessions: Option<usize>,

    /// Refuse to start when the model cannot be loaded
    #[arg(long, env = "LEAFDX_STRICT")]
    pub strict: bool,
}

impl PipelineArgs {
    /// Resolves the pipeline configuration: file first, then flags.
    pub fn to_pipeline_config(&self) -> Result<PipelineConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_json_file(path)?,
            None => PipelineConfig::default(),
        };

        if let Some(model) = &self.model {
            config.model_path = model.clone();
        }
        if self.labels.is_some() {
            config.labels_path = self.labels.clone();
        }
        if self.knowledge.is_some() {
            config.knowledge_path = self.knowledge.clone();
        }
        if let Some(size) = self.input_size {
            config.input_size = size;
        }
        if let Some(threshold) = self.threshold {
            config.confidence_threshold = threshold;
        }
        if self.history_db.is_some() {
            config.history_path = self.history_db.clone();
        }
        if let Some(secs) = self.timeout_secs {
            let timeout = (secs > 0).then(|| Duration::from_secs(secs));
            config = config.with_classification_timeout(timeout);
        }
        if let Some(sessions) = self.sessions {
            config.session_pool_size = sessions;
        }
        if let Some(session) = OrtSessionConfig::from_device(&self.device)? {
            config.ort_session = Some(session);
        }
        config.strict_model_load |= self.strict;

        Ok(config)
    }
}

/// Default upload size limit, 16 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Configuration for the HTTP server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub pipeline: PipelineConfig,
    pub host: String,
    pub port: u16,
    pub upload_dir: PathBuf,
    /// Reports are also kept here when set.
    pub report_dir: Option<PathBuf>,
    pub max_upload_bytes: usize,
    /// Lowercase extensions without the dot.
    pub allowed_extensions: Vec<String>,
    /// Uploads and kept reports older than this are deleted. `None` keeps them.
    pub retention: Option<Duration>,
}

impl ServerConfig {
    pub fn is_allowed(&self, filename: &str) -> bool {
        filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .is_some_and(|ext| self.allowed_extensions.iter().any(|a| *a == ext))
    }

    /// Upload limit in whole megabytes, for error messages.
    pub fn max_upload_megabytes(&self) -> usize {
        self.max_upload_bytes / (1024 * 1024)
    }
}

//! Core error types for the diagnosis pipeline.
//!
//! This module defines the error enum shared by every pipeline component and
//! the [`ProcessingStage`] used to say where a failure happened. Callers branch
//! on the variant, never on a sentinel string.

use std::time::Duration;
use thiserror::Error;

/// Stages of the diagnosis pipeline, used as context in errors and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStage {
    /// Decoding the uploaded bytes into an image.
    Decode,
    /// Resizing and scaling the image into a tensor.
    Normalization,
    /// Running the classifier.
    Classification,
    /// Writing a prediction to the history store.
    History,
    /// Rendering the PDF report.
    Report,
}

impl std::fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessingStage::Decode => write!(f, "decode"),
            ProcessingStage::Normalization => write!(f, "normalization"),
            ProcessingStage::Classification => write!(f, "classification"),
            ProcessingStage::History => write!(f, "history"),
            ProcessingStage::Report => write!(f, "report"),
        }
    }
}

/// Errors that can occur in the diagnosis pipeline.
///
/// `ModelUnavailable` and `ReportRender` are the only kinds the pipeline lets
/// escape to callers; the others are folded into an inconclusive verdict (or,
/// for history, logged and dropped) at the pipeline boundary.
#[derive(Error, Debug)]
pub enum DiagnosisError {
    /// The input could not be decoded as an image.
    #[error("input decode failed: {context}")]
    InputDecode {
        /// What was being decoded.
        context: String,
        /// The decoder error.
        #[source]
        source: image::ImageError,
    },

    /// The classifier model is not loaded.
    #[error("model unavailable: {reason}")]
    ModelUnavailable {
        /// Why the model could not be loaded.
        reason: String,
    },

    /// The classifier did not answer in time.
    #[error("classification timed out after {}ms", timeout.as_millis())]
    ClassificationTimeout {
        /// The configured bound.
        timeout: Duration,
    },

    /// The classifier ran but produced unusable output.
    #[error("inference failed in model '{model_name}': {context}")]
    Inference {
        /// Model that failed.
        model_name: String,
        /// Additional context.
        context: String,
        /// Underlying error, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The history store could not persist a record.
    #[error("history write failed: {context}")]
    HistoryWrite {
        /// What was being written.
        context: String,
        /// Underlying storage error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A report could not be produced.
    #[error("report render failed: {message}")]
    ReportRender {
        /// Name of the offending field, if the record was incomplete.
        field: Option<String>,
        /// Description of the failure.
        message: String,
    },

    /// Invalid configuration or a violated startup invariant.
    #[error("configuration: {message}")]
    Config {
        /// A message describing the configuration problem.
        message: String,
    },

    /// Error from the ONNX Runtime session.
    #[error(transparent)]
    Session(#[from] ort::Error),

    /// Error from tensor construction.
    #[error("tensor operation")]
    Tensor(#[from] ndarray::ShapeError),

    /// IO error.
    #[error("io")]
    Io(#[from] std::io::Error),
}

impl From<crate::core::config::ConfigError> for DiagnosisError {
    fn from(error: crate::core::config::ConfigError) -> Self {
        Self::Config {
            message: error.to_string(),
        }
    }
}

impl DiagnosisError {
    /// Creates a configuration error with context and details.
    ///
    /// ```rust
    /// # use leafdx::core::DiagnosisError;
    /// let err = DiagnosisError::config_error_detailed(
    ///     "vocabulary",
    ///     "model declares 37 classes but 38 labels are configured",
    /// );
    /// assert!(matches!(err, DiagnosisError::Config { .. }));
    /// ```
    pub fn config_error_detailed(context: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Config {
            message: format!("{}: {}", context.into(), details.into()),
        }
    }

    /// Creates a configuration error for an invalid field value.
    pub fn invalid_field(
        field: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::Config {
            message: format!(
                "invalid value for field '{}': expected {}, got {}",
                field.into(),
                expected.into(),
                actual.into()
            ),
        }
    }

    /// Wraps an image decoding error.
    pub fn input_decode(context: impl Into<String>, source: image::ImageError) -> Self {
        Self::InputDecode {
            context: context.into(),
            source,
        }
    }

    /// Creates an inference error without an underlying source.
    pub fn inference(model_name: impl Into<String>, context: impl Into<String>) -> Self {
        Self::Inference {
            model_name: model_name.into(),
            context: context.into(),
            source: None,
        }
    }

    /// Creates an inference error that wraps its cause.
    pub fn inference_with_source(
        model_name: impl Into<String>,
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Inference {
            model_name: model_name.into(),
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Wraps a storage failure from the history store.
    pub fn history_write(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::HistoryWrite {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Report rejected because a required field is missing or invalid.
    pub fn missing_report_field(field: impl Into<String>) -> Self {
        let field = field.into();
        Self::ReportRender {
            message: format!("missing required field '{field}'"),
            field: Some(field),
        }
    }

    /// A report field is too long to fit on the page.
    pub fn report_overflow(field: impl Into<String>, lines: usize, available: usize) -> Self {
        let field = field.into();
        Self::ReportRender {
            message: format!(
                "field '{field}' needs {lines} lines but only {available} fit on the page"
            ),
            field: Some(field),
        }
    }

    /// Report failed while encoding the document.
    pub fn report_encoding(message: impl Into<String>) -> Self {
        Self::ReportRender {
            field: None,
            message: message.into(),
        }
    }

    /// The stage this error belongs to, for structured logging.
    pub fn stage(&self) -> Option<ProcessingStage> {
        match self {
            Self::InputDecode { .. } => Some(ProcessingStage::Decode),
            Self::Tensor(_) => Some(ProcessingStage::Normalization),
            Self::ModelUnavailable { .. }
            | Self::ClassificationTimeout { .. }
            | Self::Inference { .. }
            | Self::Session(_) => Some(ProcessingStage::Classification),
            Self::HistoryWrite { .. } => Some(ProcessingStage::History),
            Self::ReportRender { .. } => Some(ProcessingStage::Report),
            Self::Config { .. } | Self::Io(_) => None,
        }
    }
}

/// Result alias used throughout the crate.
pub type DiagnosisResult<T> = Result<T, DiagnosisError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_mapping() {
        let err = DiagnosisError::ClassificationTimeout {
            timeout: Duration::from_millis(250),
        };
        assert_eq!(err.stage(), Some(ProcessingStage::Classification));
        assert_eq!(err.to_string(), "classification timed out after 250ms");

        let err = DiagnosisError::missing_report_field("remedy");
        assert_eq!(err.stage(), Some(ProcessingStage::Report));
        assert!(matches!(
            err,
            DiagnosisError::ReportRender { field: Some(ref f), .. } if f == "remedy"
        ));
    }

    #[test]
    fn test_invalid_field_message() {
        let err = DiagnosisError::invalid_field("input_size", "a positive size", "0");
        assert_eq!(
            err.to_string(),
            "configuration: invalid value for field 'input_size': expected a positive size, got 0"
        );
    }
}

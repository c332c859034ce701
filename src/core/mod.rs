//! The core module of the diagnosis pipeline.
//!
//! This module contains the pieces every other component builds on:
//! - Configuration management and validation
//! - Error handling
//! - ONNX Runtime integration
//! - The trait seam for the opaque classifier model

pub mod config;
pub mod errors;
pub mod inference;
pub mod traits;

pub use config::{ConfigError, ConfigValidator, OrtSessionConfig, PipelineConfig};
pub use errors::{DiagnosisError, DiagnosisResult, ProcessingStage};
pub use inference::OrtInfer;
pub use traits::ProbabilityModel;

/// A batch of images in NHWC layout, `[batch, height, width, channels]`.
pub type Tensor4D = ndarray::Array4<f32>;

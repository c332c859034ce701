//! Configuration management for the diagnosis pipeline.
//!
//! This module provides configuration types, validation traits, and the
//! macros used to implement validation on configuration structs.

pub mod derive;
pub mod errors;
pub mod onnx;
pub mod pipeline;

pub use errors::{ConfigError, ConfigValidator};
pub use onnx::{OrtExecutionProvider, OrtGraphOptimizationLevel, OrtSessionConfig};
pub use pipeline::{
    DEFAULT_CLASSIFICATION_TIMEOUT_MS, DEFAULT_INPUT_SIZE, DEFAULT_MODEL_PATH, PipelineConfig,
};

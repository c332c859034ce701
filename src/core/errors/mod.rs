//! Error handling for the diagnosis pipeline.

mod types;

pub use types::{DiagnosisError, DiagnosisResult, ProcessingStage};

//! # leafdx
//!
//! Plant leaf disease diagnosis with an ONNX image classifier.
//!
//! A photograph of a single leaf is normalized, classified into one of a fixed
//! set of crop/condition classes, gated by a confidence threshold and paired
//! with a description and remedy. Results can be recorded in a SQLite history
//! and exported as a one-page PDF report.
//!
//! ## Modules
//!
//! * [`core`] - Configuration, errors, ONNX Runtime integration and the model trait
//! * [`domain`] - Class vocabulary, result policy and knowledge table
//! * [`models`] - The leaf classifier adapter
//! * [`processors`] - Image normalization
//! * [`history`] - Prediction history persistence
//! * [`report`] - PDF report rendering
//! * [`pipeline`] - The end-to-end diagnosis pipeline
//! * [`utils`] - Logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use leafdx::prelude::*;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::new("models/mobilenetv2.onnx")
//!     .with_confidence_threshold(70.0)
//!     .with_history_path("predictions.db");
//! let pipeline = DiagnosisPipeline::from_config(&config)?;
//!
//! let diagnosis = pipeline.diagnose_path(Path::new("leaf.jpg"))?;
//! match &diagnosis.verdict {
//!     Verdict::Diagnosed { label, confidence_percent } => {
//!         println!("{label} ({confidence_percent:.2}%)");
//!         println!("Remedy: {}", diagnosis.knowledge.remedy);
//!     }
//!     Verdict::Inconclusive => println!("No confident diagnosis"),
//! }
//!
//! let record = pipeline.report_record(&diagnosis, Some("leaf.jpg".into()));
//! let pdf = ReportRenderer::new().render(&record)?;
//! std::fs::write("report.pdf", pdf)?;
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod domain;
pub mod history;
pub mod models;
pub mod pipeline;
pub mod processors;
pub mod report;
pub mod utils;

/// Commonly used types.
pub mod prelude {
    pub use crate::core::{DiagnosisError, DiagnosisResult, PipelineConfig, ProbabilityModel};
    pub use crate::domain::{
        ClassVocabulary, KnowledgeEntry, KnowledgeTable, PredictionResult, ResultPolicy, Verdict,
    };
    pub use crate::history::{HistoryStore, SqliteHistoryStore};
    pub use crate::models::{Classification, LeafClassifier};
    pub use crate::pipeline::{Diagnosis, DiagnosisPipeline, FailureKind};
    pub use crate::processors::ImageNormalizer;
    pub use crate::report::{ReportRecord, ReportRenderer};
}

//! Diagnosis logic shared between CLI and server modes.

use leafdx::core::DiagnosisError;
use leafdx::domain::Verdict;
use leafdx::pipeline::{Diagnosis, FailureKind};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServeError {
    #[error("No file part in the request")]
    MissingFile,

    #[error("No file selected")]
    EmptyFilename,

    #[error("File type not allowed. Allowed types: {0}")]
    UnsupportedType(String),

    #[error("File is too large. Maximum size is {0}MB")]
    TooLarge(usize),

    #[error("Invalid upload: {0}")]
    Upload(String),

    #[error("Missing or invalid field: {0}")]
    MissingField(&'static str),

    #[error("Model is not available: {0}")]
    ModelUnavailable(String),

    #[error("Diagnosis failed: {0}")]
    Pipeline(DiagnosisError),

    #[error("Worker task failed: {0}")]
    Join(String),

    #[error("Failed to store upload: {0}")]
    Io(#[from] std::io::Error),
}

impl From<DiagnosisError> for ServeError {
    fn from(error: DiagnosisError) -> Self {
        match error {
            DiagnosisError::ModelUnavailable { reason } => ServeError::ModelUnavailable(reason),
            other => ServeError::Pipeline(other),
        }
    }
}

/// The verdict record returned to callers.
#[derive(Debug, Serialize)]
pub struct DiagnosisResponse {
    pub success: bool,
    /// `diagnosed` or `inconclusive`.
    pub verdict: &'static str,
    pub label: String,
    /// Percent, two decimals.
    pub confidence: f32,
    /// `-1` when the prediction failed.
    pub class_index: i64,
    pub description: String,
    pub remedy: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<f64>,
}

impl DiagnosisResponse {
    pub fn from_diagnosis(
        diagnosis: &Diagnosis,
        image: Option<String>,
        processing_time_ms: f64,
    ) -> Self {
        Self {
            success: diagnosis.failure.is_none(),
            verdict: match diagnosis.verdict {
                Verdict::Diagnosed { .. } => "diagnosed",
                Verdict::Inconclusive => "inconclusive",
            },
            label: diagnosis.prediction.label.clone(),
            confidence: diagnosis.prediction.confidence,
            class_index: diagnosis.prediction.class_index_or_sentinel(),
            description: diagnosis.knowledge.description.clone(),
            remedy: diagnosis.knowledge.remedy.clone(),
            image,
            failure: diagnosis.failure,
            error: None,
            processing_time_ms: Some(processing_time_ms),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            verdict: "inconclusive",
            label: leafdx::domain::FAILED_LABEL.to_string(),
            confidence: 0.0,
            class_index: leafdx::domain::FAILED_CLASS_INDEX,
            description: String::new(),
            remedy: String::new(),
            image: None,
            failure: None,
            error: Some(message),
            processing_time_ms: None,
        }
    }
}

/// Reduces a client-supplied file name to a safe single path component.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leafdx::domain::{KnowledgeEntry, PredictionResult};

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("leaf.jpg"), "leaf.jpg");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\Users\\me\\my leaf.png"), "my_leaf.png");
        assert_eq!(sanitize_filename(".hidden.png"), "hidden.png");
        assert_eq!(sanitize_filename("..."), "upload");
        assert_eq!(sanitize_filename(""), "upload");
    }

    #[test]
    fn test_response_for_failure() {
        let diagnosis = Diagnosis {
            prediction: PredictionResult::failed(),
            verdict: Verdict::Inconclusive,
            knowledge: KnowledgeEntry::fallback(),
            failure: Some(FailureKind::InputDecode),
        };
        let response = DiagnosisResponse::from_diagnosis(&diagnosis, None, 1.5);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["class_index"], -1);
        assert_eq!(json["failure"], "input_decode");
        assert_eq!(json["label"], "Prediction Failed");
        assert!(json.get("image").is_none());
    }

    #[test]
    fn test_model_unavailable_maps_to_its_own_variant() {
        let err: ServeError = DiagnosisError::ModelUnavailable {
            reason: "missing".into(),
        }
        .into();
        assert!(matches!(err, ServeError::ModelUnavailable(_)));
    }
}

//! Confidence-gated result policy.
//!
//! Turns a raw classification (class index plus a `[0, 1]` probability) into
//! the record callers see. This is the only place confidence changes scale.

use crate::core::DiagnosisError;
use crate::domain::vocabulary::ClassVocabulary;
use serde::{Serialize, Serializer};
use std::sync::Arc;

/// Class index reported for a failed prediction.
pub const FAILED_CLASS_INDEX: i64 = -1;

/// Label reported for a failed prediction.
pub const FAILED_LABEL: &str = "Prediction Failed";

/// A prediction as shown to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    /// Decoded display label, or [`FAILED_LABEL`].
    pub label: String,
    /// Confidence in percent, `[0, 100]`, two decimals.
    pub confidence: f32,
    /// Winning class, `None` when the prediction failed.
    #[serde(serialize_with = "serialize_class_index")]
    pub class_index: Option<usize>,
}

impl PredictionResult {
    /// The failure sentinel.
    pub fn failed() -> Self {
        Self {
            label: FAILED_LABEL.to_string(),
            confidence: 0.0,
            class_index: None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.class_index.is_none()
    }

    /// Class index with the failure sentinel folded in.
    pub fn class_index_or_sentinel(&self) -> i64 {
        self.class_index
            .map(|i| i as i64)
            .unwrap_or(FAILED_CLASS_INDEX)
    }
}

fn serialize_class_index<S: Serializer>(
    index: &Option<usize>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match index {
        Some(i) => serializer.serialize_u64(*i as u64),
        None => serializer.serialize_i64(FAILED_CLASS_INDEX),
    }
}

/// Outcome of applying the policy.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Verdict {
    /// A usable diagnosis.
    Diagnosed {
        label: String,
        confidence_percent: f32,
    },
    /// No diagnosis: the prediction failed or fell below the threshold.
    Inconclusive,
}

impl Verdict {
    pub fn is_diagnosed(&self) -> bool {
        matches!(self, Verdict::Diagnosed { .. })
    }
}

/// A prediction together with its verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub prediction: PredictionResult,
    pub verdict: Verdict,
}

/// Decides between a diagnosis and an inconclusive verdict.
///
/// With a threshold of `0` every successful prediction is diagnosed. Otherwise
/// a prediction is diagnosed when its percent confidence is at least the
/// threshold.
#[derive(Debug, Clone)]
pub struct ResultPolicy {
    vocabulary: Arc<ClassVocabulary>,
    threshold: f32,
}

impl ResultPolicy {
    /// Creates a policy over `vocabulary` with a threshold in percent.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the threshold is outside `[0, 100]`.
    pub fn new(vocabulary: Arc<ClassVocabulary>, threshold: f32) -> Result<Self, DiagnosisError> {
        if !(0.0..=100.0).contains(&threshold) {
            return Err(DiagnosisError::invalid_field(
                "confidence_threshold",
                "a percentage between 0 and 100",
                threshold.to_string(),
            ));
        }
        Ok(Self {
            vocabulary,
            threshold,
        })
    }

    /// Threshold in percent.
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn vocabulary(&self) -> &ClassVocabulary {
        &self.vocabulary
    }

    /// Applies the policy to a classification.
    ///
    /// An absent or out-of-range index, or a non-finite confidence, is a
    /// failed prediction and always inconclusive.
    pub fn decide(&self, class_index: Option<usize>, confidence: f32) -> Decision {
        let decoded = class_index
            .filter(|_| confidence.is_finite())
            .and_then(|idx| self.vocabulary.decode(idx).map(|label| (idx, label)));

        let Some((index, label)) = decoded else {
            return Decision {
                prediction: PredictionResult::failed(),
                verdict: Verdict::Inconclusive,
            };
        };

        // The gate sees the same rounded percent the caller is shown.
        let percent = to_percent(confidence);
        let prediction = PredictionResult {
            label: label.to_string(),
            confidence: percent,
            class_index: Some(index),
        };

        let verdict = if percent >= self.threshold {
            Verdict::Diagnosed {
                label: prediction.label.clone(),
                confidence_percent: percent,
            }
        } else {
            Verdict::Inconclusive
        };

        Decision {
            prediction,
            verdict,
        }
    }
}

/// `[0, 1]` probability to percent rounded to two decimals.
fn to_percent(confidence: f32) -> f32 {
    let percent = (confidence.clamp(0.0, 1.0) as f64) * 100.0;
    ((percent * 100.0).round() / 100.0) as f32
}

//! The diagnosis pipeline.
//!
//! ```text
//! bytes -> ImageNormalizer -> LeafClassifier -> ResultPolicy -> KnowledgeTable
//!                                                     |
//!                                                     +-> HistoryStore (optional)
//! ```
//!
//! A [`DiagnosisPipeline`] is built once and shared by reference. Per-request
//! failures (undecodable input, a slow or broken model call) become an
//! inconclusive [`Diagnosis`]. Only a missing model is returned as an error,
//! since it affects every request.

use crate::core::{
    ConfigValidator, DiagnosisError, OrtInfer, PipelineConfig, ProbabilityModel, Tensor4D,
};
use crate::domain::{
    ClassVocabulary, KnowledgeEntry, KnowledgeTable, PredictionResult, ResultPolicy, Verdict,
};
use crate::history::{HistoryStore, SqliteHistoryStore};
use crate::models::LeafClassifier;
use crate::processors::ImageNormalizer;
use crate::report::ReportRecord;
use image::DynamicImage;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Why a diagnosis is inconclusive without a usable prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The input was not a decodable image.
    InputDecode,
    /// The classifier exceeded its time bound.
    ClassificationTimeout,
    /// The classifier failed or produced unusable output.
    Inference,
}

impl FailureKind {
    fn from_error(error: &DiagnosisError) -> Self {
        match error {
            DiagnosisError::InputDecode { .. } => FailureKind::InputDecode,
            DiagnosisError::ClassificationTimeout { .. } => FailureKind::ClassificationTimeout,
            _ => FailureKind::Inference,
        }
    }
}

/// Result of diagnosing one image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnosis {
    pub prediction: PredictionResult,
    pub verdict: Verdict,
    pub knowledge: KnowledgeEntry,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

/// Normalize, classify, decide and look up, for one image at a time.
pub struct DiagnosisPipeline {
    normalizer: ImageNormalizer,
    classifier: LeafClassifier,
    policy: ResultPolicy,
    knowledge: KnowledgeTable,
    history: Option<Arc<dyn HistoryStore>>,
}

impl std::fmt::Debug for DiagnosisPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosisPipeline")
            .field("normalizer", &self.normalizer)
            .field("classifier", &self.classifier)
            .field("threshold", &self.policy.threshold())
            .field("knowledge_entries", &self.knowledge.len())
            .field("history", &self.history.is_some())
            .finish()
    }
}

impl DiagnosisPipeline {
    /// Assembles a pipeline from ready components.
    ///
    /// The classifier must have been built for the policy's vocabulary.
    pub fn new(
        normalizer: ImageNormalizer,
        classifier: LeafClassifier,
        policy: ResultPolicy,
        knowledge: KnowledgeTable,
    ) -> Result<Self, DiagnosisError> {
        let labels = policy.vocabulary().len();
        if classifier.num_classes() != labels {
            return Err(DiagnosisError::config_error_detailed(
                "vocabulary",
                format!(
                    "classifier has {} classes but the vocabulary has {labels} labels",
                    classifier.num_classes()
                ),
            ));
        }

        for label in knowledge.unknown_labels(policy.vocabulary()) {
            warn!(label, "knowledge entry matches no class label and will never be used");
        }

        Ok(Self {
            normalizer,
            classifier,
            policy,
            knowledge,
            history: None,
        })
    }

    /// Builds the pipeline described by `config`.
    ///
    /// A model that cannot be loaded fails the call in strict mode and yields
    /// a degraded pipeline otherwise. Vocabulary or input size mismatches
    /// always fail.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, DiagnosisError> {
        config.validate()?;

        let vocabulary = Arc::new(match &config.labels_path {
            Some(path) => ClassVocabulary::from_labels_file(path)?,
            None => ClassVocabulary::plant_village(),
        });
        let knowledge = match &config.knowledge_path {
            Some(path) => KnowledgeTable::from_json_file(path)?,
            None => KnowledgeTable::builtin(),
        };

        let classifier = match OrtInfer::new(
            &config.model_path,
            config.session_pool_size,
            config.ort_session.as_ref(),
        ) {
            Ok(model) => {
                let model: Arc<dyn ProbabilityModel> = Arc::new(model);
                LeafClassifier::new(model, vocabulary.len(), config.input_size)?
            }
            Err(DiagnosisError::ModelUnavailable { reason }) if !config.strict_model_load => {
                warn!(%reason, "classifier unavailable, predictions will be refused");
                LeafClassifier::unavailable(reason, vocabulary.len())
            }
            Err(e) => return Err(e),
        }
        .with_timeout(config.classification_timeout())
        .with_max_workers(config.session_pool_size);

        let mut pipeline = Self::new(
            ImageNormalizer::new(config.input_size)?,
            classifier,
            ResultPolicy::new(vocabulary, config.confidence_threshold)?,
            knowledge,
        )?;

        if let Some(path) = &config.history_path {
            pipeline = pipeline.with_history(Arc::new(SqliteHistoryStore::open(path)?));
        }

        info!(
            model = %config.model_path.display(),
            model_loaded = pipeline.model_available(),
            classes = pipeline.vocabulary().len(),
            input_size = config.input_size,
            threshold = config.confidence_threshold,
            history = pipeline.history.is_some(),
            "diagnosis pipeline ready"
        );

        Ok(pipeline)
    }

    /// Records successful predictions in `store`.
    pub fn with_history(mut self, store: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(store);
        self
    }

    pub fn model_available(&self) -> bool {
        self.classifier.is_available()
    }

    pub fn vocabulary(&self) -> &ClassVocabulary {
        self.policy.vocabulary()
    }

    pub fn knowledge(&self) -> &KnowledgeTable {
        &self.knowledge
    }

    pub fn normalizer(&self) -> &ImageNormalizer {
        &self.normalizer
    }

    /// Diagnoses encoded image bytes.
    pub fn diagnose_bytes(&self, bytes: &[u8]) -> Result<Diagnosis, DiagnosisError> {
        self.ensure_model()?;
        self.run(self.normalizer.normalize(bytes))
    }

    /// Diagnoses the image file at `path`.
    pub fn diagnose_path(&self, path: &Path) -> Result<Diagnosis, DiagnosisError> {
        self.ensure_model()?;
        self.run(self.normalizer.normalize_path(path))
    }

    /// Diagnoses an already decoded image.
    pub fn diagnose_image(&self, image: &DynamicImage) -> Result<Diagnosis, DiagnosisError> {
        self.ensure_model()?;
        self.run(self.normalizer.normalize_image(image))
    }

    /// Report contents for a finished diagnosis.
    pub fn report_record(&self, diagnosis: &Diagnosis, image: Option<PathBuf>) -> ReportRecord {
        ReportRecord {
            image,
            ..ReportRecord::new(diagnosis.prediction.clone(), diagnosis.knowledge.clone())
        }
    }

    /// Report contents for a label and confidence supplied by a caller.
    ///
    /// Description and remedy always come from the knowledge table.
    pub fn rebuild_report_record(
        &self,
        label: &str,
        confidence: f32,
        image: Option<PathBuf>,
    ) -> ReportRecord {
        let prediction = PredictionResult {
            label: label.to_string(),
            confidence,
            class_index: self.vocabulary().index_of(label),
        };
        ReportRecord {
            image,
            ..ReportRecord::new(prediction, self.knowledge.lookup(label))
        }
    }

    fn ensure_model(&self) -> Result<(), DiagnosisError> {
        match self.classifier.unavailable_reason() {
            Some(reason) => Err(DiagnosisError::ModelUnavailable {
                reason: reason.to_string(),
            }),
            None => Ok(()),
        }
    }

    fn run(&self, tensor: Result<Tensor4D, DiagnosisError>) -> Result<Diagnosis, DiagnosisError> {
        let start = Instant::now();
        let classification = tensor.and_then(|t| self.classifier.classify(&t));

        let (decision, failure) = match classification {
            Ok(c) => (self.policy.decide(Some(c.index), c.confidence), None),
            Err(e @ DiagnosisError::ModelUnavailable { .. }) => return Err(e),
            Err(e) => {
                let kind = FailureKind::from_error(&e);
                warn!(
                    error = %e,
                    stage = ?e.stage(),
                    failure = ?kind,
                    "prediction failed"
                );
                (self.policy.decide(None, 0.0), Some(kind))
            }
        };

        if let (None, Some(history)) = (failure, &self.history) {
            let prediction = &decision.prediction;
            if let Err(e) = history.append(&prediction.label, prediction.confidence) {
                warn!(error = %e, label = %prediction.label, "failed to record prediction history");
            }
        }

        let knowledge = self.knowledge.lookup(&decision.prediction.label);

        info!(
            label = %decision.prediction.label,
            confidence = decision.prediction.confidence,
            diagnosed = decision.verdict.is_diagnosed(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "diagnosis complete"
        );

        Ok(Diagnosis {
            prediction: decision.prediction,
            verdict: decision.verdict,
            knowledge,
            failure,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FAILED_LABEL, knowledge::FALLBACK_DESCRIPTION};
    use image::{Rgb, RgbImage};
    use std::io::Cursor;
    use std::sync::Mutex;

    struct PeakModel {
        index: usize,
        confidence: f32,
    }

    impl ProbabilityModel for PeakModel {
        fn name(&self) -> &str {
            "peak"
        }

        fn num_classes(&self) -> Option<usize> {
            Some(38)
        }

        fn input_size(&self) -> Option<(u32, u32)> {
            None
        }

        fn predict(&self, _input: &Tensor4D) -> Result<Vec<f32>, DiagnosisError> {
            let rest = (1.0 - self.confidence) / 37.0;
            let mut probabilities = vec![rest; 38];
            probabilities[self.index] = self.confidence;
            Ok(probabilities)
        }
    }

    #[derive(Default)]
    struct RecordingHistory {
        calls: Mutex<Vec<(String, f32)>>,
        fail: bool,
    }

    impl HistoryStore for RecordingHistory {
        fn append(&self, label: &str, confidence: f32) -> Result<(), DiagnosisError> {
            self.calls
                .lock()
                .unwrap()
                .push((label.to_string(), confidence));
            if self.fail {
                return Err(DiagnosisError::history_write(
                    "disk full",
                    std::io::Error::other("disk full"),
                ));
            }
            Ok(())
        }
    }

    fn pipeline(model: PeakModel, threshold: f32) -> DiagnosisPipeline {
        let vocabulary = Arc::new(ClassVocabulary::plant_village());
        DiagnosisPipeline::new(
            ImageNormalizer::new(16).unwrap(),
            LeafClassifier::new(Arc::new(model), vocabulary.len(), 16).unwrap(),
            ResultPolicy::new(vocabulary, threshold).unwrap(),
            KnowledgeTable::builtin(),
        )
        .unwrap()
    }

    fn leaf_png() -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::from_pixel(20, 20, Rgb([40, 140, 30])))
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_confident_prediction_is_diagnosed() {
        let history = Arc::new(RecordingHistory::default());
        let pipeline = pipeline(
            PeakModel {
                index: 3,
                confidence: 0.95,
            },
            70.0,
        )
        .with_history(history.clone());

        let diagnosis = pipeline.diagnose_bytes(&leaf_png()).unwrap();

        assert_eq!(
            diagnosis.verdict,
            Verdict::Diagnosed {
                label: "Apple - healthy".to_string(),
                confidence_percent: 95.0,
            }
        );
        assert_eq!(diagnosis.prediction.class_index, Some(3));
        assert_eq!(diagnosis.knowledge, KnowledgeEntry::fallback());
        assert_eq!(diagnosis.failure, None);
        assert_eq!(
            *history.calls.lock().unwrap(),
            vec![("Apple - healthy".to_string(), 95.0)]
        );
    }

    #[test]
    fn test_undecodable_input_is_inconclusive_without_history() {
        let history = Arc::new(RecordingHistory::default());
        let pipeline = pipeline(
            PeakModel {
                index: 1,
                confidence: 0.99,
            },
            0.0,
        )
        .with_history(history.clone());

        let diagnosis = pipeline.diagnose_bytes(b"GIF89a-but-not-really").unwrap();

        assert_eq!(diagnosis.verdict, Verdict::Inconclusive);
        assert_eq!(diagnosis.failure, Some(FailureKind::InputDecode));
        assert_eq!(diagnosis.prediction.label, FAILED_LABEL);
        assert_eq!(diagnosis.prediction.class_index, None);
        assert_eq!(diagnosis.knowledge.description, FALLBACK_DESCRIPTION);
        assert!(history.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_known_label_gets_knowledge() {
        let pipeline = pipeline(
            PeakModel {
                index: 1,
                confidence: 0.8,
            },
            0.0,
        );
        let diagnosis = pipeline
            .diagnose_image(&DynamicImage::ImageRgb8(RgbImage::new(5, 5)))
            .unwrap();
        assert_eq!(diagnosis.prediction.label, "Apple - Black rot");
        assert!(diagnosis.knowledge.description.starts_with("Black rot"));
    }

    #[test]
    fn test_below_threshold_is_inconclusive_but_recorded() {
        let history = Arc::new(RecordingHistory::default());
        let pipeline = pipeline(
            PeakModel {
                index: 20,
                confidence: 0.5,
            },
            70.0,
        )
        .with_history(history.clone());

        let diagnosis = pipeline.diagnose_bytes(&leaf_png()).unwrap();
        assert_eq!(diagnosis.verdict, Verdict::Inconclusive);
        assert_eq!(diagnosis.failure, None);
        assert_eq!(diagnosis.prediction.label, "Potato - Early blight");
        assert_eq!(history.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_history_failure_does_not_fail_prediction() {
        let history = Arc::new(RecordingHistory {
            fail: true,
            ..RecordingHistory::default()
        });
        let pipeline = pipeline(
            PeakModel {
                index: 3,
                confidence: 0.9,
            },
            0.0,
        )
        .with_history(history.clone());

        let diagnosis = pipeline.diagnose_bytes(&leaf_png()).unwrap();
        assert!(diagnosis.verdict.is_diagnosed());
        assert_eq!(history.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_unavailable_model_is_an_error() {
        let vocabulary = Arc::new(ClassVocabulary::plant_village());
        let pipeline = DiagnosisPipeline::new(
            ImageNormalizer::new(16).unwrap(),
            LeafClassifier::unavailable("model file not found", vocabulary.len()),
            ResultPolicy::new(vocabulary, 0.0).unwrap(),
            KnowledgeTable::builtin(),
        )
        .unwrap();

        assert!(!pipeline.model_available());
        // Refused before the input is even looked at.
        assert!(matches!(
            pipeline.diagnose_bytes(b"not an image"),
            Err(DiagnosisError::ModelUnavailable { .. })
        ));
    }

    #[test]
    fn test_from_config_degrades_without_model() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::new(dir.path().join("missing.onnx"))
            .with_history_path(dir.path().join("history.db"));
        let pipeline = DiagnosisPipeline::from_config(&config).unwrap();
        assert!(!pipeline.model_available());
        assert_eq!(pipeline.vocabulary().len(), 38);

        let strict = PipelineConfig {
            strict_model_load: true,
            ..config
        };
        assert!(matches!(
            DiagnosisPipeline::from_config(&strict),
            Err(DiagnosisError::ModelUnavailable { .. })
        ));
    }

    #[test]
    fn test_rebuild_report_record_uses_knowledge_table() {
        let pipeline = pipeline(
            PeakModel {
                index: 1,
                confidence: 0.9,
            },
            0.0,
        );
        let record = pipeline.rebuild_report_record("Apple - Black rot", 91.5, None);
        assert_eq!(record.prediction.class_index, Some(1));
        assert!(record.knowledge.remedy.starts_with("Remove infected leaves"));

        let record = pipeline.rebuild_report_record("Mystery leaf", 12.0, Some("x.png".into()));
        assert_eq!(record.prediction.class_index, None);
        assert_eq!(record.knowledge, KnowledgeEntry::fallback());
        assert_eq!(record.image, Some(PathBuf::from("x.png")));
    }

    #[test]
    fn test_diagnosis_serialization() {
        let pipeline = pipeline(
            PeakModel {
                index: 3,
                confidence: 0.95,
            },
            0.0,
        );
        let diagnosis = pipeline.diagnose_bytes(b"nope").unwrap();
        let json = serde_json::to_value(&diagnosis).unwrap();
        assert_eq!(json["failure"], "input_decode");
        assert_eq!(json["prediction"]["class_index"], -1);
        assert_eq!(json["verdict"]["status"], "inconclusive");
    }
}

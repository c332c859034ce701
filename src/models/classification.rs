//! Leaf classifier adapter.
//!
//! Wraps an opaque [`ProbabilityModel`] and reduces its probability vector to
//! a single class index and confidence.

use crate::core::{DiagnosisError, ProbabilityModel, Tensor4D};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Winning class of one classification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    /// Index into the class vocabulary.
    pub index: usize,
    /// Probability of the winning class, `[0, 1]`.
    pub confidence: f32,
}

enum Backend {
    Ready(Arc<dyn ProbabilityModel>),
    Unavailable(String),
}

/// Classifies normalized leaf images.
pub struct LeafClassifier {
    backend: Backend,
    num_classes: usize,
    timeout: Option<Duration>,
    workers: WorkerLimit,
}

impl std::fmt::Debug for LeafClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backend = match &self.backend {
            Backend::Ready(model) => format!("ready({})", model.name()),
            Backend::Unavailable(reason) => format!("unavailable({reason})"),
        };
        f.debug_struct("LeafClassifier")
            .field("backend", &backend)
            .field("num_classes", &self.num_classes)
            .field("timeout", &self.timeout)
            .field("max_workers", &self.workers.max)
            .finish()
    }
}

impl LeafClassifier {
    /// Wraps a loaded model.
    ///
    /// The model's declared class count must equal `num_classes` (the
    /// vocabulary length) and its declared static input size, if any, must
    /// equal `input_size`. A mismatch would silently mislabel every
    /// prediction, so it is rejected here.
    pub fn new(
        model: Arc<dyn ProbabilityModel>,
        num_classes: usize,
        input_size: u32,
    ) -> Result<Self, DiagnosisError> {
        if let Some(declared) = model.num_classes().filter(|&n| n != num_classes) {
            return Err(DiagnosisError::config_error_detailed(
                "vocabulary",
                format!(
                    "model '{}' declares {declared} classes but {num_classes} labels are configured",
                    model.name()
                ),
            ));
        }

        if let Some((h, w)) = model
            .input_size()
            .filter(|&(h, w)| h != input_size || w != input_size)
        {
            return Err(DiagnosisError::config_error_detailed(
                "input_size",
                format!(
                    "model '{}' expects {h}x{w} images but input_size is {input_size}",
                    model.name()
                ),
            ));
        }

        Ok(Self {
            backend: Backend::Ready(model),
            num_classes,
            timeout: None,
            workers: WorkerLimit::new(1),
        })
    }

    /// A classifier whose model failed to load. Every call returns
    /// [`DiagnosisError::ModelUnavailable`].
    pub fn unavailable(reason: impl Into<String>, num_classes: usize) -> Self {
        Self {
            backend: Backend::Unavailable(reason.into()),
            num_classes,
            timeout: None,
            workers: WorkerLimit::new(1),
        }
    }

    /// Bounds every model call. `None` waits indefinitely.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Caps the worker threads alive at once when a timeout is set.
    ///
    /// Usually the session pool size. Once every worker is stuck in the
    /// model, further calls fail with
    /// [`DiagnosisError::ClassificationTimeout`] without starting a thread.
    pub fn with_max_workers(mut self, max: usize) -> Self {
        self.workers = WorkerLimit::new(max.max(1));
        self
    }

    /// Worker threads still running a model call.
    pub fn active_workers(&self) -> usize {
        self.workers.active.load(Ordering::Acquire)
    }

    pub fn is_available(&self) -> bool {
        matches!(self.backend, Backend::Ready(_))
    }

    /// Why the model is unavailable, if it is.
    pub fn unavailable_reason(&self) -> Option<&str> {
        match &self.backend {
            Backend::Ready(_) => None,
            Backend::Unavailable(reason) => Some(reason),
        }
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Runs the model and picks the most probable class.
    ///
    /// When a timeout is configured the model runs on a worker thread. A call
    /// that exceeds the timeout is abandoned, not cancelled: the worker keeps
    /// its session and its worker slot until the model returns.
    pub fn classify(&self, input: &Tensor4D) -> Result<Classification, DiagnosisError> {
        let model = match &self.backend {
            Backend::Ready(model) => model,
            Backend::Unavailable(reason) => {
                return Err(DiagnosisError::ModelUnavailable {
                    reason: reason.clone(),
                });
            }
        };

        let start = Instant::now();
        let probabilities = match self.timeout {
            Some(timeout) => predict_with_timeout(model, input, timeout, &self.workers)?,
            None => model.predict(input)?,
        };

        if probabilities.len() != self.num_classes {
            return Err(DiagnosisError::inference(
                model.name(),
                format!(
                    "expected {} probabilities, got {}",
                    self.num_classes,
                    probabilities.len()
                ),
            ));
        }

        let (index, confidence) = argmax(&probabilities).ok_or_else(|| {
            DiagnosisError::inference(model.name(), "no finite probability in model output")
        })?;

        debug!(
            model = model.name(),
            index,
            confidence,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "classification complete"
        );

        Ok(Classification { index, confidence })
    }
}

/// Counts live classification workers against a fixed cap.
#[derive(Debug)]
struct WorkerLimit {
    active: Arc<AtomicUsize>,
    max: usize,
}

impl WorkerLimit {
    fn new(max: usize) -> Self {
        Self {
            active: Arc::new(AtomicUsize::new(0)),
            max,
        }
    }

    /// Claims a slot, or `None` when all are taken.
    fn acquire(&self) -> Option<WorkerSlot> {
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max).then_some(n + 1)
            })
            .ok()
            .map(|_| WorkerSlot(Arc::clone(&self.active)))
    }
}

/// Releases its slot when dropped, including when the worker panics.
struct WorkerSlot(Arc<AtomicUsize>);

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

fn predict_with_timeout(
    model: &Arc<dyn ProbabilityModel>,
    input: &Tensor4D,
    timeout: Duration,
    workers: &WorkerLimit,
) -> Result<Vec<f32>, DiagnosisError> {
    let Some(slot) = workers.acquire() else {
        warn!(
            model = model.name(),
            max_workers = workers.max,
            "all classification workers are stalled, refusing call"
        );
        return Err(DiagnosisError::ClassificationTimeout { timeout });
    };

    let (tx, rx) = mpsc::channel();
    let worker_model = Arc::clone(model);
    let worker_input = input.clone();

    std::thread::Builder::new()
        .name("leafdx-classify".to_string())
        .spawn(move || {
            let _slot = slot;
            // The receiver is gone if the caller already timed out.
            let _ = tx.send(worker_model.predict(&worker_input));
        })?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            warn!(
                model = model.name(),
                timeout_ms = timeout.as_millis() as u64,
                "classification timed out"
            );
            Err(DiagnosisError::ClassificationTimeout { timeout })
        }
        Err(RecvTimeoutError::Disconnected) => Err(DiagnosisError::inference(
            model.name(),
            "classification worker stopped without a result",
        )),
    }
}

/// Index and value of the largest probability.
///
/// Ties go to the lowest index and NaN never wins. Returns `None` for an
/// empty or all-NaN slice.
pub fn argmax(probabilities: &[f32]) -> Option<(usize, f32)> {
    probabilities
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, p)| !p.is_nan())
        .fold(None, |best, (i, p)| match best {
            Some((_, best_p)) if best_p >= p => best,
            _ => Some((i, p)),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    struct FixedModel {
        probabilities: Vec<f32>,
        classes: Option<usize>,
        input: Option<(u32, u32)>,
        delay: Duration,
        calls: Arc<AtomicUsize>,
    }

    impl FixedModel {
        fn new(probabilities: Vec<f32>) -> Self {
            let classes = Some(probabilities.len());
            Self {
                probabilities,
                classes,
                input: None,
                delay: Duration::ZERO,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl ProbabilityModel for FixedModel {
        fn name(&self) -> &str {
            "fixed"
        }

        fn num_classes(&self) -> Option<usize> {
            self.classes
        }

        fn input_size(&self) -> Option<(u32, u32)> {
            self.input
        }

        fn predict(&self, _input: &Tensor4D) -> Result<Vec<f32>, DiagnosisError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            Ok(self.probabilities.clone())
        }
    }

    fn tensor() -> Tensor4D {
        Array4::zeros((1, 4, 4, 3))
    }

    #[test]
    fn test_argmax_first_maximum_wins() {
        assert_eq!(argmax(&[0.1, 0.4, 0.4, 0.1]), Some((1, 0.4)));
        assert_eq!(argmax(&[f32::NAN, 0.2, f32::NAN]), Some((1, 0.2)));
        assert_eq!(argmax(&[f32::NAN]), None);
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn test_classify_is_deterministic() {
        let mut probabilities = vec![0.01; 38];
        probabilities[3] = 0.95;
        let classifier =
            LeafClassifier::new(Arc::new(FixedModel::new(probabilities)), 38, 4).unwrap();

        let first = classifier.classify(&tensor()).unwrap();
        for _ in 0..10 {
            assert_eq!(classifier.classify(&tensor()).unwrap(), first);
        }
        assert_eq!(first.index, 3);
        assert!((first.confidence - 0.95).abs() < 1e-6);
    }

    #[test]
    fn test_output_length_mismatch() {
        let mut model = FixedModel::new(vec![0.5, 0.5]);
        model.classes = None;
        let classifier = LeafClassifier::new(Arc::new(model), 38, 4).unwrap();
        let err = classifier.classify(&tensor()).unwrap_err();
        assert!(matches!(err, DiagnosisError::Inference { .. }));

        let mut model = FixedModel::new(Vec::new());
        model.classes = None;
        let classifier = LeafClassifier::new(Arc::new(model), 0, 4).unwrap();
        assert!(matches!(
            classifier.classify(&tensor()),
            Err(DiagnosisError::Inference { .. })
        ));
    }

    #[test]
    fn test_unavailable_model() {
        let classifier = LeafClassifier::unavailable("model file not found", 38);
        assert!(!classifier.is_available());
        assert_eq!(classifier.unavailable_reason(), Some("model file not found"));
        assert!(matches!(
            classifier.classify(&tensor()),
            Err(DiagnosisError::ModelUnavailable { .. })
        ));
    }

    #[test]
    fn test_startup_checks() {
        let model = FixedModel::new(vec![0.5; 37]);
        let err = LeafClassifier::new(Arc::new(model), 38, 4).unwrap_err();
        assert!(matches!(err, DiagnosisError::Config { .. }));

        let mut model = FixedModel::new(vec![0.5; 38]);
        model.input = Some((224, 224));
        let err = LeafClassifier::new(Arc::new(model), 38, 256).unwrap_err();
        assert!(err.to_string().contains("224x224"));

        let mut model = FixedModel::new(vec![0.5; 38]);
        model.input = Some((256, 256));
        assert!(LeafClassifier::new(Arc::new(model), 38, 256).is_ok());
    }

    #[test]
    fn test_timeout() {
        let mut model = FixedModel::new(vec![0.2, 0.8]);
        model.delay = Duration::from_millis(500);
        let classifier = LeafClassifier::new(Arc::new(model), 2, 4)
            .unwrap()
            .with_timeout(Some(Duration::from_millis(20)));
        assert!(matches!(
            classifier.classify(&tensor()),
            Err(DiagnosisError::ClassificationTimeout { .. })
        ));

        let classifier = LeafClassifier::new(Arc::new(FixedModel::new(vec![0.2, 0.8])), 2, 4)
            .unwrap()
            .with_timeout(Some(Duration::from_secs(5)));
        assert_eq!(classifier.classify(&tensor()).unwrap().index, 1);
    }

    #[test]
    fn test_stalled_model_bounds_worker_threads() {
        let mut model = FixedModel::new(vec![0.2, 0.8]);
        model.delay = Duration::from_millis(300);
        let calls = Arc::clone(&model.calls);
        let classifier = LeafClassifier::new(Arc::new(model), 2, 4)
            .unwrap()
            .with_timeout(Some(Duration::from_millis(5)))
            .with_max_workers(2);

        for _ in 0..40 {
            assert!(matches!(
                classifier.classify(&tensor()),
                Err(DiagnosisError::ClassificationTimeout { .. })
            ));
        }
        assert!(classifier.active_workers() <= 2);
        let started = calls.load(Ordering::SeqCst);
        assert!(started <= 2, "{started} model calls started");

        // Slots come back once the stalled calls return.
        let deadline = Instant::now() + Duration::from_secs(5);
        while classifier.active_workers() > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(classifier.active_workers(), 0);

        let classifier = classifier.with_timeout(Some(Duration::from_secs(5)));
        assert_eq!(classifier.classify(&tensor()).unwrap().index, 1);
    }
}

//! ONNX Runtime inference engine with a pool of mutex-guarded sessions.

use crate::core::config::OrtSessionConfig;
use crate::core::traits::ProbabilityModel;
use crate::core::{DiagnosisError, Tensor4D};
use ort::logging::LogLevel;
use ort::session::Session;
use ort::value::{TensorRef, ValueType};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

#[path = "ort_infer_config.rs"]
mod ort_infer_config;

/// Classifier backed by ONNX Runtime.
///
/// `Session::run` needs exclusive access, so every session sits behind its own
/// mutex and concurrent callers are spread round-robin over the pool.
pub struct OrtInfer {
    sessions: Vec<Mutex<Session>>,
    next_idx: AtomicUsize,
    input_name: String,
    output_name: String,
    input_shape: Vec<i64>,
    output_shape: Vec<i64>,
    model_path: PathBuf,
    model_name: String,
}

impl std::fmt::Debug for OrtInfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrtInfer")
            .field("sessions", &self.sessions.len())
            .field("input_name", &self.input_name)
            .field("output_name", &self.output_name)
            .field("input_shape", &self.input_shape)
            .field("output_shape", &self.output_shape)
            .field("model_path", &self.model_path)
            .finish()
    }
}

impl OrtInfer {
    /// Loads the model at `model_path` into `pool_size` sessions.
    ///
    /// Any failure is reported as [`DiagnosisError::ModelUnavailable`] so the
    /// caller can decide between failing startup and running degraded.
    pub fn new(
        model_path: impl AsRef<Path>,
        pool_size: usize,
        ort_config: Option<&OrtSessionConfig>,
    ) -> Result<Self, DiagnosisError> {
        let path = model_path.as_ref();
        if !path.is_file() {
            return Err(DiagnosisError::ModelUnavailable {
                reason: format!("model file not found: {}", path.display()),
            });
        }

        let load_error = |e: ort::Error| DiagnosisError::ModelUnavailable {
            reason: format!("failed to create ONNX session for '{}': {e}", path.display()),
        };

        let pool_size = pool_size.max(1);
        let mut sessions = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            let builder = Session::builder().map_err(load_error)?;
            let builder = match ort_config {
                Some(cfg) => Self::apply_ort_config(builder, cfg).map_err(load_error)?,
                None => builder.with_log_level(LogLevel::Error).map_err(load_error)?,
            };
            let session = builder.commit_from_file(path).map_err(load_error)?;
            sessions.push(session);
        }

        let first = &sessions[0];
        let input = first
            .inputs
            .first()
            .ok_or_else(|| DiagnosisError::ModelUnavailable {
                reason: format!("model '{}' declares no inputs", path.display()),
            })?;
        let output = first
            .outputs
            .first()
            .ok_or_else(|| DiagnosisError::ModelUnavailable {
                reason: format!("model '{}' declares no outputs", path.display()),
            })?;

        let input_name = input.name.clone();
        let output_name = output.name.clone();
        let input_shape = tensor_shape(&input.input_type);
        let output_shape = tensor_shape(&output.output_type);

        let model_name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown_model")
            .to_string();

        debug!(
            model = %model_name,
            input = %input_name,
            ?input_shape,
            output = %output_name,
            ?output_shape,
            pool_size,
            "ONNX model loaded"
        );

        Ok(Self {
            sessions: sessions.into_iter().map(Mutex::new).collect(),
            next_idx: AtomicUsize::new(0),
            input_name,
            output_name,
            input_shape,
            output_shape,
            model_path: path.to_path_buf(),
            model_name,
        })
    }

    /// Returns the model path associated with this inference engine.
    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    /// Declared input shape; dynamic dimensions are reported as `-1`.
    pub fn input_shape(&self) -> &[i64] {
        &self.input_shape
    }

    /// Declared output shape; dynamic dimensions are reported as `-1`.
    pub fn output_shape(&self) -> &[i64] {
        &self.output_shape
    }

    fn run(&self, x: &Tensor4D) -> Result<Vec<f32>, DiagnosisError> {
        let input_shape = x.shape().to_vec();

        let input_tensor = TensorRef::from_array_view(x.view()).map_err(|e| {
            DiagnosisError::inference_with_source(
                &self.model_name,
                format!("failed to convert input tensor with shape {input_shape:?}"),
                e,
            )
        })?;
        let inputs = ort::inputs![self.input_name.as_str() => input_tensor];

        let idx = self.next_idx.fetch_add(1, Ordering::Relaxed) % self.sessions.len();
        let mut session_guard = self.sessions[idx].lock().map_err(|_| {
            DiagnosisError::inference(
                &self.model_name,
                format!(
                    "failed to acquire session lock for session {}/{}",
                    idx,
                    self.sessions.len()
                ),
            )
        })?;

        let outputs = session_guard.run(inputs).map_err(|e| {
            DiagnosisError::inference_with_source(
                &self.model_name,
                format!(
                    "ONNX Runtime inference failed with input '{}' -> output '{}'",
                    self.input_name, self.output_name
                ),
                e,
            )
        })?;

        let (output_shape, output_data) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| {
                DiagnosisError::inference_with_source(
                    &self.model_name,
                    format!("failed to extract output tensor '{}' as f32", self.output_name),
                    e,
                )
            })?;

        let batch = output_shape.first().copied().unwrap_or(1);
        if output_shape.len() > 2 || batch != 1 {
            return Err(DiagnosisError::inference(
                &self.model_name,
                format!("expected a [1, N] probability tensor, got shape {output_shape:?}"),
            ));
        }

        Ok(output_data.to_vec())
    }
}

impl ProbabilityModel for OrtInfer {
    fn name(&self) -> &str {
        &self.model_name
    }

    fn num_classes(&self) -> Option<usize> {
        self.output_shape
            .last()
            .copied()
            .filter(|&n| n > 0)
            .map(|n| n as usize)
    }

    fn input_size(&self) -> Option<(u32, u32)> {
        declared_input_size(&self.input_shape)
    }

    fn predict(&self, input: &Tensor4D) -> Result<Vec<f32>, DiagnosisError> {
        self.run(input)
    }
}

fn tensor_shape(value_type: &ValueType) -> Vec<i64> {
    match value_type {
        ValueType::Tensor { shape, .. } => shape.iter().copied().collect(),
        _ => Vec::new(),
    }
}

/// Reads a static `(height, width)` from an NHWC or NCHW input shape.
fn declared_input_size(shape: &[i64]) -> Option<(u32, u32)> {
    let (h, w) = match shape {
        [_, h, w, 3] => (*h, *w),
        [_, 3, h, w] => (*h, *w),
        _ => return None,
    };
    if h > 0 && w > 0 {
        Some((h as u32, w as u32))
    } else {
        None
    }
}

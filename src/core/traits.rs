//! Trait seams between the pipeline and its external collaborators.

use crate::core::{DiagnosisError, Tensor4D};

/// An opaque pretrained classifier: `image tensor -> probability vector`.
///
/// Implementations must be safe to call from several request threads at
/// once. A model that is not reentrant serializes calls internally (see
/// [`OrtInfer`](crate::core::inference::OrtInfer), which guards each session
/// with a mutex).
pub trait ProbabilityModel: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Number of classes the model declares on its output, when static.
    fn num_classes(&self) -> Option<usize>;

    /// Square input size `(height, width)` the model declares, when static.
    fn input_size(&self) -> Option<(u32, u32)>;

    /// Runs the model on a `[1, H, W, 3]` tensor and returns one probability per class.
    fn predict(&self, input: &Tensor4D) -> Result<Vec<f32>, DiagnosisError>;
}

//! Image normalization for the leaf classifier.
//!
//! Turns an uploaded image in any common encoding, size and color mode into
//! the `[1, H, W, 3]` tensor of `[0, 1]` floats the classifier was trained on.

use crate::core::{DiagnosisError, Tensor4D};
use image::{DynamicImage, imageops::FilterType};
use std::path::Path;

/// Normalizes images for classification.
///
/// Steps, always in this order: decode and convert to RGB, resize to a square
/// `input_size`, scale channels by `1/255`, add a leading batch axis.
#[derive(Debug, Clone)]
pub struct ImageNormalizer {
    /// Side length of the square model input.
    input_size: u32,
    /// Multiplier applied to every 8-bit channel value.
    scale: f32,
    /// Resampling filter.
    resize_filter: FilterType,
}

impl ImageNormalizer {
    /// Creates a normalizer for the given square input size.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when `input_size` is zero.
    pub fn new(input_size: u32) -> Result<Self, DiagnosisError> {
        if input_size == 0 {
            return Err(DiagnosisError::invalid_field(
                "input_size",
                "a positive size",
                "0",
            ));
        }

        Ok(Self {
            input_size,
            scale: 1.0 / 255.0,
            resize_filter: FilterType::CatmullRom,
        })
    }

    /// Side length of the produced tensor.
    pub fn input_size(&self) -> u32 {
        self.input_size
    }

    /// Shape of every tensor this normalizer produces.
    pub fn output_shape(&self) -> [usize; 4] {
        let side = self.input_size as usize;
        [1, side, side, 3]
    }

    /// Decodes raw image bytes and normalizes them.
    ///
    /// Corrupt or unsupported input yields [`DiagnosisError::InputDecode`],
    /// whatever the underlying format error was.
    pub fn normalize(&self, bytes: &[u8]) -> Result<Tensor4D, DiagnosisError> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| DiagnosisError::input_decode("failed to decode image bytes", e))?;
        self.normalize_image(&img)
    }

    /// Loads an image from disk and normalizes it.
    pub fn normalize_path(&self, path: &Path) -> Result<Tensor4D, DiagnosisError> {
        let img = image::open(path).map_err(|e| {
            DiagnosisError::input_decode(format!("failed to load image '{}'", path.display()), e)
        })?;
        self.normalize_image(&img)
    }

    /// Normalizes an already decoded image.
    pub fn normalize_image(&self, img: &DynamicImage) -> Result<Tensor4D, DiagnosisError> {
        let rgb = img.to_rgb8();
        let resized = image::imageops::resize(
            &rgb,
            self.input_size,
            self.input_size,
            self.resize_filter,
        );

        let side = self.input_size as usize;
        let data: Vec<f32> = resized
            .pixels()
            .flat_map(|p| p.0)
            .map(|channel| channel as f32 * self.scale)
            .collect();

        Ok(ndarray::Array4::from_shape_vec((1, side, side, 3), data)?)
    }
}

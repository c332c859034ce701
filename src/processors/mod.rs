//! Image processors that prepare model input.

pub mod normalization;

pub use normalization::ImageNormalizer;

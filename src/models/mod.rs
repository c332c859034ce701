//! Model adapters.

pub mod classification;

pub use classification::{Classification, LeafClassifier, argmax};

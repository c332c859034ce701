//! Domain types for leaf diagnosis: the class vocabulary, the result policy
//! and the disease knowledge table.

pub mod knowledge;
pub mod policy;
pub mod vocabulary;

pub use knowledge::{KnowledgeEntry, KnowledgeTable};
pub use policy::{Decision, FAILED_CLASS_INDEX, FAILED_LABEL, PredictionResult, ResultPolicy, Verdict};
pub use vocabulary::{ClassVocabulary, PLANT_VILLAGE_CLASSES, display_label};

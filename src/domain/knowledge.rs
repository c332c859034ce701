//! Disease knowledge table keyed by decoded label.

use crate::core::DiagnosisError;
use crate::domain::vocabulary::ClassVocabulary;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

/// Description shown for labels the table does not know.
pub const FALLBACK_DESCRIPTION: &str = "No description available.";

/// Remedy shown for labels the table does not know.
pub const FALLBACK_REMEDY: &str = "Consult agricultural expert.";

const BUILTIN_KNOWLEDGE: &str = include_str!("../../data/knowledge.json");

/// Description and remedy for one condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    #[serde(alias = "desc")]
    pub description: String,
    pub remedy: String,
}

impl KnowledgeEntry {
    pub fn fallback() -> Self {
        Self {
            description: FALLBACK_DESCRIPTION.to_string(),
            remedy: FALLBACK_REMEDY.to_string(),
        }
    }
}

/// Static mapping from decoded label to [`KnowledgeEntry`].
///
/// Lookups are total: unknown labels, including the failure label, get the
/// fallback entry.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeTable {
    entries: HashMap<String, KnowledgeEntry>,
}

impl KnowledgeTable {
    /// The table bundled with the crate.
    pub fn builtin() -> Self {
        Self::from_json_str(BUILTIN_KNOWLEDGE).unwrap_or_else(|e| {
            warn!(error = %e, "bundled knowledge table is invalid, using fallback entries only");
            Self::default()
        })
    }

    /// Parses a JSON object of `label -> {description, remedy}`.
    ///
    /// # Errors
    ///
    /// Malformed JSON, or an entry with an empty description or remedy.
    pub fn from_json_str(json: &str) -> Result<Self, DiagnosisError> {
        let entries: HashMap<String, KnowledgeEntry> =
            serde_json::from_str(json).map_err(|e| {
                DiagnosisError::config_error_detailed("knowledge table", e.to_string())
            })?;

        for (label, entry) in &entries {
            if entry.description.trim().is_empty() || entry.remedy.trim().is_empty() {
                return Err(DiagnosisError::config_error_detailed(
                    "knowledge table",
                    format!("entry '{label}' needs a non-empty description and remedy"),
                ));
            }
        }

        Ok(Self { entries })
    }

    pub fn from_json_file(path: &Path) -> Result<Self, DiagnosisError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Entry for `label`, or the fallback entry.
    pub fn lookup(&self, label: &str) -> KnowledgeEntry {
        self.entries
            .get(label)
            .cloned()
            .unwrap_or_else(KnowledgeEntry::fallback)
    }

    /// Entry for `label` without the fallback.
    pub fn get(&self, label: &str) -> Option<&KnowledgeEntry> {
        self.entries.get(label)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys that match no label of `vocabulary`, sorted.
    ///
    /// Such entries can never be returned by a lookup, which usually means the
    /// key was written without following the label transform exactly.
    pub fn unknown_labels(&self, vocabulary: &ClassVocabulary) -> Vec<&str> {
        let mut unknown: Vec<&str> = self
            .entries
            .keys()
            .map(String::as_str)
            .filter(|key| vocabulary.index_of(key).is_none())
            .collect();
        unknown.sort_unstable();
        unknown
    }

    /// Number of vocabulary labels that have their own entry.
    pub fn coverage(&self, vocabulary: &ClassVocabulary) -> usize {
        vocabulary
            .decoded_labels()
            .filter(|label| self.entries.contains_key(*label))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::policy::FAILED_LABEL;

    #[test]
    fn test_builtin_entry() {
        let table = KnowledgeTable::builtin();
        assert_eq!(table.len(), 1);
        let entry = table.lookup("Apple - Black rot");
        assert_eq!(
            entry.description,
            "Black rot is a fungal disease causing dark lesions on leaves and fruits."
        );
        assert_eq!(
            entry.remedy,
            "Remove infected leaves, apply fungicide, and ensure proper air circulation."
        );
        assert!(table.unknown_labels(&ClassVocabulary::plant_village()).is_empty());
    }

    #[test]
    fn test_lookup_falls_back() {
        let table = KnowledgeTable::builtin();
        assert_eq!(table.lookup("Apple - healthy"), KnowledgeEntry::fallback());
        assert_eq!(table.lookup(FAILED_LABEL), KnowledgeEntry::fallback());
        assert_eq!(table.lookup(""), KnowledgeEntry::fallback());
        // Keys are exact.
        assert_eq!(table.lookup("apple - black rot"), KnowledgeEntry::fallback());
    }

    #[test]
    fn test_unknown_labels_and_coverage() {
        let json = r#"{
            "Corn (maize) - Common rust": {"desc": "Rust pustules.", "remedy": "Resistant hybrids."},
            "Tomato - healthy": {"description": "No disease.", "remedy": "None needed."}
        }"#;
        let table = KnowledgeTable::from_json_str(json).unwrap();
        let vocab = ClassVocabulary::plant_village();

        // The raw name ends with an underscore, so the real label has a trailing space.
        assert_eq!(
            table.unknown_labels(&vocab),
            vec!["Corn (maize) - Common rust"]
        );
        assert_eq!(table.coverage(&vocab), 1);
    }

    #[test]
    fn test_rejects_blank_entries() {
        let json = r#"{"Apple - healthy": {"description": " ", "remedy": "x"}}"#;
        assert!(KnowledgeTable::from_json_str(json).is_err());
        assert!(KnowledgeTable::from_json_str("[1, 2]").is_err());
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("knowledge.json");
        std::fs::write(
            &path,
            r#"{"Grape - Black rot": {"description": "d", "remedy": "r"}}"#,
        )
        .unwrap();
        let table = KnowledgeTable::from_json_file(&path).unwrap();
        assert_eq!(table.lookup("Grape - Black rot").remedy, "r");

        assert!(KnowledgeTable::from_json_file(&dir.path().join("missing.json")).is_err());
    }
}

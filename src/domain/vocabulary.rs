//! Class vocabulary and label decoding.
//!
//! The vocabulary is the ordered list of raw class names in the exact order
//! the classifier was trained with. A wrong order is undetectable at runtime
//! and silently mislabels every prediction, so the list is loaded once and
//! never mutated.

use crate::core::DiagnosisError;
use std::collections::HashMap;
use std::path::Path;

/// Separator between crop and condition in raw class names.
pub const CROP_CONDITION_SEPARATOR: &str = "___";

/// The 38 PlantVillage classes in the order the bundled MobileNetV2 was trained on.
pub const PLANT_VILLAGE_CLASSES: [&str; 38] = [
    "Apple___Apple_scab",
    "Apple___Black_rot",
    "Apple___Cedar_apple_rust",
    "Apple___healthy",
    "Blueberry___healthy",
    "Cherry_(including_sour)___Powdery_mildew",
    "Cherry_(including_sour)___healthy",
    "Corn_(maize)___Cercospora_leaf_spot Gray_leaf_spot",
    "Corn_(maize)___Common_rust_",
    "Corn_(maize)___Northern_Leaf_Blight",
    "Corn_(maize)___healthy",
    "Grape___Black_rot",
    "Grape___Esca_(Black_Measles)",
    "Grape___Leaf_blight_(Isariopsis_Leaf_Spot)",
    "Grape___healthy",
    "Orange___Haunglongbing_(Citrus_greening)",
    "Peach___Bacterial_spot",
    "Peach___healthy",
    "Pepper,_bell___Bacterial_spot",
    "Pepper,_bell___healthy",
    "Potato___Early_blight",
    "Potato___Late_blight",
    "Potato___healthy",
    "Raspberry___healthy",
    "Soybean___healthy",
    "Squash___Powdery_mildew",
    "Strawberry___Leaf_scorch",
    "Strawberry___healthy",
    "Tomato___Bacterial_spot",
    "Tomato___Early_blight",
    "Tomato___Late_blight",
    "Tomato___Leaf_Mold",
    "Tomato___Septoria_leaf_spot",
    "Tomato___Spider_mites Two-spotted_spider_mite",
    "Tomato___Target_Spot",
    "Tomato___Tomato_Yellow_Leaf_Curl_Virus",
    "Tomato___Tomato_mosaic_virus",
    "Tomato___healthy",
];

/// Turns a raw class name into the label shown to users and used as the
/// knowledge-table key: `"Apple___Black_rot"` becomes `"Apple - Black rot"`.
///
/// This is the only place a raw class name is rewritten. The transform is
/// applied verbatim, so a raw name with a trailing underscore keeps a
/// trailing space.
pub fn display_label(raw: &str) -> String {
    raw.replace(CROP_CONDITION_SEPARATOR, " - ").replace('_', " ")
}

/// Pairs of indices whose distinct raw names decode to the same display label.
pub fn find_collisions<S: AsRef<str>>(raw: &[S]) -> Vec<(usize, usize)> {
    let mut seen: HashMap<String, usize> = HashMap::with_capacity(raw.len());
    let mut collisions = Vec::new();
    for (idx, name) in raw.iter().enumerate() {
        let name = name.as_ref();
        let label = display_label(name);
        match seen.get(&label) {
            Some(&first) if raw[first].as_ref() != name => collisions.push((first, idx)),
            Some(_) => {}
            None => {
                seen.insert(label, idx);
            }
        }
    }
    collisions
}

/// Ordered, immutable list of class labels.
#[derive(Debug, Clone)]
pub struct ClassVocabulary {
    raw: Vec<String>,
    display: Vec<String>,
}

impl ClassVocabulary {
    /// Builds a vocabulary from raw class names in training order.
    ///
    /// # Errors
    ///
    /// Fails when the list is empty, when a raw name repeats, or when two raw
    /// names decode to the same display label.
    pub fn new(raw: Vec<String>) -> Result<Self, DiagnosisError> {
        if raw.is_empty() {
            return Err(DiagnosisError::config_error_detailed(
                "vocabulary",
                "at least one class label is required",
            ));
        }

        let display: Vec<String> = raw.iter().map(|r| display_label(r)).collect();
        let mut seen: HashMap<&str, usize> = HashMap::with_capacity(raw.len());
        for (idx, name) in raw.iter().enumerate() {
            if let Some(first) = seen.insert(name.as_str(), idx) {
                return Err(DiagnosisError::config_error_detailed(
                    "vocabulary",
                    format!("duplicate class label '{name}' at indices {first} and {idx}"),
                ));
            }
        }

        if let Some(&(first, second)) = find_collisions(&raw).first() {
            return Err(DiagnosisError::config_error_detailed(
                "vocabulary",
                format!(
                    "classes '{}' and '{}' both decode to '{}'",
                    raw[first], raw[second], display[second]
                ),
            ));
        }

        Ok(Self { raw, display })
    }

    /// The built-in PlantVillage vocabulary.
    pub fn plant_village() -> Self {
        let raw: Vec<String> = PLANT_VILLAGE_CLASSES.iter().map(|s| s.to_string()).collect();
        let display = raw.iter().map(|r| display_label(r)).collect();
        Self { raw, display }
    }

    /// Loads raw class names from a text file, one per line, in training order.
    /// Blank lines are skipped and surrounding whitespace is trimmed.
    pub fn from_labels_file(path: &Path) -> Result<Self, DiagnosisError> {
        let contents = std::fs::read_to_string(path)?;
        let raw = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        Self::new(raw)
    }

    /// Number of classes.
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// Always false for a constructed vocabulary; kept for API symmetry.
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Raw class name at `index`.
    pub fn raw_label(&self, index: usize) -> Option<&str> {
        self.raw.get(index).map(String::as_str)
    }

    /// Human-readable label at `index`.
    pub fn decode(&self, index: usize) -> Option<&str> {
        self.display.get(index).map(String::as_str)
    }

    /// All display labels in class order.
    pub fn decoded_labels(&self) -> impl Iterator<Item = &str> {
        self.display.iter().map(String::as_str)
    }

    /// Index of a display label, if it belongs to this vocabulary.
    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.display.iter().position(|l| l == label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::io::Write;

    #[test]
    fn test_decode_examples() {
        let vocab = ClassVocabulary::plant_village();
        assert_eq!(vocab.len(), 38);
        assert_eq!(vocab.decode(1), Some("Apple - Black rot"));
        assert_eq!(vocab.decode(3), Some("Apple - healthy"));
        assert_eq!(
            vocab.decode(5),
            Some("Cherry (including sour) - Powdery mildew")
        );
        assert_eq!(vocab.decode(18), Some("Pepper, bell - Bacterial spot"));
        assert_eq!(vocab.decode(38), None);
    }

    #[test]
    fn test_decode_is_deterministic_and_injective() {
        let vocab = ClassVocabulary::plant_village();
        let mut labels = HashSet::new();
        for i in 0..vocab.len() {
            let first = vocab.decode(i).unwrap().to_string();
            assert_eq!(vocab.decode(i).unwrap(), first);
            assert_eq!(first, display_label(PLANT_VILLAGE_CLASSES[i]));
            assert!(labels.insert(first), "index {i} collides");
        }
        assert_eq!(labels.len(), vocab.len());
    }

    #[test]
    fn test_plant_village_passes_validation() {
        assert!(find_collisions(&PLANT_VILLAGE_CLASSES[..]).is_empty());
        let raw = PLANT_VILLAGE_CLASSES.iter().map(|s| s.to_string()).collect();
        assert!(ClassVocabulary::new(raw).is_ok());
    }

    #[test]
    fn test_irregular_names_survive_transform_verbatim() {
        let vocab = ClassVocabulary::plant_village();
        // Trailing underscore becomes a trailing space.
        assert_eq!(vocab.decode(8), Some("Corn (maize) - Common rust "));
        // Embedded spaces and mixed separators are kept as they are.
        assert_eq!(
            vocab.decode(7),
            Some("Corn (maize) - Cercospora leaf spot Gray leaf spot")
        );
        assert_eq!(
            vocab.decode(33),
            Some("Tomato - Spider mites Two-spotted spider mite")
        );
        assert_eq!(vocab.index_of("Corn (maize) - Common rust"), None);
        assert_eq!(vocab.index_of("Corn (maize) - Common rust "), Some(8));
    }

    #[test]
    fn test_rejects_duplicates_and_collisions() {
        let dup = vec!["A___x".to_string(), "A___x".to_string()];
        assert!(ClassVocabulary::new(dup).is_err());

        // Distinct raw names that decode to the same label.
        let collide = vec!["A___x_y".to_string(), "A___x y".to_string()];
        assert_eq!(find_collisions(&collide), vec![(0, 1)]);
        assert!(matches!(
            ClassVocabulary::new(collide),
            Err(DiagnosisError::Config { .. })
        ));

        assert!(ClassVocabulary::new(Vec::new()).is_err());
    }

    #[test]
    fn test_from_labels_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "Apple___healthy\r\n\n  Grape___Black_rot  \nTomato___healthy").unwrap();

        let vocab = ClassVocabulary::from_labels_file(file.path()).unwrap();
        assert_eq!(vocab.len(), 3);
        assert_eq!(vocab.raw_label(1), Some("Grape___Black_rot"));
        assert_eq!(
            vocab.decoded_labels().collect::<Vec<_>>(),
            vec!["Apple - healthy", "Grape - Black rot", "Tomato - healthy"]
        );
    }
}

//! Emotion label tables.
//!
//! The face model predicts indices into [`FACE_LABELS`]. The speech model predicts indices into
//! the class list of a [`LabelEncoder`] stored next to the model. Both raw vocabularies are
//! mapped onto the emotion names used by the application with [`app_label`].
use std::path::Path;

use anyhow::{bail, Context, Result};

/// Raw emotion names of the face classifier, in class-index order.
pub const FACE_LABELS: [&str; 7] = [
    "Angry", "Disgust", "Fear", "Happy", "Neutral", "Sad", "Surprise",
];

/// Application label used for speech predictions without a known mapping.
pub const FALLBACK_LABEL: &str = "Neutral";

/// Map a raw emotion name onto the application vocabulary. Matching is case-insensitive.
pub fn app_label(raw: &str) -> Option<&'static str> {
    let label = match raw.to_ascii_lowercase().as_str() {
        "angry" => "Angry",
        "disgust" => "Stressed",
        "fear" => "Anxious",
        "happy" => "Happy",
        "neutral" => "Neutral",
        "sad" => "Sad",
        "surprise" => "Excited",
        "calm" => "Calm",
        _ => return None,
    };

    Some(label)
}

/// Name used as key in per-class confidence maps: the application label if there is one,
/// otherwise the raw label with its first letter upper-cased.
pub fn display_label(raw: &str) -> String {
    match app_label(raw) {
        Some(label) => label.to_owned(),
        None => capitalize(raw),
    }
}

fn capitalize(raw: &str) -> String {
    let lower = raw.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Class list of the speech model.
///
/// Stored on disk as a JSON array of strings in class-index order, e.g.
/// `["angry", "calm", "disgust", "fear", "happy", "neutral", "sad", "surprise"]`.
#[derive(Clone, Debug)]
pub struct LabelEncoder {
    classes: Vec<String>,
}

impl LabelEncoder {
    pub fn new(classes: Vec<String>) -> Result<Self> {
        if classes.is_empty() {
            bail!("label encoder has no classes");
        }

        Ok(Self { classes })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read label encoder {}", path.display()))?;
        let classes: Vec<String> = serde_json::from_str(&raw)
            .with_context(|| format!("label encoder {} is not a JSON string array", path.display()))?;

        Self::new(classes)
    }

    /// Raw label of a class index.
    pub fn inverse_transform(&self, index: usize) -> Option<&str> {
        self.classes.get(index).map(String::as_str)
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

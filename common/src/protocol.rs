//! JSON payloads exchanged between the emotion services and their clients.
//!
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Per-class confidences in percent, keyed by application-facing emotion name.
pub type EmotionScores = BTreeMap<String, f32>;

/// Body of `POST /detect-face` and `POST /detect-face-batch`.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct FaceRequest {
    /// Base64 image, optionally prefixed with a data URL header.
    #[serde(default)]
    pub image: Option<String>,
}

/// JSON body of `POST /detect-speech`.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct SpeechRequest {
    #[serde(default)]
    pub audio_base64: Option<String>,
}

/// Body of `POST /detect-multimodal`. Either modality may be absent.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct MultimodalRequest {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub audio_base64: Option<String>,
}

/// Pixel bounding box of a detected face.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct FaceCoordinates {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct FaceResponse {
    pub success: bool,
    pub emotion: String,
    pub raw_emotion: String,
    pub confidence: f32,
    pub all_emotions: EmotionScores,
    pub face_coordinates: FaceCoordinates,
    pub model_type: String,
}

/// One entry of a batch face response.
#[derive(Debug, Deserialize, Serialize)]
pub struct BatchFace {
    pub emotion: String,
    pub raw_emotion: String,
    pub confidence: f32,
    pub coordinates: FaceCoordinates,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct BatchFaceResponse {
    pub success: bool,
    pub faces_count: usize,
    pub faces: Vec<BatchFace>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SpeechResponse {
    pub success: bool,
    pub emotion: String,
    pub raw_emotion: String,
    pub confidence: f32,
    pub all_emotions: EmotionScores,
    pub model_type: String,
}

/// Result of a single modality inside a multimodal response.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ModalityResult {
    pub emotion: String,
    pub raw_emotion: String,
    pub confidence: f32,
}

/// Fused result of face and speech.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct CombinedResult {
    pub emotion: String,
    pub confidence: f32,
    pub method: String,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct MultimodalResults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face: Option<ModalityResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speech: Option<ModalityResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub combined: Option<CombinedResult>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct MultimodalResponse {
    pub success: bool,
    pub results: MultimodalResults,
}

/// Body of every non-2xx response.
#[derive(Debug, Deserialize, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Body of `GET /health`. Each service fills in the fields describing it.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub models: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl HealthResponse {
    pub fn healthy() -> Self {
        Self {
            status: "healthy".into(),
            ..Default::default()
        }
    }
}

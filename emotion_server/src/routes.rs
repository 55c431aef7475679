//! Routers of the three emotion services.
//!
use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Extension, Router,
};
use tower_http::cors::CorsLayer;

use crate::{
    endpoints::{
        combined_health, detect_face, detect_face_batch, detect_multimodal, detect_speech,
        face_health, speech_health,
    },
    face::FaceAnalyzer,
    speech::SpeechAnalyzer,
};

/// Default request body limit in bytes.
pub const DEFAULT_MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

pub fn face_router(analyzer: Arc<FaceAnalyzer>, max_body_bytes: usize) -> Router {
    let app = Router::new()
        .route("/health", get(face_health))
        .route("/detect-face", post(detect_face))
        .route("/detect-face-batch", post(detect_face_batch))
        .layer(Extension(analyzer));

    with_common_layers(app, max_body_bytes)
}

pub fn speech_router(analyzer: Arc<SpeechAnalyzer>, max_body_bytes: usize) -> Router {
    let app = Router::new()
        .route("/health", get(speech_health))
        .route("/detect-speech", post(detect_speech))
        .layer(Extension(analyzer));

    with_common_layers(app, max_body_bytes)
}

pub fn combined_router(
    face: Arc<FaceAnalyzer>,
    speech: Arc<SpeechAnalyzer>,
    max_body_bytes: usize,
) -> Router {
    let app = Router::new()
        .route("/health", get(combined_health))
        .route("/detect-face", post(detect_face))
        .route("/detect-speech", post(detect_speech))
        .route("/detect-multimodal", post(detect_multimodal))
        .layer(Extension(face))
        .layer(Extension(speech));

    with_common_layers(app, max_body_bytes)
}

fn with_common_layers(app: Router, max_body_bytes: usize) -> Router {
    app.layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(CorsLayer::permissive())
}

//! HTTP handlers of the emotion services.
//!
use std::sync::Arc;

use anyhow::Context;
use axum::{
    body::Body,
    extract::{FromRequest, Multipart},
    http::{header::CONTENT_TYPE, Request, StatusCode},
    Extension, Json,
};
use common::protocol::{
    BatchFace, BatchFaceResponse, FaceRequest, FaceResponse, HealthResponse, ModalityResult,
    MultimodalRequest, MultimodalResponse, MultimodalResults, SpeechRequest, SpeechResponse,
};

use crate::{
    error::{JsonBody, ServiceError},
    face::{FaceAnalyzer, FaceEmotion, FACE_MODEL_TYPE},
    fusion::fuse,
    labels::FACE_LABELS,
    meter::METER,
    mfcc::MfccConfig,
    speech::{SpeechAnalyzer, SpeechEmotion, SPEECH_MODEL_TYPE},
    utils::decode_base64,
};

/// Multipart field carrying an uploaded audio file.
const AUDIO_FIELD: &str = "audio";

pub async fn face_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        model: Some("Custom CNN Face Emotion Detector".into()),
        emotions: Some(FACE_LABELS.iter().map(|l| l.to_string()).collect()),
        ..HealthResponse::healthy()
    })
}

pub async fn speech_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        model: Some("Speech Emotion Recognition".into()),
        sample_rate: Some(MfccConfig::default().sample_rate),
        ..HealthResponse::healthy()
    })
}

pub async fn combined_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        models: Some(vec!["face_emotion".into(), "speech_emotion".into()]),
        version: Some("1.0".into()),
        ..HealthResponse::healthy()
    })
}

pub async fn detect_face(
    Extension(analyzer): Extension<Arc<FaceAnalyzer>>,
    JsonBody(request): JsonBody<FaceRequest>,
) -> Result<Json<FaceResponse>, ServiceError> {
    METER.tick_face();
    let image = non_empty(request.image).ok_or(ServiceError::MissingImage)?;

    let face = run_blocking(move || analyzer.analyze_first(&image))
        .await?
        .ok_or(ServiceError::NoFace)?;
    log::info!("Detected {} ({:.2}%)", face.emotion, face.confidence);

    Ok(Json(FaceResponse {
        success: true,
        emotion: face.emotion.into(),
        raw_emotion: face.raw_emotion.into(),
        confidence: face.confidence,
        all_emotions: face.all_emotions,
        face_coordinates: face.region,
        model_type: FACE_MODEL_TYPE.into(),
    }))
}

pub async fn detect_face_batch(
    Extension(analyzer): Extension<Arc<FaceAnalyzer>>,
    JsonBody(request): JsonBody<FaceRequest>,
) -> Result<Json<BatchFaceResponse>, ServiceError> {
    METER.tick_batch();
    let image = non_empty(request.image).ok_or(ServiceError::MissingImage)?;

    let faces = run_blocking(move || analyzer.analyze(&image)).await?;
    if faces.is_empty() {
        return Err(ServiceError::NoFaces);
    }
    log::info!("Detected emotions of {} faces", faces.len());

    let faces: Vec<BatchFace> = faces
        .into_iter()
        .map(|face| BatchFace {
            emotion: face.emotion.into(),
            raw_emotion: face.raw_emotion.into(),
            confidence: face.confidence,
            coordinates: face.region,
        })
        .collect();

    Ok(Json(BatchFaceResponse {
        success: true,
        faces_count: faces.len(),
        faces,
    }))
}

/// Accepts either a multipart upload with an `audio` file or a JSON body with `audio_base64`.
pub async fn detect_speech(
    Extension(analyzer): Extension<Arc<SpeechAnalyzer>>,
    request: Request<Body>,
) -> Result<Json<SpeechResponse>, ServiceError> {
    METER.tick_speech();

    let audio = if is_multipart(&request) {
        let multipart = Multipart::from_request(request, &())
            .await
            .map_err(|err| rejected_body(err.status(), err.body_text()))?;
        audio_upload(multipart).await?
    } else {
        let JsonBody(body) = JsonBody::<SpeechRequest>::from_request(request, &()).await?;
        let encoded = non_empty(body.audio_base64).ok_or(ServiceError::MissingAudio)?;
        decode_base64(&encoded)?
    };

    let speech = run_blocking(move || analyzer.analyze_encoded(audio)).await?;
    log::info!("Detected {} ({:.2}%)", speech.emotion, speech.confidence);

    Ok(Json(SpeechResponse {
        success: true,
        emotion: speech.emotion.into(),
        raw_emotion: speech.raw_emotion,
        confidence: speech.confidence,
        all_emotions: speech.all_emotions,
        model_type: SPEECH_MODEL_TYPE.into(),
    }))
}

/// Runs whichever modalities are present and fuses them when both yield a result.
pub async fn detect_multimodal(
    Extension(face_analyzer): Extension<Arc<FaceAnalyzer>>,
    Extension(speech_analyzer): Extension<Arc<SpeechAnalyzer>>,
    JsonBody(request): JsonBody<MultimodalRequest>,
) -> Result<Json<MultimodalResponse>, ServiceError> {
    METER.tick_multimodal();
    let MultimodalRequest {
        image,
        audio_base64,
    } = request;

    let face = async move {
        match non_empty(image) {
            Some(image) => {
                let face = run_blocking(move || face_analyzer.analyze_first(&image)).await?;
                Ok::<_, ServiceError>(face.as_ref().map(face_result))
            }
            None => Ok(None),
        }
    };

    let speech = async move {
        match non_empty(audio_base64) {
            Some(encoded) => {
                let speech = run_blocking(move || {
                    speech_analyzer.analyze_encoded(decode_base64(&encoded)?)
                })
                .await?;
                Ok::<_, ServiceError>(Some(speech_result(&speech)))
            }
            None => Ok(None),
        }
    };

    let (face, speech) = tokio::try_join!(face, speech)?;

    let combined = match (&face, &speech) {
        (Some(face), Some(speech)) => Some(fuse(face, speech)),
        _ => None,
    };
    if let Some(combined) = &combined {
        log::info!(
            "Combined emotion {} ({:.2}%)",
            combined.emotion,
            combined.confidence
        );
    }

    Ok(Json(MultimodalResponse {
        success: true,
        results: MultimodalResults {
            face,
            speech,
            combined,
        },
    }))
}

fn face_result(face: &FaceEmotion) -> ModalityResult {
    ModalityResult {
        emotion: face.emotion.into(),
        raw_emotion: face.raw_emotion.into(),
        confidence: face.confidence,
    }
}

fn speech_result(speech: &SpeechEmotion) -> ModalityResult {
    ModalityResult {
        emotion: speech.emotion.into(),
        raw_emotion: speech.raw_emotion.clone(),
        confidence: speech.confidence,
    }
}

/// Treat empty payload strings like absent ones.
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn is_multipart(request: &Request<Body>) -> bool {
    request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.starts_with("multipart/form-data"))
        .unwrap_or(false)
}

async fn audio_upload(mut multipart: Multipart) -> Result<Vec<u8>, ServiceError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| rejected_body(err.status(), err.body_text()))?
    {
        if field.name() == Some(AUDIO_FIELD) {
            let bytes = field
                .bytes()
                .await
                .map_err(|err| rejected_body(err.status(), err.body_text()))?;
            if bytes.is_empty() {
                return Err(ServiceError::MissingAudio);
            }
            return Ok(bytes.to_vec());
        }
    }

    Err(ServiceError::MissingAudio)
}

fn rejected_body(status: StatusCode, text: String) -> ServiceError {
    match status {
        StatusCode::PAYLOAD_TOO_LARGE => ServiceError::PayloadTooLarge,
        _ => ServiceError::BadRequest(text),
    }
}

/// Run model work on the blocking thread pool.
async fn run_blocking<T, F>(work: F) -> Result<T, ServiceError>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let result = tokio::task::spawn_blocking(work)
        .await
        .context("inference task failed")?;

    Ok(result?)
}

//! HTTP error type of the emotion services.
//!
use axum::{
    async_trait,
    body::Body,
    extract::FromRequest,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use common::protocol::ErrorResponse;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Hint sent along with a face request without a detectable face.
pub const NO_FACE_HINT: &str = "Please ensure your face is clearly visible in the frame";

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("No image provided")]
    MissingImage,

    #[error("No audio provided")]
    MissingAudio,

    #[error("No face detected")]
    NoFace,

    #[error("No faces detected")]
    NoFaces,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Request body too large")]
    PayloadTooLarge,

    #[error("{0:#}")]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    fn hint(&self) -> Option<String> {
        match self {
            ServiceError::NoFace => Some(NO_FACE_HINT.into()),
            _ => None,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("Request failed: {self} ({status})");
        } else {
            log::warn!("Request rejected: {self} ({status})");
        }

        let body = ErrorResponse {
            error: self.to_string(),
            message: self.hint(),
        };

        (status, Json(body)).into_response()
    }
}

/// JSON body extractor answering malformed bodies with a [`ServiceError`].
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S, Body> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request(req: Request<Body>, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|err| match err.status() {
                StatusCode::PAYLOAD_TOO_LARGE => ServiceError::PayloadTooLarge,
                _ => ServiceError::BadRequest(err.body_text()),
            })?;

        Ok(JsonBody(value))
    }
}

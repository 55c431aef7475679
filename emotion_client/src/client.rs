//! HTTP client of the emotion services.
//!
use std::path::Path;

use anyhow::{Context, Result};
use common::protocol::{FaceRequest, MultimodalRequest, SpeechRequest};
use reqwest::{multipart, Client, Response};
use serde::Serialize;
use serde_json::Value;

use crate::payload::{mime_type, read_base64, read_data_url};

pub struct EmotionClient {
    client: Client,
    base_url: String,
}

impl EmotionClient {
    pub fn new(address: &str) -> Self {
        let base_url = match address.starts_with("http://") || address.starts_with("https://") {
            true => address.trim_end_matches('/').to_owned(),
            false => format!("http://{}", address.trim_end_matches('/')),
        };

        Self {
            client: Client::new(),
            base_url,
        }
    }

    pub fn url(&self, route: &str) -> String {
        format!("{}/{}", self.base_url, route.trim_start_matches('/'))
    }

    pub async fn health(&self) -> Result<Value> {
        let response = self.client.get(self.url("health")).send().await?;
        read_json(response).await
    }

    pub async fn detect_face(&self, image: &Path, batch: bool) -> Result<Value> {
        let route = match batch {
            true => "detect-face-batch",
            false => "detect-face",
        };
        let request = FaceRequest {
            image: Some(read_data_url(image)?),
        };

        self.post_json(route, &request).await
    }

    pub async fn detect_speech(&self, audio: &Path, upload: bool) -> Result<Value> {
        if !upload {
            let request = SpeechRequest {
                audio_base64: Some(read_base64(audio)?),
            };
            return self.post_json("detect-speech", &request).await;
        }

        let bytes = std::fs::read(audio)
            .with_context(|| format!("failed to read {}", audio.display()))?;
        let filename = audio
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".into());
        let part = multipart::Part::bytes(bytes)
            .file_name(filename)
            .mime_str(mime_type(audio))?;
        let form = multipart::Form::new().part("audio", part);

        let response = self
            .client
            .post(self.url("detect-speech"))
            .multipart(form)
            .send()
            .await?;
        read_json(response).await
    }

    pub async fn detect_multimodal(
        &self,
        image: Option<&Path>,
        audio: Option<&Path>,
    ) -> Result<Value> {
        let request = MultimodalRequest {
            image: image.map(read_data_url).transpose()?,
            audio_base64: audio.map(read_base64).transpose()?,
        };

        self.post_json("detect-multimodal", &request).await
    }

    async fn post_json<T: Serialize>(&self, route: &str, body: &T) -> Result<Value> {
        let response = self.client.post(self.url(route)).json(body).send().await?;
        read_json(response).await
    }
}

/// Body of a response. Error statuses are logged and their JSON body is returned as well.
async fn read_json(response: Response) -> Result<Value> {
    let status = response.status();
    let body: Value = response
        .json()
        .await
        .with_context(|| format!("response with status {status} is not JSON"))?;

    if !status.is_success() {
        log::warn!("Service answered with status {status}");
    }

    Ok(body)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_url_joins_address_and_route() {
        let client = EmotionClient::new("127.0.0.1:5001");
        assert_eq!(client.url("/health"), "http://127.0.0.1:5001/health");

        let client = EmotionClient::new("https://emotions.example.com/");
        assert_eq!(
            client.url("detect-face"),
            "https://emotions.example.com/detect-face"
        );
    }
}

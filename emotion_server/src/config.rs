//! Command-line options shared by the service binaries.
//!
use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Args;

use crate::{face::FaceAnalyzer, nn::fetch_ultraface, speech::SpeechAnalyzer};

#[derive(Args, Debug)]
pub struct ServerArgs {
    /// Maximum accepted request body size in bytes
    #[clap(long, default_value = "26214400")]
    pub max_body_bytes: usize,
}

#[derive(Args, Debug)]
pub struct FaceModelArgs {
    /// ONNX face emotion classifier
    #[clap(long, default_value = "ai-models/face_emotion.onnx")]
    pub face_model: PathBuf,

    /// ONNX UltraFace detector, downloaded to the cache directory if not given
    #[clap(long)]
    pub face_detector: Option<PathBuf>,
}

impl FaceModelArgs {
    pub async fn load(&self) -> Result<Arc<FaceAnalyzer>> {
        let detector = match &self.face_detector {
            Some(path) => path.clone(),
            None => fetch_ultraface().await?,
        };

        log::info!(
            "Loading face classifier {} and detector {}",
            self.face_model.display(),
            detector.display()
        );
        let analyzer = FaceAnalyzer::from_paths(&self.face_model, &detector)?;

        Ok(Arc::new(analyzer))
    }
}

#[derive(Args, Debug)]
pub struct SpeechModelArgs {
    /// ONNX speech emotion classifier
    #[clap(long, default_value = "ai-models/speech_emotion.onnx")]
    pub speech_model: PathBuf,

    /// JSON array of the speech classifier's class names
    #[clap(long, default_value = "ai-models/label_encoder.json")]
    pub label_encoder: PathBuf,
}

impl SpeechModelArgs {
    pub fn load(&self) -> Result<Arc<SpeechAnalyzer>> {
        log::info!(
            "Loading speech classifier {} with labels {}",
            self.speech_model.display(),
            self.label_encoder.display()
        );
        let analyzer = SpeechAnalyzer::from_paths(&self.speech_model, &self.label_encoder)?;

        Ok(Arc::new(analyzer))
    }
}

pub fn parse_address(address: &str) -> Result<SocketAddr> {
    address
        .parse()
        .with_context(|| format!("invalid server address {address}"))
}

//! Speech emotion recognition.
//!
//! Clips are decoded and resampled to 22 050 Hz mono, turned into a fixed-size MFCC matrix and
//! classified frame-major as a `(1, frames, coefficients)` tensor.
use std::path::Path;

use anyhow::{bail, Context, Result};
use common::protocol::EmotionScores;
use ndarray::Axis;
use tract_onnx::prelude::*;

use crate::{
    audio::load_mono,
    labels::{app_label, display_label, LabelEncoder, FALLBACK_LABEL},
    mfcc::{MfccConfig, MfccExtractor},
    nn::{Classifier, OnnxClassifier, Prediction},
};

/// Model description reported by the speech endpoints.
pub const SPEECH_MODEL_TYPE: &str = "LSTM Speech Emotion Recognition";

/// Emotion of one speech clip.
#[derive(Clone, Debug)]
pub struct SpeechEmotion {
    pub emotion: &'static str,
    pub raw_emotion: String,
    /// Probability of `raw_emotion` in percent.
    pub confidence: f32,
    pub all_emotions: EmotionScores,
}

pub struct SpeechAnalyzer {
    classifier: Box<dyn Classifier>,
    encoder: LabelEncoder,
    extractor: MfccExtractor,
}

impl SpeechAnalyzer {
    pub fn new(classifier: Box<dyn Classifier>, encoder: LabelEncoder) -> Self {
        Self {
            classifier,
            encoder,
            extractor: MfccExtractor::new(MfccConfig::default()),
        }
    }

    /// Load the ONNX classifier and its label encoder.
    pub fn from_paths(classifier: impl AsRef<Path>, encoder: impl AsRef<Path>) -> Result<Self> {
        let config = MfccConfig::default();
        let classifier =
            OnnxClassifier::new(classifier, &[1, config.max_frames, config.n_mfcc])?;
        let encoder = LabelEncoder::from_path(encoder)?;

        Ok(Self::new(Box::new(classifier), encoder))
    }

    /// Rate the clip is resampled to before feature extraction.
    pub fn sample_rate(&self) -> u32 {
        self.extractor.config().sample_rate
    }

    /// Classify an encoded audio file.
    pub fn analyze_encoded(&self, bytes: Vec<u8>) -> Result<SpeechEmotion> {
        let samples = load_mono(bytes, self.sample_rate())?;
        self.analyze_samples(&samples)
    }

    /// Classify mono samples at [`Self::sample_rate`].
    pub fn analyze_samples(&self, samples: &[f32]) -> Result<SpeechEmotion> {
        let features = self.extractor.features(samples)?;
        // (coefficients, frames) -> (1, frames, coefficients)
        let input: Tensor = features
            .t()
            .as_standard_layout()
            .into_owned()
            .insert_axis(Axis(0))
            .into();

        let output = self.classifier.predict(input)?;
        if output.len() != self.encoder.len() {
            bail!(
                "speech classifier returned {} scores for {} classes",
                output.len(),
                self.encoder.len()
            );
        }

        let prediction = Prediction::from_output(output)?;
        let raw_emotion = self
            .encoder
            .inverse_transform(prediction.class_index)
            .context("predicted class missing from label encoder")?
            .to_owned();
        let emotion = app_label(&raw_emotion).unwrap_or(FALLBACK_LABEL);

        let all_emotions = self
            .encoder
            .classes()
            .iter()
            .zip(&prediction.probabilities)
            .map(|(raw, p)| (display_label(raw), p * 100.0))
            .collect();

        Ok(SpeechEmotion {
            emotion,
            raw_emotion,
            confidence: prediction.confidence(),
            all_emotions,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::{sine, wav_bytes, StubClassifier};

    fn encoder(classes: &[&str]) -> LabelEncoder {
        LabelEncoder::new(classes.iter().map(|c| c.to_string()).collect()).unwrap()
    }

    /// Classifier checking the tensor layout before answering.
    struct ShapeCheckingClassifier(Vec<f32>);

    impl Classifier for ShapeCheckingClassifier {
        fn predict(&self, input: Tensor) -> Result<Vec<f32>> {
            assert_eq!(input.shape(), &[1, 174, 40]);
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_calm_maps_to_calm() -> Result<()> {
        let analyzer = SpeechAnalyzer::new(
            Box::new(ShapeCheckingClassifier(vec![0.1, 0.7, 0.2])),
            encoder(&["angry", "calm", "sad"]),
        );

        let speech = analyzer.analyze_samples(&sine(220.0, 2.0, 22050))?;

        assert_eq!(speech.raw_emotion, "calm");
        assert_eq!(speech.emotion, "Calm");
        assert!((speech.confidence - 70.0).abs() < 1e-3);
        assert_eq!(
            speech.all_emotions.keys().collect::<Vec<_>>(),
            ["Angry", "Calm", "Sad"]
        );
        Ok(())
    }

    #[test]
    fn test_unknown_label_falls_back_to_neutral() -> Result<()> {
        let analyzer = SpeechAnalyzer::new(
            Box::new(StubClassifier(vec![0.2, 0.8])),
            encoder(&["happy", "bored"]),
        );

        let speech = analyzer.analyze_samples(&sine(220.0, 0.5, 22050))?;

        assert_eq!(speech.raw_emotion, "bored");
        assert_eq!(speech.emotion, "Neutral");
        assert!(speech.all_emotions.contains_key("Bored"));
        Ok(())
    }

    #[test]
    fn test_confidences_sum_to_hundred_for_logits() -> Result<()> {
        let analyzer = SpeechAnalyzer::new(
            Box::new(StubClassifier(vec![1.5, -0.3, 0.2, 2.5])),
            encoder(&["angry", "fear", "neutral", "surprise"]),
        );

        let speech = analyzer.analyze_samples(&sine(330.0, 1.0, 22050))?;

        assert_eq!(speech.emotion, "Excited");
        assert_eq!(speech.all_emotions.len(), 4);
        assert!((speech.all_emotions.values().sum::<f32>() - 100.0).abs() < 1e-3);
        assert!((0.0..=100.0).contains(&speech.confidence));
        Ok(())
    }

    #[test]
    fn test_encoded_wav_is_resampled_and_classified() -> Result<()> {
        let analyzer = SpeechAnalyzer::new(
            Box::new(ShapeCheckingClassifier(vec![0.9, 0.1])),
            encoder(&["happy", "sad"]),
        );

        let speech = analyzer.analyze_encoded(wav_bytes(&sine(440.0, 1.0, 16000), 16000, 1))?;

        assert_eq!(speech.emotion, "Happy");
        Ok(())
    }

    #[test]
    fn test_class_count_mismatch_is_an_error() {
        let analyzer =
            SpeechAnalyzer::new(Box::new(StubClassifier(vec![1.0])), encoder(&["a", "b"]));

        assert!(analyzer.analyze_samples(&sine(220.0, 0.5, 22050)).is_err());
    }

    #[test]
    fn test_empty_audio_is_an_error() {
        let analyzer =
            SpeechAnalyzer::new(Box::new(StubClassifier(vec![1.0])), encoder(&["happy"]));

        assert!(analyzer.analyze_samples(&[]).is_err());
    }
}

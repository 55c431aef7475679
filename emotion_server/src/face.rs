//! Facial emotion recognition.
//!
//! An encoded image is decoded, faces are located, and each face crop is converted to a 48x48
//! grayscale tensor scaled to `[0, 1]` before it is classified.
use std::path::Path;

use anyhow::{bail, Context, Result};
use common::protocol::{EmotionScores, FaceCoordinates};
use image::{GrayImage, Luma, RgbImage};
use imageproc::rect::Rect;
use tract_onnx::prelude::*;

use crate::{
    labels::{app_label, display_label, FACE_LABELS},
    nn::{Classifier, FaceLocator, OnnxClassifier, Prediction, UltrafaceModel},
    utils::{decode_base64, strip_data_url},
};

/// Side length of the square face crop fed to the classifier.
pub const FACE_SIZE: u32 = 48;

/// Model description reported by the face endpoints.
pub const FACE_MODEL_TYPE: &str = "Custom CNN (30 epochs)";

/// Minimum detector confidence of a face region.
const DETECTOR_MIN_CONFIDENCE: f32 = 0.5;

/// Maximum overlap of two reported face regions.
const DETECTOR_MAX_IOU: f32 = 0.5;

/// Emotion of one detected face.
#[derive(Clone, Debug)]
pub struct FaceEmotion {
    pub emotion: &'static str,
    pub raw_emotion: &'static str,
    /// Probability of `raw_emotion` in percent.
    pub confidence: f32,
    pub all_emotions: EmotionScores,
    pub region: FaceCoordinates,
}

pub struct FaceAnalyzer {
    locator: Box<dyn FaceLocator>,
    classifier: Box<dyn Classifier>,
}

impl FaceAnalyzer {
    pub fn new(locator: Box<dyn FaceLocator>, classifier: Box<dyn Classifier>) -> Self {
        Self {
            locator,
            classifier,
        }
    }

    /// Load the ONNX classifier and the UltraFace detector.
    pub fn from_paths(classifier: impl AsRef<Path>, detector: impl AsRef<Path>) -> Result<Self> {
        let classifier = OnnxClassifier::new(
            classifier,
            &[1, FACE_SIZE as usize, FACE_SIZE as usize, 1],
        )?;
        let locator = UltrafaceModel::new(detector, DETECTOR_MIN_CONFIDENCE, DETECTOR_MAX_IOU)?;

        Ok(Self::new(Box::new(locator), Box::new(classifier)))
    }

    /// Emotions of all faces in a base64 image, most confident detection first.
    pub fn analyze(&self, encoded: &str) -> Result<Vec<FaceEmotion>> {
        let image = decode_image(encoded)?;
        self.analyze_image(&image, usize::MAX)
    }

    /// Emotion of the most confidently detected face, if any.
    pub fn analyze_first(&self, encoded: &str) -> Result<Option<FaceEmotion>> {
        let image = decode_image(encoded)?;
        Ok(self.analyze_image(&image, 1)?.into_iter().next())
    }

    fn analyze_image(&self, image: &RgbImage, limit: usize) -> Result<Vec<FaceEmotion>> {
        let regions = self.locator.locate(image)?;
        log::debug!("Located {} face(s)", regions.len());

        let gray = to_gray(image);
        regions
            .into_iter()
            .filter_map(|region| clamp_region(region, gray.width(), gray.height()))
            .take(limit)
            .map(|region| self.classify(&gray, region))
            .collect()
    }

    fn classify(&self, gray: &GrayImage, region: FaceCoordinates) -> Result<FaceEmotion> {
        let output = self.classifier.predict(face_tensor(gray, region))?;
        if output.len() != FACE_LABELS.len() {
            bail!(
                "face classifier returned {} scores for {} classes",
                output.len(),
                FACE_LABELS.len()
            );
        }

        let prediction = Prediction::from_output(output)?;
        let raw_emotion = FACE_LABELS[prediction.class_index];
        let emotion = app_label(raw_emotion).context("face label without application label")?;

        let all_emotions = FACE_LABELS
            .iter()
            .zip(&prediction.probabilities)
            .map(|(raw, p)| (display_label(raw), p * 100.0))
            .collect();

        Ok(FaceEmotion {
            emotion,
            raw_emotion,
            confidence: prediction.confidence(),
            all_emotions,
            region,
        })
    }
}

/// Decode a base64 image, optionally prefixed with a data URL header.
pub fn decode_image(encoded: &str) -> Result<RgbImage> {
    let bytes = decode_base64(strip_data_url(encoded))?;
    let image = image::load_from_memory(&bytes).context("failed to decode image")?;

    Ok(image.to_rgb8())
}

/// Grayscale conversion with ITU-R BT.601 luma weights.
fn to_gray(image: &RgbImage) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let [r, g, b] = image.get_pixel(x, y).0;
        let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
        Luma([luma.round().min(255.0) as u8])
    })
}

/// Intersect a region with the image. Returns `None` if nothing is left.
fn clamp_region(region: Rect, width: u32, height: u32) -> Option<FaceCoordinates> {
    let x0 = region.left().clamp(0, width as i32) as u32;
    let y0 = region.top().clamp(0, height as i32) as u32;
    let x1 = (region.right() + 1).clamp(0, width as i32) as u32;
    let y1 = (region.bottom() + 1).clamp(0, height as i32) as u32;

    if x1 <= x0 || y1 <= y0 {
        return None;
    }

    Some(FaceCoordinates {
        x: x0,
        y: y0,
        w: x1 - x0,
        h: y1 - y0,
    })
}

/// Crop a face, resize it to `FACE_SIZE` and build a `(1, 48, 48, 1)` tensor in `[0, 1]`.
fn face_tensor(gray: &GrayImage, region: FaceCoordinates) -> Tensor {
    let crop = image::imageops::crop_imm(gray, region.x, region.y, region.w, region.h).to_image();
    let resized = image::imageops::resize(
        &crop,
        FACE_SIZE,
        FACE_SIZE,
        image::imageops::FilterType::Triangle,
    );

    tract_ndarray::Array4::from_shape_fn(
        (1, FACE_SIZE as usize, FACE_SIZE as usize, 1),
        |(_, y, x, _)| resized[(x as _, y as _)][0] as f32 / 255.0,
    )
    .into()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::{png_base64, StubClassifier, StubLocator};

    const SCORES: [f32; 7] = [0.05, 0.05, 0.1, 0.6, 0.1, 0.05, 0.05];

    /// Classifier checking the tensor layout before answering.
    struct ShapeCheckingClassifier;

    impl Classifier for ShapeCheckingClassifier {
        fn predict(&self, input: Tensor) -> Result<Vec<f32>> {
            assert_eq!(input.shape(), &[1, 48, 48, 1]);
            let view = input.to_array_view::<f32>()?;
            assert!(view.iter().all(|p| (0.0..=1.0).contains(p)));

            Ok(SCORES.to_vec())
        }
    }

    fn analyzer(regions: Vec<Rect>, classifier: Box<dyn Classifier>) -> FaceAnalyzer {
        FaceAnalyzer::new(Box::new(StubLocator(regions)), classifier)
    }

    #[test]
    fn test_first_face_is_classified() -> Result<()> {
        let analyzer = analyzer(
            vec![
                Rect::at(10, 20).of_size(40, 40),
                Rect::at(60, 5).of_size(30, 30),
            ],
            Box::new(ShapeCheckingClassifier),
        );

        let face = analyzer.analyze_first(&png_base64(120, 80))?.unwrap();

        assert_eq!(face.raw_emotion, "Happy");
        assert_eq!(face.emotion, "Happy");
        assert!((face.confidence - 60.0).abs() < 1e-3);
        assert_eq!(
            face.region,
            FaceCoordinates {
                x: 10,
                y: 20,
                w: 40,
                h: 40
            }
        );
        Ok(())
    }

    #[test]
    fn test_all_emotions_cover_every_class() -> Result<()> {
        let analyzer = analyzer(
            vec![Rect::at(0, 0).of_size(30, 30)],
            Box::new(StubClassifier(SCORES.to_vec())),
        );

        let faces = analyzer.analyze(&png_base64(64, 64))?;
        let all_emotions = &faces[0].all_emotions;

        assert_eq!(all_emotions.len(), 7);
        assert!((all_emotions.values().sum::<f32>() - 100.0).abs() < 1e-3);
        assert!((all_emotions["Stressed"] - 5.0).abs() < 1e-4);
        assert!((all_emotions["Excited"] - 5.0).abs() < 1e-4);
        Ok(())
    }

    #[test]
    fn test_batch_keeps_detector_order() -> Result<()> {
        let analyzer = analyzer(
            vec![
                Rect::at(40, 0).of_size(20, 20),
                Rect::at(0, 0).of_size(20, 20),
            ],
            Box::new(StubClassifier(SCORES.to_vec())),
        );

        let faces = analyzer.analyze(&png_base64(64, 64))?;

        assert_eq!(faces.len(), 2);
        assert_eq!(faces[0].region.x, 40);
        assert_eq!(faces[1].region.x, 0);
        Ok(())
    }

    #[test]
    fn test_no_face_yields_none() -> Result<()> {
        let analyzer = analyzer(vec![], Box::new(StubClassifier(SCORES.to_vec())));

        assert!(analyzer.analyze_first(&png_base64(32, 32))?.is_none());
        Ok(())
    }

    #[test]
    fn test_data_url_prefix_is_accepted() -> Result<()> {
        let analyzer = analyzer(
            vec![Rect::at(0, 0).of_size(16, 16)],
            Box::new(StubClassifier(SCORES.to_vec())),
        );

        let encoded = format!("data:image/png;base64,{}", png_base64(32, 32));

        assert!(analyzer.analyze_first(&encoded)?.is_some());
        Ok(())
    }

    #[test]
    fn test_wrong_class_count_is_an_error() {
        let analyzer = analyzer(
            vec![Rect::at(0, 0).of_size(16, 16)],
            Box::new(StubClassifier(vec![0.5, 0.5])),
        );

        assert!(analyzer.analyze(&png_base64(32, 32)).is_err());
    }

    #[test]
    fn test_undecodable_image_is_an_error() {
        let analyzer = analyzer(vec![], Box::new(StubClassifier(SCORES.to_vec())));

        assert!(analyzer.analyze("aGVsbG8=").is_err());
    }

    #[test]
    fn test_regions_outside_the_image_are_clamped_or_dropped() {
        let clamped = clamp_region(Rect::at(-5, 10).of_size(20, 100), 50, 40).unwrap();
        assert_eq!(
            clamped,
            FaceCoordinates {
                x: 0,
                y: 10,
                w: 15,
                h: 30
            }
        );

        assert!(clamp_region(Rect::at(60, 0).of_size(10, 10), 50, 40).is_none());
    }

    #[test]
    fn test_face_tensor_scales_intensities() {
        let gray = GrayImage::from_fn(100, 100, |x, _| Luma([if x < 50 { 0 } else { 255 }]));

        let tensor = face_tensor(
            &gray,
            FaceCoordinates {
                x: 0,
                y: 0,
                w: 100,
                h: 100,
            },
        );
        let view = tensor.to_array_view::<f32>().unwrap();

        assert!(view[[0, 10, 0, 0]] < 0.01);
        assert!(view[[0, 10, 47, 0]] > 0.99);
    }

    #[test]
    fn test_gray_uses_bt601_weights() {
        let rgb = RgbImage::from_pixel(1, 1, image::Rgb([255, 0, 0]));
        assert_eq!(to_gray(&rgb).get_pixel(0, 0).0, [76]);
    }
}

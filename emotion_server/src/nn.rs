//! Neural network models run through `tract`.
//!
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use image::RgbImage;
use imageproc::rect::Rect;
use itertools::Itertools;
use ndarray::s;
use reqwest::Client;
use tract_onnx::prelude::*;

use crate::utils::download_file;

type NnModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Positive additive constant to avoid divide-by-zero.
const EPS: f32 = 1.0e-7;

/// Allowed deviation of a model output sum from 1 before it is treated as logits.
const DISTRIBUTION_TOLERANCE: f32 = 1.0e-3;

/// Public location of the UltraFace RFB-320 detector.
pub const ULTRAFACE_URL: &str = "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/ultraface/models/version-RFB-320.onnx";

/// Model turning an input tensor into one score per class.
pub trait Classifier: Send + Sync {
    fn predict(&self, input: Tensor) -> Result<Vec<f32>>;
}

/// Model locating faces in an image.
pub trait FaceLocator: Send + Sync {
    /// Face regions in pixel coordinates, most confident first.
    fn locate(&self, image: &RgbImage) -> Result<Vec<Rect>>;
}

/// Class index and probabilities of one forward pass.
#[derive(Clone, Debug, PartialEq)]
pub struct Prediction {
    pub class_index: usize,
    pub probabilities: Vec<f32>,
}

impl Prediction {
    /// Build a prediction from raw classifier output.
    ///
    /// Outputs that are not a probability distribution are passed through a softmax first.
    pub fn from_output(output: Vec<f32>) -> Result<Self> {
        let probabilities = as_distribution(output);

        // First maximum wins on ties.
        let class_index = probabilities
            .iter()
            .position_min_by(|a, b| b.total_cmp(a))
            .context("classifier returned no scores")?;

        Ok(Self {
            class_index,
            probabilities,
        })
    }

    /// Probability of the predicted class in percent.
    pub fn confidence(&self) -> f32 {
        self.probabilities[self.class_index] * 100.0
    }
}

fn as_distribution(scores: Vec<f32>) -> Vec<f32> {
    let sum: f32 = scores.iter().sum();
    if scores.iter().all(|p| *p >= 0.0) && (sum - 1.0).abs() <= DISTRIBUTION_TOLERANCE {
        return scores;
    }

    softmax(&scores)
}

fn softmax(scores: &[f32]) -> Vec<f32> {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scores.iter().map(|x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();

    exps.into_iter().map(|x| x / sum).collect()
}

/// Classifier loaded from an ONNX file with a fixed input shape.
pub struct OnnxClassifier {
    model: NnModel,
    input_shape: Vec<usize>,
}

impl OnnxClassifier {
    pub fn new(path: impl AsRef<Path>, input_shape: &[usize]) -> Result<Self> {
        let path = path.as_ref();
        let model = load_model(path, input_shape)
            .with_context(|| format!("failed to load classifier {}", path.display()))?;

        Ok(Self {
            model,
            input_shape: input_shape.to_vec(),
        })
    }
}

impl Classifier for OnnxClassifier {
    fn predict(&self, input: Tensor) -> Result<Vec<f32>> {
        if input.shape() != self.input_shape.as_slice() {
            bail!(
                "input shape {:?} does not match model input {:?}",
                input.shape(),
                self.input_shape
            );
        }

        let outputs = self.model.run(tvec!(input.into()))?;
        let scores = outputs[0].to_array_view::<f32>()?.iter().copied().collect();

        Ok(scores)
    }
}

fn load_model(path: &Path, input_shape: &[usize]) -> Result<NnModel> {
    let shape: TVec<usize> = input_shape.iter().copied().collect();
    let input_fact = InferenceFact::dt_shape(f32::datum_type(), shape);
    let model = tract_onnx::onnx()
        .model_for_path(path)?
        .with_input_fact(0, input_fact)?
        .into_optimized()?
        .into_runnable()?;

    Ok(model)
}

/// UltraFace RFB-320 face detector.
pub struct UltrafaceModel {
    model: NnModel,
    width: u32,
    height: u32,
    max_iou: f32,
    min_confidence: f32,
}

impl UltrafaceModel {
    pub fn new(path: impl AsRef<Path>, min_confidence: f32, max_iou: f32) -> Result<Self> {
        let (width, height) = (320, 240);
        let path = path.as_ref();
        let model = load_model(path, &[1, 3, height as usize, width as usize])
            .with_context(|| format!("failed to load face detector {}", path.display()))?;

        Ok(Self {
            model,
            width,
            height,
            max_iou,
            min_confidence,
        })
    }

    fn preproc(&self, input: &RgbImage) -> Tensor {
        let resized: RgbImage = image::imageops::resize(
            input,
            self.width,
            self.height,
            image::imageops::FilterType::Triangle,
        );

        tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, self.width as usize),
            |(_, c, y, x)| (resized[(x as _, y as _)][c] as f32 - 127.0) / 128.0,
        )
        .into()
    }

    /// Select boxes from the detector outputs and scale them to the input image.
    ///
    /// Output 0 holds `(1, N, 2)` background/face scores, output 1 holds `(1, N, 4)` boxes as
    /// `[x_top_left, y_top_left, x_bottom_right, y_bottom_right]` relative to the image size.
    fn postproc(&self, scores: &Tensor, boxes: &Tensor, width: u32, height: u32) -> Result<Vec<Rect>> {
        let confidences = scores
            .to_array_view::<f32>()?
            .slice(s![0, .., 1])
            .to_vec();

        let bboxes: Vec<f32> = boxes.to_array_view::<f32>()?.iter().copied().collect();
        let bboxes: Vec<[f32; 4]> = bboxes
            .chunks_exact(4)
            .map(|x| [x[0], x[1], x[2], x[3]])
            .collect();

        let mut bboxes_with_confidences: Vec<_> = confidences
            .iter()
            .zip(bboxes.iter())
            .filter(|(confidence, _)| **confidence > self.min_confidence)
            .collect();

        bboxes_with_confidences.sort_by(|a, b| a.0.total_cmp(b.0));

        let selected = non_maximum_suppression(bboxes_with_confidences, self.max_iou);

        Ok(selected
            .iter()
            .filter_map(|(_, bbox)| to_pixel_rect(bbox, width, height))
            .collect())
    }
}

impl FaceLocator for UltrafaceModel {
    fn locate(&self, image: &RgbImage) -> Result<Vec<Rect>> {
        let (width, height) = image.dimensions();
        let outputs = self.model.run(tvec!(self.preproc(image).into()))?;
        if outputs.len() < 2 {
            bail!("face detector returned {} outputs, expected 2", outputs.len());
        }

        self.postproc(&outputs[0], &outputs[1], width, height)
    }
}

/// Path of the cached UltraFace model, downloading it on first use.
pub async fn fetch_ultraface() -> Result<PathBuf> {
    let cache_dir = dirs::cache_dir()
        .context("no cache directory on this platform")?
        .join("emotion_server");
    let filepath = cache_dir.join("version-RFB-320.onnx");

    if !filepath.exists() {
        std::fs::create_dir_all(&cache_dir)?;
        log::info!("Downloading face detector to {}", filepath.display());
        download_file(&Client::new(), ULTRAFACE_URL, &filepath).await?;
    }

    Ok(filepath)
}

/// Run non-maximum-suppression on candidate bounding boxes.
///
/// Start with the most confident bounding box and iterate over all other bounding boxes in the
/// order of sinking confidence. Grow the vector of selected bounding boxes by adding only those
/// candidates which do not have an IoU above `max_iou` with already chosen bounding boxes. The
/// result is ordered by descending confidence.
fn non_maximum_suppression(
    mut sorted_bboxes_with_confidences: Vec<(&f32, &[f32; 4])>,
    max_iou: f32,
) -> Vec<(f32, [f32; 4])> {
    let mut selected: Vec<(f32, [f32; 4])> = vec![];
    'candidates: loop {
        // Get next most confident bbox from the back of ascending-sorted vector.
        match sorted_bboxes_with_confidences.pop() {
            Some((confidence, bbox)) => {
                for (_, selected_bbox) in selected.iter() {
                    if iou(bbox, selected_bbox) > max_iou {
                        continue 'candidates;
                    }
                }

                selected.push((*confidence, *bbox))
            }
            None => break 'candidates,
        }
    }

    selected
}

/// Calculate the intersection-over-union metric for two bounding boxes.
fn iou(bbox_a: &[f32; 4], bbox_b: &[f32; 4]) -> f32 {
    // If the boxes do not overlap, the top left corner of the overlap box lies below and to the
    // right of its bottom right corner and the area is zero.
    let overlap_box: [f32; 4] = [
        f32::max(bbox_a[0], bbox_b[0]),
        f32::max(bbox_a[1], bbox_b[1]),
        f32::min(bbox_a[2], bbox_b[2]),
        f32::min(bbox_a[3], bbox_b[3]),
    ];

    let overlap_area = bbox_area(&overlap_box);

    overlap_area / (bbox_area(bbox_a) + bbox_area(bbox_b) - overlap_area + EPS)
}

/// Calculate the area enclosed by a bounding box.
///
/// The bounding box is passed as four-element array defining two points:
/// `[x_top_left, y_top_left, x_bottom_right, y_bottom_right]`
/// If the bottom-right point lies above/to the left of the top-left point, the area is zero.
fn bbox_area(bbox: &[f32; 4]) -> f32 {
    let width = bbox[2] - bbox[0];
    let height = bbox[3] - bbox[1];
    if width < 0.0 || height < 0.0 {
        return 0.0;
    }

    width * height
}

/// Scale a relative bounding box to pixels, clamped to the image. Empty boxes are dropped.
fn to_pixel_rect(bbox: &[f32; 4], width: u32, height: u32) -> Option<Rect> {
    let (w, h) = (width as f32, height as f32);
    let x_tl = (bbox[0].clamp(0.0, 1.0) * w).floor();
    let y_tl = (bbox[1].clamp(0.0, 1.0) * h).floor();
    let x_br = (bbox[2].clamp(0.0, 1.0) * w).ceil().min(w);
    let y_br = (bbox[3].clamp(0.0, 1.0) * h).ceil().min(h);

    let rect_width = (x_br - x_tl) as u32;
    let rect_height = (y_br - y_tl) as u32;
    if rect_width == 0 || rect_height == 0 {
        return None;
    }

    Some(Rect::at(x_tl as i32, y_tl as i32).of_size(rect_width, rect_height))
}

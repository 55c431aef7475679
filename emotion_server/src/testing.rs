//! Fixtures and stand-in models for unit tests.
use std::io::Cursor;

use anyhow::Result;
use base64::{engine::general_purpose::STANDARD, Engine};
use image::{DynamicImage, GrayImage, ImageOutputFormat, Luma, RgbImage};
use imageproc::rect::Rect;
use tract_onnx::prelude::Tensor;

use crate::nn::{Classifier, FaceLocator};

/// Sine tone with amplitude 0.5.
pub fn sine(frequency: f32, seconds: f32, sample_rate: u32) -> Vec<f32> {
    let n = (seconds * sample_rate as f32) as usize;
    (0..n)
        .map(|i| {
            0.5 * (2.0 * std::f32::consts::PI * frequency * i as f32 / sample_rate as f32).sin()
        })
        .collect()
}

/// 16 bit PCM WAV file of interleaved samples.
pub fn wav_bytes(samples: &[f32], sample_rate: u32, channels: u16) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).expect("wav writer");
        for sample in samples {
            writer
                .write_sample((sample * i16::MAX as f32) as i16)
                .expect("wav sample");
        }
        writer.finalize().expect("wav finalize");
    }

    cursor.into_inner()
}

/// Horizontal gray gradient as PNG, base64 encoded.
pub fn png_base64(width: u32, height: u32) -> String {
    let gray = GrayImage::from_fn(width, height, |x, _| Luma([(x * 255 / width.max(1)) as u8]));

    let mut cursor = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(gray)
        .write_to(&mut cursor, ImageOutputFormat::Png)
        .expect("png encoding");

    STANDARD.encode(cursor.into_inner())
}

/// Face locator returning fixed regions.
pub struct StubLocator(pub Vec<Rect>);

impl FaceLocator for StubLocator {
    fn locate(&self, _image: &RgbImage) -> Result<Vec<Rect>> {
        Ok(self.0.clone())
    }
}

/// Classifier returning fixed scores.
pub struct StubClassifier(pub Vec<f32>);

impl Classifier for StubClassifier {
    fn predict(&self, _input: Tensor) -> Result<Vec<f32>> {
        Ok(self.0.clone())
    }
}

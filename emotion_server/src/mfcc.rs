//! MFCC feature extraction.
//!
//! Reproduces the features the speech model was trained on: librosa's `feature.mfcc` with default
//! parameters (centred STFT with a periodic Hann window, Slaney mel filterbank, power in dB with an
//! 80 dB floor, orthonormal DCT-II), padded or truncated to a fixed number of frames.
use std::f64::consts::PI;
use std::sync::Arc;

use anyhow::{bail, Result};
use ndarray::{s, Array2};
use realfft::{RealFftPlanner, RealToComplex};

/// Floor applied to mel power before taking the logarithm.
const AMIN: f32 = 1.0e-10;

#[derive(Clone, Debug)]
pub struct MfccConfig {
    pub sample_rate: u32,
    pub n_fft: usize,
    pub hop_length: usize,
    pub n_mels: usize,
    pub n_mfcc: usize,
    /// Number of frames of the padded/truncated feature matrix.
    pub max_frames: usize,
    /// Dynamic range kept below the loudest mel bin.
    pub top_db: f32,
}

impl Default for MfccConfig {
    fn default() -> Self {
        Self {
            sample_rate: 22050,
            n_fft: 2048,
            hop_length: 512,
            n_mels: 128,
            n_mfcc: 40,
            max_frames: 174,
            top_db: 80.0,
        }
    }
}

/// MFCC extractor with pre-computed window, filterbank, DCT basis and FFT plan.
pub struct MfccExtractor {
    config: MfccConfig,
    fft: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    mel_filterbank: Vec<Vec<f32>>,
    dct_basis: Vec<Vec<f32>>,
}

impl MfccExtractor {
    pub fn new(config: MfccConfig) -> Self {
        // Periodic Hann window
        let window = (0..config.n_fft)
            .map(|i| (0.5 - 0.5 * (2.0 * PI * i as f64 / config.n_fft as f64).cos()) as f32)
            .collect();

        let mel_filterbank = slaney_mel_filterbank(
            config.n_mels,
            config.n_fft,
            config.sample_rate as f64,
            0.0,
            config.sample_rate as f64 / 2.0,
        );
        let dct_basis = orthonormal_dct_basis(config.n_mfcc, config.n_mels);

        let fft = RealFftPlanner::<f32>::new().plan_fft_forward(config.n_fft);

        Self {
            config,
            fft,
            window,
            mel_filterbank,
            dct_basis,
        }
    }

    pub fn config(&self) -> &MfccConfig {
        &self.config
    }

    /// Feature matrix of shape `(n_mfcc, max_frames)`.
    ///
    /// Longer clips are truncated, shorter ones are right-padded with zeros.
    pub fn features(&self, audio: &[f32]) -> Result<Array2<f32>> {
        let mfcc = self.compute(audio)?;
        let frames = mfcc.ncols();
        let max_frames = self.config.max_frames;

        if frames >= max_frames {
            return Ok(mfcc.slice(s![.., ..max_frames]).to_owned());
        }

        let mut padded = Array2::<f32>::zeros((self.config.n_mfcc, max_frames));
        padded.slice_mut(s![.., ..frames]).assign(&mfcc);

        Ok(padded)
    }

    /// MFCC matrix of shape `(n_mfcc, frames)` with `frames = 1 + audio.len() / hop_length`.
    pub fn compute(&self, audio: &[f32]) -> Result<Array2<f32>> {
        if audio.is_empty() {
            bail!("cannot extract features from empty audio");
        }

        let mel_db = self.mel_db(audio)?;
        let frames = mel_db.ncols();

        let mut mfcc = Array2::<f32>::zeros((self.config.n_mfcc, frames));
        for (coefficient, basis) in self.dct_basis.iter().enumerate() {
            for frame in 0..frames {
                mfcc[[coefficient, frame]] = basis
                    .iter()
                    .zip(mel_db.column(frame).iter())
                    .map(|(b, m)| b * m)
                    .sum();
            }
        }

        Ok(mfcc)
    }

    /// Log-mel spectrogram in dB, shape `(n_mels, frames)`.
    fn mel_db(&self, audio: &[f32]) -> Result<Array2<f32>> {
        let mut mel = self.mel_power(audio)?;

        mel.mapv_inplace(|x| 10.0 * x.max(AMIN).log10());
        let max_db = mel.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let floor = max_db - self.config.top_db;
        mel.mapv_inplace(|x| x.max(floor));

        Ok(mel)
    }

    /// Mel power spectrogram, shape `(n_mels, frames)`.
    fn mel_power(&self, audio: &[f32]) -> Result<Array2<f32>> {
        let n_fft = self.config.n_fft;
        let hop_length = self.config.hop_length;

        // Centre frames on their sample by zero padding half a window on both sides
        let pad = n_fft / 2;
        let mut padded = vec![0.0f32; audio.len() + 2 * pad];
        padded[pad..pad + audio.len()].copy_from_slice(audio);

        let frames = 1 + (padded.len() - n_fft) / hop_length;
        let mut mel = Array2::<f32>::zeros((self.config.n_mels, frames));

        let mut fft_input = self.fft.make_input_vec();
        let mut fft_output = self.fft.make_output_vec();
        let mut power = vec![0.0f32; fft_output.len()];

        for frame in 0..frames {
            let start = frame * hop_length;
            for ((input, sample), weight) in fft_input
                .iter_mut()
                .zip(&padded[start..start + n_fft])
                .zip(&self.window)
            {
                *input = sample * weight;
            }

            self.fft
                .process(&mut fft_input, &mut fft_output)
                .map_err(|e| anyhow::anyhow!("FFT failed: {e}"))?;

            for (p, c) in power.iter_mut().zip(&fft_output) {
                *p = c.re * c.re + c.im * c.im;
            }

            for (band, filter) in self.mel_filterbank.iter().enumerate() {
                mel[[band, frame]] = filter.iter().zip(&power).map(|(f, p)| f * p).sum();
            }
        }

        Ok(mel)
    }
}

/// Convert frequency to the Slaney mel scale: linear below 1 kHz, logarithmic above.
fn hz_to_mel(hz: f64) -> f64 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = 6.4f64.ln() / 27.0;

    if hz >= min_log_hz {
        min_log_mel + (hz / min_log_hz).ln() / logstep
    } else {
        hz / f_sp
    }
}

/// Convert Slaney mel back to frequency.
fn mel_to_hz(mel: f64) -> f64 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = 6.4f64.ln() / 27.0;

    if mel >= min_log_mel {
        min_log_hz * (logstep * (mel - min_log_mel)).exp()
    } else {
        f_sp * mel
    }
}

/// Centre frequencies bounding the triangular filters: `n_mels + 2` points equally spaced in mel.
fn mel_frequencies(n_mels: usize, fmin: f64, fmax: f64) -> Vec<f64> {
    let mel_min = hz_to_mel(fmin);
    let mel_max = hz_to_mel(fmax);

    (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_min + (mel_max - mel_min) * i as f64 / (n_mels + 1) as f64))
        .collect()
}

/// Triangular mel filters over the `n_fft / 2 + 1` FFT bins, area-normalised (Slaney).
fn slaney_mel_filterbank(
    n_mels: usize,
    n_fft: usize,
    sample_rate: f64,
    fmin: f64,
    fmax: f64,
) -> Vec<Vec<f32>> {
    let n_bins = n_fft / 2 + 1;
    let fft_freqs: Vec<f64> = (0..n_bins)
        .map(|bin| bin as f64 * sample_rate / n_fft as f64)
        .collect();
    let mel_f = mel_frequencies(n_mels, fmin, fmax);

    (0..n_mels)
        .map(|i| {
            let (left, center, right) = (mel_f[i], mel_f[i + 1], mel_f[i + 2]);
            let enorm = 2.0 / (right - left);

            fft_freqs
                .iter()
                .map(|&freq| {
                    let lower = (freq - left) / (center - left);
                    let upper = (right - freq) / (right - center);
                    (lower.min(upper).max(0.0) * enorm) as f32
                })
                .collect()
        })
        .collect()
}

/// First `n_out` rows of the orthonormal DCT-II matrix of size `n_in`.
fn orthonormal_dct_basis(n_out: usize, n_in: usize) -> Vec<Vec<f32>> {
    let n = n_in as f64;

    (0..n_out)
        .map(|k| {
            let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
            (0..n_in)
                .map(|i| (scale * (PI * k as f64 * (2 * i + 1) as f64 / (2.0 * n)).cos()) as f32)
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    fn tone(frequency: f32, seconds: f32, sample_rate: u32) -> Vec<f32> {
        let n = (seconds * sample_rate as f32) as usize;
        (0..n)
            .map(|i| {
                0.5 * (2.0 * std::f32::consts::PI * frequency * i as f32 / sample_rate as f32).sin()
            })
            .collect()
    }

    #[test]
    fn test_slaney_mel_scale() {
        assert!((hz_to_mel(1000.0) - 15.0).abs() < 1e-9);
        assert!((hz_to_mel(200.0) - 3.0).abs() < 1e-9);

        for hz in [50.0, 440.0, 1000.0, 4000.0, 11025.0] {
            assert!((mel_to_hz(hz_to_mel(hz)) - hz).abs() < 1e-6);
        }
    }

    #[test]
    fn test_filterbank_shape_and_weights() {
        let filterbank = slaney_mel_filterbank(128, 2048, 22050.0, 0.0, 11025.0);

        assert_eq!(filterbank.len(), 128);
        for filter in &filterbank {
            assert_eq!(filter.len(), 1025);
            assert!(filter.iter().all(|w| *w >= 0.0));
            assert!(filter.iter().sum::<f32>() > 0.0);
        }
    }

    #[test]
    fn test_dct_basis_is_orthonormal() {
        let basis = orthonormal_dct_basis(40, 128);

        for (i, a) in basis.iter().enumerate() {
            for (j, b) in basis.iter().enumerate() {
                let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((dot - expected).abs() < 1e-4, "rows {i} and {j}: {dot}");
            }
        }
    }

    #[test]
    fn test_frame_count_follows_hop_length() -> Result<()> {
        let extractor = MfccExtractor::new(MfccConfig::default());

        let mfcc = extractor.compute(&tone(440.0, 1.0, 22050))?;

        assert_eq!(mfcc.dim(), (40, 1 + 22050 / 512));
        Ok(())
    }

    #[test]
    fn test_features_are_padded_to_fixed_size() -> Result<()> {
        let extractor = MfccExtractor::new(MfccConfig::default());
        let audio = tone(440.0, 1.0, 22050);

        let mfcc = extractor.compute(&audio)?;
        let features = extractor.features(&audio)?;

        assert_eq!(features.dim(), (40, 174));
        assert_eq!(features.slice(s![.., ..mfcc.ncols()]), mfcc);
        assert!(features.slice(s![.., mfcc.ncols()..]).iter().all(|x| *x == 0.0));
        Ok(())
    }

    #[test]
    fn test_features_are_truncated_to_fixed_size() -> Result<()> {
        let extractor = MfccExtractor::new(MfccConfig::default());
        let audio = tone(440.0, 5.0, 22050);

        let mfcc = extractor.compute(&audio)?;
        let features = extractor.features(&audio)?;

        assert!(mfcc.ncols() > 174);
        assert_eq!(features.dim(), (40, 174));
        assert_eq!(features, mfcc.slice(s![.., ..174]));
        Ok(())
    }

    #[test]
    fn test_silence_yields_flat_cepstrum() -> Result<()> {
        let extractor = MfccExtractor::new(MfccConfig::default());

        let mfcc = extractor.compute(&[0.0f32; 4096])?;

        // All mel bins sit at the -100 dB floor, so only the DC coefficient is non-zero
        let expected_c0 = -100.0 * (128.0f32).sqrt();
        for frame in mfcc.columns() {
            assert!((frame[0] - expected_c0).abs() < 1e-2);
            assert!(frame.iter().skip(1).all(|c| c.abs() < 1e-2));
        }
        Ok(())
    }

    #[test]
    fn test_tone_energy_lands_in_matching_mel_band() -> Result<()> {
        let extractor = MfccExtractor::new(MfccConfig::default());

        let mel = extractor.mel_power(&tone(440.0, 1.0, 22050))?;
        let band_energy: Vec<f32> = mel.rows().into_iter().map(|row| row.sum()).collect();
        let loudest = band_energy
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(band, _)| band)
            .unwrap();

        let centers = mel_frequencies(128, 0.0, 11025.0);
        assert!((centers[loudest + 1] - 440.0).abs() < 60.0);
        Ok(())
    }

    #[test]
    fn test_empty_audio_is_rejected() {
        let extractor = MfccExtractor::new(MfccConfig::default());
        assert!(extractor.compute(&[]).is_err());
    }
}

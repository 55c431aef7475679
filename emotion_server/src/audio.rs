//! Audio decoding and resampling.
//!
//! Encoded clips (WAV, FLAC, OGG/Vorbis, MP3) are decoded with symphonia, down-mixed to mono and
//! resampled with rubato to the rate the speech model expects.
use std::io::Cursor;

use anyhow::{bail, Context, Result};
use rubato::{FftFixedIn, Resampler};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Input frames per resampler call.
const RESAMPLE_CHUNK: usize = 1024;

/// Decoded PCM samples.
#[derive(Debug)]
pub struct DecodedAudio {
    /// Interleaved samples in `[-1, 1]`.
    pub samples: Vec<f32>,
    pub channels: usize,
    pub sample_rate: u32,
}

impl DecodedAudio {
    /// Average all channels into one.
    pub fn to_mono(&self) -> Vec<f32> {
        if self.channels <= 1 {
            return self.samples.clone();
        }

        self.samples
            .chunks_exact(self.channels)
            .map(|frame| frame.iter().sum::<f32>() / self.channels as f32)
            .collect()
    }

    pub fn duration_s(&self) -> f32 {
        self.samples.len() as f32 / (self.channels.max(1) as f32 * self.sample_rate as f32)
    }
}

/// Decode an encoded audio clip held in memory.
pub fn decode(bytes: Vec<u8>) -> Result<DecodedAudio> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    let probed = symphonia::default::get_probe()
        .format(
            &Hint::new(),
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .context("unrecognised audio format")?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .context("no audio track found")?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .context("audio track has no sample rate")?;
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .context("unsupported audio codec")?;

    let mut samples = Vec::new();
    let mut channels = 1;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                continue;
            }
            Err(e) => return Err(e).context("failed to read audio packet"),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                channels = spec.channels.count();

                let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buf.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buf.samples());
            }
            Err(SymphoniaError::DecodeError(e)) => {
                log::warn!("Skipping undecodable audio packet: {e}");
            }
            Err(e) => return Err(e).context("failed to decode audio"),
        }
    }

    if samples.is_empty() {
        bail!("audio clip contains no samples");
    }

    Ok(DecodedAudio {
        samples,
        channels,
        sample_rate,
    })
}

/// Resample a mono signal. The output keeps the duration of the input.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler = FftFixedIn::<f32>::new(
        from_rate as usize,
        to_rate as usize,
        RESAMPLE_CHUNK,
        2,
        1,
    )
    .with_context(|| format!("failed to create resampler {from_rate} Hz -> {to_rate} Hz"))?;

    let expected = (samples.len() as u64 * to_rate as u64).div_ceil(from_rate as u64) as usize;
    let delay = resampler.output_delay();
    let mut output = Vec::with_capacity(expected + delay + RESAMPLE_CHUNK);

    let mut chunks = samples.chunks_exact(RESAMPLE_CHUNK);
    for chunk in &mut chunks {
        let resampled = resampler.process(&[chunk][..], None)?;
        output.extend_from_slice(&resampled[0]);
    }

    let remainder = chunks.remainder();
    if !remainder.is_empty() {
        let tail: [&[f32]; 1] = [remainder];
        let resampled = resampler.process_partial(Some(&tail[..]), None)?;
        output.extend_from_slice(&resampled[0]);
    }

    // Flush the samples still held back by the resampler delay
    while output.len() < expected + delay {
        let resampled = resampler.process_partial::<Vec<f32>>(None, None)?;
        if resampled[0].is_empty() {
            break;
        }
        output.extend_from_slice(&resampled[0]);
    }

    output.drain(..delay.min(output.len()));
    output.truncate(expected);

    Ok(output)
}

/// Decode a clip into mono samples at `sample_rate`.
pub fn load_mono(bytes: Vec<u8>, sample_rate: u32) -> Result<Vec<f32>> {
    let decoded = decode(bytes)?;
    log::debug!(
        "Decoded {:.2}s of audio ({} Hz, {} channels)",
        decoded.duration_s(),
        decoded.sample_rate,
        decoded.channels
    );

    resample(&decoded.to_mono(), decoded.sample_rate, sample_rate)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::{sine, wav_bytes};

    #[test]
    fn test_decode_mono_wav() -> Result<()> {
        let tone = sine(440.0, 0.5, 16000);

        let decoded = decode(wav_bytes(&tone, 16000, 1))?;

        assert_eq!(decoded.sample_rate, 16000);
        assert_eq!(decoded.channels, 1);
        assert_eq!(decoded.samples.len(), tone.len());
        for (a, b) in decoded.samples.iter().zip(&tone) {
            assert!((a - b).abs() < 1e-3);
        }
        Ok(())
    }

    #[test]
    fn test_stereo_is_averaged_to_mono() -> Result<()> {
        let interleaved: Vec<f32> = (0..800).flat_map(|_| [0.5, -0.25]).collect();

        let decoded = decode(wav_bytes(&interleaved, 8000, 2))?;
        let mono = decoded.to_mono();

        assert_eq!(decoded.channels, 2);
        assert_eq!(mono.len(), 800);
        assert!(mono.iter().all(|s| (s - 0.125).abs() < 1e-3));
        Ok(())
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(decode(b"definitely not audio".to_vec()).is_err());
    }

    #[test]
    fn test_resample_keeps_duration() -> Result<()> {
        for from_rate in [8000, 16000, 44100, 48000] {
            let input = sine(440.0, 1.3, from_rate);

            let output = resample(&input, from_rate, 22050)?;

            let expected = (input.len() as u64 * 22050).div_ceil(from_rate as u64) as usize;
            assert_eq!(output.len(), expected, "from {from_rate} Hz");
        }
        Ok(())
    }

    #[test]
    fn test_resample_keeps_pitch() -> Result<()> {
        let output = resample(&sine(440.0, 1.0, 16000), 16000, 22050)?;

        // A 440 Hz tone crosses zero 880 times per second
        let crossings = output
            .windows(2)
            .filter(|w| (w[0] < 0.0) != (w[1] < 0.0))
            .count();
        assert!((crossings as i64 - 880).abs() < 20, "{crossings} zero crossings");
        Ok(())
    }

    #[test]
    fn test_resample_same_rate_is_identity() -> Result<()> {
        let input = sine(440.0, 0.1, 22050);
        assert_eq!(resample(&input, 22050, 22050)?, input);
        Ok(())
    }
}

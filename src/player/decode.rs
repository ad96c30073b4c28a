//! Decoding playable inputs into renderable audio
//!
//! A playable input (staged file or remote URL) is decoded to mono f32
//! samples with symphonia, then reduced to normalized peak buckets for
//! waveform rendering.

use std::io::Cursor;
use std::time::Duration;

use once_cell::sync::Lazy;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder as _, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader as _};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::staging::PlayableInput;

/// Number of peak buckets computed for waveform rendering.
pub const WAVEFORM_BUCKETS: usize = 64;

/// Shared HTTP client for fetching remote sources (avoids TLS handshake
/// overhead across attaches).
static HTTP_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(60))
        .build()
        .expect("Failed to build HTTP client")
});

/// Errors that can occur while rendering a source into a waveform.
#[derive(Debug, Clone)]
pub enum DecodeError {
    ReadFailed(String),
    FetchFailed(String),
    UnsupportedFormat(String),
    DecodeFailed(String),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::ReadFailed(e) => write!(f, "Failed to read audio file: {}", e),
            DecodeError::FetchFailed(e) => write!(f, "Failed to fetch audio: {}", e),
            DecodeError::UnsupportedFormat(e) => write!(f, "Unsupported audio format: {}", e),
            DecodeError::DecodeFailed(e) => write!(f, "Failed to decode audio: {}", e),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Decoded audio ready for rendering and playback.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    /// Mono samples in [-1, 1].
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Load and decode a playable input.
pub async fn load_playable(input: &PlayableInput) -> Result<DecodedAudio, DecodeError> {
    let (bytes, extension) = match input {
        PlayableInput::File(path) => {
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_string());
            let bytes = tokio::fs::read(path)
                .await
                .map_err(|e| DecodeError::ReadFailed(e.to_string()))?;
            (bytes, ext)
        }
        PlayableInput::Url(url) => {
            let response = HTTP_CLIENT
                .get(url)
                .send()
                .await
                .map_err(|e| DecodeError::FetchFailed(e.to_string()))?;
            if !response.status().is_success() {
                return Err(DecodeError::FetchFailed(format!(
                    "HTTP {}",
                    response.status().as_u16()
                )));
            }
            let bytes = response
                .bytes()
                .await
                .map_err(|e| DecodeError::FetchFailed(e.to_string()))?;
            (bytes.to_vec(), None)
        }
    };

    // Decoding is CPU-bound; keep it off the async runtime.
    tokio::task::spawn_blocking(move || decode_bytes(bytes, extension.as_deref()))
        .await
        .map_err(|e| DecodeError::DecodeFailed(e.to_string()))?
}

/// Decode an in-memory container into mono samples.
pub fn decode_bytes(bytes: Vec<u8>, extension: Option<&str>) -> Result<DecodedAudio, DecodeError> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| DecodeError::UnsupportedFormat(e.to_string()))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| DecodeError::UnsupportedFormat("no audio track".to_string()))?;
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| DecodeError::UnsupportedFormat(e.to_string()))?;

    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut mono: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(DecodeError::DecodeFailed(e.to_string())),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                let channels = spec.channels.count().max(1);

                if sample_buf.is_none() {
                    sample_buf = Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
                }
                let buf = sample_buf.as_mut().unwrap();
                buf.copy_interleaved_ref(decoded);

                if channels == 1 {
                    mono.extend_from_slice(buf.samples());
                } else {
                    for frame in buf.samples().chunks_exact(channels) {
                        mono.push(frame.iter().sum::<f32>() / channels as f32);
                    }
                }
            }
            // A corrupt packet is recoverable; skip it.
            Err(SymphoniaError::DecodeError(e)) => {
                log::warn!("Skipping undecodable packet: {}", e);
                continue;
            }
            Err(e) => return Err(DecodeError::DecodeFailed(e.to_string())),
        }
    }

    if mono.is_empty() || sample_rate == 0 {
        return Err(DecodeError::DecodeFailed("no audio samples decoded".to_string()));
    }

    Ok(DecodedAudio {
        samples: mono,
        sample_rate,
    })
}

/// Reduce decoded audio to normalized RMS peak buckets (0.0-1.0) for
/// waveform rendering.
pub fn compute_peaks(samples: &[f32], buckets: usize) -> Vec<f32> {
    let mut peaks = vec![0.0f32; buckets];

    if samples.is_empty() || buckets == 0 {
        return peaks;
    }

    let samples_per_bucket = (samples.len() / buckets).max(1);

    for (idx, peak) in peaks.iter_mut().enumerate() {
        let start = idx * samples_per_bucket;
        let end = ((idx + 1) * samples_per_bucket).min(samples.len());
        if start >= samples.len() || end <= start {
            break;
        }

        let sum_squares: f64 = samples[start..end]
            .iter()
            .map(|&s| {
                let s = s as f64;
                s * s
            })
            .sum();
        let rms = (sum_squares / (end - start) as f64).sqrt();
        *peak = (rms as f32).clamp(0.0, 1.0);
    }

    peaks
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One-second 440 Hz sine rendered as a 16-bit mono WAV.
    fn wav_fixture(sample_rate: u32, amplitude: f32, secs: f32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            let total = (sample_rate as f32 * secs) as usize;
            for i in 0..total {
                let t = i as f32 / sample_rate as f32;
                let value = amplitude * (2.0 * std::f32::consts::PI * 440.0 * t).sin();
                writer
                    .write_sample((value * i16::MAX as f32) as i16)
                    .unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn decodes_wav_duration_and_rate() {
        let bytes = wav_fixture(8_000, 0.5, 1.0);
        let audio = decode_bytes(bytes, Some("wav")).unwrap();
        assert_eq!(audio.sample_rate, 8_000);
        assert!(
            (audio.duration_secs() - 1.0).abs() < 0.05,
            "duration {} not ~1s",
            audio.duration_secs()
        );
    }

    #[test]
    fn garbage_bytes_fail_to_probe() {
        let result = decode_bytes(vec![0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x01], Some("wav"));
        assert!(result.is_err());
    }

    #[test]
    fn peaks_are_normalized_and_sized() {
        let bytes = wav_fixture(8_000, 0.8, 1.0);
        let audio = decode_bytes(bytes, Some("wav")).unwrap();
        let peaks = compute_peaks(&audio.samples, WAVEFORM_BUCKETS);
        assert_eq!(peaks.len(), WAVEFORM_BUCKETS);
        for &p in &peaks {
            assert!((0.0..=1.0).contains(&p));
        }
        assert!(peaks.iter().any(|&p| p > 0.1));
    }

    #[test]
    fn silence_peaks_are_zero() {
        let peaks = compute_peaks(&vec![0.0; 4_000], 16);
        assert!(peaks.iter().all(|&p| p == 0.0));
    }

    #[test]
    fn empty_input_yields_zero_peaks() {
        let peaks = compute_peaks(&[], 16);
        assert_eq!(peaks.len(), 16);
        assert!(peaks.iter().all(|&p| p == 0.0));
    }
}

//! Audio file input for FreqEnforcer
//!
//! WAV is decoded in-crate with `hound`. Compressed formats belong to an
//! external decoder plugged in through [`AudioDecoder`]; without one they are
//! rejected as unsupported.
//!
//! Multi-channel input is down-mixed to mono by averaging. Floating-point
//! files whose peak exceeds full scale are scaled back to a peak of 1.0.

use std::path::Path;

use hound::{SampleFormat, WavReader};
use log::{debug, warn};

use crate::engine::buffer::{peak_of, AudioBuffer};
use crate::error::{EnforcerError, Result};

/// Extensions a full decoder front end is expected to accept
pub const SUPPORTED_EXTENSIONS: &[&str] = &["wav", "mp3", "flac", "ogg"];

/// "Decode audio to mono samples" service
pub trait AudioDecoder {
    /// Decode the file at `path` into a mono buffer at its native sample rate
    fn decode(&self, path: &Path) -> Result<AudioBuffer>;
}

/// WAV decoder backed by `hound`
#[derive(Debug, Clone, Copy, Default)]
pub struct WavDecoder;

impl AudioDecoder for WavDecoder {
    fn decode(&self, path: &Path) -> Result<AudioBuffer> {
        let reader = WavReader::open(path).map_err(|e| EnforcerError::InvalidAudio {
            reason: format!("Failed to open WAV file: {}", e),
            source: Some(Box::new(e)),
        })?;

        let spec = reader.spec();
        let channels = spec.channels as usize;
        if channels == 0 {
            return Err(EnforcerError::InvalidAudio {
                reason: "WAV header declares zero channels".to_string(),
                source: None,
            });
        }

        let interleaved = read_samples_as_f32(reader, spec.bits_per_sample, spec.sample_format)?;
        let mut mono = downmix(&interleaved, channels);

        let peak = peak_of(&mono);
        if peak > 1.0 {
            warn!(
                "{}: peak {:.3} exceeds full scale, rescaling to 1.0",
                path.display(),
                peak
            );
            for s in mono.iter_mut() {
                *s /= peak;
            }
        }

        debug!(
            "Decoded {} ({} ch, {} Hz, {} frames)",
            path.display(),
            channels,
            spec.sample_rate,
            mono.len()
        );

        AudioBuffer::new(mono, spec.sample_rate)
    }
}

/// Import an audio file as a mono buffer
///
/// # Arguments
/// * `path` - Path to the audio file
///
/// # Returns
/// * `Ok(AudioBuffer)` - The decoded mono audio
/// * `Err(EnforcerError)` - If the file is missing, unreadable, empty or not WAV
///
/// # Errors
/// * `FileNotFound` - If the file does not exist
/// * `UnsupportedFormat` - For formats that need an external decoder
/// * `InvalidAudio` - If the WAV data cannot be read
/// * `EmptyAudio` - If the file holds no samples
pub fn import_audio(path: &Path) -> Result<AudioBuffer> {
    import_with(None, path)
}

/// Import, handing non-WAV formats to `decoder` when one is supplied
pub fn import_with(decoder: Option<&dyn AudioDecoder>, path: &Path) -> Result<AudioBuffer> {
    if !path.exists() {
        return Err(EnforcerError::FileNotFound {
            path: path.display().to_string(),
            source: None,
        });
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let buffer = match extension.as_str() {
        "wav" => WavDecoder.decode(path)?,
        ext if SUPPORTED_EXTENSIONS.contains(&ext) => match decoder {
            Some(decoder) => decoder.decode(path)?,
            None => {
                return Err(EnforcerError::UnsupportedFormat {
                    format: format!(".{} (no decoder configured)", ext),
                })
            }
        },
        other => {
            return Err(EnforcerError::UnsupportedFormat {
                format: if other.is_empty() {
                    "file without extension".to_string()
                } else {
                    format!(".{}", other)
                },
            })
        }
    };

    if buffer.is_empty() {
        return Err(EnforcerError::EmptyAudio);
    }

    Ok(buffer)
}

/// Generate a sine test tone
///
/// # Arguments
/// * `frequency` - Frequency of the sine wave in Hz
/// * `duration_secs` - Duration of the tone in seconds
/// * `sample_rate` - Sample rate in Hz
pub fn generate_test_tone(frequency: f32, duration_secs: f32, sample_rate: u32) -> AudioBuffer {
    generate_harmonic_tone(frequency, &[1.0], duration_secs, sample_rate)
}

/// Generate a tone with the given harmonic amplitudes (index 0 is the fundamental)
///
/// The result is scaled so its peak never exceeds 0.9.
pub fn generate_harmonic_tone(
    frequency: f32,
    harmonics: &[f32],
    duration_secs: f32,
    sample_rate: u32,
) -> AudioBuffer {
    let num_samples = (duration_secs * sample_rate as f32) as usize;
    let angular_freq = 2.0 * std::f64::consts::PI * frequency as f64 / sample_rate as f64;
    let total: f32 = harmonics.iter().map(|a| a.abs()).sum::<f32>().max(1.0);
    let scale = 0.9 / total;

    let samples = (0..num_samples)
        .map(|i| {
            let phase = angular_freq * i as f64;
            harmonics
                .iter()
                .enumerate()
                .map(|(k, amp)| amp * ((k + 1) as f64 * phase).sin() as f32)
                .sum::<f32>()
                * scale
        })
        .collect();

    AudioBuffer::from_raw(samples, sample_rate.max(1))
}

// ============================================================================
// Internal helper functions
// ============================================================================

/// Read samples from WAV reader and convert to f32
fn read_samples_as_f32<R: std::io::Read>(
    mut reader: WavReader<R>,
    bits_per_sample: u16,
    sample_format: SampleFormat,
) -> Result<Vec<f32>> {
    let scale = match (sample_format, bits_per_sample) {
        (SampleFormat::Float, _) => {
            return reader
                .samples::<f32>()
                .collect::<std::result::Result<Vec<f32>, _>>()
                .map_err(|e| read_error(bits_per_sample, e))
        }
        (SampleFormat::Int, 8) => 128.0,
        (SampleFormat::Int, 16) => 32768.0,
        (SampleFormat::Int, 24) => 8388608.0,
        (SampleFormat::Int, 32) => 2147483648.0,
        (SampleFormat::Int, bits) => {
            return Err(EnforcerError::UnsupportedFormat {
                format: format!("{}-bit integer audio", bits),
            })
        }
    };

    reader
        .samples::<i32>()
        .map(|s| s.map(|v| v as f32 / scale))
        .collect::<std::result::Result<Vec<f32>, _>>()
        .map_err(|e| read_error(bits_per_sample, e))
}

fn read_error(bits: u16, e: hound::Error) -> EnforcerError {
    EnforcerError::InvalidAudio {
        reason: format!("Failed to read {}-bit samples: {}", bits, e),
        source: Some(Box::new(e)),
    }
}

/// Average interleaved frames down to one channel
fn downmix(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels == 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

//! Harmonic mask builder
//!
//! For every STFT frame with a known fundamental the mask weights each bin,
//! all the way up to Nyquist, by a Gaussian of its distance to the nearest
//! harmonic `k * f0`:
//!
//! ```text
//! mask = 1 - depth(amount) * (1 - exp(-d^2 / (2 sigma^2)))
//! ```
//!
//! `bandwidth_hz` narrows and `depth` deepens as `amount` rises, so amount 0
//! is an exact identity and small amounts only shave a little off
//! inter-harmonic bins. Unvoiced frames pass everything.

use log::debug;

use crate::analysis::pitch::PitchTrack;
use crate::config::MaskConfig;
use crate::dsp::stft::Stft;
use crate::engine::buffer::AudioBuffer;
use crate::error::{EnforcerError, Result};

/// Full-width-at-half-maximum to standard deviation
const FWHM_TO_SIGMA: f32 = 2.355;

/// Hann main-lobe half width, in bins. The pass band never gets narrower.
const MIN_BANDWIDTH_BINS: f32 = 2.0;

// ============================================================================
// Shape curves
// ============================================================================

/// Harmonic pass-band width for an amount in [0, 1]
///
/// Linear from `max_bandwidth_hz` at 0 to `min_bandwidth_hz` at 1.
pub fn bandwidth_hz(amount: f32, config: &MaskConfig) -> f32 {
    let amount = amount.clamp(0.0, 1.0);
    config.max_bandwidth_hz - amount * (config.max_bandwidth_hz - config.min_bandwidth_hz)
}

/// Inter-harmonic attenuation depth for an amount in [0, 1]
pub fn depth(amount: f32) -> f32 {
    amount.clamp(0.0, 1.0)
}

/// Gaussian closeness of `frequency` to the nearest harmonic of `f0`
pub fn harmonic_weight(frequency: f32, f0: f32, sigma: f32) -> f32 {
    let k = (frequency / f0).round().max(1.0);
    let distance = frequency - k * f0;
    (-(distance * distance) / (2.0 * sigma * sigma)).exp()
}

/// Reject amounts outside [0, 1]
pub fn validate_amount(amount: f32) -> Result<()> {
    if (0.0..=1.0).contains(&amount) {
        Ok(())
    } else {
        Err(EnforcerError::invalid_parameter(
            "amount",
            amount,
            "a value in 0.0..=1.0",
        ))
    }
}

// ============================================================================
// HarmonicMask
// ============================================================================

/// Per-frame gain curves over every STFT bin
#[derive(Debug, Clone, PartialEq)]
pub struct HarmonicMask {
    frames: Vec<Vec<f32>>,
    n_bins: usize,
    bin_hz: f32,
}

impl HarmonicMask {
    fn identity(num_frames: usize, n_bins: usize, bin_hz: f32) -> Self {
        Self {
            frames: vec![vec![1.0; n_bins]; num_frames],
            n_bins,
            bin_hz,
        }
    }

    pub fn frames(&self) -> &[Vec<f32>] {
        &self.frames
    }

    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    pub fn n_bins(&self) -> usize {
        self.n_bins
    }

    /// Width of one bin in Hz
    pub fn bin_hz(&self) -> f32 {
        self.bin_hz
    }

    /// Gain at `frame`, `bin` (1.0 outside the mask)
    pub fn value(&self, frame: usize, bin: usize) -> f32 {
        self.frames
            .get(frame)
            .and_then(|row| row.get(bin))
            .copied()
            .unwrap_or(1.0)
    }

    /// Whether every value is exactly 1.0
    pub fn is_identity(&self) -> bool {
        self.frames.iter().flatten().all(|&v| v == 1.0)
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builds and applies harmonic masks
#[derive(Debug)]
pub struct MaskBuilder {
    config: MaskConfig,
    stft: Stft,
}

impl MaskBuilder {
    pub fn new(config: MaskConfig) -> Result<Self> {
        let stft = Stft::new(config.n_fft, config.hop_size)?;
        Ok(Self { config, stft })
    }

    pub fn config(&self) -> &MaskConfig {
        &self.config
    }

    /// Build the mask for a pitch track
    ///
    /// # Arguments
    /// * `track` - Time-resolved pitch of the buffer to be masked
    /// * `amount` - Isolation amount in [0, 1]
    /// * `sample_rate` - Sample rate of the buffer
    ///
    /// # Errors
    /// * `InvalidParameter` - If `amount` is outside [0, 1]
    pub fn build(&self, track: &PitchTrack, amount: f32, sample_rate: u32) -> Result<HarmonicMask> {
        validate_amount(amount)?;

        let n_bins = self.stft.n_bins();
        let bin_hz = self.stft.bin_frequency(1, sample_rate);
        let num_frames = self.stft.num_frames(track.num_samples());

        if amount == 0.0 {
            return Ok(HarmonicMask::identity(num_frames, n_bins, bin_hz));
        }

        let depth = depth(amount);
        let width = bandwidth_hz(amount, &self.config).max(MIN_BANDWIDTH_BINS * bin_hz);
        let sigma = width / FWHM_TO_SIGMA;
        let bypass_bin = self
            .config
            .hf_bypass_hz
            .map(|hz| (hz / bin_hz).ceil().max(0.0) as usize)
            .unwrap_or(n_bins);

        let hop_secs = self.stft.hop() as f64 / sample_rate as f64;
        let f0s: Vec<Option<f32>> = (0..num_frames)
            .map(|i| track.pitch_at(i as f64 * hop_secs).frequency_hz())
            .collect();
        let frames = f0s
            .iter()
            .map(|f0| match *f0 {
                Some(f0) => (0..n_bins)
                    .map(|bin| {
                        if bin >= bypass_bin {
                            1.0
                        } else {
                            let weight = harmonic_weight(bin as f32 * bin_hz, f0, sigma);
                            1.0 - depth * (1.0 - weight)
                        }
                    })
                    .collect(),
                None => vec![1.0; n_bins],
            })
            .collect();

        // Smoothing must not bleed attenuation into unvoiced frames
        let mut frames = smooth_frames(frames, self.config.temporal_smoothing);
        for (row, f0) in frames.iter_mut().zip(&f0s) {
            if f0.is_none() {
                row.fill(1.0);
            }
        }
        debug!(
            "Built harmonic mask: {} frames x {} bins, width {:.1} Hz, depth {:.2}",
            num_frames, n_bins, width, depth
        );

        Ok(HarmonicMask {
            frames,
            n_bins,
            bin_hz,
        })
    }

    /// Mask a buffer: STFT, scale magnitudes keeping phase, inverse STFT
    ///
    /// Amount 0 returns an exact copy without touching the STFT.
    pub fn apply(&self, buffer: &AudioBuffer, track: &PitchTrack, amount: f32) -> Result<AudioBuffer> {
        validate_amount(amount)?;
        if amount == 0.0 || buffer.is_empty() {
            return Ok(buffer.clone());
        }

        let mask = self.build(track, amount, buffer.sample_rate())?;
        let mut spectrogram = self.stft.analyze(buffer.samples());
        for (i, frame) in spectrogram.frames.iter_mut().enumerate() {
            for (bin, value) in frame.iter_mut().enumerate() {
                *value *= mask.value(i, bin);
            }
        }

        Ok(buffer.with_samples(self.stft.synthesize(&spectrogram, buffer.len())))
    }
}

/// Gaussian smoothing of each bin across frames, renormalised at the edges
fn smooth_frames(frames: Vec<Vec<f32>>, sigma: f32) -> Vec<Vec<f32>> {
    if sigma <= 0.0 || frames.len() < 2 {
        return frames;
    }
    let radius = (3.0 * sigma).ceil() as isize;
    let taps: Vec<f32> = (-radius..=radius)
        .map(|k| (-((k * k) as f32) / (2.0 * sigma * sigma)).exp())
        .collect();
    let n_bins = frames[0].len();
    let last = frames.len() as isize - 1;

    (0..frames.len() as isize)
        .map(|i| {
            let mut row = vec![0.0_f32; n_bins];
            let mut total = 0.0_f32;
            for (t, k) in (-radius..=radius).enumerate() {
                let j = i + k;
                if j < 0 || j > last {
                    continue;
                }
                total += taps[t];
                for (acc, v) in row.iter_mut().zip(&frames[j as usize]) {
                    *acc += taps[t] * v;
                }
            }
            row.iter_mut().for_each(|v| *v = (*v / total).clamp(0.0, 1.0));
            row
        })
        .collect()
}

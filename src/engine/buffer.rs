//! Audio Buffer
//!
//! Mono sample buffer passed between pipeline stages. A buffer is never
//! mutated once built; every stage returns a fresh one.

use crate::error::{EnforcerError, Result};

// ============================================================================
// Helper Functions
// ============================================================================

/// Convert decibels to linear amplitude
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Convert linear amplitude to decibels
///
/// # Returns
/// Value in decibels. Returns -f32::INFINITY for zero input.
#[inline]
pub fn linear_to_db(linear: f32) -> f32 {
    if linear <= 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * linear.log10()
    }
}

/// Peak absolute value of a slice
pub fn peak_of(samples: &[f32]) -> f32 {
    samples.iter().map(|s| s.abs()).fold(0.0_f32, f32::max)
}

/// RMS of a slice (accumulated in f64)
pub fn rms_of(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_squares / samples.len() as f64).sqrt() as f32
}

// ============================================================================
// AudioBuffer
// ============================================================================

/// Mono audio with its sample rate
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioBuffer {
    /// Create a buffer, rejecting a zero sample rate and non-finite samples
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(EnforcerError::invalid_parameter(
                "sample_rate",
                sample_rate,
                "a positive rate in Hz",
            ));
        }
        if let Some(pos) = samples.iter().position(|s| !s.is_finite()) {
            return Err(EnforcerError::InvalidAudio {
                reason: format!("non-finite sample at index {}", pos),
                source: None,
            });
        }
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    /// Create a silent buffer
    pub fn silence(num_samples: usize, sample_rate: u32) -> Result<Self> {
        Self::new(vec![0.0; num_samples], sample_rate)
    }

    /// Build from samples known to be finite and a non-zero rate
    pub(crate) fn from_raw(samples: Vec<f32>, sample_rate: u32) -> Self {
        debug_assert!(sample_rate > 0);
        Self {
            samples,
            sample_rate,
        }
    }

    /// Build a buffer at the same sample rate from already-validated stage output
    pub(crate) fn with_samples(&self, samples: Vec<f32>) -> Self {
        Self {
            samples,
            sample_rate: self.sample_rate,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Nyquist frequency in Hz
    pub fn nyquist(&self) -> f32 {
        self.sample_rate as f32 / 2.0
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Peak absolute sample value (linear)
    pub fn peak(&self) -> f32 {
        peak_of(&self.samples)
    }

    /// RMS level (linear)
    pub fn rms(&self) -> f32 {
        rms_of(&self.samples)
    }

    /// Peak level in dBFS
    pub fn peak_db(&self) -> f32 {
        linear_to_db(self.peak())
    }

    /// RMS level in dBFS
    pub fn rms_db(&self) -> f32 {
        linear_to_db(self.rms())
    }

    /// Return a copy scaled by a linear gain
    pub fn scaled(&self, gain: f32) -> Self {
        self.with_samples(self.samples.iter().map(|s| s * gain).collect())
    }
}

//! Biquad filters for the cleanup chain
//!
//! Coefficients follow the Audio EQ Cookbook. Filters are run zero-phase:
//! once forward, once over the reversed output, with an odd reflection at
//! both ends to keep the edges free of start-up transients.

use std::f64::consts::PI;

use crate::error::{EnforcerError, Result};

/// Butterworth Q for a second-order section
pub const BUTTERWORTH_Q: f64 = std::f64::consts::FRAC_1_SQRT_2;

/// Samples of odd reflection added to each end before filtering
const EDGE_PAD: usize = 9;

/// Filter shapes used by the cleanup chain
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterType {
    /// Remove below the corner
    HighPass { q: f64 },
    /// Boost/cut above the corner
    HighShelf { gain_db: f64, slope: f64 },
}

/// Normalized biquad coefficients (a0 = 1)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl Biquad {
    /// Design a filter
    ///
    /// # Arguments
    /// * `filter_type` - Shape and its shape parameters
    /// * `sample_rate` - Sample rate in Hz
    /// * `frequency` - Corner frequency in Hz, strictly inside (0, Nyquist)
    ///
    /// # Errors
    /// * `InvalidParameter` - If the corner is outside (0, Nyquist) or a shape
    ///   parameter is not positive
    pub fn design(filter_type: FilterType, sample_rate: u32, frequency: f64) -> Result<Self> {
        let sr = sample_rate as f64;
        if !(frequency.is_finite() && frequency > 0.0 && frequency < sr / 2.0) {
            return Err(EnforcerError::invalid_parameter(
                "frequency",
                frequency,
                "a corner strictly between 0 Hz and Nyquist",
            ));
        }

        let w0 = 2.0 * PI * frequency / sr;
        let cos_w0 = w0.cos();
        let sin_w0 = w0.sin();

        let (b0, b1, b2, a0, a1, a2) = match filter_type {
            FilterType::HighPass { q } => {
                if !(q > 0.0) {
                    return Err(EnforcerError::invalid_parameter("q", q, "q > 0"));
                }
                let alpha = sin_w0 / (2.0 * q);
                (
                    (1.0 + cos_w0) / 2.0,
                    -(1.0 + cos_w0),
                    (1.0 + cos_w0) / 2.0,
                    1.0 + alpha,
                    -2.0 * cos_w0,
                    1.0 - alpha,
                )
            }
            FilterType::HighShelf { gain_db, slope } => {
                if !(slope > 0.0) {
                    return Err(EnforcerError::invalid_parameter("slope", slope, "slope > 0"));
                }
                let a = 10.0_f64.powf(gain_db / 40.0);
                let alpha = sin_w0 / 2.0 * ((a + 1.0 / a) * (1.0 / slope - 1.0) + 2.0).sqrt();
                let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;
                (
                    a * ((a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha),
                    -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0),
                    a * ((a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha),
                    (a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha,
                    2.0 * ((a - 1.0) - (a + 1.0) * cos_w0),
                    (a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha,
                )
            }
        };

        Ok(Biquad {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        })
    }

    /// Single causal pass (Direct Form I)
    pub fn process(&self, samples: &[f64]) -> Vec<f64> {
        let (mut x1, mut x2, mut y1, mut y2) = (0.0, 0.0, 0.0, 0.0);
        samples
            .iter()
            .map(|&x| {
                let y = self.b0 * x + self.b1 * x1 + self.b2 * x2 - self.a1 * y1 - self.a2 * y2;
                x2 = x1;
                x1 = x;
                y2 = y1;
                y1 = y;
                y
            })
            .collect()
    }

    /// Magnitude response of one pass at `frequency`
    pub fn magnitude_at(&self, frequency: f64, sample_rate: u32) -> f64 {
        let w = 2.0 * PI * frequency / sample_rate as f64;
        let (c1, s1, c2, s2) = (w.cos(), w.sin(), (2.0 * w).cos(), (2.0 * w).sin());
        let num_re = self.b0 + self.b1 * c1 + self.b2 * c2;
        let num_im = -(self.b1 * s1 + self.b2 * s2);
        let den_re = 1.0 + self.a1 * c1 + self.a2 * c2;
        let den_im = -(self.a1 * s1 + self.a2 * s2);
        ((num_re * num_re + num_im * num_im) / (den_re * den_re + den_im * den_im)).sqrt()
    }

    /// Zero-phase application: forward, then backward
    ///
    /// The magnitude response is squared, so callers wanting a shelf of
    /// `g` dB design each pass with `g / 2`.
    pub fn filtfilt(&self, samples: &[f32]) -> Vec<f32> {
        if samples.is_empty() {
            return Vec::new();
        }
        let pad = EDGE_PAD.min(samples.len() - 1);
        let first = samples[0] as f64;
        let last = samples[samples.len() - 1] as f64;

        let mut extended = Vec::with_capacity(samples.len() + 2 * pad);
        extended.extend((1..=pad).rev().map(|i| 2.0 * first - samples[i] as f64));
        extended.extend(samples.iter().map(|&s| s as f64));
        extended.extend(
            (1..=pad).map(|i| 2.0 * last - samples[samples.len() - 1 - i] as f64),
        );

        let mut pass = self.process(&extended);
        pass.reverse();
        let mut pass = self.process(&pass);
        pass.reverse();

        pass[pad..pad + samples.len()]
            .iter()
            .map(|&s| s as f32)
            .collect()
    }
}

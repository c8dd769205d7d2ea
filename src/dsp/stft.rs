//! Short-time Fourier transform
//!
//! Periodic Hann analysis window, centred frames (the signal is padded by
//! `n_fft / 2` zeros on both sides) and weighted overlap-add resynthesis
//! normalised by the summed squared window, so `synthesize(analyze(x))`
//! reproduces `x` to within float rounding.

use std::f32::consts::PI;
use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::error::{EnforcerError, Result};

/// Complex spectrum frames, each holding `n_fft / 2 + 1` bins
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrogram {
    pub frames: Vec<Vec<Complex<f32>>>,
}

impl Spectrogram {
    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }
}

/// STFT engine for a fixed size and hop
pub struct Stft {
    n_fft: usize,
    hop: usize,
    window: Vec<f32>,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
}

impl std::fmt::Debug for Stft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stft")
            .field("n_fft", &self.n_fft)
            .field("hop", &self.hop)
            .finish()
    }
}

/// Periodic Hann window of `len` samples
pub fn hann_window(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / len as f32).cos())
        .collect()
}

impl Stft {
    /// Plan an STFT
    ///
    /// # Errors
    /// * `InvalidParameter` - If `n_fft` is not a power of two >= 16 or `hop`
    ///   is not in `1..=n_fft / 2`
    pub fn new(n_fft: usize, hop: usize) -> Result<Self> {
        if n_fft < 16 || !n_fft.is_power_of_two() {
            return Err(EnforcerError::invalid_parameter(
                "n_fft",
                n_fft,
                "a power of two >= 16",
            ));
        }
        if hop == 0 || hop > n_fft / 2 {
            return Err(EnforcerError::invalid_parameter("hop", hop, "1..=n_fft/2"));
        }

        let window = hann_window(n_fft);
        let mut planner = FftPlanner::new();

        Ok(Self {
            n_fft,
            hop,
            window,
            forward: planner.plan_fft_forward(n_fft),
            inverse: planner.plan_fft_inverse(n_fft),
        })
    }

    pub fn n_fft(&self) -> usize {
        self.n_fft
    }

    pub fn hop(&self) -> usize {
        self.hop
    }

    /// Number of non-negative frequency bins
    pub fn n_bins(&self) -> usize {
        self.n_fft / 2 + 1
    }

    /// Centre frequency of `bin` in Hz
    pub fn bin_frequency(&self, bin: usize, sample_rate: u32) -> f32 {
        bin as f32 * sample_rate as f32 / self.n_fft as f32
    }

    /// Number of frames produced for a signal of `len` samples
    pub fn num_frames(&self, len: usize) -> usize {
        1 + len / self.hop
    }

    /// Forward transform
    pub fn analyze(&self, samples: &[f32]) -> Spectrogram {
        let half = self.n_fft / 2;
        let n_bins = self.n_bins();
        let mut scratch = vec![Complex::new(0.0, 0.0); self.n_fft];

        let frames = (0..self.num_frames(samples.len()))
            .map(|i| {
                let start = (i * self.hop) as isize - half as isize;
                for (j, slot) in scratch.iter_mut().enumerate() {
                    let idx = start + j as isize;
                    let x = if idx >= 0 && (idx as usize) < samples.len() {
                        samples[idx as usize]
                    } else {
                        0.0
                    };
                    *slot = Complex::new(x * self.window[j], 0.0);
                }
                self.forward.process(&mut scratch);
                scratch[..n_bins].to_vec()
            })
            .collect();

        Spectrogram { frames }
    }

    /// Inverse transform trimmed or zero-extended to `length` samples
    pub fn synthesize(&self, spectrogram: &Spectrogram, length: usize) -> Vec<f32> {
        let half = self.n_fft / 2;
        let n_bins = self.n_bins();
        let padded_len = (spectrogram.num_frames().saturating_sub(1)) * self.hop + self.n_fft;
        let mut output = vec![0.0_f32; padded_len.max(length + self.n_fft)];
        let mut norm = vec![0.0_f32; output.len()];
        let mut scratch = vec![Complex::new(0.0, 0.0); self.n_fft];
        let scale = 1.0 / self.n_fft as f32;

        for (i, frame) in spectrogram.frames.iter().enumerate() {
            for k in 0..self.n_fft {
                scratch[k] = if k < n_bins {
                    frame[k]
                } else {
                    frame[self.n_fft - k].conj()
                };
            }
            // DC and Nyquist must be real for a real signal
            scratch[0].im = 0.0;
            scratch[half].im = 0.0;
            self.inverse.process(&mut scratch);

            let offset = i * self.hop;
            for (j, value) in scratch.iter().enumerate() {
                let w = self.window[j];
                output[offset + j] += value.re * scale * w;
                norm[offset + j] += w * w;
            }
        }

        (0..length)
            .map(|n| {
                let idx = n + half;
                if norm[idx] > 1e-8 {
                    output[idx] / norm[idx]
                } else {
                    0.0
                }
            })
            .collect()
    }
}

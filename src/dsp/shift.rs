//! Pitch-shift / time-stretch kernels
//!
//! The corrector only decides ratios; the numerics live behind
//! [`ShiftKernel`] so they can be swapped or mocked. Both built-in kernels
//! time-stretch by `time_ratio * pitch_ratio`, then resample by
//! `1 / pitch_ratio`, which leaves the duration scaled by `time_ratio` and
//! the pitch scaled by `pitch_ratio`. Upward shifts are low-passed before
//! the resampler decimates so high harmonics do not fold back.

use std::f32::consts::PI;

use log::debug;
use rustfft::num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::dsp::stft::{hann_window, Spectrogram, Stft};
use crate::engine::buffer::AudioBuffer;
use crate::error::{EnforcerError, Result};

/// Taps of the anti-aliasing filter used before decimation
const ANTI_ALIAS_TAPS: usize = 127;

/// Fraction of the new Nyquist kept by the anti-aliasing filter
const ANTI_ALIAS_PASSBAND: f64 = 0.9;

/// "Given samples and ratios, produce shifted samples" service
pub trait ShiftKernel {
    /// Shift pitch by `pitch_ratio` and scale duration by `time_ratio`
    ///
    /// The output keeps the input's sample rate and holds
    /// `round(len * time_ratio)` samples.
    fn shift(&self, buffer: &AudioBuffer, pitch_ratio: f64, time_ratio: f64)
        -> Result<AudioBuffer>;

    /// The kernel to use for `method`
    ///
    /// Single-algorithm kernels ignore the method and return themselves.
    fn for_method(&self, _method: StretchMethod) -> &dyn ShiftKernel
    where
        Self: Sized,
    {
        self
    }
}

/// Time-stretch algorithm picked per run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StretchMethod {
    /// STFT phase vocoder; smooth on sustained tones
    #[default]
    PhaseVocoder,
    /// Waveform-similarity overlap-add; keeps transients tighter
    Wsola,
}

impl std::fmt::Display for StretchMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StretchMethod::PhaseVocoder => write!(f, "phase_vocoder"),
            StretchMethod::Wsola => write!(f, "wsola"),
        }
    }
}

fn check_ratios(pitch_ratio: f64, time_ratio: f64) -> Result<()> {
    for (param, value) in [("pitch_ratio", pitch_ratio), ("time_ratio", time_ratio)] {
        if !(value.is_finite() && value > 0.0) {
            return Err(EnforcerError::invalid_parameter(
                param,
                value,
                "a positive finite ratio",
            ));
        }
    }
    Ok(())
}

/// Stretch with `stretch_fn`, resample back to the original duration scale
fn stretch_and_resample(
    name: &str,
    buffer: &AudioBuffer,
    pitch_ratio: f64,
    time_ratio: f64,
    stretch_fn: impl FnOnce(&[f32], f64) -> Result<Vec<f32>>,
) -> Result<AudioBuffer> {
    check_ratios(pitch_ratio, time_ratio)?;

    let target_len = (buffer.len() as f64 * time_ratio).round() as usize;
    let stretch = time_ratio * pitch_ratio;
    debug!(
        "{}: stretch {:.4}, resample {:.4}, {} -> {} samples",
        name,
        stretch,
        1.0 / pitch_ratio,
        buffer.len(),
        target_len
    );

    let stretched = if (stretch - 1.0).abs() < 1e-9 {
        buffer.samples().to_vec()
    } else {
        stretch_fn(buffer.samples(), stretch)?
    };

    let mut output = if (pitch_ratio - 1.0).abs() < 1e-9 {
        stretched
    } else {
        resample_band_limited(&stretched, 1.0 / pitch_ratio)
    };
    output.resize(target_len, 0.0);

    if output.iter().any(|s| !s.is_finite()) {
        return Err(EnforcerError::ProcessingError {
            reason: format!("{} produced non-finite samples", name),
        });
    }

    Ok(buffer.with_samples(output))
}

// ============================================================================
// Phase vocoder
// ============================================================================

/// Phase vocoder followed by resampling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseVocoderKernel {
    n_fft: usize,
    hop: usize,
}

impl Default for PhaseVocoderKernel {
    fn default() -> Self {
        Self {
            n_fft: 2048,
            hop: 512,
        }
    }
}

impl PhaseVocoderKernel {
    /// Create a kernel with a custom STFT size and hop
    pub fn new(n_fft: usize, hop: usize) -> Result<Self> {
        Stft::new(n_fft, hop)?;
        Ok(Self { n_fft, hop })
    }
}

impl ShiftKernel for PhaseVocoderKernel {
    fn shift(
        &self,
        buffer: &AudioBuffer,
        pitch_ratio: f64,
        time_ratio: f64,
    ) -> Result<AudioBuffer> {
        stretch_and_resample("Phase vocoder", buffer, pitch_ratio, time_ratio, |samples, stretch| {
            let stft = Stft::new(self.n_fft, self.hop)?;
            Ok(time_stretch(&stft, samples, stretch))
        })
    }
}

/// Wrap a phase into [-pi, pi)
fn wrap_phase(phase: f32) -> f32 {
    (phase + PI).rem_euclid(2.0 * PI) - PI
}

/// Stretch duration by `stretch` without changing pitch
pub fn time_stretch(stft: &Stft, samples: &[f32], stretch: f64) -> Vec<f32> {
    let out_len = (samples.len() as f64 * stretch).round() as usize;
    if samples.is_empty() || out_len == 0 {
        return vec![0.0; out_len];
    }

    let spec = stft.analyze(samples);
    let n_bins = stft.n_bins();
    let n_frames = spec.num_frames();
    let rate = 1.0 / stretch;
    let zero_frame = vec![Complex::new(0.0_f32, 0.0); n_bins];

    let advance: Vec<f32> = (0..n_bins)
        .map(|k| 2.0 * PI * stft.hop() as f32 * k as f32 / stft.n_fft() as f32)
        .collect();
    let mut phase: Vec<f32> = spec.frames[0].iter().map(|c| c.arg()).collect();

    let mut frames = Vec::new();
    let mut t = 0.0_f64;
    while t < n_frames as f64 {
        let i = t.floor() as usize;
        let alpha = (t - i as f64) as f32;
        let c0 = &spec.frames[i];
        let c1 = spec.frames.get(i + 1).unwrap_or(&zero_frame);

        let frame = (0..n_bins)
            .map(|k| {
                let magnitude = (1.0 - alpha) * c0[k].norm() + alpha * c1[k].norm();
                let out = Complex::from_polar(magnitude, phase[k]);
                let delta = wrap_phase(c1[k].arg() - c0[k].arg() - advance[k]);
                phase[k] += advance[k] + delta;
                out
            })
            .collect();
        frames.push(frame);
        t += rate;
    }

    stft.synthesize(&Spectrogram { frames }, out_len)
}

/// Linear interpolation resampling
///
/// `ratio` is output rate over input rate; the output holds
/// `ceil(len * ratio)` samples.
pub fn resample_linear(samples: &[f32], ratio: f64) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }

    let source_len = samples.len();
    let target_len = ((source_len as f64) * ratio).ceil() as usize;

    (0..target_len)
        .map(|i| {
            let src_pos = i as f64 / ratio;
            let src_idx = src_pos.floor() as usize;
            let frac = (src_pos - src_idx as f64) as f32;

            if src_idx + 1 < source_len {
                samples[src_idx] * (1.0 - frac) + samples[src_idx + 1] * frac
            } else if src_idx < source_len {
                samples[src_idx]
            } else {
                0.0
            }
        })
        .collect()
}

/// Windowed-sinc low-pass, zero phase, same length as the input
///
/// `cutoff` is in cycles per sample (0.5 is Nyquist).
pub fn lowpass_fir(samples: &[f32], cutoff: f64) -> Vec<f32> {
    let half = (ANTI_ALIAS_TAPS / 2) as isize;
    let taps: Vec<f32> = (-half..=half)
        .map(|n| {
            let sinc = if n == 0 {
                2.0 * cutoff
            } else {
                (2.0 * std::f64::consts::PI * cutoff * n as f64).sin()
                    / (std::f64::consts::PI * n as f64)
            };
            // Blackman
            let x = (n + half) as f64 / (2 * half) as f64;
            let window = 0.42 - 0.5 * (2.0 * std::f64::consts::PI * x).cos()
                + 0.08 * (4.0 * std::f64::consts::PI * x).cos();
            (sinc * window) as f32
        })
        .collect();
    let gain: f32 = taps.iter().sum();
    let len = samples.len() as isize;

    (0..len)
        .map(|i| {
            let acc: f32 = taps
                .iter()
                .zip(-half..=half)
                .filter_map(|(tap, k)| {
                    let j = i - k;
                    (0..len).contains(&j).then(|| tap * samples[j as usize])
                })
                .sum();
            acc / gain
        })
        .collect()
}

/// Resample, low-passing first when `ratio` decimates
pub fn resample_band_limited(samples: &[f32], ratio: f64) -> Vec<f32> {
    if ratio < 1.0 {
        let filtered = lowpass_fir(samples, 0.5 * ratio * ANTI_ALIAS_PASSBAND);
        resample_linear(&filtered, ratio)
    } else {
        resample_linear(samples, ratio)
    }
}

// ============================================================================
// WSOLA
// ============================================================================

/// Waveform-similarity overlap-add followed by resampling
///
/// Each output frame is cut from the input near its nominal position,
/// nudged by up to `tolerance` samples to line up with the natural
/// continuation of the previous frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WsolaKernel {
    frame_len: usize,
    tolerance: usize,
}

impl Default for WsolaKernel {
    fn default() -> Self {
        Self {
            frame_len: 1024,
            tolerance: 256,
        }
    }
}

impl WsolaKernel {
    /// Create a kernel with a custom frame length and search tolerance
    pub fn new(frame_len: usize, tolerance: usize) -> Result<Self> {
        if frame_len < 4 || frame_len % 2 != 0 {
            return Err(EnforcerError::invalid_parameter(
                "frame_len",
                frame_len,
                "an even length of at least 4",
            ));
        }
        Ok(Self {
            frame_len,
            tolerance,
        })
    }
}

impl ShiftKernel for WsolaKernel {
    fn shift(
        &self,
        buffer: &AudioBuffer,
        pitch_ratio: f64,
        time_ratio: f64,
    ) -> Result<AudioBuffer> {
        stretch_and_resample("WSOLA", buffer, pitch_ratio, time_ratio, |samples, stretch| {
            Ok(wsola_stretch(samples, stretch, self.frame_len, self.tolerance))
        })
    }
}

/// Stretch duration by `stretch` in the time domain
pub fn wsola_stretch(
    samples: &[f32],
    stretch: f64,
    frame_len: usize,
    tolerance: usize,
) -> Vec<f32> {
    let out_len = (samples.len() as f64 * stretch).round() as usize;
    if samples.is_empty() || out_len == 0 {
        return vec![0.0; out_len];
    }

    let synthesis_hop = frame_len / 2;
    let analysis_hop = synthesis_hop as f64 / stretch;
    let window = hann_window(frame_len);
    let len = samples.len() as isize;
    let at = |i: isize| if (0..len).contains(&i) { samples[i as usize] } else { 0.0 };

    let mut output = vec![0.0_f32; out_len + frame_len];
    let mut weight = vec![0.0_f32; out_len + frame_len];
    let mut previous: isize = 0;
    let mut k = 0usize;
    while k * synthesis_hop < out_len {
        let position = if k == 0 {
            0
        } else {
            let nominal = (k as f64 * analysis_hop).round() as isize;
            let natural = previous + synthesis_hop as isize;
            let tolerance = tolerance as isize;
            let mut best = nominal;
            let mut best_score = f32::NEG_INFINITY;
            for candidate in nominal - tolerance..=nominal + tolerance {
                let score: f32 = (0..frame_len as isize)
                    .map(|n| at(candidate + n) * at(natural + n))
                    .sum();
                if score > best_score {
                    best_score = score;
                    best = candidate;
                }
            }
            best
        };

        let offset = k * synthesis_hop;
        for (n, w) in window.iter().enumerate() {
            output[offset + n] += w * at(position + n as isize);
            weight[offset + n] += w;
        }
        previous = position;
        k += 1;
    }

    output.truncate(out_len);
    output
        .iter()
        .zip(&weight)
        .map(|(s, w)| if *w > 1e-3 { s / w } else { *s })
        .collect()
}

// ============================================================================
// Method selection
// ============================================================================

/// Both built-in kernels, dispatched by [`StretchMethod`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MethodKernel {
    phase_vocoder: PhaseVocoderKernel,
    wsola: WsolaKernel,
}

impl MethodKernel {
    pub fn new(phase_vocoder: PhaseVocoderKernel, wsola: WsolaKernel) -> Self {
        Self {
            phase_vocoder,
            wsola,
        }
    }
}

impl ShiftKernel for MethodKernel {
    /// Shifts with the phase vocoder
    fn shift(
        &self,
        buffer: &AudioBuffer,
        pitch_ratio: f64,
        time_ratio: f64,
    ) -> Result<AudioBuffer> {
        self.phase_vocoder.shift(buffer, pitch_ratio, time_ratio)
    }

    fn for_method(&self, method: StretchMethod) -> &dyn ShiftKernel
    where
        Self: Sized,
    {
        match method {
            StretchMethod::PhaseVocoder => &self.phase_vocoder,
            StretchMethod::Wsola => &self.wsola,
        }
    }
}

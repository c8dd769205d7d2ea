//! Predominant pitch detection
//!
//! Frame-wise YIN over centred, zero-padded frames. The squared-difference
//! function is expanded as `d(tau) = E(head) + E(lagged window) - 2 r(tau)`,
//! with the cross term `r` taken from one FFT correlation per frame and the
//! lagged energies from a prefix sum, so a frame costs O(N log N).
//!
//! Every hop yields exactly one [`PitchFrame`]; silent or aperiodic frames
//! are reported as [`FramePitch::Unvoiced`] rather than dropped, keeping the
//! track aligned with the buffer.

use std::sync::Arc;

use log::debug;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use serde::Serialize;

use crate::analysis::note::{midi_to_note_name, nearest_note};
use crate::config::DetectorConfig;
use crate::engine::buffer::{db_to_linear, rms_of, AudioBuffer};

// ============================================================================
// Track types
// ============================================================================

/// Pitch estimate for one analysis frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FramePitch {
    Voiced { frequency_hz: f32, confidence: f32 },
    Unvoiced,
}

impl FramePitch {
    pub fn frequency_hz(&self) -> Option<f32> {
        match self {
            FramePitch::Voiced { frequency_hz, .. } => Some(*frequency_hz),
            FramePitch::Unvoiced => None,
        }
    }

    pub fn is_voiced(&self) -> bool {
        matches!(self, FramePitch::Voiced { .. })
    }
}

/// One frame of a [`PitchTrack`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PitchFrame {
    /// Frame centre in seconds from the start of the buffer
    pub time_secs: f64,
    pub pitch: FramePitch,
}

/// Time-resolved pitch estimates, one per hop
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PitchTrack {
    frames: Vec<PitchFrame>,
    hop_size: usize,
    sample_rate: u32,
    num_samples: usize,
}

impl PitchTrack {
    /// Build a track from per-hop estimates over a buffer of `num_samples`
    pub fn new(
        pitches: Vec<FramePitch>,
        hop_size: usize,
        sample_rate: u32,
        num_samples: usize,
    ) -> Self {
        let frames = pitches
            .into_iter()
            .enumerate()
            .map(|(i, pitch)| PitchFrame {
                time_secs: (i * hop_size) as f64 / sample_rate as f64,
                pitch,
            })
            .collect();
        Self {
            frames,
            hop_size,
            sample_rate,
            num_samples,
        }
    }

    /// A track holding the same estimate in every frame
    pub fn constant(pitch: FramePitch, num_samples: usize, hop_size: usize, sample_rate: u32) -> Self {
        Self::new(
            vec![pitch; frame_count(num_samples, hop_size)],
            hop_size,
            sample_rate,
            num_samples,
        )
    }

    /// A track with every frame unvoiced covering `num_samples`
    pub fn unvoiced(num_samples: usize, hop_size: usize, sample_rate: u32) -> Self {
        Self::constant(FramePitch::Unvoiced, num_samples, hop_size, sample_rate)
    }

    pub fn frames(&self) -> &[PitchFrame] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn hop_size(&self) -> usize {
        self.hop_size
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Length of the analysed buffer in samples
    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    /// Frequencies of the voiced frames, in time order
    pub fn voiced_frequencies(&self) -> impl Iterator<Item = f32> + '_ {
        self.frames.iter().filter_map(|f| f.pitch.frequency_hz())
    }

    /// Pitch of the frame whose centre is nearest to `time_secs`
    pub fn pitch_at(&self, time_secs: f64) -> FramePitch {
        if self.frames.is_empty() || self.hop_size == 0 {
            return FramePitch::Unvoiced;
        }
        let index = (time_secs.max(0.0) * self.sample_rate as f64 / self.hop_size as f64).round()
            as usize;
        self.frames[index.min(self.frames.len() - 1)].pitch
    }
}

/// Representative pitch of a whole buffer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PitchEstimate {
    /// Median of the voiced frames (Hz)
    pub frequency_hz: f32,
    /// Nearest MIDI note
    pub midi: u8,
    /// Name of the nearest note
    pub note_name: String,
    /// Signed deviation from the nearest note
    pub cents: f32,
}

/// Predominant pitch, or the explicit absence of one
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PredominantPitch {
    Detected(PitchEstimate),
    Undetected,
}

impl PredominantPitch {
    pub fn frequency_hz(&self) -> Option<f32> {
        match self {
            PredominantPitch::Detected(estimate) => Some(estimate.frequency_hz),
            PredominantPitch::Undetected => None,
        }
    }
}

/// Everything the detector learned about a buffer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PitchAnalysis {
    pub track: PitchTrack,
    pub predominant: PredominantPitch,
    /// Mean of the voiced frames, for reporting
    pub mean_hz: Option<f32>,
    /// Fraction of frames that were voiced
    pub voiced_ratio: f32,
}

// ============================================================================
// Detector
// ============================================================================

/// YIN pitch detector
#[derive(Debug, Clone)]
pub struct PitchDetector {
    config: DetectorConfig,
    a4_hz: f32,
}

impl Default for PitchDetector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

impl PitchDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            a4_hz: crate::analysis::note::A4_HZ,
        }
    }

    /// Use a different A4 reference when naming the predominant pitch
    pub fn with_tuning(mut self, a4_hz: f32) -> Self {
        self.a4_hz = a4_hz;
        self
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Analyse a buffer
    ///
    /// Never fails: silence, noise and too-short input all yield an
    /// all-unvoiced track and [`PredominantPitch::Undetected`].
    pub fn detect(&self, buffer: &AudioBuffer) -> PitchAnalysis {
        let track = self.track(buffer);
        let analysis = summarize(track, self.a4_hz);
        debug!(
            "Pitch analysis: {} frames, voiced ratio {:.2}, predominant {:?}",
            analysis.track.len(),
            analysis.voiced_ratio,
            analysis.predominant.frequency_hz()
        );
        analysis
    }

    /// Compute the time-resolved track only
    pub fn track(&self, buffer: &AudioBuffer) -> PitchTrack {
        let hop = self.config.hop_size.max(1);
        let sample_rate = buffer.sample_rate();
        let min_len = (self.config.min_duration_secs as f64 * sample_rate as f64) as usize;

        if buffer.len() < min_len.max(1) {
            return PitchTrack::unvoiced(buffer.len(), hop, sample_rate);
        }

        let Some(kernel) = YinKernel::new(&self.config, sample_rate) else {
            return PitchTrack::unvoiced(buffer.len(), hop, sample_rate);
        };

        let samples = buffer.samples();
        let frame_size = self.config.frame_size;
        let half = (frame_size / 2) as isize;
        let silence = db_to_linear(self.config.silence_db);
        let mut frame = vec![0.0_f32; frame_size];

        let pitches = (0..frame_count(samples.len(), hop))
            .map(|i| {
                let start = (i * hop) as isize - half;
                for (j, slot) in frame.iter_mut().enumerate() {
                    let idx = start + j as isize;
                    *slot = if idx >= 0 && (idx as usize) < samples.len() {
                        samples[idx as usize]
                    } else {
                        0.0
                    };
                }
                if rms_of(&frame) < silence {
                    FramePitch::Unvoiced
                } else {
                    kernel.estimate(&frame)
                }
            })
            .collect();

        PitchTrack::new(pitches, hop, sample_rate, samples.len())
    }
}

/// Number of centred frames covering `num_samples`
fn frame_count(num_samples: usize, hop: usize) -> usize {
    if num_samples == 0 {
        0
    } else {
        1 + num_samples / hop.max(1)
    }
}

/// Reduce a track to its summary statistics
fn summarize(track: PitchTrack, a4_hz: f32) -> PitchAnalysis {
    let mut voiced: Vec<f32> = track.voiced_frequencies().collect();
    let voiced_ratio = if track.is_empty() {
        0.0
    } else {
        voiced.len() as f32 / track.len() as f32
    };

    if voiced.is_empty() {
        return PitchAnalysis {
            track,
            predominant: PredominantPitch::Undetected,
            mean_hz: None,
            voiced_ratio,
        };
    }

    let mean = voiced.iter().map(|&f| f as f64).sum::<f64>() / voiced.len() as f64;
    voiced.sort_by(|a, b| a.total_cmp(b));
    let mid = voiced.len() / 2;
    let median = if voiced.len() % 2 == 0 {
        (voiced[mid - 1] + voiced[mid]) / 2.0
    } else {
        voiced[mid]
    };

    let predominant = match nearest_note(median, a4_hz) {
        Some((midi, cents)) => PredominantPitch::Detected(PitchEstimate {
            frequency_hz: median,
            midi,
            note_name: midi_to_note_name(midi),
            cents,
        }),
        None => PredominantPitch::Undetected,
    };

    PitchAnalysis {
        track,
        predominant,
        mean_hz: Some(mean as f32),
        voiced_ratio,
    }
}

// ============================================================================
// YIN kernel
// ============================================================================

/// Planned FFTs and lag bounds for one (config, sample rate) pair
struct YinKernel {
    /// Integration window length
    window: usize,
    tau_min: usize,
    tau_max: usize,
    fft_len: usize,
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
    threshold: f64,
    sample_rate: f64,
    min_hz: f64,
    max_hz: f64,
}

impl YinKernel {
    fn new(config: &DetectorConfig, sample_rate: u32) -> Option<Self> {
        let sr = sample_rate as f64;
        let frame_size = config.frame_size;
        let tau_max = ((sr / config.min_frequency_hz as f64).ceil() as usize).min(frame_size / 2);
        let tau_min = ((sr / config.max_frequency_hz as f64).floor() as usize).max(2);
        if tau_min + 2 > tau_max {
            return None;
        }

        let window = frame_size - tau_max;
        let fft_len = (frame_size + window).next_power_of_two();
        let mut planner = FftPlanner::new();

        Some(Self {
            window,
            tau_min,
            tau_max,
            fft_len,
            forward: planner.plan_fft_forward(fft_len),
            inverse: planner.plan_fft_inverse(fft_len),
            threshold: config.threshold as f64,
            sample_rate: sr,
            min_hz: config.min_frequency_hz as f64,
            max_hz: config.max_frequency_hz as f64,
        })
    }

    /// Cumulative-mean-normalized difference for lags `0..=tau_max`
    fn cmnd(&self, frame: &[f32]) -> Vec<f64> {
        let w = self.window;
        let zero = Complex::new(0.0, 0.0);

        let mut lagged: Vec<Complex<f64>> = frame
            .iter()
            .map(|&x| Complex::new(x as f64, 0.0))
            .chain(std::iter::repeat(zero))
            .take(self.fft_len)
            .collect();
        let mut head: Vec<Complex<f64>> = frame[..w]
            .iter()
            .map(|&x| Complex::new(x as f64, 0.0))
            .chain(std::iter::repeat(zero))
            .take(self.fft_len)
            .collect();

        self.forward.process(&mut lagged);
        self.forward.process(&mut head);
        for (l, h) in lagged.iter_mut().zip(head.iter()) {
            *l *= h.conj();
        }
        self.inverse.process(&mut lagged);
        let scale = 1.0 / self.fft_len as f64;

        let mut prefix = Vec::with_capacity(frame.len() + 1);
        prefix.push(0.0_f64);
        let mut acc = 0.0;
        for &x in frame {
            acc += x as f64 * x as f64;
            prefix.push(acc);
        }
        let head_energy = prefix[w];

        let mut cmnd = vec![1.0; self.tau_max + 1];
        let mut running = 0.0;
        for tau in 1..=self.tau_max {
            let lagged_energy = prefix[tau + w] - prefix[tau];
            let r = lagged[tau].re * scale;
            let d = (head_energy + lagged_energy - 2.0 * r).max(0.0);
            running += d;
            cmnd[tau] = if running > 0.0 {
                d * tau as f64 / running
            } else {
                1.0
            };
        }
        cmnd
    }

    fn estimate(&self, frame: &[f32]) -> FramePitch {
        let cmnd = self.cmnd(frame);

        let mut found = None;
        let mut tau = self.tau_min;
        while tau <= self.tau_max {
            if cmnd[tau] < self.threshold {
                while tau < self.tau_max && cmnd[tau + 1] < cmnd[tau] {
                    tau += 1;
                }
                found = Some(tau);
                break;
            }
            tau += 1;
        }
        let Some(tau) = found else {
            return FramePitch::Unvoiced;
        };

        let refined = if tau > 1 && tau < self.tau_max {
            let (a, b, c) = (cmnd[tau - 1], cmnd[tau], cmnd[tau + 1]);
            let denom = a - 2.0 * b + c;
            if denom.abs() > 1e-12 {
                tau as f64 + 0.5 * (a - c) / denom
            } else {
                tau as f64
            }
        } else {
            tau as f64
        };

        let frequency = self.sample_rate / refined;
        if !(self.min_hz..=self.max_hz).contains(&frequency) {
            return FramePitch::Unvoiced;
        }

        FramePitch::Voiced {
            frequency_hz: frequency as f32,
            confidence: (1.0 - cmnd[tau]).clamp(0.0, 1.0) as f32,
        }
    }
}

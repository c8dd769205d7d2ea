//! Pitch/time corrector
//!
//! Decides the pitch ratio from the detected and target pitch and hands the
//! actual shifting to a [`ShiftKernel`]. An undetected pitch degrades to a
//! pure time stretch (ratio 1.0); ratios outside the configured range are
//! clamped and reported instead of failing the run.

use log::{debug, warn};
use serde::Serialize;

use crate::config::CorrectorConfig;
use crate::dsp::shift::{PhaseVocoderKernel, ShiftKernel, StretchMethod};
use crate::engine::buffer::AudioBuffer;
use crate::error::{EnforcerError, Result};

/// Ratios this close to 1.0 are treated as exactly 1.0
const UNITY_TOLERANCE: f64 = 1e-6;

/// A shift ratio that had to be pulled into range
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RatioClamp {
    /// Ratio implied by detected and target pitch (may be non-finite)
    pub raw_ratio: f64,
    pub applied_ratio: f64,
}

/// Pitch ratio for moving `detected_hz` onto `target_hz`
///
/// # Returns
/// The ratio to apply and, when it had to be clamped, the clamp record.
/// With no detected pitch the ratio is exactly 1.0.
pub fn shift_ratio(
    detected_hz: Option<f32>,
    target_hz: f32,
    config: &CorrectorConfig,
) -> (f64, Option<RatioClamp>) {
    let Some(detected) = detected_hz else {
        return (1.0, None);
    };

    let raw = target_hz as f64 / detected as f64;
    if !raw.is_finite() || raw <= 0.0 {
        return (
            1.0,
            Some(RatioClamp {
                raw_ratio: raw,
                applied_ratio: 1.0,
            }),
        );
    }

    let applied = raw.clamp(config.min_ratio, config.max_ratio);
    if applied != raw {
        (
            applied,
            Some(RatioClamp {
                raw_ratio: raw,
                applied_ratio: applied,
            }),
        )
    } else {
        (raw, None)
    }
}

/// Reject stretch ratios outside the configured range
pub fn validate_time_stretch(time_stretch: f64, config: &CorrectorConfig) -> Result<()> {
    if time_stretch.is_finite()
        && time_stretch >= config.min_stretch
        && time_stretch <= config.max_stretch
    {
        Ok(())
    } else {
        Err(EnforcerError::invalid_parameter(
            "time_stretch",
            time_stretch,
            "a ratio inside the configured stretch range",
        ))
    }
}

/// Output of a correction
#[derive(Debug, Clone)]
pub struct Corrected {
    pub buffer: AudioBuffer,
    pub pitch_ratio: f64,
    pub time_ratio: f64,
    pub clamp: Option<RatioClamp>,
    /// Whether the kernel was skipped because both ratios were unity
    pub bypassed: bool,
}

/// Drives a shift kernel
#[derive(Debug, Clone)]
pub struct PitchCorrector<K = PhaseVocoderKernel> {
    kernel: K,
    config: CorrectorConfig,
}

impl Default for PitchCorrector {
    fn default() -> Self {
        Self::new(PhaseVocoderKernel::default(), CorrectorConfig::default())
    }
}

impl<K: ShiftKernel> PitchCorrector<K> {
    pub fn new(kernel: K, config: CorrectorConfig) -> Self {
        Self { kernel, config }
    }

    pub fn config(&self) -> &CorrectorConfig {
        &self.config
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    /// Shift `buffer` from `detected_hz` to `target_hz` and stretch it
    ///
    /// # Arguments
    /// * `buffer` - Input audio
    /// * `detected_hz` - Predominant pitch, or `None` if undetected
    /// * `target_hz` - Frequency of the target note
    /// * `time_stretch` - Duration multiplier
    ///
    /// # Errors
    /// * `InvalidParameter` - If the target or stretch is out of range
    /// * Any error from the kernel
    pub fn correct(
        &self,
        buffer: &AudioBuffer,
        detected_hz: Option<f32>,
        target_hz: f32,
        time_stretch: f64,
    ) -> Result<Corrected> {
        self.correct_with_method(
            buffer,
            detected_hz,
            target_hz,
            time_stretch,
            StretchMethod::default(),
        )
    }

    /// [`correct`](Self::correct) with an explicit stretch algorithm
    pub fn correct_with_method(
        &self,
        buffer: &AudioBuffer,
        detected_hz: Option<f32>,
        target_hz: f32,
        time_stretch: f64,
        method: StretchMethod,
    ) -> Result<Corrected> {
        if !(target_hz.is_finite() && target_hz > 0.0) {
            return Err(EnforcerError::invalid_parameter(
                "target_hz",
                target_hz,
                "a positive frequency",
            ));
        }
        validate_time_stretch(time_stretch, &self.config)?;

        let (pitch_ratio, clamp) = shift_ratio(detected_hz, target_hz, &self.config);
        if let Some(c) = clamp {
            warn!(
                "Shift ratio {:.3} outside [{}, {}], using {:.3}",
                c.raw_ratio, self.config.min_ratio, self.config.max_ratio, c.applied_ratio
            );
        }

        let pitch_ratio = if (pitch_ratio - 1.0).abs() < UNITY_TOLERANCE {
            1.0
        } else {
            pitch_ratio
        };
        let time_ratio = if (time_stretch - 1.0).abs() < UNITY_TOLERANCE {
            1.0
        } else {
            time_stretch
        };

        if pitch_ratio == 1.0 && time_ratio == 1.0 {
            debug!("Correction bypassed (unity ratios)");
            return Ok(Corrected {
                buffer: buffer.clone(),
                pitch_ratio,
                time_ratio,
                clamp,
                bypassed: true,
            });
        }

        debug!(
            "Correcting with {}: pitch ratio {:.5}, time ratio {:.5}",
            method, pitch_ratio, time_ratio
        );
        let shifted = self
            .kernel
            .for_method(method)
            .shift(buffer, pitch_ratio, time_ratio)?;

        Ok(Corrected {
            buffer: shifted,
            pitch_ratio,
            time_ratio,
            clamp,
            bypassed: false,
        })
    }
}

//! Cleanliness stage: harmonic mask, then low-cut, then high-shelf
//!
//! In [`CleanupMode::Auto`] the filter corners are derived from the single
//! amount control and the buffer's Nyquist frequency. In
//! [`CleanupMode::Manual`] the corners are used as given, clamped into
//! (0, Nyquist) with a recorded warning when they fall outside it.

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::analysis::pitch::PitchTrack;
use crate::config::CleanupConfig;
use crate::dsp::filters::{Biquad, FilterType, BUTTERWORTH_Q};
use crate::dsp::mask::{validate_amount, MaskBuilder};
use crate::engine::buffer::AudioBuffer;
use crate::error::{EnforcerError, Result};

/// Default manual shelf gain (dB)
pub const DEFAULT_SHELF_GAIN_DB: f32 = -6.0;

/// Closest a clamped corner may sit to 0 Hz or Nyquist, as a fraction of Nyquist
const CORNER_MARGIN: f32 = 1e-4;

/// Hand-set filter corners
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ManualCorners {
    pub low_cut_hz: f32,
    pub high_shelf_hz: f32,
    #[serde(default = "default_shelf_gain")]
    pub shelf_gain_db: f32,
}

fn default_shelf_gain() -> f32 {
    DEFAULT_SHELF_GAIN_DB
}

/// Where the cleanup filter corners come from
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CleanupMode {
    /// Derived from the amount and the sample rate
    #[default]
    Auto,
    /// Taken verbatim
    Manual(ManualCorners),
}

/// Cleanliness controls for one run
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CleanlinessParams {
    /// Harmonic isolation amount in [0, 1]
    pub amount: f32,
    #[serde(flatten)]
    pub mode: CleanupMode,
}

impl CleanlinessParams {
    pub fn auto(amount: f32) -> Self {
        Self {
            amount,
            mode: CleanupMode::Auto,
        }
    }

    pub fn manual(amount: f32, corners: ManualCorners) -> Self {
        Self {
            amount,
            mode: CleanupMode::Manual(corners),
        }
    }

    /// Reject amounts outside [0, 1] and non-finite manual values
    pub fn validate(&self) -> Result<()> {
        validate_amount(self.amount)?;
        if let CleanupMode::Manual(corners) = self.mode {
            for (param, value) in [
                ("low_cut_hz", corners.low_cut_hz),
                ("high_shelf_hz", corners.high_shelf_hz),
                ("shelf_gain_db", corners.shelf_gain_db),
            ] {
                if !value.is_finite() {
                    return Err(EnforcerError::invalid_parameter(
                        param,
                        value,
                        "a finite number",
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Corner settings actually applied to a buffer
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FilterCorners {
    pub low_cut_hz: f32,
    pub high_shelf_hz: f32,
    pub shelf_gain_db: f32,
}

/// A manual corner that had to be moved into range
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CornerClamp {
    pub corner: &'static str,
    pub requested_hz: f32,
    pub applied_hz: f32,
}

// ============================================================================
// Corner curves
// ============================================================================

/// Auto low-cut corner: rises from `low_cut_start` to `low_cut_end` of Nyquist
pub fn auto_low_cut_hz(amount: f32, sample_rate: u32, config: &CleanupConfig) -> f32 {
    let nyquist = sample_rate as f32 / 2.0;
    let amount = amount.clamp(0.0, 1.0);
    nyquist * (config.low_cut_start + (config.low_cut_end - config.low_cut_start) * amount)
}

/// Auto high-shelf corner: falls from `high_shelf_start` to `high_shelf_end` of Nyquist
pub fn auto_high_shelf_hz(amount: f32, sample_rate: u32, config: &CleanupConfig) -> f32 {
    let nyquist = sample_rate as f32 / 2.0;
    let amount = amount.clamp(0.0, 1.0);
    nyquist * (config.high_shelf_start - (config.high_shelf_start - config.high_shelf_end) * amount)
}

/// Auto shelf gain: 0 dB at amount 0, `-max_shelf_cut_db` at amount 1
pub fn auto_shelf_gain_db(amount: f32, config: &CleanupConfig) -> f32 {
    -config.max_shelf_cut_db * amount.clamp(0.0, 1.0)
}

/// Resolve the corners for a run, clamping manual ones into (0, Nyquist)
pub fn resolve_corners(
    params: &CleanlinessParams,
    sample_rate: u32,
    config: &CleanupConfig,
) -> (FilterCorners, Vec<CornerClamp>) {
    match params.mode {
        CleanupMode::Auto => (
            FilterCorners {
                low_cut_hz: auto_low_cut_hz(params.amount, sample_rate, config),
                high_shelf_hz: auto_high_shelf_hz(params.amount, sample_rate, config),
                shelf_gain_db: auto_shelf_gain_db(params.amount, config),
            },
            Vec::new(),
        ),
        CleanupMode::Manual(corners) => {
            let mut clamps = Vec::new();
            let low_cut_hz = clamp_corner("low_cut_hz", corners.low_cut_hz, sample_rate, &mut clamps);
            let high_shelf_hz =
                clamp_corner("high_shelf_hz", corners.high_shelf_hz, sample_rate, &mut clamps);
            (
                FilterCorners {
                    low_cut_hz,
                    high_shelf_hz,
                    shelf_gain_db: corners.shelf_gain_db,
                },
                clamps,
            )
        }
    }
}

fn clamp_corner(
    corner: &'static str,
    requested_hz: f32,
    sample_rate: u32,
    clamps: &mut Vec<CornerClamp>,
) -> f32 {
    let nyquist = sample_rate as f32 / 2.0;
    let margin = nyquist * CORNER_MARGIN;
    let applied_hz = requested_hz.clamp(margin, nyquist - margin);
    if applied_hz != requested_hz {
        warn!(
            "{} of {:.1} Hz is outside (0, {:.1}) Hz, using {:.1} Hz",
            corner, requested_hz, nyquist, applied_hz
        );
        clamps.push(CornerClamp {
            corner,
            requested_hz,
            applied_hz,
        });
    }
    applied_hz
}

// ============================================================================
// Stage
// ============================================================================

/// Result of the cleanliness stage
#[derive(Debug, Clone)]
pub struct CleanupOutput {
    pub buffer: AudioBuffer,
    /// Corners applied, or `None` when the filters were bypassed
    pub corners: Option<FilterCorners>,
    pub clamps: Vec<CornerClamp>,
}

/// Mask plus filter chain
#[derive(Debug)]
pub struct CleanupChain {
    mask: MaskBuilder,
    config: CleanupConfig,
}

impl CleanupChain {
    pub fn new(mask: MaskBuilder, config: CleanupConfig) -> Self {
        Self { mask, config }
    }

    /// Run mask -> low-cut -> high-shelf
    ///
    /// Auto mode at amount 0 bypasses everything and returns the input.
    pub fn process(
        &self,
        buffer: &AudioBuffer,
        track: &PitchTrack,
        params: &CleanlinessParams,
    ) -> Result<CleanupOutput> {
        params.validate()?;

        if params.mode == CleanupMode::Auto && params.amount == 0.0 {
            debug!("Cleanliness bypassed (auto, amount 0)");
            return Ok(CleanupOutput {
                buffer: buffer.clone(),
                corners: None,
                clamps: Vec::new(),
            });
        }

        let masked = self.mask.apply(buffer, track, params.amount)?;
        let (corners, clamps) = resolve_corners(params, buffer.sample_rate(), &self.config);
        debug!(
            "Cleanup corners: low cut {:.1} Hz, shelf {:.1} Hz at {:.1} dB",
            corners.low_cut_hz, corners.high_shelf_hz, corners.shelf_gain_db
        );

        let sample_rate = buffer.sample_rate();
        let low_cut = Biquad::design(
            FilterType::HighPass { q: BUTTERWORTH_Q },
            sample_rate,
            corners.low_cut_hz as f64,
        )?;
        let mut samples = low_cut.filtfilt(masked.samples());

        if corners.shelf_gain_db.abs() > 1e-3 {
            // Two passes, half the gain each
            let shelf = Biquad::design(
                FilterType::HighShelf {
                    gain_db: corners.shelf_gain_db as f64 / 2.0,
                    slope: self.config.shelf_slope as f64,
                },
                sample_rate,
                corners.high_shelf_hz as f64,
            )?;
            samples = shelf.filtfilt(&samples);
        }

        Ok(CleanupOutput {
            buffer: masked.with_samples(samples),
            corners: Some(corners),
            clamps,
        })
    }
}

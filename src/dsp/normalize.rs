//! Output normalizer
//!
//! Peak mode scales so the loudest sample sits at the ceiling. RMS mode
//! scales towards an RMS target. Either way the gain is capped so that the
//! peak never exceeds full scale; samples are never hard-clipped afterwards.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::engine::buffer::{db_to_linear, linear_to_db, AudioBuffer};
use crate::error::{EnforcerError, Result};

/// Default peak ceiling (dBFS)
pub const DEFAULT_CEILING_DB: f32 = -1.0;

/// Buffers with a peak below this are left alone
const SILENCE_PEAK: f32 = 1e-10;

/// How the output level is set
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum NormalizeMode {
    Off,
    Peak { ceiling_db: f32 },
    Rms { target_db: f32 },
}

impl Default for NormalizeMode {
    fn default() -> Self {
        NormalizeMode::Peak {
            ceiling_db: DEFAULT_CEILING_DB,
        }
    }
}

impl NormalizeMode {
    /// Reject targets above 0 dBFS or non-finite ones
    pub fn validate(&self) -> Result<()> {
        let (param, value) = match *self {
            NormalizeMode::Off => return Ok(()),
            NormalizeMode::Peak { ceiling_db } => ("ceiling_db", ceiling_db),
            NormalizeMode::Rms { target_db } => ("target_db", target_db),
        };
        if value.is_finite() && value <= 0.0 {
            Ok(())
        } else {
            Err(EnforcerError::invalid_parameter(
                param,
                value,
                "a level <= 0 dBFS",
            ))
        }
    }
}

/// Gain that `mode` would apply to a buffer with the given peak and RMS
pub fn compute_gain(mode: NormalizeMode, peak: f32, rms: f32) -> f32 {
    if peak < SILENCE_PEAK {
        return 1.0;
    }
    let wanted = match mode {
        NormalizeMode::Off => return 1.0,
        NormalizeMode::Peak { ceiling_db } => db_to_linear(ceiling_db) / peak,
        NormalizeMode::Rms { target_db } => {
            if rms <= 0.0 {
                return 1.0;
            }
            db_to_linear(target_db) / rms
        }
    };
    wanted.min(full_scale_gain(peak))
}

/// Largest gain that keeps `peak * gain <= 1.0` in f32
fn full_scale_gain(peak: f32) -> f32 {
    let gain = 1.0 / peak;
    if peak * gain > 1.0 {
        gain * (1.0 - f32::EPSILON)
    } else {
        gain
    }
}

/// Normalize a buffer
///
/// # Errors
/// * `InvalidParameter` - If the target is above 0 dBFS or not finite
pub fn normalize(buffer: &AudioBuffer, mode: NormalizeMode) -> Result<AudioBuffer> {
    mode.validate()?;
    let gain = compute_gain(mode, buffer.peak(), buffer.rms());
    if gain == 1.0 {
        return Ok(buffer.clone());
    }
    debug!(
        "Normalizing ({:?}): gain {:.2} dB",
        mode,
        linear_to_db(gain)
    );
    Ok(buffer.scaled(gain))
}

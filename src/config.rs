//! Engine configuration
//!
//! Tunable constants for every stage, loadable from a JSON file. Each section
//! falls back to its defaults when absent, so a config file only needs the
//! keys it overrides.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EnforcerError, Result};

/// Pitch detector settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Analysis frame length in samples
    pub frame_size: usize,
    /// Hop between frame centres in samples
    pub hop_size: usize,
    /// Lowest fundamental searched (Hz)
    pub min_frequency_hz: f32,
    /// Highest fundamental searched (Hz)
    pub max_frequency_hz: f32,
    /// YIN absolute threshold on the normalized difference function
    pub threshold: f32,
    /// Frames quieter than this (dBFS RMS) are unvoiced
    pub silence_db: f32,
    /// Buffers shorter than this produce an all-unvoiced track
    pub min_duration_secs: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            frame_size: 2048,
            hop_size: 512,
            min_frequency_hz: 50.0,
            max_frequency_hz: 500.0,
            threshold: 0.15,
            silence_db: -60.0,
            min_duration_secs: 0.1,
        }
    }
}

/// Harmonic mask settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskConfig {
    /// STFT size
    pub n_fft: usize,
    /// STFT hop
    pub hop_size: usize,
    /// Harmonic band width at amount 0 (Hz)
    pub max_bandwidth_hz: f32,
    /// Harmonic band width at amount 1 (Hz)
    pub min_bandwidth_hz: f32,
    /// Gaussian smoothing across frames (in frames, 0 disables)
    pub temporal_smoothing: f32,
    /// Bins above this frequency are always passed. `None` masks up to Nyquist.
    pub hf_bypass_hz: Option<f32>,
}

impl Default for MaskConfig {
    fn default() -> Self {
        Self {
            n_fft: 2048,
            hop_size: 512,
            max_bandwidth_hz: 200.0,
            min_bandwidth_hz: 10.0,
            temporal_smoothing: 2.0,
            hf_bypass_hz: None,
        }
    }
}

/// Auto-drive curves for the cleanup filters, as fractions of Nyquist
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// Low-cut corner at amount 0
    pub low_cut_start: f32,
    /// Low-cut corner at amount 1
    pub low_cut_end: f32,
    /// High-shelf corner at amount 0
    pub high_shelf_start: f32,
    /// High-shelf corner at amount 1
    pub high_shelf_end: f32,
    /// Shelf cut at amount 1 (positive dB)
    pub max_shelf_cut_db: f32,
    /// RBJ shelf slope
    pub shelf_slope: f32,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            low_cut_start: 0.0005,
            low_cut_end: 0.004,
            high_shelf_start: 0.95,
            high_shelf_end: 0.35,
            max_shelf_cut_db: 12.0,
            shelf_slope: 1.0,
        }
    }
}

/// Pitch/time corrector limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectorConfig {
    pub min_ratio: f64,
    pub max_ratio: f64,
    pub min_stretch: f64,
    pub max_stretch: f64,
}

impl Default for CorrectorConfig {
    fn default() -> Self {
        Self {
            min_ratio: 0.25,
            max_ratio: 4.0,
            min_stretch: 0.1,
            max_stretch: 10.0,
        }
    }
}

/// Reference tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningConfig {
    /// Frequency of A4 in Hz
    pub a4_hz: f32,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self { a4_hz: 440.0 }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub detector: DetectorConfig,
    pub mask: MaskConfig,
    pub cleanup: CleanupConfig,
    pub corrector: CorrectorConfig,
    pub tuning: TuningConfig,
}

impl EngineConfig {
    /// Load a configuration from a JSON file and validate it
    ///
    /// # Arguments
    /// * `path` - Path to the JSON file
    ///
    /// # Returns
    /// * `Ok(EngineConfig)` - The parsed configuration
    /// * `Err(EnforcerError)` - If the file is missing, malformed or inconsistent
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => EnforcerError::FileNotFound {
                path: path.display().to_string(),
                source: Some(e),
            },
            _ => EnforcerError::Io(e),
        })?;
        let config: EngineConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every section is internally consistent
    pub fn validate(&self) -> Result<()> {
        let d = &self.detector;
        if d.frame_size < 64 || d.hop_size == 0 || d.hop_size > d.frame_size {
            return Err(invalid("detector frame_size must be >= 64 and hop_size in 1..=frame_size"));
        }
        if !(d.min_frequency_hz > 0.0 && d.min_frequency_hz < d.max_frequency_hz) {
            return Err(invalid("detector frequency range must satisfy 0 < min < max"));
        }
        if !(d.threshold > 0.0 && d.threshold < 1.0) {
            return Err(invalid("detector threshold must be in (0, 1)"));
        }

        let m = &self.mask;
        if !m.n_fft.is_power_of_two() || m.hop_size == 0 || m.hop_size > m.n_fft / 2 {
            return Err(invalid("mask n_fft must be a power of two and hop_size in 1..=n_fft/2"));
        }
        if !(m.min_bandwidth_hz > 0.0
            && m.min_bandwidth_hz <= m.max_bandwidth_hz
            && m.max_bandwidth_hz.is_finite())
        {
            return Err(invalid("mask bandwidths must satisfy 0 < min <= max"));
        }
        if !(m.temporal_smoothing.is_finite() && m.temporal_smoothing >= 0.0) {
            return Err(invalid("mask temporal_smoothing must be finite and >= 0"));
        }
        if let Some(hz) = m.hf_bypass_hz {
            if !(hz.is_finite() && hz > 0.0) {
                return Err(invalid("mask hf_bypass_hz must be a positive frequency"));
            }
        }

        let c = &self.cleanup;
        let fractions = [c.low_cut_start, c.low_cut_end, c.high_shelf_start, c.high_shelf_end];
        if fractions.iter().any(|f| !(*f > 0.0 && *f < 1.0)) {
            return Err(invalid("cleanup corner fractions must lie in (0, 1)"));
        }
        if c.low_cut_start > c.low_cut_end || c.high_shelf_start < c.high_shelf_end {
            return Err(invalid("cleanup curves must be monotonic (low cut rises, shelf falls)"));
        }
        if c.low_cut_end >= c.high_shelf_end {
            return Err(invalid("cleanup low_cut_end must stay below high_shelf_end"));
        }
        if !(c.max_shelf_cut_db.is_finite() && c.max_shelf_cut_db >= 0.0)
            || !(c.shelf_slope.is_finite() && c.shelf_slope > 0.0)
        {
            return Err(invalid("cleanup max_shelf_cut_db must be >= 0 and shelf_slope > 0"));
        }

        let r = &self.corrector;
        if !(r.min_ratio > 0.0
            && r.min_ratio <= 1.0
            && r.max_ratio >= 1.0
            && r.max_ratio.is_finite())
        {
            return Err(invalid("corrector ratio range must contain 1.0"));
        }
        if !(r.min_stretch > 0.0
            && r.min_stretch <= 1.0
            && r.max_stretch >= 1.0
            && r.max_stretch.is_finite())
        {
            return Err(invalid("corrector stretch range must contain 1.0"));
        }

        if !(self.tuning.a4_hz.is_finite() && self.tuning.a4_hz > 0.0) {
            return Err(invalid("tuning a4_hz must be positive"));
        }

        Ok(())
    }
}

fn invalid(reason: &str) -> EnforcerError {
    EnforcerError::InvalidConfig {
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "tuning": { "a4_hz": 432.0 } }"#).unwrap();
        assert_eq!(config.tuning.a4_hz, 432.0);
        assert_eq!(config.detector, DetectorConfig::default());
        assert_eq!(config.corrector.max_ratio, 4.0);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "mask": {{ "hf_bypass_hz": 12000.0 }} }}"#).unwrap();

        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.mask.hf_bypass_hz, Some(12000.0));
        assert_eq!(config.mask.n_fft, 2048);
    }

    #[test]
    fn test_rejects_inverted_curves() {
        let mut config = EngineConfig::default();
        config.cleanup.low_cut_end = 0.5;
        config.cleanup.high_shelf_end = 0.4;
        let err = config.validate().unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIG");
    }

    #[test]
    fn test_rejects_ratio_range_without_unity() {
        let mut config = EngineConfig::default();
        config.corrector.min_ratio = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_non_finite_mask_settings() {
        let mut config = EngineConfig::default();
        config.mask.temporal_smoothing = f32::NAN;
        assert_eq!(config.validate().unwrap_err().error_code(), "INVALID_CONFIG");

        let mut config = EngineConfig::default();
        config.mask.hf_bypass_hz = Some(f32::INFINITY);
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.mask.hf_bypass_hz = Some(-100.0);
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.cleanup.max_shelf_cut_db = f32::NAN;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.corrector.max_stretch = f64::INFINITY;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = EngineConfig::from_file(&dir.path().join("absent.json")).unwrap_err();
        assert_eq!(err.error_code(), "FILE_NOT_FOUND");
    }

    #[test]
    fn test_unreadable_path_is_io_error() {
        // Reading a directory fails with something other than NotFound
        let dir = tempfile::tempdir().unwrap();
        let err = EngineConfig::from_file(dir.path()).unwrap_err();
        assert_eq!(err.error_code(), "IO_ERROR");
    }
}

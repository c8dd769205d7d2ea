//! Processing pipeline
//!
//! One run takes an immutable [`ProcessingParams`] snapshot and a buffer and
//! walks the stages strictly downstream:
//!
//! ```text
//! detect -> mask -> low-cut -> high-shelf -> shift/stretch -> normalize
//! ```
//!
//! Parameters are validated before any stage runs. Anomalies that do not
//! stop the run are collected as [`PipelineWarning`]s on the result.

use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::analysis::note::{pitch_difference, PitchDifference, TargetNote};
use crate::analysis::pitch::{PitchAnalysis, PitchDetector, PredominantPitch};
use crate::config::EngineConfig;
use crate::dsp::cleanup::{CleanlinessParams, CleanupChain, CornerClamp, FilterCorners};
use crate::dsp::corrector::{validate_time_stretch, PitchCorrector, RatioClamp};
use crate::dsp::mask::MaskBuilder;
use crate::dsp::normalize::{normalize, NormalizeMode};
use crate::dsp::shift::{
    MethodKernel, PhaseVocoderKernel, ShiftKernel, StretchMethod, WsolaKernel,
};
use crate::engine::buffer::AudioBuffer;
use crate::error::{EnforcerError, Result};
use crate::export::sampler::{SampleLoop, SamplerMetadata};
use crate::export::wav::{export_wav, ExportOptions, ExportReport, SampleFormat};

fn unity() -> f64 {
    1.0
}

fn yes() -> bool {
    true
}

/// Everything the caller chooses for one run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProcessingParams {
    pub target_note: TargetNote,
    #[serde(default)]
    pub cleanliness: CleanlinessParams,
    /// Duration multiplier (1.0 keeps the length)
    #[serde(default = "unity")]
    pub time_stretch: f64,
    /// Algorithm used for the stretch/shift stage
    #[serde(default)]
    pub stretch_method: StretchMethod,
    #[serde(default)]
    pub normalize: NormalizeMode,
    #[serde(default)]
    pub sample_format: SampleFormat,
    /// Write the `inst` chunk next to `smpl`
    #[serde(default = "yes")]
    pub include_inst: bool,
    /// Loop in output samples
    #[serde(default)]
    pub sample_loop: Option<SampleLoop>,
}

impl ProcessingParams {
    /// Defaults for everything except the note
    pub fn new(target_note: TargetNote) -> Self {
        Self {
            target_note,
            cleanliness: CleanlinessParams::default(),
            time_stretch: 1.0,
            stretch_method: StretchMethod::default(),
            normalize: NormalizeMode::default(),
            sample_format: SampleFormat::default(),
            include_inst: true,
            sample_loop: None,
        }
    }

    pub fn with_cleanliness(mut self, cleanliness: CleanlinessParams) -> Self {
        self.cleanliness = cleanliness;
        self
    }

    pub fn with_time_stretch(mut self, time_stretch: f64) -> Self {
        self.time_stretch = time_stretch;
        self
    }

    pub fn with_stretch_method(mut self, stretch_method: StretchMethod) -> Self {
        self.stretch_method = stretch_method;
        self
    }

    pub fn with_normalize(mut self, normalize: NormalizeMode) -> Self {
        self.normalize = normalize;
        self
    }

    pub fn with_loop(mut self, sample_loop: SampleLoop) -> Self {
        self.sample_loop = Some(sample_loop);
        self
    }

    /// Reject the snapshot before any audio is touched
    pub fn validate(&self, config: &EngineConfig) -> Result<()> {
        self.cleanliness.validate()?;
        validate_time_stretch(self.time_stretch, &config.corrector)?;
        self.normalize.validate()?;
        if let Some(sample_loop) = self.sample_loop {
            if sample_loop.start >= sample_loop.end {
                return Err(EnforcerError::invalid_parameter(
                    "loop_start",
                    sample_loop.start,
                    "a start before the loop end",
                ));
            }
        }
        Ok(())
    }
}

/// A recoverable anomaly recorded during a run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineWarning {
    /// No voiced frames; the pitch was left unchanged
    PitchUndetected,
    ShiftRatioClamped(RatioClamp),
    CornerClamped(CornerClamp),
}

impl std::fmt::Display for PipelineWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineWarning::PitchUndetected => {
                write!(f, "no pitch detected, pitch left unchanged")
            }
            PipelineWarning::ShiftRatioClamped(c) => write!(
                f,
                "shift ratio {:.3} clamped to {:.3}",
                c.raw_ratio, c.applied_ratio
            ),
            PipelineWarning::CornerClamped(c) => write!(
                f,
                "{} {:.1} Hz clamped to {:.1} Hz",
                c.corner, c.requested_hz, c.applied_hz
            ),
        }
    }
}

/// Result of a run, ready for export
#[derive(Debug, Clone)]
pub struct ProcessedAudio {
    pub buffer: AudioBuffer,
    pub analysis: PitchAnalysis,
    pub target_note: TargetNote,
    pub target_hz: f32,
    pub pitch_ratio: f64,
    pub time_ratio: f64,
    /// Cleanup corners, or `None` when the filters were bypassed
    pub corners: Option<FilterCorners>,
    pub metadata: SamplerMetadata,
    pub export_options: ExportOptions,
    pub warnings: Vec<PipelineWarning>,
}

impl ProcessedAudio {
    /// Interval from the detected pitch to the target, before any clamping
    pub fn interval_to_target(&self) -> Option<PitchDifference> {
        let detected = self.analysis.predominant.frequency_hz()?;
        pitch_difference(detected, self.target_hz).ok()
    }

    /// Write the result as WAV
    pub fn export(&self, path: &Path) -> Result<ExportReport> {
        export_wav(&self.buffer, &self.export_options, path)
    }
}

/// The full correction pipeline
#[derive(Debug)]
pub struct Pipeline<K = MethodKernel> {
    config: EngineConfig,
    detector: PitchDetector,
    cleanup: CleanupChain,
    corrector: PitchCorrector<K>,
}

impl Pipeline {
    /// Build a pipeline with both built-in stretch kernels
    ///
    /// The phase vocoder shares the mask's STFT size and hop.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let phase_vocoder = PhaseVocoderKernel::new(config.mask.n_fft, config.mask.hop_size)?;
        let kernel = MethodKernel::new(phase_vocoder, WsolaKernel::default());
        Self::with_kernel(config, kernel)
    }
}

impl<K: ShiftKernel> Pipeline<K> {
    /// Build a pipeline around a custom shift kernel
    pub fn with_kernel(config: EngineConfig, kernel: K) -> Result<Self> {
        config.validate()?;
        let detector =
            PitchDetector::new(config.detector.clone()).with_tuning(config.tuning.a4_hz);
        let mask = MaskBuilder::new(config.mask.clone())?;
        let cleanup = CleanupChain::new(mask, config.cleanup.clone());
        let corrector = PitchCorrector::new(kernel, config.corrector.clone());
        Ok(Self {
            config,
            detector,
            cleanup,
            corrector,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Analyse a buffer without processing it
    pub fn analyze(&self, buffer: &AudioBuffer) -> PitchAnalysis {
        self.detector.detect(buffer)
    }

    /// Run every stage on `buffer`
    ///
    /// # Arguments
    /// * `buffer` - Mono input audio
    /// * `params` - Parameter snapshot for this run
    ///
    /// # Returns
    /// The processed audio with its analysis, applied settings, sampler
    /// metadata and any warnings.
    ///
    /// # Errors
    /// * `InvalidParameter` - If the snapshot is rejected (nothing has run)
    /// * `EmptyAudio` - If the buffer holds no samples
    /// * `ProcessingError` - If a stage produced unusable output
    pub fn run(&self, buffer: &AudioBuffer, params: &ProcessingParams) -> Result<ProcessedAudio> {
        params.validate(&self.config)?;
        if buffer.is_empty() {
            return Err(EnforcerError::EmptyAudio);
        }
        let output_len = (buffer.len() as f64 * params.time_stretch).round() as usize;
        if let Some(sample_loop) = params.sample_loop {
            sample_loop.validate(output_len)?;
        }

        let target_hz = params.target_note.frequency_hz(self.config.tuning.a4_hz);
        info!(
            "Processing {:.2}s at {} Hz towards {} ({:.2} Hz)",
            buffer.duration_secs(),
            buffer.sample_rate(),
            params.target_note,
            target_hz
        );
        let mut warnings = Vec::new();

        let analysis = self.detector.detect(buffer);
        if analysis.predominant == PredominantPitch::Undetected {
            warn!("No pitch detected; correcting duration only");
            warnings.push(PipelineWarning::PitchUndetected);
        }

        let cleaned = self
            .cleanup
            .process(buffer, &analysis.track, &params.cleanliness)?;
        warnings.extend(cleaned.clamps.iter().copied().map(PipelineWarning::CornerClamped));

        let corrected = self.corrector.correct_with_method(
            &cleaned.buffer,
            analysis.predominant.frequency_hz(),
            target_hz,
            params.time_stretch,
            params.stretch_method,
        )?;
        if let Some(clamp) = corrected.clamp {
            warnings.push(PipelineWarning::ShiftRatioClamped(clamp));
        }

        let output = normalize(&corrected.buffer, params.normalize)?;
        debug!(
            "Run finished: {} samples, ratio {:.4}, {} warning(s)",
            output.len(),
            corrected.pitch_ratio,
            warnings.len()
        );

        let mut metadata = SamplerMetadata::for_target(params.target_note, self.config.tuning.a4_hz);
        metadata.sample_loop = params.sample_loop;
        let export_options = ExportOptions {
            format: params.sample_format,
            metadata: Some(metadata),
            include_inst: params.include_inst,
        };

        Ok(ProcessedAudio {
            buffer: output,
            analysis,
            target_note: params.target_note,
            target_hz,
            pitch_ratio: corrected.pitch_ratio,
            time_ratio: corrected.time_ratio,
            corners: cleaned.corners,
            metadata,
            export_options,
            warnings,
        })
    }
}

/// Run the pipeline on a worker thread
///
/// Dropping the handle abandons the run; nothing is written until the
/// caller exports the result.
pub fn spawn_run<K>(
    pipeline: Arc<Pipeline<K>>,
    buffer: AudioBuffer,
    params: ProcessingParams,
) -> JoinHandle<Result<ProcessedAudio>>
where
    K: ShiftKernel + Send + Sync + 'static,
{
    thread::spawn(move || pipeline.run(&buffer, &params))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::cleanup::ManualCorners;
    use crate::engine::io::generate_test_tone;

    fn note(name: &str) -> TargetNote {
        TargetNote::parse(name).unwrap()
    }

    /// Keeps the audio, only honours the stretch length
    struct IdentityKernel;

    impl ShiftKernel for IdentityKernel {
        fn shift(&self, buffer: &AudioBuffer, _pitch: f64, time: f64) -> Result<AudioBuffer> {
            let mut samples = buffer.samples().to_vec();
            samples.resize((buffer.len() as f64 * time).round() as usize, 0.0);
            AudioBuffer::new(samples, buffer.sample_rate())
        }
    }

    fn identity_pipeline() -> Pipeline<IdentityKernel> {
        Pipeline::with_kernel(EngineConfig::default(), IdentityKernel).unwrap()
    }

    #[test]
    fn test_validation_runs_before_processing() {
        let pipeline = identity_pipeline();
        let tone = generate_test_tone(220.0, 0.5, 44100);

        let bad_amount = ProcessingParams::new(note("A3")).with_cleanliness(CleanlinessParams::auto(1.5));
        let bad_stretch = ProcessingParams::new(note("A3")).with_time_stretch(0.0);
        let bad_level = ProcessingParams::new(note("A3"))
            .with_normalize(NormalizeMode::Peak { ceiling_db: 3.0 });

        for params in [bad_amount, bad_stretch, bad_level] {
            let err = pipeline.run(&tone, &params).unwrap_err();
            assert_eq!(err.error_code(), "INVALID_PARAMETER");
        }
    }

    #[test]
    fn test_silence_warns_and_keeps_ratio() {
        let pipeline = identity_pipeline();
        let silence = AudioBuffer::silence(22050, 44100).unwrap();
        let out = pipeline.run(&silence, &ProcessingParams::new(note("C4"))).unwrap();

        assert_eq!(out.pitch_ratio, 1.0);
        assert_eq!(out.warnings, vec![PipelineWarning::PitchUndetected]);
        assert_eq!(out.metadata.root_note_midi, 60);
    }

    #[test]
    fn test_manual_corner_clamp_is_reported() {
        let pipeline = identity_pipeline();
        let tone = generate_test_tone(220.0, 0.5, 8000);
        let corners = ManualCorners {
            low_cut_hz: 50.0,
            high_shelf_hz: 10_000.0,
            shelf_gain_db: -6.0,
        };
        let params = ProcessingParams::new(note("A3"))
            .with_cleanliness(CleanlinessParams::manual(0.5, corners));

        let out = pipeline.run(&tone, &params).unwrap();
        assert!(out
            .warnings
            .iter()
            .any(|w| matches!(w, PipelineWarning::CornerClamped(c) if c.corner == "high_shelf_hz")));
    }

    #[test]
    fn test_stretch_sets_length_and_loop_is_checked_against_it() {
        let pipeline = identity_pipeline();
        let tone = generate_test_tone(220.0, 0.5, 44100);

        let params = ProcessingParams::new(note("A3")).with_time_stretch(2.0);
        let out = pipeline.run(&tone, &params).unwrap();
        assert_eq!(out.buffer.len(), 44100);

        let looped = params.with_loop(SampleLoop { start: 0, end: 40_000 });
        assert!(pipeline.run(&tone, &looped).is_ok());
        let too_long = params.with_loop(SampleLoop { start: 0, end: 44_100 });
        assert!(pipeline.run(&tone, &too_long).is_err());
    }

    #[test]
    fn test_empty_buffer_is_rejected() {
        let pipeline = identity_pipeline();
        let empty = AudioBuffer::new(Vec::new(), 44100).unwrap();
        let err = pipeline.run(&empty, &ProcessingParams::new(note("A4"))).unwrap_err();
        assert!(matches!(err, EnforcerError::EmptyAudio));
    }

    #[test]
    fn test_params_deserialize_with_defaults() {
        let params: ProcessingParams = serde_json::from_str(r#"{"target_note": "F#3"}"#).unwrap();
        assert_eq!(params, ProcessingParams::new(note("F#3")));
    }

    #[test]
    fn test_spawn_run_joins() {
        let pipeline = Arc::new(identity_pipeline());
        let tone = generate_test_tone(220.0, 0.3, 44100);
        let handle = spawn_run(pipeline, tone, ProcessingParams::new(note("A3")));
        let out = handle.join().unwrap().unwrap();
        assert_eq!(out.target_note, note("A3"));
    }

    #[test]
    fn test_wsola_method_corrects_pitch() {
        let pipeline = Pipeline::new(EngineConfig::default()).unwrap();
        let tone = generate_test_tone(196.0, 1.0, 44100);
        let params = ProcessingParams::new(note("A3")).with_stretch_method(StretchMethod::Wsola);

        let out = pipeline.run(&tone, &params).unwrap();
        assert_eq!(out.buffer.len(), tone.len());
        let detected = PitchDetector::default()
            .detect(&out.buffer)
            .predominant
            .frequency_hz()
            .unwrap();
        assert!((detected / 220.0 - 1.0).abs() < 0.02, "detected {}", detected);
    }

    #[test]
    fn test_stretch_method_deserializes() {
        let params: ProcessingParams =
            serde_json::from_str(r#"{"target_note": "A3", "stretch_method": "wsola"}"#).unwrap();
        assert_eq!(params.stretch_method, StretchMethod::Wsola);
    }

    #[test]
    fn test_interval_to_target() {
        let pipeline = identity_pipeline();
        let tone = generate_test_tone(220.0, 0.5, 44100);
        let out = pipeline.run(&tone, &ProcessingParams::new(note("C4"))).unwrap();

        let interval = out.interval_to_target().unwrap();
        assert_eq!(interval.semitones, 3);
        assert!(interval.cents.abs() < 20.0, "cents {}", interval.cents);

        let silence = AudioBuffer::silence(22050, 44100).unwrap();
        let out = pipeline.run(&silence, &ProcessingParams::new(note("C4"))).unwrap();
        assert!(out.interval_to_target().is_none());
    }
}

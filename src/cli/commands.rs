//! CLI Command Implementations
//!
//! Implements the actual logic for each CLI command.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use log::{error, info, warn};
use walkdir::WalkDir;

use crate::analysis::pitch::PredominantPitch;
use crate::cli::{NormalizeArg, ProcessOptions, StretchMethodArg};
use crate::config::EngineConfig;
use crate::dsp::cleanup::{CleanlinessParams, ManualCorners, DEFAULT_SHELF_GAIN_DB};
use crate::dsp::normalize::{NormalizeMode, DEFAULT_CEILING_DB};
use crate::dsp::shift::StretchMethod;
use crate::engine::io::import_audio;
use crate::export::riff::parse_chunks;
use crate::export::sampler::{SampleLoop, SamplerMetadata};
use crate::export::wav::SampleFormat;
use crate::pipeline::{Pipeline, ProcessingParams};

/// RMS target used when `--normalize rms` is given without `--level`
pub const DEFAULT_RMS_TARGET_DB: f32 = -18.0;

/// Load the engine configuration, or the defaults when no file is given
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

/// Turn command-line flags into a parameter snapshot
pub fn build_params(options: &ProcessOptions) -> crate::Result<ProcessingParams> {
    let cleanliness = match (options.low_cut, options.high_shelf) {
        (Some(low_cut_hz), Some(high_shelf_hz)) => CleanlinessParams::manual(
            options.cleanliness,
            ManualCorners {
                low_cut_hz,
                high_shelf_hz,
                shelf_gain_db: options.shelf_gain.unwrap_or(DEFAULT_SHELF_GAIN_DB),
            },
        ),
        _ => CleanlinessParams::auto(options.cleanliness),
    };

    let normalize = match options.normalize {
        NormalizeArg::Off => NormalizeMode::Off,
        NormalizeArg::Peak => NormalizeMode::Peak {
            ceiling_db: options.level.unwrap_or(DEFAULT_CEILING_DB),
        },
        NormalizeArg::Rms => NormalizeMode::Rms {
            target_db: options.level.unwrap_or(DEFAULT_RMS_TARGET_DB),
        },
    };

    let stretch_method = match options.stretch_method {
        StretchMethodArg::PhaseVocoder => StretchMethod::PhaseVocoder,
        StretchMethodArg::Wsola => StretchMethod::Wsola,
    };

    let mut params = ProcessingParams::new(options.note)
        .with_cleanliness(cleanliness)
        .with_time_stretch(options.stretch)
        .with_stretch_method(stretch_method)
        .with_normalize(normalize);
    params.sample_format = SampleFormat::from_bits(options.bit_depth)?;
    params.include_inst = !options.no_inst;
    if let (Some(start), Some(end)) = (options.loop_start, options.loop_end) {
        params = params.with_loop(SampleLoop { start, end });
    }
    Ok(params)
}

/// `<stem>_<note>.wav` in `dir`
pub fn default_output_path(input: &Path, dir: &Path, options: &ProcessOptions) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    dir.join(format!("{}_{}.wav", stem, options.note))
}

fn process_file(
    pipeline: &Pipeline,
    params: &ProcessingParams,
    input: &Path,
    output: &Path,
) -> Result<()> {
    let buffer = import_audio(input).with_context(|| format!("importing {}", input.display()))?;
    let processed = pipeline
        .run(&buffer, params)
        .with_context(|| format!("processing {}", input.display()))?;
    let report = processed
        .export(output)
        .with_context(|| format!("exporting {}", output.display()))?;

    match (
        processed.analysis.predominant.frequency_hz(),
        processed.interval_to_target(),
    ) {
        (Some(hz), Some(interval)) => println!(
            "{}: {:.2} Hz -> {} ({:.2} Hz), {:+} st {:+.1} cents, ratio {:.4}",
            input.display(),
            hz,
            processed.target_note,
            processed.target_hz,
            interval.semitones,
            interval.cents,
            processed.pitch_ratio
        ),
        _ => println!("{}: no pitch detected, left unshifted", input.display()),
    }
    for warning in &processed.warnings {
        println!("  warning: {}", warning);
    }
    println!(
        "  wrote {} ({} bytes, sha256 {})",
        report.path.display(),
        report.bytes_written,
        report.sha256
    );
    Ok(())
}

/// Correct a single file.
pub fn process(input: &Path, output: Option<&Path>, options: &ProcessOptions) -> Result<()> {
    info!("Processing: {}", input.display());

    let config = load_config(options.config.as_deref())?;
    let params = build_params(options)?;
    let pipeline = Pipeline::new(config)?;

    let output = match output {
        Some(path) => path.to_path_buf(),
        None => {
            let dir = input.parent().unwrap_or_else(|| Path::new("."));
            default_output_path(input, dir, options)
        }
    };

    process_file(&pipeline, &params, input, &output)
}

/// Print the detected pitch of a file.
pub fn detect(input: &Path, json: bool, config: Option<&Path>) -> Result<()> {
    info!("Detecting pitch: {}", input.display());

    let config = load_config(config)?;
    let pipeline = Pipeline::new(config)?;
    let buffer = import_audio(input).with_context(|| format!("importing {}", input.display()))?;
    let analysis = pipeline.analyze(&buffer);

    if json {
        println!("{}", serde_json::to_string_pretty(&analysis)?);
        return Ok(());
    }

    println!("File: {}", input.display());
    println!(
        "Duration: {:.2}s at {} Hz",
        buffer.duration_secs(),
        buffer.sample_rate()
    );
    match &analysis.predominant {
        PredominantPitch::Detected(estimate) => {
            println!(
                "Pitch: {:.2} Hz ({} {:+.1} cents)",
                estimate.frequency_hz, estimate.note_name, estimate.cents
            );
        }
        PredominantPitch::Undetected => println!("Pitch: not detected"),
    }
    println!("Voiced: {:.0}%", analysis.voiced_ratio * 100.0);

    if let Some(metadata) = embedded_metadata(input) {
        println!(
            "Embedded root note: MIDI {} {:+.1} cents",
            metadata.root_note_midi, metadata.pitch_fraction_cents
        );
    }
    Ok(())
}

/// Root note already stored in a WAV's `smpl` chunk, if any
fn embedded_metadata(path: &Path) -> Option<SamplerMetadata> {
    let bytes = fs::read(path).ok()?;
    let chunks = parse_chunks(&bytes).ok()?;
    let smpl = chunks.iter().find(|c| c.id() == b"smpl")?;
    SamplerMetadata::from_smpl(smpl.payload()).ok()
}

fn is_wav(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("wav"))
}

/// Correct every WAV under a directory.
pub fn batch(dir: &Path, out_dir: &Path, options: &ProcessOptions) -> Result<()> {
    info!("Batch processing: {} -> {}", dir.display(), out_dir.display());

    let config = load_config(options.config.as_deref())?;
    let params = build_params(options)?;
    let pipeline = Pipeline::new(config)?;
    fs::create_dir_all(out_dir)
        .with_context(|| format!("creating output directory {}", out_dir.display()))?;

    let mut processed = 0usize;
    let mut failed = 0usize;
    for entry in WalkDir::new(dir).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_wav(entry.path()) {
            continue;
        }

        let output = default_output_path(entry.path(), out_dir, options);
        match process_file(&pipeline, &params, entry.path(), &output) {
            Ok(()) => processed += 1,
            Err(e) => {
                error!("{}: {:#}", entry.path().display(), e);
                failed += 1;
            }
        }
    }

    println!("Processed {} file(s), {} failed", processed, failed);
    if failed > 0 {
        bail!("{} file(s) failed", failed);
    }
    Ok(())
}

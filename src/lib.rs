//! FreqEnforcer - Offline monophonic pitch correction
//!
//! Corrects a short monophonic recording to a chosen note and writes a WAV
//! whose sampler chunks carry that note as the root, so samplers map it
//! without manual tuning.
//!
//! # Architecture
//!
//! Stages run strictly downstream, each taking an `&AudioBuffer` and
//! returning a new one:
//! - Pitch detection (YIN) produces a time-resolved track and a median pitch
//! - A harmonic mask and low-cut/high-shelf filters remove non-harmonic content
//! - The corrector shifts to the target note and optionally stretches time
//! - The normalizer sets the output level
//! - The exporter writes PCM with `smpl`/`inst` metadata

pub mod analysis;
pub mod cli;
pub mod config;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod export;
pub mod pipeline;

pub use config::EngineConfig;
pub use error::{EnforcerError, Result};
pub use pipeline::{spawn_run, Pipeline, PipelineWarning, ProcessedAudio, ProcessingParams};

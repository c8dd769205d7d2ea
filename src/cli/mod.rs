//! CLI Module
//!
//! Command-line interface for FreqEnforcer.

pub mod commands;

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::analysis::note::TargetNote;

/// FreqEnforcer - pitch-correct samples to a note and export sampler-ready WAVs
#[derive(Parser, Debug)]
#[command(name = "freqenforcer")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Correct one file to a target note
    #[command(name = "process")]
    Process {
        /// Input audio file
        input: PathBuf,

        /// Output WAV (defaults to <input>_<note>.wav next to the input)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        options: ProcessOptions,
    },

    /// Report the detected pitch of a file
    #[command(name = "detect")]
    Detect {
        /// Input audio file
        input: PathBuf,

        /// Print the full analysis as JSON
        #[arg(long)]
        json: bool,

        /// Engine configuration (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Correct every WAV under a directory
    #[command(name = "batch")]
    Batch {
        /// Directory to scan recursively
        dir: PathBuf,

        /// Where corrected files are written
        #[arg(long)]
        out_dir: PathBuf,

        #[command(flatten)]
        options: ProcessOptions,
    },
}

/// Output level mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum NormalizeArg {
    Peak,
    Rms,
    Off,
}

/// Time-stretch algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StretchMethodArg {
    PhaseVocoder,
    Wsola,
}

/// Processing flags shared by `process` and `batch`
#[derive(Args, Debug, Clone)]
pub struct ProcessOptions {
    /// Target note (e.g. A4, F#3, Db5)
    #[arg(short, long)]
    pub note: TargetNote,

    /// Harmonic isolation amount, 0.0 to 1.0
    #[arg(short, long, default_value_t = 0.0)]
    pub cleanliness: f32,

    /// Manual low-cut corner in Hz (switches cleanup to manual mode)
    #[arg(long, requires = "high_shelf")]
    pub low_cut: Option<f32>,

    /// Manual high-shelf corner in Hz
    #[arg(long, requires = "low_cut")]
    pub high_shelf: Option<f32>,

    /// Manual high-shelf gain in dB
    #[arg(long, allow_hyphen_values = true)]
    pub shelf_gain: Option<f32>,

    /// Time-stretch ratio (2.0 doubles the duration)
    #[arg(short, long, default_value_t = 1.0)]
    pub stretch: f64,

    /// Stretch/shift algorithm
    #[arg(long, value_enum, default_value_t = StretchMethodArg::PhaseVocoder)]
    pub stretch_method: StretchMethodArg,

    /// Normalization mode
    #[arg(long, value_enum, default_value_t = NormalizeArg::Peak)]
    pub normalize: NormalizeArg,

    /// Normalization level in dBFS (peak ceiling or RMS target)
    #[arg(long, allow_hyphen_values = true)]
    pub level: Option<f32>,

    /// Output bit depth (16 or 24)
    #[arg(long, default_value_t = 16)]
    pub bit_depth: u16,

    /// Omit the inst chunk
    #[arg(long)]
    pub no_inst: bool,

    /// Loop start in output samples
    #[arg(long, requires = "loop_end")]
    pub loop_start: Option<u32>,

    /// Loop end in output samples (inclusive)
    #[arg(long, requires = "loop_start")]
    pub loop_end: Option<u32>,

    /// Engine configuration (JSON)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_process() {
        let cli = Cli::try_parse_from([
            "freqenforcer",
            "process",
            "in.wav",
            "--note",
            "F#3",
            "--cleanliness",
            "0.5",
            "--level",
            "-3",
            "--bit-depth",
            "24",
        ])
        .unwrap();

        match cli.command {
            Some(Commands::Process { input, options, .. }) => {
                assert_eq!(input, PathBuf::from("in.wav"));
                assert_eq!(options.note.midi(), 54);
                assert_eq!(options.cleanliness, 0.5);
                assert_eq!(options.level, Some(-3.0));
                assert_eq!(options.bit_depth, 24);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_stretch_method() {
        let cli = Cli::try_parse_from([
            "freqenforcer",
            "batch",
            "in",
            "--out-dir",
            "out",
            "--note",
            "C4",
            "--stretch-method",
            "wsola",
        ])
        .unwrap();

        match cli.command {
            Some(Commands::Batch { options, .. }) => {
                assert_eq!(options.stretch_method, StretchMethodArg::Wsola);
            }
            other => panic!("unexpected command: {:?}", other),
        }

        let result = Cli::try_parse_from([
            "freqenforcer",
            "process",
            "in.wav",
            "--note",
            "C4",
            "--stretch-method",
            "psola",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_manual_corners_need_both() {
        let result = Cli::try_parse_from([
            "freqenforcer",
            "process",
            "in.wav",
            "--note",
            "A4",
            "--low-cut",
            "80",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_bad_note_is_rejected_by_parser() {
        let result = Cli::try_parse_from(["freqenforcer", "process", "in.wav", "--note", "H2"]);
        assert!(result.is_err());
    }
}

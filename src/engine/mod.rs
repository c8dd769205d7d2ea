//! Audio Engine Module
//!
//! Core audio plumbing:
//! - Mono buffer type and level helpers
//! - File import and test-tone generation

pub mod buffer;
pub mod io;

pub use buffer::{db_to_linear, linear_to_db, AudioBuffer};
pub use io::{
    generate_harmonic_tone, generate_test_tone, import_audio, import_with, AudioDecoder,
    WavDecoder,
};

//! WAV export with sampler metadata

pub mod riff;
pub mod sampler;
pub mod wav;

pub use riff::{parse_chunks, Chunk};
pub use sampler::{SampleLoop, SamplerMetadata};
pub use wav::{encode_wav, export_wav, ExportOptions, ExportReport, SampleFormat};

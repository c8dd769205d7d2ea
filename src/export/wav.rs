//! WAV exporter
//!
//! Writes mono PCM with optional sampler chunks. The file is staged in a
//! temporary file next to the destination and renamed into place, so a
//! failed export never leaves a partial file behind. Exports targeting the
//! same path are serialized by a process-wide lock.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use log::{debug, info};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::engine::buffer::AudioBuffer;
use crate::error::{EnforcerError, Result};
use crate::export::riff::{riff_wave, Chunk, PayloadBuilder};
use crate::export::sampler::SamplerMetadata;

/// PCM bit depth of the exported file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleFormat {
    #[default]
    Pcm16,
    Pcm24,
}

impl SampleFormat {
    pub fn bits(&self) -> u16 {
        match self {
            SampleFormat::Pcm16 => 16,
            SampleFormat::Pcm24 => 24,
        }
    }

    pub fn from_bits(bits: u16) -> Result<Self> {
        match bits {
            16 => Ok(SampleFormat::Pcm16),
            24 => Ok(SampleFormat::Pcm24),
            other => Err(EnforcerError::invalid_parameter(
                "bit_depth",
                other,
                "16 or 24",
            )),
        }
    }

    fn bytes_per_sample(&self) -> usize {
        self.bits() as usize / 8
    }

    fn full_scale(&self) -> f32 {
        match self {
            SampleFormat::Pcm16 => i16::MAX as f32,
            SampleFormat::Pcm24 => 8_388_607.0,
        }
    }
}

/// What goes into the file besides the audio
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExportOptions {
    pub format: SampleFormat,
    /// Sampler metadata; `None` writes a plain `fmt ` + `data` file
    pub metadata: Option<SamplerMetadata>,
    /// Also write the `inst` chunk when metadata is present
    pub include_inst: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            format: SampleFormat::Pcm16,
            metadata: None,
            include_inst: true,
        }
    }
}

/// Summary of a finished export
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportReport {
    pub path: PathBuf,
    pub bytes_written: u64,
    /// Lowercase hex SHA-256 of the file contents
    pub sha256: String,
}

fn quantize(sample: f32, format: SampleFormat) -> i32 {
    let scale = format.full_scale();
    (sample * scale).round().clamp(-scale - 1.0, scale) as i32
}

fn fmt_chunk(sample_rate: u32, format: SampleFormat) -> Chunk {
    let block_align = format.bytes_per_sample() as u16;
    let payload = PayloadBuilder::new()
        .u16(1) // PCM
        .u16(1) // mono
        .u32(sample_rate)
        .u32(sample_rate * block_align as u32)
        .u16(block_align)
        .u16(format.bits())
        .finish();
    Chunk::new(*b"fmt ", payload)
}

fn data_chunk(samples: &[f32], format: SampleFormat) -> Chunk {
    let mut payload = Vec::with_capacity(samples.len() * format.bytes_per_sample());
    for &sample in samples {
        let value = quantize(sample, format);
        match format {
            SampleFormat::Pcm16 => payload.extend_from_slice(&(value as i16).to_le_bytes()),
            SampleFormat::Pcm24 => payload.extend_from_slice(&value.to_le_bytes()[..3]),
        }
    }
    Chunk::new(*b"data", payload)
}

/// Encode a buffer as a complete WAV file in memory
pub fn encode_wav(buffer: &AudioBuffer, options: &ExportOptions) -> Result<Vec<u8>> {
    let mut chunks = vec![
        fmt_chunk(buffer.sample_rate(), options.format),
        data_chunk(buffer.samples(), options.format),
    ];
    if let Some(metadata) = &options.metadata {
        if let Some(sample_loop) = metadata.sample_loop {
            sample_loop.validate(buffer.len())?;
        }
        chunks.push(metadata.smpl_chunk(buffer.sample_rate()));
        if options.include_inst {
            chunks.push(metadata.inst_chunk());
        }
    }
    riff_wave(&chunks)
}

/// Hex SHA-256 of a byte slice
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

// ============================================================================
// Per-path locking
// ============================================================================

type PathLocks = Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>;

static EXPORT_LOCKS: OnceLock<PathLocks> = OnceLock::new();

fn path_lock(path: &Path) -> Arc<Mutex<()>> {
    let locks = EXPORT_LOCKS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut locks = locks.lock().unwrap_or_else(|e| e.into_inner());
    locks
        .entry(path.to_path_buf())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

/// Forget the lock for `path` once no other export holds it
fn release_path_lock(path: &Path, lock: Arc<Mutex<()>>) {
    let Some(locks) = EXPORT_LOCKS.get() else {
        return;
    };
    let mut locks = locks.lock().unwrap_or_else(|e| e.into_inner());
    // One reference in the map, one here
    if Arc::strong_count(&lock) == 2 {
        locks.remove(path);
    }
}

// ============================================================================
// Export
// ============================================================================

/// Write `buffer` to `path` as WAV
///
/// # Arguments
/// * `buffer` - Audio to write (expected in [-1, 1]; values beyond are clipped
///   by quantization only)
/// * `options` - Bit depth and sampler metadata
/// * `path` - Destination file; replaced if it exists
///
/// # Errors
/// * `InvalidParameter` - If the loop does not fit the audio
/// * `ExportFailed` - If the file could not be written; the destination is
///   left untouched
pub fn export_wav(buffer: &AudioBuffer, options: &ExportOptions, path: &Path) -> Result<ExportReport> {
    let bytes = encode_wav(buffer, options)?;
    let sha256 = sha256_hex(&bytes);

    let failed = |source: std::io::Error| EnforcerError::ExportFailed {
        path: path.to_path_buf(),
        source,
    };

    let lock = path_lock(path);
    let written = {
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        write_atomically(&bytes, path)
    };
    release_path_lock(path, lock);
    written.map_err(failed)?;

    info!(
        "Exported {} ({} bytes, {}-bit)",
        path.display(),
        bytes.len(),
        options.format.bits()
    );

    Ok(ExportReport {
        path: path.to_path_buf(),
        bytes_written: bytes.len() as u64,
        sha256,
    })
}

/// Stage `bytes` next to `path` and rename them into place
fn write_atomically(bytes: &[u8], path: &Path) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut staged = NamedTempFile::new_in(dir)?;
    staged.write_all(bytes)?;
    staged.as_file().sync_all()?;
    debug!("Staged {} bytes at {}", bytes.len(), staged.path().display());
    staged.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::note::TargetNote;
    use crate::engine::io::generate_test_tone;
    use crate::export::riff::parse_chunks;
    use pretty_assertions::assert_eq;

    fn chunk_ids(bytes: &[u8]) -> Vec<[u8; 4]> {
        parse_chunks(bytes)
            .unwrap()
            .iter()
            .map(|c| *c.id())
            .collect()
    }

    #[test]
    fn test_plain_layout() {
        let buffer = AudioBuffer::new(vec![0.0, 0.5, -0.5], 8000).unwrap();
        let bytes = encode_wav(&buffer, &ExportOptions::default()).unwrap();

        assert_eq!(chunk_ids(&bytes), vec![*b"fmt ", *b"data"]);
        // 12 header + 24 fmt + 8 data header + 6 payload
        assert_eq!(bytes.len(), 50);
        assert_eq!(&bytes[4..8], &42u32.to_le_bytes());
        assert_eq!(
            &bytes[20..36],
            &[1, 0, 1, 0, 0x40, 0x1F, 0, 0, 0x80, 0x3E, 0, 0, 2, 0, 16, 0]
        );
    }

    #[test]
    fn test_24_bit_odd_payload_is_padded() {
        let buffer = AudioBuffer::new(vec![1.0], 44100).unwrap();
        let options = ExportOptions {
            format: SampleFormat::Pcm24,
            ..ExportOptions::default()
        };
        let bytes = encode_wav(&buffer, &options).unwrap();

        // data size field is 3, followed by 0x7FFFFF and a pad byte
        assert_eq!(&bytes[40..44], &3u32.to_le_bytes());
        assert_eq!(&bytes[44..48], &[0xFF, 0xFF, 0x7F, 0]);
        assert_eq!(bytes.len(), 48);
        assert_eq!(&bytes[4..8], &40u32.to_le_bytes());
    }

    #[test]
    fn test_quantize_clips_out_of_range() {
        assert_eq!(quantize(2.0, SampleFormat::Pcm16), 32767);
        assert_eq!(quantize(-2.0, SampleFormat::Pcm16), -32768);
        assert_eq!(quantize(-1.0, SampleFormat::Pcm24), -8_388_607);
    }

    #[test]
    fn test_metadata_chunks_follow_data() {
        let buffer = generate_test_tone(440.0, 0.05, 44100);
        let note = TargetNote::parse("A4").unwrap();
        let mut options = ExportOptions {
            metadata: Some(SamplerMetadata::for_target(note, 440.0)),
            ..ExportOptions::default()
        };

        let bytes = encode_wav(&buffer, &options).unwrap();
        assert_eq!(chunk_ids(&bytes), vec![*b"fmt ", *b"data", *b"smpl", *b"inst"]);

        options.include_inst = false;
        let bytes = encode_wav(&buffer, &options).unwrap();
        assert_eq!(chunk_ids(&bytes), vec![*b"fmt ", *b"data", *b"smpl"]);
    }

    #[test]
    fn test_sample_format_from_bits() {
        assert_eq!(SampleFormat::from_bits(24).unwrap(), SampleFormat::Pcm24);
        assert!(SampleFormat::from_bits(8).is_err());
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_export_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let buffer = generate_test_tone(440.0, 0.1, 22050);

        let report = export_wav(&buffer, &ExportOptions::default(), &path).unwrap();
        let written = std::fs::read(&path).unwrap();
        assert_eq!(report.bytes_written, written.len() as u64);
        assert_eq!(report.sha256, sha256_hex(&written));
        // no stray temp files
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    fn is_tracked(path: &Path) -> bool {
        EXPORT_LOCKS
            .get()
            .map(|locks| locks.lock().unwrap().contains_key(path))
            .unwrap_or(false)
    }

    #[test]
    fn test_path_lock_is_released_after_export() {
        let dir = tempfile::tempdir().unwrap();
        let tone = generate_test_tone(330.0, 0.05, 8000);

        let written = dir.path().join("released.wav");
        export_wav(&tone, &ExportOptions::default(), &written).unwrap();
        assert!(!is_tracked(&written));

        let failed = dir.path().join("missing").join("released.wav");
        assert!(export_wav(&tone, &ExportOptions::default(), &failed).is_err());
        assert!(!is_tracked(&failed));
    }

    #[test]
    fn test_held_path_lock_survives_release() {
        let path = Path::new("held-lock-test.wav");
        let first = path_lock(path);
        let second = path_lock(path);
        assert!(Arc::ptr_eq(&first, &second));

        release_path_lock(path, first);
        assert!(is_tracked(path));
        release_path_lock(path, second);
        assert!(!is_tracked(path));
    }
}

//! Export Tests
//!
//! File-level tests for the WAV exporter: byte layout, read-back through
//! hound, atomic replacement and concurrent writers.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use freqenforcer::analysis::TargetNote;
use freqenforcer::engine::{generate_test_tone, import_audio, AudioBuffer};
use freqenforcer::export::{
    encode_wav, export_wav, parse_chunks, ExportOptions, SampleFormat, SampleLoop, SamplerMetadata,
};
use pretty_assertions::assert_eq;

fn a4_metadata() -> SamplerMetadata {
    SamplerMetadata::for_target(TargetNote::parse("A4").unwrap(), 440.0)
}

#[test]
fn test_full_byte_layout_with_metadata() {
    let buffer = AudioBuffer::new(vec![0.0, 1.0], 44100).unwrap();
    let options = ExportOptions {
        metadata: Some(a4_metadata()),
        ..ExportOptions::default()
    };
    let bytes = encode_wav(&buffer, &options).unwrap();

    // header 12 + fmt 24 + data 12 + smpl 44 + inst 16 (7 bytes + pad)
    assert_eq!(bytes.len(), 108);
    assert_eq!(&bytes[0..4], b"RIFF");
    assert_eq!(&bytes[4..8], &100u32.to_le_bytes());

    let data = &bytes[36..48];
    assert_eq!(data, &[b'd', b'a', b't', b'a', 4, 0, 0, 0, 0, 0, 0xFF, 0x7F]);

    let smpl_header = &bytes[48..56];
    assert_eq!(smpl_header, &[b's', b'm', b'p', b'l', 36, 0, 0, 0]);

    let inst = &bytes[92..108];
    assert_eq!(
        inst,
        &[b'i', b'n', b's', b't', 7, 0, 0, 0, 69, 0, 0, 0, 127, 1, 127, 0]
    );
}

#[test]
fn test_hound_reads_exported_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tone.wav");
    let tone = generate_test_tone(440.0, 0.25, 48000);
    let options = ExportOptions {
        metadata: Some(a4_metadata().with_loop(SampleLoop { start: 0, end: 1000 })),
        ..ExportOptions::default()
    };

    export_wav(&tone, &options, &path).unwrap();

    let reader = hound::WavReader::open(&path).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.sample_rate, 48000);
    assert_eq!(spec.bits_per_sample, 16);
    assert_eq!(reader.len() as usize, tone.len());

    let reread = import_audio(&path).unwrap();
    for (a, b) in tone.samples().iter().zip(reread.samples()) {
        assert!((a - b).abs() < 1e-4);
    }
}

#[test]
fn test_24_bit_payload_decodes() {
    let buffer = AudioBuffer::new(vec![0.5, -0.5, 0.25], 96000).unwrap();
    let options = ExportOptions {
        format: SampleFormat::Pcm24,
        ..ExportOptions::default()
    };
    let bytes = encode_wav(&buffer, &options).unwrap();
    let chunks = parse_chunks(&bytes).unwrap();

    let fmt = chunks.iter().find(|c| c.id() == b"fmt ").unwrap();
    assert_eq!(&fmt.payload()[12..16], &[3, 0, 24, 0]);

    let data = chunks.iter().find(|c| c.id() == b"data").unwrap();
    let decoded: Vec<f32> = data
        .payload()
        .chunks_exact(3)
        .map(|b| (i32::from_le_bytes([0, b[0], b[1], b[2]]) >> 8) as f32 / 8_388_607.0)
        .collect();
    for (a, b) in buffer.samples().iter().zip(&decoded) {
        assert!((a - b).abs() < 1e-6);
    }
}

#[test]
fn test_failed_export_leaves_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let tone = generate_test_tone(440.0, 0.1, 44100);

    let missing_dir = dir.path().join("missing").join("out.wav");
    let err = export_wav(&tone, &ExportOptions::default(), &missing_dir).unwrap_err();
    assert_eq!(err.error_code(), "EXPORT_FAILED");
    assert!(!missing_dir.exists());

    // A directory in the way makes the final rename fail
    let blocked = dir.path().join("blocked.wav");
    std::fs::create_dir(&blocked).unwrap();
    std::fs::write(blocked.join("keep"), b"x").unwrap();
    let err = export_wav(&tone, &ExportOptions::default(), &blocked).unwrap_err();
    assert_eq!(err.error_code(), "EXPORT_FAILED");

    let entries: Vec<PathBuf> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(entries, vec![blocked]);
}

#[test]
fn test_export_replaces_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.wav");
    std::fs::write(&path, b"old contents").unwrap();

    let tone = generate_test_tone(440.0, 0.1, 44100);
    let report = export_wav(&tone, &ExportOptions::default(), &path).unwrap();

    assert_eq!(std::fs::metadata(&path).unwrap().len(), report.bytes_written);
}

#[test]
fn test_concurrent_exports_to_same_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = Arc::new(dir.path().join("shared.wav"));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let path = Arc::clone(&path);
            thread::spawn(move || {
                let tone = generate_test_tone(200.0 + 50.0 * i as f32, 0.2, 44100);
                export_wav(&tone, &ExportOptions::default(), &path).unwrap()
            })
        })
        .collect();
    let reports: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let bytes = std::fs::read(path.as_ref()).unwrap();
    let digest = freqenforcer::export::wav::sha256_hex(&bytes);
    assert!(reports.iter().any(|r| r.sha256 == digest));
    assert!(parse_chunks(&bytes).is_ok());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

//! Pipeline Benchmarks
//!
//! Performance benchmarks for the analysis and correction stages.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use freqenforcer::analysis::{PitchDetector, TargetNote};
use freqenforcer::config::EngineConfig;
use freqenforcer::dsp::{
    CleanlinessParams, MaskBuilder, PhaseVocoderKernel, ShiftKernel, WsolaKernel,
};
use freqenforcer::engine::generate_harmonic_tone;
use freqenforcer::{Pipeline, ProcessingParams};

fn benchmark_pitch_detection(c: &mut Criterion) {
    let buffer = generate_harmonic_tone(196.0, &[1.0, 0.5, 0.25], 2.0, 44100);
    let detector = PitchDetector::default();

    c.bench_function("yin_detect_2s", |b| {
        b.iter(|| detector.detect(black_box(&buffer)))
    });
}

fn benchmark_mask(c: &mut Criterion) {
    let buffer = generate_harmonic_tone(196.0, &[1.0, 0.5, 0.25], 2.0, 44100);
    let track = PitchDetector::default().track(&buffer);
    let builder = MaskBuilder::new(EngineConfig::default().mask).unwrap();

    c.bench_function("harmonic_mask_apply_2s", |b| {
        b.iter(|| builder.apply(black_box(&buffer), &track, 0.8).unwrap())
    });
}

fn benchmark_phase_vocoder(c: &mut Criterion) {
    let buffer = generate_harmonic_tone(196.0, &[1.0, 0.5, 0.25], 2.0, 44100);
    let kernel = PhaseVocoderKernel::default();

    c.bench_function("phase_vocoder_up_fifth_2s", |b| {
        b.iter(|| kernel.shift(black_box(&buffer), 1.5, 1.0).unwrap())
    });
}

fn benchmark_wsola(c: &mut Criterion) {
    let buffer = generate_harmonic_tone(196.0, &[1.0, 0.5, 0.25], 2.0, 44100);
    let kernel = WsolaKernel::default();

    c.bench_function("wsola_up_fifth_2s", |b| {
        b.iter(|| kernel.shift(black_box(&buffer), 1.5, 1.0).unwrap())
    });
}

fn benchmark_full_pipeline(c: &mut Criterion) {
    let buffer = generate_harmonic_tone(196.0, &[1.0, 0.5, 0.25], 2.0, 44100);
    let pipeline = Pipeline::new(EngineConfig::default()).unwrap();
    let params = ProcessingParams::new(TargetNote::parse("A3").unwrap())
        .with_cleanliness(CleanlinessParams::auto(0.6));

    c.bench_function("pipeline_run_2s", |b| {
        b.iter(|| pipeline.run(black_box(&buffer), &params).unwrap())
    });
}

criterion_group!(
    benches,
    benchmark_pitch_detection,
    benchmark_mask,
    benchmark_phase_vocoder,
    benchmark_wsola,
    benchmark_full_pipeline
);
criterion_main!(benches);

//! Sampler metadata (`smpl` / `inst` chunks)
//!
//! The root note always comes from the target note, never from the pitch
//! that was detected in the input, and is expressed against standard
//! A4 = 440 Hz MIDI tuning so samplers read it correctly.

use serde::{Deserialize, Serialize};

use crate::analysis::note::{nearest_note, TargetNote, A4_HZ};
use crate::error::{EnforcerError, Result};
use crate::export::riff::{Chunk, PayloadBuilder};

/// Cent deviations smaller than this are written as exactly zero
const CENTS_EPSILON: f32 = 0.01;

/// 2^32, the full scale of the smpl pitch fraction
const FRACTION_SCALE: f64 = 4_294_967_296.0;

/// Forward loop over a sample range (inclusive end, in samples)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleLoop {
    pub start: u32,
    pub end: u32,
}

impl SampleLoop {
    /// Check the loop against the length of the audio it belongs to
    pub fn validate(&self, num_samples: usize) -> Result<()> {
        if self.start >= self.end {
            return Err(EnforcerError::invalid_parameter(
                "loop_start",
                self.start,
                "a start before the loop end",
            ));
        }
        if self.end as usize >= num_samples {
            return Err(EnforcerError::invalid_parameter(
                "loop_end",
                self.end,
                "an end inside the audio",
            ));
        }
        Ok(())
    }
}

/// Root note and loop information embedded in the exported WAV
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplerMetadata {
    pub root_note_midi: u8,
    /// Signed deviation from the root note, in [-50, 50)
    pub pitch_fraction_cents: f32,
    pub sample_loop: Option<SampleLoop>,
}

impl SamplerMetadata {
    /// Metadata for audio tuned to `note` under the given A4 reference
    pub fn for_target(note: TargetNote, a4_hz: f32) -> Self {
        let frequency = note.frequency_hz(a4_hz);
        let (root, cents) = nearest_note(frequency, A4_HZ).unwrap_or((note.midi(), 0.0));
        // Nothing sits below MIDI 0, so a flat lowest note is stored as in tune
        let cents = if cents.abs() < CENTS_EPSILON || (root == 0 && cents < 0.0) {
            0.0
        } else {
            cents
        };
        Self {
            root_note_midi: root,
            pitch_fraction_cents: cents,
            sample_loop: None,
        }
    }

    pub fn with_loop(mut self, sample_loop: SampleLoop) -> Self {
        self.sample_loop = Some(sample_loop);
        self
    }

    /// Unity note and unsigned fraction as the smpl chunk stores them
    ///
    /// smpl only represents upward fractions, so a flat deviation moves the
    /// unity note down one semitone. A flat deviation on MIDI note 0 has no
    /// note to move to and is written with a zero fraction;
    /// [`for_target`](Self::for_target) never produces one.
    pub fn smpl_unity(&self) -> (u32, u32) {
        let cents = self.pitch_fraction_cents as f64;
        let (note, cents) = if cents < 0.0 && self.root_note_midi > 0 {
            (self.root_note_midi as u32 - 1, cents + 100.0)
        } else {
            (self.root_note_midi as u32, cents.max(0.0))
        };
        let fraction = (cents / 100.0 * FRACTION_SCALE)
            .round()
            .clamp(0.0, u32::MAX as f64) as u32;
        (note, fraction)
    }

    /// Detune a sampler applies when playing the root note, in cents
    pub fn inst_fine_tune(&self) -> i8 {
        (-self.pitch_fraction_cents).round().clamp(-50.0, 50.0) as i8
    }

    /// Build the `smpl` chunk
    pub fn smpl_chunk(&self, sample_rate: u32) -> Chunk {
        let (unity_note, fraction) = self.smpl_unity();
        let sample_period = (1e9 / sample_rate.max(1) as f64).round() as u32;
        let loop_count = u32::from(self.sample_loop.is_some());

        let mut payload = PayloadBuilder::new()
            .u32(0) // manufacturer
            .u32(0) // product
            .u32(sample_period)
            .u32(unity_note)
            .u32(fraction)
            .u32(0) // SMPTE format
            .u32(0) // SMPTE offset
            .u32(loop_count)
            .u32(0); // sampler data

        if let Some(sample_loop) = self.sample_loop {
            payload = payload
                .u32(0) // cue point id
                .u32(0) // forward loop
                .u32(sample_loop.start)
                .u32(sample_loop.end)
                .u32(0) // fraction
                .u32(0); // play forever
        }

        Chunk::new(*b"smpl", payload.finish())
    }

    /// Build the `inst` chunk (7 bytes, padded on write)
    pub fn inst_chunk(&self) -> Chunk {
        let payload = PayloadBuilder::new()
            .u8(self.root_note_midi)
            .i8(self.inst_fine_tune())
            .i8(0) // gain
            .u8(0) // low note
            .u8(127) // high note
            .u8(1) // low velocity
            .u8(127) // high velocity
            .finish();
        Chunk::new(*b"inst", payload)
    }

    /// Read metadata back from a `smpl` payload
    pub fn from_smpl(payload: &[u8]) -> Result<Self> {
        let invalid = |reason: &str| EnforcerError::InvalidAudio {
            reason: reason.to_string(),
            source: None,
        };
        let field = |index: usize| -> Result<u32> {
            payload
                .get(index * 4..index * 4 + 4)
                .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .ok_or_else(|| invalid("truncated smpl chunk"))
        };

        let unity_note = field(3)?;
        let fraction = field(4)?;
        let loop_count = field(7)?;
        if unity_note > 127 {
            return Err(invalid("smpl unity note outside the MIDI range"));
        }

        let mut cents = fraction as f64 / FRACTION_SCALE * 100.0;
        let mut root = unity_note as u8;
        if cents >= 50.0 && root < 127 {
            root += 1;
            cents -= 100.0;
        }

        let sample_loop = if loop_count > 0 {
            Some(SampleLoop {
                start: field(9 + 2)?,
                end: field(9 + 3)?,
            })
        } else {
            None
        };

        Ok(Self {
            root_note_midi: root,
            pitch_fraction_cents: cents as f32,
            sample_loop,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;

    fn a4() -> TargetNote {
        TargetNote::parse("A4").unwrap()
    }

    #[test]
    fn test_a4_has_no_fraction() {
        let meta = SamplerMetadata::for_target(a4(), 440.0);
        assert_eq!(meta.root_note_midi, 69);
        assert_eq!(meta.pitch_fraction_cents, 0.0);
        assert_eq!(meta.smpl_unity(), (69, 0));
        assert_eq!(meta.inst_fine_tune(), 0);
    }

    #[test]
    fn test_root_follows_target_not_input() {
        let c3 = TargetNote::parse("C3").unwrap();
        let meta = SamplerMetadata::for_target(c3, 440.0);
        assert_eq!(meta.root_note_midi, 48);
    }

    #[test]
    fn test_alternate_tuning_is_expressed_as_fraction() {
        // A4 at 432 Hz is about 31.8 cents flat of standard A4
        let meta = SamplerMetadata::for_target(a4(), 432.0);
        assert_eq!(meta.root_note_midi, 69);
        assert_relative_eq!(meta.pitch_fraction_cents, -31.77, epsilon = 0.01);

        let (unity, fraction) = meta.smpl_unity();
        assert_eq!(unity, 68);
        let cents = fraction as f64 / FRACTION_SCALE * 100.0;
        assert_relative_eq!(cents, 68.23, epsilon = 0.01);
        assert_eq!(meta.inst_fine_tune(), 32);
    }

    #[test]
    fn test_flat_lowest_note_is_written_in_tune() {
        let lowest = TargetNote::from_midi(0).unwrap();
        let meta = SamplerMetadata::for_target(lowest, 432.0);
        assert_eq!(meta.root_note_midi, 0);
        assert_eq!(meta.pitch_fraction_cents, 0.0);
        assert_eq!(meta.smpl_unity(), (0, 0));
        assert_eq!(meta.inst_fine_tune(), 0);

        let (root, fraction) = SamplerMetadata::from_smpl(meta.smpl_chunk(44100).payload())
            .map(|m| (m.root_note_midi, m.pitch_fraction_cents))
            .unwrap();
        assert_eq!((root, fraction), (0, 0.0));
    }

    #[test]
    fn test_smpl_layout_without_loop() {
        let chunk = SamplerMetadata::for_target(a4(), 440.0).smpl_chunk(44100);
        assert_eq!(chunk.id(), b"smpl");
        assert_eq!(chunk.payload().len(), 36);
        // sample period: round(1e9 / 44100) = 22676 ns
        assert_eq!(&chunk.payload()[8..12], &22676u32.to_le_bytes());
        assert_eq!(&chunk.payload()[12..16], &69u32.to_le_bytes());
        assert_eq!(&chunk.payload()[28..32], &0u32.to_le_bytes());
    }

    #[test]
    fn test_smpl_layout_with_loop() {
        let meta = SamplerMetadata::for_target(a4(), 440.0).with_loop(SampleLoop {
            start: 100,
            end: 2000,
        });
        let chunk = meta.smpl_chunk(48000);
        assert_eq!(chunk.payload().len(), 60);
        assert_eq!(&chunk.payload()[28..32], &1u32.to_le_bytes());
        assert_eq!(&chunk.payload()[44..48], &100u32.to_le_bytes());
        assert_eq!(&chunk.payload()[48..52], &2000u32.to_le_bytes());

        let parsed = SamplerMetadata::from_smpl(chunk.payload()).unwrap();
        assert_eq!(parsed.root_note_midi, 69);
        assert_eq!(parsed.sample_loop, meta.sample_loop);
    }

    #[test]
    fn test_inst_layout() {
        let chunk = SamplerMetadata::for_target(a4(), 440.0).inst_chunk();
        assert_eq!(chunk.id(), b"inst");
        assert_eq!(chunk.payload(), &[69, 0, 0, 0, 127, 1, 127]);
    }

    #[test]
    fn test_from_smpl_recovers_flat_root() {
        let meta = SamplerMetadata::for_target(a4(), 432.0);
        let parsed = SamplerMetadata::from_smpl(meta.smpl_chunk(44100).payload()).unwrap();
        assert_eq!(parsed.root_note_midi, 69);
        assert_relative_eq!(parsed.pitch_fraction_cents, -31.77, epsilon = 0.01);
        assert!(SamplerMetadata::from_smpl(&[0; 12]).is_err());
    }

    #[test]
    fn test_loop_validation() {
        assert!(SampleLoop { start: 0, end: 99 }.validate(100).is_ok());
        assert!(SampleLoop { start: 10, end: 10 }.validate(100).is_err());
        assert!(SampleLoop { start: 0, end: 100 }.validate(100).is_err());
    }
}

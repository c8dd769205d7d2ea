//! Note names, MIDI numbers and frequencies
//!
//! Twelve-tone equal temperament around a configurable A4 reference.
//! Note names use sharps when printed; parsing accepts sharps and flats,
//! including enharmonics that cross an octave boundary (`B#3` is `C4`,
//! `Cb4` is `B3`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{EnforcerError, Result};

/// Default reference tuning (Hz)
pub const A4_HZ: f32 = 440.0;

/// MIDI number of A4
pub const A4_MIDI: f64 = 69.0;

/// Pitch-class names, sharps only
pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Convert a frequency to a fractional MIDI note number
pub fn frequency_to_midi(frequency_hz: f64, a4_hz: f64) -> f64 {
    A4_MIDI + 12.0 * (frequency_hz / a4_hz).log2()
}

/// Convert a (possibly fractional) MIDI note number to Hz
pub fn midi_to_frequency(midi: f64, a4_hz: f64) -> f64 {
    a4_hz * 2.0_f64.powf((midi - A4_MIDI) / 12.0)
}

/// Name a MIDI note, e.g. 69 -> "A4", 61 -> "C#4"
pub fn midi_to_note_name(midi: u8) -> String {
    let octave = midi as i32 / 12 - 1;
    format!("{}{}", NOTE_NAMES[(midi % 12) as usize], octave)
}

/// Nearest MIDI note to a frequency and the signed deviation from it in cents
///
/// Returns `None` for non-positive frequencies or ones that fall outside the
/// MIDI range.
pub fn nearest_note(frequency_hz: f32, a4_hz: f32) -> Option<(u8, f32)> {
    if !(frequency_hz.is_finite() && frequency_hz > 0.0) {
        return None;
    }
    let midi = frequency_to_midi(frequency_hz as f64, a4_hz as f64);
    let rounded = midi.round();
    if !(0.0..=127.0).contains(&rounded) {
        return None;
    }
    Some((rounded as u8, ((midi - rounded) * 100.0) as f32))
}

/// Distance between two pitches split into whole semitones and cents
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PitchDifference {
    /// Whole semitones, rounded half away from zero
    pub semitones: i32,
    /// Remainder in cents, within [-50, 50]
    pub cents: f32,
}

impl PitchDifference {
    /// Total distance in (fractional) semitones
    pub fn total_semitones(&self) -> f32 {
        self.semitones as f32 + self.cents / 100.0
    }
}

/// Interval needed to move `from_hz` onto `to_hz`
///
/// # Errors
/// * `InvalidParameter` - If either frequency is not a positive finite number
pub fn pitch_difference(from_hz: f32, to_hz: f32) -> Result<PitchDifference> {
    for (param, value) in [("from_hz", from_hz), ("to_hz", to_hz)] {
        if !(value.is_finite() && value > 0.0) {
            return Err(EnforcerError::invalid_parameter(
                param,
                value,
                "a positive frequency",
            ));
        }
    }

    let total = 12.0 * (to_hz as f64 / from_hz as f64).log2();
    let semitones = total.round();
    Ok(PitchDifference {
        semitones: semitones as i32,
        cents: ((total - semitones) * 100.0) as f32,
    })
}

// ============================================================================
// TargetNote
// ============================================================================

/// A note the pipeline corrects to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TargetNote {
    midi: u8,
}

impl TargetNote {
    /// Create from a MIDI note number (0-127)
    pub fn from_midi(midi: u8) -> Result<Self> {
        if midi > 127 {
            return Err(EnforcerError::invalid_parameter("midi", midi, "0..=127"));
        }
        Ok(Self { midi })
    }

    /// Parse a note name such as `A4`, `F#3`, `Db5` or `c -1`
    pub fn parse(name: &str) -> Result<Self> {
        let invalid = || EnforcerError::InvalidNote {
            name: name.to_string(),
        };

        let mut chars = name.trim().chars().peekable();
        let letter = chars.next().ok_or_else(invalid)?;
        let pitch_class: i32 = match letter.to_ascii_uppercase() {
            'C' => 0,
            'D' => 2,
            'E' => 4,
            'F' => 5,
            'G' => 7,
            'A' => 9,
            'B' => 11,
            _ => return Err(invalid()),
        };

        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        let accidental = match chars.peek() {
            Some('#') | Some('♯') => 1,
            Some('b') | Some('♭') => -1,
            _ => 0,
        };
        if accidental != 0 {
            chars.next();
        }

        let octave: i32 = chars
            .collect::<String>()
            .trim()
            .parse()
            .map_err(|_| invalid())?;

        let midi = (octave + 1) * 12 + pitch_class + accidental;
        if !(0..=127).contains(&midi) {
            return Err(invalid());
        }
        Ok(Self { midi: midi as u8 })
    }

    pub fn midi(&self) -> u8 {
        self.midi
    }

    /// Frequency under the given A4 reference
    pub fn frequency_hz(&self, a4_hz: f32) -> f32 {
        midi_to_frequency(self.midi as f64, a4_hz as f64) as f32
    }

    /// Canonical (sharp) name
    pub fn name(&self) -> String {
        midi_to_note_name(self.midi)
    }
}

impl fmt::Display for TargetNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for TargetNote {
    type Err = EnforcerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TargetNote {
    type Error = EnforcerError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<TargetNote> for String {
    fn from(note: TargetNote) -> String {
        note.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use test_case::test_case;

    #[test_case("A4", 69 ; "concert a")]
    #[test_case("C4", 60 ; "middle c")]
    #[test_case("F#3", 54 ; "sharp")]
    #[test_case("Db5", 73 ; "flat")]
    #[test_case("B#3", 60 ; "b sharp wraps up")]
    #[test_case("Cb4", 59 ; "c flat wraps down")]
    #[test_case("E#2", 41 ; "e sharp")]
    #[test_case("Fb2", 40 ; "f flat")]
    #[test_case(" a 4 ", 69 ; "lowercase with spaces")]
    #[test_case("C-1", 0 ; "lowest")]
    #[test_case("G9", 127 ; "highest")]
    fn test_parse(name: &str, midi: u8) {
        assert_eq!(TargetNote::parse(name).unwrap().midi(), midi);
    }

    #[test_case("" ; "empty")]
    #[test_case("H4" ; "bad letter")]
    #[test_case("A" ; "no octave")]
    #[test_case("A#x" ; "garbage octave")]
    #[test_case("G#9" ; "above range")]
    #[test_case("Cb-1" ; "below range")]
    fn test_parse_rejects(name: &str) {
        let err = TargetNote::parse(name).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_NOTE");
    }

    #[test]
    fn test_frequency_resolution_is_pure() {
        let a4 = TargetNote::parse("A4").unwrap();
        assert_eq!(a4.frequency_hz(440.0), 440.0);
        assert_eq!(a4.frequency_hz(440.0), a4.frequency_hz(440.0));
        assert_relative_eq!(a4.frequency_hz(432.0), 432.0, epsilon = 1e-3);

        let c4 = TargetNote::parse("C4").unwrap();
        assert_relative_eq!(c4.frequency_hz(440.0), 261.6256, epsilon = 1e-3);
    }

    #[test]
    fn test_names() {
        assert_eq!(midi_to_note_name(69), "A4");
        assert_eq!(midi_to_note_name(61), "C#4");
        assert_eq!(midi_to_note_name(0), "C-1");
        assert_eq!(TargetNote::parse("Db5").unwrap().to_string(), "C#5");
    }

    #[test]
    fn test_nearest_note_cents() {
        let (midi, cents) = nearest_note(445.0, 440.0).unwrap();
        assert_eq!(midi, 69);
        assert_relative_eq!(cents, 19.56, epsilon = 0.05);

        assert!(nearest_note(0.0, 440.0).is_none());
        assert!(nearest_note(f32::NAN, 440.0).is_none());
    }

    #[test]
    fn test_pitch_difference() {
        let diff = pitch_difference(220.0, 440.0).unwrap();
        assert_eq!(diff.semitones, 12);
        assert!(diff.cents.abs() < 1e-3);

        // 430 Hz -> 440 Hz is about +39.8 cents
        let diff = pitch_difference(430.0, 440.0).unwrap();
        assert_eq!(diff.semitones, 0);
        assert_relative_eq!(diff.cents, 39.8, epsilon = 0.1);

        // A quarter-tone and a bit down rounds to -1 semitone
        let diff = pitch_difference(440.0, 427.0).unwrap();
        assert_eq!(diff.semitones, -1);
        assert!(diff.cents > 0.0 && diff.cents <= 50.0);

        assert!(pitch_difference(0.0, 440.0).is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let note: TargetNote = serde_json::from_str("\"Bb3\"").unwrap();
        assert_eq!(note.midi(), 58);
        assert_eq!(serde_json::to_string(&note).unwrap(), "\"A#3\"");
    }
}

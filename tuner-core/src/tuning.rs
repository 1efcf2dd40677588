//! # Musical Tuning Module
//!
//! Equal temperament note mapping with A4 = 440 Hz.
//!
//! ## Features
//! - Frequency to nearest pitch class, octave and MIDI note number
//! - Signed cent deviation from the nearest note
//! - Note name parsing ("A4", "C#3", "Bb2") for a fixed target note
//! - Cent deviation against an arbitrary target frequency

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Reference tuning for A4, in Hz.
pub const A4_FREQUENCY: f32 = 440.0;

/// MIDI note number of A4.
pub const A4_MIDI: i32 = 69;

/// Cents either side of a note that a display shows.
pub const DISPLAY_CENTS_RANGE: i32 = 50;

/// MIDI note numbers a target note may have (C-1 to G9).
pub const MIDI_RANGE: std::ops::RangeInclusive<i32> = 0..=127;

/// The twelve octave-independent note names, starting at C.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PitchClass {
    #[serde(rename = "C")]
    C,
    #[serde(rename = "C#")]
    CSharp,
    #[serde(rename = "D")]
    D,
    #[serde(rename = "D#")]
    DSharp,
    #[serde(rename = "E")]
    E,
    #[serde(rename = "F")]
    F,
    #[serde(rename = "F#")]
    FSharp,
    #[serde(rename = "G")]
    G,
    #[serde(rename = "G#")]
    GSharp,
    #[serde(rename = "A")]
    A,
    #[serde(rename = "A#")]
    ASharp,
    #[serde(rename = "B")]
    B,
}

impl PitchClass {
    /// Chromatic table indexed by semitones above C.
    pub const ALL: [PitchClass; 12] = [
        PitchClass::C,
        PitchClass::CSharp,
        PitchClass::D,
        PitchClass::DSharp,
        PitchClass::E,
        PitchClass::F,
        PitchClass::FSharp,
        PitchClass::G,
        PitchClass::GSharp,
        PitchClass::A,
        PitchClass::ASharp,
        PitchClass::B,
    ];

    /// Pitch class of a (possibly negative) note number. Uses a true modulo.
    pub fn from_note_number(note_number: i32) -> Self {
        Self::ALL[note_number.rem_euclid(12) as usize]
    }

    /// Semitones above C, `0..12`.
    pub fn index(self) -> i32 {
        self as i32
    }

    pub fn name(self) -> &'static str {
        match self {
            PitchClass::C => "C",
            PitchClass::CSharp => "C#",
            PitchClass::D => "D",
            PitchClass::DSharp => "D#",
            PitchClass::E => "E",
            PitchClass::F => "F",
            PitchClass::FSharp => "F#",
            PitchClass::G => "G",
            PitchClass::GSharp => "G#",
            PitchClass::A => "A",
            PitchClass::ASharp => "A#",
            PitchClass::B => "B",
        }
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A concrete note: pitch class plus scientific octave (A4 = 440 Hz).
///
/// Parsed and deserialized notes are limited to [`MIDI_RANGE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawNote")]
pub struct Note {
    pub pitch_class: PitchClass,
    pub octave: i32,
}

impl Note {
    pub fn from_midi(note_number: i32) -> Self {
        Self {
            pitch_class: PitchClass::from_note_number(note_number),
            octave: note_number.div_euclid(12) - 1,
        }
    }

    pub fn midi_number(&self) -> i32 {
        self.octave
            .saturating_add(1)
            .saturating_mul(12)
            .saturating_add(self.pitch_class.index())
    }

    /// Equal temperament frequency of this note.
    pub fn frequency(&self) -> f32 {
        midi_to_frequency(self.midi_number())
    }
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.pitch_class, self.octave)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseNoteError {
    #[error("invalid note name: {0:?}")]
    InvalidName(String),

    #[error("note {0:?} is outside MIDI notes 0..=127")]
    OutOfRange(String),
}

/// Unchecked form of [`Note`] as it appears in config files.
#[derive(Deserialize)]
struct RawNote {
    pitch_class: PitchClass,
    octave: i32,
}

impl TryFrom<RawNote> for Note {
    type Error = ParseNoteError;

    fn try_from(raw: RawNote) -> Result<Self, Self::Error> {
        let note = Note {
            pitch_class: raw.pitch_class,
            octave: raw.octave,
        };
        if MIDI_RANGE.contains(&note.midi_number()) {
            Ok(note)
        } else {
            Err(ParseNoteError::OutOfRange(note.to_string()))
        }
    }
}

impl FromStr for Note {
    type Err = ParseNoteError;

    /// Parses names like "A4", "C#3", "Bb2" or "e-1".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseNoteError::InvalidName(s.to_string());
        let mut chars = s.trim().chars();

        let base = match chars.next().map(|c| c.to_ascii_uppercase()) {
            Some('C') => 0,
            Some('D') => 2,
            Some('E') => 4,
            Some('F') => 5,
            Some('G') => 7,
            Some('A') => 9,
            Some('B') => 11,
            _ => return Err(err()),
        };

        let rest = chars.as_str();
        let (accidental, octave_str) = if let Some(r) = rest.strip_prefix('#') {
            (1, r)
        } else if let Some(r) = rest.strip_prefix('b') {
            (-1, r)
        } else {
            (0, rest)
        };

        let octave: i32 = octave_str.parse().map_err(|_| err())?;
        // B#4 is C5 and Cb4 is B3, so go through the note number.
        let midi = octave
            .checked_add(1)
            .and_then(|o| o.checked_mul(12))
            .and_then(|n| n.checked_add(base + accidental))
            .filter(|n| MIDI_RANGE.contains(n))
            .ok_or_else(|| ParseNoteError::OutOfRange(s.to_string()))?;
        Ok(Note::from_midi(midi))
    }
}

/// One published tuner reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteReading {
    /// Nearest pitch class.
    pub pitch_class: PitchClass,
    /// Scientific octave of the nearest note.
    pub octave: i32,
    /// MIDI note number of the nearest note.
    pub midi_note: i32,
    /// The detected frequency in Hz.
    pub frequency_hz: f32,
    /// Exact equal temperament frequency of the note compared against.
    pub reference_hz: f32,
    /// Signed, unclamped deviation in whole cents: negative is flat.
    pub cents: i32,
}

impl NoteReading {
    pub fn note(&self) -> Note {
        Note {
            pitch_class: self.pitch_class,
            octave: self.octave,
        }
    }

    /// Cents clamped to the display range.
    pub fn display_cents(&self) -> i32 {
        self.cents.clamp(-DISPLAY_CENTS_RANGE, DISPLAY_CENTS_RANGE)
    }
}

/// Continuous MIDI note number of a frequency.
pub fn frequency_to_note_number(freq: f32) -> f32 {
    12.0 * (freq / A4_FREQUENCY).log2() + A4_MIDI as f32
}

/// Equal temperament frequency of a MIDI note number.
pub fn midi_to_frequency(note_number: i32) -> f32 {
    A4_FREQUENCY * 2.0_f32.powf((note_number - A4_MIDI) as f32 / 12.0)
}

/// Calculates the deviation from a target frequency in cents.
///
/// - 100 cents = 1 semitone
/// - 1200 cents = 1 octave
/// - Positive values indicate sharpness, negative values indicate flatness
pub fn cents_between(freq: f32, target_freq: f32) -> f32 {
    1200.0 * (freq / target_freq).log2()
}

/// Maps a detected frequency to the nearest equal tempered note.
///
/// `freq` must be positive and finite; detected pitches always are.
pub fn map_frequency(freq: f32) -> NoteReading {
    let nearest = frequency_to_note_number(freq).round() as i32;
    reading_against(freq, nearest)
}

/// Maps a detected frequency against a fixed target note instead of the
/// nearest one. Cents may then run well past a semitone.
pub fn map_against(freq: f32, target: Note) -> NoteReading {
    reading_against(freq, target.midi_number())
}

fn reading_against(freq: f32, midi_note: i32) -> NoteReading {
    let note = Note::from_midi(midi_note);
    let reference_hz = midi_to_frequency(midi_note);
    NoteReading {
        pitch_class: note.pitch_class,
        octave: note.octave,
        midi_note,
        frequency_hz: freq,
        reference_hz,
        cents: cents_between(freq, reference_hz).floor() as i32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_a440_is_exact() {
        let reading = map_frequency(440.0);
        assert_eq!(reading.pitch_class, PitchClass::A);
        assert_eq!(reading.octave, 4);
        assert_eq!(reading.midi_note, 69);
        assert_eq!(reading.cents, 0);
    }

    #[test]
    fn test_octave_equivalence() {
        let low = map_frequency(440.0);
        let high = map_frequency(880.0);
        assert_eq!(low.pitch_class, PitchClass::A);
        assert_eq!(high.pitch_class, PitchClass::A);
        assert_eq!(high.octave, 5);
        assert_eq!(low.cents, 0);
        assert_eq!(high.cents, 0);
    }

    #[test]
    fn test_cents_sign_follows_detuning() {
        assert!(map_frequency(441.0).cents > 0);
        assert!(map_frequency(439.0).cents < 0);

        let c4 = Note::from_str("C4").unwrap().frequency();
        assert!(map_frequency(c4 * 1.003).cents > 0);
        assert!(map_frequency(c4 * 0.997).cents < 0);
    }

    #[test]
    fn test_cents_are_floored() {
        // 441 Hz is ~3.93 cents sharp of A4.
        assert_eq!(map_frequency(441.0).cents, 3);
        // 439 Hz is ~-3.94 cents.
        assert_eq!(map_frequency(439.0).cents, -4);
    }

    #[test]
    fn test_total_over_audible_range() {
        let mut freq = 0.01_f32;
        while freq <= 20000.0 {
            let reading = map_frequency(freq);
            assert!(PitchClass::ALL.contains(&reading.pitch_class));
            assert!(
                reading.cents > -600 && reading.cents <= 600,
                "{} Hz gave {} cents",
                freq,
                reading.cents
            );
            assert!(reading.cents.abs() <= 51, "{} Hz gave {} cents", freq, reading.cents);
            freq *= 1.0123;
        }
        let top = map_frequency(20000.0);
        assert!(top.cents > -600 && top.cents <= 600);
    }

    #[test]
    fn test_sub_audible_uses_true_modulo() {
        // Well below MIDI note 0, so the rounded note number is negative.
        let reading = map_frequency(2.0);
        assert!(reading.midi_note < 0);
        let expected = Note::from_midi(reading.midi_note);
        assert_eq!(reading.pitch_class, expected.pitch_class);
        assert_eq!(
            reading.pitch_class,
            PitchClass::ALL[reading.midi_note.rem_euclid(12) as usize]
        );
    }

    #[test]
    fn test_mapping_is_idempotent() {
        for &freq in &[27.5, 261.63, 1046.5, 4186.0] {
            assert_eq!(map_frequency(freq), map_frequency(freq));
            let reading = map_frequency(freq);
            assert_eq!(map_frequency(reading.reference_hz).cents, 0);
        }
    }

    #[test]
    fn test_display_cents_clamped() {
        let target: Note = "A4".parse().unwrap();
        let reading = map_against(466.16, target);
        assert!(reading.cents > 90);
        assert_eq!(reading.display_cents(), DISPLAY_CENTS_RANGE);
        assert_eq!(reading.pitch_class, PitchClass::A);
    }

    #[test]
    fn test_parse_note_names() {
        assert_eq!("A4".parse::<Note>().unwrap().midi_number(), 69);
        assert_eq!("C4".parse::<Note>().unwrap().midi_number(), 60);
        assert_eq!("C#3".parse::<Note>().unwrap().to_string(), "C#3");
        assert_eq!("Bb2".parse::<Note>().unwrap().to_string(), "A#2");
        assert_eq!("B#4".parse::<Note>().unwrap().to_string(), "C5");
        assert_eq!("c-1".parse::<Note>().unwrap().midi_number(), 0);
        assert!("H2".parse::<Note>().is_err());
        assert!("A".parse::<Note>().is_err());
        assert!("".parse::<Note>().is_err());
    }

    #[test]
    fn test_parse_rejects_notes_outside_midi_range() {
        assert_eq!("G9".parse::<Note>().unwrap().midi_number(), 127);
        assert!(matches!("G#9".parse::<Note>(), Err(ParseNoteError::OutOfRange(_))));
        assert!(matches!("Cb-1".parse::<Note>(), Err(ParseNoteError::OutOfRange(_))));
        assert!(matches!("C2147483647".parse::<Note>(), Err(ParseNoteError::OutOfRange(_))));
        assert!(matches!("C-2147483648".parse::<Note>(), Err(ParseNoteError::OutOfRange(_))));
    }

    #[test]
    fn test_deserialize_rejects_huge_octave() {
        let ok: Note = serde_json::from_str(r#"{"pitch_class":"A","octave":4}"#).unwrap();
        assert_eq!(ok.midi_number(), 69);

        let huge = serde_json::from_str::<Note>(r#"{"pitch_class":"A","octave":2147483647}"#);
        assert!(huge.is_err());
        let low = serde_json::from_str::<Note>(r#"{"pitch_class":"C","octave":-2}"#);
        assert!(low.is_err());
    }

    #[test]
    fn test_midi_number_saturates_instead_of_overflowing() {
        let note = Note {
            pitch_class: PitchClass::A,
            octave: i32::MAX,
        };
        assert_eq!(note.midi_number(), i32::MAX);
        let reading = map_against(440.0, note);
        assert!(reading.cents < 0);
    }

    #[test]
    fn test_note_frequencies() {
        approx::assert_relative_eq!(Note::from_midi(69).frequency(), 440.0);
        approx::assert_relative_eq!(Note::from_midi(57).frequency(), 220.0, epsilon = 1e-3);
        approx::assert_relative_eq!("C4".parse::<Note>().unwrap().frequency(), 261.6256, epsilon = 1e-3);
    }

    #[test]
    fn test_cents_between() {
        approx::assert_relative_eq!(cents_between(880.0, 440.0), 1200.0, epsilon = 1e-3);
        approx::assert_relative_eq!(cents_between(440.0, 440.0), 0.0);
    }

    #[test]
    fn test_reading_serializes_note_names() {
        let json = serde_json::to_string(&map_frequency(440.0)).unwrap();
        assert!(json.contains(r#""pitch_class":"A""#), "{}", json);
        let back: NoteReading = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map_frequency(440.0));
    }
}

//! Pitch classes and note-name parsing

use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether altered pitch classes are spelled with sharps or flats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Accidental {
    #[default]
    Sharp,
    Flat,
}

/// One of the twelve equal-tempered pitch classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PitchClass {
    C,
    Cs,
    D,
    Ds,
    E,
    F,
    Fs,
    G,
    Gs,
    A,
    As,
    B,
}

const ALL: [PitchClass; 12] = [
    PitchClass::C,
    PitchClass::Cs,
    PitchClass::D,
    PitchClass::Ds,
    PitchClass::E,
    PitchClass::F,
    PitchClass::Fs,
    PitchClass::G,
    PitchClass::Gs,
    PitchClass::A,
    PitchClass::As,
    PitchClass::B,
];

const SHARP_NAMES: [&str; 12] = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];
const FLAT_NAMES: [&str; 12] = ["C", "Db", "D", "Eb", "E", "F", "Gb", "G", "Ab", "A", "Bb", "B"];

impl PitchClass {
    /// Semitones above C (0..=11)
    pub fn semitone(&self) -> i32 {
        *self as i32
    }

    /// Pitch class for any semitone count, wrapping by octave
    pub fn from_semitone(semitone: i32) -> Self {
        ALL[semitone.rem_euclid(12) as usize]
    }

    /// Shift by a signed number of semitones
    pub fn transpose(&self, semitones: i32) -> Self {
        Self::from_semitone(self.semitone() + semitones)
    }

    /// Spelled name, e.g. "F#" or "Gb"
    pub fn name(&self, accidental: Accidental) -> &'static str {
        match accidental {
            Accidental::Sharp => SHARP_NAMES[self.semitone() as usize],
            Accidental::Flat => FLAT_NAMES[self.semitone() as usize],
        }
    }

    /// Parse a leading note name ("C", "c#", "Bb", "E♭") from `text`
    ///
    /// Returns the pitch class, the spelling it was written with and the
    /// number of bytes consumed, or `None` when `text` does not start with a
    /// note letter.
    pub fn parse_prefix(text: &str) -> Option<(PitchClass, Accidental, usize)> {
        let mut chars = text.char_indices();
        let (_, letter) = chars.next()?;
        let natural = match letter.to_ascii_uppercase() {
            'C' => 0,
            'D' => 2,
            'E' => 4,
            'F' => 5,
            'G' => 7,
            'A' => 9,
            'B' => 11,
            _ => return None,
        };

        let mut consumed = letter.len_utf8();
        let mut modifier = 0i32;
        let mut accidental = Accidental::Sharp;
        if let Some((idx, next)) = chars.next() {
            match next {
                '#' | '♯' => {
                    modifier = 1;
                    consumed = idx + next.len_utf8();
                }
                'b' | '♭' => {
                    modifier = -1;
                    accidental = Accidental::Flat;
                    consumed = idx + next.len_utf8();
                }
                _ => {}
            }
        }

        Some((Self::from_semitone(natural + modifier), accidental, consumed))
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name(Accidental::Sharp))
    }
}

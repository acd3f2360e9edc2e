//! Musical keys and the semitone distance between them

use super::pitch::{Accidental, PitchClass};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    Major,
    Minor,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Major => f.write_str("Major"),
            Mode::Minor => f.write_str("Minor"),
        }
    }
}

/// A tonic and a mode, e.g. "G Minor"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key {
    pub root: PitchClass,
    pub mode: Mode,
    pub accidental: Accidental,
}

impl Key {
    pub fn new(root: PitchClass, mode: Mode) -> Self {
        Self {
            root,
            mode,
            accidental: Accidental::Sharp,
        }
    }

    /// The same mode, `semitones` higher (or lower when negative)
    pub fn transpose(&self, semitones: i32) -> Self {
        Self {
            root: self.root.transpose(semitones),
            mode: self.mode,
            accidental: self.accidental,
        }
    }
}

impl FromStr for Key {
    type Err = Error;

    /// Accepts "C", "Cm", "C minor", "F# Major", "Bb maj", "Eb-"
    fn from_str(s: &str) -> Result<Self> {
        let text = s.trim();
        let (root, accidental, consumed) = PitchClass::parse_prefix(text)
            .ok_or_else(|| Error::InvalidInput(format!("Invalid key '{}'", s)))?;

        let suffix = text[consumed..].trim();
        let mode = match suffix {
            "" | "M" => Mode::Major,
            "m" | "-" => Mode::Minor,
            other => match other.to_ascii_lowercase().as_str() {
                "maj" | "major" => Mode::Major,
                "min" | "minor" => Mode::Minor,
                _ => return Err(Error::InvalidInput(format!("Invalid key mode '{}' in '{}'", other, s))),
            },
        };

        Ok(Self { root, mode, accidental })
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.root.name(self.accidental), self.mode)
    }
}

/// Signed semitone shift that moves `source` onto `target`
///
/// Only the tonics count; the result is the shortest rotation, in `-5..=6`.
pub fn transpose_semitones(source: &Key, target: &Key) -> i32 {
    let delta = (target.root.semitone() - source.root.semitone()).rem_euclid(12);
    if delta > 6 {
        delta - 12
    } else {
        delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> Key {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_forms() {
        assert_eq!(key("C"), Key::new(PitchClass::C, Mode::Major));
        assert_eq!(key("Cm").mode, Mode::Minor);
        assert_eq!(key("C minor").mode, Mode::Minor);
        assert_eq!(key("F# Major"), Key::new(PitchClass::Fs, Mode::Major));
        assert_eq!(key("  Bb maj ").root, PitchClass::As);
        assert_eq!(key("A-").mode, Mode::Minor);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<Key>().is_err());
        assert!("X major".parse::<Key>().is_err());
        assert!("C dorian".parse::<Key>().is_err());
    }

    #[test]
    fn test_display_keeps_spelling() {
        assert_eq!(key("G minor").to_string(), "G Minor");
        assert_eq!(key("Eb").to_string(), "Eb Major");
        assert_eq!(key("D#").to_string(), "D# Major");
    }

    #[test]
    fn test_transpose_semitones_shortest_rotation() {
        assert_eq!(transpose_semitones(&key("C"), &key("C")), 0);
        assert_eq!(transpose_semitones(&key("C"), &key("G")), -5);
        assert_eq!(transpose_semitones(&key("C"), &key("F")), 5);
        assert_eq!(transpose_semitones(&key("C"), &key("F#")), 6);
        assert_eq!(transpose_semitones(&key("G"), &key("C")), 5);
        assert_eq!(transpose_semitones(&key("B"), &key("C")), 1);
        assert_eq!(transpose_semitones(&key("C"), &key("B")), -1);
    }

    #[test]
    fn test_transpose_semitones_ignores_mode() {
        assert_eq!(transpose_semitones(&key("A minor"), &key("C major")), 3);
    }

    #[test]
    fn test_transpose_applies_shift() {
        let shifted = key("C minor").transpose(transpose_semitones(&key("C"), &key("E")));
        assert_eq!(shifted.to_string(), "E Minor");
        assert_eq!(key("D").transpose(-5).to_string(), "A Major");
    }
}

//! Chord symbols
//!
//! A chord is a root, an opaque quality suffix ("m7", "sus4", "maj9") and an
//! optional slash bass. Only the pitch parts move under transposition.

use super::pitch::{Accidental, PitchClass};
use crate::{Error, Result};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chord {
    /// "NC": explicit silence in the harmony
    NoChord,
    Pitched {
        root: PitchClass,
        accidental: Accidental,
        suffix: String,
        bass: Option<PitchClass>,
    },
}

impl Chord {
    pub fn transpose(&self, semitones: i32) -> Self {
        match self {
            Chord::NoChord => Chord::NoChord,
            Chord::Pitched {
                root,
                accidental,
                suffix,
                bass,
            } => Chord::Pitched {
                root: root.transpose(semitones),
                accidental: *accidental,
                suffix: suffix.clone(),
                bass: bass.map(|b| b.transpose(semitones)),
            },
        }
    }
}

impl FromStr for Chord {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let text = s.trim();
        if text.eq_ignore_ascii_case("nc") || text.eq_ignore_ascii_case("n.c.") {
            return Ok(Chord::NoChord);
        }

        let (root, accidental, consumed) = PitchClass::parse_prefix(text)
            .ok_or_else(|| Error::InvalidInput(format!("Invalid chord '{}'", s)))?;
        let rest = &text[consumed..];

        let (suffix, bass) = match rest.rsplit_once('/') {
            Some((quality, bass_text)) => {
                let (bass, _, bass_len) = PitchClass::parse_prefix(bass_text.trim())
                    .ok_or_else(|| Error::InvalidInput(format!("Invalid bass note in chord '{}'", s)))?;
                if bass_len != bass_text.trim().len() {
                    return Err(Error::InvalidInput(format!("Invalid bass note in chord '{}'", s)));
                }
                (quality, Some(bass))
            }
            None => (rest, None),
        };

        Ok(Chord::Pitched {
            root,
            accidental,
            suffix: suffix.trim().to_string(),
            bass,
        })
    }
}

impl fmt::Display for Chord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Chord::NoChord => f.write_str("NC"),
            Chord::Pitched {
                root,
                accidental,
                suffix,
                bass,
            } => {
                write!(f, "{}{}", root.name(*accidental), suffix)?;
                if let Some(bass) = bass {
                    write!(f, "/{}", bass.name(*accidental))?;
                }
                Ok(())
            }
        }
    }
}

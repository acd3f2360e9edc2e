//! Music theory primitives used for transposition

pub mod chord;
pub mod key;
pub mod pitch;

pub use chord::Chord;
pub use key::{transpose_semitones, Key, Mode};
pub use pitch::{Accidental, PitchClass};

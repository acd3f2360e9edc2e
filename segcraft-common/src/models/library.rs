//! Library content: programs, sequences, bindings, memes and chords
//!
//! Read-only from the fabricator's point of view.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Program role in fabrication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProgramType {
    /// Long-form arc that sets key and memes for several main programs
    Macro,
    /// Harmonic content of a segment
    Main,
    Rhythm,
    Detail,
}

text_enum!(ProgramType {
    Macro => "Macro",
    Main => "Main",
    Rhythm => "Rhythm",
    Detail => "Detail",
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Library {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub id: Uuid,
    pub library_id: Uuid,
    pub program_type: ProgramType,
    pub name: String,
    pub key: String,
    pub tempo: f64,
    pub density: f64,
    /// When false the program is always used untransposed
    pub do_transpose: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramMeme {
    pub id: Uuid,
    pub program_id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramSequence {
    pub id: Uuid,
    pub program_id: Uuid,
    pub name: String,
    /// Falls back to the program key when absent
    pub key: Option<String>,
    /// Length in beats
    pub total: i64,
    pub tempo: Option<f64>,
    pub density: Option<f64>,
}

/// A sequence placed at an offset within its program
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramSequenceBinding {
    pub id: Uuid,
    pub program_id: Uuid,
    pub program_sequence_id: Uuid,
    pub offset: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramSequenceBindingMeme {
    pub id: Uuid,
    pub program_id: Uuid,
    pub program_sequence_binding_id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramSequenceChord {
    pub id: Uuid,
    pub program_id: Uuid,
    pub program_sequence_id: Uuid,
    /// Beats from sequence start
    pub position: f64,
    pub name: String,
}

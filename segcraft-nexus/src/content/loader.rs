//! TOML library documents
//!
//! Bootstraps a library from a file:
//!
//! ```toml
//! name = "Demo"
//!
//! [[programs]]
//! name = "Arc"
//! type = "Macro"
//! key = "C major"
//! tempo = 120.0
//! density = 0.6
//! memes = ["Classic"]
//!
//!   [[programs.sequences]]
//!   name = "Wild"
//!   total = 16
//!   chords = [{ position = 0.0, name = "C" }]
//!
//!   [[programs.bindings]]
//!   sequence = "Wild"
//!   offset = 0
//!   memes = ["Wild"]
//! ```

use super::ContentSet;
use segcraft_common::models::{
    Library, Program, ProgramMeme, ProgramSequence, ProgramSequenceBinding,
    ProgramSequenceBindingMeme, ProgramSequenceChord, ProgramType,
};
use segcraft_common::{time, Error, Key, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LibraryDocument {
    pub name: String,
    #[serde(default)]
    pub programs: Vec<ProgramDocument>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProgramDocument {
    pub name: String,
    #[serde(rename = "type")]
    pub program_type: String,
    pub key: String,
    pub tempo: f64,
    pub density: f64,
    #[serde(default = "default_true")]
    pub do_transpose: bool,
    #[serde(default)]
    pub memes: Vec<String>,
    #[serde(default)]
    pub sequences: Vec<SequenceDocument>,
    #[serde(default)]
    pub bindings: Vec<BindingDocument>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SequenceDocument {
    pub name: String,
    pub key: Option<String>,
    pub total: i64,
    pub tempo: Option<f64>,
    pub density: Option<f64>,
    #[serde(default)]
    pub chords: Vec<ChordDocument>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChordDocument {
    pub position: f64,
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BindingDocument {
    /// Name of a sequence in the same program
    pub sequence: String,
    pub offset: i64,
    #[serde(default)]
    pub memes: Vec<String>,
}

fn default_true() -> bool {
    true
}

/// Read and convert a library file
pub fn load_library_file(path: &Path) -> Result<(Library, ContentSet)> {
    let text = std::fs::read_to_string(path)?;
    parse_library(&text)
}

/// Parse a library document and assign fresh ids
pub fn parse_library(text: &str) -> Result<(Library, ContentSet)> {
    let document: LibraryDocument =
        toml::from_str(text).map_err(|e| Error::InvalidInput(format!("Invalid library document: {}", e)))?;
    convert(document)
}

fn convert(document: LibraryDocument) -> Result<(Library, ContentSet)> {
    let library = Library {
        id: Uuid::new_v4(),
        name: document.name,
        created_at: time::now(),
    };
    let mut content = ContentSet::default();

    for doc in document.programs {
        let program_type: ProgramType = doc.program_type.parse()?;
        validate_key(&doc.key, &doc.name)?;
        validate_tempo(doc.tempo, &doc.name)?;
        validate_density(doc.density, &doc.name)?;

        let program = Program {
            id: Uuid::new_v4(),
            library_id: library.id,
            program_type,
            name: doc.name.clone(),
            key: doc.key,
            tempo: doc.tempo,
            density: doc.density,
            do_transpose: doc.do_transpose,
        };

        for meme in doc.memes {
            content.program_memes.push(ProgramMeme {
                id: Uuid::new_v4(),
                program_id: program.id,
                name: meme,
            });
        }

        let mut sequence_ids = HashMap::new();
        for seq in doc.sequences {
            if seq.total <= 0 {
                return Err(Error::InvalidInput(format!(
                    "Sequence '{}' of program '{}' must have a positive total",
                    seq.name, program.name
                )));
            }
            if let Some(key) = &seq.key {
                validate_key(key, &seq.name)?;
            }
            if let Some(tempo) = seq.tempo {
                validate_tempo(tempo, &seq.name)?;
            }
            if let Some(density) = seq.density {
                validate_density(density, &seq.name)?;
            }

            let sequence = ProgramSequence {
                id: Uuid::new_v4(),
                program_id: program.id,
                name: seq.name.clone(),
                key: seq.key,
                total: seq.total,
                tempo: seq.tempo,
                density: seq.density,
            };
            for chord in seq.chords {
                content.chords.push(ProgramSequenceChord {
                    id: Uuid::new_v4(),
                    program_id: program.id,
                    program_sequence_id: sequence.id,
                    position: chord.position,
                    name: chord.name,
                });
            }
            if sequence_ids.insert(seq.name.clone(), sequence.id).is_some() {
                return Err(Error::InvalidInput(format!(
                    "Duplicate sequence '{}' in program '{}'",
                    seq.name, program.name
                )));
            }
            content.sequences.push(sequence);
        }

        for bind in doc.bindings {
            let sequence_id = *sequence_ids.get(&bind.sequence).ok_or_else(|| {
                Error::InvalidInput(format!(
                    "Binding in program '{}' refers to unknown sequence '{}'",
                    program.name, bind.sequence
                ))
            })?;
            if bind.offset < 0 {
                return Err(Error::InvalidInput(format!(
                    "Binding offset in program '{}' must not be negative",
                    program.name
                )));
            }

            let binding = ProgramSequenceBinding {
                id: Uuid::new_v4(),
                program_id: program.id,
                program_sequence_id: sequence_id,
                offset: bind.offset,
            };
            for meme in bind.memes {
                content.binding_memes.push(ProgramSequenceBindingMeme {
                    id: Uuid::new_v4(),
                    program_id: program.id,
                    program_sequence_binding_id: binding.id,
                    name: meme,
                });
            }
            content.bindings.push(binding);
        }

        content.programs.push(program);
    }

    Ok((library, content))
}

fn validate_key(key: &str, owner: &str) -> Result<()> {
    key.parse::<Key>()
        .map(|_| ())
        .map_err(|e| Error::InvalidInput(format!("'{}': {}", owner, e)))
}

fn validate_tempo(tempo: f64, owner: &str) -> Result<()> {
    if tempo.is_finite() && tempo > 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("'{}': tempo must be positive", owner)))
    }
}

fn validate_density(density: f64, owner: &str) -> Result<()> {
    if (0.0..=1.0).contains(&density) {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("'{}': density must be within 0..1", owner)))
    }
}

//! Library content as seen by the fabricator
//!
//! The fabricator reads programs, sequences, bindings, memes and chords through
//! [`LibraryContent`]. The supervisor ingests a [`SourceMaterial`] snapshot per
//! chain so a craft never queries library tables row by row.

pub mod loader;
pub mod repository;

use async_trait::async_trait;
use segcraft_common::models::{
    ChainBinding, Program, ProgramMeme, ProgramSequence, ProgramSequenceBinding,
    ProgramSequenceBindingMeme, ProgramSequenceChord, ProgramType,
};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Read contracts the fabricator consumes
pub trait LibraryContent: Send + Sync {
    fn program(&self, program_id: Uuid) -> Option<&Program>;

    fn program_sequence(&self, sequence_id: Uuid) -> Option<&ProgramSequence>;

    fn program_sequence_binding(&self, binding_id: Uuid) -> Option<&ProgramSequenceBinding>;

    /// All bindings of a program, ordered by offset then id
    fn program_sequence_bindings(&self, program_id: Uuid) -> Vec<&ProgramSequenceBinding>;

    fn sequence_binding_memes(&self, binding_id: Uuid) -> Vec<&ProgramSequenceBindingMeme>;

    /// Chords of a sequence, ordered by position
    fn sequence_chords(&self, sequence_id: Uuid) -> Vec<&ProgramSequenceChord>;

    fn program_memes(&self, program_id: Uuid) -> Vec<&ProgramMeme>;

    /// Programs of a type carrying at least one of `required_memes`
    ///
    /// With no required memes every program of the type qualifies. Results are
    /// ordered by id so seeded selection is reproducible.
    fn programs_by_type_and_tag(&self, program_type: ProgramType, required_memes: &[String]) -> Vec<&Program>;

    /// Whether the chain binds this program directly rather than through its library
    fn is_directly_bound(&self, program_id: Uuid) -> bool;
}

/// Produces source material for a chain's bindings
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn ingest(&self, bindings: &[ChainBinding]) -> segcraft_common::Result<SourceMaterial>;
}

/// Flat rows of library content, as stored or loaded
#[derive(Debug, Clone, Default)]
pub struct ContentSet {
    pub programs: Vec<Program>,
    pub program_memes: Vec<ProgramMeme>,
    pub sequences: Vec<ProgramSequence>,
    pub bindings: Vec<ProgramSequenceBinding>,
    pub binding_memes: Vec<ProgramSequenceBindingMeme>,
    pub chords: Vec<ProgramSequenceChord>,
}

impl ContentSet {
    pub fn extend(&mut self, other: ContentSet) {
        self.programs.extend(other.programs);
        self.program_memes.extend(other.program_memes);
        self.sequences.extend(other.sequences);
        self.bindings.extend(other.bindings);
        self.binding_memes.extend(other.binding_memes);
        self.chords.extend(other.chords);
    }
}

/// Indexed, read-only snapshot of every program reachable from one chain
#[derive(Debug, Default)]
pub struct SourceMaterial {
    programs: HashMap<Uuid, Program>,
    sequences: HashMap<Uuid, ProgramSequence>,
    bindings: HashMap<Uuid, ProgramSequenceBinding>,
    bindings_by_program: HashMap<Uuid, Vec<Uuid>>,
    binding_memes: HashMap<Uuid, Vec<ProgramSequenceBindingMeme>>,
    chords: HashMap<Uuid, Vec<ProgramSequenceChord>>,
    program_memes: HashMap<Uuid, Vec<ProgramMeme>>,
    direct_program_ids: HashSet<Uuid>,
}

impl SourceMaterial {
    /// Index a content set; `direct_program_ids` are programs bound to the chain directly
    pub fn new(content: ContentSet, direct_program_ids: impl IntoIterator<Item = Uuid>) -> Self {
        let mut material = SourceMaterial {
            direct_program_ids: direct_program_ids.into_iter().collect(),
            ..Default::default()
        };

        for program in content.programs {
            material.programs.insert(program.id, program);
        }
        for sequence in content.sequences {
            material.sequences.insert(sequence.id, sequence);
        }
        for binding in content.bindings {
            material
                .bindings_by_program
                .entry(binding.program_id)
                .or_default()
                .push(binding.id);
            material.bindings.insert(binding.id, binding);
        }
        for meme in content.binding_memes {
            material
                .binding_memes
                .entry(meme.program_sequence_binding_id)
                .or_default()
                .push(meme);
        }
        for chord in content.chords {
            material.chords.entry(chord.program_sequence_id).or_default().push(chord);
        }
        for meme in content.program_memes {
            material.program_memes.entry(meme.program_id).or_default().push(meme);
        }

        for ids in material.bindings_by_program.values_mut() {
            let bindings = &material.bindings;
            ids.sort_by_key(|id| (bindings.get(id).map(|b| b.offset).unwrap_or(i64::MAX), *id));
        }
        for chords in material.chords.values_mut() {
            chords.sort_by(|a, b| a.position.total_cmp(&b.position).then(a.id.cmp(&b.id)));
        }

        material
    }

    pub fn program_count(&self) -> usize {
        self.programs.len()
    }

    /// Program memes plus memes on the bindings at the program's first offset
    ///
    /// A newly chosen program always starts at its first offset, so memes on
    /// later bindings do not count toward tag matching.
    fn entry_memes_of(&self, program_id: Uuid) -> impl Iterator<Item = &str> {
        let program_level = self
            .program_memes
            .get(&program_id)
            .into_iter()
            .flatten()
            .map(|m| m.name.as_str());

        let ids = self.bindings_by_program.get(&program_id).map(Vec::as_slice).unwrap_or_default();
        let first = ids.first().and_then(|id| self.bindings.get(id)).map(|b| b.offset);
        let binding_level = ids
            .iter()
            .filter(move |id| self.bindings.get(*id).map(|b| b.offset) == first)
            .filter_map(move |id| self.binding_memes.get(id))
            .flatten()
            .map(|m| m.name.as_str());
        program_level.chain(binding_level)
    }
}

impl LibraryContent for SourceMaterial {
    fn program(&self, program_id: Uuid) -> Option<&Program> {
        self.programs.get(&program_id)
    }

    fn program_sequence(&self, sequence_id: Uuid) -> Option<&ProgramSequence> {
        self.sequences.get(&sequence_id)
    }

    fn program_sequence_binding(&self, binding_id: Uuid) -> Option<&ProgramSequenceBinding> {
        self.bindings.get(&binding_id)
    }

    fn program_sequence_bindings(&self, program_id: Uuid) -> Vec<&ProgramSequenceBinding> {
        self.bindings_by_program
            .get(&program_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.bindings.get(id))
            .collect()
    }

    fn sequence_binding_memes(&self, binding_id: Uuid) -> Vec<&ProgramSequenceBindingMeme> {
        self.binding_memes.get(&binding_id).map(|m| m.iter().collect()).unwrap_or_default()
    }

    fn sequence_chords(&self, sequence_id: Uuid) -> Vec<&ProgramSequenceChord> {
        self.chords.get(&sequence_id).map(|c| c.iter().collect()).unwrap_or_default()
    }

    fn program_memes(&self, program_id: Uuid) -> Vec<&ProgramMeme> {
        self.program_memes.get(&program_id).map(|m| m.iter().collect()).unwrap_or_default()
    }

    fn programs_by_type_and_tag(&self, program_type: ProgramType, required_memes: &[String]) -> Vec<&Program> {
        let required: HashSet<String> = required_memes.iter().map(|m| normalize_meme(m)).collect();

        let mut programs: Vec<&Program> = self
            .programs
            .values()
            .filter(|p| p.program_type == program_type)
            .filter(|p| required.is_empty() || self.entry_memes_of(p.id).any(|m| required.contains(&normalize_meme(m))))
            .collect();
        programs.sort_by_key(|p| p.id);
        programs
    }

    fn is_directly_bound(&self, program_id: Uuid) -> bool {
        self.direct_program_ids.contains(&program_id)
    }
}

/// Canonical meme spelling: trimmed, upper case
pub fn normalize_meme(name: &str) -> String {
    name.trim().to_uppercase()
}

//! Segment fabrication
//!
//! The [`Fabricator`] turns one Planned segment plus its chain's history into a
//! [`Fabrication`]: the segment's fabricated fields and the choices, memes,
//! chords and messages that go with them. Nothing is written here; the craft
//! pipeline commits the result.
//!
//! Two tracks are chosen per segment. The macro track sets the long arc and
//! its implied key; the main track is picked to fit the macro track's memes
//! and is transposed onto the macro key, so the two transpositions compose.

pub mod aggregator;
pub mod classifier;
pub mod memes;
pub mod navigator;
pub mod picker;
pub mod seed;

use crate::access::Access;
use crate::content::LibraryContent;
use crate::error::{CraftError, CraftResult};
use crate::store::SegmentStore;
use aggregator::{aggregate_chords, aggregate_memes};
use classifier::{classify, PreviousSegment};
use memes::{meme_isometry, MemeCompatibility};
use navigator::{bindings_at, first_offset, next_offset};
use picker::{pick_one, ScoredPicker};
use rand_pcg::Pcg32;
use segcraft_common::models::{
    Program, ProgramSequence, ProgramSequenceBinding, ProgramType, Segment, SegmentChoice,
    SegmentChord, SegmentMeme, SegmentMessage, SegmentMessageType, SegmentType,
};
use segcraft_common::music::{transpose_semitones, Key, Mode};
use segcraft_common::time;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Score bonus per unit of meme isometry
const MEME_ISOMETRY_WEIGHT: f64 = 10.0;
const SAME_MODE_BONUS: f64 = 2.0;
const PREVIOUS_PROGRAM_PENALTY: f64 = -5.0;
const DIRECT_BINDING_BONUS: f64 = 100.0;

/// A fabricated segment and its child records, not yet persisted
#[derive(Debug, Clone)]
pub struct Fabrication {
    pub segment: Segment,
    pub choices: Vec<SegmentChoice>,
    pub memes: Vec<SegmentMeme>,
    pub chords: Vec<SegmentChord>,
    pub messages: Vec<SegmentMessage>,
}

/// One track's program, binding and transposition
#[derive(Debug, Clone, Copy)]
struct TrackChoice<'a> {
    program: &'a Program,
    binding: &'a ProgramSequenceBinding,
    sequence: &'a ProgramSequence,
    transpose: i32,
}

impl TrackChoice<'_> {
    /// Authored key of the bound sequence, falling back to the program key
    fn source_key(&self) -> CraftResult<Key> {
        let text = self.sequence.key.as_deref().unwrap_or(&self.program.key);
        text.parse::<Key>().map_err(|e| {
            CraftError::MissingContent(format!(
                "program '{}' sequence '{}' has no usable key: {}",
                self.program.name, self.sequence.name, e
            ))
        })
    }

    /// Key after this track's transposition
    fn effective_key(&self) -> CraftResult<Key> {
        Ok(self.source_key()?.transpose(self.transpose))
    }

    fn tempo(&self) -> f64 {
        self.sequence.tempo.unwrap_or(self.program.tempo)
    }

    fn density(&self) -> f64 {
        self.sequence.density.unwrap_or(self.program.density)
    }

    fn to_segment_choice(self, segment_id: Uuid, program_type: ProgramType) -> SegmentChoice {
        SegmentChoice {
            id: Uuid::new_v4(),
            segment_id,
            program_id: self.program.id,
            program_type,
            program_sequence_binding_id: self.binding.id,
            transpose: self.transpose,
        }
    }
}

/// What a newly chosen track must fit
struct SelectionContext<'s> {
    program_type: ProgramType,
    required_memes: &'s [String],
    target_mode: Option<Mode>,
    previous_program: Option<Uuid>,
}

pub struct Fabricator {
    segments: Arc<dyn SegmentStore>,
    content: Arc<dyn LibraryContent>,
    memes: Arc<dyn MemeCompatibility>,
}

impl Fabricator {
    pub fn new(
        segments: Arc<dyn SegmentStore>,
        content: Arc<dyn LibraryContent>,
        memes: Arc<dyn MemeCompatibility>,
    ) -> Self {
        Self {
            segments,
            content,
            memes,
        }
    }

    /// Fabricate `target` from its chain's history
    ///
    /// Fails without side effects when the history cannot be classified, when
    /// library content is missing, or when no main program fits the macro arc.
    pub async fn fabricate(&self, access: &Access, target: &Segment) -> CraftResult<Fabrication> {
        access.require_internal()?;

        let previous = self.load_previous(target).await?;
        let segment_type = classify(self.content.as_ref(), target, previous.as_ref())?;

        let macro_choice = self.choose_macro(target, segment_type, previous.as_ref())?;
        let main_choice = self.choose_main(target, segment_type, previous.as_ref(), &macro_choice)?;

        debug!(
            chain_id = %target.chain_id,
            offset = target.offset,
            segment_type = %segment_type,
            macro_program = %macro_choice.program.name,
            macro_offset = macro_choice.binding.offset,
            macro_transpose = macro_choice.transpose,
            main_program = %main_choice.program.name,
            main_offset = main_choice.binding.offset,
            main_transpose = main_choice.transpose,
            "Fabricated segment choices"
        );

        self.assemble(target, segment_type, macro_choice, main_choice)
    }

    async fn load_previous(&self, target: &Segment) -> CraftResult<Option<PreviousSegment>> {
        if target.offset == 0 {
            return Ok(None);
        }
        let Some(segment) = self
            .segments
            .read_preceding_segment(target.chain_id, target.offset)
            .await?
        else {
            return Ok(None);
        };

        if !segment.state.is_craft_terminal() {
            return Err(CraftError::Classification(format!(
                "preceding segment {} at offset {} is {}",
                segment.id, segment.offset, segment.state
            )));
        }

        let choices = self.segments.read_choices_for_segment(segment.id).await?;
        let memes = self
            .segments
            .read_memes_for_segment(segment.id)
            .await?
            .into_iter()
            .map(|m| m.name)
            .collect();

        PreviousSegment::from_choices(segment, choices, memes).map(Some)
    }

    fn choose_macro(
        &self,
        target: &Segment,
        segment_type: SegmentType,
        previous: Option<&PreviousSegment>,
    ) -> CraftResult<TrackChoice<'_>> {
        let mut rng = seed::selection_rng(target.chain_id, target.offset, "macro");

        match segment_type {
            SegmentType::Continue => self.carry_forward(&require_previous(previous, segment_type)?.macro_choice),
            SegmentType::NextMain => {
                self.advance(&require_previous(previous, segment_type)?.macro_choice, &mut rng)
            }
            SegmentType::Initial | SegmentType::NextMacro => {
                let no_memes = Vec::new();
                let (required_memes, target_key, previous_program) = match previous {
                    Some(previous) => (
                        &previous.memes,
                        Some(previous_key(previous)?),
                        Some(previous.macro_choice.program_id),
                    ),
                    None => (&no_memes, None, None),
                };

                let context = SelectionContext {
                    program_type: ProgramType::Macro,
                    required_memes,
                    target_mode: target_key.map(|k| k.mode),
                    previous_program,
                };
                let programs = self.content.programs_by_type_and_tag(ProgramType::Macro, &[]);
                let mut choice = self.select(programs, &context, &mut rng)?.ok_or_else(|| {
                    CraftError::NoCompatibleCandidate(format!(
                        "no macro program compatible with memes [{}]",
                        required_memes.join(", ")
                    ))
                })?;

                choice.transpose = match target_key {
                    Some(target_key) if choice.program.do_transpose => {
                        transpose_semitones(&choice.source_key()?, &target_key)
                    }
                    _ => 0,
                };
                Ok(choice)
            }
        }
    }

    fn choose_main<'a>(
        &'a self,
        target: &Segment,
        segment_type: SegmentType,
        previous: Option<&PreviousSegment>,
        macro_choice: &TrackChoice<'a>,
    ) -> CraftResult<TrackChoice<'a>> {
        let mut rng = seed::selection_rng(target.chain_id, target.offset, "main");

        if segment_type == SegmentType::Continue {
            return self.advance(&require_previous(previous, segment_type)?.main_choice, &mut rng);
        }

        let required_memes = self.binding_meme_names(macro_choice.binding.id);
        let macro_key = macro_choice.effective_key()?;

        let mut programs = self.content.programs_by_type_and_tag(ProgramType::Main, &required_memes);
        if programs.is_empty() {
            programs = self.content.programs_by_type_and_tag(ProgramType::Main, &[]);
        }

        let context = SelectionContext {
            program_type: ProgramType::Main,
            required_memes: &required_memes,
            target_mode: Some(macro_key.mode),
            previous_program: previous.map(|p| p.main_choice.program_id),
        };
        let mut choice = self.select(programs, &context, &mut rng)?.ok_or_else(|| {
            CraftError::NoCompatibleCandidate(format!(
                "no main program compatible with macro '{}' memes [{}]",
                macro_choice.program.name,
                required_memes.join(", ")
            ))
        })?;

        choice.transpose = if choice.program.do_transpose {
            transpose_semitones(&choice.source_key()?, &macro_key)
        } else {
            0
        };
        Ok(choice)
    }

    /// Same binding and transposition as the previous segment
    fn carry_forward(&self, previous: &SegmentChoice) -> CraftResult<TrackChoice<'_>> {
        let binding = self.binding(previous.program_sequence_binding_id)?;
        self.track_choice(binding, previous.transpose)
    }

    /// Same program at its next bound offset, keeping the transposition
    fn advance(&self, previous: &SegmentChoice, rng: &mut Pcg32) -> CraftResult<TrackChoice<'_>> {
        let content = self.content.as_ref();
        let current = self.binding(previous.program_sequence_binding_id)?;
        let offset = next_offset(content, previous.program_id, current.offset).ok_or_else(|| {
            CraftError::Classification(format!(
                "{} program {} has no offset after {}",
                previous.program_type, previous.program_id, current.offset
            ))
        })?;

        let candidates = bindings_at(content, previous.program_id, offset);
        let binding = pick_one(&candidates, rng).copied().ok_or_else(|| {
            CraftError::MissingContent(format!(
                "{} program {} has no binding at offset {}",
                previous.program_type, previous.program_id, offset
            ))
        })?;
        self.track_choice(binding, previous.transpose)
    }

    /// Score every compatible binding at each program's first offset and pick one
    fn select<'a>(
        &'a self,
        programs: Vec<&'a Program>,
        context: &SelectionContext<'_>,
        rng: &mut Pcg32,
    ) -> CraftResult<Option<TrackChoice<'a>>> {
        let content = self.content.as_ref();
        let mut picker = ScoredPicker::new();

        for program in programs {
            let Some(offset) = first_offset(content, program.id) else {
                continue;
            };
            let program_memes = self.program_meme_names(program.id);

            for binding in bindings_at(content, program.id, offset) {
                let mut memes = self.binding_meme_names(binding.id);
                memes.extend(program_memes.iter().cloned());
                if !self.memes.is_compatible(&memes, context.required_memes) {
                    continue;
                }

                let choice = self.track_choice(binding, 0)?;
                let mut score = meme_isometry(&memes, context.required_memes) * MEME_ISOMETRY_WEIGHT;
                if context.target_mode == Some(choice.source_key()?.mode) {
                    score += SAME_MODE_BONUS;
                }
                if context.previous_program == Some(program.id) {
                    score += PREVIOUS_PROGRAM_PENALTY;
                }
                if content.is_directly_bound(program.id) {
                    score += DIRECT_BINDING_BONUS;
                }
                picker.add(choice, score);
            }
        }

        debug!(
            program_type = %context.program_type,
            candidates = picker.len(),
            "Selecting among compatible candidates"
        );
        Ok(picker.pick(rng))
    }

    fn assemble(
        &self,
        target: &Segment,
        segment_type: SegmentType,
        macro_choice: TrackChoice<'_>,
        main_choice: TrackChoice<'_>,
    ) -> CraftResult<Fabrication> {
        let total = main_choice.sequence.total;
        if total <= 0 {
            return Err(CraftError::MissingContent(format!(
                "main sequence '{}' has no length",
                main_choice.sequence.name
            )));
        }
        let tempo = (macro_choice.tempo() + main_choice.tempo()) / 2.0;
        if !(tempo.is_finite() && tempo > 0.0) {
            return Err(CraftError::MissingContent(format!(
                "programs '{}' and '{}' give no usable tempo ({})",
                macro_choice.program.name, main_choice.program.name, tempo
            )));
        }
        let density = (macro_choice.density() + main_choice.density()) / 2.0;
        if !(0.0..=1.0).contains(&density) {
            return Err(CraftError::MissingContent(format!(
                "programs '{}' and '{}' give density {} outside 0..1",
                macro_choice.program.name, main_choice.program.name, density
            )));
        }
        let key = main_choice.effective_key()?;

        let mut segment = target.clone();
        segment.segment_type = Some(segment_type);
        segment.total = Some(total);
        segment.tempo = Some(tempo);
        segment.density = Some(density);
        segment.key = Some(key.to_string());
        segment.end_at = Some(segment.begin_at + time::beats_to_duration(total as f64, tempo));
        segment.updated_at = time::now();

        let choices = vec![
            macro_choice.to_segment_choice(segment.id, ProgramType::Macro),
            main_choice.to_segment_choice(segment.id, ProgramType::Main),
        ];

        let source_chords = self.content.sequence_chords(main_choice.sequence.id);
        let (aggregated, warnings) = aggregate_chords(total, &source_chords, main_choice.transpose);
        let chords = aggregated
            .into_iter()
            .map(|chord| SegmentChord {
                id: Uuid::new_v4(),
                segment_id: segment.id,
                position: chord.position,
                name: chord.name,
            })
            .collect();

        let meme_names: Vec<String> = self
            .binding_meme_names(macro_choice.binding.id)
            .into_iter()
            .chain(self.binding_meme_names(main_choice.binding.id))
            .chain(self.program_meme_names(main_choice.program.id))
            .collect();
        let memes = aggregate_memes(meme_names.iter().map(String::as_str))
            .into_iter()
            .map(|name| SegmentMeme {
                id: Uuid::new_v4(),
                segment_id: segment.id,
                name,
            })
            .collect();

        let messages = warnings
            .into_iter()
            .map(|body| SegmentMessage::new(segment.id, SegmentMessageType::Warning, body))
            .collect();

        Ok(Fabrication {
            segment,
            choices,
            memes,
            chords,
            messages,
        })
    }

    fn track_choice<'a>(
        &'a self,
        binding: &'a ProgramSequenceBinding,
        transpose: i32,
    ) -> CraftResult<TrackChoice<'a>> {
        let program = self.content.program(binding.program_id).ok_or_else(|| {
            CraftError::MissingContent(format!("program {}", binding.program_id))
        })?;
        let sequence = self
            .content
            .program_sequence(binding.program_sequence_id)
            .ok_or_else(|| {
                CraftError::MissingContent(format!(
                    "sequence {} of program '{}'",
                    binding.program_sequence_id, program.name
                ))
            })?;
        Ok(TrackChoice {
            program,
            binding,
            sequence,
            transpose,
        })
    }

    fn binding(&self, binding_id: Uuid) -> CraftResult<&ProgramSequenceBinding> {
        self.content
            .program_sequence_binding(binding_id)
            .ok_or_else(|| CraftError::MissingContent(format!("sequence binding {}", binding_id)))
    }

    fn binding_meme_names(&self, binding_id: Uuid) -> Vec<String> {
        self.content
            .sequence_binding_memes(binding_id)
            .into_iter()
            .map(|m| m.name.clone())
            .collect()
    }

    fn program_meme_names(&self, program_id: Uuid) -> Vec<String> {
        self.content
            .program_memes(program_id)
            .into_iter()
            .map(|m| m.name.clone())
            .collect()
    }
}

fn require_previous(previous: Option<&PreviousSegment>, segment_type: SegmentType) -> CraftResult<&PreviousSegment> {
    previous.ok_or_else(|| CraftError::Classification(format!("{} segment without a predecessor", segment_type)))
}

/// The chain's key as left by the previous segment
fn previous_key(previous: &PreviousSegment) -> CraftResult<Key> {
    let text = previous.segment.key.as_deref().ok_or_else(|| {
        CraftError::Classification(format!("preceding segment {} has no key", previous.segment.id))
    })?;
    text.parse::<Key>().map_err(|e| {
        CraftError::Classification(format!("preceding segment {} key '{}': {}", previous.segment.id, text, e))
    })
}

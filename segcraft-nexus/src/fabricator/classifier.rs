//! Fabrication type classification
//!
//! Classification depends only on the preceding segment's choices and the
//! bound offsets of the chosen programs. No randomness is involved.

use super::navigator::next_offset;
use crate::content::LibraryContent;
use crate::error::{CraftError, CraftResult};
use segcraft_common::models::{ProgramType, Segment, SegmentChoice, SegmentType};

/// The segment before the target, with what the fabricator needs from it
#[derive(Debug, Clone)]
pub struct PreviousSegment {
    pub segment: Segment,
    pub macro_choice: SegmentChoice,
    pub main_choice: SegmentChoice,
    pub memes: Vec<String>,
}

impl PreviousSegment {
    /// Pick the macro and main choices out of a segment's stored choices
    pub fn from_choices(segment: Segment, choices: Vec<SegmentChoice>, memes: Vec<String>) -> CraftResult<Self> {
        let find = |program_type: ProgramType| {
            choices
                .iter()
                .find(|c| c.program_type == program_type)
                .cloned()
                .ok_or_else(|| {
                    CraftError::Classification(format!(
                        "segment {} at offset {} has no {} choice",
                        segment.id, segment.offset, program_type
                    ))
                })
        };
        let macro_choice = find(ProgramType::Macro)?;
        let main_choice = find(ProgramType::Main)?;

        Ok(Self {
            segment,
            macro_choice,
            main_choice,
            memes,
        })
    }
}

/// Offset of the binding a choice points at
pub fn choice_offset(content: &dyn LibraryContent, choice: &SegmentChoice) -> CraftResult<i64> {
    content
        .program_sequence_binding(choice.program_sequence_binding_id)
        .map(|b| b.offset)
        .ok_or_else(|| {
            CraftError::MissingContent(format!(
                "sequence binding {} of {} program {}",
                choice.program_sequence_binding_id, choice.program_type, choice.program_id
            ))
        })
}

/// Decide how the target relates to its predecessor
pub fn classify(
    content: &dyn LibraryContent,
    target: &Segment,
    previous: Option<&PreviousSegment>,
) -> CraftResult<SegmentType> {
    let previous = match previous {
        None if target.offset == 0 => return Ok(SegmentType::Initial),
        None => {
            return Err(CraftError::Classification(format!(
                "segment at offset {} has no preceding segment",
                target.offset
            )))
        }
        Some(previous) => previous,
    };

    if previous.segment.offset + 1 != target.offset {
        return Err(CraftError::Classification(format!(
            "preceding segment is at offset {}, expected {}",
            previous.segment.offset,
            target.offset - 1
        )));
    }

    let main_offset = choice_offset(content, &previous.main_choice)?;
    if next_offset(content, previous.main_choice.program_id, main_offset).is_some() {
        return Ok(SegmentType::Continue);
    }

    let macro_offset = choice_offset(content, &previous.macro_choice)?;
    if next_offset(content, previous.macro_choice.program_id, macro_offset).is_some() {
        return Ok(SegmentType::NextMain);
    }

    Ok(SegmentType::NextMacro)
}

//! Sequence binding offsets within a program

use crate::content::LibraryContent;
use segcraft_common::models::ProgramSequenceBinding;
use uuid::Uuid;

/// Smallest bound offset strictly greater than `current`, or `None` at the end of the program
pub fn next_offset(content: &dyn LibraryContent, program_id: Uuid, current: i64) -> Option<i64> {
    content
        .program_sequence_bindings(program_id)
        .iter()
        .map(|b| b.offset)
        .filter(|offset| *offset > current)
        .min()
}

/// Smallest bound offset of the program
pub fn first_offset(content: &dyn LibraryContent, program_id: Uuid) -> Option<i64> {
    content
        .program_sequence_bindings(program_id)
        .iter()
        .map(|b| b.offset)
        .min()
}

/// Every binding of the program at exactly `offset`, in stable order
pub fn bindings_at<'a>(
    content: &'a dyn LibraryContent,
    program_id: Uuid,
    offset: i64,
) -> Vec<&'a ProgramSequenceBinding> {
    content
        .program_sequence_bindings(program_id)
        .into_iter()
        .filter(|b| b.offset == offset)
        .collect()
}

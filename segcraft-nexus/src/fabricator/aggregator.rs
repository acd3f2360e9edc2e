//! Chord and meme aggregation for one segment

use crate::content::normalize_meme;
use segcraft_common::models::ProgramSequenceChord;
use segcraft_common::Chord;
use std::collections::HashSet;

/// A chord ready to be stored on a segment
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedChord {
    pub position: f64,
    pub name: String,
}

/// Chords of the main sequence, truncated to its length and transposed
///
/// Chords at or past `total` beats are dropped, as are later duplicates of a
/// position. Unparseable chord names are skipped and reported in the returned
/// warnings rather than failing the segment.
pub fn aggregate_chords(
    total: i64,
    chords: &[&ProgramSequenceChord],
    transpose: i32,
) -> (Vec<AggregatedChord>, Vec<String>) {
    let limit = total as f64;
    let mut seen_positions: Vec<f64> = Vec::new();
    let mut aggregated = Vec::new();
    let mut warnings = Vec::new();

    for chord in chords {
        if !(chord.position >= 0.0 && chord.position < limit) {
            continue;
        }
        if seen_positions.iter().any(|p| *p == chord.position) {
            continue;
        }

        match chord.name.parse::<Chord>() {
            Ok(parsed) => {
                seen_positions.push(chord.position);
                aggregated.push(AggregatedChord {
                    position: chord.position,
                    name: parsed.transpose(transpose).to_string(),
                });
            }
            Err(e) => warnings.push(format!(
                "Skipped chord '{}' at position {}: {}",
                chord.name, chord.position, e
            )),
        }
    }

    aggregated.sort_by(|a, b| a.position.total_cmp(&b.position));
    (aggregated, warnings)
}

/// Deduplicated union of meme names, normalized, in first-seen order
pub fn aggregate_memes<'a>(names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .into_iter()
        .map(normalize_meme)
        .filter(|name| !name.is_empty())
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

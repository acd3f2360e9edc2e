//! Segments and the records fabricated for them
//!
//! A segment's state only moves along the edges `SegmentState::can_transition_to`
//! allows, and every store write checks the currently stored state first.

use super::library::ProgramType;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Segment craft state
///
/// ```text
/// Planned -> Crafting -> Crafted -> Dubbing -> Dubbed
///               |           |
///               +-> Failed <+
///                     |
///                     +-> Planned (requeue)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SegmentState {
    Planned,
    Crafting,
    Crafted,
    Dubbing,
    Dubbed,
    Failed,
}

text_enum!(SegmentState {
    Planned => "Planned",
    Crafting => "Crafting",
    Crafted => "Crafted",
    Dubbing => "Dubbing",
    Dubbed => "Dubbed",
    Failed => "Failed",
});

impl SegmentState {
    /// Whether a segment may move from `self` to `to`
    pub fn can_transition_to(&self, to: SegmentState) -> bool {
        use SegmentState::*;
        matches!(
            (self, to),
            (Planned, Crafting)
                | (Crafting, Crafted)
                | (Crafted, Dubbing)
                | (Dubbing, Dubbed)
                | (Crafting, Failed)
                | (Crafted, Failed)
                | (Failed, Planned)
        )
    }

    /// `can_transition_to` as a `Result`
    pub fn require_transition(&self, to: SegmentState) -> Result<()> {
        if self.can_transition_to(to) {
            Ok(())
        } else {
            Err(Error::InvalidTransition(format!("segment {} -> {}", self, to)))
        }
    }

    /// Craft has finished for this segment, so its successor may be crafted
    pub fn is_craft_terminal(&self) -> bool {
        matches!(self, SegmentState::Crafted | SegmentState::Dubbing | SegmentState::Dubbed)
    }
}

/// How a segment's choices relate to its predecessor's
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SegmentType {
    /// First segment of the chain
    Initial,
    /// Same macro and main programs, main advanced one offset
    Continue,
    /// Same macro program advanced one offset, new main program
    NextMain,
    /// New macro program and new main program
    NextMacro,
}

text_enum!(SegmentType {
    Initial => "Initial",
    Continue => "Continue",
    NextMain => "NextMain",
    NextMacro => "NextMacro",
});

/// One fabricated time-slice of a chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: Uuid,
    pub chain_id: Uuid,
    pub offset: i64,
    pub state: SegmentState,
    pub segment_type: Option<SegmentType>,
    pub begin_at: DateTime<Utc>,
    pub end_at: Option<DateTime<Utc>>,
    /// Rendered key, e.g. "G Minor"
    pub key: Option<String>,
    /// Length in beats
    pub total: Option<i64>,
    pub density: Option<f64>,
    pub tempo: Option<f64>,
    pub output_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Segment {
    /// A new Planned segment with no fabricated content
    pub fn planned(chain_id: Uuid, offset: i64, begin_at: DateTime<Utc>) -> Self {
        let now = crate::time::now();
        Self {
            id: Uuid::new_v4(),
            chain_id,
            offset,
            state: SegmentState::Planned,
            segment_type: None,
            begin_at,
            end_at: None,
            key: None,
            total: None,
            density: None,
            tempo: None,
            output_key: Self::output_key_for(chain_id, offset),
            created_at: now,
            updated_at: now,
        }
    }

    /// Reference downstream audio stages use for this segment
    pub fn output_key_for(chain_id: Uuid, offset: i64) -> String {
        format!("{}-{}", chain_id, offset)
    }
}

/// Which program and sequence binding a segment uses for one program type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentChoice {
    pub id: Uuid,
    pub segment_id: Uuid,
    pub program_id: Uuid,
    pub program_type: ProgramType,
    pub program_sequence_binding_id: Uuid,
    /// Semitones applied to the program's content
    pub transpose: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentMeme {
    pub id: Uuid,
    pub segment_id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentChord {
    pub id: Uuid,
    pub segment_id: Uuid,
    /// Beats from segment start
    pub position: f64,
    pub name: String,
}

/// Severity of a segment message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SegmentMessageType {
    Info,
    Warning,
    Error,
}

text_enum!(SegmentMessageType {
    Info => "Info",
    Warning => "Warning",
    Error => "Error",
});

/// Diagnostic note attached to a segment; survives revert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentMessage {
    pub id: Uuid,
    pub segment_id: Uuid,
    pub message_type: SegmentMessageType,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl SegmentMessage {
    pub fn new(segment_id: Uuid, message_type: SegmentMessageType, body: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            segment_id,
            message_type,
            body: body.into(),
            created_at: crate::time::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_path_is_allowed() {
        use SegmentState::*;
        let path = [Planned, Crafting, Crafted, Dubbing, Dubbed];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_failure_and_requeue() {
        use SegmentState::*;
        assert!(Crafting.can_transition_to(Failed));
        assert!(Crafted.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Planned));
    }

    #[test]
    fn test_no_backwards_or_skipping_edges() {
        use SegmentState::*;
        assert!(!Crafted.can_transition_to(Planned));
        assert!(!Dubbed.can_transition_to(Crafting));
        assert!(!Planned.can_transition_to(Crafted));
        assert!(!Dubbed.can_transition_to(Failed));
        assert!(!Planned.can_transition_to(Planned));
        assert!(Dubbed.require_transition(Planned).is_err());
    }

    #[test]
    fn test_craft_terminal_states() {
        use SegmentState::*;
        assert!(!Planned.is_craft_terminal());
        assert!(!Crafting.is_craft_terminal());
        assert!(!Failed.is_craft_terminal());
        assert!(Crafted.is_craft_terminal());
        assert!(Dubbing.is_craft_terminal());
        assert!(Dubbed.is_craft_terminal());
    }

    #[test]
    fn test_planned_segment_defaults() {
        let chain_id = Uuid::new_v4();
        let begin = crate::time::now();
        let segment = Segment::planned(chain_id, 3, begin);

        assert_eq!(segment.state, SegmentState::Planned);
        assert_eq!(segment.offset, 3);
        assert_eq!(segment.begin_at, begin);
        assert!(segment.end_at.is_none());
        assert_eq!(segment.output_key, format!("{}-3", chain_id));
    }

    #[test]
    fn test_segment_type_text() {
        assert_eq!(SegmentType::NextMacro.to_string(), "NextMacro");
        assert_eq!("Continue".parse::<SegmentType>().unwrap(), SegmentType::Continue);
    }
}

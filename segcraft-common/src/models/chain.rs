//! Chains and their library bindings

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Chain lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChainState {
    /// Created but not yet fabricating
    Draft,
    /// Supervisor is building segments
    Fabricate,
    /// Stop time reached; no further segments
    Complete,
    /// Abandoned, usually because a revived chain replaced it
    Failed,
}

text_enum!(ChainState {
    Draft => "Draft",
    Fabricate => "Fabricate",
    Complete => "Complete",
    Failed => "Failed",
});

impl ChainState {
    /// Whether a chain may move from `self` to `to`
    ///
    /// Identity is always allowed so repeated writes are harmless.
    pub fn can_transition_to(&self, to: ChainState) -> bool {
        use ChainState::*;
        *self == to
            || matches!(
                (self, to),
                (Draft, Fabricate) | (Fabricate, Complete) | (Fabricate, Failed) | (Complete, Failed)
            )
    }

    /// `can_transition_to` as a `Result`
    pub fn require_transition(&self, to: ChainState) -> Result<()> {
        if self.can_transition_to(to) {
            Ok(())
        } else {
            Err(Error::InvalidTransition(format!("chain {} -> {}", self, to)))
        }
    }

    /// States from which a stuck chain may be revived
    pub fn is_revivable(&self) -> bool {
        matches!(self, ChainState::Fabricate | ChainState::Complete | ChainState::Failed)
    }
}

/// Production chains are watched by the medic; previews are not
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChainType {
    Production,
    Preview,
}

text_enum!(ChainType {
    Production => "Production",
    Preview => "Preview",
});

/// What a chain binding points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChainBindingType {
    /// Every program in the library is a candidate
    Library,
    /// One program, preferred during candidate selection
    Program,
}

text_enum!(ChainBindingType {
    Library => "Library",
    Program => "Program",
});

/// An ordered, append-only stream of segments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chain {
    pub id: Uuid,
    pub name: String,
    pub chain_type: ChainType,
    pub state: ChainState,
    pub start_at: DateTime<Utc>,
    pub stop_at: Option<DateTime<Utc>>,
    /// Seconds of dubbed material ahead of wall-clock time, last measured by the supervisor
    pub fabricated_ahead_seconds: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Chain {
    /// New chain in Draft state
    pub fn new(
        name: impl Into<String>,
        chain_type: ChainType,
        start_at: DateTime<Utc>,
        stop_at: Option<DateTime<Utc>>,
    ) -> Self {
        let now = crate::time::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            chain_type,
            state: ChainState::Draft,
            start_at,
            stop_at,
            fabricated_ahead_seconds: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Link from a chain to a library or a single program
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainBinding {
    pub id: Uuid,
    pub chain_id: Uuid,
    pub binding_type: ChainBindingType,
    pub target_id: Uuid,
}

impl ChainBinding {
    pub fn new(chain_id: Uuid, binding_type: ChainBindingType, target_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            chain_id,
            binding_type,
            target_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_transitions() {
        assert!(ChainState::Draft.can_transition_to(ChainState::Fabricate));
        assert!(ChainState::Fabricate.can_transition_to(ChainState::Complete));
        assert!(ChainState::Fabricate.can_transition_to(ChainState::Failed));
        assert!(ChainState::Complete.can_transition_to(ChainState::Failed));
        assert!(ChainState::Fabricate.can_transition_to(ChainState::Fabricate));

        assert!(!ChainState::Complete.can_transition_to(ChainState::Fabricate));
        assert!(!ChainState::Failed.can_transition_to(ChainState::Fabricate));
        assert!(!ChainState::Draft.can_transition_to(ChainState::Complete));
    }

    #[test]
    fn test_require_transition_error() {
        let err = ChainState::Failed.require_transition(ChainState::Draft).unwrap_err();
        assert!(err.to_string().contains("Failed -> Draft"));
    }

    #[test]
    fn test_revivable_states() {
        assert!(!ChainState::Draft.is_revivable());
        assert!(ChainState::Fabricate.is_revivable());
        assert!(ChainState::Complete.is_revivable());
        assert!(ChainState::Failed.is_revivable());
    }

    #[test]
    fn test_text_round_trip() {
        for state in ChainState::ALL {
            assert_eq!(state.as_str().parse::<ChainState>().unwrap(), *state);
        }
        assert!("Running".parse::<ChainState>().is_err());
        assert_eq!("Preview".parse::<ChainType>().unwrap(), ChainType::Preview);
    }
}

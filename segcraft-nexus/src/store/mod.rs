//! Chain and segment persistence contracts
//!
//! The craft pipeline and supervisor only see these traits; the SQLite
//! implementations live in [`segments`] and [`chains`]. Every segment state
//! change is a compare-and-swap on the stored state: a write whose expected
//! state no longer matches affects no rows and reports `false`.

pub mod chains;
pub mod segments;

pub use chains::SqliteChainStore;
pub use segments::SqliteSegmentStore;

use crate::fabricator::Fabrication;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use segcraft_common::models::{
    Chain, ChainBinding, ChainState, Segment, SegmentChoice, SegmentChord, SegmentMeme,
    SegmentMessage, SegmentState,
};
use segcraft_common::Result;
use uuid::Uuid;

#[async_trait]
pub trait SegmentStore: Send + Sync {
    /// Fails with `NotFound` when absent
    async fn read_segment(&self, segment_id: Uuid) -> Result<Segment>;

    async fn read_segment_at(&self, chain_id: Uuid, offset: i64) -> Result<Option<Segment>>;

    /// The segment at `offset - 1`, if any
    async fn read_preceding_segment(&self, chain_id: Uuid, offset: i64) -> Result<Option<Segment>>;

    /// Highest-offset segment of the chain
    async fn read_last_segment(&self, chain_id: Uuid) -> Result<Option<Segment>>;

    /// Highest-offset segment of the chain in `state`
    async fn read_last_segment_in_state(&self, chain_id: Uuid, state: SegmentState) -> Result<Option<Segment>>;

    /// Every segment of the chain in offset order
    async fn read_segments(&self, chain_id: Uuid) -> Result<Vec<Segment>>;

    async fn read_choices_for_segment(&self, segment_id: Uuid) -> Result<Vec<SegmentChoice>>;

    async fn read_memes_for_segment(&self, segment_id: Uuid) -> Result<Vec<SegmentMeme>>;

    async fn read_chords_for_segment(&self, segment_id: Uuid) -> Result<Vec<SegmentChord>>;

    async fn read_messages_for_segment(&self, segment_id: Uuid) -> Result<Vec<SegmentMessage>>;

    async fn create_segment(&self, segment: &Segment) -> Result<()>;

    /// Move `expected -> new` only if the stored state is still `expected`
    ///
    /// Returns whether the write took effect. Edges the state machine forbids
    /// are rejected with `InvalidTransition` before touching the store.
    async fn cas_update_segment_state(&self, segment_id: Uuid, expected: SegmentState, new: SegmentState) -> Result<bool>;

    /// Write fabricated fields and child records, moving Crafting -> Crafted
    ///
    /// All or nothing: when the segment is no longer Crafting nothing is
    /// written and `false` is returned.
    async fn commit_fabrication(&self, fabrication: &Fabrication) -> Result<bool>;

    /// Delete choices, memes and chords and return the segment to Planned
    ///
    /// Passes through Failed, clearing fabricated fields. Messages are kept.
    /// Returns `false` when the segment is not in a revertible state.
    async fn revert_segment(&self, segment_id: Uuid) -> Result<bool>;

    async fn create_segment_message(&self, message: &SegmentMessage) -> Result<()>;
}

#[async_trait]
pub trait ChainStore: Send + Sync {
    async fn create_chain(&self, chain: &Chain, bindings: &[ChainBinding]) -> Result<()>;

    /// Fails with `NotFound` when absent
    async fn read_chain(&self, chain_id: Uuid) -> Result<Chain>;

    async fn list_chains_in_state(&self, state: ChainState) -> Result<Vec<Chain>>;

    /// Checked transition; fails with `InvalidTransition` for forbidden edges
    async fn update_chain_state(&self, chain_id: Uuid, state: ChainState) -> Result<Chain>;

    async fn read_bindings(&self, chain_id: Uuid) -> Result<Vec<ChainBinding>>;

    async fn update_fabricated_ahead(&self, chain_id: Uuid, seconds: f64) -> Result<()>;

    /// Replace a stuck chain with a copy starting at `at_time`
    ///
    /// The copy keeps name, type, stop time and bindings, and is created
    /// directly in Fabricate. The original is marked Failed. Both happen in
    /// one transaction.
    async fn create_revived_chain(&self, from_chain_id: Uuid, at_time: DateTime<Utc>) -> Result<Chain>;
}

//! Craft pipeline: claim, fabricate, commit, or revert
//!
//! A craft attempt claims the segment with a Planned -> Crafting swap, so at
//! most one concurrent attempt per segment gets past the claim. Fabrication
//! and persistence failures put the segment back to Planned with no child
//! records, leaving an Error message behind for operators.

use crate::access::Access;
use crate::error::{CraftError, CraftResult};
use crate::fabricator::Fabricator;
use crate::store::SegmentStore;
use segcraft_common::models::{Segment, SegmentMessage, SegmentMessageType, SegmentState};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct CraftPipeline {
    segments: Arc<dyn SegmentStore>,
    fabricator: Fabricator,
}

impl CraftPipeline {
    pub fn new(segments: Arc<dyn SegmentStore>, fabricator: Fabricator) -> Self {
        Self { segments, fabricator }
    }

    /// Craft one Planned segment, returning it as stored in Crafted
    pub async fn craft(&self, access: &Access, target: &Segment) -> CraftResult<Segment> {
        access.require_internal()?;
        self.require_predecessor_crafted(target).await?;

        let claimed = self
            .segments
            .cas_update_segment_state(target.id, SegmentState::Planned, SegmentState::Crafting)
            .await?;
        if !claimed {
            debug!(segment_id = %target.id, offset = target.offset, "Segment already claimed");
            return Err(CraftError::OptimisticConflict(format!(
                "segment {} is no longer Planned",
                target.id
            )));
        }

        match self.fabricate_and_commit(access, target).await {
            Ok(segment) => {
                info!(
                    chain_id = %segment.chain_id,
                    segment_id = %segment.id,
                    offset = segment.offset,
                    segment_type = ?segment.segment_type,
                    key = ?segment.key,
                    total = ?segment.total,
                    "Crafted segment"
                );
                Ok(segment)
            }
            Err(e) if e.triggers_revert() => {
                self.revert(target, &e).await;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn require_predecessor_crafted(&self, target: &Segment) -> CraftResult<()> {
        if target.offset == 0 {
            return Ok(());
        }
        match self
            .segments
            .read_preceding_segment(target.chain_id, target.offset)
            .await?
        {
            Some(previous) if previous.state.is_craft_terminal() => Ok(()),
            Some(previous) => Err(CraftError::OutOfOrder(format!(
                "segment at offset {} is {}",
                previous.offset, previous.state
            ))),
            None => Err(CraftError::OutOfOrder(format!(
                "no segment at offset {}",
                target.offset - 1
            ))),
        }
    }

    async fn fabricate_and_commit(&self, access: &Access, target: &Segment) -> CraftResult<Segment> {
        let fabrication = self.fabricator.fabricate(access, target).await?;

        if !self.segments.commit_fabrication(&fabrication).await? {
            return Err(CraftError::OptimisticConflict(format!(
                "segment {} left Crafting before commit",
                target.id
            )));
        }

        // Committed: a failed re-read must not trigger a revert
        match self.segments.read_segment(target.id).await {
            Ok(stored) => Ok(stored),
            Err(e) => {
                warn!(segment_id = %target.id, "Crafted segment could not be re-read: {}", e);
                let mut crafted = fabrication.segment;
                crafted.state = SegmentState::Crafted;
                Ok(crafted)
            }
        }
    }

    /// Record the failure and return the segment to Planned
    ///
    /// Failures here are logged, not returned; the caller reports the
    /// original error.
    async fn revert(&self, target: &Segment, cause: &CraftError) {
        error!(
            chain_id = %target.chain_id,
            segment_id = %target.id,
            offset = target.offset,
            "Craft failed, reverting: {}",
            cause
        );

        let message = SegmentMessage::new(target.id, SegmentMessageType::Error, cause.to_string());
        if let Err(e) = self.segments.create_segment_message(&message).await {
            warn!(segment_id = %target.id, "Failed to record craft failure message: {}", e);
        }

        match self.segments.revert_segment(target.id).await {
            Ok(true) => debug!(segment_id = %target.id, "Segment returned to Planned"),
            Ok(false) => warn!(segment_id = %target.id, "Segment was not in a revertible state"),
            Err(e) => error!(segment_id = %target.id, "Failed to revert segment: {}", e),
        }
    }
}

//! Dub hand-off after crafting
//!
//! Audio rendering happens elsewhere. The supervisor only needs to know when
//! a crafted segment has been taken over by the audio stage.

use async_trait::async_trait;
use segcraft_common::models::Segment;
use segcraft_common::Result;
use tracing::debug;

#[async_trait]
pub trait Dubber: Send + Sync {
    /// Hand a crafted segment to the audio stage
    async fn dub(&self, segment: &Segment) -> Result<()>;
}

/// Accepts every segment immediately
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughDubber;

#[async_trait]
impl Dubber for PassthroughDubber {
    async fn dub(&self, segment: &Segment) -> Result<()> {
        debug!(segment_id = %segment.id, output_key = %segment.output_key, "Dub pass-through");
        Ok(())
    }
}

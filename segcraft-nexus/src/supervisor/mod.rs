//! Chain supervisor
//!
//! Each cycle visits every chain in Fabricate and takes at most one step per
//! chain: craft the next Planned segment, dub a Crafted one, plan the next
//! offset, or complete the chain once its stop time is covered. Chains are
//! worked concurrently up to `max_concurrent_chains`; they share no mutable
//! state beyond the source material cache.
//!
//! The medic half ([`medic`]) runs on its own interval and revives chains that
//! have stopped making progress.

pub mod dub;
pub mod medic;

pub use dub::{Dubber, PassthroughDubber};

use crate::access::Access;
use crate::content::{ContentSource, LibraryContent, SourceMaterial};
use crate::craft::CraftPipeline;
use crate::error::{CraftError, CraftResult};
use crate::fabricator::memes::{ExclusiveMemePolicy, MemeCompatibility};
use crate::fabricator::Fabricator;
use crate::settings::NexusSettings;
use crate::store::{ChainStore, SegmentStore};
use chrono::{DateTime, Utc};
use segcraft_common::models::{Chain, ChainState, Segment, SegmentMessage, SegmentMessageType, SegmentState};
use segcraft_common::{time, Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// When the supervisor last finished a cycle, for the health endpoint
#[derive(Debug, Clone, Default)]
pub struct HealthTracker {
    last_cycle_at: Arc<RwLock<Option<DateTime<Utc>>>>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_cycle(&self, at: DateTime<Utc>) {
        *self.last_cycle_at.write().await = Some(at);
    }

    pub async fn last_cycle_at(&self) -> Option<DateTime<Utc>> {
        *self.last_cycle_at.read().await
    }

    /// No completed cycle within `threshold_seconds` of `now`
    pub async fn is_stale(&self, now: DateTime<Utc>, threshold_seconds: i64) -> bool {
        match self.last_cycle_at().await {
            Some(at) => time::seconds_between(&at, &now) > threshold_seconds as f64,
            None => true,
        }
    }
}

/// What one cycle did to one chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainStep {
    Crafted,
    Dubbed,
    Completed,
    /// Enough material is already fabricated
    Ahead,
    /// Another stage owns the last segment
    Waiting,
}

type IngestCache = HashMap<Uuid, (DateTime<Utc>, Arc<SourceMaterial>)>;

#[derive(Clone)]
pub struct Supervisor {
    chains: Arc<dyn ChainStore>,
    segments: Arc<dyn SegmentStore>,
    source: Arc<dyn ContentSource>,
    memes: Arc<dyn MemeCompatibility>,
    dubber: Arc<dyn Dubber>,
    settings: Arc<NexusSettings>,
    health: HealthTracker,
    ingested: Arc<Mutex<IngestCache>>,
}

impl Supervisor {
    pub fn new(
        chains: Arc<dyn ChainStore>,
        segments: Arc<dyn SegmentStore>,
        source: Arc<dyn ContentSource>,
        dubber: Arc<dyn Dubber>,
        settings: NexusSettings,
        health: HealthTracker,
    ) -> Self {
        let memes: Arc<dyn MemeCompatibility> = Arc::new(ExclusiveMemePolicy::new(&settings.meme_exclusive_groups));
        Self {
            chains,
            segments,
            source,
            memes,
            dubber,
            settings: Arc::new(settings),
            health,
            ingested: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Replace the meme policy built from settings
    pub fn with_meme_policy(mut self, memes: Arc<dyn MemeCompatibility>) -> Self {
        self.memes = memes;
        self
    }

    pub fn health(&self) -> &HealthTracker {
        &self.health
    }

    /// Take one step on every chain in Fabricate
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<()> {
        let chains = self.chains.list_chains_in_state(ChainState::Fabricate).await?;
        debug!("Supervisor cycle over {} chains", chains.len());

        let permits = Arc::new(Semaphore::new(self.settings.max_concurrent_chains.max(1)));
        let mut workers = JoinSet::new();

        for chain in chains {
            let permit = permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| Error::Internal(format!("Chain worker semaphore closed: {}", e)))?;
            let supervisor = self.clone();

            workers.spawn(async move {
                let _permit = permit;
                let chain_id = chain.id;
                match supervisor.work_chain(chain, now).await {
                    Ok(step) => debug!(chain_id = %chain_id, ?step, "Chain step"),
                    Err(CraftError::OptimisticConflict(reason)) => {
                        debug!(chain_id = %chain_id, "Skipped contested segment: {}", reason)
                    }
                    Err(e) => warn!(chain_id = %chain_id, "Chain step failed: {}", e),
                }
            });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("Chain worker aborted: {}", e);
            }
        }

        self.health.record_cycle(now).await;
        Ok(())
    }

    /// One step on one chain
    pub async fn work_chain(&self, chain: Chain, now: DateTime<Utc>) -> CraftResult<ChainStep> {
        let ahead = self.fabricated_ahead(&chain, now).await?;
        self.chains.update_fabricated_ahead(chain.id, ahead).await?;

        let target = match self.segments.read_last_segment(chain.id).await? {
            None => {
                let segment = Segment::planned(chain.id, 0, chain.start_at);
                self.segments.create_segment(&segment).await?;
                segment
            }
            Some(last) => match last.state {
                SegmentState::Planned => last,
                SegmentState::Crafting | SegmentState::Dubbing | SegmentState::Failed => {
                    return Ok(ChainStep::Waiting);
                }
                SegmentState::Crafted => {
                    self.dub(&last).await?;
                    return Ok(ChainStep::Dubbed);
                }
                SegmentState::Dubbed => {
                    let end_at = last.end_at.ok_or_else(|| {
                        CraftError::Classification(format!("dubbed segment {} has no end time", last.id))
                    })?;

                    if let Some(stop_at) = chain.stop_at {
                        if stop_at <= end_at || now >= stop_at {
                            self.complete(&chain).await?;
                            return Ok(ChainStep::Completed);
                        }
                    }
                    if ahead >= self.settings.buffer_ahead_seconds {
                        return Ok(ChainStep::Ahead);
                    }

                    let segment = Segment::planned(chain.id, last.offset + 1, end_at);
                    self.segments.create_segment(&segment).await?;
                    segment
                }
            },
        };

        let crafted = self.craft(&chain, &target, now).await?;
        self.dub(&crafted).await?;
        Ok(ChainStep::Crafted)
    }

    /// Seconds of dubbed material past `now`; negative when behind
    async fn fabricated_ahead(&self, chain: &Chain, now: DateTime<Utc>) -> Result<f64> {
        let horizon = self
            .segments
            .read_last_segment_in_state(chain.id, SegmentState::Dubbed)
            .await?
            .and_then(|s| s.end_at)
            .unwrap_or(chain.start_at);
        Ok(time::seconds_between(&now, &horizon))
    }

    async fn craft(&self, chain: &Chain, segment: &Segment, now: DateTime<Utc>) -> CraftResult<Segment> {
        let content: Arc<dyn LibraryContent> = self.source_material(chain, now).await?;
        let fabricator = Fabricator::new(self.segments.clone(), content, self.memes.clone());
        CraftPipeline::new(self.segments.clone(), fabricator)
            .craft(&Access::internal(), segment)
            .await
    }

    /// Crafted -> Dubbing -> Dubbed; a failed dub stays in Dubbing
    async fn dub(&self, segment: &Segment) -> Result<()> {
        if !self
            .segments
            .cas_update_segment_state(segment.id, SegmentState::Crafted, SegmentState::Dubbing)
            .await?
        {
            debug!(segment_id = %segment.id, "Segment already taken for dubbing");
            return Ok(());
        }

        match self.dubber.dub(segment).await {
            Ok(()) => {
                if self
                    .segments
                    .cas_update_segment_state(segment.id, SegmentState::Dubbing, SegmentState::Dubbed)
                    .await?
                {
                    debug!(segment_id = %segment.id, offset = segment.offset, "Dubbed segment");
                }
            }
            Err(e) => {
                error!(segment_id = %segment.id, offset = segment.offset, "Dub failed: {}", e);
                let message = SegmentMessage::new(segment.id, SegmentMessageType::Error, format!("Dub failed: {}", e));
                self.segments.create_segment_message(&message).await?;
            }
        }
        Ok(())
    }

    async fn complete(&self, chain: &Chain) -> Result<()> {
        self.chains.update_chain_state(chain.id, ChainState::Complete).await?;
        self.evict(chain.id).await;
        info!(chain_id = %chain.id, name = %chain.name, "Chain complete");
        Ok(())
    }

    /// Cached snapshot of the chain's library content, refreshed every `ingest_cycle_seconds`
    async fn source_material(&self, chain: &Chain, now: DateTime<Utc>) -> Result<Arc<SourceMaterial>> {
        if let Some((ingested_at, material)) = self.ingested.lock().await.get(&chain.id) {
            if time::seconds_between(ingested_at, &now) < self.settings.ingest_cycle_seconds as f64 {
                return Ok(material.clone());
            }
        }

        let bindings = self.chains.read_bindings(chain.id).await?;
        let material = Arc::new(self.source.ingest(&bindings).await?);
        info!(
            chain_id = %chain.id,
            bindings = bindings.len(),
            programs = material.program_count(),
            "Refreshed source material snapshot"
        );

        self.ingested.lock().await.insert(chain.id, (now, material.clone()));
        Ok(material)
    }

    async fn evict(&self, chain_id: Uuid) {
        self.ingested.lock().await.remove(&chain_id);
    }

    /// Run cycles until cancelled
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        info!(
            "Starting chain supervisor (cycle: {} ms, buffer: {} s)",
            self.settings.supervisor_cycle_ms, self.settings.buffer_ahead_seconds
        );

        tokio::spawn(async move {
            let mut timer = interval(self.settings.supervisor_cycle());
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Chain supervisor stopped");
                        break;
                    }
                    _ = timer.tick() => {
                        if let Err(e) = self.run_cycle(time::now()).await {
                            error!("Supervisor cycle failed: {}", e);
                        }
                    }
                }
            }
        })
    }
}

//! Stale chain detection and revival
//!
//! A chain is stuck when its last segment has sat outside Dubbed for longer
//! than `stale_segment_threshold_seconds`, or when a production chain past
//! its grace period has fallen behind real time. Stuck chains are not
//! retried; they are replaced by a revived copy and marked Failed.

use super::Supervisor;
use chrono::{DateTime, Duration, Utc};
use segcraft_common::models::{Chain, ChainState, ChainType, SegmentState};
use segcraft_common::{time, Result};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

impl Supervisor {
    /// Revive every stuck chain in Fabricate, returning the new chains
    pub async fn revive_stuck_chains(&self, now: DateTime<Utc>) -> Result<Vec<Chain>> {
        let chains = self.chains.list_chains_in_state(ChainState::Fabricate).await?;
        let mut revived = Vec::new();

        for chain in chains {
            let Some(reason) = self.diagnose(&chain, now).await? else {
                continue;
            };

            warn!(chain_id = %chain.id, name = %chain.name, "Chain is stuck: {}", reason);
            let start_at = now + Duration::seconds(self.settings.chain_start_in_future_seconds);

            match self.chains.create_revived_chain(chain.id, start_at).await {
                Ok(replacement) => {
                    self.evict(chain.id).await;
                    revived.push(replacement);
                }
                Err(e) => error!(chain_id = %chain.id, "Failed to revive chain: {}", e),
            }
        }

        Ok(revived)
    }

    /// Why a chain counts as stuck, if it does
    async fn diagnose(&self, chain: &Chain, now: DateTime<Utc>) -> Result<Option<String>> {
        if let Some(last) = self.segments.read_last_segment(chain.id).await? {
            let idle = time::seconds_between(&last.updated_at, &now);
            if last.state != SegmentState::Dubbed && idle > self.settings.stale_segment_threshold_seconds as f64 {
                return Ok(Some(format!(
                    "segment at offset {} has been {} for {:.0}s",
                    last.offset, last.state, idle
                )));
            }
        }

        if chain.chain_type == ChainType::Production
            && time::seconds_between(&chain.start_at, &now) > self.settings.revive_chain_grace_seconds as f64
        {
            if let Some(ahead) = chain.fabricated_ahead_seconds {
                if ahead < self.settings.revive_fabricated_behind_seconds {
                    return Ok(Some(format!("fabrication is {:.0}s behind real time", -ahead)));
                }
            }
        }

        Ok(None)
    }

    /// Run medic passes until cancelled
    pub fn spawn_medic(self, cancel: CancellationToken) -> JoinHandle<()> {
        info!("Starting chain medic (cycle: {} s)", self.settings.medic_cycle_seconds);

        tokio::spawn(async move {
            let mut timer = interval(self.settings.medic_cycle());
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Chain medic stopped");
                        break;
                    }
                    _ = timer.tick() => {
                        match self.revive_stuck_chains(time::now()).await {
                            Ok(revived) if !revived.is_empty() => info!("Medic revived {} chains", revived.len()),
                            Ok(_) => debug!("Medic found no stuck chains"),
                            Err(e) => error!("Medic pass failed: {}", e),
                        }
                    }
                }
            }
        })
    }
}

//! Service tuning loaded from the settings table
//!
//! Every value falls back to its default when the row is absent or cannot be
//! parsed, so a damaged settings table degrades to stock behavior instead of
//! stopping the service.

use segcraft_common::db::get_setting;
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct NexusSettings {
    /// Supervisor cycle period
    pub supervisor_cycle_ms: u64,
    /// Stop building new segments once this much dubbed material lies ahead
    pub buffer_ahead_seconds: f64,
    /// Revived chains start this far after the revival time
    pub chain_start_in_future_seconds: i64,
    /// A non-dubbed last segment untouched for this long marks its chain stuck
    pub stale_segment_threshold_seconds: i64,
    /// Fabricated-ahead stalls are ignored for chains younger than this
    pub revive_chain_grace_seconds: i64,
    /// Fabricated-ahead below this (negative: behind real time) marks a stall
    pub revive_fabricated_behind_seconds: f64,
    pub medic_cycle_seconds: u64,
    /// Source material snapshots are refreshed at most this often
    pub ingest_cycle_seconds: i64,
    pub max_concurrent_chains: usize,
    /// /health reports stale when no cycle completed within this window
    pub health_staleness_threshold_seconds: i64,
    pub db_max_lock_wait_ms: u64,
    /// Groups of memes that may not co-occur across successive segments
    pub meme_exclusive_groups: Vec<Vec<String>>,
}

impl Default for NexusSettings {
    fn default() -> Self {
        Self {
            supervisor_cycle_ms: 1000,
            buffer_ahead_seconds: 300.0,
            chain_start_in_future_seconds: 0,
            stale_segment_threshold_seconds: 300,
            revive_chain_grace_seconds: 600,
            revive_fabricated_behind_seconds: -60.0,
            medic_cycle_seconds: 30,
            ingest_cycle_seconds: 60,
            max_concurrent_chains: 4,
            health_staleness_threshold_seconds: 60,
            db_max_lock_wait_ms: 5000,
            meme_exclusive_groups: Vec::new(),
        }
    }
}

impl NexusSettings {
    /// Load settings from database
    pub async fn from_database(pool: &SqlitePool) -> Self {
        let defaults = Self::default();

        let meme_exclusive_groups = match load::<String>(pool, "meme_exclusive_groups").await {
            Some(json) => serde_json::from_str::<Vec<Vec<String>>>(&json).unwrap_or_else(|e| {
                warn!("Ignoring malformed meme_exclusive_groups setting: {}", e);
                defaults.meme_exclusive_groups.clone()
            }),
            None => defaults.meme_exclusive_groups.clone(),
        };

        Self {
            supervisor_cycle_ms: load(pool, "supervisor_cycle_ms")
                .await
                .filter(|ms| *ms > 0)
                .unwrap_or(defaults.supervisor_cycle_ms),
            buffer_ahead_seconds: load(pool, "buffer_ahead_seconds")
                .await
                .unwrap_or(defaults.buffer_ahead_seconds),
            chain_start_in_future_seconds: load(pool, "chain_start_in_future_seconds")
                .await
                .unwrap_or(defaults.chain_start_in_future_seconds),
            stale_segment_threshold_seconds: load(pool, "stale_segment_threshold_seconds")
                .await
                .unwrap_or(defaults.stale_segment_threshold_seconds),
            revive_chain_grace_seconds: load(pool, "revive_chain_grace_seconds")
                .await
                .unwrap_or(defaults.revive_chain_grace_seconds),
            revive_fabricated_behind_seconds: load(pool, "revive_fabricated_behind_seconds")
                .await
                .unwrap_or(defaults.revive_fabricated_behind_seconds),
            medic_cycle_seconds: load(pool, "medic_cycle_seconds")
                .await
                .filter(|s| *s > 0)
                .unwrap_or(defaults.medic_cycle_seconds),
            ingest_cycle_seconds: load(pool, "ingest_cycle_seconds")
                .await
                .unwrap_or(defaults.ingest_cycle_seconds),
            max_concurrent_chains: load(pool, "max_concurrent_chains")
                .await
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_concurrent_chains),
            health_staleness_threshold_seconds: load(pool, "health_staleness_threshold_seconds")
                .await
                .unwrap_or(defaults.health_staleness_threshold_seconds),
            db_max_lock_wait_ms: load(pool, "db_max_lock_wait_ms")
                .await
                .unwrap_or(defaults.db_max_lock_wait_ms),
            meme_exclusive_groups,
        }
    }

    pub fn supervisor_cycle(&self) -> Duration {
        Duration::from_millis(self.supervisor_cycle_ms)
    }

    pub fn medic_cycle(&self) -> Duration {
        Duration::from_secs(self.medic_cycle_seconds)
    }
}

async fn load<T: FromStr>(pool: &SqlitePool, key: &str) -> Option<T> {
    match get_setting::<T>(pool, key).await {
        Ok(value) => value,
        Err(e) => {
            warn!("Using default for setting '{}': {}", key, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use segcraft_common::db::{init_database, set_setting};

    #[test]
    fn test_defaults() {
        let settings = NexusSettings::default();
        assert_eq!(settings.supervisor_cycle(), Duration::from_secs(1));
        assert_eq!(settings.buffer_ahead_seconds, 300.0);
        assert_eq!(settings.revive_fabricated_behind_seconds, -60.0);
        assert!(settings.meme_exclusive_groups.is_empty());
    }

    #[tokio::test]
    async fn test_from_database_reads_overrides_and_falls_back() {
        let dir = tempfile::TempDir::new().unwrap();
        let pool = init_database(&dir.path().join("segcraft.db")).await.unwrap();

        set_setting(&pool, "buffer_ahead_seconds", 45).await.unwrap();
        set_setting(&pool, "max_concurrent_chains", "lots").await.unwrap();
        set_setting(&pool, "meme_exclusive_groups", r#"[["WILD","CALM"]]"#).await.unwrap();

        let settings = NexusSettings::from_database(&pool).await;

        assert_eq!(settings.buffer_ahead_seconds, 45.0);
        assert_eq!(settings.max_concurrent_chains, 4);
        assert_eq!(
            settings.meme_exclusive_groups,
            vec![vec!["WILD".to_string(), "CALM".to_string()]]
        );
    }
}

//! SQLite chain store

use super::ChainStore;
use crate::utils::retry_on_lock;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use segcraft_common::models::{Chain, ChainBinding, ChainState};
use segcraft_common::{time, uuid_utils, Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::{info, warn};
use uuid::Uuid;

const CHAIN_COLUMNS: &str =
    "id, name, type, state, start_at, stop_at, fabricated_ahead_seconds, created_at, updated_at";

#[derive(Clone)]
pub struct SqliteChainStore {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl SqliteChainStore {
    pub fn new(pool: SqlitePool, max_lock_wait_ms: u64) -> Self {
        Self { pool, max_lock_wait_ms }
    }

    async fn try_update_state(&self, chain_id: Uuid, state: ChainState) -> Result<Chain> {
        let current = self.read_chain(chain_id).await?;
        current.state.require_transition(state)?;
        if current.state == state {
            return Ok(current);
        }

        let updated = sqlx::query("UPDATE chains SET state = ?, updated_at = ? WHERE id = ? AND state = ?")
            .bind(state.as_str())
            .bind(time::format_ts(&time::now()))
            .bind(chain_id.to_string())
            .bind(current.state.as_str())
            .execute(&self.pool)
            .await?
            .rows_affected();

        if updated == 0 {
            return Err(Error::InvalidTransition(format!(
                "chain {} changed state concurrently (expected {})",
                chain_id, current.state
            )));
        }

        info!(chain_id = %chain_id, from = %current.state, to = %state, "Chain state changed");
        self.read_chain(chain_id).await
    }

    async fn try_revive(&self, from_chain_id: Uuid, at_time: DateTime<Utc>) -> Result<Chain> {
        let mut tx = self.pool.begin().await?;

        let sql = format!("SELECT {} FROM chains WHERE id = ?", CHAIN_COLUMNS);
        let prior = sqlx::query(&sql)
            .bind(from_chain_id.to_string())
            .fetch_optional(&mut *tx)
            .await?
            .as_ref()
            .map(chain_from_row)
            .transpose()?
            .ok_or_else(|| Error::NotFound(format!("chain {}", from_chain_id)))?;

        if !prior.state.is_revivable() {
            return Err(Error::InvalidTransition(format!(
                "chain {} cannot be revived from {}",
                from_chain_id, prior.state
            )));
        }

        let bindings = read_bindings_in(&mut tx, from_chain_id).await?;

        let now = time::now();
        let revived = Chain {
            id: Uuid::new_v4(),
            name: prior.name.clone(),
            chain_type: prior.chain_type,
            state: ChainState::Fabricate,
            start_at: at_time,
            stop_at: prior.stop_at,
            fabricated_ahead_seconds: None,
            created_at: now,
            updated_at: now,
        };
        let revived_bindings: Vec<ChainBinding> = bindings
            .iter()
            .map(|b| ChainBinding::new(revived.id, b.binding_type, b.target_id))
            .collect();

        insert_chain(&mut tx, &revived, &revived_bindings).await?;

        if prior.state != ChainState::Failed {
            prior.state.require_transition(ChainState::Failed)?;
            let updated = sqlx::query("UPDATE chains SET state = ?, updated_at = ? WHERE id = ? AND state = ?")
                .bind(ChainState::Failed.as_str())
                .bind(time::format_ts(&now))
                .bind(from_chain_id.to_string())
                .bind(prior.state.as_str())
                .execute(&mut *tx)
                .await?
                .rows_affected();
            if updated == 0 {
                return Err(Error::InvalidTransition(format!(
                    "chain {} changed state during revival",
                    from_chain_id
                )));
            }
        }

        tx.commit().await?;

        warn!(
            prior_chain_id = %from_chain_id,
            revived_chain_id = %revived.id,
            start_at = %time::format_ts(&revived.start_at),
            "Revived chain"
        );
        Ok(revived)
    }
}

#[async_trait]
impl ChainStore for SqliteChainStore {
    async fn create_chain(&self, chain: &Chain, bindings: &[ChainBinding]) -> Result<()> {
        retry_on_lock("create_chain", self.max_lock_wait_ms, || async {
            let mut tx = self.pool.begin().await?;
            insert_chain(&mut tx, chain, bindings).await?;
            tx.commit().await?;
            Ok(())
        })
        .await?;

        info!(chain_id = %chain.id, state = %chain.state, "Created chain '{}'", chain.name);
        Ok(())
    }

    async fn read_chain(&self, chain_id: Uuid) -> Result<Chain> {
        let sql = format!("SELECT {} FROM chains WHERE id = ?", CHAIN_COLUMNS);
        sqlx::query(&sql)
            .bind(chain_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(chain_from_row)
            .transpose()?
            .ok_or_else(|| Error::NotFound(format!("chain {}", chain_id)))
    }

    async fn list_chains_in_state(&self, state: ChainState) -> Result<Vec<Chain>> {
        let sql = format!("SELECT {} FROM chains WHERE state = ? ORDER BY start_at, id", CHAIN_COLUMNS);
        sqlx::query(&sql)
            .bind(state.as_str())
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(chain_from_row)
            .collect()
    }

    async fn update_chain_state(&self, chain_id: Uuid, state: ChainState) -> Result<Chain> {
        retry_on_lock("update_chain_state", self.max_lock_wait_ms, || self.try_update_state(chain_id, state)).await
    }

    async fn read_bindings(&self, chain_id: Uuid) -> Result<Vec<ChainBinding>> {
        let rows = sqlx::query("SELECT id, chain_id, type, target_id FROM chain_bindings WHERE chain_id = ? ORDER BY id")
            .bind(chain_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(binding_from_row).collect()
    }

    async fn update_fabricated_ahead(&self, chain_id: Uuid, seconds: f64) -> Result<()> {
        retry_on_lock("update_fabricated_ahead", self.max_lock_wait_ms, || async {
            sqlx::query("UPDATE chains SET fabricated_ahead_seconds = ? WHERE id = ?")
                .bind(seconds)
                .bind(chain_id.to_string())
                .execute(&self.pool)
                .await?;
            Ok(())
        })
        .await
    }

    async fn create_revived_chain(&self, from_chain_id: Uuid, at_time: DateTime<Utc>) -> Result<Chain> {
        retry_on_lock("create_revived_chain", self.max_lock_wait_ms, || self.try_revive(from_chain_id, at_time)).await
    }
}

async fn insert_chain(tx: &mut Transaction<'_, Sqlite>, chain: &Chain, bindings: &[ChainBinding]) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO chains (id, name, type, state, start_at, stop_at, fabricated_ahead_seconds, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(chain.id.to_string())
    .bind(&chain.name)
    .bind(chain.chain_type.as_str())
    .bind(chain.state.as_str())
    .bind(time::format_ts(&chain.start_at))
    .bind(chain.stop_at.as_ref().map(time::format_ts))
    .bind(chain.fabricated_ahead_seconds)
    .bind(time::format_ts(&chain.created_at))
    .bind(time::format_ts(&chain.updated_at))
    .execute(&mut **tx)
    .await?;

    for binding in bindings {
        sqlx::query("INSERT INTO chain_bindings (id, chain_id, type, target_id) VALUES (?, ?, ?, ?)")
            .bind(binding.id.to_string())
            .bind(chain.id.to_string())
            .bind(binding.binding_type.as_str())
            .bind(binding.target_id.to_string())
            .execute(&mut **tx)
            .await?;
    }

    Ok(())
}

async fn read_bindings_in(tx: &mut Transaction<'_, Sqlite>, chain_id: Uuid) -> Result<Vec<ChainBinding>> {
    let rows = sqlx::query("SELECT id, chain_id, type, target_id FROM chain_bindings WHERE chain_id = ? ORDER BY id")
        .bind(chain_id.to_string())
        .fetch_all(&mut **tx)
        .await?;
    rows.iter().map(binding_from_row).collect()
}

fn binding_from_row(row: &SqliteRow) -> Result<ChainBinding> {
    let binding_type: String = row.get("type");
    Ok(ChainBinding {
        id: uuid_utils::parse(row.get("id"))?,
        chain_id: uuid_utils::parse(row.get("chain_id"))?,
        binding_type: binding_type.parse()?,
        target_id: uuid_utils::parse(row.get("target_id"))?,
    })
}

fn chain_from_row(row: &SqliteRow) -> Result<Chain> {
    let chain_type: String = row.get("type");
    let state: String = row.get("state");
    let start_at: String = row.get("start_at");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(Chain {
        id: uuid_utils::parse(row.get("id"))?,
        name: row.get("name"),
        chain_type: chain_type.parse()?,
        state: state.parse()?,
        start_at: time::parse_ts(&start_at)?,
        stop_at: time::parse_opt_ts(row.get("stop_at"))?,
        fabricated_ahead_seconds: row.get("fabricated_ahead_seconds"),
        created_at: time::parse_ts(&created_at)?,
        updated_at: time::parse_ts(&updated_at)?,
    })
}

//! Database schema migrations
//!
//! Versioned, idempotent upgrades applied after `CREATE TABLE IF NOT EXISTS`.
//! The applied version is tracked in the `schema_version` table.
//!
//! # Migration Guidelines
//!
//! 1. **Never modify existing migrations**; databases in the field depend on them
//! 2. **Always add new migrations** for each schema change
//! 3. **Check before altering** so a migration can run twice safely
//! 4. **Prefer ALTER TABLE** over DROP/CREATE to preserve data

use crate::Result;
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Current schema version
///
/// **IMPORTANT:** Increment this when adding new migrations
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Get current schema version from database
///
/// Returns 0 if schema_version table doesn't exist or has no rows
pub async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let table_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM sqlite_master
            WHERE type='table' AND name='schema_version'
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        return Ok(0);
    }

    let version: Option<i32> =
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;

    Ok(version.unwrap_or(0))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;

    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current_version = get_schema_version(pool).await?;

    if current_version == CURRENT_SCHEMA_VERSION {
        info!("Database schema is up to date (v{})", current_version);
        return Ok(());
    }

    if current_version > CURRENT_SCHEMA_VERSION {
        warn!(
            "Database schema version ({}) is newer than code version ({})",
            current_version, CURRENT_SCHEMA_VERSION
        );
        return Ok(());
    }

    info!(
        "Running database migrations: v{} -> v{}",
        current_version, CURRENT_SCHEMA_VERSION
    );

    if current_version < 1 {
        migrate_v1(pool).await?;
        set_schema_version(pool, 1).await?;
        info!("Migration v1 completed");
    }

    if current_version < 2 {
        migrate_v2(pool).await?;
        set_schema_version(pool, 2).await?;
        info!("Migration v2 completed");
    }

    info!("All migrations completed successfully");
    Ok(())
}

/// Migration v1: add fabricated_ahead_seconds to chains
///
/// Chains created before fabricated-ahead telemetry lack the column.
async fn migrate_v1(pool: &SqlitePool) -> Result<()> {
    if !table_exists(pool, "chains").await? {
        info!("  chains table doesn't exist yet - skipping migration");
        return Ok(());
    }

    let has_column: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM pragma_table_info('chains') WHERE name = 'fabricated_ahead_seconds'",
    )
    .fetch_one(pool)
    .await?;

    if has_column > 0 {
        info!("  fabricated_ahead_seconds column already exists - skipping");
        return Ok(());
    }

    sqlx::query("ALTER TABLE chains ADD COLUMN fabricated_ahead_seconds REAL")
        .execute(pool)
        .await?;

    info!("  Added fabricated_ahead_seconds column to chains table");
    Ok(())
}

/// Migration v2: index segments by chain and state
///
/// The medic scans for non-terminal segments per chain every cycle.
async fn migrate_v2(pool: &SqlitePool) -> Result<()> {
    if !table_exists(pool, "segments").await? {
        info!("  segments table doesn't exist yet - skipping migration");
        return Ok(());
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_segments_chain_state ON segments(chain_id, state)")
        .execute(pool)
        .await?;

    info!("  Created idx_segments_chain_state");
    Ok(())
}

async fn table_exists(pool: &SqlitePool, name: &str) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name = ?)",
    )
    .bind(name)
    .fetch_one(pool)
    .await?;

    Ok(exists)
}

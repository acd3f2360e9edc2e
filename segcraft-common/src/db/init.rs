//! Database initialization
//!
//! Creates the SQLite database on first run, enables WAL and foreign keys,
//! creates every table with `CREATE TABLE IF NOT EXISTS`, runs versioned
//! migrations and seeds default settings.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::{info, warn};

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(16)
        .min_connections(2)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    configure_connection(&pool).await?;
    create_schema(&pool).await?;
    crate::db::migrations::run_migrations(&pool).await?;
    init_default_settings(&pool).await?;

    Ok(pool)
}

/// Apply connection pragmas
///
/// WAL lets the supervisor's concurrent chain workers read while one writes.
pub async fn configure_connection(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;
    sqlx::query("PRAGMA journal_mode = WAL").execute(pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(pool).await?;
    Ok(())
}

/// Create every table and index (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_settings_table(pool).await?;

    // Library content (read-only during fabrication)
    create_libraries_table(pool).await?;
    create_programs_table(pool).await?;
    create_program_memes_table(pool).await?;
    create_program_sequences_table(pool).await?;
    create_program_sequence_bindings_table(pool).await?;
    create_program_sequence_binding_memes_table(pool).await?;
    create_program_sequence_chords_table(pool).await?;

    // Chains and fabricated segments
    create_chains_table(pool).await?;
    create_chain_bindings_table(pool).await?;
    create_segments_table(pool).await?;
    create_segment_choices_table(pool).await?;
    create_segment_memes_table(pool).await?;
    create_segment_chords_table(pool).await?;
    create_segment_messages_table(pool).await?;

    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the settings table
///
/// Stores service tuning as key-value pairs.
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_libraries_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS libraries (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_programs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS programs (
            id TEXT PRIMARY KEY,
            library_id TEXT NOT NULL REFERENCES libraries(id) ON DELETE CASCADE,
            type TEXT NOT NULL CHECK (type IN ('Macro', 'Main', 'Rhythm', 'Detail')),
            name TEXT NOT NULL,
            key TEXT NOT NULL,
            tempo REAL NOT NULL CHECK (tempo > 0),
            density REAL NOT NULL CHECK (density >= 0 AND density <= 1),
            do_transpose INTEGER NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_programs_library_type ON programs(library_id, type)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_program_memes_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS program_memes (
            id TEXT PRIMARY KEY,
            program_id TEXT NOT NULL REFERENCES programs(id) ON DELETE CASCADE,
            name TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_program_sequences_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS program_sequences (
            id TEXT PRIMARY KEY,
            program_id TEXT NOT NULL REFERENCES programs(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            key TEXT,
            total INTEGER NOT NULL CHECK (total > 0),
            tempo REAL CHECK (tempo IS NULL OR tempo > 0),
            density REAL CHECK (density IS NULL OR (density >= 0 AND density <= 1))
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_program_sequence_bindings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS program_sequence_bindings (
            id TEXT PRIMARY KEY,
            program_id TEXT NOT NULL REFERENCES programs(id) ON DELETE CASCADE,
            program_sequence_id TEXT NOT NULL REFERENCES program_sequences(id) ON DELETE CASCADE,
            offset INTEGER NOT NULL CHECK (offset >= 0)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_sequence_bindings_program_offset ON program_sequence_bindings(program_id, offset)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_program_sequence_binding_memes_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS program_sequence_binding_memes (
            id TEXT PRIMARY KEY,
            program_id TEXT NOT NULL REFERENCES programs(id) ON DELETE CASCADE,
            program_sequence_binding_id TEXT NOT NULL REFERENCES program_sequence_bindings(id) ON DELETE CASCADE,
            name TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_program_sequence_chords_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS program_sequence_chords (
            id TEXT PRIMARY KEY,
            program_id TEXT NOT NULL REFERENCES programs(id) ON DELETE CASCADE,
            program_sequence_id TEXT NOT NULL REFERENCES program_sequences(id) ON DELETE CASCADE,
            position REAL NOT NULL CHECK (position >= 0),
            name TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_chains_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chains (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            type TEXT NOT NULL CHECK (type IN ('Production', 'Preview')),
            state TEXT NOT NULL CHECK (state IN ('Draft', 'Fabricate', 'Complete', 'Failed')),
            start_at TEXT NOT NULL,
            stop_at TEXT,
            fabricated_ahead_seconds REAL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chains_state ON chains(state)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_chain_bindings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chain_bindings (
            id TEXT PRIMARY KEY,
            chain_id TEXT NOT NULL REFERENCES chains(id) ON DELETE CASCADE,
            type TEXT NOT NULL CHECK (type IN ('Library', 'Program')),
            target_id TEXT NOT NULL,
            UNIQUE(chain_id, type, target_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the segments table
///
/// `UNIQUE(chain_id, offset)` backs offset contiguity: two supervisors racing
/// to plan the same next offset cannot both succeed.
async fn create_segments_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS segments (
            id TEXT PRIMARY KEY,
            chain_id TEXT NOT NULL REFERENCES chains(id),
            offset INTEGER NOT NULL CHECK (offset >= 0),
            state TEXT NOT NULL CHECK (state IN ('Planned', 'Crafting', 'Crafted', 'Dubbing', 'Dubbed', 'Failed')),
            type TEXT CHECK (type IS NULL OR type IN ('Initial', 'Continue', 'NextMain', 'NextMacro')),
            begin_at TEXT NOT NULL,
            end_at TEXT,
            key TEXT,
            total INTEGER,
            density REAL,
            tempo REAL,
            output_key TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(chain_id, offset)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_segment_choices_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS segment_choices (
            id TEXT PRIMARY KEY,
            segment_id TEXT NOT NULL REFERENCES segments(id) ON DELETE CASCADE,
            program_id TEXT NOT NULL,
            program_type TEXT NOT NULL CHECK (program_type IN ('Macro', 'Main', 'Rhythm', 'Detail')),
            program_sequence_binding_id TEXT NOT NULL,
            transpose INTEGER NOT NULL,
            UNIQUE(segment_id, program_type)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_segment_memes_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS segment_memes (
            id TEXT PRIMARY KEY,
            segment_id TEXT NOT NULL REFERENCES segments(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            UNIQUE(segment_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_segment_chords_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS segment_chords (
            id TEXT PRIMARY KEY,
            segment_id TEXT NOT NULL REFERENCES segments(id) ON DELETE CASCADE,
            position REAL NOT NULL,
            name TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_segment_messages_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS segment_messages (
            id TEXT PRIMARY KEY,
            segment_id TEXT NOT NULL REFERENCES segments(id) ON DELETE CASCADE,
            type TEXT NOT NULL CHECK (type IN ('Info', 'Warning', 'Error')),
            body TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Initialize or update default settings
///
/// Every tunable the service reads must have a row here.
async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    // Supervisor cadence and look-ahead
    ensure_setting(pool, "supervisor_cycle_ms", "1000").await?;
    ensure_setting(pool, "buffer_ahead_seconds", "300").await?;
    ensure_setting(pool, "ingest_cycle_seconds", "60").await?;
    ensure_setting(pool, "max_concurrent_chains", "4").await?;

    // Chain medic
    ensure_setting(pool, "medic_cycle_seconds", "30").await?;
    ensure_setting(pool, "stale_segment_threshold_seconds", "300").await?;
    ensure_setting(pool, "revive_chain_grace_seconds", "600").await?;
    ensure_setting(pool, "revive_fabricated_behind_seconds", "-60").await?;
    ensure_setting(pool, "chain_start_in_future_seconds", "0").await?;

    // Health and storage
    ensure_setting(pool, "health_staleness_threshold_seconds", "60").await?;
    ensure_setting(pool, "db_max_lock_wait_ms", "5000").await?;

    // Meme policy: JSON array of mutually exclusive meme groups
    ensure_setting(pool, "meme_exclusive_groups", "[]").await?;

    info!("Default settings initialized");
    Ok(())
}

/// Ensure a setting exists with the specified default value
///
/// A missing row is created; a NULL value is reset to the default.
pub async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    let value: Option<Option<String>> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;

    match value {
        None => {
            // INSERT OR IGNORE tolerates two processes initializing at once
            sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(default_value)
                .execute(pool)
                .await?;
            info!("Initialized setting '{}' with default value: {}", key, default_value);
        }
        Some(None) => {
            sqlx::query("UPDATE settings SET value = ? WHERE key = ?")
                .bind(default_value)
                .bind(key)
                .execute(pool)
                .await?;
            warn!("Setting '{}' was NULL, reset to default: {}", key, default_value);
        }
        Some(Some(_)) => {}
    }

    Ok(())
}

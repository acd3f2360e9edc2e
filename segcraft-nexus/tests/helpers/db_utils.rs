//! Database Test Utilities

use segcraft_common::db::init_database;
use segcraft_nexus::store::{SqliteChainStore, SqliteSegmentStore};
use sqlx::SqlitePool;
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

/// Create a temporary database with schema, migrations and default settings
///
/// The TempDir must be kept alive for the duration of the test.
pub async fn create_test_db() -> (TempDir, SqlitePool) {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("test_segcraft.db")).await.unwrap();
    (temp_dir, pool)
}

pub fn stores(pool: &SqlitePool) -> (Arc<SqliteChainStore>, Arc<SqliteSegmentStore>) {
    (
        Arc::new(SqliteChainStore::new(pool.clone(), 5000)),
        Arc::new(SqliteSegmentStore::new(pool.clone(), 5000)),
    )
}

/// Rows of `table` belonging to one segment
pub async fn count_rows(pool: &SqlitePool, table: &str, segment_id: Uuid) -> i64 {
    let sql = format!("SELECT COUNT(*) FROM {} WHERE segment_id = ?", table);
    sqlx::query_scalar::<_, i64>(&sql)
        .bind(segment_id.to_string())
        .fetch_one(pool)
        .await
        .unwrap()
}

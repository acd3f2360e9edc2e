//! segcraft-nexus library interface
//!
//! The fabrication engine, craft pipeline and chain supervisor, plus the
//! SQLite stores and HTTP status surface the binary wires together.

pub mod access;
pub mod api;
pub mod content;
pub mod craft;
pub mod error;
pub mod fabricator;
pub mod settings;
pub mod store;
pub mod supervisor;
pub mod utils;

pub use crate::access::Access;
pub use crate::error::{ApiError, ApiResult, CraftError, CraftResult};

use axum::Router;
use chrono::{DateTime, Utc};
use settings::NexusSettings;
use sqlx::SqlitePool;
use std::sync::Arc;
use store::{ChainStore, SegmentStore};
use supervisor::HealthTracker;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub chains: Arc<dyn ChainStore>,
    pub segments: Arc<dyn SegmentStore>,
    /// Updated by the supervisor after every cycle
    pub health: HealthTracker,
    pub settings: Arc<NexusSettings>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        chains: Arc<dyn ChainStore>,
        segments: Arc<dyn SegmentStore>,
        health: HealthTracker,
        settings: NexusSettings,
    ) -> Self {
        Self {
            db,
            chains,
            segments,
            health,
            settings: Arc::new(settings),
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::chain_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

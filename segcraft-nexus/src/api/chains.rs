//! Chain status endpoints

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use segcraft_common::models::{Chain, ChainState, Segment};
use segcraft_common::{time, uuid_utils};
use serde::Serialize;

use crate::{ApiError, ApiResult, AppState};

#[derive(Debug, Serialize)]
pub struct ChainSummary {
    pub id: String,
    pub name: String,
    pub chain_type: String,
    pub state: String,
    pub start_at: String,
    pub stop_at: Option<String>,
    pub fabricated_ahead_seconds: Option<f64>,
    /// Offset of the newest segment, if any
    pub last_offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SegmentSummary {
    pub offset: i64,
    pub state: String,
    pub segment_type: Option<String>,
    pub begin_at: String,
    pub end_at: Option<String>,
    pub key: Option<String>,
    pub total: Option<i64>,
    pub tempo: Option<f64>,
    pub density: Option<f64>,
    pub output_key: String,
}

#[derive(Debug, Serialize)]
pub struct ChainDetail {
    #[serde(flatten)]
    pub chain: ChainSummary,
    pub segments: Vec<SegmentSummary>,
}

fn summarize_chain(chain: &Chain, last_offset: Option<i64>) -> ChainSummary {
    ChainSummary {
        id: chain.id.to_string(),
        name: chain.name.clone(),
        chain_type: chain.chain_type.to_string(),
        state: chain.state.to_string(),
        start_at: time::format_ts(&chain.start_at),
        stop_at: chain.stop_at.as_ref().map(time::format_ts),
        fabricated_ahead_seconds: chain.fabricated_ahead_seconds,
        last_offset,
    }
}

impl From<&Segment> for SegmentSummary {
    fn from(segment: &Segment) -> Self {
        Self {
            offset: segment.offset,
            state: segment.state.to_string(),
            segment_type: segment.segment_type.map(|t| t.to_string()),
            begin_at: time::format_ts(&segment.begin_at),
            end_at: segment.end_at.as_ref().map(time::format_ts),
            key: segment.key.clone(),
            total: segment.total,
            tempo: segment.tempo,
            density: segment.density,
            output_key: segment.output_key.clone(),
        }
    }
}

/// GET /chains
///
/// Chains currently being fabricated.
pub async fn list_chains(State(state): State<AppState>) -> ApiResult<Json<Vec<ChainSummary>>> {
    let chains = state.chains.list_chains_in_state(ChainState::Fabricate).await?;

    let mut summaries = Vec::with_capacity(chains.len());
    for chain in &chains {
        let last_offset = state.segments.read_last_segment(chain.id).await?.map(|s| s.offset);
        summaries.push(summarize_chain(chain, last_offset));
    }
    Ok(Json(summaries))
}

/// GET /chains/:chain_id
///
/// One chain in any state, with its segments in offset order.
pub async fn get_chain(
    State(state): State<AppState>,
    Path(chain_id): Path<String>,
) -> ApiResult<Json<ChainDetail>> {
    let chain_id = uuid_utils::parse(&chain_id).map_err(|_| ApiError::NotFound(format!("chain {}", chain_id)))?;
    let chain = state.chains.read_chain(chain_id).await?;
    let segments = state.segments.read_segments(chain_id).await?;

    Ok(Json(ChainDetail {
        chain: summarize_chain(&chain, segments.last().map(|s| s.offset)),
        segments: segments.iter().map(SegmentSummary::from).collect(),
    }))
}

pub fn chain_routes() -> Router<AppState> {
    Router::new()
        .route("/chains", get(list_chains))
        .route("/chains/:chain_id", get(get_chain))
}

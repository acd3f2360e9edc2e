//! HTTP status API tests

mod helpers;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::Utc;
use helpers::*;
use http_body_util::BodyExt;
use segcraft_nexus::content::repository::SqliteContentSource;
use segcraft_nexus::settings::NexusSettings;
use segcraft_nexus::supervisor::{HealthTracker, PassthroughDubber, Supervisor};
use segcraft_nexus::{build_router, AppState};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_health_reports_stale_until_first_cycle() {
    let (_dir, pool) = create_test_db().await;
    let (chains, segments) = stores(&pool);
    let health = HealthTracker::new();
    let app = build_router(AppState::new(
        pool.clone(),
        chains,
        segments,
        health.clone(),
        NexusSettings::default(),
    ));

    let (status, body) = get_json(app.clone(), "/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "stale");
    assert!(body["last_cycle_at"].is_null());

    health.record_cycle(Utc::now()).await;

    let (status, body) = get_json(app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "segcraft-nexus");
    assert!(body["last_cycle_at"].is_string());
}

#[tokio::test]
async fn test_chain_listing_and_detail() {
    let (_dir, pool) = create_test_db().await;
    let (chains, segments) = stores(&pool);
    let (library, _) = load_library(&pool, TWO_MAIN_LIBRARY).await;
    let now = Utc::now();
    let chain = start_chain(chains.as_ref(), library.id, now, None).await;

    let health = HealthTracker::new();
    let supervisor = Supervisor::new(
        chains.clone(),
        segments.clone(),
        Arc::new(SqliteContentSource::new(pool.clone())),
        Arc::new(PassthroughDubber),
        NexusSettings::default(),
        health.clone(),
    );
    supervisor.run_cycle(now).await.unwrap();
    supervisor.run_cycle(now).await.unwrap();

    let app = build_router(AppState::new(pool.clone(), chains, segments, health, NexusSettings::default()));

    let (status, body) = get_json(app.clone(), "/chains").await;
    assert_eq!(status, StatusCode::OK);
    let listed = body.as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["id"], chain.id.to_string());
    assert_eq!(listed[0]["state"], "Fabricate");
    assert_eq!(listed[0]["last_offset"], 1);
    assert!(listed[0]["fabricated_ahead_seconds"].is_number());

    let (status, body) = get_json(app, &format!("/chains/{}", chain.id)).await;
    assert_eq!(status, StatusCode::OK);
    let detail_segments = body["segments"].as_array().unwrap();
    assert_eq!(detail_segments.len(), 2);
    assert_eq!(detail_segments[0]["segment_type"], "Initial");
    assert_eq!(detail_segments[0]["key"], "C Major");
    assert_eq!(detail_segments[1]["state"], "Dubbed");
}

#[tokio::test]
async fn test_unknown_chain_is_404() {
    let (_dir, pool) = create_test_db().await;
    let (chains, segments) = stores(&pool);
    let app = build_router(AppState::new(
        pool.clone(),
        chains,
        segments,
        HealthTracker::new(),
        NexusSettings::default(),
    ));

    let (status, body) = get_json(app.clone(), &format!("/chains/{}", Uuid::new_v4())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let (status, _) = get_json(app, "/chains/not-a-uuid").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

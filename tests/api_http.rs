// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::{json, Value as Json};
use tower::ServiceExt as _; // for `oneshot`

use common::{harness, settings, ScriptedEngine, ScriptedFeeds};
use news_insights::api::{self, AppState};
use news_insights::error::Result;
use news_insights::ingest::types::RawArticle;
use news_insights::ingest::{FeedSource, SourceDescriptor};
use news_insights::notify::NotifierMux;
use news_insights::pipeline::PipelineOrchestrator;
use news_insights::store::InMemoryArticleStore;

const BODY_LIMIT: usize = 1024 * 1024;

fn test_state(feeds: ScriptedFeeds) -> AppState {
    let h = harness(settings(&["alpha"]), feeds);
    AppState::new(Arc::new(h.orchestrator))
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
    let resp = app.clone().oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    (status, bytes)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build GET")
}

fn post_json(uri: &str, payload: &Json) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .expect("build POST")
}

#[tokio::test]
async fn health_returns_ok() {
    let app = api::router(test_state(ScriptedFeeds::new()));
    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(String::from_utf8(body).unwrap(), "ok");
}

#[tokio::test]
async fn latest_run_is_404_before_any_run() {
    let app = api::router(test_state(ScriptedFeeds::new()));
    let (status, _) = send(&app, get("/runs/latest")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn triggered_run_is_returned_and_recorded() {
    let app = api::router(test_state(ScriptedFeeds::new().with_items("alpha", 2)));

    let (status, body) = send(&app, post_json("/runs", &json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    let run: Json = serde_json::from_slice(&body).expect("run json");
    assert_eq!(run["status"], "succeeded");
    assert_eq!(run["collection"]["new_articles"], 2);
    assert_eq!(run["stages"].as_array().map(|s| s.len()), Some(4));
    assert_eq!(run["stages"][0]["stage"], "collect");

    let (status, body) = send(&app, get("/runs/latest")).await;
    assert_eq!(status, StatusCode::OK);
    let latest: Json = serde_json::from_slice(&body).unwrap();
    assert_eq!(latest["run_id"], run["run_id"]);

    let (_, body) = send(&app, get("/runs?limit=5")).await;
    let runs: Json = serde_json::from_slice(&body).unwrap();
    assert_eq!(runs.as_array().map(|r| r.len()), Some(1));
}

#[tokio::test]
async fn status_reports_health_snapshot() {
    let app = api::router(test_state(ScriptedFeeds::new()));
    let (status, body) = send(&app, get("/status")).await;
    assert_eq!(status, StatusCode::OK);
    let v: Json = serde_json::from_slice(&body).unwrap();
    assert_eq!(v["total_articles"], 0);
    assert!(v.get("status").is_some());
    assert!(v.get("health_score").is_some());
}

#[tokio::test]
async fn webhook_accepts_object_and_array() {
    let app = api::router(test_state(ScriptedFeeds::new()));

    let one = json!({
        "title": "Battery breakthrough",
        "content": "Solid state cells reach production.",
        "link": "https://push.example/1"
    });
    let (status, body) = send(&app, post_json("/webhook/articles", &one)).await;
    assert_eq!(status, StatusCode::OK);
    let v: Json = serde_json::from_slice(&body).unwrap();
    assert_eq!(v["received"], 1);
    assert_eq!(v["analyzed"], 1);
    assert_eq!(v["results"][0]["inserted"], true);
    assert_eq!(v["results"][0]["sentiment"], "positive");

    let many = json!([
        { "title": "Battery breakthrough", "link": "https://push.example/1" },
        { "title": "Chip fab opens", "link": "https://push.example/2", "source": "n8n" }
    ]);
    let (status, body) = send(&app, post_json("/webhook/articles", &many)).await;
    assert_eq!(status, StatusCode::OK);
    let v: Json = serde_json::from_slice(&body).unwrap();
    assert_eq!(v["received"], 2);
    assert_eq!(v["results"][0]["inserted"], false);
    assert_eq!(v["results"][1]["inserted"], true);

    let (_, body) = send(&app, get("/reports/daily?days=3")).await;
    let report: Json = serde_json::from_slice(&body).unwrap();
    assert_eq!(report["days"], 3);
    assert_eq!(report["stats"][0]["total"], 2);
    assert_eq!(report["stats"][0]["analyzed"], 2);
}

#[tokio::test]
async fn malformed_webhook_body_is_rejected() {
    let app = api::router(test_state(ScriptedFeeds::new()));
    let (status, _) = send(&app, post_json("/webhook/articles", &json!({ "nope": 1 }))).await;
    assert!(status.is_client_error(), "got {status}");
}

/// Feed that takes a while, so a second trigger overlaps the first.
struct SlowFeeds;

#[async_trait]
impl FeedSource for SlowFeeds {
    async fn fetch(&self, src: &SourceDescriptor) -> Result<Vec<RawArticle>> {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(vec![common::raw(&src.name, 1, "slow story")])
    }

    fn name(&self) -> &'static str {
        "slow"
    }
}

#[tokio::test]
async fn overlapping_trigger_gets_conflict() {
    let orchestrator = PipelineOrchestrator::new(
        settings(&["alpha"]),
        Arc::new(SlowFeeds),
        Arc::new(InMemoryArticleStore::new()),
        Arc::new(ScriptedEngine::default()),
        NotifierMux::empty(),
    )
    .expect("valid settings");
    let app = api::router(AppState::new(Arc::new(orchestrator)));

    let (a, b) = tokio::join!(
        send(&app, post_json("/runs", &json!({}))),
        send(&app, post_json("/runs", &json!({}))),
    );
    let mut codes = [a.0.as_u16(), b.0.as_u16()];
    codes.sort_unstable();
    assert_eq!(codes, [200, 409]);
}

#[tokio::test]
async fn metrics_route_is_mounted_when_handle_given() {
    let handle = PrometheusBuilder::new().build_recorder().handle();
    let state = test_state(ScriptedFeeds::new()).with_metrics(handle);
    let app = api::router(state);
    let (status, _) = send(&app, get("/metrics")).await;
    assert_eq!(status, StatusCode::OK);

    let bare = api::router(test_state(ScriptedFeeds::new()));
    let (status, _) = send(&bare, get("/metrics")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

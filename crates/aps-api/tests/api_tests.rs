//! Router tests: requests go through the full middleware stack via `oneshot`.

use aps_api::{create_app, AppState};
use aps_core::mock::MockEngine;
use aps_core::script::{names, MemoryScriptStore, ScriptResolver};
use aps_core::{ContextPool, InMemoryStore, PipelineConfig, PoolConfig};
use aps_stages::{DosingPipeline, Stores};
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{DateTime, Duration, SecondsFormat, TimeZone, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

fn bundle() -> MemoryScriptStore {
    [
        names::PREPARE_LOG,
        names::PREPARE_IOB,
        names::BUNDLE_IOB,
        names::PREPARE_MEAL,
        names::BUNDLE_MEAL,
        names::PREPARE_AUTOSENS,
        names::BUNDLE_AUTOSENS,
        names::PREPARE_PROFILE,
        names::BUNDLE_PROFILE,
        names::PREPARE_DETERMINE_BASAL,
        names::BUNDLE_BASAL_SET_TEMP,
        names::BUNDLE_GET_LAST_GLUCOSE,
        names::BUNDLE_DETERMINE_BASAL,
    ]
    .into_iter()
    .fold(MemoryScriptStore::new(), |store, name| store.with(name, ""))
}

fn engine() -> MockEngine {
    let engine = MockEngine::new();
    engine
        .respond(names::PREPARE_IOB, "generate", json!([{ "iob": 0.4 }]))
        .respond(names::PREPARE_MEAL, "generate", json!({ "mealCOB": 0 }))
        .respond(names::PREPARE_AUTOSENS, "generate", json!({ "ratio": 0.9 }))
        .respond(names::PREPARE_PROFILE, "generate", json!({ "dia": 6 }))
        .respond(names::PREPARE_PROFILE, "exportDefaults", json!({ "maxIOB": 0 }))
        .handle(names::PREPARE_DETERMINE_BASAL, "generate", |args, _| {
            Ok(json!({ "deliverAt": args[8], "reason": "ok", "rate": 0.8, "duration": 30,
                       "predBGs": { "IOB": [120, 118] } }))
        });
    engine
}

fn app_with(engine: &MockEngine) -> (Router, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let scripts = ScriptResolver::new(Arc::new(MemoryScriptStore::new()), Arc::new(bundle()));
    let pool = ContextPool::new(Arc::new(engine.clone()), PoolConfig::default());
    let pipeline = DosingPipeline::new(Stores::shared(store.clone()), scripts, pool, PipelineConfig::default());
    let state = AppState::new(pipeline, store.clone(), "mock").unwrap();
    (create_app(state), store)
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            request = request.header(header::CONTENT_TYPE, "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    let response = app.clone().oneshot(request.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).to_string()));
    (status, value)
}

fn glucose_rows() -> Value {
    Value::Array(
        (0..12)
            .map(|i| {
                json!({
                    "id": uuid_like(i),
                    "date": (now() - Duration::minutes(5 * i)).to_rfc3339_opts(SecondsFormat::Millis, true),
                    "glucose": 120 - i,
                })
            })
            .collect(),
    )
}

fn uuid_like(i: i64) -> String {
    format!("00000000-0000-4000-8000-{:012}", i)
}

// =============================================================================
// Runs
// =============================================================================

#[tokio::test]
async fn test_determine_after_ingest_commits() {
    let engine = engine();
    let (app, store) = app_with(&engine);

    let (status, body) = send(&app, Method::POST, "/v1/records/glucose", Some(glucose_rows())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["inserted"], json!(12));

    let as_of = now().to_rfc3339_opts(SecondsFormat::Millis, true);
    let (status, body) = send(&app, Method::POST, "/v1/determine", Some(json!({ "asOf": as_of }))).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["committed"], json!(true));
    assert_eq!(body["determination"]["rate"], json!(0.8));
    assert_eq!(store.counts().await.determinations, 1);

    let (status, latest) = send(&app, Method::GET, "/v1/determinations/latest", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(latest["determination"]["id"], body["determination"]["id"]);
    assert_eq!(latest["forecasts"].as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn test_determine_without_glucose_is_unprocessable() {
    let (app, store) = app_with(&engine());
    let (status, body) = send(&app, Method::POST, "/v1/determine", None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("could not compute dosing determination"));
    assert_eq!(store.counts().await.determinations, 0);
}

#[tokio::test]
async fn test_simulate_never_commits() {
    let (app, store) = app_with(&engine());
    let (status, body) = send(&app, Method::POST, "/v1/simulate", Some(json!({ "carbs": 40, "bolus": 1.5 }))).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["committed"], json!(false));
    assert_eq!(store.counts().await.carbs, 0);

    let (status, _) = send(&app, Method::GET, "/v1/determinations/latest", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_profile_autosens_and_defaults() {
    let (app, _) = app_with(&engine());
    let (status, profile) = send(&app, Method::POST, "/v1/profile", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(profile, json!({ "dia": 6 }));

    let (status, autosens) = send(&app, Method::POST, "/v1/autosens", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(autosens["ratio"], json!(0.9));
    assert!(autosens["timestamp"].is_string());

    let (status, defaults) = send(&app, Method::GET, "/v1/preferences/defaults", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(defaults, json!({ "maxIOB": 0 }));
}

// =============================================================================
// Ingest and housekeeping
// =============================================================================

#[tokio::test]
async fn test_ingest_rejects_unknown_kind_and_bad_rows() {
    let (app, _) = app_with(&engine());
    let (status, _) = send(&app, Method::POST, "/v1/records/ketones", Some(json!([]))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, Method::POST, "/v1/records/carbs", Some(json!({ "carbs": "lots" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_single_record_is_accepted() {
    let (app, _) = app_with(&engine());
    let tdd = json!({ "date": now().to_rfc3339(), "total": 38.5 });
    let (status, body) = send(&app, Method::POST, "/v1/records/tdd", Some(tdd)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["inserted"], json!(1));
}

#[tokio::test]
async fn test_health_reports_engine_and_pool() {
    let (app, _) = app_with(&engine());
    let (status, body) = send(&app, Method::GET, "/v1/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("ok"));
    assert_eq!(body["engine"], json!("mock"));
    assert_eq!(body["pool"]["capacity"], json!(5));
}

#[tokio::test]
async fn test_metrics_count_runs() {
    let (app, _) = app_with(&engine());
    send(&app, Method::POST, "/v1/simulate", None).await;
    send(&app, Method::POST, "/v1/determine", None).await;

    let (status, body) = send(&app, Method::GET, "/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    let text = body.as_str().unwrap();
    assert!(text.contains("aps_runs_succeeded_total{kind=\"simulate\"} 1"));
    assert!(text.contains("aps_runs_failed_total{kind=\"determine\"} 1"));
    assert!(text.contains("aps_contexts_checked_out 0"));
}

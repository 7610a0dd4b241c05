//! APS API /v1: REST endpoints over the dosing pipeline
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;

use anyhow::Context;
use aps_core::script::{DirectoryScriptStore, MemoryScriptStore, ScriptResolver, ScriptStore};
use aps_core::store::{FileSettingsStore, LayeredSettings, SettingsStore};
use aps_core::{ContextPool, InMemoryStore, ScriptEngine};
use aps_stages::{DosingPipeline, Stores};
use axum::{
    routing::{get, post},
    Router,
};
use config::ApiConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: DosingPipeline,
    /// Record store behind the pipeline; also the target of `/v1/records`.
    pub store: Arc<InMemoryStore>,
    pub metrics: Arc<metrics::Metrics>,
    pub engine_name: String,
}

impl AppState {
    pub fn new(pipeline: DosingPipeline, store: Arc<InMemoryStore>, engine_name: impl Into<String>) -> anyhow::Result<Self> {
        Ok(Self {
            pipeline,
            store,
            metrics: Arc::new(metrics::Metrics::new().context("registering metrics")?),
            engine_name: engine_name.into(),
        })
    }
}

fn script_store(dir: Option<&PathBuf>) -> Arc<dyn ScriptStore> {
    match dir {
        Some(dir) => Arc::new(DirectoryScriptStore::new(dir)),
        None => Arc::new(MemoryScriptStore::new()),
    }
}

fn settings_store(config: &ApiConfig, store: &Arc<InMemoryStore>) -> Arc<dyn SettingsStore> {
    let primary: Arc<dyn SettingsStore> = match &config.settings_dir {
        Some(dir) => Arc::new(FileSettingsStore::new(dir)),
        None => store.clone(),
    };
    match &config.default_settings_dir {
        Some(defaults) => Arc::new(LayeredSettings::new(primary, Arc::new(FileSettingsStore::new(defaults)))),
        None => primary,
    }
}

/// Wires store, scripts, pool and pipeline from configuration.
pub fn build_state(config: &ApiConfig, engine: Arc<dyn ScriptEngine>) -> anyhow::Result<AppState> {
    let engine_name = engine.name().to_string();
    let store = Arc::new(InMemoryStore::new());
    let stores = Stores {
        reader: store.clone(),
        writer: store.clone(),
        settings: settings_store(config, &store),
    };
    let scripts = ScriptResolver::new(
        script_store(config.scripts_dir.as_ref()),
        script_store(config.bundled_scripts_dir.as_ref()),
    );
    let pool = ContextPool::new(engine, config.pipeline.pool.clone());
    pool.warm(1).context("creating the first script context")?;

    let pipeline = DosingPipeline::new(stores, scripts, pool, config.pipeline.clone());
    AppState::new(pipeline, store, engine_name)
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/v1/determine", post(handlers::determine))
        .route("/v1/simulate", post(handlers::simulate))
        .route("/v1/autosens", post(handlers::autosens))
        .route("/v1/profile", post(handlers::profile))
        .route("/v1/preferences/defaults", get(handlers::default_preferences))
        .route("/v1/determinations/latest", get(handlers::latest_determination))
        .route("/v1/records/:kind", post(handlers::ingest))
        .route("/v1/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .layer(axum::middleware::from_fn(middleware::log_requests))
        .layer(middleware::cors())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run(config: ApiConfig, engine: Arc<dyn ScriptEngine>) -> anyhow::Result<()> {
    let app = create_app(build_state(&config, engine)?);
    let listener = tokio::net::TcpListener::bind(&config.addr)
        .await
        .with_context(|| format!("binding {}", config.addr))?;

    tracing::info!(pool = config.pipeline.pool.capacity, "APS API listening on {}", config.addr);
    axum::serve(listener, app).await.context("server error")
}

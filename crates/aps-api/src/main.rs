//! Binary entrypoint for the APS API server.
use aps_api::{config::ApiConfig, run};
use aps_core::ScriptEngine;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "v8")]
fn engine() -> Arc<dyn ScriptEngine> {
    Arc::new(aps_core::v8::V8Engine::new())
}

#[cfg(not(feature = "v8"))]
fn engine() -> Arc<dyn ScriptEngine> {
    tracing::warn!("built without the v8 feature; scripts run on the mock engine");
    Arc::new(aps_core::mock::MockEngine::new())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,aps::script=debug")),
        )
        .init();

    // Listen address and directories can be overridden with APS_* variables
    let config = ApiConfig::load()?;
    run(config, engine()).await
}

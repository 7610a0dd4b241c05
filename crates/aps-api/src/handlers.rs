//! API Handlers
use crate::error::{ApiError, ApiResult};
use crate::AppState;
use aps_core::data_model::{
    CarbRecord, Determination, GlucoseRecord, OverrideRecord, PumpEventRecord, TddRecord, TempBasal,
    TempTargetRecord,
};
use aps_core::{Autosens, APS_VERSION};
use aps_stages::PipelineOutcome;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

/// Body of `/v1/determine` and `/v1/simulate`. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RunRequest {
    pub as_of: Option<DateTime<Utc>>,
    pub current_temp: Option<TempBasal>,
    pub carbs: Option<f64>,
    pub bolus: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AsOfRequest {
    pub as_of: Option<DateTime<Utc>>,
}

fn body<T: Default>(payload: Option<Json<T>>) -> T {
    payload.map(|Json(inner)| inner).unwrap_or_default()
}

pub async fn determine(
    State(state): State<AppState>,
    payload: Option<Json<RunRequest>>,
) -> ApiResult<Json<PipelineOutcome>> {
    let request = body(payload);
    state.metrics.run_started("determine");
    let result = state
        .pipeline
        .determine(request.as_of.unwrap_or_else(Utc::now), request.current_temp)
        .await;
    state.metrics.run_finished("determine", &result);
    Ok(Json(result?))
}

pub async fn simulate(
    State(state): State<AppState>,
    payload: Option<Json<RunRequest>>,
) -> ApiResult<Json<PipelineOutcome>> {
    let request = body(payload);
    state.metrics.run_started("simulate");
    let result = state
        .pipeline
        .simulate(
            request.as_of.unwrap_or_else(Utc::now),
            request.carbs,
            request.bolus,
            request.current_temp,
        )
        .await;
    state.metrics.run_finished("simulate", &result);
    Ok(Json(result?))
}

pub async fn autosens(
    State(state): State<AppState>,
    payload: Option<Json<AsOfRequest>>,
) -> ApiResult<Json<Autosens>> {
    let as_of = body(payload).as_of.unwrap_or_else(Utc::now);
    Ok(Json(state.pipeline.ensure_autosens(as_of).await?))
}

pub async fn profile(
    State(state): State<AppState>,
    payload: Option<Json<AsOfRequest>>,
) -> ApiResult<Json<Value>> {
    let as_of = body(payload).as_of.unwrap_or_else(Utc::now);
    Ok(Json(state.pipeline.build_profiles(as_of).await?))
}

pub async fn default_preferences(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    Ok(Json(state.pipeline.export_defaults().await?))
}

/// The most recently committed determination, with its forecasts.
pub async fn latest_determination(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let determination: Determination = state
        .store
        .latest_determination()
        .await
        .ok_or_else(|| ApiError::not_found("no determination committed yet"))?;
    let forecasts = match determination.id {
        Some(id) => state.store.forecasts_for(id).await,
        None => Vec::new(),
    };
    Ok(Json(json!({ "determination": determination, "forecasts": forecasts })))
}

/// Accepts a single record or an array of them.
fn rows<T: DeserializeOwned>(body: Value) -> ApiResult<Vec<T>> {
    let body = match body {
        Value::Array(_) => body,
        single => Value::Array(vec![single]),
    };
    serde_json::from_value(body).map_err(|err| ApiError::bad_request(err.to_string()))
}

pub async fn ingest(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Json(payload): Json<Value>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let store = &state.store;
    let inserted = match kind.as_str() {
        "glucose" => {
            let rows: Vec<GlucoseRecord> = rows(payload)?;
            let count = rows.len();
            store.insert_glucose(rows).await;
            count
        }
        "carbs" => {
            let rows: Vec<CarbRecord> = rows(payload)?;
            let count = rows.len();
            store.insert_carbs(rows).await;
            count
        }
        "pump-events" => {
            let rows: Vec<PumpEventRecord> = rows(payload)?;
            let count = rows.len();
            store.insert_pump_events(rows).await;
            count
        }
        "tdd" => {
            let rows: Vec<TddRecord> = rows(payload)?;
            let count = rows.len();
            store.insert_tdd(rows).await;
            count
        }
        "overrides" => {
            let rows: Vec<OverrideRecord> = rows(payload)?;
            let count = rows.len();
            store.insert_overrides(rows).await;
            count
        }
        "temp-targets" => {
            let rows: Vec<TempTargetRecord> = rows(payload)?;
            let count = rows.len();
            store.insert_temp_targets(rows).await;
            count
        }
        other => return Err(ApiError::not_found(format!("unknown record kind: {}", other))),
    };
    tracing::debug!(kind = %kind, inserted, "records ingested");
    Ok((StatusCode::CREATED, Json(json!({ "inserted": inserted }))))
}

pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "version": APS_VERSION,
            "engine": state.engine_name,
            "pool": state.pipeline.pool().stats(),
        })),
    )
}

pub async fn metrics(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    state.metrics.observe_pool(&state.pipeline.pool().stats());
    let text = state
        .metrics
        .encode()
        .map_err(|err| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], text))
}

//! Determination Validator & Persister
//!
//! Raw determine output becomes a committed record exactly once. A result
//! without `deliverAt` is never committed and never replaced by a default.
use aps_core::data_model::{Determination, Forecast};
use aps_core::store::RecordWriter;
use aps_core::{ApsError, ApsResult};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// Id for output that carries none: a digest of the raw output, so the same
/// computed determination always maps to the same record.
pub fn determination_id(raw: &Value) -> Uuid {
    let bytes = serde_json::to_vec(raw).unwrap_or_default();
    let digest = blake3::hash(&bytes);
    let mut id = [0u8; 16];
    id.copy_from_slice(&digest.as_bytes()[..16]);
    Uuid::from_bytes(id)
}

/// Parses raw output, requires `deliverAt`, copies it into `timestamp` and
/// derives an id when the script did not provide one.
pub fn parse_determination(raw: &Value) -> ApsResult<Determination> {
    if !raw.is_object() {
        return Err(ApsError::NoDetermination(format!("expected an object, got {}", raw)));
    }
    let mut determination: Determination = serde_json::from_value(raw.clone())
        .map_err(|err| ApsError::NoDetermination(err.to_string()))?;

    let deliver_at = determination.deliver_at.ok_or_else(|| {
        let detail = raw
            .get("error")
            .or_else(|| raw.get("reason"))
            .and_then(Value::as_str)
            .map(|s| format!("missing deliverAt ({})", s))
            .unwrap_or_else(|| "missing deliverAt".to_string());
        ApsError::NoDetermination(detail)
    })?;

    determination.timestamp = Some(deliver_at);
    if determination.id.is_none() {
        determination.id = Some(determination_id(raw));
    }
    Ok(determination)
}

/// One forecast per non-empty prediction series, dated at `deliverAt`.
pub fn forecasts_for(determination: &Determination) -> Vec<Forecast> {
    let (Some(id), Some(date), Some(predictions)) = (
        determination.id,
        determination.deliver_at,
        determination.predictions.as_ref(),
    ) else {
        return Vec::new();
    };
    predictions
        .series()
        .into_iter()
        .filter(|(_, values)| !values.is_empty())
        .map(|(kind, values)| Forecast::from_series(id, kind, date, values))
        .collect()
}

#[derive(Clone)]
pub struct DeterminationCommitter {
    writer: Arc<dyn RecordWriter>,
}

impl DeterminationCommitter {
    pub fn new(writer: Arc<dyn RecordWriter>) -> Self {
        Self { writer }
    }

    /// Validates `raw` and, when `persist` is set, commits the record and its
    /// forecasts as one unit. Committing the same id twice is a no-op.
    pub async fn parse_and_commit(&self, raw: &Value, persist: bool) -> ApsResult<Determination> {
        let determination = parse_determination(raw)?;
        if !persist {
            return Ok(determination);
        }
        let forecasts = forecasts_for(&determination);
        let created = self
            .writer
            .commit_determination(&determination, &forecasts)
            .await?;
        if created {
            tracing::info!(
                id = ?determination.id,
                forecasts = forecasts.len(),
                "determination committed"
            );
        } else {
            tracing::debug!(id = ?determination.id, "determination already committed");
        }
        Ok(determination)
    }
}

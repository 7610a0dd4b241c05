//! In-memory record store
//!
//! Backs the API binary and every test. `set_available(false)` makes every
//! read and write fail with a data-access error, `set_writable(false)` only
//! the writes.
use crate::data_model::{
    Autosens, CarbRecord, Determination, Forecast, GlucoseRecord, OverrideRecord,
    PumpEventRecord, TddRecord, TempTargetRecord, TimeWindow,
};
use crate::error::{ApsError, ApsResult};
use crate::store::{RecordReader, RecordWriter, SettingsStore};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    glucose: Vec<GlucoseRecord>,
    carbs: Vec<CarbRecord>,
    pump_events: Vec<PumpEventRecord>,
    overrides: Vec<OverrideRecord>,
    temp_targets: Vec<TempTargetRecord>,
    tdd: Vec<TddRecord>,
    autosens: Vec<Autosens>,
    /// commit order
    determinations: Vec<Determination>,
    forecasts: Vec<Forecast>,
    settings: HashMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StoreCounts {
    pub glucose: usize,
    pub carbs: usize,
    pub pump_events: usize,
    pub determinations: usize,
    pub forecasts: usize,
    pub autosens: usize,
}

pub struct InMemoryStore {
    tables: RwLock<Tables>,
    available: AtomicBool,
    writable: AtomicBool,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn newest_first<T>(rows: &mut Vec<T>, window: &TimeWindow, date: impl Fn(&T) -> Option<DateTime<Utc>>) {
    rows.retain(|row| date(row).map(|d| window.contains(d)).unwrap_or(false));
    rows.sort_by(|a, b| date(b).cmp(&date(a)));
    if let Some(limit) = window.limit {
        rows.truncate(limit);
    }
}

/// End of a window of `minutes` starting at `start`; `None` when the
/// duration does not fit the calendar.
fn window_end(start: DateTime<Utc>, minutes: Option<f64>) -> Option<DateTime<Utc>> {
    let minutes = minutes.unwrap_or(0.0);
    if !minutes.is_finite() {
        return None;
    }
    Duration::try_seconds((minutes * 60.0) as i64).and_then(|d| start.checked_add_signed(d))
}

fn override_active(record: &OverrideRecord, at: DateTime<Utc>) -> bool {
    if !record.enabled || record.date > at {
        return false;
    }
    if record.indefinite {
        return true;
    }
    match window_end(record.date, record.duration) {
        Some(end) => end > at,
        // out of range: runs until replaced, like an indefinite override
        None => record.duration.map(|m| m > 0.0).unwrap_or(false),
    }
}

fn temp_target_active(record: &TempTargetRecord, at: DateTime<Utc>) -> bool {
    record.enabled
        && record.date <= at
        && window_end(record.date, record.duration).map(|end| end > at).unwrap_or(false)
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            available: AtomicBool::new(true),
            writable: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_writable(&self, writable: bool) {
        self.writable.store(writable, Ordering::SeqCst);
    }

    fn check_read(&self) -> ApsResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ApsError::DataAccess("record store unavailable".to_string()))
        }
    }

    fn check_write(&self) -> ApsResult<()> {
        self.check_read()?;
        if self.writable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ApsError::DataAccess("record store is read-only".to_string()))
        }
    }

    pub async fn insert_glucose(&self, rows: impl IntoIterator<Item = GlucoseRecord>) {
        self.tables.write().await.glucose.extend(rows);
    }

    pub async fn insert_carbs(&self, rows: impl IntoIterator<Item = CarbRecord>) {
        self.tables.write().await.carbs.extend(rows);
    }

    pub async fn insert_pump_events(&self, rows: impl IntoIterator<Item = PumpEventRecord>) {
        self.tables.write().await.pump_events.extend(rows);
    }

    pub async fn insert_overrides(&self, rows: impl IntoIterator<Item = OverrideRecord>) {
        self.tables.write().await.overrides.extend(rows);
    }

    pub async fn insert_temp_targets(&self, rows: impl IntoIterator<Item = TempTargetRecord>) {
        self.tables.write().await.temp_targets.extend(rows);
    }

    pub async fn insert_tdd(&self, rows: impl IntoIterator<Item = TddRecord>) {
        self.tables.write().await.tdd.extend(rows);
    }

    pub async fn counts(&self) -> StoreCounts {
        let tables = self.tables.read().await;
        StoreCounts {
            glucose: tables.glucose.len(),
            carbs: tables.carbs.len(),
            pump_events: tables.pump_events.len(),
            determinations: tables.determinations.len(),
            forecasts: tables.forecasts.len(),
            autosens: tables.autosens.len(),
        }
    }

    /// The most recently committed determination, regardless of `deliverAt`.
    pub async fn latest_determination(&self) -> Option<Determination> {
        self.tables.read().await.determinations.last().cloned()
    }

    pub async fn forecasts_for(&self, determination_id: Uuid) -> Vec<Forecast> {
        self.tables
            .read()
            .await
            .forecasts
            .iter()
            .filter(|f| f.determination_id == determination_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RecordReader for InMemoryStore {
    async fn fetch_glucose(&self, window: TimeWindow) -> ApsResult<Vec<GlucoseRecord>> {
        self.check_read()?;
        let mut rows = self.tables.read().await.glucose.clone();
        newest_first(&mut rows, &window, |r| Some(r.date));
        Ok(rows)
    }

    async fn fetch_carbs(&self, window: TimeWindow) -> ApsResult<Vec<CarbRecord>> {
        self.check_read()?;
        let mut rows = self.tables.read().await.carbs.clone();
        newest_first(&mut rows, &window, |r| Some(r.actual_date));
        Ok(rows)
    }

    async fn fetch_pump_history(&self, window: TimeWindow) -> ApsResult<Vec<PumpEventRecord>> {
        self.check_read()?;
        let mut rows = self.tables.read().await.pump_events.clone();
        newest_first(&mut rows, &window, |r| r.timestamp);
        Ok(rows)
    }

    async fn fetch_active_override(&self, at: DateTime<Utc>) -> ApsResult<Option<OverrideRecord>> {
        self.check_read()?;
        let tables = self.tables.read().await;
        Ok(tables
            .overrides
            .iter()
            .filter(|o| override_active(o, at))
            .max_by_key(|o| o.date)
            .cloned())
    }

    async fn fetch_active_temp_target(&self, at: DateTime<Utc>) -> ApsResult<Option<TempTargetRecord>> {
        self.check_read()?;
        let tables = self.tables.read().await;
        Ok(tables
            .temp_targets
            .iter()
            .filter(|t| temp_target_active(t, at))
            .max_by_key(|t| t.date)
            .cloned())
    }

    async fn fetch_tdd_history(&self, since: DateTime<Utc>) -> ApsResult<Vec<TddRecord>> {
        self.check_read()?;
        let mut rows: Vec<TddRecord> = self
            .tables
            .read()
            .await
            .tdd
            .iter()
            .filter(|row| row.date > since && row.total > 0.0)
            .copied()
            .collect();
        rows.sort_by_key(|row| row.date);
        Ok(rows)
    }

    async fn latest_autosens(&self) -> ApsResult<Option<Autosens>> {
        self.check_read()?;
        Ok(self.tables.read().await.autosens.last().cloned())
    }
}

#[async_trait]
impl RecordWriter for InMemoryStore {
    async fn commit_determination(
        &self,
        determination: &Determination,
        forecasts: &[Forecast],
    ) -> ApsResult<bool> {
        self.check_write()?;
        let id = determination
            .id
            .ok_or_else(|| ApsError::DataAccess("determination has no id".to_string()))?;
        let mut tables = self.tables.write().await;
        if tables.determinations.iter().any(|d| d.id == Some(id)) {
            return Ok(false);
        }
        tables.determinations.push(determination.clone());
        tables.forecasts.extend(forecasts.iter().cloned());
        Ok(true)
    }

    async fn commit_forecast(&self, forecast: &Forecast) -> ApsResult<()> {
        self.check_write()?;
        let mut tables = self.tables.write().await;
        if !tables
            .determinations
            .iter()
            .any(|d| d.id == Some(forecast.determination_id))
        {
            return Err(ApsError::DataAccess(format!(
                "forecast references unknown determination {}",
                forecast.determination_id
            )));
        }
        tables.forecasts.push(forecast.clone());
        Ok(())
    }

    async fn commit_autosens(&self, autosens: &Autosens) -> ApsResult<()> {
        self.check_write()?;
        self.tables.write().await.autosens.push(autosens.clone());
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for InMemoryStore {
    async fn fetch_settings(&self, name: &str) -> ApsResult<Value> {
        self.check_read()?;
        Ok(self
            .tables
            .read()
            .await
            .settings
            .get(name)
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn save_settings(&self, name: &str, value: &Value) -> ApsResult<()> {
        self.check_write()?;
        self.tables
            .write()
            .await
            .settings
            .insert(name.to_string(), value.clone());
        Ok(())
    }
}

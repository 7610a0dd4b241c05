//! Clinical Snapshot Aggregator
use crate::pump_history::{expand_all, iso_millis, PumpHistoryEntry};
use crate::shapes::{CarbEntry, GlucoseEntry};
use aps_core::data_model::{
    Autosens, GlucoseRecord, OverrideRecord, Preferences, TddRecord, TempTargetRecord, TimeWindow,
};
use aps_core::store::{names, RecordReader, SettingsStore};
use aps_core::{ApsError, ApsResult, PipelineConfig, RunContext};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::sync::Arc;

/// Most recent readings considered by the glucose quality check.
const GLUCOSE_CHECK_READINGS: usize = 6;

/// Static settings documents, read once per run.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingsSnapshot {
    pub profile: Value,
    pub pump_profile: Value,
    pub basal_profile: Value,
    pub pump_settings: Value,
    pub bg_targets: Value,
    pub insulin_sensitivities: Value,
    pub carb_ratios: Value,
    pub temp_targets: Value,
    pub model: Value,
    pub app_settings: Value,
    pub reservoir: Value,
    pub preferences: Preferences,
    /// False when no preferences document exists at all
    pub preferences_stored: bool,
}

/// Point-in-time inputs for one pipeline run. Never mutated once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ClinicalSnapshot {
    pub trace_id: String,
    pub as_of: DateTime<Utc>,
    pub glucose: Vec<GlucoseRecord>,
    pub glucose_json: Value,
    pub carbs_json: Value,
    pub pump_history_json: Value,
    pub settings: SettingsSnapshot,
    pub active_override: Option<OverrideRecord>,
    pub active_temp_target: Option<TempTargetRecord>,
    /// Ascending, positive totals only
    pub tdd_history: Vec<TddRecord>,
    pub autosens: Option<Autosens>,
}

impl ClinicalSnapshot {
    /// The as-of time in the format the scripts expect.
    pub fn clock(&self) -> Value {
        Value::String(iso_millis(self.as_of))
    }
}

/// Scheduled runs refuse to dose on thin, stale or flat glucose data.
/// `records` must be most-recent-first.
pub fn validate_glucose(
    records: &[GlucoseRecord],
    as_of: DateTime<Utc>,
    config: &PipelineConfig,
) -> ApsResult<()> {
    let hour_ago = as_of - Duration::hours(1);
    let recent: Vec<&GlucoseRecord> = records
        .iter()
        .filter(|r| r.date > hour_ago && r.date <= as_of)
        .take(GLUCOSE_CHECK_READINGS)
        .collect();

    if recent.len() < config.glucose_min_readings {
        return Err(ApsError::GlucoseUnusable(format!(
            "not enough glucose data ({} readings in the last hour)",
            recent.len()
        )));
    }
    if recent[0].date < as_of - config.glucose_stale_after() {
        return Err(ApsError::GlucoseUnusable(format!(
            "glucose data is stale (last reading {})",
            iso_millis(recent[0].date)
        )));
    }
    let first = recent[0].glucose;
    if recent.iter().all(|r| r.glucose == first) {
        return Err(ApsError::GlucoseUnusable(format!(
            "glucose data is too flat ({} identical readings)",
            recent.len()
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct SnapshotAggregator {
    reader: Arc<dyn RecordReader>,
    settings: Arc<dyn SettingsStore>,
    config: PipelineConfig,
}

impl SnapshotAggregator {
    pub fn new(
        reader: Arc<dyn RecordReader>,
        settings: Arc<dyn SettingsStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            reader,
            settings,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn build_snapshot(&self, run: &RunContext) -> ApsResult<ClinicalSnapshot> {
        let as_of = run.as_of;
        let config = &self.config;
        let glucose_window =
            TimeWindow::lookback(as_of, config.glucose_lookback()).with_limit(config.glucose_limit);
        let carb_window = TimeWindow::lookback(as_of, config.carb_lookback());
        let pump_window = TimeWindow::lookback(as_of, config.pump_history_lookback());

        let (glucose, carbs, pump_events, settings, active_override, active_temp_target, tdd_history, autosens) =
            tokio::try_join!(
                self.reader.fetch_glucose(glucose_window),
                self.reader.fetch_carbs(carb_window),
                self.reader.fetch_pump_history(pump_window),
                self.load_settings(),
                self.reader.fetch_active_override(as_of),
                self.reader.fetch_active_temp_target(as_of),
                self.reader.fetch_tdd_history(as_of - config.tdd_lookback()),
                self.reader.latest_autosens(),
            )?;

        let glucose_json = serde_json::to_value(glucose.iter().map(GlucoseEntry::from).collect::<Vec<_>>())?;

        let mut carb_entries: Vec<CarbEntry> = carbs.iter().map(CarbEntry::from).collect();
        if let Some(amount) = run.simulated_carbs {
            carb_entries.push(CarbEntry::simulated(amount, as_of, &config.simulation_source));
        }
        let carbs_json = serde_json::to_value(&carb_entries)?;

        let mut history = expand_all(&pump_events);
        if let Some(amount) = run.simulated_bolus {
            history.insert(0, PumpHistoryEntry::simulated_bolus(amount, as_of));
        }
        let pump_history_json = serde_json::to_value(&history)?;

        tracing::debug!(
            trace_id = %run.trace_id,
            glucose = glucose.len(),
            carbs = carb_entries.len(),
            pump_entries = history.len(),
            tdd_rows = tdd_history.len(),
            override_active = active_override.is_some(),
            "{} snapshot assembled",
            run.label()
        );

        Ok(ClinicalSnapshot {
            trace_id: run.trace_id.clone(),
            as_of,
            glucose,
            glucose_json,
            carbs_json,
            pump_history_json,
            settings,
            active_override,
            active_temp_target,
            tdd_history,
            autosens,
        })
    }

    pub async fn load_settings(&self) -> ApsResult<SettingsSnapshot> {
        let store = &self.settings;
        let (
            profile,
            pump_profile,
            basal_profile,
            pump_settings,
            bg_targets,
            insulin_sensitivities,
            carb_ratios,
            temp_targets,
            model,
            app_settings,
            reservoir,
            preferences_raw,
        ) = tokio::try_join!(
            store.fetch_settings(names::PROFILE),
            store.fetch_settings(names::PUMP_PROFILE),
            store.fetch_settings(names::BASAL_PROFILE),
            store.fetch_settings(names::PUMP_SETTINGS),
            store.fetch_settings(names::BG_TARGETS),
            store.fetch_settings(names::INSULIN_SENSITIVITIES),
            store.fetch_settings(names::CARB_RATIOS),
            store.fetch_settings(names::TEMP_TARGETS),
            store.fetch_settings(names::MODEL),
            store.fetch_settings(names::APP_SETTINGS),
            store.fetch_settings(names::RESERVOIR),
            store.fetch_settings(names::PREFERENCES),
        )?;

        let preferences_stored = !preferences_raw.is_null();
        let preferences = if preferences_stored {
            serde_json::from_value(preferences_raw).map_err(|err| {
                ApsError::DataAccess(format!("preferences are malformed: {}", err))
            })?
        } else {
            Preferences::default()
        };

        Ok(SettingsSnapshot {
            profile,
            pump_profile,
            basal_profile,
            pump_settings,
            bg_targets,
            insulin_sensitivities,
            carb_ratios,
            temp_targets,
            model,
            app_settings,
            reservoir,
            preferences,
            preferences_stored,
        })
    }
}

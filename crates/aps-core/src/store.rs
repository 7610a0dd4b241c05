//! Record store contracts
//!
//! The clinical record store is an external collaborator. The pipeline only
//! needs windowed, ordered reads, a settings lookup by name and an atomic
//! commit of a determination with its forecasts.
use crate::data_model::{
    Autosens, CarbRecord, Determination, Forecast, GlucoseRecord, OverrideRecord,
    PumpEventRecord, TddRecord, TempTargetRecord, TimeWindow,
};
use crate::error::{ApsError, ApsResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

/// Logical settings documents handed to the scripts.
pub mod names {
    pub const PROFILE: &str = "profile";
    pub const PUMP_PROFILE: &str = "pump_profile";
    pub const BASAL_PROFILE: &str = "basal_profile";
    pub const PUMP_SETTINGS: &str = "settings";
    pub const BG_TARGETS: &str = "bg_targets";
    pub const INSULIN_SENSITIVITIES: &str = "insulin_sensitivities";
    pub const CARB_RATIOS: &str = "carb_ratios";
    pub const TEMP_TARGETS: &str = "temptargets";
    pub const PREFERENCES: &str = "preferences";
    pub const MODEL: &str = "model";
    pub const APP_SETTINGS: &str = "app_settings";
    pub const RESERVOIR: &str = "reservoir";
    pub const IOB: &str = "iob";
    pub const ADJUSTMENT_VARIABLES: &str = "oref2_variables";
}

/// Windowed reads. Every list comes back most-recent-first unless noted.
#[async_trait]
pub trait RecordReader: Send + Sync {
    async fn fetch_glucose(&self, window: TimeWindow) -> ApsResult<Vec<GlucoseRecord>>;

    async fn fetch_carbs(&self, window: TimeWindow) -> ApsResult<Vec<CarbRecord>>;

    async fn fetch_pump_history(&self, window: TimeWindow) -> ApsResult<Vec<PumpEventRecord>>;

    async fn fetch_active_override(&self, at: DateTime<Utc>) -> ApsResult<Option<OverrideRecord>>;

    async fn fetch_active_temp_target(&self, at: DateTime<Utc>) -> ApsResult<Option<TempTargetRecord>>;

    /// Rows with `date > since` and a positive total, oldest first.
    async fn fetch_tdd_history(&self, since: DateTime<Utc>) -> ApsResult<Vec<TddRecord>>;

    async fn latest_autosens(&self) -> ApsResult<Option<Autosens>>;
}

#[async_trait]
pub trait RecordWriter: Send + Sync {
    /// Writes the determination and all of its forecasts as one unit.
    /// Returns `false` when a record with the same id was already committed.
    async fn commit_determination(
        &self,
        determination: &Determination,
        forecasts: &[Forecast],
    ) -> ApsResult<bool>;

    async fn commit_forecast(&self, forecast: &Forecast) -> ApsResult<()>;

    async fn commit_autosens(&self, autosens: &Autosens) -> ApsResult<()>;
}

/// Named JSON documents. Absent documents read as `Value::Null`.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn fetch_settings(&self, name: &str) -> ApsResult<Value>;

    async fn save_settings(&self, name: &str, value: &Value) -> ApsResult<()>;
}

/// One `<name>.json` file per document under a directory.
#[derive(Debug, Clone)]
pub struct FileSettingsStore {
    root: PathBuf,
}

impl FileSettingsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.json", name))
    }
}

#[async_trait]
impl SettingsStore for FileSettingsStore {
    async fn fetch_settings(&self, name: &str) -> ApsResult<Value> {
        let path = self.path(name);
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str(&raw).map_err(|err| {
                ApsError::DataAccess(format!("settings {} is not valid JSON: {}", name, err))
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Value::Null),
            Err(err) => Err(ApsError::DataAccess(format!(
                "reading settings {}: {}",
                path.display(),
                err
            ))),
        }
    }

    async fn save_settings(&self, name: &str, value: &Value) -> ApsResult<()> {
        let raw = serde_json::to_string_pretty(value)?;
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|err| ApsError::DataAccess(format!("creating settings dir: {}", err)))?;
        tokio::fs::write(self.path(name), raw)
            .await
            .map_err(|err| ApsError::DataAccess(format!("writing settings {}: {}", name, err)))
    }
}

/// Reads from `primary`, falling back to bundled `defaults` for absent
/// documents. Writes only go to `primary`.
#[derive(Clone)]
pub struct LayeredSettings {
    primary: Arc<dyn SettingsStore>,
    defaults: Arc<dyn SettingsStore>,
}

impl LayeredSettings {
    pub fn new(primary: Arc<dyn SettingsStore>, defaults: Arc<dyn SettingsStore>) -> Self {
        Self { primary, defaults }
    }
}

#[async_trait]
impl SettingsStore for LayeredSettings {
    async fn fetch_settings(&self, name: &str) -> ApsResult<Value> {
        match self.primary.fetch_settings(name).await? {
            Value::Null => self.defaults.fetch_settings(name).await,
            value => Ok(value),
        }
    }

    async fn save_settings(&self, name: &str, value: &Value) -> ApsResult<()> {
        self.primary.save_settings(name, value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scratch_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("aps-settings-{}-{}", tag, uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn file_store_round_trips_and_reports_missing_as_null() {
        let store = FileSettingsStore::new(scratch_dir("rt"));
        assert_eq!(store.fetch_settings(names::PREFERENCES).await.unwrap(), Value::Null);

        store
            .save_settings(names::PREFERENCES, &json!({ "useNewFormula": true }))
            .await
            .unwrap();
        let back = store.fetch_settings(names::PREFERENCES).await.unwrap();
        assert_eq!(back["useNewFormula"], json!(true));
    }

    #[tokio::test]
    async fn layered_store_falls_back_to_defaults() {
        let primary = FileSettingsStore::new(scratch_dir("primary"));
        let defaults = FileSettingsStore::new(scratch_dir("defaults"));
        defaults
            .save_settings(names::MODEL, &json!("\"722\""))
            .await
            .unwrap();

        let layered = LayeredSettings::new(Arc::new(primary.clone()), Arc::new(defaults));
        assert_eq!(layered.fetch_settings(names::MODEL).await.unwrap(), json!("\"722\""));

        layered.save_settings(names::MODEL, &json!("523")).await.unwrap();
        assert_eq!(layered.fetch_settings(names::MODEL).await.unwrap(), json!("523"));
        assert_eq!(primary.fetch_settings(names::MODEL).await.unwrap(), json!("523"));
    }
}

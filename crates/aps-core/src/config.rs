//! Pipeline configuration
use crate::pool::PoolConfig;
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Five-minute TDD samples per day.
pub const TDD_SAMPLES_PER_DAY: i64 = 288;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub pool: PoolConfig,
    pub glucose_lookback_hours: i64,
    pub glucose_limit: usize,
    pub carb_lookback_hours: i64,
    pub pump_history_lookback_minutes: i64,
    pub tdd_lookback_days: i64,
    pub tdd_sufficiency_days: i64,
    pub tdd_sufficiency_ratio: f64,
    pub autosens_max_age_minutes: i64,
    pub glucose_min_readings: usize,
    pub glucose_stale_minutes: i64,
    /// `enteredBy` tag on simulated carb entries
    pub simulation_source: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            glucose_lookback_hours: 24,
            glucose_limit: 72,
            carb_lookback_hours: 24,
            pump_history_lookback_minutes: 1440,
            tdd_lookback_days: 10,
            tdd_sufficiency_days: 7,
            tdd_sufficiency_ratio: 0.85,
            autosens_max_age_minutes: 30,
            glucose_min_readings: 3,
            glucose_stale_minutes: 12,
            simulation_source: "aps-simulation".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn glucose_lookback(&self) -> Duration {
        Duration::hours(self.glucose_lookback_hours)
    }

    pub fn carb_lookback(&self) -> Duration {
        Duration::hours(self.carb_lookback_hours)
    }

    pub fn pump_history_lookback(&self) -> Duration {
        Duration::minutes(self.pump_history_lookback_minutes)
    }

    pub fn tdd_lookback(&self) -> Duration {
        Duration::days(self.tdd_lookback_days)
    }

    pub fn tdd_sufficiency_window(&self) -> Duration {
        Duration::days(self.tdd_sufficiency_days)
    }

    /// Minimum positive TDD rows in the sufficiency window.
    pub fn tdd_required_rows(&self) -> usize {
        let expected = (self.tdd_sufficiency_days * TDD_SAMPLES_PER_DAY) as f64;
        (expected * self.tdd_sufficiency_ratio).floor() as usize
    }

    pub fn autosens_max_age(&self) -> Duration {
        Duration::minutes(self.autosens_max_age_minutes)
    }

    pub fn glucose_stale_after(&self) -> Duration {
        Duration::minutes(self.glucose_stale_minutes)
    }
}

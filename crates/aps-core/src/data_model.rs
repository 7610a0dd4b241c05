//! Data Model: clinical records, Determination, Autosens, adjustment variables
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ============================================================================
// WINDOWS
// ============================================================================

/// Half-open fetch window `(start, end]` plus an optional row cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub limit: Option<usize>,
}

impl TimeWindow {
    pub fn lookback(end: DateTime<Utc>, span: Duration) -> Self {
        Self {
            start: end - span,
            end,
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at > self.start && at <= self.end
    }
}

// ============================================================================
// STORED RECORDS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlucoseRecord {
    pub id: Uuid,
    pub date: DateTime<Utc>,
    /// mg/dL
    pub glucose: i32,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub is_manual: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarbRecord {
    pub id: Uuid,
    /// When the carbs were (or will be) eaten
    pub actual_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub carbs: f64,
    #[serde(default)]
    pub fat: f64,
    #[serde(default)]
    pub protein: f64,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub is_fpu: bool,
    #[serde(default)]
    pub fpu_id: Option<String>,
    #[serde(default)]
    pub entered_by: Option<String>,
}

/// Pump event kinds as written by pump drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PumpEventType {
    Bolus,
    #[serde(rename = "SMB")]
    Smb,
    #[serde(rename = "External Insulin")]
    ExternalInsulin,
    TempBasal,
    TempBasalDuration,
    PumpSuspend,
    PumpResume,
    PumpAlarm,
    PumpBattery,
    Rewind,
    Prime,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BolusDetail {
    pub amount: Option<f64>,
    #[serde(default)]
    pub is_external: bool,
    #[serde(default)]
    pub is_smb: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TempBasalDetail {
    pub rate: Option<f64>,
    /// Minutes
    #[serde(default)]
    pub duration: i32,
    #[serde(default)]
    pub temp_type: Option<String>,
}

/// One stored pump event. Depending on which parts are populated it expands
/// into zero or more script-facing history entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PumpEventRecord {
    pub id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub event_type: Option<PumpEventType>,
    #[serde(default)]
    pub bolus: Option<BolusDetail>,
    #[serde(default)]
    pub temp_basal: Option<TempBasalDetail>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideRecord {
    pub id: Uuid,
    pub date: DateTime<Utc>,
    pub enabled: bool,
    /// Insulin need in percent; 100 is neutral
    pub percentage: f64,
    #[serde(default = "default_true")]
    pub indefinite: bool,
    #[serde(default)]
    pub smb_is_off: bool,
    #[serde(default)]
    pub target: Option<f64>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub advanced_settings: bool,
    #[serde(default)]
    pub isf_and_cr: bool,
    #[serde(default)]
    pub isf: bool,
    #[serde(default)]
    pub cr: bool,
    #[serde(default)]
    pub smb_is_scheduled_off: bool,
    #[serde(default)]
    pub start: Option<f64>,
    #[serde(default)]
    pub end: Option<f64>,
    #[serde(default)]
    pub smb_minutes: Option<f64>,
    #[serde(default)]
    pub uam_minutes: Option<f64>,
}

impl OverrideRecord {
    pub fn new(percentage: f64, date: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            date,
            enabled: true,
            percentage,
            indefinite: true,
            smb_is_off: false,
            target: None,
            duration: None,
            advanced_settings: false,
            isf_and_cr: false,
            isf: false,
            cr: false,
            smb_is_scheduled_off: false,
            start: None,
            end: None,
            smb_minutes: None,
            uam_minutes: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TempTargetRecord {
    pub id: Uuid,
    pub date: DateTime<Utc>,
    pub enabled: bool,
    #[serde(default)]
    pub target_top: Option<f64>,
    #[serde(default)]
    pub target_bottom: Option<f64>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub half_basal_target: Option<f64>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// One total-daily-dose sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TddRecord {
    pub date: DateTime<Utc>,
    pub total: f64,
}

// ============================================================================
// PUMP STATE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TempType {
    Absolute,
    Percent,
}

/// Currently running temp basal, handed to the determine phase as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TempBasal {
    pub duration: i32,
    pub rate: f64,
    pub temp: TempType,
    pub timestamp: DateTime<Utc>,
}

impl TempBasal {
    /// No temp running: zero duration at scheduled basal.
    pub fn none(at: DateTime<Utc>) -> Self {
        Self {
            duration: 0,
            rate: 0.0,
            temp: TempType::Absolute,
            timestamp: at,
        }
    }
}

// ============================================================================
// PREFERENCES
// ============================================================================

fn default_true() -> bool {
    true
}

fn default_weight_percentage() -> f64 {
    0.35
}

fn default_smb_minutes() -> f64 {
    30.0
}

fn default_half_basal_target() -> f64 {
    160.0
}

fn default_autosens_max() -> f64 {
    1.2
}

/// User preferences. Only the fields the pipeline itself reads are typed;
/// everything else passes through to the scripts untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(rename = "useNewFormula", default)]
    pub use_new_formula: bool,
    #[serde(default)]
    pub sigmoid: bool,
    #[serde(rename = "weightPercentage", default = "default_weight_percentage")]
    pub weight_percentage: f64,
    #[serde(rename = "maxSMBBasalMinutes", default = "default_smb_minutes")]
    pub max_smb_basal_minutes: f64,
    #[serde(rename = "maxUAMSMBBasalMinutes", default = "default_smb_minutes")]
    pub max_uam_smb_basal_minutes: f64,
    #[serde(default = "default_half_basal_target")]
    pub half_basal_exercise_target: f64,
    #[serde(default)]
    pub low_temptarget_lowers_sensitivity: bool,
    #[serde(default = "default_autosens_max")]
    pub autosens_max: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            use_new_formula: false,
            sigmoid: false,
            weight_percentage: default_weight_percentage(),
            max_smb_basal_minutes: default_smb_minutes(),
            max_uam_smb_basal_minutes: default_smb_minutes(),
            half_basal_exercise_target: default_half_basal_target(),
            low_temptarget_lowers_sensitivity: false,
            autosens_max: default_autosens_max(),
            extra: Map::new(),
        }
    }
}

// ============================================================================
// PHASE RESULTS
// ============================================================================

/// Result of the sensitivity-detection phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Autosens {
    pub ratio: f64,
    #[serde(default)]
    pub newisf: Option<f64>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Autosens {
    pub fn is_fresh(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        self.timestamp
            .map(|ts| ts + max_age > now)
            .unwrap_or(false)
    }
}

/// Derived per-run adjustment inputs ("oref2 variables").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentVariables {
    pub average_total_data: f64,
    #[serde(rename = "weightedAverage")]
    pub weighted_average: f64,
    #[serde(rename = "currentTDD")]
    pub current_tdd: f64,
    #[serde(rename = "past2hoursAverage")]
    pub past_2_hours_average: f64,
    pub date: DateTime<Utc>,
    #[serde(rename = "overridePercentage")]
    pub override_percentage: f64,
    #[serde(rename = "useOverride")]
    pub use_override: bool,
    pub duration: f64,
    pub unlimited: bool,
    #[serde(rename = "overrideTarget")]
    pub override_target: f64,
    #[serde(rename = "smbIsOff")]
    pub smb_is_off: bool,
    #[serde(rename = "advancedSettings")]
    pub advanced_settings: bool,
    #[serde(rename = "isfAndCr")]
    pub isf_and_cr: bool,
    pub isf: bool,
    pub cr: bool,
    #[serde(rename = "smbIsScheduledOff")]
    pub smb_is_scheduled_off: bool,
    pub start: f64,
    pub end: f64,
    #[serde(rename = "smbMinutes")]
    pub smb_minutes: f64,
    #[serde(rename = "uamMinutes")]
    pub uam_minutes: f64,
}

impl AdjustmentVariables {
    /// Values used when no override is active and no TDD history exists.
    pub fn neutral(date: DateTime<Utc>) -> Self {
        Self {
            average_total_data: 0.0,
            weighted_average: 1.0,
            current_tdd: 0.0,
            past_2_hours_average: 0.0,
            date,
            override_percentage: 100.0,
            use_override: false,
            duration: 0.0,
            unlimited: true,
            override_target: 0.0,
            smb_is_off: false,
            advanced_settings: false,
            isf_and_cr: false,
            isf: false,
            cr: false,
            smb_is_scheduled_off: false,
            start: 0.0,
            end: 0.0,
            smb_minutes: default_smb_minutes(),
            uam_minutes: default_smb_minutes(),
        }
    }
}

// ============================================================================
// DETERMINATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Predictions {
    #[serde(rename = "IOB", default, skip_serializing_if = "Option::is_none")]
    pub iob: Option<Vec<f64>>,
    #[serde(rename = "ZT", default, skip_serializing_if = "Option::is_none")]
    pub zt: Option<Vec<f64>>,
    #[serde(rename = "COB", default, skip_serializing_if = "Option::is_none")]
    pub cob: Option<Vec<f64>>,
    #[serde(rename = "UAM", default, skip_serializing_if = "Option::is_none")]
    pub uam: Option<Vec<f64>>,
}

impl Predictions {
    pub fn series(&self) -> Vec<(ForecastType, &[f64])> {
        [
            (ForecastType::Iob, self.iob.as_deref()),
            (ForecastType::Zt, self.zt.as_deref()),
            (ForecastType::Cob, self.cob.as_deref()),
            (ForecastType::Uam, self.uam.as_deref()),
        ]
        .into_iter()
        .filter_map(|(kind, values)| values.map(|v| (kind, v)))
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InsulinBreakdown {
    #[serde(rename = "temp_basal", default)]
    pub temp_basal: Option<f64>,
    #[serde(default)]
    pub bolus: Option<f64>,
    #[serde(rename = "TDD", default)]
    pub tdd: Option<f64>,
    #[serde(rename = "scheduled_basal", default)]
    pub scheduled_basal: Option<f64>,
}

/// The pipeline's dosing recommendation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Determination {
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(default)]
    pub reason: String,
    /// Microbolus to deliver now
    #[serde(default)]
    pub units: Option<f64>,
    #[serde(rename = "insulinReq", default)]
    pub insulin_req: Option<f64>,
    #[serde(rename = "eventualBG", default)]
    pub eventual_bg: Option<f64>,
    #[serde(rename = "sensitivityRatio", default)]
    pub sensitivity_ratio: Option<f64>,
    #[serde(default)]
    pub rate: Option<f64>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(rename = "IOB", default)]
    pub iob: Option<f64>,
    #[serde(rename = "COB", default)]
    pub cob: Option<f64>,
    #[serde(rename = "predBGs", default)]
    pub predictions: Option<Predictions>,
    #[serde(rename = "deliverAt", default)]
    pub deliver_at: Option<DateTime<Utc>>,
    #[serde(rename = "carbsReq", default)]
    pub carbs_req: Option<f64>,
    #[serde(default)]
    pub temp: Option<TempType>,
    #[serde(default)]
    pub bg: Option<f64>,
    #[serde(default)]
    pub reservoir: Option<f64>,
    #[serde(rename = "ISF", default)]
    pub isf: Option<f64>,
    /// Canonical time; starts equal to `deliver_at`, advanced on enactment.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "TDD", default)]
    pub tdd: Option<f64>,
    #[serde(default)]
    pub insulin: Option<InsulinBreakdown>,
    #[serde(default)]
    pub current_target: Option<f64>,
    #[serde(rename = "insulinForManualBolus", default)]
    pub insulin_for_manual_bolus: Option<f64>,
    #[serde(rename = "manualBolusErrorString", default)]
    pub manual_bolus_error_string: Option<f64>,
    #[serde(rename = "minDelta", default)]
    pub min_delta: Option<f64>,
    #[serde(rename = "expectedDelta", default)]
    pub expected_delta: Option<f64>,
    #[serde(rename = "minGuardBG", default)]
    pub min_guard_bg: Option<f64>,
    #[serde(rename = "minPredBG", default)]
    pub min_pred_bg: Option<f64>,
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(rename = "CR", default)]
    pub carb_ratio: Option<f64>,
    #[serde(rename = "recieved", default)]
    pub received: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ForecastType {
    #[serde(rename = "iob")]
    Iob,
    #[serde(rename = "zt")]
    Zt,
    #[serde(rename = "cob")]
    Cob,
    #[serde(rename = "uam")]
    Uam,
}

impl ForecastType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Iob => "iob",
            Self::Zt => "zt",
            Self::Cob => "cob",
            Self::Uam => "uam",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForecastValue {
    pub index: i32,
    pub value: i32,
}

/// One prediction curve attached to a committed determination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub id: Uuid,
    pub determination_id: Uuid,
    pub forecast_type: ForecastType,
    pub date: DateTime<Utc>,
    pub values: Vec<ForecastValue>,
}

impl Forecast {
    pub fn from_series(
        determination_id: Uuid,
        forecast_type: ForecastType,
        date: DateTime<Utc>,
        series: &[f64],
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            determination_id,
            forecast_type,
            date,
            values: series
                .iter()
                .enumerate()
                .map(|(index, value)| ForecastValue {
                    index: index as i32,
                    value: value.round() as i32,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn determination_reads_oref_field_names() {
        let raw = json!({
            "reason": "COB: 0, Dev: 5",
            "deliverAt": "2024-05-01T10:00:00.000Z",
            "IOB": 1.25,
            "COB": 12,
            "ISF": 50,
            "CR": 10,
            "eventualBG": 118,
            "recieved": false,
            "predBGs": { "IOB": [120, 118.6, 117], "ZT": [120, 110] }
        });
        let determination: Determination = serde_json::from_value(raw).unwrap();
        assert_eq!(determination.iob, Some(1.25));
        assert_eq!(determination.cob, Some(12.0));
        assert_eq!(determination.carb_ratio, Some(10.0));
        assert_eq!(determination.received, Some(false));
        assert!(determination.deliver_at.is_some());
        let series = determination.predictions.unwrap();
        assert_eq!(series.series().len(), 2);
    }

    #[test]
    fn forecast_rounds_values_and_keeps_index() {
        let forecast = Forecast::from_series(Uuid::new_v4(), ForecastType::Iob, Utc::now(), &[100.4, 99.6]);
        assert_eq!(
            forecast.values,
            vec![
                ForecastValue { index: 0, value: 100 },
                ForecastValue { index: 1, value: 100 },
            ]
        );
    }

    #[test]
    fn preferences_pass_unknown_fields_through() {
        let raw = json!({ "useNewFormula": true, "max_iob": 3.5 });
        let prefs: Preferences = serde_json::from_value(raw).unwrap();
        assert!(prefs.use_new_formula);
        assert_eq!(prefs.weight_percentage, 0.35);
        let back = serde_json::to_value(&prefs).unwrap();
        assert_eq!(back["max_iob"], json!(3.5));
    }

    #[test]
    fn neutral_adjustments_enable_smb() {
        let vars = AdjustmentVariables::neutral(Utc::now());
        assert_eq!(vars.override_percentage, 100.0);
        assert!(!vars.use_override);
        assert!(!vars.smb_is_off);
    }

    #[test]
    fn window_is_half_open() {
        let end = Utc::now();
        let window = TimeWindow::lookback(end, Duration::hours(1));
        assert!(window.contains(end));
        assert!(!window.contains(end - Duration::hours(1)));
    }
}

//! Adjustment variables ("oref2 variables") and the dynamic-sensitivity guard.
//!
//! Pure functions of the snapshot. No script runs here.
use aps_core::data_model::{AdjustmentVariables, Preferences, TddRecord};
use aps_core::PipelineConfig;
use aps_snapshot::ClinicalSnapshot;
use chrono::{DateTime, Duration, Utc};

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    sum / count.max(1) as f64
}

/// Derives the variables from the snapshot's TDD history (ascending,
/// positive totals only) and its active override.
pub fn compute(snapshot: &ClinicalSnapshot) -> AdjustmentVariables {
    let tdd = &snapshot.tdd_history;
    let as_of = snapshot.as_of;
    let prefs = &snapshot.settings.preferences;
    let weight = if snapshot.settings.preferences_stored {
        prefs.weight_percentage
    } else {
        1.0
    };

    let two_hours_ago = as_of - Duration::hours(2);
    let average_ten_days = mean(tdd.iter().map(|r| r.total));
    let average_two_hours = mean(tdd.iter().filter(|r| r.date >= two_hours_ago).map(|r| r.total));
    let current_tdd = tdd.last().map(|r| r.total).unwrap_or(0.0);
    let has_tdd = current_tdd > 0.0;

    let mut vars = AdjustmentVariables::neutral(as_of);
    vars.current_tdd = current_tdd;
    if has_tdd {
        vars.average_total_data = average_ten_days;
        vars.past_2_hours_average = average_two_hours;
        vars.weighted_average = weight * average_two_hours + (1.0 - weight) * average_ten_days;
    }
    vars.smb_minutes = prefs.max_smb_basal_minutes;
    vars.uam_minutes = prefs.max_uam_smb_basal_minutes;

    if let Some(active) = &snapshot.active_override {
        vars.use_override = active.enabled;
        vars.override_percentage = active.percentage;
        vars.unlimited = active.indefinite;
        vars.duration = active.duration.unwrap_or(0.0);
        vars.override_target = active.target.unwrap_or(0.0);
        vars.smb_is_off = active.smb_is_off;
        vars.advanced_settings = active.advanced_settings;
        vars.isf_and_cr = active.isf_and_cr;
        vars.isf = active.isf;
        vars.cr = active.cr;
        vars.smb_is_scheduled_off = active.smb_is_scheduled_off;
        vars.start = active.start.unwrap_or(0.0);
        vars.end = active.end.unwrap_or(0.0);
        vars.smb_minutes = active.smb_minutes.unwrap_or(vars.smb_minutes);
        vars.uam_minutes = active.uam_minutes.unwrap_or(vars.uam_minutes);
    }
    vars
}

/// Whether enough TDD samples exist for the dynamic ISF formulas.
pub fn has_sufficient_tdd(tdd: &[TddRecord], as_of: DateTime<Utc>, config: &PipelineConfig) -> bool {
    let since = as_of - config.tdd_sufficiency_window();
    let rows = tdd.iter().filter(|r| r.date > since && r.total > 0.0).count();
    rows >= config.tdd_required_rows()
}

/// Turns dynamic ISF (and the sigmoid variant with it) off for this run when
/// TDD history is too thin. Returns the preferences to use and whether a
/// downgrade happened. The stored preferences are never touched.
pub fn guard_dynamic_sensitivity(preferences: &Preferences, sufficient_tdd: bool) -> (Preferences, bool) {
    let mut effective = preferences.clone();
    if sufficient_tdd || !preferences.use_new_formula {
        return (effective, false);
    }
    effective.use_new_formula = false;
    effective.sigmoid = false;
    (effective, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aps_core::data_model::OverrideRecord;
    use aps_snapshot::SettingsSnapshot;
    use serde_json::Value;

    fn snapshot(
        now: DateTime<Utc>,
        tdd_history: Vec<TddRecord>,
        prefs: Option<Preferences>,
        active: Option<OverrideRecord>,
    ) -> ClinicalSnapshot {
        ClinicalSnapshot {
            trace_id: "t".to_string(),
            as_of: now,
            glucose: vec![],
            glucose_json: Value::Array(vec![]),
            carbs_json: Value::Array(vec![]),
            pump_history_json: Value::Array(vec![]),
            settings: SettingsSnapshot {
                profile: Value::Null,
                pump_profile: Value::Null,
                basal_profile: Value::Null,
                pump_settings: Value::Null,
                bg_targets: Value::Null,
                insulin_sensitivities: Value::Null,
                carb_ratios: Value::Null,
                temp_targets: Value::Null,
                model: Value::Null,
                app_settings: Value::Null,
                reservoir: Value::Null,
                preferences_stored: prefs.is_some(),
                preferences: prefs.unwrap_or_default(),
            },
            active_override: active,
            active_temp_target: None,
            tdd_history,
            autosens: None,
        }
    }

    fn tdd_rows(now: DateTime<Utc>, totals: &[(i64, f64)]) -> Vec<TddRecord> {
        totals
            .iter()
            .map(|(minutes_ago, total)| TddRecord {
                date: now - Duration::minutes(*minutes_ago),
                total: *total,
            })
            .collect()
    }

    #[test]
    fn no_override_and_no_tdd_is_neutral() {
        let now = Utc::now();
        let vars = compute(&snapshot(now, vec![], None, None));
        assert_eq!(vars, AdjustmentVariables::neutral(now));
    }

    #[test]
    fn override_fields_pass_through_regardless_of_tdd() {
        let now = Utc::now();
        let active = OverrideRecord::new(120.0, now);
        let rows = tdd_rows(now, &[(600, 40.0), (5, 42.0)]);
        let vars = compute(&snapshot(now, rows, None, Some(active)));
        assert_eq!(vars.override_percentage, 120.0);
        assert!(vars.use_override);
        assert!(vars.unlimited);
    }

    #[test]
    fn weighted_average_blends_recent_and_long_term() {
        let now = Utc::now();
        let prefs = Preferences {
            weight_percentage: 0.5,
            ..Preferences::default()
        };
        // 10 day mean 30, 2 hour mean 35
        let rows = tdd_rows(now, &[(3000, 20.0), (60, 30.0), (5, 40.0)]);
        let vars = compute(&snapshot(now, rows, Some(prefs), None));
        assert_eq!(vars.current_tdd, 40.0);
        assert_eq!(vars.average_total_data, 30.0);
        assert_eq!(vars.past_2_hours_average, 35.0);
        assert_eq!(vars.weighted_average, 0.5 * 35.0 + 0.5 * 30.0);
    }

    #[test]
    fn missing_preferences_weight_recent_data_fully() {
        let now = Utc::now();
        let rows = tdd_rows(now, &[(3000, 20.0), (5, 40.0)]);
        let vars = compute(&snapshot(now, rows, None, None));
        assert_eq!(vars.weighted_average, 40.0);
    }

    #[test]
    fn override_minutes_fall_back_to_preferences() {
        let now = Utc::now();
        let prefs = Preferences {
            max_smb_basal_minutes: 45.0,
            ..Preferences::default()
        };
        let mut active = OverrideRecord::new(100.0, now);
        active.uam_minutes = Some(15.0);
        let vars = compute(&snapshot(now, vec![], Some(prefs), Some(active)));
        assert_eq!(vars.smb_minutes, 45.0);
        assert_eq!(vars.uam_minutes, 15.0);
    }

    #[test]
    fn sufficiency_counts_only_the_last_seven_days() {
        let now = Utc::now();
        let config = PipelineConfig::default();
        let dense: Vec<TddRecord> = (0..1713)
            .map(|i| TddRecord {
                date: now - Duration::minutes(5 * i),
                total: 1.0,
            })
            .collect();
        assert!(has_sufficient_tdd(&dense, now, &config));
        assert!(!has_sufficient_tdd(&dense[..1712], now, &config));
        assert!(!has_sufficient_tdd(&[], now, &config));
    }

    #[test]
    fn downgrade_turns_off_both_formulas() {
        let prefs = Preferences {
            use_new_formula: true,
            sigmoid: true,
            ..Preferences::default()
        };
        let (effective, downgraded) = guard_dynamic_sensitivity(&prefs, false);
        assert!(downgraded);
        assert!(!effective.use_new_formula);
        assert!(!effective.sigmoid);
        assert!(prefs.use_new_formula, "input is left untouched");

        let (kept, downgraded) = guard_dynamic_sensitivity(&prefs, true);
        assert!(!downgraded);
        assert!(kept.sigmoid);
    }
}

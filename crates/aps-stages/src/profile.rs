//! Profile phase: builds the algorithm profile from static settings.
use crate::phase::Phase;
use aps_core::data_model::{Preferences, TempTargetRecord};
use aps_core::script::{functions, names};
use serde_json::Value;

const PROFILE_SCRIPTS: &[&str] = &[names::PREPARE_LOG, names::BUNDLE_PROFILE, names::PREPARE_PROFILE];

pub struct ProfilePhase;

impl Phase for ProfilePhase {
    fn id(&self) -> &'static str {
        "profile"
    }

    fn scripts(&self) -> &'static [&'static str] {
        PROFILE_SCRIPTS
    }
}

/// Same scripts, but calls `exportDefaults` to get default preferences.
pub struct DefaultPreferencesPhase;

impl Phase for DefaultPreferencesPhase {
    fn id(&self) -> &'static str {
        "defaults"
    }

    fn scripts(&self) -> &'static [&'static str] {
        PROFILE_SCRIPTS
    }

    fn entry(&self) -> &'static str {
        functions::EXPORT_DEFAULTS
    }
}

#[derive(Debug, Clone)]
pub struct ProfileInputs {
    pub pump_settings: Value,
    pub bg_targets: Value,
    pub insulin_sensitivities: Value,
    pub basal_profile: Value,
    pub preferences: Value,
    pub carb_ratios: Value,
    pub temp_targets: Value,
    pub model: Value,
    pub app_settings: Value,
}

impl ProfileInputs {
    pub fn into_args(self) -> Vec<Value> {
        vec![
            self.pump_settings,
            self.bg_targets,
            self.insulin_sensitivities,
            self.basal_profile,
            self.preferences,
            self.carb_ratios,
            self.temp_targets,
            self.model,
            // autotune
            Value::Null,
            self.app_settings,
        ]
    }
}

/// Preferences as the profile script should see them right now.
///
/// An enabled temp target with its own half-basal target replaces the
/// configured one; a low temp target may only lower sensitivity when
/// autosens is allowed to go above 1.
pub fn adjust_preferences(preferences: &Preferences, temp_target: Option<&TempTargetRecord>) -> Preferences {
    let mut adjusted = preferences.clone();
    if let Some(half_basal) = temp_target
        .filter(|t| t.enabled)
        .and_then(|t| t.half_basal_target)
    {
        if half_basal != preferences.half_basal_exercise_target {
            tracing::debug!(half_basal, "using half basal target of active temp target");
            adjusted.half_basal_exercise_target = half_basal;
        }
    }
    if preferences.low_temptarget_lowers_sensitivity && preferences.autosens_max <= 1.0 {
        tracing::debug!(
            autosens_max = preferences.autosens_max,
            "low temp target cannot lower sensitivity with this autosens max"
        );
        adjusted.low_temptarget_lowers_sensitivity = false;
    }
    adjusted
}

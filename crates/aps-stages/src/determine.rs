//! Determine phase: the final dosing decision.
use crate::phase::Phase;
use aps_core::script::names;
use serde_json::Value;

pub struct DeterminePhase;

impl Phase for DeterminePhase {
    fn id(&self) -> &'static str {
        "determine"
    }

    fn scripts(&self) -> &'static [&'static str] {
        &[
            names::PREPARE_LOG,
            names::PREPARE_DETERMINE_BASAL,
            names::BUNDLE_BASAL_SET_TEMP,
            names::BUNDLE_GET_LAST_GLUCOSE,
            names::BUNDLE_DETERMINE_BASAL,
        ]
    }

    fn middleware(&self) -> Option<&'static str> {
        Some(names::MIDDLEWARE_DETERMINE_BASAL)
    }
}

#[derive(Debug, Clone)]
pub struct DetermineInputs {
    pub iob: Value,
    pub current_temp: Value,
    pub glucose: Value,
    pub profile: Value,
    pub autosens: Value,
    pub meal: Value,
    pub micro_bolus_allowed: bool,
    pub reservoir: Value,
    pub clock: Value,
    pub pump_history: Value,
    pub preferences: Value,
    pub basal_profile: Value,
    pub adjustment: Value,
}

impl DetermineInputs {
    pub fn into_args(self) -> Vec<Value> {
        vec![
            self.iob,
            self.current_temp,
            self.glucose,
            self.profile,
            self.autosens,
            self.meal,
            Value::Bool(self.micro_bolus_allowed),
            self.reservoir,
            self.clock,
            self.pump_history,
            self.preferences,
            self.basal_profile,
            self.adjustment,
        ]
    }
}

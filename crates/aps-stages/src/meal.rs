//! Meal phase: carb absorption state.
use crate::phase::Phase;
use aps_core::script::names;
use serde_json::Value;

pub struct MealPhase;

impl Phase for MealPhase {
    fn id(&self) -> &'static str {
        "meal"
    }

    fn scripts(&self) -> &'static [&'static str] {
        &[names::PREPARE_LOG, names::BUNDLE_MEAL, names::PREPARE_MEAL]
    }
}

#[derive(Debug, Clone)]
pub struct MealInputs {
    pub pump_history: Value,
    pub profile: Value,
    pub clock: Value,
    pub glucose: Value,
    pub basal_profile: Value,
    pub carbs: Value,
}

impl MealInputs {
    pub fn into_args(self) -> Vec<Value> {
        vec![
            self.pump_history,
            self.profile,
            self.clock,
            self.glucose,
            self.basal_profile,
            self.carbs,
        ]
    }
}

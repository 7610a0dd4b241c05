//! IOB phase: insulin on board from pump history.
use crate::phase::Phase;
use aps_core::script::names;
use serde_json::Value;

pub struct IobPhase;

impl Phase for IobPhase {
    fn id(&self) -> &'static str {
        "iob"
    }

    fn scripts(&self) -> &'static [&'static str] {
        &[names::PREPARE_LOG, names::BUNDLE_IOB, names::PREPARE_IOB]
    }
}

#[derive(Debug, Clone)]
pub struct IobInputs {
    pub pump_history: Value,
    pub profile: Value,
    pub clock: Value,
    /// Last persisted autosens, `null` when none
    pub autosens: Value,
}

impl IobInputs {
    pub fn into_args(self) -> Vec<Value> {
        vec![self.pump_history, self.profile, self.clock, self.autosens]
    }
}

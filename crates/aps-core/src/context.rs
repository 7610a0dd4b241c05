//! Run Context: per-run identity and simulation inputs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Everything that distinguishes one pipeline run from another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    pub trace_id: String,
    pub as_of: DateTime<Utc>,
    /// "What if I logged this many grams now"
    pub simulated_carbs: Option<f64>,
    /// "What if I gave this many units now"
    pub simulated_bolus: Option<f64>,
    /// Simulation runs never write anything back.
    pub simulation: bool,
}

impl RunContext {
    pub fn scheduled(as_of: DateTime<Utc>) -> Self {
        Self {
            trace_id: uuid::Uuid::new_v4().to_string(),
            as_of,
            simulated_carbs: None,
            simulated_bolus: None,
            simulation: false,
        }
    }

    pub fn simulation(as_of: DateTime<Utc>, carbs: Option<f64>, bolus: Option<f64>) -> Self {
        Self {
            simulated_carbs: carbs,
            simulated_bolus: bolus,
            simulation: true,
            ..Self::scheduled(as_of)
        }
    }

    pub fn label(&self) -> &'static str {
        if self.simulation {
            "[SIMULATION]"
        } else {
            ""
        }
    }
}

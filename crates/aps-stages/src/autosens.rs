//! Autosens phase: sensitivity ratio over the glucose history.
//!
//! Runs on its own schedule. Its persisted result feeds the IOB and Determine
//! phases of later runs.
use crate::phase::Phase;
use aps_core::data_model::Autosens;
use aps_core::script::names;
use aps_core::{ApsError, ApsResult};
use chrono::{DateTime, Utc};
use serde_json::Value;

pub struct AutosensPhase;

impl Phase for AutosensPhase {
    fn id(&self) -> &'static str {
        "autosens"
    }

    fn scripts(&self) -> &'static [&'static str] {
        &[names::PREPARE_LOG, names::BUNDLE_AUTOSENS, names::PREPARE_AUTOSENS]
    }
}

#[derive(Debug, Clone)]
pub struct AutosensInputs {
    pub glucose: Value,
    pub pump_history: Value,
    pub basal_profile: Value,
    pub profile: Value,
    pub carbs: Value,
    pub temp_targets: Value,
}

impl AutosensInputs {
    pub fn into_args(self) -> Vec<Value> {
        vec![
            self.glucose,
            self.pump_history,
            self.basal_profile,
            self.profile,
            self.carbs,
            self.temp_targets,
        ]
    }
}

/// Parses the raw script output and stamps it with the computation time.
pub fn parse_autosens(raw: Value, computed_at: DateTime<Utc>) -> ApsResult<Autosens> {
    let mut autosens: Autosens = serde_json::from_value(raw)
        .map_err(|err| ApsError::Serialize(format!("autosens output: {}", err)))?;
    autosens.timestamp = Some(computed_at);
    Ok(autosens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stamps_timestamp_and_keeps_extra_fields() {
        let at = Utc::now();
        let autosens = parse_autosens(json!({ "ratio": 1.1, "newisf": 45, "deviationsUnsorted": [1, 2] }), at).unwrap();
        assert_eq!(autosens.ratio, 1.1);
        assert_eq!(autosens.timestamp, Some(at));
        assert!(autosens.extra.contains_key("deviationsUnsorted"));
    }

    #[test]
    fn output_without_ratio_is_rejected() {
        assert!(matches!(
            parse_autosens(json!({ "error": "not enough glucose" }), Utc::now()),
            Err(ApsError::Serialize(_))
        ));
    }
}

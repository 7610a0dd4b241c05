//! Script-facing JSON shapes for glucose and carb entries.
use crate::pump_history::iso_millis;
use aps_core::data_model::{CarbRecord, GlucoseRecord};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlucoseEntry {
    #[serde(rename = "_id")]
    pub id: String,
    pub sgv: i32,
    pub glucose: i32,
    /// Epoch milliseconds
    pub date: i64,
    #[serde(rename = "dateString")]
    pub date_string: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

impl From<&GlucoseRecord> for GlucoseEntry {
    fn from(record: &GlucoseRecord) -> Self {
        Self {
            id: record.id.to_string(),
            sgv: record.glucose,
            glucose: record.glucose,
            date: record.date.timestamp_millis(),
            date_string: iso_millis(record.date),
            direction: record.direction.clone(),
            kind: if record.is_manual { "mbg" } else { "sgv" },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CarbEntry {
    pub id: String,
    pub carbs: f64,
    pub fat: f64,
    pub protein: f64,
    pub note: Option<String>,
    #[serde(rename = "isFPU")]
    pub is_fpu: bool,
    #[serde(rename = "fpuID", skip_serializing_if = "Option::is_none")]
    pub fpu_id: Option<String>,
    #[serde(rename = "actualDate")]
    pub actual_date: String,
    pub created_at: String,
    #[serde(rename = "enteredBy", skip_serializing_if = "Option::is_none")]
    pub entered_by: Option<String>,
}

impl From<&CarbRecord> for CarbEntry {
    fn from(record: &CarbRecord) -> Self {
        Self {
            id: record.id.to_string(),
            carbs: record.carbs,
            fat: record.fat,
            protein: record.protein,
            note: record.note.clone(),
            is_fpu: record.is_fpu,
            fpu_id: record.fpu_id.clone(),
            actual_date: iso_millis(record.actual_date),
            created_at: iso_millis(record.created_at),
            entered_by: record.entered_by.clone(),
        }
    }
}

impl CarbEntry {
    /// The synthetic "what if I ate this now" entry.
    pub fn simulated(carbs: f64, as_of: DateTime<Utc>, source: &str) -> Self {
        Self {
            id: format!("simulated-carbs-{}", as_of.timestamp_millis()),
            carbs,
            fat: 0.0,
            protein: 0.0,
            note: None,
            is_fpu: false,
            fpu_id: None,
            actual_date: iso_millis(as_of),
            created_at: iso_millis(as_of),
            entered_by: Some(source.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn glucose_entry_carries_both_value_keys() {
        let record = GlucoseRecord {
            id: Uuid::nil(),
            date: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
            glucose: 142,
            direction: Some("Flat".to_string()),
            is_manual: false,
        };
        let value = serde_json::to_value(GlucoseEntry::from(&record)).unwrap();
        assert_eq!(value["sgv"], json!(142));
        assert_eq!(value["glucose"], json!(142));
        assert_eq!(value["date"], json!(1714557600000_i64));
        assert_eq!(value["type"], json!("sgv"));
    }

    #[test]
    fn simulated_carbs_are_plain_carbs_at_as_of() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let value = serde_json::to_value(CarbEntry::simulated(30.0, at, "aps-simulation")).unwrap();
        assert_eq!(value["actualDate"], json!("2024-05-01T10:00:00.000Z"));
        assert_eq!(value["isFPU"], json!(false));
        assert_eq!(value["fat"], json!(0.0));
        assert!(value["note"].is_null());
        assert_eq!(value["enteredBy"], json!("aps-simulation"));
    }
}

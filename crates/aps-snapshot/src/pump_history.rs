//! Pump history expansion
//!
//! One stored pump event becomes zero or more script-facing entries. For a
//! single event the entries always come out in this order:
//!
//! 1. `Bolus`
//! 2. `TempBasalDuration`
//! 3. `TempBasal`
//! 4. `PumpSuspend`
//! 5. `PumpResume`
//! 6. `Rewind`
//! 7. `Prime`
//!
//! Across events the input order (most recent first) is preserved.
use aps_core::data_model::{PumpEventRecord, PumpEventType};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::Serialize;

/// Timestamp format the scripts parse: RFC 3339, UTC, milliseconds.
pub fn iso_millis(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "_type")]
pub enum PumpHistoryEntry {
    Bolus {
        id: String,
        timestamp: String,
        amount: f64,
        #[serde(rename = "isExternal")]
        is_external: bool,
        #[serde(rename = "isSMB")]
        is_smb: bool,
        duration: i32,
    },
    TempBasalDuration {
        id: String,
        timestamp: String,
        #[serde(rename = "duration (min)")]
        duration: i32,
    },
    TempBasal {
        id: String,
        timestamp: String,
        temp: String,
        rate: f64,
    },
    #[serde(rename = "PumpSuspend")]
    Suspend { id: String, timestamp: String },
    #[serde(rename = "PumpResume")]
    Resume { id: String, timestamp: String },
    Rewind { id: String, timestamp: String },
    Prime { id: String, timestamp: String },
}

impl PumpHistoryEntry {
    pub fn timestamp(&self) -> &str {
        match self {
            Self::Bolus { timestamp, .. }
            | Self::TempBasalDuration { timestamp, .. }
            | Self::TempBasal { timestamp, .. }
            | Self::Suspend { timestamp, .. }
            | Self::Resume { timestamp, .. }
            | Self::Rewind { timestamp, .. }
            | Self::Prime { timestamp, .. } => timestamp,
        }
    }

    /// The synthetic "what if I gave this now" bolus. Stamped one second
    /// before `as_of` so the IOB script does not discard it as future data.
    pub fn simulated_bolus(amount: f64, as_of: DateTime<Utc>) -> Self {
        let at = as_of - Duration::seconds(1);
        Self::Bolus {
            id: format!("simulated-bolus-{}", at.timestamp_millis()),
            timestamp: iso_millis(at),
            amount,
            is_external: false,
            is_smb: true,
            duration: 0,
        }
    }
}

/// Expands one event. Events with no timestamp expand to nothing.
pub fn expand(event: &PumpEventRecord) -> Vec<PumpHistoryEntry> {
    let Some(at) = event.timestamp else {
        return Vec::new();
    };
    let timestamp = iso_millis(at);
    let mut entries = Vec::new();

    if let Some((bolus, amount)) = event
        .bolus
        .as_ref()
        .and_then(|bolus| bolus.amount.map(|amount| (bolus, amount)))
    {
        let id = event
            .id
            .clone()
            .unwrap_or_else(|| format!("bolus-{}", at.timestamp_millis()));
        entries.push(PumpHistoryEntry::Bolus {
            id,
            timestamp: timestamp.clone(),
            amount,
            is_external: bolus.is_external,
            is_smb: bolus.is_smb,
            duration: 0,
        });
    }

    // every remaining entry needs the event id
    let Some(id) = event.id.clone() else {
        return entries;
    };

    if let Some(temp) = &event.temp_basal {
        entries.push(PumpHistoryEntry::TempBasalDuration {
            id: id.clone(),
            timestamp: timestamp.clone(),
            duration: temp.duration,
        });
        if let Some(rate) = temp.rate {
            entries.push(PumpHistoryEntry::TempBasal {
                id: format!("_{}", id),
                timestamp: timestamp.clone(),
                temp: temp.temp_type.clone().unwrap_or_else(|| "unknown".to_string()),
                rate,
            });
        }
    }

    let marker = match event.event_type {
        Some(PumpEventType::PumpSuspend) => Some(PumpHistoryEntry::Suspend { id, timestamp }),
        Some(PumpEventType::PumpResume) => Some(PumpHistoryEntry::Resume { id, timestamp }),
        Some(PumpEventType::Rewind) => Some(PumpHistoryEntry::Rewind { id, timestamp }),
        Some(PumpEventType::Prime) => Some(PumpHistoryEntry::Prime { id, timestamp }),
        _ => None,
    };
    entries.extend(marker);
    entries
}

pub fn expand_all(events: &[PumpEventRecord]) -> Vec<PumpHistoryEntry> {
    events.iter().flat_map(expand).collect()
}

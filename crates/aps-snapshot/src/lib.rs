//! APS Snapshot: time-windowed clinical inputs for one pipeline run
//!
//! Glucose, carbs and pump history are fetched concurrently together with
//! settings, the active override / temp target, TDD history and the last
//! persisted autosens, then serialized to the JSON shapes the algorithm
//! scripts read.

pub mod aggregator;
pub mod pump_history;
pub mod shapes;

pub use aggregator::{validate_glucose, ClinicalSnapshot, SettingsSnapshot, SnapshotAggregator};
pub use pump_history::{expand, expand_all, iso_millis, PumpHistoryEntry};
pub use shapes::{CarbEntry, GlucoseEntry};

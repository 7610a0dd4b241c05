//! APS Core: data model, scripts, execution context pool and store contracts
//!
//! Everything the dosing pipeline shares across crates. Nothing in here knows
//! the order of phases; that lives in `aps-stages`.

pub mod config;
pub mod context;
pub mod data_model;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod memory;
pub mod mock;
pub mod pool;
pub mod script;
pub mod store;
#[cfg(feature = "v8")]
pub mod v8;

pub use config::PipelineConfig;
pub use context::RunContext;
pub use data_model::{
    AdjustmentVariables, Autosens, CarbRecord, Determination, Forecast, ForecastType,
    GlucoseRecord, OverrideRecord, Preferences, PumpEventRecord, PumpEventType, TddRecord,
    TempBasal, TempTargetRecord, TimeWindow,
};
pub use engine::{EngineFault, Interpreter, ScriptEngine};
pub use error::{ApsError, ApsResult, DeterminationError};
pub use memory::InMemoryStore;
pub use pool::{ContextPool, OverflowPolicy, PoolConfig, PoolStats, PooledContext, ScriptContext};
pub use script::{Script, ScriptResolver, ScriptStore};
pub use store::{RecordReader, RecordWriter, SettingsStore};

/// Pipeline version
pub const APS_VERSION: &str = "1.0.0";

//! APS Stages: algorithm phases and the orchestrator that runs them
//!
//! Each phase loads a fixed set of scripts into a pooled context and calls
//! one entry function. The orchestrator wires snapshot, phases and commit
//! together for a single run.

pub mod adjustment;
pub mod autosens;
pub mod commit;
pub mod determine;
pub mod iob;
pub mod meal;
pub mod orchestrator;
pub mod phase;
pub mod profile;

pub use commit::{forecasts_for, parse_determination, DeterminationCommitter};
pub use orchestrator::{DosingPipeline, PipelineOutcome, Stores};
pub use phase::{Phase, PhaseOutput, PhaseProof, PhaseRunner};

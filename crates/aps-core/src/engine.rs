//! Interpreter contract: the seam between orchestration and script execution.
//!
//! An [`Interpreter`] is one isolated instance that can evaluate script bodies
//! and call named global functions with positional JSON arguments. A
//! [`ScriptEngine`] manufactures fresh interpreters for the pool. Nothing in
//! the pipeline ever looks inside a script body.
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineFault {
    #[error("exception: {0}")]
    Exception(String),

    #[error("result is not JSON-serializable: {0}")]
    NotSerializable(String),

    #[error("interpreter unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticLevel {
    Debug,
    Warn,
    Error,
}

impl DiagnosticLevel {
    pub fn parse(level: &str) -> Self {
        match level {
            "warn" | "warning" => Self::Warn,
            "error" => Self::Error,
            _ => Self::Debug,
        }
    }
}

/// A line of free text a script printed while running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub message: String,
}

impl Diagnostic {
    pub fn debug(message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Debug,
            message: message.into(),
        }
    }
}

pub trait Interpreter: Send {
    /// Sets a global binding visible to subsequently evaluated code.
    fn set_global(&mut self, name: &str, value: Value) -> Result<(), EngineFault>;

    fn evaluate(&mut self, name: &str, body: &str) -> Result<(), EngineFault>;

    fn call(&mut self, function: &str, args: &[Value]) -> Result<Value, EngineFault>;

    /// Hands over everything printed since the last drain.
    fn drain_diagnostics(&mut self) -> Vec<Diagnostic>;
}

pub trait ScriptEngine: Send + Sync {
    fn name(&self) -> &str;

    fn create(&self) -> Result<Box<dyn Interpreter>, EngineFault>;
}

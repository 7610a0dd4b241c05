//! Unified Error Model
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApsError {
    /// A windowed fetch or a settings read failed.
    #[error("DATA/{0}")]
    DataAccess(String),

    /// Glucose history exists but cannot be trusted for a scheduled run.
    #[error("DATA/glucose unusable: {0}")]
    GlucoseUnusable(String),

    #[error("EVAL/{phase}/{script}: {message}")]
    Evaluation {
        phase: String,
        script: String,
        message: String,
    },

    #[error("PARSE/no determination data: {0}")]
    NoDetermination(String),

    #[error("SCRIPT/not found: {0}")]
    ScriptNotFound(String),

    #[error("POOL/{0}")]
    PoolExhausted(String),

    #[error("CONFIG/{0}")]
    Config(String),

    #[error("SERIALIZE/{0}")]
    Serialize(String),

    #[error("RUN/{0}")]
    Cancelled(String),
}

impl From<serde_json::Error> for ApsError {
    fn from(err: serde_json::Error) -> Self {
        ApsError::Serialize(err.to_string())
    }
}

/// The single failure surfaced to callers of a pipeline run.
///
/// A missing decision never degrades into a default one; callers only ever
/// see a committed determination or this error.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("could not compute dosing determination: {cause}")]
pub struct DeterminationError {
    #[source]
    pub cause: ApsError,
}

impl DeterminationError {
    pub fn is_pool_exhausted(&self) -> bool {
        matches!(self.cause, ApsError::PoolExhausted(_))
    }
}

impl From<ApsError> for DeterminationError {
    fn from(cause: ApsError) -> Self {
        Self { cause }
    }
}

pub type ApsResult<T> = Result<T, ApsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluation_error_names_phase_and_script() {
        let err = ApsError::Evaluation {
            phase: "iob".to_string(),
            script: "iob.js".to_string(),
            message: "ReferenceError: x is not defined".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "EVAL/iob/iob.js: ReferenceError: x is not defined"
        );
    }

    #[test]
    fn determination_error_wraps_cause() {
        let err = DeterminationError::from(ApsError::NoDetermination("missing deliverAt".into()));
        assert!(err.to_string().starts_with("could not compute dosing determination"));
        assert!(err.to_string().contains("PARSE/no determination data"));
        assert!(std::error::Error::source(&err).is_some());
    }
}

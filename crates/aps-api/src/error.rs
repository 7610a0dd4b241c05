//! API errors and their HTTP mapping
use aps_core::{ApsError, DeterminationError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Clone, PartialEq)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl From<DeterminationError> for ApiError {
    fn from(err: DeterminationError) -> Self {
        let status = if err.is_pool_exhausted() {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::UNPROCESSABLE_ENTITY
        };
        Self::new(status, err.to_string())
    }
}

impl From<ApsError> for ApiError {
    fn from(err: ApsError) -> Self {
        let status = match err {
            ApsError::PoolExhausted(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn determination_failures_are_unprocessable() {
        let err: ApiError = DeterminationError::from(ApsError::NoDetermination("missing deliverAt".into())).into();
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(err.message.starts_with("could not compute dosing determination"));
    }

    #[test]
    fn pool_exhaustion_is_unavailable_either_way() {
        let exhausted = ApsError::PoolExhausted("timed out".into());
        assert_eq!(ApiError::from(exhausted.clone()).status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            ApiError::from(DeterminationError::from(exhausted)).status,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(ApsError::DataAccess("down".into())).status,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}

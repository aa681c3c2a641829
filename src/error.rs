//! Unified error handling for palaverd.
//!
//! The access-control gate and chat lifecycle fail fast with a typed
//! [`ApiError`]; the boundary layer maps it to a status code and a
//! `{ "message": ... }` body. Real-time delivery is best-effort and never
//! surfaces errors through this type.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned by gate and lifecycle operations.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or malformed input.
    #[error("{0}")]
    BadRequest(String),

    /// Password or credential mismatch.
    #[error("{0}")]
    Unauthorized(String),

    /// Authenticated but lacking role, membership, or trying to mutate
    /// something immutable (public chats).
    #[error("{0}")]
    Forbidden(String),

    /// Referenced entity absent.
    #[error("{0}")]
    NotFound(String),

    /// An external collaborator (summarization) is unavailable.
    #[error("{0}")]
    ExternalService(String),

    /// Store fault. Never shown verbatim to clients.
    #[error("database error: {0}")]
    Db(#[from] crate::db::DbError),
}

impl ApiError {
    /// HTTP-style status code for the boundary layer.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::BadRequest(_) => 400,
            Self::Unauthorized(_) => 401,
            Self::Forbidden(_) => 403,
            Self::NotFound(_) => 404,
            Self::ExternalService(_) => 502,
            Self::Db(_) => 500,
        }
    }

    /// Static error code string for log labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::ExternalService(_) => "external_service",
            Self::Db(_) => "db_error",
        }
    }

    /// Structured error body sent to clients.
    ///
    /// Store faults are collapsed to a generic message; the detail stays in
    /// the server log.
    pub fn to_body(&self) -> ErrorBody {
        let message = match self {
            Self::Db(_) => "internal server error".to_string(),
            other => other.to_string(),
        };
        ErrorBody { message }
    }
}

/// The `{ "message": ... }` error object of the request/response surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}

/// Result type for gate and lifecycle operations.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ApiError::BadRequest("x".into()).status_code(), 400);
        assert_eq!(ApiError::Unauthorized("x".into()).status_code(), 401);
        assert_eq!(ApiError::Forbidden("x".into()).status_code(), 403);
        assert_eq!(ApiError::NotFound("x".into()).status_code(), 404);
        assert_eq!(ApiError::ExternalService("x".into()).status_code(), 502);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(ApiError::BadRequest("x".into()).error_code(), "bad_request");
        assert_eq!(ApiError::NotFound("x".into()).error_code(), "not_found");
    }

    #[test]
    fn test_db_errors_are_masked() {
        let err = ApiError::Db(crate::db::DbError::Internal("pool exhausted".into()));
        assert_eq!(err.to_body().message, "internal server error");
        assert_eq!(err.status_code(), 500);
    }
}

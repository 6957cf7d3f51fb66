//! Error types.
//!
//! `StoreError` covers everything the domain layer can reject. `ApiError` is
//! the JSON body every failing endpoint returns; the client decodes it too.
//! The `web` feature adds its HTTP status mapping and `IntoResponse`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("project {0} not found")]
    ProjectNotFound(String),

    #[error("{entity} {key} not found")]
    NotFound { entity: &'static str, key: String },

    #[error("{entity} {key} already exists")]
    Duplicate { entity: &'static str, key: String },

    #[error("{entity} {key} is still referenced by {by}")]
    InUse {
        entity: &'static str,
        key: String,
        by: String,
    },

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("storage error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        StoreError::NotFound {
            entity,
            key: key.into(),
        }
    }

    pub fn duplicate(entity: &'static str, key: impl Into<String>) -> Self {
        StoreError::Duplicate {
            entity,
            key: key.into(),
        }
    }

    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        StoreError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Error codes carried in API error bodies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidInput,
    NotFound,
    AlreadyExists,
    InUse,
    PayloadTooLarge,
    InternalError,
}

/// Error body returned by every endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let code = match &err {
            StoreError::ProjectNotFound(_) | StoreError::NotFound { .. } => ErrorCode::NotFound,
            StoreError::Duplicate { .. } => ErrorCode::AlreadyExists,
            StoreError::InUse { .. } => ErrorCode::InUse,
            StoreError::Invalid { .. } => ErrorCode::InvalidInput,
            StoreError::Io(_) => ErrorCode::InternalError,
        };
        let details = match &err {
            StoreError::ProjectNotFound(job_no) => {
                Some(serde_json::json!({ "entity": "project", "key": job_no }))
            }
            StoreError::NotFound { entity, key } | StoreError::Duplicate { entity, key } => {
                Some(serde_json::json!({ "entity": entity, "key": key }))
            }
            StoreError::InUse { entity, key, by } => {
                Some(serde_json::json!({ "entity": entity, "key": key, "by": by }))
            }
            StoreError::Invalid { field, .. } => Some(serde_json::json!({ "field": field })),
            StoreError::Io(_) => None,
        };
        let api = ApiError::new(code, err.to_string());
        match details {
            Some(details) => api.with_details(details),
            None => api,
        }
    }
}

#[cfg(feature = "web")]
mod http {
    use super::{ApiError, ErrorCode};
    use axum::{
        Json,
        http::StatusCode,
        response::{IntoResponse, Response},
    };

    impl ErrorCode {
        pub fn status_code(&self) -> StatusCode {
            match self {
                ErrorCode::InvalidInput => StatusCode::BAD_REQUEST,
                ErrorCode::NotFound => StatusCode::NOT_FOUND,
                ErrorCode::AlreadyExists | ErrorCode::InUse => StatusCode::CONFLICT,
                ErrorCode::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
                ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            }
        }
    }

    impl IntoResponse for ApiError {
        fn into_response(self) -> Response {
            let status = self.code.status_code();
            if status.is_server_error() {
                log::error!("{}", self.message);
            } else {
                log::warn!("request rejected: {}", self.message);
            }
            (status, Json(self)).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_api_codes() {
        let err: ApiError = StoreError::duplicate("equipment", "P-101").into();
        assert_eq!(err.code, ErrorCode::AlreadyExists);
        assert_eq!(err.message, "equipment P-101 already exists");

        let err: ApiError = StoreError::ProjectNotFound("J1".into()).into();
        assert_eq!(err.code, ErrorCode::NotFound);

        let err: ApiError = StoreError::InUse {
            entity: "template",
            key: "MOTOR".into(),
            by: "equipment P-101".into(),
        }
        .into();
        assert_eq!(err.code, ErrorCode::InUse);
        let details = err.details.unwrap();
        assert_eq!(details["key"], "MOTOR");
        assert_eq!(details["by"], "equipment P-101");
    }

    #[test]
    fn io_errors_carry_no_details() {
        let err: ApiError = StoreError::Io(std::io::Error::other("disk full")).into();
        assert_eq!(err.code, ErrorCode::InternalError);
        assert!(err.details.is_none());

        let err: ApiError = StoreError::invalid("percent", "must be 0..=100").into();
        assert_eq!(err.details.unwrap()["field"], "percent");
    }

    #[cfg(feature = "web")]
    #[test]
    fn codes_map_to_http_status() {
        use axum::http::StatusCode;
        assert_eq!(ErrorCode::InUse.status_code(), StatusCode::CONFLICT);
        assert_eq!(ErrorCode::InvalidInput.status_code(), StatusCode::BAD_REQUEST);
    }
}

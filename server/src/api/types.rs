//! Shared API types
//!
//! Error mapping from the domain taxonomy to HTTP, and the small response
//! wrappers shared by all resources.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::domain::error::ServiceError;

/// Standard API error response
#[derive(Debug)]
pub enum ApiError {
    BadRequest { code: i32, message: String },
    Forbidden { code: i32, message: String },
    NotFound { code: i32, message: String },
    Conflict { code: i32, message: String },
    TooManyRequests { code: i32, message: String },
    BadGateway { code: i32, message: String },
    ServiceUnavailable { code: i32, message: String },
    Internal { code: i32, message: String },
}

impl ApiError {
    fn parts(self) -> (StatusCode, &'static str, i32, String) {
        match self {
            Self::BadRequest { code, message } => {
                (StatusCode::BAD_REQUEST, "bad_request", code, message)
            }
            Self::Forbidden { code, message } => (StatusCode::FORBIDDEN, "forbidden", code, message),
            Self::NotFound { code, message } => (StatusCode::NOT_FOUND, "not_found", code, message),
            Self::Conflict { code, message } => (StatusCode::CONFLICT, "conflict", code, message),
            Self::TooManyRequests { code, message } => (
                StatusCode::TOO_MANY_REQUESTS,
                "too_many_requests",
                code,
                message,
            ),
            Self::BadGateway { code, message } => {
                (StatusCode::BAD_GATEWAY, "bad_gateway", code, message)
            }
            Self::ServiceUnavailable { code, message } => (
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                code,
                message,
            ),
            Self::Internal { code, message } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                code,
                message,
            ),
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        let code = e.code();
        let message = e.to_string();
        match e {
            ServiceError::InvalidParam(_) | ServiceError::InvalidConfig(_) => {
                Self::BadRequest { code, message }
            }
            ServiceError::NoPermission(_) | ServiceError::AccountNotAvailable(_) => {
                Self::Forbidden { code, message }
            }
            ServiceError::NotFound(_) => Self::NotFound { code, message },
            ServiceError::Conflict(_) => Self::Conflict { code, message },
            ServiceError::NoCapacity(_) => Self::TooManyRequests { code, message },
            ServiceError::Rpc { .. } => Self::BadGateway { code, message },
            ServiceError::Transient(_) => Self::ServiceUnavailable { code, message },
            ServiceError::Fatal(_) => {
                tracing::error!(error = %message, "Request failed");
                Self::Internal {
                    code,
                    message: "internal error".to_string(),
                }
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, code, message) = self.parts();
        (
            status,
            Json(serde_json::json!({
                "error": error_type,
                "code": code,
                "message": message
            })),
        )
            .into_response()
    }
}

/// Count of rows a write touched
#[derive(Debug, Serialize)]
pub struct AffectedResponse {
    pub affected: u64,
}

/// Id of a newly created resource
#[derive(Debug, Serialize)]
pub struct CreatedResponse<T> {
    pub id: T,
}

/// Workspace scope for requests that carry no body
#[derive(Debug, Deserialize)]
pub struct WorkspaceQuery {
    pub workspace_id: i64,
}

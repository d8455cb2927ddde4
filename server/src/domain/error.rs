//! Service error taxonomy
//!
//! Every public failure carries a stable integer code. The metrics layer tags
//! operations with it and the HTTP layer maps it to a status.

use thiserror::Error;

use crate::data::DataError;
use crate::data::duckdb::filters::FilterError;

pub const CODE_SUCCESS: i32 = 0;
pub const CODE_INVALID_PARAM: i32 = 600_100_001;
pub const CODE_NO_PERMISSION: i32 = 600_100_002;
pub const CODE_NO_CAPACITY: i32 = 600_100_003;
pub const CODE_ACCOUNT_NOT_AVAILABLE: i32 = 600_100_004;
pub const CODE_NOT_FOUND: i32 = 600_100_005;
pub const CODE_INVALID_CONFIG: i32 = 600_100_006;
pub const CODE_CONFLICT: i32 = 600_100_007;
pub const CODE_TRANSIENT: i32 = 600_100_008;
pub const CODE_FATAL: i32 = 600_100_009;
/// Upstream failure without an embedded status
pub const CODE_COMMON_RPC_ERROR: i32 = 600_100_100;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("no permission: {0}")]
    NoPermission(String),

    #[error("no capacity: {0}")]
    NoCapacity(String),

    #[error("account not available: {0}")]
    AccountNotAvailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("transient error: {0}")]
    Transient(String),

    #[error("fatal error: {0}")]
    Fatal(String),

    #[error("upstream error {code}: {message}")]
    Rpc { code: i32, message: String },
}

impl ServiceError {
    pub fn invalid_param(msg: impl Into<String>) -> Self {
        Self::InvalidParam(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidParam(_) => CODE_INVALID_PARAM,
            Self::NoPermission(_) => CODE_NO_PERMISSION,
            Self::NoCapacity(_) => CODE_NO_CAPACITY,
            Self::AccountNotAvailable(_) => CODE_ACCOUNT_NOT_AVAILABLE,
            Self::NotFound(_) => CODE_NOT_FOUND,
            Self::InvalidConfig(_) => CODE_INVALID_CONFIG,
            Self::Conflict(_) => CODE_CONFLICT,
            Self::Transient(_) => CODE_TRANSIENT,
            Self::Fatal(_) => CODE_FATAL,
            Self::Rpc { code, .. } => *code,
        }
    }

    /// Worth retrying by the experiment runner
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Ends the whole experiment rather than one turn
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_) | Self::InvalidConfig(_))
    }

    /// Rebuild a taxonomy variant from one of its own codes
    fn from_code(code: i32, message: String) -> Option<Self> {
        let err = match code {
            CODE_INVALID_PARAM => Self::InvalidParam(message),
            CODE_NO_PERMISSION => Self::NoPermission(message),
            CODE_NO_CAPACITY => Self::NoCapacity(message),
            CODE_ACCOUNT_NOT_AVAILABLE => Self::AccountNotAvailable(message),
            CODE_NOT_FOUND => Self::NotFound(message),
            CODE_INVALID_CONFIG => Self::InvalidConfig(message),
            CODE_CONFLICT => Self::Conflict(message),
            CODE_TRANSIENT => Self::Transient(message),
            CODE_FATAL => Self::Fatal(message),
            _ => return None,
        };
        Some(err)
    }
}

/// `(code, is_error)` of an operation outcome; success is `(0, 0)`
pub fn get_code<T>(result: &Result<T, ServiceError>) -> (i32, u8) {
    match result {
        Ok(_) => (CODE_SUCCESS, 0),
        Err(e) => (e.code(), 1),
    }
}

/// Classify an upstream failure
///
/// An embedded non-zero status is preserved (as its taxonomy variant when it
/// is one of ours); otherwise the failure becomes `CODE_COMMON_RPC_ERROR`.
pub fn unwrap_rpc_error(status: Option<i32>, message: impl Into<String>) -> ServiceError {
    let message = message.into();
    match status.filter(|code| *code != CODE_SUCCESS) {
        Some(code) => ServiceError::from_code(code, message.clone())
            .unwrap_or(ServiceError::Rpc { code, message }),
        None => ServiceError::Rpc {
            code: CODE_COMMON_RPC_ERROR,
            message,
        },
    }
}

impl From<DataError> for ServiceError {
    fn from(e: DataError) -> Self {
        match e {
            DataError::Conflict(msg) => Self::Conflict(msg),
            e if e.is_transient() => {
                tracing::warn!(backend = e.backend(), error = %e, "Transient storage error");
                Self::Transient(e.to_string())
            }
            e => {
                tracing::error!(backend = e.backend(), error = %e, "Storage error");
                Self::Fatal(e.to_string())
            }
        }
    }
}

impl From<FilterError> for ServiceError {
    fn from(e: FilterError) -> Self {
        Self::InvalidParam(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_code() {
        let ok: Result<(), ServiceError> = Ok(());
        assert_eq!(get_code(&ok), (0, 0));
        let err: Result<(), ServiceError> = Err(ServiceError::invalid_param("x"));
        assert_eq!(get_code(&err), (CODE_INVALID_PARAM, 1));
    }

    #[test]
    fn test_unwrap_rpc_error() {
        assert_eq!(
            unwrap_rpc_error(Some(CODE_NOT_FOUND), "gone"),
            ServiceError::NotFound("gone".into())
        );
        assert_eq!(
            unwrap_rpc_error(Some(503), "busy"),
            ServiceError::Rpc {
                code: 503,
                message: "busy".into()
            }
        );
        assert_eq!(unwrap_rpc_error(None, "?").code(), CODE_COMMON_RPC_ERROR);
        assert_eq!(unwrap_rpc_error(Some(0), "?").code(), CODE_COMMON_RPC_ERROR);
    }

    #[test]
    fn test_data_error_mapping() {
        let conflict: ServiceError = DataError::Conflict("dup".into()).into();
        assert!(matches!(conflict, ServiceError::Conflict(_)));

        let timeout: ServiceError = DataError::Timeout {
            backend: "duckdb",
            timeout_secs: 30,
        }
        .into();
        assert!(timeout.is_retryable());

        let corrupt: ServiceError = DataError::corrupt("sqlite", "bad row").into();
        assert!(corrupt.is_fatal());
    }

    #[test]
    fn test_filter_error_is_invalid_param() {
        let err: ServiceError = FilterError::TooDeep { max: 5 }.into();
        assert_eq!(err.code(), CODE_INVALID_PARAM);
    }
}

//! §7 error taxonomy. `AdapterError` is the kind-set every component
//! raises; the orchestrator catches it per envelope and appends
//! `"{op}: {message}"` to `ApplyOutcome.errors` (§4.11) rather than letting
//! it propagate, except `Internal`, which aborts the whole batch.

use crate::config::errors as codes;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, AdapterError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdapterError {
    #[error("validation failed: {message}")]
    ValidationFailed { code: &'static str, message: String },

    #[error("permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("window not found: {window_id}")]
    WindowNotFound { window_id: String },

    #[error("sanitizer rejected payload: {message}")]
    SanitizerRejected { message: String },

    #[error("persistence failed: {message}")]
    PersistenceFailed { message: String },

    #[error("api call failed: {message}")]
    ApiFailed { message: String },

    #[error("compute failed: {message}")]
    ComputeFailed { message: String },

    #[error("compute timed out after {timeout_ms}ms")]
    ComputeTimeout { timeout_ms: u64 },

    #[error("compute cancelled")]
    ComputeCancelled,

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl AdapterError {
    /// Stable `E-UICP-NNN` code for telemetry/clarifier surfaces.
    pub fn code(&self) -> &'static str {
        match self {
            AdapterError::ValidationFailed { code, .. } => code,
            AdapterError::PermissionDenied { .. } => codes::POLICY_DENIED,
            AdapterError::WindowNotFound { .. } => codes::WINDOW_NOT_FOUND,
            AdapterError::SanitizerRejected { .. } => codes::SANITIZER_REJECTED_EMPTIED,
            AdapterError::PersistenceFailed { .. } => codes::PERSISTENCE_WRITE_FAILED,
            AdapterError::ApiFailed { .. } => codes::API_FAILED,
            AdapterError::ComputeFailed { .. } => codes::COMPUTE_FAILED,
            AdapterError::ComputeTimeout { .. } => codes::COMPUTE_TIMEOUT,
            AdapterError::ComputeCancelled => codes::COMPUTE_CANCELLED,
            AdapterError::Internal { .. } => codes::INTERNAL_INVARIANT,
        }
    }

    /// True when this error must abort the whole batch regardless of
    /// `allowPartial` (§4.11: "`Adapter.Internal` on missing workspace is
    /// fatal for the whole batch").
    pub fn is_fatal(&self) -> bool {
        matches!(self, AdapterError::Internal { .. })
    }

    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        AdapterError::ValidationFailed {
            code,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        AdapterError::Internal {
            message: message.into(),
        }
    }
}

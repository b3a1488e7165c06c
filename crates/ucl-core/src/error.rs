//! Structured error taxonomy shared by every connector, the staging
//! provider, the sink, and the orchestration manager.
//!
//! Every failure that can cross a component boundary is a [`UclError`]
//! variant rather than a bare `anyhow::Error`, so the orchestrator's retry
//! policy never has to guess whether a failure is transient.

use thiserror::Error;

/// Canonical error codes from the connector/ingestion error taxonomy.
///
/// The string form (`Display`) is the wire-stable code used in
/// `Operation.error.code` and in sink/staging error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    EndpointUnreachable,
    AuthInvalid,
    PermissionDenied,
    BucketNotFound,
    ObjectNotFound,
    StagingUnavailable,
    StagingWriteFailed,
    SinkWriteFailed,
    PreviewUnsupported,
    FilterUnsupported,
    Timeout,
    UnknownTemplate,
    SchemaDrift,
    UnitPaused,
}

impl ErrorCode {
    /// Whether a workflow driver should retry an operation that failed
    /// with this code. This is the single source of truth consulted by
    /// [`crate::error::UclError::retryable`] and the orchestrator's retry
    /// policy.
    pub fn retryable(self) -> bool {
        matches!(
            self,
            ErrorCode::EndpointUnreachable
                | ErrorCode::StagingUnavailable
                | ErrorCode::StagingWriteFailed
                | ErrorCode::SinkWriteFailed
                | ErrorCode::Timeout
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::EndpointUnreachable => "E_ENDPOINT_UNREACHABLE",
            ErrorCode::AuthInvalid => "E_AUTH_INVALID",
            ErrorCode::PermissionDenied => "E_PERMISSION_DENIED",
            ErrorCode::BucketNotFound => "E_BUCKET_NOT_FOUND",
            ErrorCode::ObjectNotFound => "E_OBJECT_NOT_FOUND",
            ErrorCode::StagingUnavailable => "E_STAGING_UNAVAILABLE",
            ErrorCode::StagingWriteFailed => "E_STAGING_WRITE_FAILED",
            ErrorCode::SinkWriteFailed => "E_SINK_WRITE_FAILED",
            ErrorCode::PreviewUnsupported => "E_PREVIEW_UNSUPPORTED",
            ErrorCode::FilterUnsupported => "E_FILTER_UNSUPPORTED",
            ErrorCode::Timeout => "E_TIMEOUT",
            ErrorCode::UnknownTemplate => "E_UNKNOWN_TEMPLATE",
            ErrorCode::SchemaDrift => "E_SCHEMA_DRIFT",
            ErrorCode::UnitPaused => "E_UNIT_PAUSED",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured failure record: `{code, retryable, message, cause?}` per
/// §4.8. `retryable` is derived from `code` rather than stored
/// independently, so a caller can never construct an inconsistent pair.
#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct UclError {
    pub code: ErrorCode,
    pub message: String,
    #[source]
    pub cause: Option<anyhow::Error>,
}

impl UclError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: impl Into<anyhow::Error>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn retryable(&self) -> bool {
        self.code.retryable()
    }

    pub fn endpoint_unreachable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::EndpointUnreachable, message)
    }

    pub fn auth_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AuthInvalid, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PermissionDenied, message)
    }

    pub fn bucket_not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BucketNotFound, message)
    }

    pub fn object_not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ObjectNotFound, message)
    }

    pub fn staging_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StagingUnavailable, message)
    }

    pub fn staging_write_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StagingWriteFailed, message)
    }

    pub fn sink_write_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SinkWriteFailed, message)
    }

    pub fn preview_unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PreviewUnsupported, message)
    }

    pub fn filter_unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::FilterUnsupported, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Timeout, message)
    }

    pub fn unknown_template(template_id: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorCode::UnknownTemplate,
            format!("no connector registered for template '{template_id}'"),
        )
    }

    pub fn schema_drift(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SchemaDrift, message)
    }

    pub fn unit_paused(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnitPaused, message)
    }
}

pub type UclResult<T> = Result<T, UclError>;

//! # UCL Core - Universal Connectivity Layer Core Library
//!
//! This crate provides the foundational types, traits, and error taxonomy
//! shared by every connector, the staging provider, the sink endpoint, and
//! the orchestration manager in the Universal Connectivity Layer.
//!
//! ## Key Components
//!
//! - **Data model**: Endpoint, Dataset, Ingestion Unit, Slice, Probe
//!   Result, Plan, Record Envelope, StageRef/BatchRef, Operation.
//! - **Connector contract**: the `Connector` trait every adapter
//!   implements, plus the pull-based `RecordIterator` streaming contract.
//! - **Error taxonomy**: structured `{code, retryable, message}` failures.
//! - **Configuration**: environment-driven process settings.
//!
//! ## Example
//!
//! ```rust
//! use ucl_core::error::{UclError, ErrorCode};
//!
//! let err = UclError::timeout("slice exceeded its 30 minute deadline");
//! assert!(err.retryable());
//! assert_eq!(err.code, ErrorCode::Timeout);
//! ```

pub mod action;
pub mod config;
pub mod connector;
pub mod error;
pub mod model;

pub use action::{ActionCategory, ActionDescriptor, ActionField, ActionResult};
pub use config::AppConfig;
pub use connector::{
    Connector, ConnectorCapabilities, ConnectorDescriptor, ExecuteActionRequest, IncrementalFilter,
    OpContext, PlanRequest, ProbeRequest, ReadFilter, ReadRequest, RecordIterator, SliceReadRequest,
    ValidateConfigResult,
};
pub use error::{ErrorCode, UclError, UclResult};
pub use model::{
    BatchRef, Dataset, DatasetKind, Endpoint, EnvelopeSource, IngestionUnit, IngestionUnitState,
    Operation, OperationError, OperationStats, OperationStatus, Plan, ProbeResult, RecordEnvelope,
    RunMode, Slice, StageRef, UnitState,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_retryable_matches_taxonomy() {
        assert!(ErrorCode::Timeout.retryable());
        assert!(ErrorCode::EndpointUnreachable.retryable());
        assert!(ErrorCode::StagingUnavailable.retryable());
        assert!(!ErrorCode::AuthInvalid.retryable());
        assert!(!ErrorCode::UnknownTemplate.retryable());
        assert!(!ErrorCode::PreviewUnsupported.retryable());
    }

    #[test]
    fn slice_natural_key_is_deterministic_and_alphabetic() {
        let mut eng = std::collections::HashMap::new();
        eng.insert("projectKey".to_string(), "ENG".to_string());
        let mut ops = std::collections::HashMap::new();
        ops.insert("projectKey".to_string(), "OPS".to_string());

        assert_eq!(Slice::natural_key(&eng, 1), "eng-page-1");
        assert_eq!(Slice::natural_key(&ops, 1), "ops-page-1");
        // repeated calls are byte-identical
        assert_eq!(Slice::natural_key(&eng, 1), Slice::natural_key(&eng, 1));
    }

    #[test]
    fn envelope_slug_dots_path_separators() {
        let env = RecordEnvelope {
            record_kind: "raw".to_string(),
            entity_kind: "code/file".to_string(),
            source: EnvelopeSource {
                endpoint_id: "ep-1".to_string(),
                source_family: "object.minio".to_string(),
                source_id: "bucket/prefix".to_string(),
                url: None,
                external_id: None,
            },
            tenant_id: "default".to_string(),
            project_key: "PROJ".to_string(),
            observed_at: chrono::Utc::now(),
            payload: serde_json::json!({}),
        };
        assert_eq!(env.slug(), "raw.code.file");
    }

    #[test]
    fn stage_ref_round_trips_provider_and_id() {
        let stage_ref = StageRef::new("minio", "abc123");
        assert_eq!(stage_ref.to_string(), "minio:abc123");
        assert_eq!(stage_ref.stage_id(), "abc123");
    }

    #[test]
    fn operation_status_terminality() {
        assert!(OperationStatus::Succeeded.is_terminal());
        assert!(OperationStatus::Failed.is_terminal());
        assert!(OperationStatus::Cancelled.is_terminal());
        assert!(!OperationStatus::Running.is_terminal());
        assert!(!OperationStatus::Queued.is_terminal());
    }
}

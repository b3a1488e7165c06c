//! Data model entities from the spec's connector/ingestion domain (§3).
//!
//! These are plain serde-derived types; the core never interprets
//! `RecordEnvelope::payload` beyond passing it through, per §9's
//! "dynamic typing in envelope payloads" note.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A configured source. Owned by the API facade; the ingestion core only
/// ever reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: String,
    pub template_id: String,
    pub name: String,
    /// HTTP-family URL or SQL-family DSN. Secret material is referenced,
    /// never embedded, via `secret_refs`.
    pub address: String,
    pub secret_refs: Vec<String>,
    pub labels: HashMap<String, String>,
    pub project_key: String,
    pub deleted_at: Option<DateTime<Utc>>,
    pub capabilities: ConnectorCapabilities,
}

/// `table` (SQL-shaped, has a known schema) vs `semantic` (issue/doc/file
/// style, schema discovered lazily or never).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    Table,
    Semantic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub id: String,
    pub display_name: String,
    pub kind: DatasetKind,
    pub supports_incremental: bool,
    pub incremental_column: Option<String>,
    pub cdm_model_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Full,
    Incremental,
    Delta,
}

/// A (dataset, sink, mode) triple: the thing one run instantiates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionUnit {
    pub endpoint_id: String,
    pub unit_id: String,
    pub sink_id: String,
    pub sink_endpoint_id: Option<String>,
    pub run_mode: RunMode,
    pub policy: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    Idle,
    Running,
    Paused,
    Failed,
    Succeeded,
}

/// Per-sink state for one ingestion unit (§3, §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionUnitState {
    pub endpoint_id: String,
    pub unit_id: String,
    pub sink_id: String,
    pub last_run_id: Option<String>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub cursor: Option<String>,
    pub checkpoint_blob: Option<Vec<u8>>,
    pub state: UnitState,
    pub last_error: Option<String>,
    pub stats: serde_json::Value,
}

impl IngestionUnitState {
    pub fn idle(endpoint_id: impl Into<String>, unit_id: impl Into<String>, sink_id: impl Into<String>) -> Self {
        Self {
            endpoint_id: endpoint_id.into(),
            unit_id: unit_id.into(),
            sink_id: sink_id.into(),
            last_run_id: None,
            last_run_at: None,
            cursor: None,
            checkpoint_blob: None,
            state: UnitState::Idle,
            last_error: None,
            stats: serde_json::Value::Null,
        }
    }
}

/// A deterministic, replayable chunk of a dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slice {
    /// Stable, content-addressed over `params` (see `Slice::compute_id`).
    pub slice_id: String,
    pub sequence: u32,
    pub params: HashMap<String, String>,
}

impl Slice {
    /// Deterministic slice id: a human-readable natural key derived from
    /// `params`, not a hash, so operators can read slice ids directly off
    /// logs and sink paths (per scenario 1 in §8: `"project-eng-page-1"`).
    pub fn natural_key(params: &HashMap<String, String>, page: u32) -> String {
        let mut keys: Vec<&String> = params.values().collect();
        keys.sort();
        let joined = keys
            .iter()
            .map(|v| v.to_lowercase())
            .collect::<Vec<_>>()
            .join("-");
        format!("{joined}-page-{page}")
    }
}

/// Lightweight source statistics collected before planning.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeResult {
    pub estimated_records: u64,
    pub estimated_bytes: u64,
    pub max_watermark: Option<DateTime<Utc>>,
    pub slice_keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub strategy: String,
    pub slices: Vec<Slice>,
}

/// Source identity embedded in every envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeSource {
    pub endpoint_id: String,
    pub source_family: String,
    pub source_id: String,
    pub url: Option<String>,
    pub external_id: Option<String>,
}

/// The universal wire/disk record format between connector and
/// staging/sink (§3, §6). Field ordering is not load-bearing; JSON
/// serialization order follows struct declaration order here purely for
/// readability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordEnvelope {
    pub record_kind: String,
    pub entity_kind: String,
    pub source: EnvelopeSource,
    pub tenant_id: String,
    pub project_key: String,
    pub observed_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl RecordEnvelope {
    /// `<recordKind>.<entityKind>` with `/` replaced by `.`, the sink's
    /// partitioning axis (§4.5, GLOSSARY).
    pub fn slug(&self) -> String {
        format!(
            "{}.{}",
            self.record_kind,
            self.entity_kind.replace('/', ".")
        )
    }
}

/// Opaque handle `"<providerId>:<stageId>"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRef(pub String);

impl StageRef {
    pub fn new(provider_id: &str, stage_id: &str) -> Self {
        Self(format!("{provider_id}:{stage_id}"))
    }

    pub fn stage_id(&self) -> &str {
        self.0.split_once(':').map(|(_, id)| id).unwrap_or(&self.0)
    }
}

impl std::fmt::Display for StageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Path relative to the stage root; ordering is sequence-preserving
/// within a slice.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BatchRef(pub String);

impl std::fmt::Display for BatchRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl OperationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OperationStatus::Succeeded | OperationStatus::Failed | OperationStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationStats {
    pub slices_total: u32,
    pub slices_done: u32,
    pub records_written: u64,
    pub bytes_staged: u64,
    pub stage_ref: Option<String>,
    pub batches: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationError {
    pub code: String,
    pub retryable: bool,
    pub message: String,
}

impl From<&crate::error::UclError> for OperationError {
    fn from(err: &crate::error::UclError) -> Self {
        Self {
            code: err.code.as_str().to_string(),
            retryable: err.retryable(),
            message: err.message.clone(),
        }
    }
}

/// A running or terminal state of one `StartOperation` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub operation_id: String,
    pub kind: String,
    pub status: OperationStatus,
    pub stats: OperationStats,
    pub error: Option<OperationError>,
}

impl Operation {
    pub fn queued(operation_id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            kind: kind.into(),
            status: OperationStatus::Queued,
            stats: OperationStats::default(),
            error: None,
        }
    }
}

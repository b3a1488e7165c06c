//! The connector contract (C2): the uniform capability set every adapter
//! in `ucl-connectors` implements, and the registry's factory signature
//! (C1) that depends on it.
//!
//! Structured the way the teacher layers `Operator` underneath
//! `Source`/`Sink`/`Transform`: a small trait of pure metadata
//! (`Descriptor`) plus one larger async trait carrying the behavior, all
//! `async_trait` and `Send + Sync` so a `Box<dyn Connector>` can be
//! driven from any tokio task.

use crate::action::{ActionDescriptor, ActionResult};
use crate::error::UclResult;
use crate::model::{Dataset, Plan, ProbeResult, RecordEnvelope};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Static, cacheable description of a connector template: fields, auth
/// modes, sample config, family, categories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorDescriptor {
    pub template_id: String,
    pub family: String,
    pub categories: Vec<String>,
    pub auth_modes: Vec<String>,
    pub sample_config: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ConnectorCapabilities {
    pub supports_full: bool,
    pub supports_incremental: bool,
    pub supports_preview: bool,
    pub supports_metadata: bool,
    pub supports_write: bool,
    pub supports_finalize: bool,
    pub supports_staging: bool,
    pub supports_count_probe: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateConfigResult {
    pub valid: bool,
    pub message: String,
    pub code: Option<String>,
    pub retryable: bool,
    pub detected_version: Option<String>,
}

/// Cancellation + deadline, threaded through every connector operation
/// per §4.2's "all operations take a context carrying cancellation and a
/// deadline".
#[derive(Clone)]
pub struct OpContext {
    pub cancel: CancellationToken,
    pub deadline: Option<std::time::Instant>,
}

impl OpContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: std::time::Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn expired(&self) -> bool {
        self.deadline.is_some_and(|d| std::time::Instant::now() >= d)
    }
}

#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub dataset_id: String,
}

#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub dataset_id: String,
    pub page_limit: u32,
    pub probe: ProbeResult,
}

#[derive(Debug, Clone)]
pub struct SliceReadRequest {
    pub dataset_id: String,
    pub slice: crate::model::Slice,
    /// Last checkpoint delivered by a previous, possibly-died, iterator
    /// over this same slice, so the connector can resume at-least-once.
    pub resume_checkpoint: Option<String>,
}

/// Bounded filter AST accepted by `Connector::read` (§4.2).
#[derive(Debug, Clone, Default)]
pub struct ReadFilter {
    pub path: Option<String>,
    pub limit: Option<u32>,
    pub incremental: Option<IncrementalFilter>,
}

#[derive(Debug, Clone)]
pub struct IncrementalFilter {
    pub column: String,
    pub watermark: String,
}

#[derive(Debug, Clone)]
pub struct ReadRequest {
    pub dataset_id: String,
    pub filter: ReadFilter,
    pub checkpoint: Option<String>,
}

/// Pull-based lazy sequence of records with `Next/Value/Err/Close`
/// semantics (§9 GLOSSARY). Implementations may back this with cooperative
/// tasks or channels; the contract is the same either way. Every
/// implementation must be restartable: dying mid-iteration and re-issuing
/// `ReadSlice` with the last delivered checkpoint must resume without
/// gaps (§4.2).
#[async_trait]
pub trait RecordIterator: Send {
    /// Returns `Ok(None)` at end of stream. A terminal error surfaces
    /// here, never as a panic.
    async fn next(&mut self) -> UclResult<Option<RecordEnvelope>>;

    /// Opaque resume token for the last record yielded, if the connector
    /// supports mid-slice resume.
    fn checkpoint(&self) -> Option<String> {
        None
    }

    /// Must be safe to call multiple times and on early abandonment; every
    /// iterator must be released on all exit paths (§9).
    async fn close(&mut self) {}
}

/// A named, schema-typed side-effectful connector call (C9), distinct
/// from data reads.
#[derive(Debug, Clone)]
pub struct ExecuteActionRequest {
    pub action_id: String,
    pub parameters: HashMap<String, serde_json::Value>,
}

/// The uniform capability set each connector implements (§4.2).
#[async_trait]
pub trait Connector: Send + Sync {
    fn descriptor(&self) -> &ConnectorDescriptor;

    fn capabilities(&self) -> ConnectorCapabilities;

    /// May I/O (e.g. a lightweight auth probe) but must never mutate the
    /// source, and must never panic — classify every failure into the
    /// taxonomy instead.
    async fn validate_config(&self, ctx: &OpContext) -> ValidateConfigResult;

    /// Deterministic ordering by dataset id.
    async fn list_datasets(&self, ctx: &OpContext) -> UclResult<Vec<Dataset>>;

    /// `None` when the schema is not knowable a priori.
    async fn get_schema(&self, dataset_id: &str) -> UclResult<Option<serde_json::Value>>;

    /// O(1) or O(log n) preferred; must never read the full dataset.
    async fn probe_ingestion(&self, ctx: &OpContext, req: ProbeRequest) -> UclResult<ProbeResult>;

    /// Deterministic: repeated calls with identical inputs produce
    /// identical slice ids in identical order. Tie-break by lexicographic
    /// natural key, then page number.
    async fn plan_ingestion(&self, ctx: &OpContext, req: PlanRequest) -> UclResult<Plan>;

    /// Streams; the returned iterator must be closable and must surface
    /// errors through its own terminal result, never a panic.
    async fn read_slice(
        &self,
        ctx: &OpContext,
        req: SliceReadRequest,
    ) -> UclResult<Box<dyn RecordIterator>>;

    /// Used for preview and resumable non-sliced reads. Unsupported
    /// filters reject with `E_FILTER_UNSUPPORTED`.
    async fn read(&self, ctx: &OpContext, req: ReadRequest) -> UclResult<Box<dyn RecordIterator>>;

    fn list_actions(&self) -> Vec<ActionDescriptor> {
        Vec::new()
    }

    async fn execute_action(
        &self,
        _ctx: &OpContext,
        req: ExecuteActionRequest,
    ) -> UclResult<ActionResult> {
        Err(crate::error::UclError::new(
            crate::error::ErrorCode::UnknownTemplate,
            format!("action '{}' is not implemented by this connector", req.action_id),
        ))
    }
}

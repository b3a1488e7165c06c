//! Orchestration manager (C6): the run state machine —
//! resolve → validate → probe → plan → (bounded fan-out of slice reads) →
//! sink commit → finalize. Structured like `bins/rde-cli`'s task-spawning
//! section (one `tokio::spawn` per unit of work, a shared
//! `CancellationToken`, `cancel.child_token()` per spawned task) but
//! generalized to bounded-fan-out-per-slice via a `tokio::sync::Semaphore`
//! instead of one task per pipeline stage.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use ucl_connectors::registry::{ConnectorRegistry, RawConfig};
use ucl_core::{
    Connector, Operation, OperationError, OperationStatus, OpContext, PlanRequest, ProbeRequest,
    Slice, SliceReadRequest, StageRef, UclError, UclResult, UnitState,
};
use ucl_sink::SinkEndpoint;
use ucl_staging::StagingProvider;

use crate::checkpoint::CheckpointStore;
use crate::retry::RetryPolicy;

/// Records batched into one `PutBatch` call; the midpoint of the spec's
/// "N ≈ 32..256" guidance (§4.6).
const BATCH_SIZE: usize = 128;

/// Default large-run threshold (§4.6): above this many estimated probe
/// bytes, slice tasks stage-and-discard rather than returning envelopes to
/// the caller. Overridable via `RunParams::large_run_threshold_bytes`.
const DEFAULT_LARGE_RUN_THRESHOLD_BYTES: u64 = 64 * 1024 * 1024;

/// Per-slice deadline (§4.6): exceeding this surfaces as `E_TIMEOUT`.
const SLICE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30 * 60);

pub struct RunParams {
    pub operation_id: String,
    pub template_id: String,
    pub config: RawConfig,
    pub dataset_id: String,
    pub sink_id: String,
    pub run_id: String,
    pub load_date: String,
    pub schema: Option<serde_json::Value>,
    pub max_parallel_slices: usize,
    pub large_run_threshold_bytes: Option<u64>,
}

struct SliceOutcome {
    batch_refs: Vec<String>,
    records: u64,
    bytes: u64,
}

pub struct RunDriver {
    registry: Arc<ConnectorRegistry>,
    staging: Arc<StagingProvider>,
    sink: Arc<SinkEndpoint>,
    checkpoints: Arc<CheckpointStore>,
    retry_policy: RetryPolicy,
}

impl RunDriver {
    pub fn new(
        registry: Arc<ConnectorRegistry>,
        staging: Arc<StagingProvider>,
        sink: Arc<SinkEndpoint>,
        checkpoints: Arc<CheckpointStore>,
    ) -> Self {
        Self {
            registry,
            staging,
            sink,
            checkpoints,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub async fn run(&self, params: RunParams, operation: Arc<Mutex<Operation>>, cancel: CancellationToken) {
        if let Err(err) = self.run_inner(&params, &operation, &cancel).await {
            error!(operation_id = %params.operation_id, error = %err, "operation failed");
            let (endpoint_id, unit_id, sink_id) = unit_key(&params);
            // A cancelled run goes back to `idle` so it can be rescheduled
            // like any other never-run unit; a genuine failure is recorded
            // as `failed` so `ListIngestionUnitStates` surfaces the error.
            let unit_state = if cancel.is_cancelled() { UnitState::Idle } else { UnitState::Failed };
            if let Err(cp_err) =
                self.checkpoints.set_unit_state(&endpoint_id, &unit_id, &sink_id, unit_state, None, Some(err.to_string()))
            {
                warn!(operation_id = %params.operation_id, error = %cp_err, "failed to persist ingestion unit state");
            }

            let mut op = operation.lock().await;
            op.status = if cancel.is_cancelled() {
                OperationStatus::Cancelled
            } else {
                OperationStatus::Failed
            };
            op.error = Some(OperationError::from(&err));
        }
    }

    async fn run_inner(
        &self,
        params: &RunParams,
        operation: &Arc<Mutex<Operation>>,
        cancel: &CancellationToken,
    ) -> UclResult<()> {
        {
            let mut op = operation.lock().await;
            op.status = OperationStatus::Running;
        }

        let (endpoint_id_key, unit_id_key, sink_id_key) = unit_key(params);
        self.checkpoints.set_unit_state(
            &endpoint_id_key,
            &unit_id_key,
            &sink_id_key,
            UnitState::Running,
            Some(params.run_id.clone()),
            None,
        )?;

        let connector = self.registry.resolve(&params.template_id, &params.config)?;
        let ctx = OpContext::new(cancel.clone());

        let validation = connector.validate_config(&ctx).await;
        if !validation.valid {
            return Err(UclError::new(
                validation
                    .code
                    .as_deref()
                    .map(code_from_str)
                    .unwrap_or(ucl_core::ErrorCode::AuthInvalid),
                validation.message,
            ));
        }

        let probe = connector
            .probe_ingestion(&ctx, ProbeRequest { dataset_id: params.dataset_id.clone() })
            .await?;
        let threshold = params.large_run_threshold_bytes.unwrap_or(DEFAULT_LARGE_RUN_THRESHOLD_BYTES);
        let large_run = probe.estimated_bytes >= threshold;

        let plan = connector
            .plan_ingestion(
                &ctx,
                PlanRequest {
                    dataset_id: params.dataset_id.clone(),
                    page_limit: BATCH_SIZE as u32,
                    probe,
                },
            )
            .await?;

        {
            let mut op = operation.lock().await;
            op.stats.slices_total = plan.slices.len() as u32;
        }

        // One stage per run, not one per slice (§4.4/§4.7): every slice
        // stages its batches under this same `StageRef` so a caller
        // holding only `Operation.stats.stageRef` can enumerate every
        // slice's batches via `StagingProvider::list_batches`.
        let run_stage_ref = self.staging.new_stage_ref();

        let permits = params.max_parallel_slices.min(plan.slices.len()).max(1);
        let semaphore = Arc::new(Semaphore::new(permits));

        let endpoint_id = endpoint_id_key.clone();

        let mut handles = Vec::new();
        for slice in plan.slices {
            if cancel.is_cancelled() {
                break;
            }
            let semaphore = semaphore.clone();
            let connector = connector.clone();
            let staging = self.staging.clone();
            let checkpoints = self.checkpoints.clone();
            let retry_policy = self.retry_policy;
            let operation = operation.clone();
            let slice_cancel = cancel.child_token();
            let dataset_id = params.dataset_id.clone();
            let endpoint_id = endpoint_id.clone();
            let unit_id = params.dataset_id.clone();
            let sink_id = params.sink_id.clone();
            let stage_ref = run_stage_ref.clone();

            let handle = tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
                let result = tokio::time::timeout(
                    SLICE_TIMEOUT,
                    run_slice(
                        connector.as_ref(),
                        &staging,
                        &checkpoints,
                        &retry_policy,
                        &endpoint_id,
                        &unit_id,
                        &sink_id,
                        &dataset_id,
                        &stage_ref,
                        slice,
                        slice_cancel.clone(),
                    ),
                )
                .await;

                let outcome = match result {
                    Ok(inner) => inner,
                    Err(_) => Err(UclError::timeout("slice exceeded its 30 minute deadline")),
                };

                if let Ok(outcome) = &outcome {
                    let mut op = operation.lock().await;
                    op.stats.slices_done += 1;
                    op.stats.records_written += outcome.records;
                    op.stats.bytes_staged += outcome.bytes;
                    op.stats.batches += outcome.batch_refs.len() as u32;
                }
                outcome
            });
            handles.push(handle);
        }

        let mut first_error = None;
        let mut all_batch_refs = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(Ok(outcome)) => {
                    all_batch_refs.extend(outcome.batch_refs);
                }
                Ok(Err(err)) => {
                    first_error.get_or_insert(err);
                }
                Err(join_err) => {
                    first_error.get_or_insert(UclError::timeout(join_err.to_string()));
                }
            };
        }
        if let Some(err) = first_error {
            return Err(err);
        }

        if cancel.is_cancelled() {
            self.checkpoints.set_unit_state(
                &endpoint_id_key,
                &unit_id_key,
                &sink_id_key,
                UnitState::Idle,
                None,
                None,
            )?;
            let mut op = operation.lock().await;
            op.status = OperationStatus::Cancelled;
            return Ok(());
        }

        if all_batch_refs.is_empty() {
            info!(operation_id = %params.operation_id, "no records produced, skipping sink commit");
            self.checkpoints.set_unit_state(
                &endpoint_id_key,
                &unit_id_key,
                &sink_id_key,
                UnitState::Succeeded,
                None,
                None,
            )?;
            let mut op = operation.lock().await;
            op.status = OperationStatus::Succeeded;
            return Ok(());
        }

        let stage_ref = run_stage_ref;
        {
            let mut op = operation.lock().await;
            op.stats.stage_ref = Some(stage_ref.to_string());
        }

        let write_result = self
            .sink
            .write_from_stage(
                &self.staging,
                &stage_ref,
                &all_batch_refs,
                &params.sink_id,
                &params.run_id,
                &params.load_date,
                params.schema.as_ref(),
            )
            .await?;

        self.staging.finalize_stage(&stage_ref).await?;

        info!(
            operation_id = %params.operation_id,
            large_run,
            objects = write_result.objects.len(),
            records = write_result.records,
            "operation succeeded"
        );

        self.checkpoints.set_unit_state(
            &endpoint_id_key,
            &unit_id_key,
            &sink_id_key,
            UnitState::Succeeded,
            None,
            None,
        )?;

        let mut op = operation.lock().await;
        op.status = OperationStatus::Succeeded;
        Ok(())
    }
}

/// Derives the `(endpointId, unitId, sinkId)` key `CheckpointStore` and
/// `IngestionUnitState` are keyed by (§4.7) from one run's parameters.
fn unit_key(params: &RunParams) -> (String, String, String) {
    let endpoint_id = params.config.get("endpoint_id").cloned().unwrap_or_default();
    (endpoint_id, params.dataset_id.clone(), params.sink_id.clone())
}

/// Reads one slice end-to-end, batching and staging as it goes. On a
/// retryable failure, re-opens `read_slice` from the last checkpoint the
/// connector reported rather than restarting the slice from scratch —
/// the resumability guarantee every `RecordIterator` must honor (§4.2).
#[allow(clippy::too_many_arguments)]
async fn run_slice(
    connector: &dyn Connector,
    staging: &StagingProvider,
    checkpoints: &CheckpointStore,
    retry_policy: &RetryPolicy,
    endpoint_id: &str,
    unit_id: &str,
    sink_id: &str,
    dataset_id: &str,
    stage_ref: &StageRef,
    slice: Slice,
    cancel: CancellationToken,
) -> UclResult<SliceOutcome> {
    let started = std::time::Instant::now();
    let mut resume_checkpoint = checkpoints
        .get_ingestion_unit_state(endpoint_id, unit_id, sink_id)?
        .and_then(|s| s.cursor);

    let mut attempt = 0u32;
    let mut batch_refs = Vec::new();
    let mut records_written = 0u64;
    let mut bytes_staged = 0u64;

    loop {
        let ctx = OpContext::new(cancel.clone());
        let attempt_result = read_and_stage_slice(
            connector,
            &ctx,
            staging,
            dataset_id,
            &slice,
            resume_checkpoint.clone(),
            &cancel,
            stage_ref,
            &mut batch_refs,
            &mut records_written,
            &mut bytes_staged,
        )
        .await;

        match attempt_result {
            Ok(last_checkpoint) => {
                checkpoints.save_ingestion_checkpoint(endpoint_id, unit_id, sink_id, last_checkpoint, None, None)?;
                metrics::histogram!("ucl_slice_duration_seconds").record(started.elapsed().as_secs_f64());
                return Ok(SliceOutcome {
                    batch_refs,
                    records: records_written,
                    bytes: bytes_staged,
                });
            }
            Err((err, last_checkpoint)) => {
                resume_checkpoint = last_checkpoint;
                match retry_policy.next_delay(&err, attempt) {
                    Some(delay) => {
                        warn!(slice_id = %slice.slice_id, attempt, error = %err, "retrying slice after backoff");
                        attempt += 1;
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(err),
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn read_and_stage_slice(
    connector: &dyn Connector,
    ctx: &OpContext,
    staging: &StagingProvider,
    dataset_id: &str,
    slice: &Slice,
    resume_checkpoint: Option<String>,
    cancel: &CancellationToken,
    stage_ref: &StageRef,
    batch_refs: &mut Vec<String>,
    records_written: &mut u64,
    bytes_staged: &mut u64,
) -> Result<Option<String>, (UclError, Option<String>)> {
    let mut iterator = connector
        .read_slice(
            ctx,
            SliceReadRequest {
                dataset_id: dataset_id.to_string(),
                slice: slice.clone(),
                resume_checkpoint: resume_checkpoint.clone(),
            },
        )
        .await
        .map_err(|err| (err, resume_checkpoint.clone()))?;

    let mut buffer = Vec::with_capacity(BATCH_SIZE);
    let mut last_checkpoint = resume_checkpoint;

    loop {
        if cancel.is_cancelled() {
            iterator.close().await;
            return Ok(last_checkpoint);
        }
        match iterator.next().await {
            Ok(Some(record)) => {
                buffer.push(record);
                if buffer.len() >= BATCH_SIZE {
                    if let Err(err) = flush_batch(staging, stage_ref, &slice.slice_id, std::mem::take(&mut buffer), batch_refs, records_written, bytes_staged).await {
                        iterator.close().await;
                        return Err((err, last_checkpoint));
                    }
                    last_checkpoint = iterator.checkpoint().or(last_checkpoint);
                }
            }
            Ok(None) => break,
            Err(err) => {
                let checkpoint = iterator.checkpoint().or(last_checkpoint.clone());
                iterator.close().await;
                return Err((err, checkpoint));
            }
        }
    }
    if !buffer.is_empty() {
        if let Err(err) = flush_batch(staging, stage_ref, &slice.slice_id, buffer, batch_refs, records_written, bytes_staged).await {
            iterator.close().await;
            return Err((err, last_checkpoint));
        }
    }
    last_checkpoint = iterator.checkpoint().or(last_checkpoint);
    iterator.close().await;
    Ok(last_checkpoint)
}

async fn flush_batch(
    staging: &StagingProvider,
    stage_ref: &StageRef,
    slice_id: &str,
    records: Vec<ucl_core::RecordEnvelope>,
    batch_refs: &mut Vec<String>,
    records_written: &mut u64,
    bytes_staged: &mut u64,
) -> UclResult<()> {
    let result = staging.put_batch(Some(stage_ref.clone()), slice_id, None, records).await?;
    *records_written += result.stats.records;
    *bytes_staged += result.stats.bytes;
    metrics::counter!("ucl_records_written_total").increment(result.stats.records);
    batch_refs.push(result.batch_ref);
    Ok(())
}

fn code_from_str(code: &str) -> ucl_core::ErrorCode {
    use ucl_core::ErrorCode::*;
    match code {
        "E_ENDPOINT_UNREACHABLE" => EndpointUnreachable,
        "E_AUTH_INVALID" => AuthInvalid,
        "E_PERMISSION_DENIED" => PermissionDenied,
        "E_BUCKET_NOT_FOUND" => BucketNotFound,
        "E_OBJECT_NOT_FOUND" => ObjectNotFound,
        "E_STAGING_UNAVAILABLE" => StagingUnavailable,
        "E_STAGING_WRITE_FAILED" => StagingWriteFailed,
        "E_SINK_WRITE_FAILED" => SinkWriteFailed,
        "E_PREVIEW_UNSUPPORTED" => PreviewUnsupported,
        "E_FILTER_UNSUPPORTED" => FilterUnsupported,
        "E_TIMEOUT" => Timeout,
        "E_UNKNOWN_TEMPLATE" => UnknownTemplate,
        "E_SCHEMA_DRIFT" => SchemaDrift,
        "E_UNIT_PAUSED" => UnitPaused,
        _ => AuthInvalid,
    }
}

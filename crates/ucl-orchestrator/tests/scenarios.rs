//! End-to-end scenarios from spec §8, driven against the stub connector
//! through the real `OperationStore`/`RunDriver` path rather than against
//! any single crate's internals — the same shape as an external caller
//! hitting `ucl-cli`'s HTTP surface.

use std::sync::Arc;
use std::time::Duration;

use object_store::memory::InMemory;
use object_store::ObjectStore;
use ucl_connectors::registry::{standard_registry, RawConfig};
use ucl_core::OperationStatus;
use ucl_orchestrator::control::StartOperationRequest;
use ucl_orchestrator::{CheckpointStore, OperationStore};
use ucl_sink::SinkEndpoint;
use ucl_staging::StagingProvider;

fn store() -> OperationStore {
    let registry = Arc::new(standard_registry());
    let backing: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
    let staging = Arc::new(StagingProvider::with_store("mem", "tenant-1", "staging", false, backing.clone()));
    let sink = Arc::new(SinkEndpoint::with_store("sink", "tenant-1", backing));
    let checkpoints = Arc::new(CheckpointStore::open_temporary().unwrap());
    OperationStore::new(registry, staging, sink, checkpoints)
}

async fn run_to_terminal(store: &OperationStore, req: StartOperationRequest) -> ucl_core::Operation {
    let operation_id = store.start_operation(req).await.unwrap();
    let mut op = store.get_operation(&operation_id).await.unwrap();
    for _ in 0..200 {
        if op.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        op = store.get_operation(&operation_id).await.unwrap();
    }
    assert!(op.status.is_terminal(), "operation never reached a terminal state: {op:?}");
    op
}

/// Scenario 2: a large run (estimated_bytes above the default 64MiB
/// threshold) still succeeds end to end and reports a bounded stageRef
/// plus conserved record/batch counts.
#[tokio::test]
async fn large_run_uses_stage_refs_and_conserves_records() {
    let store = store();
    let mut config = RawConfig::new();
    config.insert("total_records".to_string(), "10000".to_string());
    config.insert("slice_count".to_string(), "4".to_string());
    config.insert("estimated_bytes".to_string(), (64 * 1024 * 1024 + 1024).to_string());

    let op = run_to_terminal(
        &store,
        StartOperationRequest {
            template_id: "stub.ingestion.large".to_string(),
            config,
            dataset_id: "stub-dataset".to_string(),
            sink_id: "sink-1".to_string(),
            run_id: None,
            load_date: "2025-12-13".to_string(),
            schema: None,
            max_parallel_slices: Some(4),
        },
    )
    .await;

    assert_eq!(op.status, OperationStatus::Succeeded);
    assert_eq!(op.stats.records_written, 10_000);
    let stage_ref = op.stats.stage_ref.expect("large run must report a stageRef");
    assert!(!stage_ref.is_empty());
    assert!(stage_ref.len() <= 80, "stageRef should stay compact: {stage_ref}");
    assert!(op.stats.batches >= 1);
    assert!(op.stats.bytes_staged > 0);
}

/// Scenario 3: `disable_object_store` on an otherwise-large run fails
/// closed with a retryable `E_STAGING_UNAVAILABLE`.
#[tokio::test]
async fn disabled_object_store_on_a_large_run_fails_with_staging_unavailable() {
    let store = store();
    let mut config = RawConfig::new();
    config.insert("disable_object_store".to_string(), "true".to_string());
    config.insert("estimated_bytes".to_string(), (5 * 64 * 1024 * 1024).to_string());

    let op = run_to_terminal(
        &store,
        StartOperationRequest {
            template_id: "stub.ingestion.large".to_string(),
            config,
            dataset_id: "stub-dataset".to_string(),
            sink_id: "sink-1".to_string(),
            run_id: None,
            load_date: "2025-12-13".to_string(),
            schema: None,
            max_parallel_slices: Some(2),
        },
    )
    .await;

    assert_eq!(op.status, OperationStatus::Failed);
    let error = op.error.expect("a failed operation must carry an error");
    assert_eq!(error.code, "E_STAGING_UNAVAILABLE");
    assert!(error.retryable);
}

/// Scenario 4: an auth failure during `ValidateConfig` is non-retryable.
#[tokio::test]
async fn auth_failure_fails_non_retryably() {
    let store = store();
    let mut config = RawConfig::new();
    config.insert("auth".to_string(), "auth failure".to_string());

    let op = run_to_terminal(
        &store,
        StartOperationRequest {
            template_id: "stub.ingestion.large".to_string(),
            config,
            dataset_id: "stub-dataset".to_string(),
            sink_id: "sink-1".to_string(),
            run_id: None,
            load_date: "2025-12-13".to_string(),
            schema: None,
            max_parallel_slices: Some(2),
        },
    )
    .await;

    assert_eq!(op.status, OperationStatus::Failed);
    let error = op.error.expect("a failed operation must carry an error");
    assert_eq!(error.code, "E_AUTH_INVALID");
    assert!(!error.retryable);
}

/// Scenario 6: progress counters land exactly on the ceil-distributed
/// per-slice totals the stub connector computes.
#[tokio::test]
async fn progress_counters_match_ceil_distributed_totals() {
    let store = store();
    let mut config = RawConfig::new();
    config.insert("total_records".to_string(), "90".to_string());
    config.insert("slice_count".to_string(), "3".to_string());

    let op = run_to_terminal(
        &store,
        StartOperationRequest {
            template_id: "stub.ingestion.large".to_string(),
            config,
            dataset_id: "stub-dataset".to_string(),
            sink_id: "sink-1".to_string(),
            run_id: None,
            load_date: "2025-12-13".to_string(),
            schema: None,
            max_parallel_slices: Some(3),
        },
    )
    .await;

    assert_eq!(op.status, OperationStatus::Succeeded);
    assert_eq!(op.stats.slices_total, 3);
    assert_eq!(op.stats.slices_done, 3);
    assert_eq!(op.stats.records_written, 90);
    assert!(op.stats.bytes_staged > 0);
}

/// A cancelled run stops issuing new slice reads and transitions to
/// `cancelled` rather than `failed` or `succeeded` (§4.6).
#[tokio::test]
async fn cancel_operation_reaches_cancelled_not_failed() {
    let store = store();
    let mut config = RawConfig::new();
    config.insert("total_records".to_string(), "10000".to_string());
    config.insert("slice_count".to_string(), "8".to_string());

    let operation_id = store
        .start_operation(StartOperationRequest {
            template_id: "stub.ingestion.large".to_string(),
            config,
            dataset_id: "stub-dataset".to_string(),
            sink_id: "sink-1".to_string(),
            run_id: None,
            load_date: "2025-12-13".to_string(),
            schema: None,
            max_parallel_slices: Some(1),
        })
        .await
        .unwrap();

    store.cancel_operation(&operation_id).await.unwrap();

    let mut op = store.get_operation(&operation_id).await.unwrap();
    for _ in 0..200 {
        if op.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        op = store.get_operation(&operation_id).await.unwrap();
    }
    assert_eq!(op.status, OperationStatus::Cancelled);
}

//! External control surface (§6): `StartOperation`/`GetOperation`/
//! `CancelOperation` over an in-process operation table, plus the action
//! plane's `ListActions`/`ExecuteAction` (§4.9) resolved directly against
//! the registry. `ucl-cli` exposes all five calls over HTTP; this module
//! only owns the bookkeeping.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use ucl_connectors::registry::{ConnectorRegistry, RawConfig};
use ucl_core::{
    ActionDescriptor, ActionResult, ExecuteActionRequest, OpContext, Operation, UclError, UclResult,
    UnitState,
};
use ucl_sink::SinkEndpoint;
use ucl_staging::StagingProvider;
use uuid::Uuid;

use crate::checkpoint::CheckpointStore;
use crate::run::{RunDriver, RunParams};

struct RunningOperation {
    operation: Arc<Mutex<Operation>>,
    cancel: CancellationToken,
}

/// Request body for `StartOperation`.
#[derive(Debug, Clone)]
pub struct StartOperationRequest {
    pub template_id: String,
    pub config: RawConfig,
    pub dataset_id: String,
    pub sink_id: String,
    pub run_id: Option<String>,
    pub load_date: String,
    pub schema: Option<serde_json::Value>,
    pub max_parallel_slices: Option<usize>,
}

/// Holds every operation this process has started, keyed by
/// `operation_id`, and drives each one on a detached tokio task.
pub struct OperationStore {
    registry: Arc<ConnectorRegistry>,
    driver: Arc<RunDriver>,
    checkpoints: Arc<CheckpointStore>,
    operations: Mutex<HashMap<String, RunningOperation>>,
}

impl OperationStore {
    pub fn new(
        registry: Arc<ConnectorRegistry>,
        staging: Arc<StagingProvider>,
        sink: Arc<SinkEndpoint>,
        checkpoints: Arc<CheckpointStore>,
    ) -> Self {
        Self {
            driver: Arc::new(RunDriver::new(registry.clone(), staging, sink, checkpoints.clone())),
            registry,
            checkpoints,
            operations: Mutex::new(HashMap::new()),
        }
    }

    /// Spawns the run and returns immediately with the queued operation's
    /// id; callers poll `get_operation` for progress (§6). Refuses to
    /// schedule when the (endpoint, unit, sink) triple is `paused` — a
    /// paused unit suppresses run scheduling but never an in-flight run.
    pub async fn start_operation(&self, req: StartOperationRequest) -> UclResult<String> {
        let endpoint_id = req.config.get("endpoint_id").cloned().unwrap_or_default();
        if let Some(existing) = self.checkpoints.get_ingestion_unit_state(&endpoint_id, &req.dataset_id, &req.sink_id)? {
            if existing.state == UnitState::Paused {
                return Err(UclError::unit_paused(format!(
                    "ingestion unit '{endpoint_id}/{}/{}' is paused",
                    req.dataset_id, req.sink_id
                )));
            }
        }

        let operation_id = format!("op-{}", Uuid::new_v4());
        let run_id = req.run_id.unwrap_or_else(|| operation_id.clone());
        let operation = Arc::new(Mutex::new(Operation::queued(operation_id.clone(), "ingest")));
        let cancel = CancellationToken::new();

        self.operations.lock().await.insert(
            operation_id.clone(),
            RunningOperation { operation: operation.clone(), cancel: cancel.clone() },
        );

        let driver = self.driver.clone();
        let params = RunParams {
            operation_id: operation_id.clone(),
            template_id: req.template_id,
            config: req.config,
            dataset_id: req.dataset_id,
            sink_id: req.sink_id,
            run_id,
            load_date: req.load_date,
            schema: req.schema,
            max_parallel_slices: req.max_parallel_slices.unwrap_or(4),
            large_run_threshold_bytes: None,
        };

        tokio::spawn(async move {
            driver.run(params, operation, cancel).await;
        });

        Ok(operation_id)
    }

    pub async fn get_operation(&self, operation_id: &str) -> UclResult<Operation> {
        let operations = self.operations.lock().await;
        let running = operations
            .get(operation_id)
            .ok_or_else(|| UclError::new(ucl_core::ErrorCode::ObjectNotFound, format!("no such operation '{operation_id}'")))?;
        Ok(running.operation.lock().await.clone())
    }

    /// Signals cancellation; the run loop stops issuing new reads within
    /// ~1s, closes open iterators, and transitions to `cancelled` once its
    /// in-flight slice tasks unwind (§4.6).
    pub async fn cancel_operation(&self, operation_id: &str) -> UclResult<()> {
        let operations = self.operations.lock().await;
        let running = operations
            .get(operation_id)
            .ok_or_else(|| UclError::new(ucl_core::ErrorCode::ObjectNotFound, format!("no such operation '{operation_id}'")))?;
        running.cancel.cancel();
        Ok(())
    }

    /// `ListActions` (§4.9): resolves the connector for `template_id` and
    /// returns its action catalog. Resolution itself is the only I/O;
    /// listing actions is pure.
    pub async fn list_actions(&self, template_id: &str, config: &RawConfig) -> UclResult<Vec<ActionDescriptor>> {
        let connector = self.registry.resolve(template_id, config)?;
        Ok(connector.list_actions())
    }

    /// `ExecuteAction` (§4.9): the only sanctioned write-back path. Actions
    /// are idempotent only where the connector family says so (`ensure_bucket`)
    /// — this call makes no retry or dedup decision on the caller's behalf.
    pub async fn execute_action(
        &self,
        template_id: &str,
        config: &RawConfig,
        req: ExecuteActionRequest,
    ) -> UclResult<ActionResult> {
        let connector = self.registry.resolve(template_id, config)?;
        let ctx = OpContext::new(CancellationToken::new());
        connector.execute_action(&ctx, req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;
    use std::sync::Arc as StdArc;
    use ucl_connectors::registry::standard_registry;

    fn store() -> OperationStore {
        let registry = Arc::new(standard_registry());
        let object_store: StdArc<dyn object_store::ObjectStore> = StdArc::new(InMemory::new());
        let staging = Arc::new(StagingProvider::with_store("mem", "tenant-1", "ucl", false, object_store.clone()));
        let sink = Arc::new(SinkEndpoint::with_store("ucl", "tenant-1", object_store));
        let checkpoints = Arc::new(CheckpointStore::open_temporary().unwrap());
        OperationStore::new(registry, staging, sink, checkpoints)
    }

    #[tokio::test]
    async fn start_then_get_operation_reaches_a_terminal_state() {
        let store = store();
        let mut config = RawConfig::new();
        config.insert("total_records".to_string(), "10".to_string());
        config.insert("slice_count".to_string(), "2".to_string());

        let operation_id = store
            .start_operation(StartOperationRequest {
                template_id: "stub.ingestion.large".to_string(),
                config,
                dataset_id: "stub-dataset".to_string(),
                sink_id: "sink-1".to_string(),
                run_id: None,
                load_date: "2025-12-13".to_string(),
                schema: None,
                max_parallel_slices: Some(2),
            })
            .await
            .unwrap();

        let mut op = store.get_operation(&operation_id).await.unwrap();
        for _ in 0..50 {
            if op.status.is_terminal() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            op = store.get_operation(&operation_id).await.unwrap();
        }
        assert!(op.status.is_terminal(), "operation did not reach a terminal state: {op:?}");

        let state = store
            .checkpoints
            .get_ingestion_unit_state("", "stub-dataset", "sink-1")
            .unwrap()
            .expect("run_inner upserts unit state");
        assert_eq!(state.state, ucl_core::UnitState::Succeeded);
    }

    #[tokio::test]
    async fn start_operation_on_a_paused_unit_is_rejected() {
        let store = store();
        store
            .checkpoints
            .set_unit_state("", "stub-dataset", "sink-1", ucl_core::UnitState::Paused, None, None)
            .unwrap();

        let mut config = RawConfig::new();
        config.insert("total_records".to_string(), "1".to_string());
        config.insert("slice_count".to_string(), "1".to_string());

        let err = store
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
            .unwrap_err();
        assert_eq!(err.code, ucl_core::ErrorCode::UnitPaused);
    }

    #[tokio::test]
    async fn get_operation_on_unknown_id_is_object_not_found() {
        let store = store();
        let err = store.get_operation("op-nonexistent").await.unwrap_err();
        assert_eq!(err.code, ucl_core::ErrorCode::ObjectNotFound);
    }

    #[tokio::test]
    async fn cancel_operation_on_unknown_id_is_object_not_found() {
        let store = store();
        let err = store.cancel_operation("op-nonexistent").await.unwrap_err();
        assert_eq!(err.code, ucl_core::ErrorCode::ObjectNotFound);
    }

    #[tokio::test]
    async fn list_actions_surfaces_the_object_store_action_catalog() {
        let store = store();
        let mut config = RawConfig::new();
        config.insert("bucket".to_string(), "ucl-staging".to_string());
        let actions = store.list_actions("object.store", &config).await.unwrap();
        let ids: Vec<_> = actions.into_iter().map(|a| a.id).collect();
        assert!(ids.contains(&"ensure_bucket".to_string()));
        assert!(ids.contains(&"put_object".to_string()));
    }

    #[tokio::test]
    async fn execute_action_with_unknown_action_id_is_unknown_template() {
        let store = store();
        let mut config = RawConfig::new();
        config.insert("bucket".to_string(), "ucl-staging".to_string());
        let err = store
            .execute_action(
                "object.store",
                &config,
                ExecuteActionRequest { action_id: "rename_bucket".to_string(), parameters: HashMap::new() },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, ucl_core::ErrorCode::UnknownTemplate);
    }
}

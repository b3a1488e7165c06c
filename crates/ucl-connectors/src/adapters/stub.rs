//! In-memory fixture connector (`stub.ingestion.large`) used to drive the
//! end-to-end scenarios in spec §8 without a live external system.
//! Structured the way the teacher's `CsvSource` is structured (a small
//! struct wrapping its spec, implementing the behavioral trait directly)
//! but driven by a deterministic in-memory generator instead of a glob of
//! files on disk.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use ucl_core::{
    Connector, ConnectorCapabilities, ConnectorDescriptor, Dataset, DatasetKind, EnvelopeSource,
    OpContext, Plan, PlanRequest, ProbeRequest, ProbeResult, ReadRequest, RecordEnvelope,
    RecordIterator, Slice, SliceReadRequest, UclError, UclResult, ValidateConfigResult,
};

use crate::registry::RawConfig;

/// Large-run threshold the stub checks `disable_object_store` against;
/// mirrors `ucl_orchestrator::run::DEFAULT_LARGE_RUN_THRESHOLD_BYTES`
/// (64MiB), which is what a `StartOperation` call leaves in effect unless
/// it overrides `large_run_threshold_bytes` itself.
const DEFAULT_LARGE_RUN_THRESHOLD_BYTES: u64 = 64 * 1024 * 1024;

/// Parsed configuration for one stub connector instance.
#[derive(Debug, Clone)]
pub struct StubSpec {
    pub total_records: u64,
    pub slice_count: u32,
    /// When set, `validate_config` fails with `E_AUTH_INVALID` — drives
    /// scenario 4 in §8.
    pub fail_auth: bool,
    /// Overrides the probe's `estimated_bytes`, letting a caller force
    /// large-run mode without actually emitting gigabytes (§8 scenario 2).
    pub estimated_bytes: Option<u64>,
    /// Simulates the staging backend being unreachable for large runs
    /// (§6, §8 scenario 3): `probe_ingestion` fails with
    /// `E_STAGING_UNAVAILABLE` when this is set and the (possibly
    /// overridden) `estimated_bytes` crosses the large-run threshold.
    pub disable_object_store: bool,
}

impl Default for StubSpec {
    fn default() -> Self {
        Self {
            total_records: 90,
            slice_count: 3,
            fail_auth: false,
            estimated_bytes: None,
            disable_object_store: false,
        }
    }
}

pub struct StubConnector {
    descriptor: ConnectorDescriptor,
    spec: StubSpec,
}

impl StubConnector {
    pub fn from_config(cfg: &RawConfig) -> UclResult<Self> {
        let mut spec = StubSpec::default();
        if let Some(v) = cfg.get("total_records") {
            spec.total_records = v
                .parse()
                .map_err(|_| UclError::auth_invalid("invalid total_records"))?;
        }
        if let Some(v) = cfg.get("slice_count") {
            spec.slice_count = v
                .parse()
                .map_err(|_| UclError::auth_invalid("invalid slice_count"))?;
        }
        if cfg.get("auth").map(String::as_str) == Some("auth failure") {
            spec.fail_auth = true;
        }
        if let Some(v) = cfg.get("estimated_bytes") {
            spec.estimated_bytes = Some(
                v.parse()
                    .map_err(|_| UclError::auth_invalid("invalid estimated_bytes"))?,
            );
        }
        spec.disable_object_store = cfg.get("disable_object_store").map(String::as_str) == Some("true");

        Ok(Self {
            descriptor: ConnectorDescriptor {
                template_id: "stub.ingestion.large".to_string(),
                family: "stub".to_string(),
                categories: vec!["test-fixture".to_string()],
                auth_modes: vec!["none".to_string()],
                sample_config: serde_json::json!({"total_records": 90, "slice_count": 3}),
            },
            spec,
        })
    }

    /// Records assigned to slice `n` of `slice_count`, ceil-distributed so
    /// `Σ per-slice == total_records` (§8 scenario 6: "recordsWritten equal
    /// to the ceil-rounded per-slice total").
    fn records_for_slice(&self, sequence: u32) -> u64 {
        let per_slice = self.spec.total_records.div_ceil(self.spec.slice_count as u64);
        let start = per_slice * sequence as u64;
        let end = (start + per_slice).min(self.spec.total_records);
        end.saturating_sub(start)
    }
}

#[async_trait]
impl Connector for StubConnector {
    fn descriptor(&self) -> &ConnectorDescriptor {
        &self.descriptor
    }

    fn capabilities(&self) -> ConnectorCapabilities {
        ConnectorCapabilities {
            supports_full: true,
            supports_incremental: false,
            supports_preview: true,
            supports_metadata: true,
            supports_write: false,
            supports_finalize: false,
            supports_staging: true,
            supports_count_probe: true,
        }
    }

    async fn validate_config(&self, _ctx: &OpContext) -> ValidateConfigResult {
        if self.spec.fail_auth {
            ValidateConfigResult {
                valid: false,
                message: "auth failure".to_string(),
                code: Some(ucl_core::ErrorCode::AuthInvalid.as_str().to_string()),
                retryable: false,
                detected_version: None,
            }
        } else {
            ValidateConfigResult {
                valid: true,
                message: "ok".to_string(),
                code: None,
                retryable: false,
                detected_version: Some("stub-1.0".to_string()),
            }
        }
    }

    async fn list_datasets(&self, _ctx: &OpContext) -> UclResult<Vec<Dataset>> {
        Ok(vec![Dataset {
            id: "stub.dataset".to_string(),
            display_name: "Stub Dataset".to_string(),
            kind: DatasetKind::Semantic,
            supports_incremental: false,
            incremental_column: None,
            cdm_model_id: None,
        }])
    }

    async fn get_schema(&self, _dataset_id: &str) -> UclResult<Option<serde_json::Value>> {
        Ok(None)
    }

    async fn probe_ingestion(&self, _ctx: &OpContext, _req: ProbeRequest) -> UclResult<ProbeResult> {
        if self.spec.fail_auth {
            return Err(UclError::auth_invalid("auth failure"));
        }
        // ~200 bytes/envelope is a reasonable stand-in for a small JSON
        // payload; callers override via `estimated_bytes` when forcing
        // large-run mode (§6).
        let estimated_bytes = self.spec.estimated_bytes.unwrap_or(self.spec.total_records * 200);
        if self.spec.disable_object_store && estimated_bytes >= DEFAULT_LARGE_RUN_THRESHOLD_BYTES {
            return Err(UclError::staging_unavailable(
                "object store disabled and run exceeds the large-run threshold",
            ));
        }
        Ok(ProbeResult {
            estimated_records: self.spec.total_records,
            estimated_bytes,
            max_watermark: None,
            slice_keys: (0..self.spec.slice_count).map(|i| format!("slice-{i}")).collect(),
        })
    }

    async fn plan_ingestion(&self, _ctx: &OpContext, req: PlanRequest) -> UclResult<Plan> {
        let slices = (0..self.spec.slice_count)
            .map(|seq| {
                let mut params = HashMap::new();
                params.insert("sliceKey".to_string(), format!("slice-{seq}"));
                params.insert("datasetId".to_string(), req.dataset_id.clone());
                Slice {
                    slice_id: Slice::natural_key(&params, seq),
                    sequence: seq,
                    params,
                }
            })
            .collect();
        Ok(Plan {
            strategy: "stub-even-split".to_string(),
            slices,
        })
    }

    async fn read_slice(
        &self,
        _ctx: &OpContext,
        req: SliceReadRequest,
    ) -> UclResult<Box<dyn RecordIterator>> {
        let count = self.records_for_slice(req.slice.sequence);
        let resume_from: u64 = req
            .resume_checkpoint
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        Ok(Box::new(StubIterator {
            endpoint_id: "stub-endpoint".to_string(),
            dataset_id: req.dataset_id,
            slice_id: req.slice.slice_id,
            total: count,
            emitted: AtomicU32::new(resume_from as u32),
        }))
    }

    async fn read(&self, _ctx: &OpContext, req: ReadRequest) -> UclResult<Box<dyn RecordIterator>> {
        if req.filter.path.is_some() {
            return Err(UclError::preview_unsupported(
                "stub connector has no file-shaped preview path",
            ));
        }
        let limit = req.filter.limit.unwrap_or(self.spec.total_records as u32) as u64;
        Ok(Box::new(StubIterator {
            endpoint_id: "stub-endpoint".to_string(),
            dataset_id: req.dataset_id,
            slice_id: "preview".to_string(),
            total: limit.min(self.spec.total_records),
            emitted: AtomicU32::new(0),
        }))
    }
}

struct StubIterator {
    endpoint_id: String,
    dataset_id: String,
    slice_id: String,
    total: u64,
    emitted: AtomicU32,
}

#[async_trait]
impl RecordIterator for StubIterator {
    async fn next(&mut self) -> UclResult<Option<RecordEnvelope>> {
        let i = self.emitted.fetch_add(1, Ordering::SeqCst) as u64;
        if i >= self.total {
            return Ok(None);
        }
        Ok(Some(RecordEnvelope {
            record_kind: "raw".to_string(),
            entity_kind: "stub.item".to_string(),
            source: EnvelopeSource {
                endpoint_id: self.endpoint_id.clone(),
                source_family: "stub".to_string(),
                source_id: self.dataset_id.clone(),
                url: None,
                external_id: Some(format!("{}-{}", self.slice_id, i)),
            },
            tenant_id: "default".to_string(),
            project_key: "STUB".to_string(),
            observed_at: Utc::now(),
            payload: serde_json::json!({"index": i, "slice_id": self.slice_id}),
        }))
    }

    fn checkpoint(&self) -> Option<String> {
        Some(self.emitted.load(Ordering::SeqCst).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> OpContext {
        OpContext::new(CancellationToken::new())
    }

    #[tokio::test]
    async fn plans_deterministic_slice_ids_in_order() {
        let mut cfg = RawConfig::new();
        cfg.insert("total_records".to_string(), "90".to_string());
        cfg.insert("slice_count".to_string(), "3".to_string());
        let connector = StubConnector::from_config(&cfg).unwrap();

        let probe = connector
            .probe_ingestion(&ctx(), ProbeRequest { dataset_id: "stub.dataset".into() })
            .await
            .unwrap();

        let plan1 = connector
            .plan_ingestion(
                &ctx(),
                PlanRequest { dataset_id: "stub.dataset".into(), page_limit: 40, probe: probe.clone() },
            )
            .await
            .unwrap();
        let plan2 = connector
            .plan_ingestion(
                &ctx(),
                PlanRequest { dataset_id: "stub.dataset".into(), page_limit: 40, probe },
            )
            .await
            .unwrap();

        let ids1: Vec<_> = plan1.slices.iter().map(|s| s.slice_id.clone()).collect();
        let ids2: Vec<_> = plan2.slices.iter().map(|s| s.slice_id.clone()).collect();
        assert_eq!(ids1, ids2);
        assert_eq!(ids1.len(), 3);
    }

    #[tokio::test]
    async fn emits_ceil_distributed_records_per_slice() {
        let mut cfg = RawConfig::new();
        cfg.insert("total_records".to_string(), "90".to_string());
        cfg.insert("slice_count".to_string(), "3".to_string());
        let connector = StubConnector::from_config(&cfg).unwrap();

        let mut total = 0u64;
        for seq in 0..3 {
            let mut params = HashMap::new();
            params.insert("sliceKey".to_string(), format!("slice-{seq}"));
            let slice = Slice { slice_id: format!("slice-{seq}"), sequence: seq, params };
            let mut it = connector
                .read_slice(
                    &ctx(),
                    SliceReadRequest { dataset_id: "stub.dataset".into(), slice, resume_checkpoint: None },
                )
                .await
                .unwrap();
            while it.next().await.unwrap().is_some() {
                total += 1;
            }
        }
        assert_eq!(total, 90);
    }

    #[tokio::test]
    async fn estimated_bytes_override_forces_large_run_sizing() {
        let mut cfg = RawConfig::new();
        cfg.insert("estimated_bytes".to_string(), (64 * 1024 * 1024 + 1024).to_string());
        let connector = StubConnector::from_config(&cfg).unwrap();
        let probe = connector
            .probe_ingestion(&ctx(), ProbeRequest { dataset_id: "stub.dataset".into() })
            .await
            .unwrap();
        assert_eq!(probe.estimated_bytes, 64 * 1024 * 1024 + 1024);
    }

    #[tokio::test]
    async fn disabled_object_store_on_a_large_run_is_staging_unavailable() {
        let mut cfg = RawConfig::new();
        cfg.insert("disable_object_store".to_string(), "true".to_string());
        cfg.insert("estimated_bytes".to_string(), (5 * 64 * 1024 * 1024).to_string());
        let connector = StubConnector::from_config(&cfg).unwrap();
        let err = connector
            .probe_ingestion(&ctx(), ProbeRequest { dataset_id: "stub.dataset".into() })
            .await
            .unwrap_err();
        assert_eq!(err.code, ucl_core::ErrorCode::StagingUnavailable);
        assert!(err.retryable());
    }

    #[tokio::test]
    async fn auth_failure_surfaces_as_auth_invalid() {
        let mut cfg = RawConfig::new();
        cfg.insert("auth".to_string(), "auth failure".to_string());
        let connector = StubConnector::from_config(&cfg).unwrap();
        let result = connector.validate_config(&ctx()).await;
        assert!(!result.valid);
        assert_eq!(result.code.as_deref(), Some("E_AUTH_INVALID"));
        assert!(!result.retryable);
    }
}

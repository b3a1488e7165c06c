//! Staging provider (C4): the object-store-backed write-ahead layer
//! connectors `PutBatch` into and the sink `GetBatch`/`ListBatches` back
//! out of. Built the way the teacher's `ParquetDirSink`/`IcebergSinkOperator`
//! write fully-formed objects in one shot (no partial-object writes), just
//! generalized from one fixed Iceberg table path to an arbitrary
//! `<tenant>/staging/<stageId>/<sliceId>/<batchSeq>` layout and from Arrow
//! batches to gzip-compressed JSONL.

use std::sync::Arc;

use futures::StreamExt;
use object_store::{path::Path as ObjectPath, ObjectStore, PutOptions};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use ucl_connectors::adapters::object_store::build_s3_store;
use ucl_connectors::registry::RawConfig;
use ucl_core::{RecordEnvelope, StageRef, UclError, UclResult};

/// Stats returned from one `PutBatch` call (§4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutBatchStats {
    pub records: u64,
    pub bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutBatchResult {
    pub stage_ref: StageRef,
    pub batch_ref: String,
    pub stats: PutBatchStats,
}

pub struct StagingProvider {
    provider_id: String,
    base_prefix: String,
    tenant_id: String,
    compress: bool,
    store: Arc<dyn ObjectStore>,
}

impl StagingProvider {
    pub fn new(provider_id: impl Into<String>, cfg: &RawConfig) -> UclResult<Self> {
        let store = build_s3_store(cfg)?;
        Ok(Self {
            provider_id: provider_id.into(),
            base_prefix: cfg.get("base_prefix").cloned().unwrap_or_else(|| "ucl".to_string()),
            tenant_id: cfg.get("tenant_id").cloned().unwrap_or_else(|| "default".to_string()),
            compress: cfg.get("compress").map(|v| v != "false").unwrap_or(true),
            store,
        })
    }

    /// For tests and in-process use: wraps an already-constructed store
    /// (e.g. `object_store::memory::InMemory`) instead of building one
    /// from config.
    pub fn with_store(
        provider_id: impl Into<String>,
        tenant_id: impl Into<String>,
        base_prefix: impl Into<String>,
        compress: bool,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            base_prefix: base_prefix.into(),
            tenant_id: tenant_id.into(),
            compress,
            store,
        }
    }

    /// Mints a fresh `StageRef` for a new run. One run addresses all of
    /// its staged batches, across every slice, through this single ref
    /// (§4.4/§4.7) — callers must mint it once per run and pass it into
    /// every `put_batch` call for that run, not per slice.
    pub fn new_stage_ref(&self) -> StageRef {
        StageRef::new(&self.provider_id, &uuid::Uuid::new_v4().to_string())
    }

    fn slice_prefix(&self, stage_id: &str, slice_id: &str) -> String {
        format!("{}/{}/staging/{}/{}", self.base_prefix, self.tenant_id, stage_id, slice_id)
    }

    fn batch_path(&self, stage_id: &str, slice_id: &str, batch_seq: u32) -> String {
        let ext = if self.compress { "jsonl.gz" } else { "jsonl" };
        format!("{}/{:06}.{}", self.slice_prefix(stage_id, slice_id), batch_seq, ext)
    }

    fn encode(&self, records: &[RecordEnvelope]) -> UclResult<Vec<u8>> {
        let mut buf = Vec::new();
        for record in records {
            serde_json::to_writer(&mut buf, record)
                .map_err(|e| UclError::staging_write_failed(e.to_string()).with_cause(e))?;
            buf.push(b'\n');
        }
        if self.compress {
            use flate2::write::GzEncoder;
            use flate2::Compression;
            use std::io::Write;
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder
                .write_all(&buf)
                .map_err(|e| UclError::staging_write_failed(e.to_string()).with_cause(e))?;
            encoder
                .finish()
                .map_err(|e| UclError::staging_write_failed(e.to_string()).with_cause(e))
        } else {
            Ok(buf)
        }
    }

    fn decode(&self, bytes: &[u8], compressed: bool) -> UclResult<Vec<RecordEnvelope>> {
        let plain = if compressed {
            use flate2::read::GzDecoder;
            use std::io::Read;
            let mut out = Vec::new();
            GzDecoder::new(bytes)
                .read_to_end(&mut out)
                .map_err(|e| UclError::staging_write_failed(e.to_string()).with_cause(e))?;
            out
        } else {
            bytes.to_vec()
        };
        plain
            .split(|&b| b == b'\n')
            .filter(|line| !line.is_empty())
            .map(|line| {
                serde_json::from_slice(line)
                    .map_err(|e| UclError::schema_drift(e.to_string()).with_cause(e))
            })
            .collect()
    }

    /// Existing batch count for `sliceId`, used to pick the next
    /// `batchSeq` when the caller omits one (§4.4).
    async fn existing_batch_count(&self, stage_id: &str, slice_id: &str) -> UclResult<u32> {
        let prefix = ObjectPath::from(self.slice_prefix(stage_id, slice_id));
        let mut stream = self.store.list(Some(&prefix));
        let mut count = 0u32;
        while let Some(meta) = stream.next().await {
            meta.map_err(|e| UclError::staging_unavailable(e.to_string()).with_cause(e))?;
            count += 1;
        }
        Ok(count)
    }

    pub async fn put_batch(
        &self,
        stage_ref: Option<StageRef>,
        slice_id: &str,
        batch_seq: Option<u32>,
        records: Vec<RecordEnvelope>,
    ) -> UclResult<PutBatchResult> {
        let stage_ref =
            stage_ref.unwrap_or_else(|| StageRef::new(&self.provider_id, &uuid::Uuid::new_v4().to_string()));
        let stage_id = stage_ref.stage_id().to_string();

        let seq = match batch_seq {
            Some(seq) => seq,
            None => self.existing_batch_count(&stage_id, slice_id).await?,
        };

        let encoded = self.encode(&records)?;
        let key = self.batch_path(&stage_id, slice_id, seq);
        let path = ObjectPath::from(key.as_str());

        // Idempotent overwrite: the same (stageId, sliceId, batchSeq) is
        // always written to the same key, and object stores replace the
        // prior object wholesale (§8 "idempotence of staging").
        self.store
            .put_opts(&path, encoded.clone().into(), PutOptions::default())
            .await
            .map_err(classify_put_error)?;

        debug!(stage_id = %stage_id, slice_id, seq, bytes = encoded.len(), "staged batch");
        Ok(PutBatchResult {
            stage_ref,
            batch_ref: key,
            stats: PutBatchStats {
                records: records.len() as u64,
                bytes: encoded.len() as u64,
            },
        })
    }

    pub async fn list_batches(&self, stage_ref: &StageRef, slice_id: Option<&str>) -> UclResult<Vec<String>> {
        let stage_id = stage_ref.stage_id();
        let prefix = match slice_id {
            Some(slice_id) => self.slice_prefix(stage_id, slice_id),
            None => format!("{}/{}/staging/{}", self.base_prefix, self.tenant_id, stage_id),
        };
        let path = ObjectPath::from(prefix);
        let mut stream = self.store.list(Some(&path));
        let mut batches = Vec::new();
        while let Some(meta) = stream.next().await {
            let meta = meta.map_err(|e| UclError::staging_unavailable(e.to_string()).with_cause(e))?;
            batches.push(meta.location.to_string());
        }
        batches.sort();
        Ok(batches)
    }

    pub async fn get_batch(&self, _stage_ref: &StageRef, batch_ref: &str) -> UclResult<Vec<RecordEnvelope>> {
        let path = ObjectPath::from(batch_ref);
        let data = self
            .store
            .get(&path)
            .await
            .map_err(|e| UclError::object_not_found(e.to_string()).with_cause(e))?
            .bytes()
            .await
            .map_err(|e| UclError::object_not_found(e.to_string()).with_cause(e))?;
        self.decode(&data, batch_ref.ends_with(".gz"))
    }

    /// No-op in v1: staged artifacts are retained for debuggability (§4.4).
    pub async fn finalize_stage(&self, stage_ref: &StageRef) -> UclResult<()> {
        info!(stage_ref = %stage_ref, "finalize_stage is a no-op in v1, artifacts retained");
        Ok(())
    }
}

fn classify_put_error(err: object_store::Error) -> UclError {
    match &err {
        object_store::Error::NotFound { .. } => {
            UclError::bucket_not_found(err.to_string()).with_cause(err)
        }
        _ => UclError::staging_write_failed(err.to_string()).with_cause(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use object_store::memory::InMemory;
    use ucl_core::EnvelopeSource;

    fn provider() -> StagingProvider {
        StagingProvider::with_store("mem", "tenant-1", "ucl", true, Arc::new(InMemory::new()))
    }

    fn envelope(i: u32) -> RecordEnvelope {
        RecordEnvelope {
            record_kind: "raw".to_string(),
            entity_kind: "test.item".to_string(),
            source: EnvelopeSource {
                endpoint_id: "ep".to_string(),
                source_family: "stub".to_string(),
                source_id: "ds".to_string(),
                url: None,
                external_id: Some(i.to_string()),
            },
            tenant_id: "tenant-1".to_string(),
            project_key: "TEST".to_string(),
            observed_at: Utc::now(),
            payload: serde_json::json!({"i": i}),
        }
    }

    #[tokio::test]
    async fn put_then_get_round_trips_records() {
        let provider = provider();
        let records = vec![envelope(1), envelope(2)];
        let result = provider.put_batch(None, "slice-0", None, records.clone()).await.unwrap();
        assert_eq!(result.stats.records, 2);

        let fetched = provider.get_batch(&result.stage_ref, &result.batch_ref).await.unwrap();
        assert_eq!(fetched.len(), 2);
        assert_eq!(fetched[0].payload, records[0].payload);
    }

    #[tokio::test]
    async fn omitted_batch_seq_is_existing_count() {
        let provider = provider();
        let r0 = provider.put_batch(None, "slice-0", None, vec![envelope(1)]).await.unwrap();
        let r1 = provider
            .put_batch(Some(r0.stage_ref.clone()), "slice-0", None, vec![envelope(2)])
            .await
            .unwrap();
        assert!(r0.batch_ref.ends_with("000000.jsonl.gz"));
        assert!(r1.batch_ref.ends_with("000001.jsonl.gz"));
    }

    #[tokio::test]
    async fn repeated_put_with_same_batch_seq_overwrites_idempotently() {
        let provider = provider();
        let r0 = provider.put_batch(None, "slice-0", Some(0), vec![envelope(1)]).await.unwrap();
        let r1 = provider
            .put_batch(Some(r0.stage_ref.clone()), "slice-0", Some(0), vec![envelope(1)])
            .await
            .unwrap();
        assert_eq!(r0.batch_ref, r1.batch_ref);

        let batches = provider.list_batches(&r0.stage_ref, Some("slice-0")).await.unwrap();
        assert_eq!(batches.len(), 1);
    }

    #[tokio::test]
    async fn list_batches_is_lexicographically_sorted() {
        let provider = provider();
        let r0 = provider.put_batch(None, "slice-0", Some(2), vec![envelope(1)]).await.unwrap();
        provider
            .put_batch(Some(r0.stage_ref.clone()), "slice-0", Some(0), vec![envelope(2)])
            .await
            .unwrap();
        provider
            .put_batch(Some(r0.stage_ref.clone()), "slice-0", Some(1), vec![envelope(3)])
            .await
            .unwrap();

        let batches = provider.list_batches(&r0.stage_ref, Some("slice-0")).await.unwrap();
        assert!(batches[0] < batches[1]);
        assert!(batches[1] < batches[2]);
    }
}

//! Object store family (`object.store`): doubles as an ingestion source
//! (hive-partitioned key listing under a prefix) and as the backing store
//! `ucl-staging`/`ucl-sink` write through. Built the same way the teacher's
//! `TopicMappingManager`/`IcebergSinkOperator` construct their S3 client —
//! `AmazonS3Builder` parameterized from config, wrapped in `Arc<dyn
//! ObjectStore>` and cached per endpoint.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use object_store::{aws::AmazonS3Builder, path::Path as ObjectPath, ObjectStore};
use ucl_core::{
    ActionCategory, ActionDescriptor, ActionField, ActionResult, Connector, ConnectorCapabilities,
    ConnectorDescriptor, Dataset, DatasetKind, EnvelopeSource, ExecuteActionRequest, OpContext,
    Plan, PlanRequest, ProbeRequest, ProbeResult, ReadRequest, RecordEnvelope, RecordIterator,
    Slice, SliceReadRequest, UclError, UclResult, ValidateConfigResult,
};

use crate::pool::EndpointPoolCache;
use crate::registry::RawConfig;

/// Builds an `Arc<dyn ObjectStore>` from the same config keys the teacher's
/// sink/source operators read (`endpoint`, `access_key`, `secret_key`,
/// `bucket`, `region`). Shared by the staging provider and sink endpoint so
/// every component that talks to object storage builds its client the same
/// way.
pub fn build_s3_store(cfg: &RawConfig) -> UclResult<Arc<dyn ObjectStore>> {
    let bucket = cfg
        .get("bucket")
        .ok_or_else(|| UclError::bucket_not_found("missing 'bucket' in object store config"))?;
    let mut builder = AmazonS3Builder::new()
        .with_bucket_name(bucket)
        .with_allow_http(cfg.get("allow_http").map(|v| v == "true").unwrap_or(true));
    if let Some(endpoint) = cfg.get("endpoint") {
        builder = builder.with_endpoint(endpoint);
    }
    if let Some(region) = cfg.get("region") {
        builder = builder.with_region(region);
    }
    if let Some(key) = cfg.get("access_key") {
        builder = builder.with_access_key_id(key);
    }
    if let Some(secret) = cfg.get("secret_key") {
        builder = builder.with_secret_access_key(secret);
    }
    let store = builder
        .build()
        .map_err(|e| UclError::endpoint_unreachable(e.to_string()).with_cause(e))?;
    Ok(Arc::new(store))
}

pub struct ObjectStoreConnector {
    descriptor: ConnectorDescriptor,
    cfg: RawConfig,
    endpoint_id: String,
    prefix: String,
    pool: Arc<EndpointPoolCache<Arc<dyn ObjectStore>>>,
}

impl ObjectStoreConnector {
    pub fn from_config(cfg: &RawConfig) -> UclResult<Self> {
        let endpoint_id = cfg
            .get("endpoint_id")
            .cloned()
            .unwrap_or_else(|| "object-store".to_string());
        let prefix = cfg.get("prefix").cloned().unwrap_or_default();
        Ok(Self {
            descriptor: ConnectorDescriptor {
                template_id: "object.store".to_string(),
                family: "object_store".to_string(),
                categories: vec!["blob".to_string(), "hive_partitioned".to_string()],
                auth_modes: vec!["static_keys".to_string(), "instance_profile".to_string()],
                sample_config: serde_json::json!({"bucket": "my-bucket", "prefix": "raw/"}),
            },
            cfg: cfg.clone(),
            endpoint_id,
            prefix,
            pool: Arc::new(EndpointPoolCache::default()),
        })
    }

    async fn store(&self) -> UclResult<Arc<Arc<dyn ObjectStore>>> {
        let cfg = self.cfg.clone();
        self.pool
            .get_or_build(&self.endpoint_id, move || build_s3_store(&cfg))
            .await
    }

    async fn list_keys(&self) -> UclResult<Vec<String>> {
        let store = self.store().await?;
        let path = ObjectPath::from(self.prefix.as_str());
        let mut stream = store.list(Some(&path));
        let mut keys = Vec::new();
        while let Some(meta) = stream.next().await {
            let meta = meta.map_err(|e| UclError::endpoint_unreachable(e.to_string()).with_cause(e))?;
            keys.push(meta.location.to_string());
        }
        keys.sort();
        Ok(keys)
    }
}

#[async_trait]
impl Connector for ObjectStoreConnector {
    fn descriptor(&self) -> &ConnectorDescriptor {
        &self.descriptor
    }

    fn capabilities(&self) -> ConnectorCapabilities {
        ConnectorCapabilities {
            supports_full: true,
            supports_incremental: false,
            supports_preview: true,
            supports_metadata: true,
            supports_write: true,
            supports_finalize: true,
            supports_staging: true,
            supports_count_probe: true,
        }
    }

    async fn validate_config(&self, _ctx: &OpContext) -> ValidateConfigResult {
        match self.store().await {
            Ok(_) => ValidateConfigResult {
                valid: true,
                message: "ok".to_string(),
                code: None,
                retryable: false,
                detected_version: None,
            },
            Err(err) => ValidateConfigResult {
                valid: false,
                message: err.message.clone(),
                code: Some(err.code.as_str().to_string()),
                retryable: err.retryable(),
                detected_version: None,
            },
        }
    }

    async fn list_datasets(&self, _ctx: &OpContext) -> UclResult<Vec<Dataset>> {
        Ok(vec![Dataset {
            id: self.prefix.clone(),
            display_name: format!("objects under {}", self.prefix),
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
        let keys = self.list_keys().await?;
        Ok(ProbeResult {
            estimated_records: keys.len() as u64,
            estimated_bytes: 0,
            max_watermark: None,
            slice_keys: keys,
        })
    }

    async fn plan_ingestion(&self, _ctx: &OpContext, req: PlanRequest) -> UclResult<Plan> {
        let slices = req
            .probe
            .slice_keys
            .iter()
            .enumerate()
            .map(|(seq, key)| {
                let mut params = HashMap::new();
                params.insert("key".to_string(), key.clone());
                Slice {
                    slice_id: Slice::natural_key(&params, seq as u32),
                    sequence: seq as u32,
                    params,
                }
            })
            .collect();
        Ok(Plan {
            strategy: "object-store-one-key-per-slice".to_string(),
            slices,
        })
    }

    async fn read_slice(
        &self,
        _ctx: &OpContext,
        req: SliceReadRequest,
    ) -> UclResult<Box<dyn RecordIterator>> {
        let key = req
            .slice
            .params
            .get("key")
            .ok_or_else(|| UclError::object_not_found("slice has no 'key' param"))?
            .clone();
        let store = self.store().await?;
        let path = ObjectPath::from(key.as_str());
        let data = store
            .get(&path)
            .await
            .map_err(|e| UclError::object_not_found(e.to_string()).with_cause(e))?
            .bytes()
            .await
            .map_err(|e| UclError::object_not_found(e.to_string()).with_cause(e))?;

        Ok(Box::new(ObjectIterator {
            endpoint_id: self.endpoint_id.clone(),
            dataset_id: req.dataset_id,
            key,
            body: Some(data.to_vec()),
        }))
    }

    async fn read(&self, ctx: &OpContext, req: ReadRequest) -> UclResult<Box<dyn RecordIterator>> {
        let key = req
            .filter
            .path
            .clone()
            .ok_or_else(|| UclError::filter_unsupported("object store preview requires a 'path' filter"))?;
        let mut params = HashMap::new();
        params.insert("key".to_string(), key);
        let slice = Slice {
            slice_id: "preview".to_string(),
            sequence: 0,
            params,
        };
        self.read_slice(
            ctx,
            SliceReadRequest {
                dataset_id: req.dataset_id,
                slice,
                resume_checkpoint: req.checkpoint,
            },
        )
        .await
    }

    fn list_actions(&self) -> Vec<ActionDescriptor> {
        vec![
            ActionDescriptor {
                id: "ensure_bucket".to_string(),
                category: ActionCategory::Create,
                input_schema: vec![],
                output_schema: vec![ActionField {
                    name: "bucket".to_string(),
                    field_type: "string".to_string(),
                    required: true,
                    sensitive: false,
                }],
                idempotent: true,
            },
            ActionDescriptor {
                id: "put_object".to_string(),
                category: ActionCategory::Create,
                input_schema: vec![
                    field("key", true),
                    ActionField { name: "body_base64".to_string(), field_type: "string".to_string(), required: true, sensitive: false },
                ],
                output_schema: vec![field("key", true)],
                idempotent: true,
            },
            ActionDescriptor {
                id: "get_object".to_string(),
                category: ActionCategory::Read,
                input_schema: vec![field("key", true)],
                output_schema: vec![ActionField { name: "body_base64".to_string(), field_type: "string".to_string(), required: true, sensitive: false }],
                idempotent: true,
            },
            ActionDescriptor {
                id: "list_prefix".to_string(),
                category: ActionCategory::Read,
                input_schema: vec![field("prefix", false)],
                output_schema: vec![ActionField { name: "keys".to_string(), field_type: "array".to_string(), required: true, sensitive: false }],
                idempotent: true,
            },
            ActionDescriptor {
                id: "delete_object".to_string(),
                category: ActionCategory::Delete,
                input_schema: vec![field("key", true)],
                output_schema: vec![],
                idempotent: true,
            },
        ]
    }

    async fn execute_action(&self, _ctx: &OpContext, req: ExecuteActionRequest) -> UclResult<ActionResult> {
        if !["ensure_bucket", "put_object", "get_object", "list_prefix", "delete_object"].contains(&req.action_id.as_str()) {
            return Err(UclError::new(
                ucl_core::ErrorCode::UnknownTemplate,
                format!("action '{}' is not implemented by this connector", req.action_id),
            ));
        }
        let store = self.store().await?;
        match req.action_id.as_str() {
            // `object_store` exposes no bucket-lifecycle API; a reachable
            // store for the configured bucket is treated as "ensured"
            // (see DESIGN.md's bucket auto-provision note).
            "ensure_bucket" => Ok(ActionResult {
                success: true,
                data: serde_json::json!({"bucket": self.cfg.get("bucket").cloned().unwrap_or_default()}),
                error: None,
            }),
            "put_object" => {
                let key = string_param(&req, "key")?;
                let body_b64 = string_param(&req, "body_base64")?;
                let bytes = base64_decode(&body_b64)
                    .map_err(|e| UclError::filter_unsupported(format!("invalid body_base64: {e}")))?;
                let path = ObjectPath::from(key.as_str());
                store
                    .put(&path, bytes.into())
                    .await
                    .map_err(|e| UclError::endpoint_unreachable(e.to_string()).with_cause(e))?;
                Ok(ActionResult { success: true, data: serde_json::json!({"key": key}), error: None })
            }
            "get_object" => {
                let key = string_param(&req, "key")?;
                let path = ObjectPath::from(key.as_str());
                let data = store
                    .get(&path)
                    .await
                    .map_err(|e| UclError::object_not_found(e.to_string()).with_cause(e))?
                    .bytes()
                    .await
                    .map_err(|e| UclError::object_not_found(e.to_string()).with_cause(e))?;
                Ok(ActionResult {
                    success: true,
                    data: serde_json::json!({"body_base64": base64_encode(&data)}),
                    error: None,
                })
            }
            "list_prefix" => {
                let prefix = req
                    .parameters
                    .get("prefix")
                    .and_then(|v| v.as_str())
                    .unwrap_or(&self.prefix)
                    .to_string();
                let path = ObjectPath::from(prefix.as_str());
                let mut stream = store.list(Some(&path));
                let mut keys = Vec::new();
                while let Some(meta) = stream.next().await {
                    let meta = meta.map_err(|e| UclError::endpoint_unreachable(e.to_string()).with_cause(e))?;
                    keys.push(meta.location.to_string());
                }
                keys.sort();
                Ok(ActionResult { success: true, data: serde_json::json!({"keys": keys}), error: None })
            }
            "delete_object" => {
                let key = string_param(&req, "key")?;
                let path = ObjectPath::from(key.as_str());
                store
                    .delete(&path)
                    .await
                    .map_err(|e| UclError::object_not_found(e.to_string()).with_cause(e))?;
                Ok(ActionResult { success: true, data: serde_json::Value::Null, error: None })
            }
            other => Err(UclError::new(
                ucl_core::ErrorCode::UnknownTemplate,
                format!("action '{other}' is not implemented by this connector"),
            )),
        }
    }
}

fn field(name: &str, required: bool) -> ActionField {
    ActionField { name: name.to_string(), field_type: "string".to_string(), required, sensitive: false }
}

fn string_param(req: &ExecuteActionRequest, name: &str) -> UclResult<String> {
    req.parameters
        .get(name)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| UclError::new(ucl_core::ErrorCode::FilterUnsupported, format!("missing required parameter '{name}'")))
}

struct ObjectIterator {
    endpoint_id: String,
    dataset_id: String,
    key: String,
    // Delivered whole in one envelope; `take()` on first `next()` leaves
    // the slot empty so the following call signals end-of-stream.
    body: Option<Vec<u8>>,
}

#[async_trait]
impl RecordIterator for ObjectIterator {
    async fn next(&mut self) -> UclResult<Option<RecordEnvelope>> {
        let Some(body) = self.body.take() else {
            return Ok(None);
        };
        let payload = serde_json::from_slice::<serde_json::Value>(&body)
            .unwrap_or_else(|_| serde_json::json!({"raw_base64": base64_encode(&body)}));
        Ok(Some(RecordEnvelope {
            record_kind: "raw".to_string(),
            entity_kind: "object_store.object".to_string(),
            source: EnvelopeSource {
                endpoint_id: self.endpoint_id.clone(),
                source_family: "object_store".to_string(),
                source_id: self.dataset_id.clone(),
                url: Some(self.key.clone()),
                external_id: Some(self.key.clone()),
            },
            tenant_id: "default".to_string(),
            project_key: "OBJ".to_string(),
            observed_at: Utc::now(),
            payload,
        }))
    }

    fn checkpoint(&self) -> Option<String> {
        None
    }
}

fn base64_encode(bytes: &[u8]) -> String {
    base64::encode(bytes)
}

fn base64_decode(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    base64::decode(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    #[test]
    fn missing_bucket_fails_closed() {
        let cfg = RawConfig::new();
        let err = build_s3_store(&cfg).unwrap_err();
        assert_eq!(err.code, ucl_core::ErrorCode::BucketNotFound);
    }

    async fn in_memory_connector() -> ObjectStoreConnector {
        let mut cfg = RawConfig::new();
        cfg.insert("bucket".to_string(), "test-bucket".to_string());
        cfg.insert("endpoint_id".to_string(), "mem-ep".to_string());
        let connector = ObjectStoreConnector::from_config(&cfg).unwrap();
        let mem: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        connector
            .pool
            .get_or_build::<_, UclError>("mem-ep", move || Ok(mem.clone()))
            .await
            .unwrap();
        connector
    }

    fn ctx() -> OpContext {
        OpContext::new(tokio_util::sync::CancellationToken::new())
    }

    #[tokio::test]
    async fn action_catalog_exposes_the_five_minimum_actions() {
        let connector = in_memory_connector().await;
        let ids: Vec<_> = connector.list_actions().into_iter().map(|a| a.id).collect();
        for expected in ["ensure_bucket", "put_object", "get_object", "list_prefix", "delete_object"] {
            assert!(ids.contains(&expected.to_string()), "missing action '{expected}'");
        }
    }

    #[tokio::test]
    async fn put_then_get_object_round_trips_through_the_action_plane() {
        let connector = in_memory_connector().await;
        let mut put_params = HashMap::new();
        put_params.insert("key".to_string(), serde_json::json!("raw/widgets.json"));
        put_params.insert("body_base64".to_string(), serde_json::json!(base64_encode(b"hello")));
        let put = connector
            .execute_action(&ctx(), ExecuteActionRequest { action_id: "put_object".to_string(), parameters: put_params })
            .await
            .unwrap();
        assert!(put.success);

        let mut get_params = HashMap::new();
        get_params.insert("key".to_string(), serde_json::json!("raw/widgets.json"));
        let got = connector
            .execute_action(&ctx(), ExecuteActionRequest { action_id: "get_object".to_string(), parameters: get_params })
            .await
            .unwrap();
        let body = base64_decode(got.data["body_base64"].as_str().unwrap()).unwrap();
        assert_eq!(body, b"hello");
    }

    #[tokio::test]
    async fn unknown_action_id_is_unknown_template() {
        let connector = in_memory_connector().await;
        let err = connector
            .execute_action(&ctx(), ExecuteActionRequest { action_id: "rename_bucket".to_string(), parameters: HashMap::new() })
            .await
            .unwrap_err();
        assert_eq!(err.code, ucl_core::ErrorCode::UnknownTemplate);
    }
}

//! Source host family (`http.source_host`): repository → tree → file
//! walking over a GitHub-shaped REST API. Binary or oversized blobs are
//! emitted metadata-only rather than with their content inlined (§4.3).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use ucl_core::{
    Connector, ConnectorCapabilities, ConnectorDescriptor, Dataset, DatasetKind, EnvelopeSource,
    OpContext, Plan, PlanRequest, ProbeRequest, ProbeResult, ReadRequest, RecordEnvelope,
    RecordIterator, Slice, SliceReadRequest, UclError, UclResult, ValidateConfigResult,
};

use crate::registry::RawConfig;

/// Files larger than this are emitted as metadata-only records: path,
/// size, sha, but no `content` field.
const MAX_INLINE_BYTES: u64 = 1_000_000;

pub struct SourceHostConnector {
    descriptor: ConnectorDescriptor,
    endpoint_id: String,
    base_url: String,
    repo: String,
    branch: String,
    auth_token: Option<String>,
    client: Client,
}

impl SourceHostConnector {
    pub fn from_config(cfg: &RawConfig) -> UclResult<Self> {
        let base_url = cfg
            .get("base_url")
            .cloned()
            .unwrap_or_else(|| "https://api.github.com".to_string());
        let repo = cfg
            .get("repo")
            .ok_or_else(|| UclError::auth_invalid("missing 'repo' in source host config"))?
            .clone();
        let branch = cfg.get("branch").cloned().unwrap_or_else(|| "main".to_string());
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("ucl-connectors")
            .build()
            .map_err(|e| UclError::endpoint_unreachable(e.to_string()).with_cause(e))?;

        Ok(Self {
            descriptor: ConnectorDescriptor {
                template_id: "http.source_host".to_string(),
                family: "source_host".to_string(),
                categories: vec!["repository".to_string(), "files".to_string()],
                auth_modes: vec!["bearer_token".to_string(), "none".to_string()],
                sample_config: serde_json::json!({"repo": "org/name", "branch": "main"}),
            },
            endpoint_id: cfg.get("endpoint_id").cloned().unwrap_or_else(|| repo.clone()),
            base_url: base_url.trim_end_matches('/').to_string(),
            repo,
            branch,
            auth_token: cfg.get("auth_token").cloned(),
            client,
        })
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let req = self.client.get(url);
        match &self.auth_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn tree(&self) -> UclResult<Vec<serde_json::Value>> {
        let response = self
            .request(&format!("/repos/{}/git/trees/{}", self.repo, self.branch))
            .query(&[("recursive", "1")])
            .send()
            .await
            .map_err(|e| UclError::endpoint_unreachable(e.to_string()).with_cause(e))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(UclError::object_not_found(format!(
                "repository '{}' or branch '{}' not found",
                self.repo, self.branch
            )));
        }
        if response.status() == reqwest::StatusCode::UNAUTHORIZED
            || response.status() == reqwest::StatusCode::FORBIDDEN
        {
            return Err(UclError::permission_denied(format!(
                "source host rejected credentials: {}",
                response.status()
            )));
        }
        if !response.status().is_success() {
            return Err(UclError::endpoint_unreachable(format!(
                "tree listing failed: {}",
                response.status()
            )));
        }
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| UclError::schema_drift(e.to_string()).with_cause(e))?;
        Ok(body
            .get("tree")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|entry| entry.get("type").and_then(|v| v.as_str()) == Some("blob"))
            .collect())
    }

    async fn blob(&self, sha: &str) -> UclResult<serde_json::Value> {
        let response = self
            .request(&format!("/repos/{}/git/blobs/{}", self.repo, sha))
            .send()
            .await
            .map_err(|e| UclError::endpoint_unreachable(e.to_string()).with_cause(e))?;
        if !response.status().is_success() {
            return Err(UclError::object_not_found(format!("blob '{sha}' not found")));
        }
        response
            .json()
            .await
            .map_err(|e| UclError::schema_drift(e.to_string()).with_cause(e))
    }
}

#[async_trait]
impl Connector for SourceHostConnector {
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
        match self.tree().await {
            Ok(_) => ValidateConfigResult {
                valid: true,
                message: "ok".to_string(),
                code: None,
                retryable: false,
                detected_version: Some(self.branch.clone()),
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
            id: "files".to_string(),
            display_name: format!("{}@{}", self.repo, self.branch),
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
        let entries = self.tree().await?;
        let estimated_bytes = entries
            .iter()
            .filter_map(|e| e.get("size").and_then(|v| v.as_u64()))
            .sum();
        Ok(ProbeResult {
            estimated_records: entries.len() as u64,
            estimated_bytes,
            max_watermark: None,
            slice_keys: entries
                .iter()
                .filter_map(|e| e.get("path").and_then(|v| v.as_str()).map(str::to_string))
                .collect(),
        })
    }

    async fn plan_ingestion(&self, _ctx: &OpContext, req: PlanRequest) -> UclResult<Plan> {
        let slices = req
            .probe
            .slice_keys
            .iter()
            .enumerate()
            .map(|(seq, path)| {
                let mut params = HashMap::new();
                params.insert("path".to_string(), path.clone());
                Slice {
                    slice_id: Slice::natural_key(&params, seq as u32),
                    sequence: seq as u32,
                    params,
                }
            })
            .collect();
        Ok(Plan {
            strategy: "source-host-one-file-per-slice".to_string(),
            slices,
        })
    }

    async fn read_slice(
        &self,
        _ctx: &OpContext,
        req: SliceReadRequest,
    ) -> UclResult<Box<dyn RecordIterator>> {
        let path = req
            .slice
            .params
            .get("path")
            .ok_or_else(|| UclError::object_not_found("slice has no 'path' param"))?
            .clone();

        let entries = self.tree().await?;
        let entry = entries
            .into_iter()
            .find(|e| e.get("path").and_then(|v| v.as_str()) == Some(path.as_str()))
            .ok_or_else(|| UclError::object_not_found(format!("path '{path}' not found in tree")))?;

        let size = entry.get("size").and_then(|v| v.as_u64()).unwrap_or(0);
        let sha = entry.get("sha").and_then(|v| v.as_str()).unwrap_or_default().to_string();

        let payload = if size <= MAX_INLINE_BYTES {
            let blob = self.blob(&sha).await?;
            serde_json::json!({
                "path": path,
                "size": size,
                "sha": sha,
                "content": blob.get("content"),
                "encoding": blob.get("encoding"),
            })
        } else {
            serde_json::json!({
                "path": path,
                "size": size,
                "sha": sha,
                "metadata_only": true,
            })
        };

        Ok(Box::new(SourceHostIterator {
            endpoint_id: self.endpoint_id.clone(),
            dataset_id: req.dataset_id,
            path,
            payload: Some(payload),
        }))
    }

    async fn read(&self, ctx: &OpContext, req: ReadRequest) -> UclResult<Box<dyn RecordIterator>> {
        let path = req
            .filter
            .path
            .clone()
            .ok_or_else(|| UclError::filter_unsupported("source host preview requires a 'path' filter"))?;
        let mut params = HashMap::new();
        params.insert("path".to_string(), path);
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
}

struct SourceHostIterator {
    endpoint_id: String,
    dataset_id: String,
    path: String,
    payload: Option<serde_json::Value>,
}

#[async_trait]
impl RecordIterator for SourceHostIterator {
    async fn next(&mut self) -> UclResult<Option<RecordEnvelope>> {
        let Some(payload) = self.payload.take() else {
            return Ok(None);
        };
        Ok(Some(RecordEnvelope {
            record_kind: "raw".to_string(),
            entity_kind: "source_host.file".to_string(),
            source: EnvelopeSource {
                endpoint_id: self.endpoint_id.clone(),
                source_family: "source_host".to_string(),
                source_id: self.dataset_id.clone(),
                url: None,
                external_id: Some(self.path.clone()),
            },
            tenant_id: "default".to_string(),
            project_key: "SRC".to_string(),
            observed_at: Utc::now(),
            payload,
        }))
    }

    fn checkpoint(&self) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_repo_fails_closed() {
        let cfg = RawConfig::new();
        let err = SourceHostConnector::from_config(&cfg).unwrap_err();
        assert_eq!(err.code, ucl_core::ErrorCode::AuthInvalid);
    }
}

//! Wiki family (`http.wiki`): version-scoped page listing over a
//! Confluence-shaped REST API. Same `reqwest::Client` construction and
//! status-then-json handling as `issue_tracker`, paginated by `start`/
//! `limit` rather than `startAt`/`maxResults`.

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

const DEFAULT_PAGE_SIZE: u32 = 25;

pub struct WikiConnector {
    descriptor: ConnectorDescriptor,
    endpoint_id: String,
    base_url: String,
    space_key: String,
    auth_token: Option<String>,
    page_size: u32,
    client: Client,
}

impl WikiConnector {
    pub fn from_config(cfg: &RawConfig) -> UclResult<Self> {
        let base_url = cfg
            .get("base_url")
            .ok_or_else(|| UclError::endpoint_unreachable("missing 'base_url' in wiki config"))?
            .trim_end_matches('/')
            .to_string();
        let space_key = cfg
            .get("space_key")
            .ok_or_else(|| UclError::auth_invalid("missing 'space_key' in wiki config"))?
            .clone();
        let page_size = cfg
            .get("page_size")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_PAGE_SIZE);
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| UclError::endpoint_unreachable(e.to_string()).with_cause(e))?;

        Ok(Self {
            descriptor: ConnectorDescriptor {
                template_id: "http.wiki".to_string(),
                family: "wiki".to_string(),
                categories: vec!["documents".to_string(), "versioned".to_string()],
                auth_modes: vec!["bearer_token".to_string()],
                sample_config: serde_json::json!({"base_url": "https://org.atlassian.net/wiki", "space_key": "ENG"}),
            },
            endpoint_id: cfg.get("endpoint_id").cloned().unwrap_or_else(|| space_key.clone()),
            base_url,
            space_key,
            auth_token: cfg.get("auth_token").cloned(),
            page_size,
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

    async fn list_content(&self, start: u32, limit: u32) -> UclResult<serde_json::Value> {
        let response = self
            .request("/rest/api/content")
            .query(&[
                ("spaceKey", self.space_key.as_str()),
                ("start", &start.to_string()),
                ("limit", &limit.to_string()),
                ("expand", "body.storage,version"),
            ])
            .send()
            .await
            .map_err(|e| UclError::endpoint_unreachable(e.to_string()).with_cause(e))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED
            || response.status() == reqwest::StatusCode::FORBIDDEN
        {
            return Err(UclError::auth_invalid(format!(
                "wiki content listing rejected credentials: {}",
                response.status()
            )));
        }
        if !response.status().is_success() {
            return Err(UclError::endpoint_unreachable(format!(
                "wiki content listing failed: {}",
                response.status()
            )));
        }
        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| UclError::schema_drift(e.to_string()).with_cause(e))
    }
}

#[async_trait]
impl Connector for WikiConnector {
    fn descriptor(&self) -> &ConnectorDescriptor {
        &self.descriptor
    }

    fn capabilities(&self) -> ConnectorCapabilities {
        ConnectorCapabilities {
            supports_full: true,
            supports_incremental: true,
            supports_preview: true,
            supports_metadata: true,
            supports_write: false,
            supports_finalize: false,
            supports_staging: true,
            supports_count_probe: true,
        }
    }

    async fn validate_config(&self, _ctx: &OpContext) -> ValidateConfigResult {
        match self.list_content(0, 1).await {
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
            id: "pages".to_string(),
            display_name: format!("{} pages", self.space_key),
            kind: DatasetKind::Semantic,
            supports_incremental: true,
            incremental_column: Some("version.when".to_string()),
            cdm_model_id: None,
        }])
    }

    async fn get_schema(&self, _dataset_id: &str) -> UclResult<Option<serde_json::Value>> {
        Ok(None)
    }

    async fn probe_ingestion(&self, _ctx: &OpContext, _req: ProbeRequest) -> UclResult<ProbeResult> {
        let page = self.list_content(0, 1).await?;
        let total = page.get("size").and_then(|v| v.as_u64()).unwrap_or(0);
        Ok(ProbeResult {
            estimated_records: total,
            estimated_bytes: total * 4000,
            max_watermark: None,
            slice_keys: Vec::new(),
        })
    }

    async fn plan_ingestion(&self, _ctx: &OpContext, req: PlanRequest) -> UclResult<Plan> {
        let page_size = self.page_size.max(1) as u64;
        let total_pages = req.probe.estimated_records.div_ceil(page_size).max(1);
        let slices = (0..total_pages)
            .map(|page| {
                let mut params = HashMap::new();
                params.insert("space".to_string(), self.space_key.clone());
                params.insert("start".to_string(), (page * page_size).to_string());
                params.insert("limit".to_string(), page_size.to_string());
                Slice {
                    slice_id: format!("{}-page-{page}", self.space_key.to_lowercase()),
                    sequence: page as u32,
                    params,
                }
            })
            .collect();
        Ok(Plan {
            strategy: "wiki-start-limit-paging".to_string(),
            slices,
        })
    }

    async fn read_slice(
        &self,
        _ctx: &OpContext,
        req: SliceReadRequest,
    ) -> UclResult<Box<dyn RecordIterator>> {
        let start: u32 = req
            .slice
            .params
            .get("start")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let limit: u32 = req
            .slice
            .params
            .get("limit")
            .and_then(|v| v.parse().ok())
            .unwrap_or(self.page_size);
        let resume_skip: u32 = req
            .resume_checkpoint
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);

        let page = self.list_content(start, limit).await?;
        let results = page
            .get("results")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        Ok(Box::new(WikiIterator {
            endpoint_id: self.endpoint_id.clone(),
            dataset_id: req.dataset_id,
            pages: results,
            cursor: resume_skip as usize,
        }))
    }

    async fn read(&self, ctx: &OpContext, req: ReadRequest) -> UclResult<Box<dyn RecordIterator>> {
        let limit = req.filter.limit.unwrap_or(self.page_size);
        let mut params = HashMap::new();
        params.insert("space".to_string(), self.space_key.clone());
        params.insert("start".to_string(), "0".to_string());
        params.insert("limit".to_string(), limit.to_string());
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

struct WikiIterator {
    endpoint_id: String,
    dataset_id: String,
    pages: Vec<serde_json::Value>,
    cursor: usize,
}

#[async_trait]
impl RecordIterator for WikiIterator {
    async fn next(&mut self) -> UclResult<Option<RecordEnvelope>> {
        if self.cursor >= self.pages.len() {
            return Ok(None);
        }
        let page = self.pages[self.cursor].clone();
        let id = page.get("id").and_then(|v| v.as_str()).map(str::to_string);
        self.cursor += 1;

        Ok(Some(RecordEnvelope {
            record_kind: "raw".to_string(),
            entity_kind: "wiki.page".to_string(),
            source: EnvelopeSource {
                endpoint_id: self.endpoint_id.clone(),
                source_family: "wiki".to_string(),
                source_id: self.dataset_id.clone(),
                url: None,
                external_id: id,
            },
            tenant_id: "default".to_string(),
            project_key: "WIKI".to_string(),
            observed_at: Utc::now(),
            payload: page,
        }))
    }

    fn checkpoint(&self) -> Option<String> {
        Some(self.cursor.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_space_key_fails_closed() {
        let mut cfg = RawConfig::new();
        cfg.insert("base_url".to_string(), "https://example.atlassian.net/wiki".to_string());
        let err = WikiConnector::from_config(&cfg).unwrap_err();
        assert_eq!(err.code, ucl_core::ErrorCode::AuthInvalid);
    }
}

//! Issue tracker family (`http.jira`): paginated HTTP API, Jira's
//! `startAt`/`maxResults`/`total` shape. Built the same way
//! `test_cryptopanic_api` drives `reqwest::Client` — a timed-out builder,
//! a GET with a query string, a status check before `.json::<Value>()`.

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

const DEFAULT_PAGE_SIZE: u32 = 50;

pub struct JiraConnector {
    descriptor: ConnectorDescriptor,
    endpoint_id: String,
    base_url: String,
    project_key: String,
    auth_token: Option<String>,
    page_size: u32,
    client: Client,
}

impl JiraConnector {
    pub fn from_config(cfg: &RawConfig) -> UclResult<Self> {
        let base_url = cfg
            .get("base_url")
            .ok_or_else(|| UclError::endpoint_unreachable("missing 'base_url' in jira config"))?
            .trim_end_matches('/')
            .to_string();
        let project_key = cfg
            .get("project_key")
            .ok_or_else(|| UclError::auth_invalid("missing 'project_key' in jira config"))?
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
                template_id: "http.jira".to_string(),
                family: "issue_tracker".to_string(),
                categories: vec!["issues".to_string(), "changelog".to_string()],
                auth_modes: vec!["bearer_token".to_string()],
                sample_config: serde_json::json!({"base_url": "https://org.atlassian.net", "project_key": "ENG"}),
            },
            endpoint_id: cfg.get("endpoint_id").cloned().unwrap_or_else(|| project_key.clone()),
            base_url,
            project_key,
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

    async fn search(&self, start_at: u32, max_results: u32) -> UclResult<serde_json::Value> {
        let jql = format!("project = {}", self.project_key);
        let response = self
            .request("/rest/api/2/search")
            .query(&[
                ("jql", jql.as_str()),
                ("startAt", &start_at.to_string()),
                ("maxResults", &max_results.to_string()),
            ])
            .send()
            .await
            .map_err(|e| UclError::endpoint_unreachable(e.to_string()).with_cause(e))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED
            || response.status() == reqwest::StatusCode::FORBIDDEN
        {
            return Err(UclError::auth_invalid(format!(
                "jira search rejected credentials: {}",
                response.status()
            )));
        }
        if !response.status().is_success() {
            return Err(UclError::endpoint_unreachable(format!(
                "jira search failed: {}",
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
impl Connector for JiraConnector {
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
        match self.search(0, 1).await {
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
            id: "issues".to_string(),
            display_name: format!("{} issues", self.project_key),
            kind: DatasetKind::Semantic,
            supports_incremental: true,
            incremental_column: Some("updated".to_string()),
            cdm_model_id: None,
        }])
    }

    async fn get_schema(&self, _dataset_id: &str) -> UclResult<Option<serde_json::Value>> {
        Ok(None)
    }

    async fn probe_ingestion(&self, _ctx: &OpContext, _req: ProbeRequest) -> UclResult<ProbeResult> {
        let page = self.search(0, 1).await?;
        let total = page.get("total").and_then(|v| v.as_u64()).unwrap_or(0);
        Ok(ProbeResult {
            estimated_records: total,
            estimated_bytes: total * 2000,
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
                params.insert("project".to_string(), self.project_key.clone());
                params.insert("startAt".to_string(), (page * page_size).to_string());
                params.insert("maxResults".to_string(), page_size.to_string());
                Slice {
                    slice_id: format!("{}-page-{page}", self.project_key.to_lowercase()),
                    sequence: page as u32,
                    params,
                }
            })
            .collect();
        Ok(Plan {
            strategy: "jira-start-at-paging".to_string(),
            slices,
        })
    }

    async fn read_slice(
        &self,
        _ctx: &OpContext,
        req: SliceReadRequest,
    ) -> UclResult<Box<dyn RecordIterator>> {
        let start_at: u32 = req
            .slice
            .params
            .get("startAt")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let max_results: u32 = req
            .slice
            .params
            .get("maxResults")
            .and_then(|v| v.parse().ok())
            .unwrap_or(self.page_size);
        let resume_skip: u32 = req
            .resume_checkpoint
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);

        let page = self.search(start_at, max_results).await?;
        let issues = page
            .get("issues")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        Ok(Box::new(JiraIterator {
            endpoint_id: self.endpoint_id.clone(),
            dataset_id: req.dataset_id,
            issues,
            cursor: resume_skip as usize,
        }))
    }

    async fn read(&self, ctx: &OpContext, req: ReadRequest) -> UclResult<Box<dyn RecordIterator>> {
        let max_results = req.filter.limit.unwrap_or(self.page_size);
        let mut params = HashMap::new();
        params.insert("project".to_string(), self.project_key.clone());
        params.insert("startAt".to_string(), "0".to_string());
        params.insert("maxResults".to_string(), max_results.to_string());
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

struct JiraIterator {
    endpoint_id: String,
    dataset_id: String,
    issues: Vec<serde_json::Value>,
    cursor: usize,
}

#[async_trait]
impl RecordIterator for JiraIterator {
    async fn next(&mut self) -> UclResult<Option<RecordEnvelope>> {
        if self.cursor >= self.issues.len() {
            return Ok(None);
        }
        let issue = self.issues[self.cursor].clone();
        let key = issue
            .get("key")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        self.cursor += 1;

        Ok(Some(RecordEnvelope {
            record_kind: "raw".to_string(),
            entity_kind: "issue_tracker.issue".to_string(),
            source: EnvelopeSource {
                endpoint_id: self.endpoint_id.clone(),
                source_family: "issue_tracker".to_string(),
                source_id: self.dataset_id.clone(),
                url: None,
                external_id: key,
            },
            tenant_id: "default".to_string(),
            project_key: "JIRA".to_string(),
            observed_at: Utc::now(),
            payload: issue,
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
    fn missing_base_url_fails_closed() {
        let mut cfg = RawConfig::new();
        cfg.insert("project_key".to_string(), "ENG".to_string());
        let err = JiraConnector::from_config(&cfg).unwrap_err();
        assert_eq!(err.code, ucl_core::ErrorCode::EndpointUnreachable);
    }
}

//! # UCL CLI - Universal Connectivity Layer Control Surface
//!
//! Boots the connector registry, staging provider, sink endpoint, and
//! orchestration manager, then serves the external operation control
//! surface (§6) over HTTP: `StartOperation`/`GetOperation`/`CancelOperation`,
//! the action plane's `ListActions`/`ExecuteAction` (§4.9), plus a
//! Prometheus `/metrics` endpoint.
//!
//! ## Usage
//!
//! ```bash
//! # Serve the control surface on the default bind address
//! ucl-cli serve
//!
//! # Point at a TOML config file, overridden further by UCL_* env vars
//! ucl-cli serve --config ucl.toml --bind 0.0.0.0:8080
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Path as AxumPath, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use ucl_connectors::registry::{standard_registry, RawConfig};
use ucl_core::{ActionDescriptor, ActionResult, AppConfig, ErrorCode, ExecuteActionRequest, Operation, UclError};
use ucl_orchestrator::control::StartOperationRequest;
use ucl_orchestrator::{CheckpointStore, OperationStore};
use ucl_sink::SinkEndpoint;
use ucl_staging::StagingProvider;

/// Command-line arguments for the UCL control-plane process.
#[derive(Parser, Debug)]
#[command(name = "ucl-cli")]
#[command(about = "Universal Connectivity Layer control surface")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the `StartOperation`/`GetOperation`/`CancelOperation` HTTP API.
    Serve {
        /// Optional TOML config file, layered under program defaults and
        /// over by `UCL_*` environment variables.
        #[arg(long)]
        config: Option<String>,

        /// Address the HTTP control surface binds to.
        #[arg(long, default_value = "0.0.0.0:8080")]
        bind: SocketAddr,
    },
}

struct AppState {
    operations: Arc<OperationStore>,
    metrics: PrometheusHandle,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    match args.command {
        Command::Serve { config, bind } => serve(config.as_deref(), bind).await,
    }
}

async fn serve(config_path: Option<&str>, bind: SocketAddr) -> Result<()> {
    let config = AppConfig::load(config_path).context("loading configuration")?;
    let object_store_cfg = object_store_raw_config(&config);

    let registry = Arc::new(standard_registry());
    let staging_cfg = {
        let mut cfg = object_store_cfg.clone();
        cfg.insert("base_prefix".to_string(), config.staging_prefix.clone());
        cfg.insert("tenant_id".to_string(), config.tenant_id.clone());
        cfg
    };
    let sink_cfg = {
        let mut cfg = object_store_cfg.clone();
        cfg.insert("base_prefix".to_string(), config.sink_prefix.clone());
        cfg.insert("tenant_id".to_string(), config.tenant_id.clone());
        cfg
    };
    let staging = Arc::new(StagingProvider::new("ucl-staging", &staging_cfg).context("constructing staging provider")?);
    let sink = Arc::new(SinkEndpoint::new(&sink_cfg).context("constructing sink endpoint")?);
    let checkpoints = Arc::new(match &config.checkpoint_db_path {
        Some(path) => CheckpointStore::open(path).context("opening checkpoint store")?,
        None => CheckpointStore::open_temporary().context("opening temporary checkpoint store")?,
    });

    let operations = Arc::new(OperationStore::new(registry, staging, sink, checkpoints));

    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .context("installing prometheus recorder")?;

    let state = Arc::new(AppState { operations, metrics });

    let app = Router::new()
        .route("/operations", post(start_operation))
        .route("/operations/:id", get(get_operation))
        .route("/operations/:id/cancel", post(cancel_operation))
        .route("/connectors/:template_id/actions", get(list_actions))
        .route("/connectors/:template_id/actions/:action_id", post(execute_action))
        .route("/metrics", get(render_metrics))
        .with_state(state);

    tracing::info!(%bind, "ucl-cli control surface listening");
    let listener = tokio::net::TcpListener::bind(bind).await.context("binding control surface address")?;
    axum::serve(listener, app).await.context("serving control surface")?;
    Ok(())
}

fn object_store_raw_config(config: &AppConfig) -> RawConfig {
    let mut cfg = RawConfig::new();
    cfg.insert("bucket".to_string(), config.bucket.clone());
    cfg.insert("endpoint".to_string(), config.object_store_endpoint.clone());
    if !config.object_store_access_key.is_empty() {
        cfg.insert("access_key".to_string(), config.object_store_access_key.clone());
    }
    if !config.object_store_secret_key.is_empty() {
        cfg.insert("secret_key".to_string(), config.object_store_secret_key.clone());
    }
    cfg
}

#[derive(Debug, Deserialize)]
struct StartOperationBody {
    template_id: String,
    #[serde(default)]
    config: RawConfig,
    dataset_id: String,
    sink_id: String,
    #[serde(default)]
    run_id: Option<String>,
    load_date: String,
    #[serde(default)]
    schema: Option<serde_json::Value>,
    #[serde(default)]
    max_parallel_slices: Option<usize>,
}

#[derive(Debug, Serialize)]
struct StartOperationResponse {
    operation_id: String,
}

async fn start_operation(
    State(state): State<Arc<AppState>>,
    Json(body): Json<StartOperationBody>,
) -> Result<Json<StartOperationResponse>, ApiError> {
    let operation_id = state
        .operations
        .start_operation(StartOperationRequest {
            template_id: body.template_id,
            config: body.config,
            dataset_id: body.dataset_id,
            sink_id: body.sink_id,
            run_id: body.run_id,
            load_date: body.load_date,
            schema: body.schema,
            max_parallel_slices: body.max_parallel_slices,
        })
        .await?;
    Ok(Json(StartOperationResponse { operation_id }))
}

async fn get_operation(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<Operation>, ApiError> {
    let operation = state.operations.get_operation(&id).await?;
    Ok(Json(operation))
}

async fn cancel_operation(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
) -> Result<StatusCode, ApiError> {
    state.operations.cancel_operation(&id).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn list_actions(
    State(state): State<Arc<AppState>>,
    AxumPath(template_id): AxumPath<String>,
    axum::extract::Query(config): axum::extract::Query<RawConfig>,
) -> Result<Json<Vec<ActionDescriptor>>, ApiError> {
    let actions = state.operations.list_actions(&template_id, &config).await?;
    Ok(Json(actions))
}

#[derive(Debug, Deserialize)]
struct ExecuteActionBody {
    #[serde(default)]
    config: RawConfig,
    #[serde(default)]
    parameters: std::collections::HashMap<String, serde_json::Value>,
}

async fn execute_action(
    State(state): State<Arc<AppState>>,
    AxumPath((template_id, action_id)): AxumPath<(String, String)>,
    Json(body): Json<ExecuteActionBody>,
) -> Result<Json<ActionResult>, ApiError> {
    let result = state
        .operations
        .execute_action(&template_id, &body.config, ExecuteActionRequest { action_id, parameters: body.parameters })
        .await?;
    Ok(Json(result))
}

async fn render_metrics(State(state): State<Arc<AppState>>) -> String {
    state.metrics.render()
}

/// Maps `UclError` onto an HTTP response; `ObjectNotFound` against the
/// operation table becomes a 404, everything else a 400/500 split by
/// retryability (retryable == transient == 503).
struct ApiError(UclError);

impl From<UclError> for ApiError {
    fn from(err: UclError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.code {
            ErrorCode::ObjectNotFound => StatusCode::NOT_FOUND,
            _ if self.0.retryable() => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::BAD_REQUEST,
        };
        let body = Json(serde_json::json!({
            "code": self.0.code.as_str(),
            "message": self.0.message,
            "retryable": self.0.retryable(),
        }));
        (status, body).into_response()
    }
}

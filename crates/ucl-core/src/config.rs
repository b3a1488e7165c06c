//! Environment / configuration knobs (§6): staging endpoint, bucket,
//! base prefix, tenant id, and friends. Loaded once at process start the
//! way the teacher's CLI loads its `PipelineSpec`, except from layered
//! defaults + env instead of a single YAML file, since this spec's
//! configuration surface is runtime endpoint/run parameters rather than a
//! static pipeline DAG.

use serde::{Deserialize, Serialize};
use validator::Validate;

fn default_bucket() -> String {
    "ucl-staging".to_string()
}

fn default_staging_prefix() -> String {
    "staging".to_string()
}

fn default_sink_prefix() -> String {
    "sink".to_string()
}

fn default_tenant() -> String {
    "default".to_string()
}

fn default_object_store_endpoint() -> String {
    "http://localhost:9000".to_string()
}

fn default_large_run_threshold_bytes() -> u64 {
    64 * 1024 * 1024
}

fn default_max_parallel_slices() -> usize {
    4
}

/// Process-wide settings: object-store connection, path prefixes, tenant
/// scope, and orchestration defaults (§5, §6).
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AppConfig {
    #[serde(default = "default_object_store_endpoint")]
    #[validate(length(min = 1))]
    pub object_store_endpoint: String,

    #[serde(default)]
    pub object_store_access_key: String,

    #[serde(default)]
    pub object_store_secret_key: String,

    #[serde(default = "default_bucket")]
    #[validate(length(min = 1))]
    pub bucket: String,

    #[serde(default = "default_staging_prefix")]
    pub staging_prefix: String,

    #[serde(default = "default_sink_prefix")]
    pub sink_prefix: String,

    #[serde(default = "default_tenant")]
    #[validate(length(min = 1))]
    pub tenant_id: String,

    #[serde(default = "default_large_run_threshold_bytes")]
    pub large_run_threshold_bytes: u64,

    #[serde(default = "default_max_parallel_slices")]
    #[validate(range(min = 1, max = 256))]
    pub max_parallel_slices: usize,

    #[serde(default)]
    pub checkpoint_db_path: Option<String>,

    #[serde(default)]
    pub workflow_engine_address: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            object_store_endpoint: default_object_store_endpoint(),
            object_store_access_key: String::new(),
            object_store_secret_key: String::new(),
            bucket: default_bucket(),
            staging_prefix: default_staging_prefix(),
            sink_prefix: default_sink_prefix(),
            tenant_id: default_tenant(),
            large_run_threshold_bytes: default_large_run_threshold_bytes(),
            max_parallel_slices: default_max_parallel_slices(),
            checkpoint_db_path: None,
            workflow_engine_address: None,
        }
    }
}

impl AppConfig {
    /// Layers program defaults, an optional TOML file, then `UCL_*`
    /// environment variables, and validates the result — same
    /// defaults-then-override shape as the teacher's `config` crate usage
    /// in `bins/market-data`.
    pub fn load(config_path: Option<&str>) -> anyhow::Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&AppConfig::default())?);

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(config::Environment::with_prefix("UCL").separator("__"));

        let cfg: AppConfig = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }
}

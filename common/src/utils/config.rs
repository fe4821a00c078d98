use std::collections::HashMap;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Credentials for one publishing destination, looked up by a site's `credentials_ref`.
#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
pub struct SiteCredentials {
    pub username: String,
    pub application_password: String,
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    pub http_port: u16,
    /// Shared secret for the control API; the API refuses requests when unset.
    #[serde(default)]
    pub api_key: Option<String>,

    pub openai_api_key: String,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_primary_model")]
    pub primary_model: String,
    #[serde(default = "default_fallback_model")]
    pub fallback_model: String,
    #[serde(default = "default_primary_model")]
    pub vision_model: String,
    #[serde(default = "default_image_model")]
    pub image_model: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub llm_timeout_secs: u64,

    #[serde(default)]
    pub embedding_backend: Option<String>,
    #[serde(default)]
    pub embedding_model: Option<String>,
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: u32,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    #[serde(default)]
    pub pexels_api_key: Option<String>,
    #[serde(default)]
    pub unsplash_access_key: Option<String>,
    #[serde(default = "default_true")]
    pub image_generation_enabled: bool,

    #[serde(default)]
    pub site_credentials: HashMap<String, SiteCredentials>,

    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
    #[serde(default = "default_news_interval_secs")]
    pub news_poll_interval_secs: u64,
    #[serde(default = "default_evergreen_interval_secs")]
    pub evergreen_poll_interval_secs: u64,
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
    #[serde(default = "default_purge_interval_secs")]
    pub purge_interval_secs: u64,
    #[serde(default = "default_processing_timeout_mins")]
    pub processing_timeout_mins: i64,
    #[serde(default = "default_duplicate_retention_days")]
    pub duplicate_retention_days: i64,
    #[serde(default = "default_failed_retention_days")]
    pub failed_retention_days: i64,
    #[serde(default = "default_retry_ceiling")]
    pub retry_ceiling: u32,
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_primary_model() -> String {
    "google/gemini-flash-1.5".to_string()
}

fn default_fallback_model() -> String {
    "meta-llama/llama-3.1-70b-instruct".to_string()
}

fn default_image_model() -> String {
    "black-forest-labs/flux-schnell".to_string()
}

fn default_llm_timeout_secs() -> u64 {
    120
}

fn default_embedding_dimension() -> u32 {
    384
}

fn default_similarity_threshold() -> f32 {
    0.80
}

fn default_true() -> bool {
    true
}

fn default_worker_concurrency() -> usize {
    4
}

fn default_news_interval_secs() -> u64 {
    10 * 60
}

fn default_evergreen_interval_secs() -> u64 {
    24 * 60 * 60
}

fn default_reconcile_interval_secs() -> u64 {
    5 * 60
}

fn default_purge_interval_secs() -> u64 {
    24 * 60 * 60
}

fn default_processing_timeout_mins() -> i64 {
    30
}

fn default_duplicate_retention_days() -> i64 {
    30
}

fn default_failed_retention_days() -> i64 {
    7
}

fn default_retry_ceiling() -> u32 {
    3
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default().separator("__"))
        .build()?;

    config.try_deserialize()
}

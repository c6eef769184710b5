use serde::Deserialize;
use std::time::Duration;

use crate::services::policy::{self, DelayPolicy, PolicyError, RetryPolicy};
use crate::services::processor::ProcessorSettings;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Redis connection string for the job queue. Without it the server falls
    /// back to an in-process queue, which only the embedded worker can drain.
    pub redis_url: Option<String>,

    /// Name of the durable job queue
    #[serde(default = "default_queue_name")]
    pub queue_name: String,

    /// PostgreSQL connection string. When unset, results go to `results_path`.
    pub database_url: Option<String>,

    /// JSON file holding job results when no database is configured
    #[serde(default = "default_results_path")]
    pub results_path: String,

    /// Unsplash API access key
    pub unsplash_api_key: String,

    #[serde(default = "default_unsplash_base_url")]
    pub unsplash_base_url: String,

    /// Search query sent to the image provider
    #[serde(default = "default_image_query")]
    pub image_query: String,

    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,

    #[serde(default = "default_delay_min_secs")]
    pub delay_min_secs: u64,

    #[serde(default = "default_delay_max_secs")]
    pub delay_max_secs: u64,

    #[serde(default = "default_delay_step_secs")]
    pub delay_step_secs: u64,

    /// Delivery attempts before a failing job is dropped. Unset means retry
    /// forever.
    pub max_attempts: Option<u32>,

    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Return messages left in flight by a crashed worker when a worker starts
    #[serde(default = "default_true")]
    pub recover_in_flight: bool,

    /// Run a job processor inside the API server process
    #[serde(default = "default_true")]
    pub embedded_worker: bool,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_queue_name() -> String {
    "jobQueue".to_string()
}

fn default_results_path() -> String {
    "results.json".to_string()
}

fn default_unsplash_base_url() -> String {
    "https://api.unsplash.com".to_string()
}

fn default_image_query() -> String {
    "food".to_string()
}

fn default_provider_timeout_secs() -> u64 {
    30
}

fn default_delay_min_secs() -> u64 {
    5
}

fn default_delay_max_secs() -> u64 {
    300
}

fn default_delay_step_secs() -> u64 {
    5
}

fn default_worker_concurrency() -> usize {
    16
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn delay_policy(&self) -> Result<DelayPolicy, PolicyError> {
        DelayPolicy::new(
            Duration::from_secs(self.delay_min_secs),
            Duration::from_secs(self.delay_max_secs),
            Duration::from_secs(self.delay_step_secs),
        )
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy, PolicyError> {
        match self.max_attempts {
            Some(max) => RetryPolicy::bounded(max),
            None => Ok(RetryPolicy::unbounded()),
        }
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn processor_settings(&self) -> Result<ProcessorSettings, PolicyError> {
        Ok(ProcessorSettings {
            query: self.image_query.clone(),
            delay: self.delay_policy()?,
            retry: self.retry_policy()?,
            concurrency: policy::worker_concurrency(self.worker_concurrency)?,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        })
    }
}

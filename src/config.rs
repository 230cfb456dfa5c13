//! Operator configuration loaded from the environment

use std::time::Duration;

use envconfig::Envconfig;

use crate::error::{Error, Result};
use crate::key::ObjectKey;
use crate::queue::{BucketRateLimiter, ExponentialFailureRateLimiter, MaxOfRateLimiter};
use crate::reconcilers::IngressTemplate;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    /// Number of concurrent reconcile workers
    #[envconfig(from = "WORKERS", default = "5")]
    pub workers: usize,
    /// Consecutive failures tolerated before a key is dropped
    #[envconfig(from = "MAX_RETRIES", default = "10")]
    pub max_retries: u32,
    #[envconfig(from = "BACKOFF_BASE_MS", default = "5")]
    pub backoff_base_ms: u64,
    #[envconfig(from = "BACKOFF_MAX_SECS", default = "1000")]
    pub backoff_max_secs: u64,
    /// Overall requeue rate across all keys
    #[envconfig(from = "RATE_LIMIT_QPS", default = "10")]
    pub rate_limit_qps: f64,
    #[envconfig(from = "RATE_LIMIT_BURST", default = "100")]
    pub rate_limit_burst: u32,
    /// Pause before a crashed worker loop is started again
    #[envconfig(from = "WORKER_RESTART_SECS", default = "1")]
    pub worker_restart_secs: u64,
    #[envconfig(from = "METRICS_PORT", default = "8080")]
    pub metrics_port: u16,
    #[envconfig(from = "INGRESS_CLASS", default = "nginx")]
    pub ingress_class: String,
    #[envconfig(from = "INGRESS_HOST", default = "example.com")]
    pub ingress_host: String,
    /// Restrict watches to one namespace; all namespaces when unset
    #[envconfig(from = "WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,
    /// Either "json" (default) or "text"
    #[envconfig(from = "LOG_FORMAT")]
    pub log_format: Option<String>,
}

impl Config {
    /// Load and validate the configuration from environment variables
    pub fn load_from_env() -> Result<Self> {
        let config = Config::init_from_env().map_err(|e| Error::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the controller cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::config("WORKERS must be at least 1"));
        }
        if self.backoff_base_ms == 0 {
            return Err(Error::config("BACKOFF_BASE_MS must be at least 1"));
        }
        if Duration::from_millis(self.backoff_base_ms) > self.backoff_max() {
            return Err(Error::config(
                "BACKOFF_BASE_MS must not exceed BACKOFF_MAX_SECS",
            ));
        }
        if !(self.rate_limit_qps.is_finite() && self.rate_limit_qps > 0.0) {
            return Err(Error::config("RATE_LIMIT_QPS must be a positive number"));
        }
        if self.rate_limit_burst == 0 {
            return Err(Error::config("RATE_LIMIT_BURST must be at least 1"));
        }
        if self.ingress_class.is_empty() || self.ingress_host.is_empty() {
            return Err(Error::config(
                "INGRESS_CLASS and INGRESS_HOST must not be empty",
            ));
        }
        if let Some(format) = self.log_format.as_deref() {
            if !matches!(format, "json" | "text") {
                return Err(Error::config(format!(
                    "Invalid LOG_FORMAT '{}': must be one of: json, text",
                    format
                )));
            }
        }
        Ok(())
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs)
    }

    pub fn worker_restart_delay(&self) -> Duration {
        Duration::from_secs(self.worker_restart_secs)
    }

    /// The combined per-key and overall rate limiter used for retries
    pub fn rate_limiter(&self) -> MaxOfRateLimiter<ObjectKey> {
        MaxOfRateLimiter::new(vec![
            Box::new(ExponentialFailureRateLimiter::new(
                Duration::from_millis(self.backoff_base_ms),
                self.backoff_max(),
            )),
            Box::new(BucketRateLimiter::new(
                self.rate_limit_qps,
                self.rate_limit_burst,
            )),
        ])
    }

    pub fn ingress_template(&self) -> IngressTemplate {
        IngressTemplate {
            class_name: self.ingress_class.clone(),
            host: self.ingress_host.clone(),
            ..IngressTemplate::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: 5,
            max_retries: 10,
            backoff_base_ms: 5,
            backoff_max_secs: 1000,
            rate_limit_qps: 10.0,
            rate_limit_burst: 100,
            worker_restart_secs: 1,
            metrics_port: 8080,
            ingress_class: "nginx".to_string(),
            ingress_host: "example.com".to_string(),
            watch_namespace: None,
            log_format: None,
        }
    }
}

//! Configuration data structures for delayhttp.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files and
//! to `DELAYHTTP__*` environment variables. Every field has a default, so an
//! empty file (or no file at all) yields the stock relay: `127.0.0.1:3333`,
//! three workers and a queue of 1000 jobs.
use std::time::Duration;

use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};

/// What intake does when the job queue is full.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Wait for a free slot (backpressure on the caller)
    #[default]
    Block,
    /// Answer 503 immediately and count the job as rejected
    Reject,
}

/// What a worker does after a delivery fails at the transport level.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log the failure and take the next job
    #[default]
    Continue,
    /// Stop the worker for good; the pool shrinks by one
    Halt,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DispatchConfig {
    /// Number of concurrent delivery workers
    pub workers: usize,
    /// Maximum number of jobs waiting for a worker
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
    pub on_failure: FailurePolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            queue_capacity: 1000,
            overflow: OverflowPolicy::Block,
            on_failure: FailurePolicy::Continue,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct IntakeConfig {
    /// Largest inbound body accepted for deferred delivery
    pub max_body_bytes: usize,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Outbound client settings. Durations use humantime syntax (`"500ms"`, `"30s"`).
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct OutboundConfig {
    /// Upper bound for a single delivery attempt
    pub request_timeout: String,
    /// Retries after the first attempt
    pub max_retries: u32,
    pub retry_wait_min: String,
    pub retry_wait_max: String,
    pub pool_idle_timeout: String,
    pub pool_max_idle_per_host: usize,
    /// Sent when the captured request carries no User-Agent
    pub user_agent: Option<String>,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            request_timeout: "30s".to_string(),
            max_retries: 4,
            retry_wait_min: "1s".to_string(),
            retry_wait_max: "30s".to_string(),
            pool_idle_timeout: "90s".to_string(),
            pool_max_idle_per_host: 32,
            user_agent: Some(concat!("delayhttp/", env!("CARGO_PKG_VERSION")).to_string()),
        }
    }
}

impl OutboundConfig {
    pub fn request_timeout(&self) -> Result<Duration> {
        parse_duration("outbound.request_timeout", &self.request_timeout)
    }

    pub fn retry_wait_min(&self) -> Result<Duration> {
        parse_duration("outbound.retry_wait_min", &self.retry_wait_min)
    }

    pub fn retry_wait_max(&self) -> Result<Duration> {
        parse_duration("outbound.retry_wait_max", &self.retry_wait_max)
    }

    pub fn pool_idle_timeout(&self) -> Result<Duration> {
        parse_duration("outbound.pool_idle_timeout", &self.pool_idle_timeout)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `delayhttp=debug,hyper=warn`
    pub level: String,
    /// Emit JSON lines instead of human readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RelayConfig {
    pub bind: String,
    pub port: u16,
    /// How long workers may keep draining the queue after a shutdown signal
    pub shutdown_timeout: String,
    pub dispatch: DispatchConfig,
    pub intake: IntakeConfig,
    pub outbound: OutboundConfig,
    pub logging: LoggingConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 3333,
            shutdown_timeout: "30s".to_string(),
            dispatch: DispatchConfig::default(),
            intake: IntakeConfig::default(),
            outbound: OutboundConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl RelayConfig {
    /// `bind:port`, with IPv6 literals bracketed.
    pub fn listen_addr(&self) -> String {
        if self.bind.contains(':') && !self.bind.starts_with('[') {
            format!("[{}]:{}", self.bind, self.port)
        } else {
            format!("{}:{}", self.bind, self.port)
        }
    }

    pub fn shutdown_timeout(&self) -> Result<Duration> {
        parse_duration("shutdown_timeout", &self.shutdown_timeout)
    }
}

fn parse_duration(field: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value)
        .wrap_err_with(|| format!("Invalid duration for {field}: '{value}'"))
}

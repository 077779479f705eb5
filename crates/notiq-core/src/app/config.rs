//! Dispatcher configuration.
//!
//! Deserializable so the binary can load it from files and environment;
//! every field has a default.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::{DefaultDecider, HostId, RetryPolicy};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Lease owner name; `HOSTNAME` or a generated name when unset.
    pub host_id: Option<String>,
    pub poll_interval_ms: u64,
    pub lease_duration_ms: u64,
    pub batch_size: usize,
    pub worker_count: usize,
    /// Total attempts before a retryable failure is quarantined.
    pub max_retries: u32,
    pub retry: RetryConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            host_id: None,
            poll_interval_ms: 3_000,
            lease_duration_ms: 300_000,
            batch_size: 10,
            worker_count: 4,
            max_retries: 3,
            retry: RetryConfig::default(),
        }
    }
}

impl DispatcherConfig {
    /// The configured host, or a fresh per-process id from `HostId::from_env`.
    /// Call once per service instance.
    pub fn host_id(&self) -> HostId {
        match &self.host_id {
            Some(id) if !id.trim().is_empty() => HostId::new(id.clone()),
            _ => HostId::from_env(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_millis(self.lease_duration_ms)
    }

    /// At least one row per claim.
    pub fn batch_size(&self) -> usize {
        self.batch_size.max(1)
    }

    /// At least one worker.
    pub fn worker_count(&self) -> usize {
        self.worker_count.max(1)
    }

    pub fn decider(&self) -> DefaultDecider {
        DefaultDecider::new(self.retry.policy(), self.max_retries)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 2_000,
            multiplier: 2.0,
            max_delay_ms: 3_600_000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.base_delay_ms),
            self.multiplier,
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

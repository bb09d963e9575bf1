//! Deployment settings for the notification engine.
//!
//! Defaults are usable as-is; `from_env` overlays `NOTIFYFLOW_*` variables on
//! top of them. Malformed values are rejected rather than silently ignored.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use notifyflow_core::{FlowConfigId, WorkerId};

/// Backoff strategy for retries of a failed contact step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Exponential backoff: base * 2^(attempt-1)
    #[default]
    Exponential,
    /// Linear backoff: base * attempt
    Linear,
}

/// How often, and how far apart, a transient delivery failure is retried
/// before the schedule escalates to a manual call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries allowed per step (0 = escalate on the first transient failure)
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Upper bound for any single backoff
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5 * 60),
            max_delay: Duration::from_secs(6 * 60 * 60),
            strategy: BackoffStrategy::Exponential,
        }
    }
}

impl RetryPolicy {
    /// Escalate on the first transient failure.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            ..Default::default()
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
        }
    }

    /// Delay before retry number `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let delay_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Exponential => {
                let exp = 2_f64.powi(attempt.saturating_sub(1).min(62) as i32);
                (base_ms * exp).min(max_ms)
            }
            BackoffStrategy::Linear => (base_ms * attempt as f64).min(max_ms),
        };

        Duration::from_millis(delay_ms.max(0.0) as u64)
    }

    /// `attempt` failures so far; may another one be tried?
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Backoff as a calendar duration, for scheduling.
    pub fn backoff_for_attempt(&self, attempt: u32) -> chrono::Duration {
        chrono::Duration::from_std(self.delay_for_attempt(attempt)).unwrap_or_default()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid value for {var}: {reason}")]
pub struct SettingsError {
    pub var: &'static str,
    pub reason: String,
}

/// Settings for sweeps, delivery and enrolment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    pub retry: RetryPolicy,
    /// Upper bound for a single notifier call
    pub send_timeout: Duration,
    /// Notifier calls allowed to run at once per channel, timed-out ones
    /// included. A channel at the cap fails new sends as transient.
    pub max_in_flight_per_channel: usize,
    /// Most schedules processed by one sweep
    pub sweep_batch_limit: usize,
    /// Worker threads per sweep
    pub max_concurrent: usize,
    /// Age after which a claim is considered abandoned
    pub claim_ttl: Duration,
    pub worker_id: WorkerId,
    /// Flow used for contracts that do not name one
    pub default_flow_config_id: Option<FlowConfigId>,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            send_timeout: Duration::from_secs(10),
            max_in_flight_per_channel: 16,
            sweep_batch_limit: 500,
            max_concurrent: 4,
            claim_ttl: Duration::from_secs(15 * 60),
            worker_id: WorkerId::generate(),
            default_flow_config_id: None,
        }
    }
}

impl NotificationSettings {
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn with_max_in_flight_per_channel(mut self, max: usize) -> Self {
        self.max_in_flight_per_channel = max;
        self
    }

    pub fn with_sweep_batch_limit(mut self, limit: usize) -> Self {
        self.sweep_batch_limit = limit;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    pub fn with_claim_ttl(mut self, ttl: Duration) -> Self {
        self.claim_ttl = ttl;
        self
    }

    pub fn with_worker_id(mut self, worker_id: WorkerId) -> Self {
        self.worker_id = worker_id;
        self
    }

    pub fn with_default_flow(mut self, flow_config_id: FlowConfigId) -> Self {
        self.default_flow_config_id = Some(flow_config_id);
        self
    }

    /// Defaults overlaid with `NOTIFYFLOW_*` environment variables.
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();

        if let Some(v) = lookup("NOTIFYFLOW_MAX_RETRIES") {
            settings.retry.max_attempts = parse("NOTIFYFLOW_MAX_RETRIES", &v)?;
        }
        if let Some(v) = lookup("NOTIFYFLOW_SEND_TIMEOUT_SECS") {
            settings.send_timeout = Duration::from_secs(parse("NOTIFYFLOW_SEND_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = lookup("NOTIFYFLOW_MAX_IN_FLIGHT") {
            settings.max_in_flight_per_channel = parse("NOTIFYFLOW_MAX_IN_FLIGHT", &v)?;
        }
        if let Some(v) = lookup("NOTIFYFLOW_SWEEP_BATCH_LIMIT") {
            settings.sweep_batch_limit = parse("NOTIFYFLOW_SWEEP_BATCH_LIMIT", &v)?;
        }
        if let Some(v) = lookup("NOTIFYFLOW_MAX_CONCURRENT") {
            settings.max_concurrent = parse("NOTIFYFLOW_MAX_CONCURRENT", &v)?;
        }
        if let Some(v) = lookup("NOTIFYFLOW_CLAIM_TTL_SECS") {
            settings.claim_ttl = Duration::from_secs(parse("NOTIFYFLOW_CLAIM_TTL_SECS", &v)?);
        }
        if let Some(v) = lookup("NOTIFYFLOW_WORKER_ID") {
            if v.trim().is_empty() {
                return Err(SettingsError {
                    var: "NOTIFYFLOW_WORKER_ID",
                    reason: "must not be blank".into(),
                });
            }
            settings.worker_id = WorkerId::new(v.trim());
        }
        if let Some(v) = lookup("NOTIFYFLOW_DEFAULT_FLOW") {
            settings.default_flow_config_id = Some(parse("NOTIFYFLOW_DEFAULT_FLOW", &v)?);
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.max_concurrent == 0 {
            return Err(SettingsError {
                var: "NOTIFYFLOW_MAX_CONCURRENT",
                reason: "must be at least 1".into(),
            });
        }
        if self.send_timeout.is_zero() {
            return Err(SettingsError {
                var: "NOTIFYFLOW_SEND_TIMEOUT_SECS",
                reason: "must be positive".into(),
            });
        }
        if self.max_in_flight_per_channel == 0 {
            return Err(SettingsError {
                var: "NOTIFYFLOW_MAX_IN_FLIGHT",
                reason: "must be at least 1".into(),
            });
        }
        // A claim must outlive the send made under it, or a second worker
        // can take the schedule while the first is still delivering.
        if self.claim_ttl <= self.send_timeout {
            return Err(SettingsError {
                var: "NOTIFYFLOW_CLAIM_TTL_SECS",
                reason: format!(
                    "must be longer than the send timeout ({}s)",
                    self.send_timeout.as_secs()
                ),
            });
        }
        Ok(())
    }

    pub(crate) fn claim_ttl_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.claim_ttl).unwrap_or_default()
    }
}

fn parse<T>(var: &'static str, value: &str) -> Result<T, SettingsError>
where
    T: core::str::FromStr,
    T::Err: core::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| SettingsError {
        var,
        reason: e.to_string(),
    })
}

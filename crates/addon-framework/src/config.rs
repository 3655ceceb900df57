//! Addon options and container tuning.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AddonError, AddonResult};

/// How the registry treats callback names that are not snake_case.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamingPolicy {
    /// `getWorld` is registered as `get_world`.
    #[default]
    Decamelize,
    /// Non snake_case names are refused with `InvalidArgument`.
    Reject,
}

/// Which dependencies the lock coordinator probes after a failed pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockRetryPolicy {
    /// Every rule is probed again, from the first one.
    #[default]
    RetryAll,
    /// Rules already seen ready during the current wait are not probed again.
    FailingOnly,
}

/// Timing and policy knobs of the container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddonConfig {
    /// Tick of the scheduler loop.
    pub main_interval_ms: u64,
    /// Default deadline of a message round-trip.
    pub message_timeout_ms: u64,
    /// First delay of the lock backoff.
    pub lock_initial_delay_ms: u64,
    /// Growth factor of the lock backoff.
    pub lock_backoff_factor: f64,
    /// Ceiling of the lock backoff.
    pub max_sleep_time_ms: u64,
    pub naming_policy: NamingPolicy,
    pub lock_retry_policy: LockRetryPolicy,
}

impl Default for AddonConfig {
    fn default() -> Self {
        Self {
            main_interval_ms: 500,
            message_timeout_ms: 5000,
            lock_initial_delay_ms: 500,
            lock_backoff_factor: 1.5,
            max_sleep_time_ms: 5000,
            naming_policy: NamingPolicy::default(),
            lock_retry_policy: LockRetryPolicy::default(),
        }
    }
}

impl AddonConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> AddonResult<()> {
        if self.main_interval_ms == 0 {
            return Err(invalid("main_interval_ms must be greater than 0"));
        }
        if self.message_timeout_ms == 0 {
            return Err(invalid("message_timeout_ms must be greater than 0"));
        }
        if self.lock_initial_delay_ms == 0 {
            return Err(invalid("lock_initial_delay_ms must be greater than 0"));
        }
        if self.lock_backoff_factor.is_nan() || self.lock_backoff_factor < 1.0 {
            return Err(invalid("lock_backoff_factor must be at least 1.0"));
        }
        if self.max_sleep_time_ms < self.lock_initial_delay_ms {
            return Err(invalid(
                "max_sleep_time_ms must be greater or equal to lock_initial_delay_ms",
            ));
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate it. Missing fields take their
    /// default value.
    pub fn from_json_str(input: &str) -> AddonResult<Self> {
        let cfg: AddonConfig = serde_json::from_str(input)
            .map_err(|e| AddonError::InvalidArgument(format!("config parse error: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn main_interval(&self) -> Duration {
        Duration::from_millis(self.main_interval_ms)
    }

    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout_ms)
    }
}

/// Descriptive options of an addon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddonOptions {
    pub version: String,
    pub verbose: bool,
    pub description: String,
}

impl Default for AddonOptions {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            verbose: false,
            description: String::new(),
        }
    }
}

impl AddonOptions {
    pub fn validate(&self) -> AddonResult<()> {
        let parts: Vec<&str> = self.version.split('.').collect();
        let numeric = parts.len() == 3
            && parts
                .iter()
                .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
        if !numeric {
            return Err(invalid(format!(
                "version '{}' must be formatted as MAJOR.MINOR.PATCH",
                self.version
            )));
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> AddonError {
    AddonError::InvalidArgument(msg.into())
}

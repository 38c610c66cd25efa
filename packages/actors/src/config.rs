//! Worker pool configuration.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid pool config: {0}")]
    Invalid(String),
}

/// Settings for one worker pool process.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of workers in this process.
    pub concurrency: usize,
    /// How often an idle worker polls the queue.
    pub poll_interval: Duration,
    /// How long a claimed job stays owned without a renewal.
    pub lease: Duration,
    /// How often a busy worker renews its lease.
    pub heartbeat_interval: Duration,
    /// How often expired leases and stale workers are reaped.
    pub reap_interval: Duration,
    /// Workers silent for longer than this are removed from the registry.
    pub stale_after: Duration,
    /// Prefix of generated worker names.
    pub name_prefix: String,
    /// Host name recorded in the worker registry.
    pub host: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            poll_interval: Duration::from_millis(500),
            lease: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(15),
            reap_interval: Duration::from_secs(30),
            stale_after: Duration::from_secs(180),
            name_prefix: "worker".to_string(),
            host: local_host(),
        }
    }
}

impl PoolConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }

    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    /// Build a config from environment variables.
    ///
    /// - `WORKER_CONCURRENCY` (default: 1)
    /// - `WORKER_POLL_MS` (default: 500)
    /// - `WORKER_LEASE_SECS` (default: 60)
    /// - `WORKER_HEARTBEAT_SECS` (default: 15)
    /// - `WORKER_REAP_SECS` (default: 30)
    /// - `WORKER_STALE_SECS` (default: three leases)
    /// - `WORKER_NAME_PREFIX` (default: `worker`)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let lease = parse_u64_env("WORKER_LEASE_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.lease);
        let heartbeat_interval = parse_u64_env("WORKER_HEARTBEAT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.heartbeat_interval);

        if heartbeat_interval >= lease {
            return Err(ConfigError::Invalid(format!(
                "WORKER_HEARTBEAT_SECS ({}) must be shorter than WORKER_LEASE_SECS ({})",
                heartbeat_interval.as_secs(),
                lease.as_secs()
            )));
        }

        let concurrency = match parse_u64_env("WORKER_CONCURRENCY")? {
            Some(0) => {
                return Err(ConfigError::Invalid(
                    "WORKER_CONCURRENCY must be at least 1".into(),
                ));
            }
            Some(n) => usize::try_from(n)
                .map_err(|_| ConfigError::Invalid(format!("WORKER_CONCURRENCY={n} is too large")))?,
            None => defaults.concurrency,
        };

        Ok(Self {
            concurrency,
            poll_interval: parse_u64_env("WORKER_POLL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            lease,
            heartbeat_interval,
            reap_interval: parse_u64_env("WORKER_REAP_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.reap_interval),
            stale_after: parse_u64_env("WORKER_STALE_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(lease * 3),
            name_prefix: std::env::var("WORKER_NAME_PREFIX")
                .ok()
                .and_then(non_empty)
                .unwrap_or(defaults.name_prefix),
            host: defaults.host,
        })
    }

    /// Name of the `index`th worker of this process. Host and pid keep
    /// names unique across processes sharing one store.
    pub fn worker_name(&self, index: usize) -> String {
        format!(
            "{}-{}-{}-{}",
            self.name_prefix,
            self.host,
            std::process::id(),
            index
        )
    }
}

fn local_host() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .and_then(non_empty)
        .unwrap_or_else(|| "localhost".to_string())
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_u64_env(var_name: &str) -> Result<Option<u64>, ConfigError> {
    let Some(v) = std::env::var(var_name).ok().and_then(non_empty) else {
        return Ok(None);
    };

    v.parse::<u64>()
        .map(Some)
        .map_err(|_| ConfigError::Invalid(format!("invalid number for {var_name}={v}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_names_are_distinct_per_index() {
        let config = PoolConfig::default().with_name_prefix("gpu");
        let a = config.worker_name(0);
        let b = config.worker_name(1);
        assert_ne!(a, b);
        assert!(a.starts_with("gpu-"));
        assert!(a.ends_with("-0"));
    }

    #[test]
    fn concurrency_is_at_least_one() {
        assert_eq!(PoolConfig::default().with_concurrency(0).concurrency, 1);
    }
}

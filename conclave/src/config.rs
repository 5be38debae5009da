use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Top-level configuration for a conclave process.
///
/// Every section has a usable default, so `ConclaveConfig::default()` is a
/// complete configuration. [`ConclaveConfig::from_env`] overlays `CONCLAVE_*`
/// environment variables on top of it.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConclaveConfig {
    pub fanout: FanOutConfig,
    pub compiler: CompilerConfig,
    pub executor: ExecutorConfig,
    pub events: EventConfig,
    pub http: HttpConfig,
}

/// Fan-out worker settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FanOutConfig {
    /// Per-worker invocation timeout, in milliseconds.
    pub worker_timeout_ms: u64,
}

impl FanOutConfig {
    pub fn worker_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_timeout_ms)
    }

    pub fn with_worker_timeout(mut self, ms: u64) -> Self {
        self.worker_timeout_ms = ms;
        self
    }
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self {
            worker_timeout_ms: 60_000,
        }
    }
}

/// Result compiler settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Allowed distance, in percentage points, between the sum of synthesized
    /// probability estimates and 100.
    pub probability_tolerance: f64,
}

impl CompilerConfig {
    pub fn with_probability_tolerance(mut self, tolerance: f64) -> Self {
        self.probability_tolerance = tolerance;
        self
    }
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            probability_tolerance: 2.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// How long shutdown waits for running job bodies, in milliseconds.
    pub drain_timeout_ms: u64,
}

impl ExecutorConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn with_drain_timeout(mut self, ms: u64) -> Self {
        self.drain_timeout_ms = ms;
        self
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            drain_timeout_ms: 30_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    /// Broadcast buffer size. Slow subscribers lag past this many events.
    pub capacity: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind_addr: SocketAddr,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
        }
    }
}

impl ConclaveConfig {
    /// Build a configuration from the process environment.
    ///
    /// Loads a `.env` file when one is present, then reads:
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `CONCLAVE_WORKER_TIMEOUT_MS` | `fanout.worker_timeout_ms` |
    /// | `CONCLAVE_PROBABILITY_TOLERANCE` | `compiler.probability_tolerance` |
    /// | `CONCLAVE_DRAIN_TIMEOUT_MS` | `executor.drain_timeout_ms` |
    /// | `CONCLAVE_EVENT_CAPACITY` | `events.capacity` |
    /// | `CONCLAVE_BIND_ADDR` | `http.bind_addr` |
    ///
    /// Unset variables keep their defaults; unparsable ones are an error.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("CONCLAVE_WORKER_TIMEOUT_MS") {
            config.fanout.worker_timeout_ms = raw
                .trim()
                .parse()
                .with_context(|| format!("invalid CONCLAVE_WORKER_TIMEOUT_MS: {raw:?}"))?;
        }
        if let Some(raw) = lookup("CONCLAVE_PROBABILITY_TOLERANCE") {
            config.compiler.probability_tolerance = raw
                .trim()
                .parse()
                .with_context(|| format!("invalid CONCLAVE_PROBABILITY_TOLERANCE: {raw:?}"))?;
        }
        if let Some(raw) = lookup("CONCLAVE_DRAIN_TIMEOUT_MS") {
            config.executor.drain_timeout_ms = raw
                .trim()
                .parse()
                .with_context(|| format!("invalid CONCLAVE_DRAIN_TIMEOUT_MS: {raw:?}"))?;
        }
        if let Some(raw) = lookup("CONCLAVE_EVENT_CAPACITY") {
            config.events.capacity = raw
                .trim()
                .parse()
                .with_context(|| format!("invalid CONCLAVE_EVENT_CAPACITY: {raw:?}"))?;
        }
        if let Some(raw) = lookup("CONCLAVE_BIND_ADDR") {
            config.http.bind_addr = raw
                .trim()
                .parse()
                .with_context(|| format!("invalid CONCLAVE_BIND_ADDR: {raw:?}"))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.fanout.worker_timeout_ms == 0 {
            anyhow::bail!("fanout.worker_timeout_ms must be greater than zero");
        }
        if self.events.capacity == 0 {
            anyhow::bail!("events.capacity must be greater than zero");
        }
        if !self.compiler.probability_tolerance.is_finite()
            || self.compiler.probability_tolerance < 0.0
        {
            anyhow::bail!("compiler.probability_tolerance must be a non-negative number");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = ConclaveConfig::default();
        assert_eq!(config.fanout.worker_timeout(), Duration::from_secs(60));
        assert_eq!(config.compiler.probability_tolerance, 2.0);
        assert_eq!(config.events.capacity, 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides_apply() {
        let config = ConclaveConfig::from_lookup(lookup(&[
            ("CONCLAVE_WORKER_TIMEOUT_MS", "250"),
            ("CONCLAVE_PROBABILITY_TOLERANCE", "0.5"),
            ("CONCLAVE_BIND_ADDR", "0.0.0.0:9000"),
        ]))
        .unwrap();

        assert_eq!(config.fanout.worker_timeout_ms, 250);
        assert_eq!(config.compiler.probability_tolerance, 0.5);
        assert_eq!(config.http.bind_addr.port(), 9000);
        assert_eq!(config.executor.drain_timeout_ms, 30_000);
    }

    #[test]
    fn unparsable_value_names_the_variable() {
        let err = ConclaveConfig::from_lookup(lookup(&[("CONCLAVE_EVENT_CAPACITY", "lots")]))
            .unwrap_err();
        assert!(format!("{err:#}").contains("CONCLAVE_EVENT_CAPACITY"));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        assert!(
            ConclaveConfig::from_lookup(lookup(&[("CONCLAVE_WORKER_TIMEOUT_MS", "0")])).is_err()
        );
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: ConclaveConfig =
            serde_json::from_str(r#"{"fanout":{"worker_timeout_ms":5}}"#).unwrap();
        assert_eq!(config.fanout.worker_timeout_ms, 5);
        assert_eq!(config.events.capacity, 1024);
    }
}

//! Config - エンジン設定（TOML から読み込み）
//!
//! 全フィールドにデフォルトがあるので、空の文書も有効な設定です。

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {field} {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HeraldConfig {
    pub producer: ProducerConfig,
    pub dispatch: DispatchConfig,
    pub retry: RetryConfig,
    pub scheduler: SchedulerConfig,
    pub breaker: BreakerConfig,
}

/// Admission limits and the retry budget stamped on admitted messages.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    pub max_batch_size: usize,
    pub max_retries: u32,
    /// Store calls per admission before a transient error reaches the caller.
    pub admission_attempts: u32,
    /// Attempt `n` waits `n * admission_retry_delay_ms` before the next one.
    pub admission_retry_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub workers: usize,
    /// Sleep when every lane is empty.
    pub idle_interval_ms: u64,
    pub send_timeout_ms: u64,
    pub shutdown_timeout_ms: u64,
    pub lane_selection: LaneSelection,
}

/// How an idle worker picks the next lane to pop from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum LaneSelection {
    /// Always high, then normal, then low.
    #[default]
    Strict,

    /// Weighted round-robin over lanes; the first choice rotates so that lower
    /// lanes are visited even under a sustained high-priority burst.
    Weighted { high: u32, normal: u32, low: u32 },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_factor: f64,
    pub inline_retry_max_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub interval_ms: u64,
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub window_ms: u64,
    pub min_requests: u32,
    pub failure_ratio: f64,
    pub reset_timeout_ms: u64,
    pub half_open_max_probes: u32,
    pub success_threshold: u32,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 1000,
            max_retries: 3,
            admission_attempts: 3,
            admission_retry_delay_ms: 100,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            idle_interval_ms: 100,
            send_timeout_ms: 5_000,
            shutdown_timeout_ms: 30_000,
            lane_selection: LaneSelection::Strict,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter_factor: 0.0,
            inline_retry_max_delay_ms: 0,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { interval_ms: 1_000 }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window_ms: 60_000,
            min_requests: 10,
            failure_ratio: 0.6,
            reset_timeout_ms: 30_000,
            half_open_max_probes: 1,
            success_threshold: 1,
        }
    }
}

impl ProducerConfig {
    pub fn admission_retry_delay(&self) -> Duration {
        Duration::from_millis(self.admission_retry_delay_ms)
    }
}

impl DispatchConfig {
    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl HeraldConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: HeraldConfig = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&input)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.producer;
        if p.max_batch_size == 0 {
            return Err(ConfigError::invalid("producer.max_batch_size", "must be > 0"));
        }
        if p.max_retries == 0 {
            return Err(ConfigError::invalid("producer.max_retries", "must be > 0"));
        }
        if p.admission_attempts == 0 {
            return Err(ConfigError::invalid("producer.admission_attempts", "must be > 0"));
        }

        let d = &self.dispatch;
        if d.workers == 0 {
            return Err(ConfigError::invalid("dispatch.workers", "must be > 0"));
        }
        if d.idle_interval_ms == 0 {
            return Err(ConfigError::invalid("dispatch.idle_interval_ms", "must be > 0"));
        }
        if d.send_timeout_ms == 0 {
            return Err(ConfigError::invalid("dispatch.send_timeout_ms", "must be > 0"));
        }
        if let LaneSelection::Weighted { high, normal, low } = d.lane_selection
            && high.saturating_add(normal).saturating_add(low) == 0
        {
            return Err(ConfigError::invalid(
                "dispatch.lane_selection",
                "weighted selection needs at least one non-zero weight",
            ));
        }

        let r = &self.retry;
        if r.base_delay_ms == 0 {
            return Err(ConfigError::invalid("retry.base_delay_ms", "must be > 0"));
        }
        if r.max_delay_ms < r.base_delay_ms {
            return Err(ConfigError::invalid(
                "retry.max_delay_ms",
                format!("must be >= base_delay_ms ({})", r.base_delay_ms),
            ));
        }
        if !(0.0..1.0).contains(&r.jitter_factor) {
            return Err(ConfigError::invalid("retry.jitter_factor", "must be in [0.0, 1.0)"));
        }

        if self.scheduler.interval_ms == 0 {
            return Err(ConfigError::invalid("scheduler.interval_ms", "must be > 0"));
        }

        let b = &self.breaker;
        if b.failure_threshold == 0 {
            return Err(ConfigError::invalid("breaker.failure_threshold", "must be > 0"));
        }
        if !(b.failure_ratio > 0.0 && b.failure_ratio <= 1.0) {
            return Err(ConfigError::invalid("breaker.failure_ratio", "must be in (0.0, 1.0]"));
        }
        if b.half_open_max_probes == 0 {
            return Err(ConfigError::invalid("breaker.half_open_max_probes", "must be > 0"));
        }
        if b.success_threshold == 0 {
            return Err(ConfigError::invalid("breaker.success_threshold", "must be > 0"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = HeraldConfig::default();
        assert_eq!(config.producer.max_batch_size, 1000);
        assert_eq!(config.producer.max_retries, 3);
        assert_eq!(config.dispatch.workers, 4);
        assert_eq!(config.dispatch.idle_interval_ms, 100);
        assert_eq!(config.dispatch.send_timeout_ms, 5_000);
        assert_eq!(config.dispatch.lane_selection, LaneSelection::Strict);
        assert_eq!(config.retry.base_delay_ms, 1_000);
        assert_eq!(config.scheduler.interval_ms, 1_000);
        assert_eq!(config.breaker.failure_threshold, 5);
        config.validate().unwrap();
    }

    #[test]
    fn toml_parsing_empty_uses_defaults() {
        let config = HeraldConfig::from_toml_str("").unwrap();
        assert_eq!(config.producer.max_batch_size, 1000);
        assert_eq!(config.retry.max_delay_ms, 30_000);
    }

    #[test]
    fn toml_parsing_with_overrides() {
        let config = HeraldConfig::from_toml_str(
            r#"
            [producer]
            max_batch_size = 50

            [dispatch]
            workers = 1
            send_timeout_ms = 250

            [dispatch.lane_selection]
            mode = "weighted"
            high = 6
            normal = 3
            low = 1

            [retry]
            base_delay_ms = 10
            max_delay_ms = 100
        "#,
        )
        .unwrap();

        assert_eq!(config.producer.max_batch_size, 50);
        // untouched fields keep their defaults
        assert_eq!(config.producer.max_retries, 3);
        assert_eq!(config.dispatch.workers, 1);
        assert_eq!(config.dispatch.send_timeout(), Duration::from_millis(250));
        assert_eq!(
            config.dispatch.lane_selection,
            LaneSelection::Weighted {
                high: 6,
                normal: 3,
                low: 1
            }
        );
        assert_eq!(config.retry.base_delay_ms, 10);
    }

    #[test]
    fn rejects_invalid_values() {
        let err = HeraldConfig::from_toml_str("[dispatch]\nworkers = 0").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "dispatch.workers",
                ..
            }
        ));

        let err = HeraldConfig::from_toml_str("[retry]\nbase_delay_ms = 500\nmax_delay_ms = 100")
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "retry.max_delay_ms",
                ..
            }
        ));

        let err = HeraldConfig::from_toml_str(
            "[dispatch.lane_selection]\nmode = \"weighted\"\nhigh = 0\nnormal = 0\nlow = 0",
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "dispatch.lane_selection",
                ..
            }
        ));
    }

    #[test]
    fn rejects_malformed_toml() {
        let err = HeraldConfig::from_toml_str("[producer\nmax_batch_size = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = HeraldConfig::load("/nonexistent/herald.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}

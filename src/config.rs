// src/config.rs
use crate::error::AppError;
use crate::notifier::push::VapidKey;
use crate::processor::aggregator::AggregatorConfig;
use crate::processor::timeframe::{parse_timeframes, Timeframe};
use crate::processor::worker::WorkerConfig;
use config::{Config, Environment, File};
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "PRICE_ALERT";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub aggregation: AggregationConfig,
    pub alerts: AlertsConfig,
    pub retention: RetentionConfig,
    pub push: PushConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

/// Without a URL the engine keeps everything in memory.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: Option<String>,
    pub key_prefix: String,
    pub lock_ttl_seconds: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            key_prefix: "price-alert".to_string(),
            lock_ttl_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    pub interval_seconds: u64,
    pub default_window_count: i64,
    #[serde(deserialize_with = "list_or_csv")]
    pub timeframes: Vec<String>,
    /// 0 means one per CPU.
    pub concurrency: usize,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 60,
            default_window_count: 100,
            timeframes: Timeframe::ALL.iter().map(|tf| tf.as_str().to_string()).collect(),
            concurrency: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    pub reactivation_interval_seconds: u64,
    pub notification_queue_capacity: usize,
    pub max_clock_skew_ms: i64,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            reactivation_interval_seconds: 5,
            notification_queue_capacity: 1024,
            max_clock_skew_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub interval_seconds: u64,
    pub tick_hours: u64,
    pub subscription_days: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 600,
            tick_hours: 24,
            subscription_days: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    pub request_timeout_seconds: u64,
    pub ttl_seconds: u64,
    /// PEM encoded P-256 private key used to sign VAPID tokens. Unsigned when absent.
    pub vapid_private_key_file: Option<PathBuf>,
    pub vapid_subject: String,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: 10,
            ttl_seconds: 86_400,
            vapid_private_key_file: None,
            vapid_subject: "mailto:alerts@example.com".to_string(),
        }
    }
}

impl PushConfig {
    pub fn vapid_key(&self) -> Result<Option<VapidKey>, AppError> {
        self.vapid_private_key_file
            .as_deref()
            .map(|path| VapidKey::from_pem_file(path, self.vapid_subject.clone()))
            .transpose()
    }
}

/// Accepts `["1m", "5m"]` from files and `"1m,5m"` from the environment.
fn list_or_csv<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ListOrCsv {
        List(Vec<String>),
        Csv(String),
    }

    Ok(match ListOrCsv::deserialize(deserializer)? {
        ListOrCsv::List(items) => items,
        ListOrCsv::Csv(raw) => raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
    })
}

impl AppConfig {
    /// Layers an optional config file under `PRICE_ALERT__SECTION__KEY` variables.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let mut builder = Config::builder();

        builder = match path {
            Some(path) => builder.add_source(File::from(path).required(true)),
            None => builder.add_source(File::with_name("config").required(false)),
        };

        let config: AppConfig = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.aggregation.interval_seconds == 0
            || self.alerts.reactivation_interval_seconds == 0
            || self.retention.interval_seconds == 0
        {
            return Err(AppError::Config("intervals must be at least one second".into()));
        }
        if self.aggregation.default_window_count <= 0 {
            return Err(AppError::Config("aggregation.default_window_count must be positive".into()));
        }
        if !self.push.vapid_subject.starts_with("mailto:") && !self.push.vapid_subject.starts_with("https://") {
            return Err(AppError::Config("push.vapid_subject must be a mailto: or https: URL".into()));
        }
        if self.alerts.max_clock_skew_ms < 0 {
            return Err(AppError::Config("alerts.max_clock_skew_ms must not be negative".into()));
        }
        parse_timeframes(&self.aggregation.timeframes)?;
        Ok(())
    }

    pub fn aggregator_config(&self) -> Result<AggregatorConfig, AppError> {
        Ok(AggregatorConfig {
            timeframes: parse_timeframes(&self.aggregation.timeframes)?,
            default_window_count: self.aggregation.default_window_count,
            late_tick_allowance_ms: self.alerts.max_clock_skew_ms,
            concurrency: match self.aggregation.concurrency {
                0 => num_cpus::get(),
                n => n,
            },
        })
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            aggregation_interval: Duration::from_secs(self.aggregation.interval_seconds),
            reactivation_interval: Duration::from_secs(self.alerts.reactivation_interval_seconds),
            retention_interval: Duration::from_secs(self.retention.interval_seconds),
            tick_retention: Duration::from_secs(self.retention.tick_hours * 3600),
            subscription_retention: Duration::from_secs(self.retention.subscription_days * 24 * 3600),
            lock_ttl: Duration::from_secs(self.redis.lock_ttl_seconds),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.database.url.is_none());
        assert_eq!(config.aggregator_config().unwrap().timeframes, Timeframe::ALL.to_vec());
        assert_eq!(config.worker_config().reactivation_interval, Duration::from_secs(5));
    }

    #[test]
    fn comma_separated_timeframes_are_accepted() {
        let config: AppConfig = serde_json::from_str(r#"{"aggregation": {"timeframes": "1m, 1h"}}"#).unwrap();
        assert_eq!(
            config.aggregator_config().unwrap().timeframes,
            vec![Timeframe::M1, Timeframe::H1]
        );
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn unknown_timeframe_is_a_config_error() {
        let mut config = AppConfig::default();
        config.aggregation.timeframes = vec!["7m".into()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_interval_is_rejected() {
        let mut config = AppConfig::default();
        config.aggregation.interval_seconds = 0;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn vapid_settings_come_from_the_push_section() {
        let config: AppConfig = serde_json::from_str(
            r#"{"push": {"vapid_private_key_file": "/nonexistent/vapid.pem", "vapid_subject": "https://alerts.example.com"}}"#,
        )
        .unwrap();
        assert!(config.validate().is_ok());
        assert!(matches!(config.push.vapid_key(), Err(AppError::Config(_))));

        assert!(AppConfig::default().push.vapid_key().unwrap().is_none());

        let mut bad = AppConfig::default();
        bad.push.vapid_subject = "alerts@example.com".into();
        assert!(bad.validate().is_err());
    }
}

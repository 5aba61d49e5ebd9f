use crate::classifier::ClassifierConfig;
use crate::pipeline::PipelineConfig;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// File replay settings, present when both CSV paths are configured
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayConfig {
    pub accelerometer_path: PathBuf,
    pub gps_path: PathBuf,
    /// Delay between replayed samples in milliseconds
    pub delay_ms: u64,
    pub loop_playback: bool,
}

/// Hub configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Port to listen on
    pub port: u16,
    /// Bind address (0.0.0.0 for LAN, 127.0.0.1 for localhost)
    pub bind_addr: String,
    /// PostgreSQL database URL; records are kept in memory when unset
    pub database_url: Option<String>,
    /// Records per batch
    pub batch_size: usize,
    /// Resting accelerometer z reading
    pub road_baseline: f64,
    /// Allowed deviation from the baseline before a reading is an anomaly
    pub road_tolerance: f64,
    /// Idle time before a partial batch is flushed (0 = never)
    pub flush_interval_ms: u64,
    /// Bound on a single subscriber send
    pub send_timeout_ms: u64,
    /// Bound on writing one batch to the store
    pub persist_timeout_ms: u64,
    /// Batches queued per subscriber before sends start waiting
    pub subscriber_queue_depth: usize,
    pub max_subscribers: usize,
    pub replay: Option<ReplayConfig>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            bind_addr: "0.0.0.0".to_string(),
            database_url: None,
            batch_size: 10,
            road_baseline: 16541.0,
            road_tolerance: 1500.0,
            flush_interval_ms: 5000,
            send_timeout_ms: 500,
            persist_timeout_ms: 5000,
            subscriber_queue_depth: 32,
            max_subscribers: 1000,
            replay: None,
        }
    }
}

impl HubConfig {
    /// Load configuration from environment variables (and `.env` if present)
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let replay = match (
            lookup("REPLAY_ACCELEROMETER_PATH"),
            lookup("REPLAY_GPS_PATH"),
        ) {
            (Some(accel), Some(gps)) => Some(ReplayConfig {
                accelerometer_path: PathBuf::from(accel),
                gps_path: PathBuf::from(gps),
                delay_ms: parse_or(&lookup, "REPLAY_DELAY_MS", 100)?,
                loop_playback: parse_bool(&lookup, "REPLAY_LOOP", false),
            }),
            (None, None) => None,
            _ => {
                return Err(ConfigError::InvalidValue(
                    "REPLAY_ACCELEROMETER_PATH and REPLAY_GPS_PATH must be set together"
                        .to_string(),
                ))
            }
        };

        let config = Self {
            port: lookup("ROADWATCH_PORT")
                .map(|v| v.parse().map_err(|_| ConfigError::InvalidPort))
                .transpose()?
                .unwrap_or(defaults.port),
            bind_addr: lookup("ROADWATCH_BIND_ADDR").unwrap_or(defaults.bind_addr),
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            batch_size: parse_or(&lookup, "BATCH_SIZE", defaults.batch_size)?,
            road_baseline: parse_or(&lookup, "ROAD_BASELINE", defaults.road_baseline)?,
            road_tolerance: parse_or(&lookup, "ROAD_TOLERANCE", defaults.road_tolerance)?,
            flush_interval_ms: parse_or(&lookup, "FLUSH_INTERVAL_MS", defaults.flush_interval_ms)?,
            send_timeout_ms: parse_or(&lookup, "SEND_TIMEOUT_MS", defaults.send_timeout_ms)?,
            persist_timeout_ms: parse_or(
                &lookup,
                "PERSIST_TIMEOUT_MS",
                defaults.persist_timeout_ms,
            )?,
            subscriber_queue_depth: parse_or(
                &lookup,
                "SUBSCRIBER_QUEUE_DEPTH",
                defaults.subscriber_queue_depth,
            )?,
            max_subscribers: parse_or(&lookup, "MAX_SUBSCRIBERS", defaults.max_subscribers)?,
            replay,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidValue(
                "BATCH_SIZE must be at least 1".to_string(),
            ));
        }
        if !self.road_tolerance.is_finite() || self.road_tolerance < 0.0 {
            return Err(ConfigError::InvalidValue(
                "ROAD_TOLERANCE must be a non-negative number".to_string(),
            ));
        }
        if !self.road_baseline.is_finite() {
            return Err(ConfigError::InvalidValue(
                "ROAD_BASELINE must be a finite number".to_string(),
            ));
        }
        if self.send_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "SEND_TIMEOUT_MS must be at least 1".to_string(),
            ));
        }
        if self.persist_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "PERSIST_TIMEOUT_MS must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the full bind address (addr:port)
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn persist_timeout(&self) -> Duration {
        Duration::from_millis(self.persist_timeout_ms)
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            batch_size: self.batch_size,
            classifier: ClassifierConfig {
                baseline: self.road_baseline,
                tolerance: self.road_tolerance,
            },
            flush_interval: (self.flush_interval_ms > 0)
                .then(|| Duration::from_millis(self.flush_interval_ms)),
            ..PipelineConfig::default()
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{}={}", key, raw))),
        None => Ok(default),
    }
}

fn parse_bool<F>(lookup: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.to_lowercase() == "true")
        .unwrap_or(default)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid port number")]
    InvalidPort,
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<HubConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        HubConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.bind_address(), "0.0.0.0:8000");
        assert!(config.database_url.is_none());

        let pipeline = config.pipeline_config();
        assert_eq!(pipeline.classifier, ClassifierConfig::default());
        assert_eq!(pipeline.flush_interval, Some(Duration::from_secs(5)));
        assert_eq!(config.persist_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("BATCH_SIZE", "5"),
            ("ROAD_BASELINE", "9.81"),
            ("FLUSH_INTERVAL_MS", "0"),
            ("DATABASE_URL", "postgres://localhost/roads"),
        ])
        .unwrap();

        assert_eq!(config.batch_size, 5);
        assert_eq!(config.road_baseline, 9.81);
        assert_eq!(config.pipeline_config().flush_interval, None);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/roads"));
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            load(&[("BATCH_SIZE", "0")]),
            Err(ConfigError::InvalidValue(_))
        ));
        assert!(matches!(
            load(&[("PERSIST_TIMEOUT_MS", "0")]),
            Err(ConfigError::InvalidValue(_))
        ));
        assert!(matches!(
            load(&[("BATCH_SIZE", "ten")]),
            Err(ConfigError::InvalidValue(_))
        ));
        assert!(matches!(
            load(&[("ROADWATCH_PORT", "99999")]),
            Err(ConfigError::InvalidPort)
        ));
    }

    #[test]
    fn test_replay_requires_both_paths() {
        assert!(load(&[("REPLAY_GPS_PATH", "gps.csv")]).is_err());

        let config = load(&[
            ("REPLAY_ACCELEROMETER_PATH", "accelerometer.csv"),
            ("REPLAY_GPS_PATH", "gps.csv"),
            ("REPLAY_LOOP", "true"),
        ])
        .unwrap();
        let replay = config.replay.unwrap();
        assert_eq!(replay.delay_ms, 100);
        assert!(replay.loop_playback);
    }
}

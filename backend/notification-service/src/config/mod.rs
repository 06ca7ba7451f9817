use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub stream: StreamConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub env: String,
    pub port: u16,
    /// Origins allowed to open the stream and call the REST endpoints
    pub cors_allow_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
}

/// Tuning for live advisor streams
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamConfig {
    /// Per-session outbound queue size
    pub queue_capacity: usize,
    /// Silence after which a heartbeat frame is written
    pub heartbeat_interval: Duration,
    /// Period of the comment frames that surface dead sockets
    pub keepalive_interval: Duration,
    /// Idle time after which a session counts as dead
    pub inactivity_timeout: Duration,
    /// Period of the liveness sweeper
    pub sweep_interval: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 50,
            heartbeat_interval: Duration::from_secs(30),
            keepalive_interval: Duration::from_secs(5),
            inactivity_timeout: Duration::from_secs(5 * 60),
            sweep_interval: Duration::from_secs(2 * 60),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = StreamConfig::default();

        let stream = StreamConfig {
            queue_capacity: parse_or(&lookup, "STREAM_QUEUE_CAPACITY", defaults.queue_capacity)?,
            heartbeat_interval: Duration::from_secs(parse_or(
                &lookup,
                "STREAM_HEARTBEAT_SECS",
                defaults.heartbeat_interval.as_secs(),
            )?),
            keepalive_interval: Duration::from_secs(parse_or(
                &lookup,
                "STREAM_KEEPALIVE_SECS",
                defaults.keepalive_interval.as_secs(),
            )?),
            inactivity_timeout: Duration::from_secs(parse_or(
                &lookup,
                "STREAM_INACTIVITY_SECS",
                defaults.inactivity_timeout.as_secs(),
            )?),
            sweep_interval: Duration::from_secs(parse_or(
                &lookup,
                "STREAM_SWEEP_SECS",
                defaults.sweep_interval.as_secs(),
            )?),
        };

        if stream.queue_capacity == 0 {
            return Err(AppError::Config(
                "STREAM_QUEUE_CAPACITY must be at least 1".into(),
            ));
        }
        if stream.heartbeat_interval.is_zero()
            || stream.keepalive_interval.is_zero()
            || stream.sweep_interval.is_zero()
        {
            return Err(AppError::Config(
                "stream heartbeat, keepalive and sweep intervals must be non-zero".into(),
            ));
        }

        Ok(Config {
            app: AppConfig {
                env: lookup("APP_ENV").unwrap_or_else(|| "development".to_string()),
                port: parse_or(&lookup, "APP_PORT", 6001)?,
                cors_allow_origins: lookup("CORS_ALLOW_ORIGINS")
                    .map(|v| parse_list(&v))
                    .unwrap_or_else(|| vec!["http://localhost:3000".to_string()]),
            },
            database: DatabaseConfig {
                url: lookup("DATABASE_URL")
                    .ok_or_else(|| AppError::Config("DATABASE_URL missing".into()))?,
                max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?,
                min_connections: parse_or(&lookup, "DATABASE_MIN_CONNECTIONS", 2)?,
                acquire_timeout_secs: parse_or(&lookup, "DATABASE_ACQUIRE_TIMEOUT_SECS", 10)?,
            },
            stream,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{} has invalid value {:?}", key, raw))),
        None => Ok(default),
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

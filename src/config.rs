use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub stream: StreamConfig,
    pub logging: LoggingConfig,
}

/// Listener endpoints used by the external acceptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    /// SlimProto control port.
    pub slimproto_port: u16,
    /// HTTP audio-data port.
    pub http_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            slimproto_port: 3483,
            http_port: 9000,
        }
    }
}

/// Streaming parameters and pacing tunables.
///
/// The pacing values are first-cut constants standing in for adaptive
/// cruise control; they are configuration so deployments can tune them
/// without a rebuild.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub channels: u32,
    /// Storage width of one sample in bits.
    pub bits_per_sample: u32,
    /// Significant width of one sample in bits.
    pub bits_per_value: u32,
    pub chunk_capacity_bytes: usize,
    /// Max `produce` calls per producer per pump pass.
    pub produce_batch: u32,
    /// Pump sleep when no producer has data.
    pub idle_pause_ms: u64,
    /// Sleep inside a deferred chunk delivery while clients reconnect.
    pub defer_pause_ms: u64,
    /// Total budget for deferring one chunk before accepting loss.
    pub defer_window_ms: u64,
    /// Ping timer tick.
    pub ping_tick_ms: u64,
    /// Pings go out every this many ticks.
    pub ping_every_ticks: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            channels: 2,
            bits_per_sample: 32,
            bits_per_value: 24,
            chunk_capacity_bytes: 16 * 1024,
            produce_batch: 5,
            idle_pause_ms: 50,
            defer_pause_ms: 20,
            defer_window_ms: 100,
            ping_tick_ms: 200,
            ping_every_ticks: 25,
        }
    }
}

impl StreamConfig {
    #[must_use]
    pub fn idle_pause(&self) -> Duration {
        Duration::from_millis(self.idle_pause_ms)
    }

    #[must_use]
    pub fn defer_pause(&self) -> Duration {
        Duration::from_millis(self.defer_pause_ms)
    }

    #[must_use]
    pub fn defer_window(&self) -> Duration {
        Duration::from_millis(self.defer_window_ms)
    }

    #[must_use]
    pub fn ping_tick(&self) -> Duration {
        Duration::from_millis(self.ping_tick_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// "pretty" for development, "json" for production.
    pub format: String,
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from an optional file, then `SLIMCAST_*`
    /// environment overrides (e.g. `SLIMCAST_SERVER__HTTP_PORT=9001`).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }

        builder
            .add_source(Environment::with_prefix("SLIMCAST").separator("__"))
            .build()?
            .try_deserialize()
    }
}

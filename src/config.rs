use serde::{Deserialize, Deserializer};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid setting {0}: {1}")]
    Invalid(&'static str, String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub simulator: SimulatorConfig,
    #[serde(default)]
    pub spectator: SpectatorConfig,
    #[serde(default)]
    pub geolocation: GeolocationConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    pub profile_id: String,
    #[serde(default = "default_api_timeout", deserialize_with = "human_duration")]
    pub timeout: Duration,
}

fn default_api_timeout() -> Duration {
    Duration::from_secs(10)
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_throttle", deserialize_with = "human_duration")]
    pub throttle: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            throttle: default_throttle(),
        }
    }
}

fn default_throttle() -> Duration {
    Duration::from_secs(5)
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulatorConfig {
    #[serde(default = "default_tick", deserialize_with = "human_duration")]
    pub tick: Duration,
    #[serde(default = "default_segment_duration", deserialize_with = "human_duration")]
    pub segment_duration: Duration,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            tick: default_tick(),
            segment_duration: default_segment_duration(),
        }
    }
}

fn default_tick() -> Duration {
    Duration::from_millis(100)
}

fn default_segment_duration() -> Duration {
    Duration::from_secs(5)
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpectatorConfig {
    #[serde(default = "default_poll_interval", deserialize_with = "human_duration")]
    pub poll_interval: Duration,
}

impl Default for SpectatorConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
        }
    }
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(2)
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeolocationConfig {
    /// `gpsd://host:port`, `stdin` or `file:<path>`.
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default = "default_true")]
    pub high_accuracy: bool,
    #[serde(default = "default_maximum_age", deserialize_with = "human_duration")]
    pub maximum_age: Duration,
    #[serde(default = "default_fix_timeout", deserialize_with = "human_duration")]
    pub timeout: Duration,
}

impl Default for GeolocationConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            high_accuracy: true,
            maximum_age: default_maximum_age(),
            timeout: default_fix_timeout(),
        }
    }
}

fn default_source() -> String {
    "gpsd://127.0.0.1:2947".to_string()
}

fn default_true() -> bool {
    true
}

fn default_maximum_age() -> Duration {
    Duration::from_secs(5)
}

fn default_fix_timeout() -> Duration {
    Duration::from_secs(15)
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub profiles: Vec<String>,
    #[serde(default)]
    pub vehicles: Vec<VehicleSeed>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            profiles: Vec::new(),
            vehicles: Vec::new(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct VehicleSeed {
    pub id: String,
    pub plate: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn human_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.simulator.tick.is_zero() {
            return Err(ConfigError::Invalid("simulator.tick", "must be positive".into()));
        }
        if self.simulator.segment_duration < self.simulator.tick {
            return Err(ConfigError::Invalid(
                "simulator.segment_duration",
                "shorter than one tick".into(),
            ));
        }
        if self.spectator.poll_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "spectator.poll_interval",
                "must be positive".into(),
            ));
        }
        Ok(())
    }
}

//! Configuration for the PM2.5 preprocessor.
//!
//! Values come from built-in defaults, then an optional JSON file, then
//! environment variables.

use crate::core::DEFAULT_OUTLIER_THRESHOLD;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration for the preprocessor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Subscribe side (MQTT broker delivering raw readings)
    pub inbound: InboundConfig,

    /// Publish side (AMQP queue receiving daily averages)
    pub outbound: OutboundConfig,

    /// Readings with a value strictly above this are outliers
    pub outlier_threshold: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            inbound: InboundConfig::default(),
            outbound: OutboundConfig::default(),
            outlier_threshold: DEFAULT_OUTLIER_THRESHOLD,
        }
    }
}

impl Config {
    /// Load configuration from `path`, or from the default location if none
    /// is given, then apply environment overrides.
    ///
    /// A missing file at the default location is not an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Self::config_path();
                if default_path.exists() {
                    Self::from_file(&default_path)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Read a JSON configuration file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Get the path to the default configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pm25-preprocessor")
            .join("config.json")
    }

    /// Override fields from environment-style variables.
    ///
    /// `lookup` returns the value for a variable name, if set.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let inbound = &mut self.inbound;
        if let Some(v) = lookup("MQTT_BROKER") {
            inbound.host = v;
        }
        if let Some(v) = lookup("MQTT_PORT") {
            inbound.port = parse_env("MQTT_PORT", &v)?;
        }
        if let Some(v) = lookup("MQTT_TOPIC") {
            inbound.topic = v;
        }
        if let Some(v) = lookup("MQTT_CLIENT_ID") {
            inbound.client_id = v;
        }

        let outbound = &mut self.outbound;
        if let Some(v) = lookup("RABBITMQ_HOST") {
            outbound.host = v;
        }
        if let Some(v) = lookup("RABBITMQ_PORT") {
            outbound.port = parse_env("RABBITMQ_PORT", &v)?;
        }
        if let Some(v) = lookup("RABBITMQ_QUEUE") {
            outbound.queue = v;
        }
        if let Some(v) = lookup("RABBITMQ_USER") {
            outbound.user = v;
        }
        if let Some(v) = lookup("RABBITMQ_PASSWORD") {
            outbound.password = v;
        }

        if let Some(v) = lookup("OUTLIER_THRESHOLD") {
            let threshold: f64 = parse_env("OUTLIER_THRESHOLD", &v)?;
            if !threshold.is_finite() {
                return Err(ConfigError::InvalidEnv {
                    key: "OUTLIER_THRESHOLD",
                    value: v,
                });
            }
            self.outlier_threshold = threshold;
        }

        Ok(())
    }

    /// Copy of this configuration safe to display.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        config.outbound.password = "********".to_string();
        config
    }
}

/// MQTT subscriber settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InboundConfig {
    pub host: String,
    pub port: u16,
    pub topic: String,
    pub client_id: String,
    /// How long to wait for the broker to accept the connection
    pub connect_timeout_secs: u64,
}

impl Default for InboundConfig {
    fn default() -> Self {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "local".to_string());

        Self {
            host: "emqx".to_string(),
            port: 1883,
            topic: "uo/pm25".to_string(),
            client_id: format!("preprocessor-{host}"),
            connect_timeout_secs: 10,
        }
    }
}

/// AMQP publisher settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboundConfig {
    pub host: String,
    pub port: u16,
    pub queue: String,
    pub user: String,
    pub password: String,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            host: "rabbitmq".to_string(),
            port: 5672,
            queue: "pm25_daily_avg".to_string(),
            user: "student".to_string(),
            password: "student".to_string(),
        }
    }
}

impl OutboundConfig {
    /// Connection URI for the default virtual host.
    pub fn amqp_uri(&self) -> String {
        format!(
            "amqp://{}:{}@{}:{}/%2f",
            self.user, self.password, self.host, self.port
        )
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    InvalidEnv { key: &'static str, value: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::InvalidEnv { key, value } => {
                write!(f, "Invalid value for {key}: {value:?}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

fn parse_env<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key,
        value: value.to_string(),
    })
}

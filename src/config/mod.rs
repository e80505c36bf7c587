//! # Configuration Management Module
//!
//! A single [`Config`] value is built once at startup and handed by reference to
//! every component constructor. Layering, lowest precedence first:
//!
//! 1. [`Config::default`]
//! 2. TOML file (`roadmesh.toml` unless `--config` says otherwise)
//! 3. Environment variables, including a `.env` file loaded by the binary
//! 4. CLI flags (applied in `main.rs`)
//!
//! [`Config::validate`] then rejects anything the relay cannot run with. A missing
//! AZ511 credential is fatal; there is no built-in default key.
//!
//! ## Configuration File Format
//!
//! ```toml
//! [traffic]
//! api_key = "your-az511-key"
//!
//! [meshtastic]
//! connection = "tcp"
//! tcp_host = "192.168.1.40"
//! channel = 2
//!
//! [listener]
//! max_results = 3
//!
//! [region]
//! utc_offset_minutes = -420
//! timezone_label = "MST"
//! ```
//!
//! ## Environment Overrides
//!
//! | Variable | Field |
//! |----------|-------|
//! | `ADOT_API_KEY` | `traffic.api_key` |
//! | `MESHTASTIC_CONNECTION_TYPE` | `meshtastic.connection` |
//! | `MESHTASTIC_DEVICE_PATH` | `meshtastic.port` |
//! | `MESHTASTIC_TCP_HOST` | `meshtastic.tcp_host` |
//! | `MESHTASTIC_TCP_PORT` | `meshtastic.tcp_port` |
//! | `MESHTASTIC_CHANNEL_INDEX` | `meshtastic.channel` |
//! | `MAX_RESULTS_PER_QUERY` | `listener.max_results` |
//! | `ENABLE_MESHTASTIC_SEND` | `meshtastic.send_enabled` |

use anyhow::{anyhow, Result};
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tokio::fs;

/// Startup-fatal configuration faults.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is required (set it in the config file or environment)")]
    MissingCredential(&'static str),
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub traffic: TrafficConfig,
    #[serde(default)]
    pub meshtastic: MeshtasticConfig,
    #[serde(default)]
    pub listener: ListenerConfig,
    #[serde(default)]
    pub region: RegionConfig,
    #[serde(default)]
    pub geocoding: GeocodingConfig,
    #[serde(default)]
    pub weather: WeatherConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficConfig {
    /// AZ511 developer key. Required.
    pub api_key: String,
    pub base_url: String,
    pub timeout_seconds: u64,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://az511.com/api/v2".to_string(),
            timeout_seconds: 15,
        }
    }
}

/// How to reach the radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    Serial,
    Tcp,
}

impl FromStr for ConnectionKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "serial" => Ok(ConnectionKind::Serial),
            "tcp" => Ok(ConnectionKind::Tcp),
            other => Err(ConfigError::Invalid {
                field: "meshtastic.connection",
                reason: format!("expected 'serial' or 'tcp', got '{}'", other),
            }),
        }
    }
}

impl std::fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionKind::Serial => write!(f, "serial"),
            ConnectionKind::Tcp => write!(f, "tcp"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshtasticConfig {
    pub connection: ConnectionKind,
    /// Serial device path. Empty means pick the first USB serial port found.
    pub port: String,
    pub baud_rate: u32,
    pub tcp_host: Option<String>,
    pub tcp_port: u16,
    /// Channel index we listen on and reply to.
    pub channel: u32,
    /// Per-packet text budget in bytes (leaves room for Meshtastic header overhead).
    pub max_message_size: usize,
    /// Gap between consecutive text transmissions on one channel (ms).
    pub min_send_gap_ms: u64,
    pub connect_timeout_seconds: u64,
    /// One-shot `query` mode transmits instead of printing when true.
    pub send_enabled: bool,
}

impl Default for MeshtasticConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionKind::Serial,
            port: String::new(),
            baud_rate: 115200,
            tcp_host: None,
            tcp_port: 4403,
            channel: 0,
            max_message_size: 200,
            min_send_gap_ms: 2000,
            connect_timeout_seconds: 10,
            send_enabled: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Records answered per query; bounds airtime on the shared channel.
    pub max_results: usize,
    /// Coarse housekeeping tick of the listen loop (ms).
    pub poll_interval_ms: u64,
    /// Seconds between transport keepalives (0 disables).
    pub keepalive_seconds: u64,
    /// Max bytes of error text echoed back in an error reply.
    pub error_reply_max: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            max_results: 3,
            poll_interval_ms: 1000,
            keepalive_seconds: 300,
            error_reply_max: 100,
        }
    }
}

/// Operating region's civil time. Arizona (outside the Navajo Nation) stays on MST all year.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionConfig {
    pub utc_offset_minutes: i32,
    pub timezone_label: String,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: -7 * 60,
            timezone_label: "MST".to_string(),
        }
    }
}

impl RegionConfig {
    pub fn offset(&self) -> std::result::Result<FixedOffset, ConfigError> {
        self.utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| ConfigError::Invalid {
                field: "region.utc_offset_minutes",
                reason: format!("{} is outside +/-24h", self.utc_offset_minutes),
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocodingConfig {
    /// When false, locations are shown as raw coordinates.
    pub enabled: bool,
    pub base_url: String,
    pub user_agent: String,
    /// Minimum spacing between requests; Nominatim policy is 1 req/s.
    pub min_interval_ms: u64,
    pub timeout_seconds: u64,
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://nominatim.openstreetmap.org".to_string(),
            user_agent: format!("roadmesh/{} (AZ511 mesh relay)", env!("CARGO_PKG_VERSION")),
            min_interval_ms: 1100,
            timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    /// OpenWeatherMap API key
    pub api_key: String,
    /// Location type: "city", "zipcode", or "city_id"
    pub location_type: String,
    /// Country code appended to city/zipcode lookups (e.g., "US")
    pub country_code: Option<String>,
    /// Cache TTL in minutes
    pub cache_ttl_minutes: u32,
    /// Request timeout in seconds
    pub timeout_seconds: u32,
    /// Enable/disable weather functionality
    pub enabled: bool,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            location_type: "city".to_string(),
            country_code: Some("US".to_string()),
            cache_ttl_minutes: 10,
            timeout_seconds: 5,
            enabled: false, // Disabled by default until API key is provided
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

fn parse_env<T: FromStr>(field: &'static str, raw: &str) -> std::result::Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
        field,
        reason: format!("'{}': {}", raw, e),
    })
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Load the file when it exists, otherwise start from defaults.
    pub async fn load_or_default(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            Self::load(path).await
        } else {
            Ok(Config::default())
        }
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> std::result::Result<(), ConfigError> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (the process env in production, a map in tests).
    /// Empty values are treated as unset.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> std::result::Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get("ADOT_API_KEY") {
            self.traffic.api_key = key.trim().to_string();
        }
        if let Some(kind) = get("MESHTASTIC_CONNECTION_TYPE") {
            self.meshtastic.connection = kind.parse()?;
        }
        if let Some(path) = get("MESHTASTIC_DEVICE_PATH") {
            self.meshtastic.port = path.trim().to_string();
        }
        if let Some(host) = get("MESHTASTIC_TCP_HOST") {
            self.meshtastic.tcp_host = Some(host.trim().to_string());
        }
        if let Some(port) = get("MESHTASTIC_TCP_PORT") {
            self.meshtastic.tcp_port = parse_env("MESHTASTIC_TCP_PORT", &port)?;
        }
        if let Some(ch) = get("MESHTASTIC_CHANNEL_INDEX") {
            self.meshtastic.channel = parse_env("MESHTASTIC_CHANNEL_INDEX", &ch)?;
        }
        if let Some(max) = get("MAX_RESULTS_PER_QUERY") {
            self.listener.max_results = parse_env("MAX_RESULTS_PER_QUERY", &max)?;
        }
        if let Some(send) = get("ENABLE_MESHTASTIC_SEND") {
            self.meshtastic.send_enabled = send.trim().eq_ignore_ascii_case("true");
        }
        Ok(())
    }

    /// Reject configurations the relay cannot run with.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.traffic.api_key.trim().is_empty() {
            return Err(ConfigError::MissingCredential("ADOT_API_KEY"));
        }
        if self.meshtastic.connection == ConnectionKind::Tcp
            && self
                .meshtastic
                .tcp_host
                .as_deref()
                .map(|h| h.trim().is_empty())
                .unwrap_or(true)
        {
            return Err(ConfigError::Invalid {
                field: "meshtastic.tcp_host",
                reason: "required when connection = \"tcp\"".to_string(),
            });
        }
        if self.meshtastic.max_message_size < 32 {
            return Err(ConfigError::Invalid {
                field: "meshtastic.max_message_size",
                reason: format!("{} is too small (min 32)", self.meshtastic.max_message_size),
            });
        }
        if self.listener.max_results == 0 {
            return Err(ConfigError::Invalid {
                field: "listener.max_results",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.listener.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "listener.poll_interval_ms",
                reason: "must be non-zero".to_string(),
            });
        }
        self.region.offset()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_match_mesh_limits() {
        let config = Config::default();
        assert_eq!(config.meshtastic.max_message_size, 200);
        assert_eq!(config.meshtastic.tcp_port, 4403);
        assert_eq!(config.listener.max_results, 3);
        assert_eq!(config.region.offset().unwrap().local_minus_utc(), -7 * 3600);
    }

    #[test]
    fn missing_api_key_is_fatal() {
        let config = Config::default();
        assert_eq!(
            config.validate(),
            Err(ConfigError::MissingCredential("ADOT_API_KEY"))
        );
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = Config::default();
        config
            .apply_env_with(env(&[
                ("ADOT_API_KEY", "abc123"),
                ("MESHTASTIC_CONNECTION_TYPE", "TCP"),
                ("MESHTASTIC_TCP_HOST", "10.0.0.5"),
                ("MESHTASTIC_TCP_PORT", "4404"),
                ("MESHTASTIC_CHANNEL_INDEX", "2"),
                ("MAX_RESULTS_PER_QUERY", "5"),
                ("ENABLE_MESHTASTIC_SEND", "True"),
            ]))
            .unwrap();
        assert_eq!(config.traffic.api_key, "abc123");
        assert_eq!(config.meshtastic.connection, ConnectionKind::Tcp);
        assert_eq!(config.meshtastic.tcp_host.as_deref(), Some("10.0.0.5"));
        assert_eq!(config.meshtastic.tcp_port, 4404);
        assert_eq!(config.meshtastic.channel, 2);
        assert_eq!(config.listener.max_results, 5);
        assert!(config.meshtastic.send_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn malformed_numeric_env_is_rejected() {
        let mut config = Config::default();
        let err = config
            .apply_env_with(env(&[("MESHTASTIC_CHANNEL_INDEX", "two")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "MESHTASTIC_CHANNEL_INDEX",
                ..
            }
        ));
    }

    #[test]
    fn tcp_without_host_is_invalid() {
        let mut config = Config::default();
        config.traffic.api_key = "k".into();
        config.meshtastic.connection = ConnectionKind::Tcp;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "meshtastic.tcp_host",
                ..
            })
        ));
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [traffic]
            api_key = "k"

            [meshtastic]
            channel = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.meshtastic.channel, 3);
        assert_eq!(config.meshtastic.max_message_size, 200);
        assert_eq!(config.region.timezone_label, "MST");
    }
}

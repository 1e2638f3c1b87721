use crate::error::{AppError, Result};
use crate::models::{default_exclusions, default_fields, FieldDescriptor, FieldTable};
use rumqttc::QoS;
use serde::{Deserialize, Deserializer};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Environment variable that overrides the default config file location
pub const CONFIG_PATH_ENV: &str = "TAWES_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/config.yaml";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default = "default_fields")]
    pub fields: Vec<FieldDescriptor>,
    #[serde(default = "default_exclusions")]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub scheduler: Option<SchedulerConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feed: FeedConfig::default(),
            mqtt: MqttConfig::default(),
            fields: default_fields(),
            exclude: default_exclusions(),
            logging: LoggingConfig::default(),
            scheduler: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedConfig {
    #[serde(default = "default_feed_url")]
    pub url: String,
    #[serde(default = "default_station_id")]
    pub station_id: String,
    #[serde(default = "default_station_column")]
    pub station_column: String,
    #[serde(default = "default_feed_timeout")]
    pub timeout_seconds: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: default_feed_url(),
            station_id: default_station_id(),
            station_column: default_station_column(),
            timeout_seconds: default_feed_timeout(),
        }
    }
}

fn default_feed_url() -> String {
    "https://www.zamg.ac.at/ogd/".to_string()
}

fn default_station_id() -> String {
    // Klagenfurt/Flughafen
    "11331".to_string()
}

fn default_station_column() -> String {
    "Station".to_string()
}

fn default_feed_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port", deserialize_with = "deserialize_port")]
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_base_topic")]
    pub base_topic: String,
    #[serde(default = "default_id_prefix")]
    pub id_prefix: String,
    #[serde(default = "default_name_suffix")]
    pub name_suffix: String,
    #[serde(default = "default_retain")]
    pub retain: bool,
    #[serde(default = "default_qos")]
    pub qos: u8,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_seconds: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            client_id: default_client_id(),
            base_topic: default_base_topic(),
            id_prefix: default_id_prefix(),
            name_suffix: default_name_suffix(),
            retain: default_retain(),
            qos: default_qos(),
            connect_timeout_seconds: default_connect_timeout(),
            keep_alive_seconds: default_keep_alive(),
        }
    }
}

fn default_mqtt_host() -> String {
    "10.0.0.30".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "tawes".to_string()
}

fn default_base_topic() -> String {
    "homeassistant/sensor/tawes/".to_string()
}

fn default_id_prefix() -> String {
    "tawes_weather_".to_string()
}

fn default_name_suffix() -> String {
    "tawes weather".to_string()
}

fn default_retain() -> bool {
    true // broker keeps the last message for late subscribers
}

fn default_qos() -> u8 {
    2
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_keep_alive() -> u64 {
    30
}

impl MqttConfig {
    pub fn qos(&self) -> QoS {
        match self.qos {
            0 => QoS::AtMostOnce,
            1 => QoS::AtLeastOnce,
            _ => QoS::ExactlyOnce,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn state_topic(&self) -> String {
        format!("{}state", self.base_topic)
    }
}

/// Custom deserializer that handles port as both number and string
///
/// Accepts:
/// - `port: 1883` (number)
/// - `port: "1883"` (string that parses to number)
/// - `port: ${MQTT_PORT}` (env var substituted to either)
fn deserialize_port<'de, D>(deserializer: D) -> std::result::Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PortValue {
        Number(u16),
        String(String),
    }

    match PortValue::deserialize(deserializer)? {
        PortValue::Number(n) => Ok(n),
        PortValue::String(s) => s
            .parse::<u16>()
            .map_err(|_| serde::de::Error::custom(format!("Invalid port number: '{}'", s))),
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    pub interval_minutes: u64,
    #[serde(default = "default_initial_delay")]
    pub initial_delay_seconds: u64,
}

fn default_initial_delay() -> u64 {
    0
}

impl Config {
    /// Resolve the config path from `TAWES_CONFIG`, falling back to `config/config.yaml`
    pub fn default_path() -> String {
        std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| AppError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        // Substitute environment variables
        let expanded = expand_env_vars(content)?;

        // An empty document means "all defaults"
        let config: Config = if expanded.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(&expanded)
                .map_err(|e| AppError::Config(format!("Failed to parse config: {}", e)))?
        };

        config.validate()?;

        Ok(config)
    }

    pub fn field_table(&self) -> FieldTable {
        FieldTable::new(self.fields.clone(), self.exclude.iter().cloned())
    }

    /// Validate configuration values
    ///
    /// Checks for:
    /// - Unexpanded environment variables
    /// - Valid feed URL and scheme
    /// - Non-empty station and broker settings
    /// - Unique field keys
    /// - Positive time intervals
    fn validate(&self) -> Result<()> {
        if self.mqtt.host.contains("${") {
            return Err(AppError::Config(
                "MQTT host environment variable is not set. \
                 Please set it or create a .env file."
                    .to_string(),
            ));
        }

        let parsed = url::Url::parse(&self.feed.url).map_err(|e| {
            AppError::Config(format!("Invalid feed url '{}': {}", self.feed.url, e))
        })?;
        if parsed.scheme() != "https" && parsed.scheme() != "http" {
            return Err(AppError::Config(format!(
                "Feed url must use http or https, got: {}",
                parsed.scheme()
            )));
        }

        if self.feed.station_id.trim().is_empty() {
            return Err(AppError::Config("Station id cannot be empty".to_string()));
        }

        if self.feed.station_column.is_empty() {
            return Err(AppError::Config(
                "Station column label cannot be empty".to_string(),
            ));
        }

        if self.feed.timeout_seconds == 0 {
            return Err(AppError::Config(
                "Feed timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if self.mqtt.host.is_empty() {
            return Err(AppError::Config("MQTT host cannot be empty".to_string()));
        }

        // u16 max is 65535, so no upper bound check needed
        if self.mqtt.port == 0 {
            return Err(AppError::Config("MQTT port cannot be 0".to_string()));
        }

        // rumqttc panics on these ids, reject them here instead
        if self.mqtt.client_id.is_empty() || self.mqtt.client_id.starts_with(char::is_whitespace)
        {
            return Err(AppError::Config(format!(
                "MQTT client_id '{}' must be non-empty and not start with whitespace",
                self.mqtt.client_id
            )));
        }

        if self.mqtt.qos > 2 {
            return Err(AppError::Config(format!(
                "MQTT qos must be 0, 1 or 2, got {}",
                self.mqtt.qos
            )));
        }

        if self.mqtt.connect_timeout_seconds == 0 {
            return Err(AppError::Config(
                "MQTT connect_timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if self.mqtt.keep_alive_seconds < 5 {
            return Err(AppError::Config(format!(
                "MQTT keep_alive_seconds must be at least 5, got {}",
                self.mqtt.keep_alive_seconds
            )));
        }

        let mut seen = HashSet::new();
        for descriptor in &self.fields {
            if !seen.insert(descriptor.field.as_str()) {
                return Err(AppError::Config(format!(
                    "Duplicate field key '{}' in fields table",
                    descriptor.field
                )));
            }
        }

        if let Some(scheduler) = &self.scheduler {
            if scheduler.interval_minutes == 0 {
                return Err(AppError::Config(
                    "Scheduler interval_minutes must be greater than 0".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Settings that are accepted but probably not what the user meant.
    ///
    /// Returned rather than logged so the caller can report them once the
    /// subscriber is installed.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        for key in &self.exclude {
            if self.fields.iter().all(|d| &d.field != key) {
                warnings.push(format!("Excluded field '{}' is not in the fields table", key));
            }
        }

        // GeoSphere refreshes the TAWES feed hourly
        if let Some(scheduler) = &self.scheduler {
            if scheduler.interval_minutes < 10 {
                warnings.push(format!(
                    "Scheduler interval of {} minutes is very short, the feed only updates hourly",
                    scheduler.interval_minutes
                ));
            }
        }

        warnings
    }
}

fn expand_env_vars(content: &str) -> Result<String> {
    let re = regex_lite::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| AppError::Config(format!("Invalid env var pattern: {}", e)))?;

    let mut result = String::with_capacity(content.len());
    let mut missing_vars = Vec::new();

    for line in content.split_inclusive('\n') {
        // Comment lines are copied as-is
        if line.trim_start().starts_with('#') {
            result.push_str(line);
            continue;
        }

        let expanded = re.replace_all(line, |cap: &regex_lite::Captures| {
            match std::env::var(&cap[1]) {
                Ok(value) => value,
                Err(_) => {
                    missing_vars.push(cap[1].to_string());
                    cap[0].to_string()
                }
            }
        });
        result.push_str(&expanded);
    }

    if !missing_vars.is_empty() {
        return Err(AppError::Config(format!(
            "Missing required environment variable{}: {}\n\n\
             To fix this:\n\
             1. Create a .env file in the project root\n\
             2. Set the missing variable{}: export {}=<value>",
            if missing_vars.len() > 1 { "s" } else { "" },
            missing_vars.join(", "),
            if missing_vars.len() > 1 { "s" } else { "" },
            missing_vars[0],
        )));
    }

    Ok(result)
}

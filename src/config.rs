//! Configuration for the mempool subscriber
//!
//! Configuration is an explicit struct handed to the connection layer; there is
//! no process-wide state. Every field has a default, so a config file is optional.
//! Secrets are never stored here: the broker token is read from the environment
//! variable named by `broker.token_env`.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use url::Url;

/// Topic the subscriber listens on unless overridden
pub const DEFAULT_TOPIC: &str = "staking.osmosis.mempool";

/// Broker address used when none is configured
pub const DEFAULT_BROKER_URL: &str = "mqtt://127.0.0.1:1883";

/// Environment variable holding the bearer token
pub const DEFAULT_TOKEN_ENV: &str = "ACCESS_TOKEN";

/// Top-level subscriber configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SubscriberConfig {
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub subscription: SubscriptionSection,
}

/// Broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// Broker URL with scheme, host and optional port
    #[serde(default = "default_broker_url")]
    pub url: String,
    /// Username presented alongside the token
    #[serde(default = "default_username")]
    pub username: String,
    /// Environment variable containing the bearer token
    #[serde(default = "default_token_env")]
    pub token_env: String,
    /// Prefix for the generated MQTT client id
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
    /// MQTT keep-alive interval in seconds
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// How long to wait for the broker's CONNACK
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            url: default_broker_url(),
            username: default_username(),
            token_env: default_token_env(),
            client_id_prefix: default_client_id_prefix(),
            keep_alive_secs: default_keep_alive_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Subscription settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionSection {
    /// The single topic to subscribe to
    #[serde(default = "default_topic")]
    pub topic: String,
    /// Capacity of the channel between the broker task and the delivery loop
    #[serde(default = "default_inbound_capacity")]
    pub inbound_capacity: usize,
}

impl Default for SubscriptionSection {
    fn default() -> Self {
        Self {
            topic: default_topic(),
            inbound_capacity: default_inbound_capacity(),
        }
    }
}

fn default_broker_url() -> String {
    DEFAULT_BROKER_URL.to_string()
}

fn default_username() -> String {
    "token".to_string()
}

fn default_token_env() -> String {
    DEFAULT_TOKEN_ENV.to_string()
}

fn default_client_id_prefix() -> String {
    "mempool-subscriber".to_string()
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_topic() -> String {
    DEFAULT_TOPIC.to_string()
}

fn default_inbound_capacity() -> usize {
    64
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Environment variable {0} is empty")]
    EmptyCredential(String),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SubscriberConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: SubscriberConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply command-line overrides, then validate
    pub fn with_overrides(
        mut self,
        broker_url: Option<String>,
        topic: Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(url) = broker_url {
            self.broker.url = url;
        }
        if let Some(topic) = topic {
            self.subscription.topic = topic;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_broker_url(&self.broker.url)?;
        validate_topic(&self.subscription.topic)?;

        if self.broker.token_env.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "broker.token_env must name an environment variable".to_string(),
            ));
        }
        if self.broker.keep_alive_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker.keep_alive_secs must be greater than 0".to_string(),
            ));
        }
        // CONNECT carries keep-alive as a 16-bit seconds field
        if self.broker.keep_alive_secs > u64::from(u16::MAX) {
            return Err(ConfigError::InvalidConfig(format!(
                "broker.keep_alive_secs must be at most {}",
                u16::MAX
            )));
        }
        if self.broker.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker.connect_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.subscription.inbound_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "subscription.inbound_capacity must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Check that a broker URL is syntactically usable: a supported scheme and a host
pub fn validate_broker_url(broker_url: &str) -> Result<Url, ConfigError> {
    let url =
        Url::parse(broker_url).map_err(|_| ConfigError::InvalidBrokerUrl(broker_url.to_string()))?;

    if !matches!(url.scheme(), "mqtt" | "mqtts" | "tcp" | "ssl") {
        return Err(ConfigError::InvalidBrokerUrl(format!(
            "{broker_url} (unsupported scheme '{}')",
            url.scheme()
        )));
    }

    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(ConfigError::InvalidBrokerUrl(broker_url.to_string())),
    }
}

/// A subscription topic is a concrete name: non-empty, no MQTT wildcards, no NUL
fn validate_topic(topic: &str) -> Result<(), ConfigError> {
    if topic.trim().is_empty() {
        return Err(ConfigError::InvalidTopic("topic must not be empty".to_string()));
    }
    if topic.contains(['+', '#', '\0']) {
        return Err(ConfigError::InvalidTopic(format!(
            "'{topic}' must not contain wildcards"
        )));
    }
    Ok(())
}

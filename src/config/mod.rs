//! Application configuration.
//!
//! Aggregates broker, topology, requester, responder and HTTP settings into a
//! single Config struct that can be loaded from YAML files or environment variables.

mod messaging;

pub use messaging::{BrokerConfig, TopologyConfig, DEFAULT_DEAD_LETTER_SUFFIX};

use std::time::Duration;

use serde::Deserialize;
use uuid::Uuid;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "validation.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "VALIDATION_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "VALIDATION";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "VALIDATION_LOG";

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Requester-side settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RequesterConfig {
    /// How long a validation call waits for its response.
    pub timeout_ms: u64,
}

impl Default for RequesterConfig {
    fn default() -> Self {
        Self { timeout_ms: 5000 }
    }
}

impl RequesterConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Responder-side settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ResponderConfig {
    /// Entities served by the in-memory store of the standalone responder binary.
    pub known_entities: Vec<Uuid>,
}

/// Settings for the HTTP existence check.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpValidatorConfig {
    /// Base URL of the owning service's entity resource.
    pub primary_url: String,
    /// Second endpoint tried once when the primary fails.
    pub fallback_url: Option<String>,
    /// Per-request timeout.
    pub timeout_ms: u64,
}

impl Default for HttpValidatorConfig {
    fn default() -> Self {
        Self {
            primary_url: "http://localhost:8080/entities".to_string(),
            fallback_url: None,
            timeout_ms: 2000,
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Broker connection.
    pub broker: BrokerConfig,
    /// Exchange/queue layout.
    pub topology: TopologyConfig,
    /// Requester settings.
    pub requester: RequesterConfig,
    /// Responder settings.
    pub responder: ResponderConfig,
    /// HTTP validator settings.
    pub http: HttpValidatorConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `validation.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config: Config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("responder.known_entities"),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the topology or timeouts meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let topology = &self.topology;
        let names = [
            ("exchange", &topology.exchange),
            ("request_queue", &topology.request_queue),
            ("request_routing_key", &topology.request_routing_key),
            ("response_queue", &topology.response_queue),
            ("response_routing_key", &topology.response_routing_key),
            ("dead_letter_exchange", &topology.dead_letter_exchange),
            ("dead_letter_suffix", &topology.dead_letter_suffix),
        ];
        if let Some((field, _)) = names.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!("topology.{} is empty", field)));
        }
        if topology.request_routing_key == topology.response_routing_key {
            return Err(ConfigError::Invalid(
                "request and response routing keys must differ".to_string(),
            ));
        }
        if topology.request_queue == topology.response_queue {
            return Err(ConfigError::Invalid(
                "request and response queues must differ".to_string(),
            ));
        }
        let dead_letter_queue = topology.dead_letter_routing_key();
        if dead_letter_queue == topology.request_queue
            || dead_letter_queue == topology.response_queue
        {
            return Err(ConfigError::Invalid(format!(
                "dead-letter queue '{}' collides with a request/response queue",
                dead_letter_queue
            )));
        }
        if topology.prefetch == 0 {
            return Err(ConfigError::Invalid("topology.prefetch must be > 0".to_string()));
        }
        if self.requester.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "requester.timeout_ms must be > 0".to_string(),
            ));
        }
        if self.broker.connect_attempts == 0 {
            return Err(ConfigError::Invalid(
                "broker.connect_attempts must be > 0".to_string(),
            ));
        }
        self.broker.url()?;
        Ok(())
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self::default()
    }
}

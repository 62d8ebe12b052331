//! Conduit Configuration System
//!
//! TOML-based configuration with environment variable override support. The file
//! carries both process settings (`[mediation]`, `[cluster]`) and the declarative
//! descriptors the mediation factory turns into components.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

mod descriptor;
mod loader;

pub use descriptor::{
    CaseDescriptor, EndpointDescriptor, EvaluatorDescriptor, LoadBalancerDescriptor,
    MediatorDescriptor, SequenceDescriptor,
};
pub use loader::ConfigLoader;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Root application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub mediation: MediationSettings,
    pub cluster: ClusterConfig,
    pub sequences: Vec<SequenceDescriptor>,
    pub endpoints: Vec<EndpointDescriptor>,
    pub load_balancers: Vec<LoadBalancerDescriptor>,
}

/// Engine entry points
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediationSettings {
    /// Sequence every inbound message enters
    pub main_sequence: String,
    /// Sequence receiving messages that failed mediation
    pub fault_sequence: Option<String>,
    /// Load balancer used for the terminal send when no mediator sent the message
    pub default_endpoint: Option<String>,
    /// Per-message deadline applied by the caller around the pipeline
    pub message_timeout_ms: u64,
}

impl Default for MediationSettings {
    fn default() -> Self {
        Self {
            main_sequence: "main".to_string(),
            fault_sequence: Some("fault".to_string()),
            default_endpoint: None,
            message_timeout_ms: 30_000,
        }
    }
}

/// Cluster-shared load balancer state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Keep round-robin cursors in Redis instead of process memory
    pub enabled: bool,
    pub redis_url: String,
    /// Cursor keys are `<key_prefix>.<load balancer name>.current`
    pub key_prefix: String,
    /// Compare-and-swap attempts before a selection gives up
    pub cas_retries: u32,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "lb".to_string(),
            cas_retries: 16,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Load configuration with environment variable override
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }

    /// Structural checks that do not need the component factory.
    ///
    /// Sequence references are bound late, so a reference to an undeclared sequence
    /// is not an error here. Endpoint references are bound at load time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mediation.main_sequence.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "mediation.main_sequence must not be empty".to_string(),
            ));
        }

        unique_names("sequence", self.sequences.iter().map(|s| s.name.as_str()))?;
        let endpoint_names =
            unique_names("endpoint", self.endpoints.iter().map(|e| e.name.as_str()))?;
        let lb_names =
            unique_names("load balancer", self.load_balancers.iter().map(|l| l.name.as_str()))?;

        for lb in &self.load_balancers {
            if lb.endpoints.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "load balancer '{}' has no endpoints",
                    lb.name
                )));
            }
            if let Some(missing) = lb.endpoints.iter().find(|e| !endpoint_names.contains(e.as_str())) {
                return Err(ConfigError::ValidationError(format!(
                    "load balancer '{}' references unknown endpoint '{}'",
                    lb.name, missing
                )));
            }
        }

        if let Some(default) = &self.mediation.default_endpoint {
            if !lb_names.contains(default.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "mediation.default_endpoint '{}' is not a declared load balancer",
                    default
                )));
            }
        }

        Ok(())
    }

    /// Generate an example TOML configuration
    pub fn example_toml() -> String {
        r#"# Conduit Configuration
# Environment variables (CONDUIT_*) override these settings

[mediation]
main_sequence = "main"
fault_sequence = "fault"
default_endpoint = "orders"
message_timeout_ms = 30000

[cluster]
enabled = false
redis_url = "redis://localhost:6379"
key_prefix = "lb"
cas_retries = 16

[[endpoints]]
name = "orders-a"
address = "http://orders-a.internal/orders"

[[endpoints]]
name = "orders-b"
address = "http://orders-b.internal/orders"
failure_threshold = 3
reset_timeout_ms = 10000

[[load_balancers]]
name = "orders"
endpoints = ["orders-a", "orders-b"]
failover = true

[[sequences]]
name = "main"
on_error = "fault"

[[sequences.mediators]]
kind = "log"
level = "info"
message = "Inbound order"

[[sequences.mediators]]
kind = "switch"
source = "$header:X-Region"
default_sequence = "route-default"

[[sequences.mediators.cases]]
regex = "eu-.*"
sequence = "route-eu"

[[sequences]]
name = "route-eu"

[[sequences.mediators]]
kind = "property"
name = "region"
value = "eu"

[[sequences]]
name = "route-default"

[[sequences.mediators]]
kind = "filter"
expression = "$param:priority = 'high'"

[[sequences.mediators.then]]
kind = "property"
name = "priority"
value = "high"

[[sequences]]
name = "fault"

[[sequences.mediators]]
kind = "log"
level = "error"
message = "Mediation failed"
properties = ["ERROR_CODE", "ERROR_MESSAGE"]

[[sequences.mediators]]
kind = "drop"
"#
        .to_string()
    }
}

fn unique_names<'a>(
    what: &str,
    names: impl Iterator<Item = &'a str>,
) -> Result<HashSet<&'a str>, ConfigError> {
    let mut seen = HashSet::new();
    for name in names {
        if name.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!("{} name must not be empty", what)));
        }
        if !seen.insert(name) {
            return Err(ConfigError::ValidationError(format!("duplicate {} name '{}'", what, name)));
        }
    }
    Ok(seen)
}

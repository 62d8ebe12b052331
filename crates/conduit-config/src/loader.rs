//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::{info, warn};

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "conduit.toml",
    "./config/conduit.toml",
    "/etc/conduit/conduit.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable overrides,
    /// then validate it
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        } else if let Some(path) = &self.config_path {
            return Err(ConfigError::ValidationError(format!(
                "config file {} does not exist",
                path.display()
            )));
        }

        apply_overrides(&mut config, |key| env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Find the configuration file to use
    fn find_config_file(&self) -> Option<PathBuf> {
        // An explicit path is never substituted by a search hit
        if let Some(path) = &self.config_path {
            return path.exists().then(|| path.clone());
        }

        if let Ok(path) = env::var("CONDUIT_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply `CONDUIT_*` overrides read through `lookup`
pub(crate) fn apply_overrides<F>(config: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    // Mediation
    if let Some(val) = lookup("CONDUIT_MAIN_SEQUENCE") {
        config.mediation.main_sequence = val;
    }
    if let Some(val) = lookup("CONDUIT_FAULT_SEQUENCE") {
        config.mediation.fault_sequence = (!val.is_empty()).then_some(val);
    }
    if let Some(val) = lookup("CONDUIT_DEFAULT_ENDPOINT") {
        config.mediation.default_endpoint = (!val.is_empty()).then_some(val);
    }
    if let Some(val) = lookup("CONDUIT_MESSAGE_TIMEOUT_MS") {
        if let Ok(timeout) = val.parse() {
            config.mediation.message_timeout_ms = timeout;
        }
    }

    // Cluster
    if let Some(val) = lookup("CONDUIT_CLUSTER_ENABLED") {
        match parse_flag(&val) {
            Some(enabled) => config.cluster.enabled = enabled,
            None => warn!(value = %val, "Ignoring unrecognised CONDUIT_CLUSTER_ENABLED"),
        }
    }
    if let Some(val) = lookup("CONDUIT_CLUSTER_REDIS_URL") {
        config.cluster.redis_url = val;
    }
    if let Some(val) = lookup("CONDUIT_CLUSTER_KEY_PREFIX") {
        config.cluster.key_prefix = val;
    }
    if let Some(val) = lookup("CONDUIT_CLUSTER_CAS_RETRIES") {
        if let Ok(retries) = val.parse() {
            config.cluster.cas_retries = retries;
        }
    }
}

/// Boolean environment flag: true/1/yes/on or false/0/no/off, any case
fn parse_flag(val: &str) -> Option<bool> {
    match val.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_overrides() {
        let vars = HashMap::from([
            ("CONDUIT_MAIN_SEQUENCE", "entry"),
            ("CONDUIT_FAULT_SEQUENCE", ""),
            ("CONDUIT_CLUSTER_ENABLED", "true"),
            ("CONDUIT_CLUSTER_REDIS_URL", "redis://cache:6379"),
            ("CONDUIT_MESSAGE_TIMEOUT_MS", "not-a-number"),
        ]);

        let mut config = AppConfig::default();
        apply_overrides(&mut config, |key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.mediation.main_sequence, "entry");
        assert_eq!(config.mediation.fault_sequence, None);
        assert!(config.cluster.enabled);
        assert_eq!(config.cluster.redis_url, "redis://cache:6379");
        // unparsable values keep the default
        assert_eq!(config.mediation.message_timeout_ms, 30_000);
    }

    #[test]
    fn test_cluster_flag_spellings() {
        for (val, expected) in [("1", true), ("YES", true), ("on", true), ("0", false), ("No", false)] {
            let mut config = AppConfig::default();
            config.cluster.enabled = !expected;
            apply_overrides(&mut config, |key| {
                (key == "CONDUIT_CLUSTER_ENABLED").then(|| val.to_string())
            });
            assert_eq!(config.cluster.enabled, expected, "value {val}");
        }

        // unrecognised values keep what the file said
        let mut config = AppConfig::default();
        config.cluster.enabled = true;
        apply_overrides(&mut config, |key| {
            (key == "CONDUIT_CLUSTER_ENABLED").then(|| "enabled".to_string())
        });
        assert!(config.cluster.enabled);
    }

    #[test]
    fn test_load_from_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            [mediation]
            main_sequence = "inbound"

            [[sequences]]
            name = "inbound"
            "#
        )
        .unwrap();

        let config = ConfigLoader::with_path(file.path()).load().unwrap();
        assert_eq!(config.sequences[0].name, "inbound");
    }

    #[test]
    fn test_missing_explicit_path_is_an_error() {
        let result = ConfigLoader::with_path("/definitely/not/here/conduit.toml").load();
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_invalid_toml_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[mediation\nmain_sequence = ").unwrap();

        let result = ConfigLoader::with_path(file.path()).load();
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }
}

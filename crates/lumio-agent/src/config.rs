//! Agent configuration.
//!
//! One JSON file, `./config.json` by default. A missing file means "all
//! defaults" and is not an error; an unparseable file is fatal before the
//! orchestrator starts. Section types live with the crates they
//! configure; this struct only composes them.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use lumio_ble::LinkConfig;
use lumio_mqtt::{broker_addr, BridgeConfig};
use lumio_server::ServerConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid mqtt broker '{broker}'")]
    Broker { broker: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    pub server: ServerConfig,
    pub ble: LinkConfig,
    pub mqtt: BridgeConfig,
    pub patterns_dir: PathBuf,
    pub schedules_file: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            ble: LinkConfig::default(),
            mqtt: BridgeConfig::default(),
            patterns_dir: PathBuf::from("./patterns"),
            schedules_file: PathBuf::from("./schedules.json"),
        }
    }
}

impl AgentConfig {
    /// Loads and validates the configuration.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.enabled && broker_addr(&self.mqtt.broker).is_err() {
            return Err(ConfigError::Broker {
                broker: self.mqtt.broker.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = AgentConfig::load(&dir.path().join("config.json")).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.patterns_dir, PathBuf::from("./patterns"));
        assert!(!config.mqtt.enabled);
    }

    #[test]
    fn unparseable_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ definitely not json").unwrap();
        assert!(matches!(
            AgentConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn sections_merge_over_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{
                "server": { "port": 9001 },
                "ble": { "deviceNames": ["MY-STRIP"], "rateLimit": 10.0 },
                "mqtt": { "enabled": true, "broker": "mqtt://broker:1883" },
                "patternsDir": "/data/patterns"
            }"#,
        )
        .unwrap();

        let config = AgentConfig::load(&path).unwrap();
        assert_eq!(config.server.port, 9001);
        assert_eq!(config.ble.device_names, vec!["MY-STRIP"]);
        assert_eq!(config.ble.rate_burst, 25);
        assert!(config.mqtt.enabled);
        assert_eq!(config.patterns_dir, PathBuf::from("/data/patterns"));
        assert_eq!(config.schedules_file, PathBuf::from("./schedules.json"));
    }

    #[test]
    fn enabled_mqtt_with_bad_broker_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{ "mqtt": { "enabled": true, "broker": "mqtt://:nope" } }"#,
        )
        .unwrap();
        assert!(matches!(
            AgentConfig::load(&path),
            Err(ConfigError::Broker { .. })
        ));
    }

    #[test]
    fn disabled_mqtt_skips_broker_validation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "mqtt": { "broker": "mqtt://:nope" } }"#).unwrap();
        assert!(AgentConfig::load(&path).is_ok());
    }
}

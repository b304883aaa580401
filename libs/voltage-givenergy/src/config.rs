//! Client configuration
//!
//! Priority (highest to lowest):
//! 1. Environment variables prefixed `GIVENERGY_` (nested keys split on `__`)
//! 2. Config file (YAML, TOML or JSON, chosen by extension)
//! 3. Default values

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::{
    DEFAULT_MAX_RESYNC_SCAN, DEFAULT_PORT, FIRST_BATTERY_UNIT_ID, INVERTER_UNIT_ID, MAX_BATTERIES,
    MAX_PDU_SIZE,
};
use crate::error::ConfigError;
use crate::types::DeviceIdentity;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "GIVENERGY_";

/// Frame assembler limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FramerConfig {
    /// Largest PDU accepted as plausible
    pub max_pdu_len: usize,
    /// Bytes scanned for a header before dropping a prefix
    pub max_resync_scan: usize,
}

impl Default for FramerConfig {
    fn default() -> Self {
        Self {
            max_pdu_len: MAX_PDU_SIZE,
            max_resync_scan: DEFAULT_MAX_RESYNC_SCAN,
        }
    }
}

/// Logging options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive, e.g. `info` or `info,voltage_givenergy=debug`.
    /// `RUST_LOG` takes precedence when set.
    pub level: String,
    /// Emit JSON lines instead of the bracketed text format
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Data adapter host
    pub host: String,
    pub port: u16,
    pub connect_timeout_ms: u64,
    /// Time allowed for one response after a request was sent
    pub response_timeout_ms: u64,
    pub inverter_unit_id: u8,
    pub battery_unit_ids: Vec<u8>,
    pub framer: FramerConfig,
    pub log: LogConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            connect_timeout_ms: 3000,
            response_timeout_ms: 2000,
            inverter_unit_id: INVERTER_UNIT_ID,
            battery_unit_ids: vec![FIRST_BATTERY_UNIT_ID],
            framer: FramerConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Build the provider chain without extracting
    pub fn figment(path: Option<&Path>) -> Result<Figment, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(ClientConfig::default()));

        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigError::Invalid(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            let extension = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
            figment = match extension {
                "yaml" | "yml" => figment.merge(Yaml::file(path)),
                "toml" => figment.merge(Toml::file(path)),
                "json" => figment.merge(Json::file(path)),
                other => {
                    return Err(ConfigError::Invalid(format!(
                        "unsupported config format '{}': {}",
                        other,
                        path.display()
                    )))
                },
            };
        }

        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Load from defaults, an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment(path)?)
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: ClientConfig = figment.extract()?;
        config.validate()?;
        debug!(
            "Configuration loaded: {}:{}, inverter=0x{:02X}, batteries={:02X?}",
            config.host, config.port, config.inverter_unit_id, config.battery_unit_ids
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid("host must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid("port must not be 0".to_string()));
        }
        if self.connect_timeout_ms == 0 || self.response_timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeouts must be positive".to_string()));
        }
        if self.battery_unit_ids.len() > MAX_BATTERIES {
            return Err(ConfigError::Invalid(format!(
                "at most {} batteries supported, {} configured",
                MAX_BATTERIES,
                self.battery_unit_ids.len()
            )));
        }
        let mut seen = BTreeSet::new();
        for &unit_id in &self.battery_unit_ids {
            if unit_id == self.inverter_unit_id {
                return Err(ConfigError::Invalid(format!(
                    "battery unit id 0x{:02X} clashes with the inverter",
                    unit_id
                )));
            }
            if !seen.insert(unit_id) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate battery unit id 0x{:02X}",
                    unit_id
                )));
            }
        }
        if self.framer.max_pdu_len == 0 || self.framer.max_pdu_len > MAX_PDU_SIZE {
            return Err(ConfigError::Invalid(format!(
                "framer.max_pdu_len must be within 1..={}",
                MAX_PDU_SIZE
            )));
        }
        if self.framer.max_resync_scan == 0 {
            return Err(ConfigError::Invalid(
                "framer.max_resync_scan must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// `host:port` socket address string
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn inverter_identity(&self) -> DeviceIdentity {
        DeviceIdentity(self.inverter_unit_id)
    }

    pub fn battery_identities(&self) -> Vec<DeviceIdentity> {
        self.battery_unit_ids.iter().copied().map(DeviceIdentity).collect()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = ClientConfig::default();
        config.validate().unwrap();
        assert_eq!(config.port, 8899);
        assert_eq!(config.inverter_identity(), DeviceIdentity(0x11));
        assert_eq!(config.battery_identities(), vec![DeviceIdentity(0x32)]);
        assert_eq!(config.address(), "127.0.0.1:8899");
    }

    #[test]
    fn test_load_yaml_overrides_defaults() {
        let file = write_config(
            ".yaml",
            "host: 192.168.1.40\nresponse_timeout_ms: 750\nbattery_unit_ids: [50, 51]\nframer:\n  max_resync_scan: 64\n",
        );
        let config = ClientConfig::from_figment(ClientConfig::figment(Some(file.path())).unwrap()).unwrap();
        assert_eq!(config.host, "192.168.1.40");
        assert_eq!(config.response_timeout(), Duration::from_millis(750));
        assert_eq!(config.battery_unit_ids, vec![0x32, 0x33]);
        assert_eq!(config.framer.max_resync_scan, 64);
        assert_eq!(config.framer.max_pdu_len, MAX_PDU_SIZE);
        assert_eq!(config.port, DEFAULT_PORT);
    }

    #[test]
    fn test_load_toml() {
        let file = write_config(".toml", "port = 502\n\n[log]\nlevel = \"debug\"\njson = true\n");
        let config = ClientConfig::from_figment(ClientConfig::figment(Some(file.path())).unwrap()).unwrap();
        assert_eq!(config.port, 502);
        assert_eq!(config.log.level, "debug");
        assert!(config.log.json);
    }

    #[test]
    fn test_rejects_unknown_format_and_missing_file() {
        let file = write_config(".ini", "port=1\n");
        assert!(matches!(
            ClientConfig::figment(Some(file.path())),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ClientConfig::figment(Some(Path::new("/nonexistent/givenergy.yaml"))),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_validation() {
        let clash = ClientConfig {
            battery_unit_ids: vec![0x32, 0x11],
            ..Default::default()
        };
        assert!(clash.validate().is_err());

        let duplicate = ClientConfig {
            battery_unit_ids: vec![0x32, 0x32],
            ..Default::default()
        };
        assert!(duplicate.validate().is_err());

        let too_many = ClientConfig {
            battery_unit_ids: (0x32..0x39).collect(),
            ..Default::default()
        };
        assert!(too_many.validate().is_err());

        let mut bad_framer = ClientConfig::default();
        bad_framer.framer.max_pdu_len = 300;
        assert!(bad_framer.validate().is_err());

        let zero_timeout = ClientConfig {
            response_timeout_ms: 0,
            ..Default::default()
        };
        assert!(zero_timeout.validate().is_err());
    }

    #[test]
    fn test_invalid_type_is_load_error() {
        let file = write_config(".json", "{\"port\": \"not a number\"}");
        let result = ClientConfig::from_figment(ClientConfig::figment(Some(file.path())).unwrap());
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }
}

//! Configuration for the exporter.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use modsight_engine::bus::RetryPolicy;
use modsight_engine::def::{BlockedRange, DefinitionError, MetricDef};
use modsight_engine::transport::{ConnectSpec, Protocol, SerialSettings};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Validation error: {0}")]
    Definition(#[from] DefinitionError),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP listener settings
    #[serde(default)]
    pub listen: ListenConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Modules that can be scraped
    pub modules: Vec<Module>,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
    /// Address for the scrape and telemetry endpoints (default: 0.0.0.0:9602)
    #[serde(default = "default_listen_address")]
    pub address: String,
}

impl Default for ListenConfig {
    fn default() -> Self {
        ListenConfig {
            address: default_listen_address(),
        }
    }
}

fn default_listen_address() -> String {
    "0.0.0.0:9602".to_string()
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// One scrapeable module: connection parameters plus the metric definitions
/// read from every device it is applied to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    /// Module name, referenced by the scrape endpoint's `module` parameter
    pub name: String,

    /// Wire protocol: "tcp" or "serial"
    pub protocol: Protocol,

    /// Connect and per-read timeout in milliseconds (default: 1000)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Serial line settings; only valid for serial modules
    #[serde(default)]
    pub serial: Option<SerialSettings>,

    /// Maximum register gap bridged by one batched read (default: 5)
    #[serde(default = "default_sensitivity")]
    pub sensitivity: u16,

    /// Scrape retries on serial transport failures (default: 3)
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Pause between retries in milliseconds (default: 100)
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Address gaps a batched read must never bridge
    #[serde(default)]
    pub blocked_ranges: Vec<BlockedRange>,

    /// Metrics to read from the device
    pub metrics: Vec<MetricDef>,
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_sensitivity() -> u16 {
    5
}

fn default_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    100
}

impl Module {
    /// Connection parameters for one target and unit id.
    pub fn connect_spec(&self, target: &str, unit_id: u8) -> ConnectSpec {
        ConnectSpec {
            protocol: self.protocol,
            target: target.to_string(),
            unit_id,
            timeout: Duration::from_millis(self.timeout_ms),
            serial: self.serial.clone().unwrap_or_default(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.retries,
            backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    /// Validate the module's parameters and every definition in it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::Validation(
                "Module name cannot be empty".to_string(),
            ));
        }

        if self.timeout_ms == 0 {
            return Err(ConfigError::Validation(format!(
                "Module '{}': timeout must be positive",
                self.name
            )));
        }

        match self.protocol {
            Protocol::Serial => {
                if let Some(serial) = &self.serial {
                    // Data bits: 5, 6, 7 or 8
                    if !(5..=8).contains(&serial.databits) {
                        return Err(ConfigError::Validation(format!(
                            "Module '{}': invalid data bits value {} (use 5-8)",
                            self.name, serial.databits
                        )));
                    }
                    // Stop bits: 1 or 2
                    if !(1..=2).contains(&serial.stopbits) {
                        return Err(ConfigError::Validation(format!(
                            "Module '{}': invalid stop bits value {} (use 1 or 2)",
                            self.name, serial.stopbits
                        )));
                    }
                }
            }
            Protocol::Tcp => {
                if self.serial.is_some() {
                    return Err(ConfigError::Validation(format!(
                        "Module '{}': tcp modules don't use serial settings",
                        self.name
                    )));
                }
            }
        }

        if self.metrics.is_empty() {
            return Err(ConfigError::Validation(format!(
                "No metric definitions found in module '{}'",
                self.name
            )));
        }

        for def in &self.metrics {
            def.validate()?;
        }

        for range in &self.blocked_ranges {
            range.resolve().map_err(|e| {
                ConfigError::Validation(format!("Module '{}': {}", self.name, e))
            })?;
        }

        Ok(())
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.modules.is_empty() {
            return Err(ConfigError::Validation(
                "At least one module must be configured".to_string(),
            ));
        }

        for (i, module) in self.modules.iter().enumerate() {
            module.validate()?;

            if self.modules[..i].iter().any(|m| m.name == module.name) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate module name '{}'",
                    module.name
                )));
            }
        }

        Ok(())
    }

    /// Look up a module by name.
    pub fn get_module(&self, name: &str) -> Option<&Module> {
        self.modules.iter().find(|module| module.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_tcp_module() {
        let yaml = r#"
modules:
  - name: plant
    protocol: tcp
    metrics:
      - name: boiler_temperature_celsius
        help: Boiler temperature.
        address: 400010
        data_type: int16
        factor: 0.1
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.listen.address, "0.0.0.0:9602");
        let module = config.get_module("plant").unwrap();
        assert_eq!(module.protocol, Protocol::Tcp);
        assert_eq!(module.timeout_ms, 1000);
        assert_eq!(module.sensitivity, 5);
        assert_eq!(module.metrics[0].factor, Some(0.1));
    }

    #[test]
    fn parse_serial_module() {
        use modsight_engine::transport::Parity;

        let yaml = r#"
modules:
  - name: meters
    protocol: serial
    timeout_ms: 500
    serial:
      baudrate: 9600
      parity: odd
    sensitivity: 10
    retries: 5
    retry_backoff_ms: 250
    blocked_ranges:
      - start: 300100
        end: 300119
    metrics:
      - name: energy_watt_hours_total
        address: 300001
        data_type: uint32
        endianness: mixed
        kind: counter
        labels:
          phase: l1
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();

        let module = config.get_module("meters").unwrap();
        let serial = module.serial.as_ref().unwrap();
        assert_eq!(serial.baudrate, 9600);
        assert_eq!(serial.parity, Parity::Odd);
        // unset fields take the serial defaults
        assert_eq!(serial.databits, 8);
        assert_eq!(serial.stopbits, 1);
        assert_eq!(module.retry_policy().retries, 5);
        assert_eq!(
            module.metrics[0].labels.get("phase"),
            Some(&"l1".to_string())
        );
    }

    #[test]
    fn validate_rejects_empty_modules() {
        let yaml = "modules: []\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_duplicate_module_names() {
        let yaml = r#"
modules:
  - name: plant
    protocol: tcp
    metrics:
      - name: a
        address: 300001
        data_type: uint16
  - name: plant
    protocol: tcp
    metrics:
      - name: b
        address: 300002
        data_type: uint16
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation(msg)) if msg.contains("Duplicate")
        ));
    }

    #[test]
    fn validate_rejects_serial_settings_on_tcp() {
        let yaml = r#"
modules:
  - name: plant
    protocol: tcp
    serial:
      baudrate: 9600
    metrics:
      - name: a
        address: 300001
        data_type: uint16
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_serial_parameters() {
        let yaml = r#"
modules:
  - name: meters
    protocol: serial
    serial:
      databits: 9
    metrics:
      - name: a
        address: 300001
        data_type: uint16
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_module_without_metrics() {
        let yaml = r#"
modules:
  - name: plant
    protocol: tcp
    metrics: []
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_surfaces_definition_defects() {
        let yaml = r#"
modules:
  - name: plant
    protocol: tcp
    metrics:
      - name: pump_running
        address: 100001
        data_type: bool
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        // bool without bit_offset
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_malformed_blocked_range() {
        let yaml = r#"
modules:
  - name: plant
    protocol: tcp
    blocked_ranges:
      - start: 300100
        end: 400119
    metrics:
      - name: a
        address: 300001
        data_type: uint16
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_from_file_round_trip() {
        use std::io::Write;

        let yaml = r#"
listen:
  address: 127.0.0.1:9000
modules:
  - name: plant
    protocol: tcp
    metrics:
      - name: a
        address: 300001
        data_type: uint16
"#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let config = Config::load_from_file(file.path()).unwrap();
        assert_eq!(config.listen.address, "127.0.0.1:9000");

        assert!(Config::load_from_file("/does/not/exist.yml").is_err());
    }
}

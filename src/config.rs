//! Configuration system for the simulator.
//!
//! A configuration file sets the scheduler parameters and, optionally,
//! describes a circuit: descriptor libraries to import, device instances and
//! the wires between them.
//!
//! # Configuration File Structure
//!
//! ```yaml
//! simulation:
//!   iteration_cap: 32
//!   queue_capacity: 256
//!   log_level: info
//!   collect_stats: true
//!
//! library:
//!   - devices/
//!
//! devices:
//!   - id: 1
//!     device: led_red
//!   - id: 2
//!     device: uno
//!
//! wires:
//!   - from: "1.anode"
//!     to: "2.D13"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::types::{InstanceId, PinRef};

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown file format: {0}")]
    UnknownFormat(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Scheduler parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationParams {
    /// Propagate/evaluate iterations allowed per tick
    #[serde(default = "default_iteration_cap")]
    pub iteration_cap: usize,

    /// Capacity of the sketch pin-write queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Whether to collect run statistics
    #[serde(default)]
    pub collect_stats: bool,
}

fn default_iteration_cap() -> usize {
    32
}

fn default_queue_capacity() -> usize {
    256
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            iteration_cap: default_iteration_cap(),
            queue_capacity: default_queue_capacity(),
            log_level: default_log_level(),
            collect_stats: false,
        }
    }
}

/// A device instance in the circuit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Instance id, unique within the circuit
    pub id: InstanceId,

    /// Device type id (`device.id` of a registered descriptor)
    pub device: String,
}

/// A wire between two `"<instance>.<pin>"` endpoints.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WireConfig {
    pub from: String,
    pub to: String,
}

impl WireConfig {
    /// Parses both endpoints.
    pub fn endpoints(&self) -> ConfigResult<(PinRef, PinRef)> {
        let parse = |s: &str| {
            s.parse::<PinRef>()
                .map_err(|e| ConfigError::Validation(e.to_string()))
        };
        Ok((parse(&self.from)?, parse(&self.to)?))
    }
}

/// Complete simulator configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    /// Scheduler parameters
    #[serde(default)]
    pub simulation: SimulationParams,

    /// Descriptor files or directories to import
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub library: Vec<PathBuf>,

    /// Device instances
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,

    /// Wires
    #[serde(default)]
    pub wires: Vec<WireConfig>,
}

impl SimConfig {
    /// Creates a new empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Loads configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> ConfigResult<Self> {
        let config: SimConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Loads configuration from a JSON string.
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let config: SimConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a file, auto-detecting format.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        match ext.to_lowercase().as_str() {
            "yaml" | "yml" => Self::from_yaml_file(path),
            "json" => Self::from_json_file(path),
            _ => Err(ConfigError::UnknownFormat(ext.to_string())),
        }
    }

    /// Validates the entire configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.simulation.iteration_cap == 0 {
            return Err(ConfigError::Validation("iteration_cap must be at least 1".to_string()));
        }
        if self.simulation.queue_capacity == 0 {
            return Err(ConfigError::Validation("queue_capacity must be at least 1".to_string()));
        }

        let mut ids = HashSet::new();
        for device in &self.devices {
            if !ids.insert(device.id) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate device instance ID: {}",
                    device.id
                )));
            }
        }

        for wire in &self.wires {
            let (from, to) = wire.endpoints()?;
            for end in [&from, &to] {
                if !ids.contains(&end.instance) {
                    return Err(ConfigError::Validation(format!(
                        "Wire endpoint {} references undeclared instance {}",
                        end, end.instance
                    )));
                }
            }
        }

        Ok(())
    }

    /// Saves configuration to a YAML file.
    pub fn to_yaml_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Saves configuration to a JSON file.
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Converts to YAML string.
    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Converts to JSON string.
    pub fn to_json(&self) -> ConfigResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Finds a device instance by ID.
    pub fn find_device(&self, id: InstanceId) -> Option<&DeviceConfig> {
        self.devices.iter().find(|d| d.id == id)
    }
}

/// Builder for creating SimConfig programmatically.
#[derive(Default)]
pub struct SimConfigBuilder {
    config: SimConfig,
}

impl SimConfigBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-tick iteration cap.
    pub fn iteration_cap(mut self, cap: usize) -> Self {
        self.config.simulation.iteration_cap = cap;
        self
    }

    /// Sets the sketch write queue capacity.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.simulation.queue_capacity = capacity;
        self
    }

    /// Sets the log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.simulation.log_level = level.into();
        self
    }

    /// Enables statistics collection.
    pub fn collect_stats(mut self, enable: bool) -> Self {
        self.config.simulation.collect_stats = enable;
        self
    }

    /// Adds a descriptor file or directory to import.
    pub fn library(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.library.push(path.into());
        self
    }

    /// Adds a device instance.
    pub fn add_device(mut self, id: InstanceId, device: impl Into<String>) -> Self {
        self.config.devices.push(DeviceConfig {
            id,
            device: device.into(),
        });
        self
    }

    /// Adds a wire between two `"<instance>.<pin>"` endpoints.
    pub fn add_wire(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.config.wires.push(WireConfig {
            from: from.into(),
            to: to.into(),
        });
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> ConfigResult<SimConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

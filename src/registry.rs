//! Device library keyed by descriptor id.
//!
//! The registry holds loaded descriptors behind `Arc`s so every instance of
//! a device type shares one immutable copy. Libraries can be imported from
//! `.adev` / `.json` files or whole directories; a descriptor that fails
//! validation is logged and skipped without affecting the others.
//!
//! # Example
//!
//! ```
//! use ardusim::registry::{create_default_registry, DeviceRegistry};
//!
//! let registry = create_default_registry();
//! assert!(registry.contains("led"));
//!
//! let mut custom = DeviceRegistry::new();
//! custom.register_json(ardusim::builtin::NOT_GATE).unwrap();
//! assert_eq!(custom.ids().collect::<Vec<_>>(), vec!["not_gate"]);
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::builtin;
use crate::config::SimConfig;
use crate::descriptor::DeviceDescriptor;
use crate::error::ValidationResult;

/// File extensions imported by [`DeviceRegistry::load_dir`].
pub const DESCRIPTOR_EXTENSIONS: &[&str] = &["adev", "json"];

/// Outcome of a library import.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LoadReport {
    /// Ids of descriptors registered, in load order
    pub loaded: Vec<String>,
    /// Files that failed, with the reason
    pub failed: Vec<(PathBuf, String)>,
}

impl LoadReport {
    /// Appends another report.
    pub fn merge(&mut self, other: LoadReport) {
        self.loaded.extend(other.loaded);
        self.failed.extend(other.failed);
    }

    /// True if nothing failed.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// A library of device descriptors.
#[derive(Clone, Default)]
pub struct DeviceRegistry {
    devices: BTreeMap<String, Arc<DeviceDescriptor>>,
}

impl DeviceRegistry {
    /// Creates a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a descriptor under its `device.id`, replacing any previous
    /// descriptor with that id. Returns the shared handle.
    pub fn register(&mut self, descriptor: DeviceDescriptor) -> Arc<DeviceDescriptor> {
        let descriptor = Arc::new(descriptor);
        let id = descriptor.id().to_string();
        if self.devices.insert(id.clone(), Arc::clone(&descriptor)).is_some() {
            warn!(device = %id, "Replacing registered device");
        }
        descriptor
    }

    /// Parses and registers a descriptor.
    pub fn register_json(&mut self, json: &str) -> ValidationResult<Arc<DeviceDescriptor>> {
        Ok(self.register(DeviceDescriptor::from_json(json)?))
    }

    /// Loads and registers one descriptor file.
    pub fn load_file<P: AsRef<Path>>(&mut self, path: P) -> ValidationResult<Arc<DeviceDescriptor>> {
        let descriptor = DeviceDescriptor::from_file(path.as_ref())?;
        debug!(path = %path.as_ref().display(), device = descriptor.id(), "Loaded descriptor file");
        Ok(self.register(descriptor))
    }

    /// Imports every descriptor file in a directory (not recursive).
    ///
    /// Files are registered in file-name order. Invalid files are logged,
    /// skipped and listed in the report; only an unreadable directory is an
    /// error.
    pub fn load_dir<P: AsRef<Path>>(&mut self, dir: P) -> ValidationResult<LoadReport> {
        let dir = dir.as_ref();
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_descriptor_file(path))
            .collect();
        paths.sort();

        let mut report = LoadReport::default();
        for (path, result) in parse_all(paths) {
            match result {
                Ok(descriptor) => {
                    let descriptor = self.register(descriptor);
                    report.loaded.push(descriptor.id().to_string());
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Skipping invalid descriptor");
                    report.failed.push((path, err.to_string()));
                }
            }
        }

        info!(
            dir = %dir.display(),
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "Device library imported"
        );
        Ok(report)
    }

    /// Imports every `library` entry of a configuration.
    ///
    /// Entries may be files or directories. Failures of any kind are
    /// reported rather than returned.
    pub fn load_library(&mut self, config: &SimConfig) -> LoadReport {
        let mut report = LoadReport::default();
        for path in &config.library {
            if path.is_dir() {
                match self.load_dir(path) {
                    Ok(sub) => report.merge(sub),
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "Cannot read device library");
                        report.failed.push((path.clone(), err.to_string()));
                    }
                }
            } else {
                match self.load_file(path) {
                    Ok(descriptor) => report.loaded.push(descriptor.id().to_string()),
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "Skipping invalid descriptor");
                        report.failed.push((path.clone(), err.to_string()));
                    }
                }
            }
        }
        report
    }

    /// Shared descriptor by device id.
    pub fn get(&self, id: &str) -> Option<&Arc<DeviceDescriptor>> {
        self.devices.get(id)
    }

    /// Returns true if a device id is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.devices.contains_key(id)
    }

    /// Returns the number of registered devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Returns true if no devices are registered.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Registered ids in sorted order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.devices.keys().map(String::as_str)
    }

    /// Descriptors whose `device.category` matches, case-insensitively.
    pub fn by_category<'a>(&'a self, category: &'a str) -> impl Iterator<Item = &'a Arc<DeviceDescriptor>> + 'a {
        self.devices
            .values()
            .filter(move |d| d.category().eq_ignore_ascii_case(category))
    }

    /// Unregisters a device type. Existing instances keep their descriptor.
    pub fn unregister(&mut self, id: &str) -> bool {
        self.devices.remove(id).is_some()
    }

    /// Clears all registered devices.
    pub fn clear(&mut self) {
        self.devices.clear();
    }
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("devices", &self.devices.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn is_descriptor_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| {
            DESCRIPTOR_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

#[cfg(feature = "parallel")]
fn parse_all(paths: Vec<PathBuf>) -> Vec<(PathBuf, ValidationResult<DeviceDescriptor>)> {
    use rayon::prelude::*;

    paths
        .into_par_iter()
        .map(|path| {
            let result = DeviceDescriptor::from_file(&path);
            (path, result)
        })
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn parse_all(paths: Vec<PathBuf>) -> Vec<(PathBuf, ValidationResult<DeviceDescriptor>)> {
    paths
        .into_iter()
        .map(|path| {
            let result = DeviceDescriptor::from_file(&path);
            (path, result)
        })
        .collect()
}

/// Creates a registry holding the built-in devices.
///
/// Includes `led`, `logic_high`, `logic_low`, `clock`, `not_gate`,
/// `and_gate` and `edge_counter`.
pub fn create_default_registry() -> DeviceRegistry {
    let mut registry = DeviceRegistry::new();
    for json in builtin::ALL {
        match DeviceDescriptor::from_json(json) {
            Ok(descriptor) => {
                registry.register(descriptor);
            }
            Err(err) => error!(error = %err, "Built-in descriptor failed to load"),
        }
    }
    registry
}

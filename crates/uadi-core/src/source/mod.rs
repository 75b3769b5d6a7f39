//! Data sources and the device catalog
//!
//! A [`DataSource`] is whatever actually produces bytes for one device: real
//! acquisition hardware, a file replayer, or one of the built-in synthetic
//! generators. The library never interprets what it writes.
//!
//! A [`DeviceCatalog`] enumerates the devices that can be claimed and opens a
//! source for a key. [`ConfigCatalog`] serves the devices listed in
//! [`UadiConfig`](crate::config::UadiConfig); applications with their own
//! hardware plug in their own catalog via `Library::with_catalog`.

pub mod synthetic;

use crate::config::{DeviceProfile, SourceKind, UadiConfig};
use serde::Serialize;
use thiserror::Error;

/// Trait for data producers that fill chunks
pub trait DataSource: Send {
    /// Fill `data` and return the number of bytes written
    ///
    /// Called on the device's producer thread with exclusive access to the
    /// chunk. A short write is fine; an error sends the chunk back to the
    /// free set and reports `INTERNAL_ERROR` through the error callback.
    fn fill(&mut self, data: &mut [u8]) -> Result<usize, SourceError>;
}

impl<F> DataSource for F
where
    F: FnMut(&mut [u8]) -> Result<usize, SourceError> + Send,
{
    fn fill(&mut self, data: &mut [u8]) -> Result<usize, SourceError> {
        self(data)
    }
}

/// Errors reported by a data source
#[derive(Debug, Error)]
pub enum SourceError {
    /// The underlying device went away
    #[error("Device disconnected")]
    Disconnected,

    /// Any other acquisition failure
    #[error("Fill failed: {0}")]
    Failed(String),
}

/// Enumeration entry for one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    /// Identity key used to claim the device
    pub key: String,
    /// Human-readable name
    pub name: String,
    /// Source type (e.g. "ramp", "sine")
    #[serde(rename = "type")]
    pub source_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl From<&DeviceProfile> for DeviceInfo {
    fn from(profile: &DeviceProfile) -> Self {
        Self {
            key: profile.key.clone(),
            name: profile.name.clone(),
            source_type: profile.source.type_name().to_string(),
            description: profile.description.clone(),
        }
    }
}

/// Trait for device enumeration and source creation
pub trait DeviceCatalog: Send + Sync {
    /// Snapshot of the devices that exist right now
    fn devices(&self) -> Vec<DeviceInfo>;

    /// Open a fresh data source for `key`, or None if the key is unknown
    fn open(&self, key: &str) -> Option<Box<dyn DataSource>>;
}

/// Create the built-in source for a configured source kind
pub fn create_source(kind: &SourceKind) -> Box<dyn DataSource> {
    match kind {
        SourceKind::Ramp => Box::new(synthetic::RampSource::new()),
        SourceKind::Sine {
            frequency_hz,
            sample_rate,
        } => Box::new(synthetic::SineSource::new(*frequency_hz, *sample_rate)),
        SourceKind::Constant { value } => Box::new(synthetic::ConstantSource::new(*value)),
    }
}

/// Catalog serving the devices listed in the library configuration
pub struct ConfigCatalog {
    profiles: Vec<DeviceProfile>,
}

impl ConfigCatalog {
    pub fn new(config: &UadiConfig) -> Self {
        let mut profiles: Vec<DeviceProfile> = Vec::with_capacity(config.devices.len());
        for profile in &config.devices {
            if profiles.iter().any(|p| p.key == profile.key) {
                log::warn!("Catalog: Duplicate device key '{}' ignored", profile.key);
                continue;
            }
            profiles.push(profile.clone());
        }
        Self { profiles }
    }
}

impl DeviceCatalog for ConfigCatalog {
    fn devices(&self) -> Vec<DeviceInfo> {
        self.profiles.iter().map(DeviceInfo::from).collect()
    }

    fn open(&self, key: &str) -> Option<Box<dyn DataSource>> {
        self.profiles
            .iter()
            .find(|p| p.key == key)
            .map(|p| create_source(&p.source))
    }
}

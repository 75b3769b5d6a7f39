//! Library configuration schema and loader
//!
//! Configuration is stored as YAML. Default location: `~/.config/uadi/uadi.yaml`
//!
//! ```yaml
//! producer:
//!   idle_backoff_ms: 10
//!   error_backoff_ms: 100
//!   fill_interval_ms: 100
//! devices:
//!   - key: dev-A
//!     name: Ramp generator
//!     source:
//!       type: ramp
//!   - key: dev-B
//!     name: Sine generator
//!     source:
//!       type: sine
//!       frequency_hz: 440.0
//!       sample_rate: 48000
//! ```

mod io;
mod paths;

pub use io::{load_config, save_config, try_load_config};
pub use paths::{default_config_dir, default_config_path, CONFIG_FILE_NAME};

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root library configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UadiConfig {
    /// Producer thread tuning
    pub producer: ProducerConfig,
    /// Data producers exposed by the built-in catalog
    pub devices: Vec<DeviceProfile>,
}

impl Default for UadiConfig {
    fn default() -> Self {
        Self {
            producer: ProducerConfig::default(),
            devices: vec![
                DeviceProfile {
                    key: "dev-A".to_string(),
                    name: "Ramp generator".to_string(),
                    description: Some("Linear ramp of f32 samples".to_string()),
                    source: SourceKind::Ramp,
                },
                DeviceProfile {
                    key: "dev-B".to_string(),
                    name: "Sine generator".to_string(),
                    description: Some("440 Hz sine at 48 kHz".to_string()),
                    source: SourceKind::Sine {
                        frequency_hz: 440.0,
                        sample_rate: 48_000,
                    },
                },
            ],
        }
    }
}

impl UadiConfig {
    /// Look up a device profile by key
    pub fn device(&self, key: &str) -> Option<&DeviceProfile> {
        self.devices.iter().find(|d| d.key == key)
    }
}

/// Producer thread tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    /// How long an idle producer parks when no free chunk is available
    /// (it is woken earlier by `push_chunks`)
    pub idle_backoff_ms: u64,
    /// How long a producer waits after a failed fill before retrying
    pub error_backoff_ms: u64,
    /// Minimum spacing between published chunks (None = fill as fast as possible)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_interval_ms: Option<u64>,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            idle_backoff_ms: 10,
            error_backoff_ms: 100,
            fill_interval_ms: None,
        }
    }
}

impl ProducerConfig {
    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms.max(1))
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms.max(1))
    }

    pub fn fill_interval(&self) -> Option<Duration> {
        self.fill_interval_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

/// Configuration for one data producer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    /// Identity key used to claim the device
    pub key: String,
    /// Human-readable device name
    pub name: String,
    /// Free-form description shown in enumeration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Which built-in source fills this device's chunks
    pub source: SourceKind,
}

/// Built-in synthetic data sources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceKind {
    /// Monotonically increasing f32 counter
    Ramp,
    /// Sine wave
    Sine { frequency_hz: f32, sample_rate: u32 },
    /// Every sample set to `value`
    Constant { value: f32 },
}

impl SourceKind {
    /// Short type name used in enumeration output
    pub fn type_name(&self) -> &'static str {
        match self {
            SourceKind::Ramp => "ramp",
            SourceKind::Sine { .. } => "sine",
            SourceKind::Constant { .. } => "constant",
        }
    }
}

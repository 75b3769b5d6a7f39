//! Registry of claimed devices
//!
//! Maps a device key to the live [`Device`] that owns it. A key can be claimed
//! by at most one handle at a time; the entry disappears when the device is
//! fully released, after which the key can be claimed again.

use crate::chunk::Chunk;
use crate::config::ProducerConfig;
use crate::device::{Device, DeviceHandle, DeviceState};
use crate::error::{ChunkRejection, UadiError};
use crate::source::DataSource;
use crate::wait::WaitCoordinator;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Default)]
pub struct DeviceRegistry {
    devices: Mutex<HashMap<String, Arc<Device>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn devices(&self) -> MutexGuard<'_, HashMap<String, Arc<Device>>> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim `key`, seeding its free set with `chunks` and starting its producer
    ///
    /// `open` is only called once the key is known to be unclaimed. On any
    /// failure the chunks come back inside the rejection.
    pub(crate) fn claim<F>(
        self: &Arc<Self>,
        key: &str,
        open: F,
        chunks: Vec<Chunk>,
        config: ProducerConfig,
        coordinator: Arc<WaitCoordinator>,
    ) -> Result<DeviceHandle, ChunkRejection>
    where
        F: FnOnce() -> Option<Box<dyn DataSource>>,
    {
        // Held across the claim so two callers cannot race for one key
        let mut devices = self.devices();
        if devices.contains_key(key) {
            log::warn!("[Registry] Device '{}' is already claimed", key);
            return Err(ChunkRejection::new(
                UadiError::AlreadyClaimed(key.to_string()),
                chunks,
            ));
        }

        let Some(source) = open() else {
            log::warn!("[Registry] Device '{}' not found", key);
            return Err(ChunkRejection::new(
                UadiError::DeviceNotFound(key.to_string()),
                chunks,
            ));
        };

        let device = Arc::new(Device::new(key.to_string(), coordinator));
        device.claim(chunks, source, config)?;
        devices.insert(key.to_string(), device.clone());

        Ok(DeviceHandle::new(device, Arc::downgrade(self)))
    }

    /// Drop the entry for a released device
    ///
    /// Only removes the entry if it still refers to this exact device, so a
    /// stale handle cannot evict a newer claim of the same key.
    pub(crate) fn remove(&self, device: &Arc<Device>) {
        let mut devices = self.devices();
        if devices
            .get(device.key())
            .is_some_and(|current| Arc::ptr_eq(current, device))
        {
            devices.remove(device.key());
            log::debug!("[Registry] Device '{}' unregistered", device.key());
        }
    }

    /// Whether any claimed device has a filled chunk waiting
    ///
    /// Devices being released are skipped: their leftovers come back through
    /// `try_release`, so they never end a wait.
    pub fn any_has_data(&self) -> bool {
        self.devices()
            .values()
            .any(|device| device.state() == DeviceState::Claimed && device.has_data())
    }

    pub fn is_claimed(&self, key: &str) -> bool {
        self.devices().contains_key(key)
    }

    /// Keys of all claimed devices, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.devices().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<Device>> {
        self.devices().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.devices().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices().is_empty()
    }
}

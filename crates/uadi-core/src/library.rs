//! Library instance
//!
//! Entry point for consumers: enumerate devices, claim them with a set of
//! chunks, and wait for data across every claimed device. Dropping the
//! library releases whatever is still claimed.

use crate::chunk::{Chunk, MIN_CHUNK_SIZE};
use crate::config::{self, UadiConfig};
use crate::device::DeviceHandle;
use crate::error::{ChunkRejection, UadiError, UadiResult};
use crate::registry::DeviceRegistry;
use crate::source::{ConfigCatalog, DeviceCatalog, DeviceInfo};
use crate::wait::{WaitCoordinator, WaitOutcome};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub const LIBRARY_NAME: &str = "UaDI";
pub const LIBRARY_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library metadata as reported by `get_metadata`
#[derive(Debug, Clone, Serialize)]
pub struct LibraryMetadata {
    pub name: &'static str,
    pub version: &'static str,
    pub min_chunk_size: usize,
    pub device_count: usize,
    pub claimed_count: usize,
}

#[derive(Serialize)]
struct EnumeratedDevice {
    #[serde(flatten)]
    info: DeviceInfo,
    claimed: bool,
}

#[derive(Serialize)]
struct Enumeration {
    devices: Vec<EnumeratedDevice>,
}

pub struct Library {
    config: UadiConfig,
    catalog: Box<dyn DeviceCatalog>,
    registry: Arc<DeviceRegistry>,
    coordinator: Arc<WaitCoordinator>,
}

impl Library {
    /// Initialise from the configuration at the default path
    ///
    /// A missing or unreadable config falls back to the built-in devices.
    pub fn init() -> Self {
        Self::from_config_file(&config::default_config_path())
    }

    pub fn from_config_file(path: &Path) -> Self {
        Self::new(config::load_config(path))
    }

    /// Initialise with devices served from `config`
    pub fn new(config: UadiConfig) -> Self {
        let catalog = ConfigCatalog::new(&config);
        Self::with_catalog(config, catalog)
    }

    /// Initialise with a custom device catalog
    ///
    /// `config` still supplies the producer tuning.
    pub fn with_catalog(config: UadiConfig, catalog: impl DeviceCatalog + 'static) -> Self {
        log::info!("[Library] {} {} initialised", LIBRARY_NAME, LIBRARY_VERSION);
        Self {
            config,
            catalog: Box::new(catalog),
            registry: Arc::new(DeviceRegistry::new()),
            coordinator: Arc::new(WaitCoordinator::new()),
        }
    }

    pub fn config(&self) -> &UadiConfig {
        &self.config
    }

    pub fn metadata(&self) -> LibraryMetadata {
        LibraryMetadata {
            name: LIBRARY_NAME,
            version: LIBRARY_VERSION,
            min_chunk_size: MIN_CHUNK_SIZE,
            device_count: self.catalog.devices().len(),
            claimed_count: self.registry.len(),
        }
    }

    /// Write metadata JSON into `buf`, returning the JSON length
    pub fn get_metadata(&self, buf: &mut [u8]) -> UadiResult<usize> {
        write_json(&self.metadata(), buf)
    }

    /// Snapshot of the devices the catalog knows about
    pub fn devices(&self) -> Vec<DeviceInfo> {
        self.catalog.devices()
    }

    /// Write the device enumeration as JSON into `buf`, returning its length
    ///
    /// The snapshot may be stale by the time a device is claimed; that
    /// surfaces as an error from `claim_device`.
    pub fn enumerate(&self, buf: &mut [u8]) -> UadiResult<usize> {
        let devices = self
            .catalog
            .devices()
            .into_iter()
            .map(|info| EnumeratedDevice {
                claimed: self.registry.is_claimed(&info.key),
                info,
            })
            .collect();
        write_json(&Enumeration { devices }, buf)
    }

    /// Claim a device, handing it `chunks` to fill
    ///
    /// Never blocks on another claim of the same key: a claimed key fails
    /// immediately with `AlreadyClaimed`. Every chunk must be at least
    /// `MIN_CHUNK_SIZE` bytes. On failure the chunks are returned.
    pub fn claim_device(&self, key: &str, chunks: Vec<Chunk>) -> Result<DeviceHandle, ChunkRejection> {
        if let Some(short) = chunks.iter().find(|c| c.len() < MIN_CHUNK_SIZE) {
            let error = UadiError::ChunkTooSmall {
                len: short.len(),
                min: MIN_CHUNK_SIZE,
            };
            return Err(ChunkRejection::new(error, chunks));
        }

        self.registry.claim(
            key,
            || self.catalog.open(key),
            chunks,
            self.config.producer.clone(),
            self.coordinator.clone(),
        )
    }

    /// Block until any claimed device has a filled chunk or `timeout` elapses
    ///
    /// Only devices in `Claimed` count; a device that is being released does
    /// not end the wait. A zero timeout checks once without blocking.
    pub fn wait_for_data(&self, timeout: Duration) -> WaitOutcome {
        self.coordinator
            .wait_until(timeout, || self.registry.any_has_data())
    }

    /// One release step for `handle`, see [`DeviceHandle::try_release`]
    pub fn try_release_device(&self, handle: &DeviceHandle) -> Option<Chunk> {
        handle.try_release()
    }

    /// Release `handle` completely, passing every leftover chunk to `callback`
    pub fn release_device(&self, handle: &DeviceHandle, callback: impl FnMut(Chunk)) {
        handle.release_with(callback);
    }

    /// Keys of the currently claimed devices
    pub fn claimed_devices(&self) -> Vec<String> {
        self.registry.keys()
    }

    /// Release every claimed device
    ///
    /// Leftovers go to each device's release callback where one is
    /// registered; the rest are returned.
    pub fn release_all(&self) -> Vec<Chunk> {
        let mut leftovers = Vec::new();
        for device in self.registry.snapshot() {
            let (released, chunks) = device.release_all();
            leftovers.extend(chunks);
            if released {
                self.registry.remove(&device);
            }
        }
        leftovers
    }

    /// Tear the library down, passing leftover chunks to `callback`
    ///
    /// Devices with their own release callback keep using it.
    pub fn release_lib(self, callback: impl FnMut(Chunk)) {
        self.release_all().into_iter().for_each(callback);
        log::info!("[Library] Released");
    }
}

impl Drop for Library {
    fn drop(&mut self) {
        let leftovers = self.release_all();
        if !leftovers.is_empty() {
            log::warn!(
                "[Library] Dropped with {} chunks still held; freeing owned chunks",
                leftovers.len()
            );
        }
    }
}

/// Serialize `value` into `buf` as NUL-terminated JSON
fn write_json<T: Serialize>(value: &T, buf: &mut [u8]) -> UadiResult<usize> {
    if buf.len() < MIN_CHUNK_SIZE {
        return Err(UadiError::BufferTooSmall {
            needed: MIN_CHUNK_SIZE,
            available: buf.len(),
        });
    }

    let json = serde_json::to_vec(value)?;
    if json.len() + 1 > buf.len() {
        return Err(UadiError::BufferTooSmall {
            needed: json.len() + 1,
            available: buf.len(),
        });
    }

    buf[..json.len()].copy_from_slice(&json);
    buf[json.len()] = 0;
    Ok(json.len())
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::config::ProducerConfig;
    use crate::device::DeviceState;
    use crate::error::Status;
    use crate::source::{DataSource, SourceError};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Instant;

    fn fast_config() -> UadiConfig {
        let _ = env_logger::builder().is_test(true).try_init();
        UadiConfig {
            producer: ProducerConfig {
                idle_backoff_ms: 1,
                error_backoff_ms: 1,
                fill_interval_ms: None,
            },
            ..UadiConfig::default()
        }
    }

    fn chunks(n: usize) -> Vec<Chunk> {
        (0..n).map(|_| Chunk::zeroed(MIN_CHUNK_SIZE).unwrap()).collect()
    }

    fn json(buf: &[u8], len: usize) -> serde_json::Value {
        assert_eq!(buf[len], 0);
        serde_json::from_slice(&buf[..len]).unwrap()
    }

    /// Catalog with one device whose fills always fail
    struct FaultyCatalog;

    impl DeviceCatalog for FaultyCatalog {
        fn devices(&self) -> Vec<DeviceInfo> {
            vec![DeviceInfo {
                key: "faulty".into(),
                name: "Faulty".into(),
                source_type: "test".into(),
                description: None,
            }]
        }

        fn open(&self, key: &str) -> Option<Box<dyn DataSource>> {
            (key == "faulty").then(|| {
                Box::new(|_: &mut [u8]| -> Result<usize, SourceError> {
                    Err(SourceError::Disconnected)
                }) as Box<dyn DataSource>
            })
        }
    }

    #[test]
    fn test_enumerate_writes_json() {
        let lib = Library::new(fast_config());
        let mut buf = vec![0u8; MIN_CHUNK_SIZE];
        let len = lib.enumerate(&mut buf).unwrap();
        let value = json(&buf, len);
        let devices = value["devices"].as_array().unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0]["key"], "dev-A");
        assert_eq!(devices[0]["claimed"], false);
    }

    #[test]
    fn test_enumerate_rejects_small_buffer() {
        let lib = Library::new(fast_config());
        let mut buf = vec![0u8; 1024];
        let err = lib.enumerate(&mut buf).unwrap_err();
        assert_eq!(err.status(), Status::BufferTooSmall);
        assert!(lib.get_metadata(&mut buf).is_err());
    }

    #[test]
    fn test_metadata() {
        let lib = Library::new(fast_config());
        let mut buf = vec![0u8; MIN_CHUNK_SIZE];
        let len = lib.get_metadata(&mut buf).unwrap();
        let value = json(&buf, len);
        assert_eq!(value["name"], "UaDI");
        assert_eq!(value["min_chunk_size"], MIN_CHUNK_SIZE);
        assert_eq!(value["device_count"], 2);
    }

    #[test]
    fn test_claim_rejects_small_chunks() {
        let lib = Library::new(fast_config());
        let small = vec![Chunk::zeroed(1024).unwrap()];
        let rejection = lib.claim_device("dev-A", small).unwrap_err();
        assert_eq!(rejection.status(), Status::BufferTooSmall);
        assert_eq!(rejection.chunks.len(), 1);
        assert!(lib.claimed_devices().is_empty());
    }

    #[test]
    fn test_claim_unknown_and_twice() {
        let lib = Library::new(fast_config());
        let rejection = lib.claim_device("dev-Z", chunks(1)).unwrap_err();
        assert_eq!(rejection.status(), Status::Error);

        let handle = lib.claim_device("dev-A", chunks(1)).unwrap();
        let start = Instant::now();
        let rejection = lib.claim_device("dev-A", chunks(1)).unwrap_err();
        assert_eq!(rejection.status(), Status::InvalidHandle);
        assert!(start.elapsed() < Duration::from_secs(1));

        let mut buf = vec![0u8; MIN_CHUNK_SIZE];
        let len = lib.enumerate(&mut buf).unwrap();
        assert_eq!(json(&buf, len)["devices"][0]["claimed"], true);
        handle.release();
    }

    #[test]
    fn test_wait_zero_timeout() {
        let lib = Library::new(fast_config());
        assert_eq!(lib.wait_for_data(Duration::ZERO), WaitOutcome::TimedOut);

        let handle = lib.claim_device("dev-A", chunks(1)).unwrap();
        assert_eq!(lib.wait_for_data(Duration::from_secs(5)), WaitOutcome::DataReady);
        // Data is already there: zero timeout reports it without blocking
        assert_eq!(lib.wait_for_data(Duration::ZERO), WaitOutcome::DataReady);
        handle.release();
    }

    #[test]
    fn test_four_chunk_steady_state() {
        let lib = Library::new(fast_config());
        let initial = chunks(4);
        let addrs: HashSet<usize> = initial.iter().map(Chunk::addr).collect();
        let handle = lib.claim_device("dev-A", initial).unwrap();

        let mut cycles = 0;
        let deadline = Instant::now() + Duration::from_secs(10);
        while cycles < 200 && Instant::now() < deadline {
            if lib.wait_for_data(Duration::from_micros(100_000)) != WaitOutcome::DataReady {
                continue;
            }
            if let Some(chunk) = handle.pop_chunk().unwrap() {
                assert!(addrs.contains(&chunk.addr()));
                assert_eq!(chunk.filled(), MIN_CHUNK_SIZE);

                // Four chunks across free, full and this one
                let (free, full) = handle.queue_depths();
                assert!(free + full <= 3);

                handle.push_chunk(chunk).unwrap();
                cycles += 1;
            }
        }
        assert_eq!(cycles, 200);

        let mut returned = HashSet::new();
        handle.release_with(|chunk| {
            assert!(returned.insert(chunk.addr()));
        });
        assert_eq!(returned, addrs);
        assert_eq!(handle.state(), DeviceState::Released);
    }

    #[test]
    fn test_concurrent_pop_matches_published() {
        let lib = Arc::new(Library::new(fast_config()));
        let handle = lib.claim_device("dev-B", chunks(16)).unwrap();

        let popper = {
            let handle = handle.clone();
            thread::spawn(move || {
                let mut popped = Vec::new();
                for _ in 0..10_000 {
                    if let Some(chunk) = handle.pop_chunk().unwrap() {
                        popped.push(chunk);
                    }
                    if popped.len() == 16 {
                        break;
                    }
                    thread::yield_now();
                }
                popped
            })
        };
        let popped = popper.join().unwrap();

        let mut seen = HashSet::new();
        for chunk in &popped {
            assert!(seen.insert(chunk.addr()), "chunk popped twice");
        }
        let mut leftovers = Vec::new();
        handle.release_with(|chunk| leftovers.push(chunk));
        assert_eq!(popped.len() + leftovers.len(), 16);
        for chunk in &leftovers {
            assert!(seen.insert(chunk.addr()), "chunk both popped and left over");
        }
    }

    #[test]
    fn test_try_release_protocol() {
        let lib = Library::new(fast_config());
        let handle = lib.claim_device("dev-A", chunks(2)).unwrap();
        assert!(handle.wait_for_data(Duration::from_secs(5)).is_ready());

        let mut leftovers = 0;
        while let Some(_chunk) = lib.try_release_device(&handle) {
            assert_eq!(handle.state(), DeviceState::Releasing);
            leftovers += 1;
        }
        assert_eq!(leftovers, 2);
        assert_eq!(handle.state(), DeviceState::Released);
        assert!(lib.try_release_device(&handle).is_none());
        assert!(lib.claimed_devices().is_empty());

        let again = lib.claim_device("dev-A", chunks(1)).unwrap();
        again.release();
    }

    #[test]
    fn test_wait_ignores_releasing_devices() {
        let lib = Library::new(fast_config());
        let handle = lib.claim_device("dev-A", chunks(3)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.queue_depths() != (0, 3) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(handle.queue_depths(), (0, 3));

        assert!(lib.try_release_device(&handle).is_some());
        assert_eq!(handle.state(), DeviceState::Releasing);
        assert!(handle.has_data());
        // Full chunks are still poppable, but no longer end a global wait
        assert_eq!(lib.wait_for_data(Duration::ZERO), WaitOutcome::TimedOut);
        assert_eq!(lib.wait_for_data(Duration::from_millis(20)), WaitOutcome::TimedOut);
        assert!(handle.pop_chunk().unwrap().is_some());

        let mut leftovers = 0;
        while lib.try_release_device(&handle).is_some() {
            leftovers += 1;
        }
        assert_eq!(leftovers, 1);
        assert_eq!(handle.state(), DeviceState::Released);
    }

    #[test]
    fn test_internal_error_is_isolated() {
        let lib = Library::with_catalog(fast_config(), FaultyCatalog);
        let handle = lib.claim_device("faulty", chunks(1)).unwrap();
        let errors = Arc::new(AtomicUsize::new(0));
        {
            let errors = errors.clone();
            handle
                .register_error_callback(move |e| {
                    assert_eq!(e.status(), Status::InternalError);
                    errors.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while errors.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(errors.load(Ordering::SeqCst) > 0);
        assert_eq!(lib.wait_for_data(Duration::ZERO), WaitOutcome::TimedOut);

        // The failed chunk was kept, not lost
        assert_eq!(handle.release().len(), 1);
    }

    #[test]
    fn test_release_lib_returns_everything() {
        let lib = Library::new(fast_config());
        let a = lib.claim_device("dev-A", chunks(3)).unwrap();
        let _b = lib.claim_device("dev-B", chunks(2)).unwrap();
        assert_eq!(lib.claimed_devices(), vec!["dev-A", "dev-B"]);

        let popped = loop {
            if let Some(chunk) = a.pop_chunk().unwrap() {
                break chunk;
            }
            lib.wait_for_data(Duration::from_millis(10));
        };

        let mut returned = 0;
        lib.release_lib(|_| returned += 1);
        assert_eq!(returned, 4);
        assert_eq!(a.state(), DeviceState::Released);
        assert!(a.push_chunk(popped).is_err());
    }
}

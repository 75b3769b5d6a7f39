//! Claimed devices and their lifecycle
//!
//! A device owns one [`ChunkQueue`], one [`Producer`] thread and its
//! callbacks. Its state only moves forward:
//!
//! ```text
//! Unclaimed ──claim──▶ Claimed ──try_release──▶ Releasing ──(drained)──▶ Released
//! ```
//!
//! Release is gated on the queue being empty: `try_release` stops the
//! producer, then hands back one leftover chunk per call (full chunks first,
//! in publish order, then free chunks) and only reports the device released
//! once the library holds none of the consumer's memory.

use crate::chunk::Chunk;
use crate::config::ProducerConfig;
use crate::error::{ChunkRejection, UadiError, UadiResult};
use crate::producer::{panic_message, Producer};
use crate::queue::ChunkQueue;
use crate::registry::DeviceRegistry;
use crate::source::DataSource;
use crate::wait::{WaitCoordinator, WaitOutcome};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, ThreadId};
use std::time::Duration;

/// Receives filled chunks by value (callback-driven delivery)
pub type ReceiveCallback = Arc<dyn Fn(Chunk) + Send + Sync>;
/// Receives internal errors raised on the producer thread
pub type ErrorCallback = Arc<dyn Fn(&UadiError) + Send + Sync>;
/// Receives chunks handed back while a device or library is torn down
pub type ReleaseCallback = Arc<dyn Fn(Chunk) + Send + Sync>;

/// Device lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceState {
    Unclaimed,
    Claimed,
    Releasing,
    Released,
}

#[derive(Default)]
struct Callbacks {
    receive: Option<ReceiveCallback>,
    error: Option<ErrorCallback>,
    release: Option<ReleaseCallback>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between a device and its producer thread
pub(crate) struct DeviceShared {
    key: String,
    queue: ChunkQueue,
    callbacks: Mutex<Callbacks>,
    coordinator: Arc<WaitCoordinator>,
}

impl DeviceShared {
    pub(crate) fn new(key: String, coordinator: Arc<WaitCoordinator>) -> Self {
        Self {
            key,
            queue: ChunkQueue::new(),
            callbacks: Mutex::new(Callbacks::default()),
            coordinator,
        }
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn queue(&self) -> &ChunkQueue {
        &self.queue
    }

    /// Hand a filled chunk to the consumer
    ///
    /// Goes to the receive callback if one is registered, otherwise into
    /// `full` followed by a wake-up of all waiters.
    pub(crate) fn deliver(&self, chunk: Chunk) {
        // Clone out of the lock so the callback may re-enter the device
        let receive = lock(&self.callbacks).receive.clone();
        match receive {
            Some(callback) => {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(chunk))) {
                    log::error!(
                        "[Device {}] Receive callback panicked: {}",
                        self.key,
                        panic_message(&payload)
                    );
                }
            }
            None => {
                self.queue.publish_full(chunk);
                self.coordinator.notify_published();
            }
        }
    }

    /// Forward an internal error to the error callback
    pub(crate) fn report_error(&self, error: UadiError) {
        let callback = lock(&self.callbacks).error.clone();
        if let Some(callback) = callback {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(&error))) {
                log::error!(
                    "[Device {}] Error callback panicked: {}",
                    self.key,
                    panic_message(&payload)
                );
            }
        }
    }

    pub(crate) fn set_error_callback(&self, callback: ErrorCallback) {
        lock(&self.callbacks).error = Some(callback);
    }

    fn set_receive_callback(&self, callback: ReceiveCallback) {
        lock(&self.callbacks).receive = Some(callback);
    }

    fn set_release_callback(&self, callback: ReleaseCallback) {
        lock(&self.callbacks).release = Some(callback);
    }

    fn release_callback(&self) -> Option<ReleaseCallback> {
        lock(&self.callbacks).release.clone()
    }

    fn clear_callbacks(&self) {
        *lock(&self.callbacks) = Callbacks::default();
    }
}

struct Lifecycle {
    state: DeviceState,
    producer: Option<Producer>,
    /// Kept after the producer is taken, so callbacks can be recognised
    producer_thread: Option<ThreadId>,
}

/// Result of one `try_release` step
pub(crate) enum ReleaseStep {
    /// A chunk the library still held; call again
    Leftover(Chunk),
    /// This call completed the release
    Released,
    /// The device was already released (or never claimed)
    Idle,
}

/// One data producer device
pub struct Device {
    shared: Arc<DeviceShared>,
    lifecycle: Mutex<Lifecycle>,
    /// Serializes `try_release` callers so none drains while another is
    /// still stopping the producer
    release_gate: Mutex<()>,
}

impl Device {
    pub(crate) fn new(key: String, coordinator: Arc<WaitCoordinator>) -> Self {
        Self {
            shared: Arc::new(DeviceShared::new(key, coordinator)),
            lifecycle: Mutex::new(Lifecycle {
                state: DeviceState::Unclaimed,
                producer: None,
                producer_thread: None,
            }),
            release_gate: Mutex::new(()),
        }
    }

    pub fn key(&self) -> &str {
        self.shared.key()
    }

    pub fn state(&self) -> DeviceState {
        lock(&self.lifecycle).state
    }

    fn invalid_handle(&self, state: DeviceState) -> UadiError {
        UadiError::InvalidHandle {
            key: self.key().to_string(),
            state,
        }
    }

    /// Seed the free set and start the producer (`Unclaimed → Claimed`)
    pub(crate) fn claim(
        &self,
        chunks: Vec<Chunk>,
        source: Box<dyn DataSource>,
        config: ProducerConfig,
    ) -> Result<(), ChunkRejection> {
        let mut lifecycle = lock(&self.lifecycle);
        if lifecycle.state != DeviceState::Unclaimed {
            return Err(ChunkRejection::new(self.invalid_handle(lifecycle.state), chunks));
        }

        let count = chunks.len();
        self.shared.queue.push_free_batch(chunks);

        match Producer::spawn(self.shared.clone(), source, config) {
            Ok(producer) => {
                lifecycle.producer_thread = producer.thread_id();
                lifecycle.producer = Some(producer);
                lifecycle.state = DeviceState::Claimed;
                log::info!("[Device {}] Claimed with {} chunks", self.key(), count);
                Ok(())
            }
            Err(e) => {
                let mut chunks = Vec::with_capacity(count);
                while let Some(chunk) = self.shared.queue.drain_next() {
                    chunks.push(chunk);
                }
                Err(ChunkRejection::new(e, chunks))
            }
        }
    }

    /// Append chunks to the free set
    ///
    /// Only valid while `Claimed`; otherwise the chunks are handed back.
    pub fn push_chunks(&self, chunks: Vec<Chunk>) -> Result<(), ChunkRejection> {
        let lifecycle = lock(&self.lifecycle);
        if lifecycle.state != DeviceState::Claimed {
            log::warn!(
                "[Device {}] push_chunks rejected in state {:?}",
                self.key(),
                lifecycle.state
            );
            return Err(ChunkRejection::new(self.invalid_handle(lifecycle.state), chunks));
        }

        log::trace!("[Device {}] {} chunks pushed", self.key(), chunks.len());
        self.shared.queue.push_free_batch(chunks);
        if let Some(producer) = &lifecycle.producer {
            producer.wake();
        }
        Ok(())
    }

    /// Pop the oldest filled chunk, or `None` if nothing is waiting
    ///
    /// Valid while `Claimed` or `Releasing`.
    pub fn pop_chunk(&self) -> UadiResult<Option<Chunk>> {
        let state = self.state();
        match state {
            DeviceState::Claimed | DeviceState::Releasing => match self.shared.queue.pop_full() {
                Ok(chunk) => Ok(Some(chunk)),
                Err(UadiError::NoData) => Ok(None),
                Err(e) => Err(e),
            },
            _ => Err(self.invalid_handle(state)),
        }
    }

    /// Whether a filled chunk is waiting
    pub fn has_data(&self) -> bool {
        self.shared.queue.has_data()
    }

    /// Number of chunks in `(free, full)`
    pub fn queue_depths(&self) -> (usize, usize) {
        self.shared.queue.depths()
    }

    /// Block until this device has a filled chunk or `timeout` elapses
    pub fn wait_for_data(&self, timeout: Duration) -> WaitOutcome {
        self.shared
            .coordinator
            .wait_until(timeout, || self.shared.queue.has_data())
    }

    fn ensure_claimed(&self) -> UadiResult<()> {
        let state = self.state();
        if state == DeviceState::Claimed {
            Ok(())
        } else {
            Err(self.invalid_handle(state))
        }
    }

    /// Deliver filled chunks to `callback` instead of queueing them for `pop_chunk`
    pub fn register_receive_callback<F>(&self, callback: F) -> UadiResult<()>
    where
        F: Fn(Chunk) + Send + Sync + 'static,
    {
        self.ensure_claimed()?;
        self.shared.set_receive_callback(Arc::new(callback));
        Ok(())
    }

    /// Report fill failures (`INTERNAL_ERROR`) to `callback`
    pub fn register_error_callback<F>(&self, callback: F) -> UadiResult<()>
    where
        F: Fn(&UadiError) + Send + Sync + 'static,
    {
        self.ensure_claimed()?;
        self.shared.set_error_callback(Arc::new(callback));
        Ok(())
    }

    /// Hand leftover chunks to `callback` when the device is torn down
    /// by `release` or by the library
    pub fn register_release_callback<F>(&self, callback: F) -> UadiResult<()>
    where
        F: Fn(Chunk) + Send + Sync + 'static,
    {
        self.ensure_claimed()?;
        self.shared.set_release_callback(Arc::new(callback));
        Ok(())
    }

    /// Advance the release by one step
    pub(crate) fn try_release(&self) -> ReleaseStep {
        // A callback releasing its own device skips the gate: the gate holder
        // may be joining this very thread, and the producer fills nothing
        // while a callback runs
        let on_producer = lock(&self.lifecycle).producer_thread == Some(thread::current().id());
        let _gate = (!on_producer).then(|| lock(&self.release_gate));

        let producer = {
            let mut lifecycle = lock(&self.lifecycle);
            match lifecycle.state {
                DeviceState::Unclaimed | DeviceState::Released => return ReleaseStep::Idle,
                DeviceState::Claimed => {
                    log::info!("[Device {}] Releasing", self.key());
                    lifecycle.state = DeviceState::Releasing;
                    lifecycle.producer.take()
                }
                DeviceState::Releasing => lifecycle.producer.take(),
            }
        };

        // Join outside the lifecycle lock: callbacks on the producer thread
        // may still call into this device
        if let Some(mut producer) = producer {
            producer.stop();
        }

        if let Some(chunk) = self.shared.queue.drain_next() {
            log::debug!(
                "[Device {}] Returning leftover chunk {:#x}",
                self.key(),
                chunk.addr()
            );
            return ReleaseStep::Leftover(chunk);
        }

        {
            let mut lifecycle = lock(&self.lifecycle);
            if lifecycle.state == DeviceState::Released {
                // Finished by a callback on the producer thread meanwhile
                return ReleaseStep::Idle;
            }
            lifecycle.state = DeviceState::Released;
        }
        self.shared.clear_callbacks();
        log::info!("[Device {}] Released", self.key());
        ReleaseStep::Released
    }

    /// Drive the release to completion, passing every leftover chunk to `sink`
    pub(crate) fn release_into(&self, mut sink: impl FnMut(Chunk)) -> bool {
        loop {
            match self.try_release() {
                ReleaseStep::Leftover(chunk) => sink(chunk),
                ReleaseStep::Released => return true,
                ReleaseStep::Idle => return false,
            }
        }
    }

    /// Drive the release to completion, returning leftovers not taken by the
    /// registered release callback
    pub(crate) fn release_all(&self) -> (bool, Vec<Chunk>) {
        let callback = self.shared.release_callback();
        let mut leftovers = Vec::new();
        let released = self.release_into(|chunk| match &callback {
            Some(callback) => callback(chunk),
            None => leftovers.push(chunk),
        });
        (released, leftovers)
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("key", &self.key())
            .field("state", &self.state())
            .field("queue", &self.queue_depths())
            .finish()
    }
}

/// Consumer handle to a claimed device
///
/// Cheap to clone; all clones refer to the same device. Once the device is
/// released every operation fails with `INVALID_HANDLE` and the key can be
/// claimed again.
#[derive(Clone)]
pub struct DeviceHandle {
    device: Arc<Device>,
    registry: Weak<DeviceRegistry>,
}

impl DeviceHandle {
    pub(crate) fn new(device: Arc<Device>, registry: Weak<DeviceRegistry>) -> Self {
        Self { device, registry }
    }

    pub fn key(&self) -> &str {
        self.device.key()
    }

    pub fn state(&self) -> DeviceState {
        self.device.state()
    }

    /// See [`Device::push_chunks`]
    pub fn push_chunks(&self, chunks: Vec<Chunk>) -> Result<(), ChunkRejection> {
        self.device.push_chunks(chunks)
    }

    /// Push a single chunk back to the free set
    pub fn push_chunk(&self, chunk: Chunk) -> Result<(), ChunkRejection> {
        self.device.push_chunks(vec![chunk])
    }

    /// See [`Device::pop_chunk`]
    pub fn pop_chunk(&self) -> UadiResult<Option<Chunk>> {
        self.device.pop_chunk()
    }

    pub fn has_data(&self) -> bool {
        self.device.has_data()
    }

    pub fn queue_depths(&self) -> (usize, usize) {
        self.device.queue_depths()
    }

    /// See [`Device::wait_for_data`]
    pub fn wait_for_data(&self, timeout: Duration) -> WaitOutcome {
        self.device.wait_for_data(timeout)
    }

    pub fn register_receive_callback<F>(&self, callback: F) -> UadiResult<()>
    where
        F: Fn(Chunk) + Send + Sync + 'static,
    {
        self.device.register_receive_callback(callback)
    }

    pub fn register_error_callback<F>(&self, callback: F) -> UadiResult<()>
    where
        F: Fn(&UadiError) + Send + Sync + 'static,
    {
        self.device.register_error_callback(callback)
    }

    pub fn register_release_callback<F>(&self, callback: F) -> UadiResult<()>
    where
        F: Fn(Chunk) + Send + Sync + 'static,
    {
        self.device.register_release_callback(callback)
    }

    /// Attempt to release the device
    ///
    /// The first call stops the producer. Each call then returns one chunk the
    /// library still holds (`Some`), and keeps the device in `Releasing`,
    /// until nothing is left: that call returns `None`, moves the device to
    /// `Released` and frees its key. Calling again after that is a no-op
    /// returning `None`.
    pub fn try_release(&self) -> Option<Chunk> {
        match self.device.try_release() {
            ReleaseStep::Leftover(chunk) => Some(chunk),
            ReleaseStep::Released => {
                self.unregister();
                None
            }
            ReleaseStep::Idle => None,
        }
    }

    /// Release the device, passing every leftover chunk to `callback`
    pub fn release_with(&self, callback: impl FnMut(Chunk)) {
        if self.device.release_into(callback) {
            self.unregister();
        }
    }

    /// Release the device completely
    ///
    /// Leftover chunks go to the registered release callback; if there is
    /// none they are returned.
    pub fn release(&self) -> Vec<Chunk> {
        let (released, leftovers) = self.device.release_all();
        if released {
            self.unregister();
        }
        leftovers
    }

    fn unregister(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.device);
        }
    }
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.device.fmt(f)
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::chunk::MIN_CHUNK_SIZE;
    use crate::source::SourceError;
    use std::collections::HashSet;
    use std::time::Instant;

    fn chunks(n: usize) -> Vec<Chunk> {
        (0..n).map(|_| Chunk::zeroed(MIN_CHUNK_SIZE).unwrap()).collect()
    }

    fn config() -> ProducerConfig {
        ProducerConfig {
            idle_backoff_ms: 1,
            error_backoff_ms: 1,
            fill_interval_ms: None,
        }
    }

    fn ok_source() -> Box<dyn DataSource> {
        Box::new(|data: &mut [u8]| -> Result<usize, SourceError> {
            data[0] = 0xEE;
            Ok(1)
        })
    }

    /// A source that never produces, so chunks stay in `free`
    fn stuck_source() -> Box<dyn DataSource> {
        Box::new(|_: &mut [u8]| -> Result<usize, SourceError> {
            Err(SourceError::Disconnected)
        })
    }

    fn claimed(n: usize, source: Box<dyn DataSource>) -> Device {
        let device = Device::new("dev-test".into(), Arc::new(WaitCoordinator::new()));
        device.claim(chunks(n), source, config()).unwrap();
        device
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn test_claim_only_from_unclaimed() {
        let device = claimed(1, ok_source());
        assert_eq!(device.state(), DeviceState::Claimed);

        let rejection = device.claim(chunks(2), ok_source(), config()).unwrap_err();
        assert!(matches!(rejection.error, UadiError::InvalidHandle { .. }));
        assert_eq!(rejection.into_chunks().len(), 2);
        device.release_into(drop);
    }

    #[test]
    fn test_every_pushed_chunk_pops_once() {
        let device = claimed(0, ok_source());
        let batch = chunks(8);
        let pushed: HashSet<usize> = batch.iter().map(Chunk::addr).collect();
        device.push_chunks(batch).unwrap();

        let mut popped = HashSet::new();
        assert!(wait_for(|| {
            while let Some(chunk) = device.pop_chunk().unwrap() {
                assert_eq!(chunk.data(), &[0xEE]);
                assert!(popped.insert(chunk.addr()), "chunk popped twice");
            }
            popped.len() == pushed.len()
        }));
        assert_eq!(popped, pushed);
        assert!(device.release_into(drop));
        assert_eq!(device.state(), DeviceState::Released);
    }

    #[test]
    fn test_release_drains_before_released() {
        let device = claimed(3, ok_source());
        assert!(wait_for(|| device.queue_depths() == (0, 3)));

        let mut leftovers = Vec::new();
        loop {
            match device.try_release() {
                ReleaseStep::Leftover(chunk) => {
                    assert_eq!(device.state(), DeviceState::Releasing);
                    leftovers.push(chunk);
                }
                ReleaseStep::Released => break,
                ReleaseStep::Idle => panic!("release stalled"),
            }
        }
        assert_eq!(leftovers.len(), 3);
        assert_eq!(device.state(), DeviceState::Released);
        assert!(matches!(device.try_release(), ReleaseStep::Idle));
    }

    #[test]
    fn test_release_returns_free_chunks_too() {
        let device = claimed(2, stuck_source());
        let mut returned = 0;
        assert!(device.release_into(|_| returned += 1));
        assert_eq!(returned, 2);
    }

    #[test]
    fn test_operations_after_release_are_invalid() {
        let device = claimed(1, ok_source());
        device.release_into(drop);

        let rejection = device.push_chunks(chunks(1)).unwrap_err();
        assert_eq!(rejection.status(), crate::error::Status::InvalidHandle);
        assert_eq!(rejection.chunks.len(), 1);
        assert!(matches!(device.pop_chunk(), Err(UadiError::InvalidHandle { .. })));
        assert!(device.register_error_callback(|_| {}).is_err());
    }

    #[test]
    fn test_push_rejected_while_releasing() {
        let device = claimed(1, ok_source());
        assert!(wait_for(|| device.has_data()));
        let ReleaseStep::Leftover(chunk) = device.try_release() else {
            panic!("expected a leftover chunk");
        };
        assert_eq!(device.state(), DeviceState::Releasing);
        assert!(device.push_chunks(vec![chunk]).is_err());
        // Popping is still allowed while draining
        assert!(device.pop_chunk().unwrap().is_none());
        assert!(matches!(device.try_release(), ReleaseStep::Released));
    }

    #[test]
    fn test_receive_callback_takes_delivery() {
        let device = claimed(0, ok_source());
        let (tx, rx) = std::sync::mpsc::channel();
        device
            .register_receive_callback(move |chunk| {
                let _ = tx.send(chunk);
            })
            .unwrap();

        let batch = chunks(2);
        let addrs: HashSet<usize> = batch.iter().map(Chunk::addr).collect();
        device.push_chunks(batch).unwrap();

        let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let second = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(addrs.contains(&first.addr()) && addrs.contains(&second.addr()));
        // Delivered chunks never enter `full`
        assert_eq!(device.queue_depths(), (0, 0));
        assert!(device.pop_chunk().unwrap().is_none());
        device.release_into(drop);
    }

    #[test]
    fn test_release_callback_receives_leftovers() {
        let device = Arc::new(claimed(2, stuck_source()));
        let handle = DeviceHandle::new(device.clone(), Weak::new());
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        {
            let count = count.clone();
            handle
                .register_release_callback(move |_chunk| {
                    count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                })
                .unwrap();
        }
        assert!(handle.release().is_empty());
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert_eq!(handle.state(), DeviceState::Released);
    }

    #[test]
    fn test_release_from_receive_callback() {
        let device = Arc::new(claimed(0, ok_source()));
        let handle = DeviceHandle::new(device.clone(), Weak::new());
        let (tx, rx) = std::sync::mpsc::channel();
        {
            let handle = handle.clone();
            device
                .register_receive_callback(move |delivered| {
                    // Runs on the producer thread: releasing must not join it
                    let mut leftovers = Vec::new();
                    while let Some(chunk) = handle.try_release() {
                        leftovers.push(chunk);
                    }
                    let _ = tx.send((delivered, leftovers, handle.state()));
                })
                .unwrap();
        }
        device.push_chunks(chunks(2)).unwrap();

        let (delivered, leftovers, state) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(state, DeviceState::Released);
        assert_eq!(leftovers.len(), 1);
        assert_ne!(delivered.addr(), leftovers[0].addr());
        assert_eq!(device.state(), DeviceState::Released);
        assert_eq!(device.queue_depths(), (0, 0));
        assert!(handle.try_release().is_none());
    }

    #[test]
    fn test_callback_release_while_another_thread_releases() {
        let device = Arc::new(claimed(0, ok_source()));
        let handle = DeviceHandle::new(device.clone(), Weak::new());
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        {
            let handle = handle.clone();
            device
                .register_receive_callback(move |delivered| {
                    let _ = entered_tx.send(());
                    // Let the other thread take the gate and start joining us
                    assert!(wait_for(|| handle.state() == DeviceState::Releasing));
                    std::thread::sleep(Duration::from_millis(20));
                    let mut returned = vec![delivered];
                    while let Some(chunk) = handle.try_release() {
                        returned.push(chunk);
                    }
                    let _ = done_tx.send(returned.len());
                })
                .unwrap();
        }
        device.push_chunks(chunks(2)).unwrap();
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let releaser = {
            let handle = handle.clone();
            std::thread::spawn(move || handle.release())
        };
        let in_callback = done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let from_releaser = releaser.join().unwrap();
        assert_eq!(in_callback + from_releaser.len(), 2);
        assert_eq!(device.state(), DeviceState::Released);
    }

    #[test]
    fn test_device_wait_for_data() {
        let device = claimed(0, ok_source());
        assert_eq!(device.wait_for_data(Duration::ZERO), WaitOutcome::TimedOut);
        device.push_chunks(chunks(1)).unwrap();
        assert_eq!(
            device.wait_for_data(Duration::from_secs(5)),
            WaitOutcome::DataReady
        );
        device.release_into(drop);
    }
}

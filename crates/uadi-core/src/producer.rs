//! Producer thread
//!
//! Dedicated thread per claimed device. Takes free chunks, fills them through
//! the device's data source and publishes them as full (or hands them straight
//! to the receive callback when one is registered).
//!
//! Each producer owns a bounded wake channel. When the free set is empty the
//! thread parks in `recv_timeout`, and `push_chunks` wakes it with a
//! `try_send`. The park is bounded by the configured idle backoff, so a missed
//! wake only costs one backoff interval. Stopping drops the sender: every park
//! and pacing sleep then returns `Disconnected` and the loop exits.

use crate::chunk::Chunk;
use crate::config::ProducerConfig;
use crate::device::DeviceShared;
use crate::error::{UadiError, UadiResult};
use crate::source::DataSource;
use flume::{Receiver, RecvTimeoutError, Sender};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Producer thread handle
///
/// Owns the thread join handle and the sending side of its wake channel.
/// When dropped, signals the thread to stop and waits for it.
pub struct Producer {
    /// Dropping the sender disconnects the channel, which stops the thread
    wake_tx: Option<Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
    /// Device key (for logging)
    key: String,
    /// Whether the loop is still running (set to false on exit)
    alive: Arc<AtomicBool>,
}

impl Producer {
    /// Spawn a producer thread for a device
    ///
    /// - `shared`: the device's queue, callbacks and wait coordinator
    /// - `source`: fills chunks for this device
    /// - `config`: backoff and pacing
    pub(crate) fn spawn(
        shared: Arc<DeviceShared>,
        mut source: Box<dyn DataSource>,
        config: ProducerConfig,
    ) -> UadiResult<Self> {
        // One pending wake is enough: the thread drains the free set each time
        let (wake_tx, wake_rx) = flume::bounded::<()>(1);
        let alive = Arc::new(AtomicBool::new(true));
        let key = shared.key().to_string();

        let thread_alive = alive.clone();
        let handle = thread::Builder::new()
            .name(format!("uadi-producer-{}", key))
            .spawn(move || {
                Self::run(&shared, &mut *source, &wake_rx, &config);
                thread_alive.store(false, Ordering::Release);
            })?;

        Ok(Self {
            wake_tx: Some(wake_tx),
            handle: Some(handle),
            key,
            alive,
        })
    }

    /// Check if the producer loop is still running
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Id of the producer thread, until it has been stopped
    pub(crate) fn thread_id(&self) -> Option<thread::ThreadId> {
        self.handle.as_ref().map(|handle| handle.thread().id())
    }

    /// Wake the thread if it is parked waiting for free chunks
    pub fn wake(&self) {
        if let Some(tx) = &self.wake_tx {
            // Full means a wake is already pending
            let _ = tx.try_send(());
        }
    }

    /// Stop the thread and wait for it to exit
    ///
    /// Safe to call more than once. After this returns the thread no longer
    /// holds any chunk: the one it was filling has been published or
    /// returned to the free set.
    ///
    /// When called from the producer thread itself (a receive or error
    /// callback releasing its own device) the thread is not joined. It holds
    /// no chunk while a callback runs and exits as soon as the callback
    /// returns.
    pub fn stop(&mut self) {
        self.wake_tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                log::debug!("[Producer {}] Stopped from its own thread, not joining", self.key);
                return;
            }
            log::debug!("[Producer {}] Waiting for thread to stop...", self.key);
            if handle.join().is_err() {
                log::error!("[Producer {}] Thread panicked", self.key);
            }
        }
    }

    /// Main loop running on the producer thread
    fn run(
        shared: &DeviceShared,
        source: &mut dyn DataSource,
        wake_rx: &Receiver<()>,
        config: &ProducerConfig,
    ) {
        let key = shared.key();
        log::info!("[Producer {}] Thread started", key);

        let idle_backoff = config.idle_backoff();
        let error_backoff = config.error_backoff();
        let fill_interval = config.fill_interval();
        let mut published: u64 = 0;

        while !wake_rx.is_disconnected() {
            let mut chunk = match shared.queue().take_free() {
                Ok(chunk) => chunk,
                Err(_) => {
                    log::trace!("[Producer {}] Out of chunks, parking", key);
                    match wake_rx.recv_timeout(idle_backoff) {
                        Ok(()) | Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            };

            match Self::fill(source, &mut chunk) {
                Ok(filled) => {
                    chunk.set_filled(filled);
                    log::trace!(
                        "[Producer {}] Filled chunk {:#x} ({} bytes)",
                        key,
                        chunk.addr(),
                        filled
                    );
                    shared.deliver(chunk);
                    published += 1;

                    if let Some(interval) = fill_interval {
                        Self::sleep(wake_rx, interval);
                    }
                }
                Err(reason) => {
                    log::error!("[Producer {}] Fill failed: {}", key, reason);
                    // The chunk goes back to free, never lost
                    shared.queue().push_free(chunk);
                    shared.report_error(UadiError::Internal {
                        key: key.to_string(),
                        reason,
                    });
                    Self::sleep(wake_rx, error_backoff);
                }
            }
        }

        log::info!("[Producer {}] Thread stopped ({} chunks published)", key, published);
    }

    /// Sleep for `duration`, returning early only when stopped
    ///
    /// Wakes from `push_chunks` are consumed but do not shorten the sleep.
    fn sleep(wake_rx: &Receiver<()>, duration: Duration) {
        let deadline = Instant::now() + duration;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return;
            }
            match wake_rx.recv_timeout(remaining) {
                Ok(()) => continue,
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => return,
            }
        }
    }

    /// Run the source on one chunk, turning errors and panics into a reason
    fn fill(source: &mut dyn DataSource, chunk: &mut Chunk) -> Result<usize, String> {
        match panic::catch_unwind(AssertUnwindSafe(|| source.fill(chunk.as_mut_slice()))) {
            Ok(Ok(filled)) => Ok(filled),
            Ok(Err(e)) => Err(e.to_string()),
            Err(payload) => Err(format!("source panicked: {}", panic_message(&payload))),
        }
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[allow(clippy::borrowed_box)]
pub(crate) fn panic_message(payload: &Box<dyn Any + Send>) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

//! Blocking wait for published data
//!
//! Every `publish_full` on any device of a library bumps the coordinator's
//! epoch and wakes all waiters. Waiters evaluate their readiness predicate
//! while holding the coordinator lock and only then block, so a publish that
//! lands between the check and the wait cannot be missed:
//!
//! ```text
//! waiter:    lock ─ ready()? ─ wait (unlocks) ─────── wakes ─ ready()? ─ ...
//! producer:           publish_full ─ lock ─ epoch += 1 ─ notify_all ─ unlock
//! ```

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::error::Status;

/// Outcome of a blocking wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// At least one watched device has a filled chunk
    DataReady,
    /// The timeout elapsed with no filled chunk
    TimedOut,
}

impl WaitOutcome {
    /// `Success` or `NoData`, as reported across the C ABI
    pub fn status(self) -> Status {
        match self {
            WaitOutcome::DataReady => Status::Success,
            WaitOutcome::TimedOut => Status::NoData,
        }
    }

    pub fn is_ready(self) -> bool {
        self == WaitOutcome::DataReady
    }
}

/// Condition shared by all devices of one library
#[derive(Default)]
pub struct WaitCoordinator {
    /// Bumped on every publish
    epoch: Mutex<u64>,
    published: Condvar,
}

impl WaitCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake all waiters after a chunk was published
    ///
    /// Must be called after the chunk is visible in its queue.
    pub fn notify_published(&self) {
        let mut epoch = self.epoch.lock().unwrap_or_else(PoisonError::into_inner);
        *epoch = epoch.wrapping_add(1);
        self.published.notify_all();
    }

    /// Number of publishes observed so far
    pub fn epoch(&self) -> u64 {
        *self.epoch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until `ready()` holds or `timeout` elapses
    ///
    /// `ready` is evaluated with the coordinator lock held; it may take queue
    /// and registry locks but must not publish.
    /// A zero timeout checks once and returns immediately.
    pub fn wait_until<F>(&self, timeout: Duration, mut ready: F) -> WaitOutcome
    where
        F: FnMut() -> bool,
    {
        let deadline = Instant::now().checked_add(timeout);
        let mut epoch = self.epoch.lock().unwrap_or_else(PoisonError::into_inner);

        loop {
            if ready() {
                return WaitOutcome::DataReady;
            }

            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                // Timeout too large to represent: wait in long slices
                None => Duration::from_secs(3600),
            };
            if remaining.is_zero() {
                return WaitOutcome::TimedOut;
            }

            epoch = self
                .published
                .wait_timeout(epoch, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_zero_timeout_returns_immediately() {
        let coordinator = WaitCoordinator::new();
        let start = Instant::now();
        assert_eq!(
            coordinator.wait_until(Duration::ZERO, || false),
            WaitOutcome::TimedOut
        );
        assert_eq!(
            coordinator.wait_until(Duration::ZERO, || true),
            WaitOutcome::DataReady
        );
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn test_timeout_elapses() {
        let coordinator = WaitCoordinator::new();
        let start = Instant::now();
        let outcome = coordinator.wait_until(Duration::from_millis(30), || false);
        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert_eq!(outcome.status(), Status::NoData);
    }

    #[test]
    fn test_publish_wakes_waiter() {
        let coordinator = Arc::new(WaitCoordinator::new());
        let flag = Arc::new(AtomicBool::new(false));

        let publisher = {
            let coordinator = coordinator.clone();
            let flag = flag.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                flag.store(true, Ordering::SeqCst);
                coordinator.notify_published();
            })
        };

        let start = Instant::now();
        let outcome = coordinator.wait_until(Duration::from_secs(10), || flag.load(Ordering::SeqCst));
        publisher.join().unwrap();

        assert_eq!(outcome, WaitOutcome::DataReady);
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(coordinator.epoch(), 1);
    }
}

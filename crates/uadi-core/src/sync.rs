//! Lock primitives for the chunk queue, swapped for loom's under the `loom` feature

#[cfg(not(feature = "loom"))]
pub(crate) use std::sync::{Mutex, MutexGuard};

#[cfg(feature = "loom")]
pub(crate) use loom::sync::{Mutex, MutexGuard};

/// Lock a mutex, recovering the guard if a previous holder panicked
///
/// Every critical section guarded this way only moves tokens between
/// collections, so a poisoned lock still holds consistent data.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

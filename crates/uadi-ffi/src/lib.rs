//! C bindings for UaDI
//!
//! Exposes the library through the `uadi.h` ABI (see `include/uadi.h`).
//! Library and device handles are heap-allocated (Box'd) Rust values handed
//! out as opaque pointers. Chunks are consumer memory of exactly
//! [`UADI_CHUNK_SIZE`] bytes: the library borrows them while it owns them
//! and never frees them.
//!
//! # Safety contract
//!
//! * Pointer parameters are checked for null before dereference.
//! * Panics are caught with [`std::panic::catch_unwind`] so they never cross
//!   the FFI boundary; they surface as `UADI_INTERNAL_ERROR`.
//! * A device handle stays valid until `uadi_release_device` frees it, even
//!   after `uadi_try_release_device` has reported the device released.

#![allow(non_camel_case_types)]

use std::ffi::{c_char, c_int, c_void, CStr};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::time::Duration;
use uadi_core::{Chunk, DeviceHandle, DeviceState, Library, Status, UadiError, MIN_CHUNK_SIZE};

pub type uadi_status = c_int;
pub type uadi_lib_handle = *mut c_void;
pub type uadi_device_handle = *mut c_void;
pub type uadi_chunk_ptr = *mut u8;

pub const UADI_SUCCESS: uadi_status = Status::Success as uadi_status;
pub const UADI_ERROR: uadi_status = Status::Error as uadi_status;
pub const UADI_BUFFER_TOO_SMALL: uadi_status = Status::BufferTooSmall as uadi_status;
pub const UADI_INVALID_HANDLE: uadi_status = Status::InvalidHandle as uadi_status;
pub const UADI_NO_DATA: uadi_status = Status::NoData as uadi_status;
pub const UADI_OUT_OF_CHUNKS: uadi_status = Status::OutOfChunks as uadi_status;
pub const UADI_INTERNAL_ERROR: uadi_status = Status::InternalError as uadi_status;

/// Returned by `uadi_try_release_device` when a release step failed
///
/// The device is not released yet; the call may be repeated.
pub const UADI_RELEASE_FAILED: uadi_chunk_ptr = usize::MAX as uadi_chunk_ptr;

/// Size of every chunk crossing the boundary, and of metadata/enumeration buffers
pub const UADI_CHUNK_SIZE: usize = MIN_CHUNK_SIZE;

/// A filled chunk as delivered to the consumer
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct uadi_receive_struct {
    /// Per-chunk info block; always null (no info packs are produced)
    pub infopack_ptr: uadi_chunk_ptr,
    /// The filled chunk
    pub datapack_ptr: uadi_chunk_ptr,
}

pub type uadi_error_callback = Option<unsafe extern "C" fn(uadi_status, *mut c_void)>;
pub type uadi_receive_callback = Option<unsafe extern "C" fn(uadi_receive_struct, *mut c_void)>;
pub type uadi_release_callback = Option<unsafe extern "C" fn(uadi_chunk_ptr, *mut c_void)>;

/// Opaque user pointer passed back to C callbacks
#[derive(Clone, Copy)]
struct UserData(*mut c_void);

// SAFETY: the pointer is only handed back to the consumer's own callbacks;
// making it safe to use from the producer thread is the consumer's contract.
unsafe impl Send for UserData {}
unsafe impl Sync for UserData {}

impl UserData {
    fn get(self) -> *mut c_void {
        self.0
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn status_of(err: &UadiError) -> uadi_status {
    log::debug!("[FFI] {}", err);
    err.status().code()
}

/// Run `f`, turning a panic into `UADI_INTERNAL_ERROR`
fn guard(name: &str, f: impl FnOnce() -> uadi_status) -> uadi_status {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|_| {
        log::error!("[FFI] Panic in {}", name);
        UADI_INTERNAL_ERROR
    })
}

unsafe fn lib_ref<'a>(handle: uadi_lib_handle) -> Option<&'a Library> {
    // SAFETY: non-null handles come from `uadi_init`
    unsafe { (handle as *const Library).as_ref() }
}

unsafe fn device_ref<'a>(handle: uadi_device_handle) -> Option<&'a DeviceHandle> {
    // SAFETY: non-null handles come from `uadi_claim_device`
    unsafe { (handle as *const DeviceHandle).as_ref() }
}

/// Wrap a C chunk array as borrowed chunks
///
/// Fails with `UADI_ERROR` on a null entry. Chunks wrapped before
/// the failure are borrowed, so dropping them leaves the memory untouched.
unsafe fn chunks_from_array(array: *const uadi_chunk_ptr, count: usize) -> Result<Vec<Chunk>, uadi_status> {
    if count == 0 {
        return Ok(Vec::new());
    }
    if array.is_null() {
        return Err(UADI_ERROR);
    }
    // SAFETY: caller passes `count` valid entries
    let ptrs = unsafe { std::slice::from_raw_parts(array, count) };
    ptrs.iter()
        .map(|&p| {
            // SAFETY: each entry points at UADI_CHUNK_SIZE bytes the consumer
            // will not touch until the chunk is handed back
            unsafe { Chunk::from_raw_parts(p, UADI_CHUNK_SIZE) }.map_err(|e| status_of(&e))
        })
        .collect()
}

unsafe fn output_buffer<'a>(buf: uadi_chunk_ptr) -> Option<&'a mut [u8]> {
    if buf.is_null() {
        return None;
    }
    // SAFETY: output buffers are UADI_CHUNK_SIZE bytes by contract
    Some(unsafe { std::slice::from_raw_parts_mut(buf, UADI_CHUNK_SIZE) })
}

fn release_sink(callback: uadi_release_callback, user_data: UserData) -> impl Fn(Chunk) + Send + Sync + 'static {
    move |chunk: Chunk| {
        let ptr = chunk.into_raw();
        match callback {
            // SAFETY: consumer-supplied callback with its own user pointer
            Some(cb) => unsafe { cb(ptr, user_data.get()) },
            None => log::warn!("[FFI] Chunk {:p} released without a release callback", ptr),
        }
    }
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Create a library instance from the default configuration
///
/// # Safety
///
/// `lib_handle` must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn uadi_init(lib_handle: *mut uadi_lib_handle) -> uadi_status {
    guard("uadi_init", || {
        if lib_handle.is_null() {
            return UADI_ERROR;
        }
        let lib = Box::new(Library::init());
        // SAFETY: checked non-null above
        unsafe { *lib_handle = Box::into_raw(lib) as uadi_lib_handle };
        UADI_SUCCESS
    })
}

/// Release every device and destroy the library
///
/// Leftover chunks go to the devices' own release callbacks where registered,
/// otherwise to `callback`. The handle is invalid afterwards.
///
/// # Safety
///
/// `lib_handle` must come from `uadi_init` and not have been released.
#[no_mangle]
pub unsafe extern "C" fn uadi_release_lib(
    lib_handle: uadi_lib_handle,
    callback: uadi_release_callback,
    user_data: *mut c_void,
) -> uadi_status {
    guard("uadi_release_lib", || {
        if lib_handle.is_null() {
            return UADI_INVALID_HANDLE;
        }
        // SAFETY: handle came from `Box::into_raw` in `uadi_init`
        let lib = unsafe { Box::from_raw(lib_handle as *mut Library) };
        (*lib).release_lib(release_sink(callback, UserData(user_data)));
        UADI_SUCCESS
    })
}

// ---------------------------------------------------------------------------
// Enumeration
// ---------------------------------------------------------------------------

/// Write library metadata JSON (NUL-terminated) into `meta_data`
///
/// # Safety
///
/// `meta_data` must point at `UADI_CHUNK_SIZE` writable bytes.
#[no_mangle]
pub unsafe extern "C" fn uadi_get_metadata(lib_handle: uadi_lib_handle, meta_data: uadi_chunk_ptr) -> uadi_status {
    guard("uadi_get_metadata", || {
        let Some(lib) = (unsafe { lib_ref(lib_handle) }) else {
            return UADI_INVALID_HANDLE;
        };
        let Some(buf) = (unsafe { output_buffer(meta_data) }) else {
            return UADI_BUFFER_TOO_SMALL;
        };
        match lib.get_metadata(buf) {
            Ok(_) => UADI_SUCCESS,
            Err(e) => status_of(&e),
        }
    })
}

/// Write the device enumeration JSON (NUL-terminated) into `meta_data`
///
/// # Safety
///
/// `meta_data` must point at `UADI_CHUNK_SIZE` writable bytes.
#[no_mangle]
pub unsafe extern "C" fn uadi_enumerate(lib_handle: uadi_lib_handle, meta_data: uadi_chunk_ptr) -> uadi_status {
    guard("uadi_enumerate", || {
        let Some(lib) = (unsafe { lib_ref(lib_handle) }) else {
            return UADI_INVALID_HANDLE;
        };
        let Some(buf) = (unsafe { output_buffer(meta_data) }) else {
            return UADI_BUFFER_TOO_SMALL;
        };
        match lib.enumerate(buf) {
            Ok(_) => UADI_SUCCESS,
            Err(e) => status_of(&e),
        }
    })
}

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

/// Claim the device `device_key`, handing it `chunk_count` chunks
///
/// # Safety
///
/// `device_handle` must be valid for writes, `device_key` a NUL-terminated
/// string and `chunk_array` must hold `chunk_count` chunk pointers.
#[no_mangle]
pub unsafe extern "C" fn uadi_claim_device(
    lib_handle: uadi_lib_handle,
    device_handle: *mut uadi_device_handle,
    device_key: *const c_char,
    chunk_array: *const uadi_chunk_ptr,
    chunk_count: usize,
) -> uadi_status {
    guard("uadi_claim_device", || {
        let Some(lib) = (unsafe { lib_ref(lib_handle) }) else {
            return UADI_INVALID_HANDLE;
        };
        if device_handle.is_null() || device_key.is_null() {
            return UADI_ERROR;
        }
        // SAFETY: checked non-null above
        let Ok(key) = unsafe { CStr::from_ptr(device_key) }.to_str() else {
            return UADI_ERROR;
        };
        let chunks = match unsafe { chunks_from_array(chunk_array, chunk_count) } {
            Ok(chunks) => chunks,
            Err(status) => return status,
        };

        match lib.claim_device(key, chunks) {
            Ok(handle) => {
                // SAFETY: checked non-null above
                unsafe { *device_handle = Box::into_raw(Box::new(handle)) as uadi_device_handle };
                UADI_SUCCESS
            }
            // Rejected chunks are borrowed memory; dropping them hands them back
            Err(rejection) => status_of(&rejection.error),
        }
    })
}

/// Give chunks back to a claimed device for filling
///
/// # Safety
///
/// `chunk_array` must hold `chunk_count` chunk pointers.
#[no_mangle]
pub unsafe extern "C" fn uadi_push_chunks(
    device_handle: uadi_device_handle,
    chunk_array: *const uadi_chunk_ptr,
    chunk_count: usize,
) -> uadi_status {
    guard("uadi_push_chunks", || {
        let Some(device) = (unsafe { device_ref(device_handle) }) else {
            return UADI_INVALID_HANDLE;
        };
        let chunks = match unsafe { chunks_from_array(chunk_array, chunk_count) } {
            Ok(chunks) => chunks,
            Err(status) => return status,
        };
        match device.push_chunks(chunks) {
            Ok(()) => UADI_SUCCESS,
            Err(rejection) => status_of(&rejection.error),
        }
    })
}

/// Pop the oldest filled chunk into `received`
///
/// Returns `UADI_NO_DATA` when nothing is waiting.
///
/// # Safety
///
/// `received` must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn uadi_pop_chunk(
    device_handle: uadi_device_handle,
    received: *mut uadi_receive_struct,
) -> uadi_status {
    guard("uadi_pop_chunk", || {
        let Some(device) = (unsafe { device_ref(device_handle) }) else {
            return UADI_INVALID_HANDLE;
        };
        if received.is_null() {
            return UADI_ERROR;
        }
        match device.pop_chunk() {
            Ok(Some(chunk)) => {
                let out = uadi_receive_struct {
                    infopack_ptr: ptr::null_mut(),
                    datapack_ptr: chunk.into_raw(),
                };
                // SAFETY: checked non-null above
                unsafe { *received = out };
                UADI_SUCCESS
            }
            Ok(None) => UADI_NO_DATA,
            Err(e) => status_of(&e),
        }
    })
}

/// Block until any claimed device has data or `timeout_us` microseconds pass
///
/// Returns `UADI_SUCCESS` if data is ready, `UADI_NO_DATA` on timeout. A
/// timeout of zero (or negative) polls without blocking.
///
/// # Safety
///
/// `lib_handle` must come from `uadi_init`.
#[no_mangle]
pub unsafe extern "C" fn uadi_wait_blockingly_for_data(lib_handle: uadi_lib_handle, timeout_us: c_int) -> uadi_status {
    guard("uadi_wait_blockingly_for_data", || {
        let Some(lib) = (unsafe { lib_ref(lib_handle) }) else {
            return UADI_INVALID_HANDLE;
        };
        let timeout = Duration::from_micros(u64::try_from(timeout_us).unwrap_or(0));
        lib.wait_for_data(timeout).status().code()
    })
}

/// One release step
///
/// Returns a chunk the library still held (call again), or null once the
/// device is released. `UADI_RELEASE_FAILED` means the step failed before
/// the device was released. The handle must still be freed with
/// `uadi_release_device`.
///
/// # Safety
///
/// `device_handle` must come from `uadi_claim_device`.
#[no_mangle]
pub unsafe extern "C" fn uadi_try_release_device(device_handle: uadi_device_handle) -> uadi_chunk_ptr {
    let step = panic::catch_unwind(AssertUnwindSafe(|| {
        unsafe { device_ref(device_handle) }.and_then(|device| device.try_release())
    }));
    match step {
        Ok(Some(chunk)) => chunk.into_raw(),
        Ok(None) => ptr::null_mut(),
        Err(_) => {
            log::error!("[FFI] Panic in uadi_try_release_device");
            // Null only ever means released
            let released = match unsafe { device_ref(device_handle) } {
                Some(device) => device.state() == DeviceState::Released,
                None => true,
            };
            if released {
                ptr::null_mut()
            } else {
                UADI_RELEASE_FAILED
            }
        }
    }
}

/// Release the device completely and free its handle
///
/// Every leftover chunk goes to the device's registered release callback if
/// there is one, otherwise to `callback`.
///
/// # Safety
///
/// `device_handle` must come from `uadi_claim_device` and not have been freed.
#[no_mangle]
pub unsafe extern "C" fn uadi_release_device(
    device_handle: uadi_device_handle,
    callback: uadi_release_callback,
    user_data: *mut c_void,
) -> uadi_status {
    guard("uadi_release_device", || {
        if device_handle.is_null() {
            return UADI_INVALID_HANDLE;
        }
        // SAFETY: handle came from `Box::into_raw` in `uadi_claim_device`
        let device = unsafe { Box::from_raw(device_handle as *mut DeviceHandle) };
        device.release().into_iter().for_each(release_sink(callback, UserData(user_data)));
        UADI_SUCCESS
    })
}

// ---------------------------------------------------------------------------
// Callbacks
// ---------------------------------------------------------------------------

/// Deliver filled chunks to `callback` on the producer thread
///
/// Replaces `uadi_pop_chunk` for this device; the consumer returns chunks
/// with `uadi_push_chunks`.
///
/// # Safety
///
/// `callback` and `user_data` must be usable from another thread.
#[no_mangle]
pub unsafe extern "C" fn uadi_register_receive_callback(
    device_handle: uadi_device_handle,
    callback: uadi_receive_callback,
    user_data: *mut c_void,
) -> uadi_status {
    guard("uadi_register_receive_callback", || {
        let Some(device) = (unsafe { device_ref(device_handle) }) else {
            return UADI_INVALID_HANDLE;
        };
        let Some(cb) = callback else {
            return UADI_ERROR;
        };
        let user_data = UserData(user_data);
        let result = device.register_receive_callback(move |chunk: Chunk| {
            let received = uadi_receive_struct {
                infopack_ptr: ptr::null_mut(),
                datapack_ptr: chunk.into_raw(),
            };
            // SAFETY: consumer-supplied callback with its own user pointer
            unsafe { cb(received, user_data.get()) };
        });
        match result {
            Ok(()) => UADI_SUCCESS,
            Err(e) => status_of(&e),
        }
    })
}

/// Report internal errors of this device to `callback`
///
/// # Safety
///
/// `callback` and `user_data` must be usable from another thread.
#[no_mangle]
pub unsafe extern "C" fn uadi_register_error_callback(
    device_handle: uadi_device_handle,
    callback: uadi_error_callback,
    user_data: *mut c_void,
) -> uadi_status {
    guard("uadi_register_error_callback", || {
        let Some(device) = (unsafe { device_ref(device_handle) }) else {
            return UADI_INVALID_HANDLE;
        };
        let Some(cb) = callback else {
            return UADI_ERROR;
        };
        let user_data = UserData(user_data);
        let result = device.register_error_callback(move |err: &UadiError| {
            // SAFETY: consumer-supplied callback with its own user pointer
            unsafe { cb(err.status().code(), user_data.get()) };
        });
        match result {
            Ok(()) => UADI_SUCCESS,
            Err(e) => status_of(&e),
        }
    })
}

/// Hand leftover chunks to `callback` when the device or library is released
///
/// # Safety
///
/// `callback` and `user_data` must be usable from another thread.
#[no_mangle]
pub unsafe extern "C" fn uadi_register_release_callback(
    device_handle: uadi_device_handle,
    callback: uadi_release_callback,
    user_data: *mut c_void,
) -> uadi_status {
    guard("uadi_register_release_callback", || {
        let Some(device) = (unsafe { device_ref(device_handle) }) else {
            return UADI_INVALID_HANDLE;
        };
        if callback.is_none() {
            return UADI_ERROR;
        }
        let result = device.register_release_callback(release_sink(callback, UserData(user_data)));
        match result {
            Ok(()) => UADI_SUCCESS,
            Err(e) => status_of(&e),
        }
    })
}

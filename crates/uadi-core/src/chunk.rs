//! Chunk ownership token
//!
//! A `Chunk` is a consumer-provided contiguous buffer of at least
//! [`MIN_CHUNK_SIZE`] bytes. Holding a `Chunk` value *is* holding ownership:
//! the consumer moves it into a device, the producer moves it from `free` to
//! `full`, and `pop_chunk` moves it back out. The library never copies the
//! bytes and never frees the memory.
//!
//! Two kinds of backing memory are supported:
//! - **Boxed**: a `Box<[u8]>` allocated by a Rust consumer (`Chunk::from_boxed`)
//! - **Borrowed**: raw memory owned by foreign code (`Chunk::from_raw_parts`),
//!   used by the C ABI

use crate::error::{UadiError, UadiResult};
use std::fmt;
use std::ptr::NonNull;

/// Minimum size of a chunk in bytes (128 KiB)
pub const MIN_CHUNK_SIZE: usize = 128 * 1024;

/// Exclusive ownership token for one chunk of consumer memory
pub struct Chunk {
    ptr: NonNull<u8>,
    len: usize,
    /// Bytes written by the last fill (0 until filled)
    filled: usize,
    /// True if the memory came from `Box<[u8]>` and is released on drop
    boxed: bool,
}

// SAFETY: a `Chunk` is the unique handle to its memory (it is not `Clone` and
// every constructor requires exclusive access), so moving it between threads
// moves the only way to reach the bytes. Shared references only hand out `&[u8]`.
unsafe impl Send for Chunk {}
unsafe impl Sync for Chunk {}

impl Chunk {
    /// Wrap a consumer-allocated boxed buffer
    ///
    /// Fails with `ChunkTooSmall` if the buffer is below `MIN_CHUNK_SIZE`.
    pub fn from_boxed(buf: Box<[u8]>) -> Result<Self, (UadiError, Box<[u8]>)> {
        if buf.len() < MIN_CHUNK_SIZE {
            let len = buf.len();
            return Err((
                UadiError::ChunkTooSmall {
                    len,
                    min: MIN_CHUNK_SIZE,
                },
                buf,
            ));
        }

        let len = buf.len();
        let raw = Box::into_raw(buf) as *mut u8;
        // Box never hands out a null pointer
        let ptr = NonNull::new(raw).unwrap_or(NonNull::dangling());
        Ok(Self {
            ptr,
            len,
            filled: 0,
            boxed: true,
        })
    }

    /// Allocate a zeroed chunk of `len` bytes on the consumer side
    pub fn zeroed(len: usize) -> UadiResult<Self> {
        Self::from_boxed(vec![0u8; len].into_boxed_slice()).map_err(|(e, _)| e)
    }

    /// Wrap foreign memory without taking over its allocation
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` bytes for as long as
    /// the chunk (or anything it is moved into) exists, and nothing else may
    /// access that memory while this `Chunk` is alive.
    pub unsafe fn from_raw_parts(ptr: *mut u8, len: usize) -> UadiResult<Self> {
        let ptr = NonNull::new(ptr).ok_or(UadiError::NullChunk)?;
        if len < MIN_CHUNK_SIZE {
            return Err(UadiError::ChunkTooSmall {
                len,
                min: MIN_CHUNK_SIZE,
            });
        }
        Ok(Self {
            ptr,
            len,
            filled: 0,
            boxed: false,
        })
    }

    /// Address of the first byte; identifies the chunk
    pub fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    /// Raw pointer to the first byte
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    /// Capacity of the chunk in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false: chunks are at least `MIN_CHUNK_SIZE` bytes
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of bytes written by the last fill
    pub fn filled(&self) -> usize {
        self.filled
    }

    /// The bytes written by the last fill
    pub fn data(&self) -> &[u8] {
        &self.as_slice()[..self.filled]
    }

    /// The whole buffer
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr/len describe memory this chunk exclusively owns
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// The whole buffer, mutably
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: ptr/len describe memory this chunk exclusively owns
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    pub(crate) fn set_filled(&mut self, filled: usize) {
        self.filled = filled.min(self.len);
    }

    /// Whether the memory is a Rust `Box<[u8]>`
    pub fn is_boxed(&self) -> bool {
        self.boxed
    }

    /// Give back the boxed buffer
    ///
    /// Fails (returning the chunk) for borrowed foreign memory.
    pub fn into_boxed(self) -> Result<Box<[u8]>, Self> {
        if !self.boxed {
            return Err(self);
        }
        let this = std::mem::ManuallyDrop::new(self);
        let slice = std::ptr::slice_from_raw_parts_mut(this.ptr.as_ptr(), this.len);
        // SAFETY: built by `Box::into_raw` in `from_boxed`, and `this` is never dropped
        Ok(unsafe { Box::from_raw(slice) })
    }

    /// Give up the token and return the raw pointer
    ///
    /// For borrowed memory this hands the region back to its foreign owner.
    /// For boxed memory the allocation is leaked.
    pub fn into_raw(self) -> *mut u8 {
        let this = std::mem::ManuallyDrop::new(self);
        this.ptr.as_ptr()
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        if self.boxed {
            let slice = std::ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), self.len);
            // SAFETY: built by `Box::into_raw` in `from_boxed`
            drop(unsafe { Box::from_raw(slice) });
        }
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("addr", &format_args!("{:#x}", self.addr()))
            .field("len", &self.len)
            .field("filled", &self.filled)
            .finish()
    }
}

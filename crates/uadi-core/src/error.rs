//! Status codes and error types
//!
//! Every failure maps onto one of the numeric status codes that the C ABI
//! returns, so the Rust API and `uadi.h` report the same thing.

use crate::chunk::Chunk;
use crate::device::DeviceState;
use thiserror::Error;

/// Numeric status codes shared with the C ABI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Status {
    Success = 0,
    Error = -1,
    BufferTooSmall = -2,
    InvalidHandle = -3,
    NoData = -4,
    OutOfChunks = -5,
    InternalError = -255,
}

impl Status {
    /// Raw value as returned across the C ABI
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Map a raw status value back to a `Status`
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Status::Success),
            -1 => Some(Status::Error),
            -2 => Some(Status::BufferTooSmall),
            -3 => Some(Status::InvalidHandle),
            -4 => Some(Status::NoData),
            -5 => Some(Status::OutOfChunks),
            -255 => Some(Status::InternalError),
            _ => None,
        }
    }
}

/// Errors that can occur during library operations
#[derive(Error, Debug)]
pub enum UadiError {
    /// No data producer with this key is known to the catalog
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// The device is already claimed by another handle
    #[error("Device '{0}' is already claimed")]
    AlreadyClaimed(String),

    /// Operation is not valid in the device's current lifecycle state
    #[error("Invalid handle for device '{key}' (state: {state:?})")]
    InvalidHandle { key: String, state: DeviceState },

    /// Output buffer cannot hold the result
    #[error("Buffer too small: need {needed} bytes, got {available}")]
    BufferTooSmall { needed: usize, available: usize },

    /// Chunk is below the minimum chunk size
    #[error("Chunk of {len} bytes is below the minimum of {min} bytes")]
    ChunkTooSmall { len: usize, min: usize },

    /// A null pointer was handed in as a chunk
    #[error("Null chunk pointer")]
    NullChunk,

    /// No filled chunk is waiting
    #[error("No data available")]
    NoData,

    /// No free chunk is available to fill
    #[error("Out of chunks")]
    OutOfChunks,

    /// The data source failed while filling a chunk
    #[error("Internal error on device '{key}': {reason}")]
    Internal { key: String, reason: String },

    /// Failed to spawn the producer thread
    #[error("Failed to spawn producer thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// Failed to serialize enumeration or metadata output
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl UadiError {
    /// Status code reported for this error across the C ABI
    pub fn status(&self) -> Status {
        match self {
            UadiError::DeviceNotFound(_) => Status::Error,
            UadiError::AlreadyClaimed(_) => Status::InvalidHandle,
            UadiError::InvalidHandle { .. } => Status::InvalidHandle,
            UadiError::BufferTooSmall { .. } => Status::BufferTooSmall,
            UadiError::ChunkTooSmall { .. } => Status::BufferTooSmall,
            UadiError::NullChunk => Status::Error,
            UadiError::NoData => Status::NoData,
            UadiError::OutOfChunks => Status::OutOfChunks,
            UadiError::Internal { .. } => Status::InternalError,
            UadiError::Spawn(_) => Status::Error,
            UadiError::Serialization(_) => Status::Error,
        }
    }
}

/// Result type for library operations
pub type UadiResult<T> = Result<T, UadiError>;

/// A failed chunk hand-over
///
/// Returned by operations that take ownership of chunks (`claim`, `push_chunks`)
/// when they fail, so the chunks go back to the caller instead of being dropped.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct ChunkRejection {
    /// Why the chunks were rejected
    pub error: UadiError,
    /// The rejected chunks, in the order they were handed in
    pub chunks: Vec<Chunk>,
}

impl ChunkRejection {
    pub(crate) fn new(error: UadiError, chunks: Vec<Chunk>) -> Self {
        Self { error, chunks }
    }

    /// Status code of the underlying error
    pub fn status(&self) -> Status {
        self.error.status()
    }

    /// Take the rejected chunks back
    pub fn into_chunks(self) -> Vec<Chunk> {
        self.chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_match_header() {
        assert_eq!(Status::Success.code(), 0);
        assert_eq!(Status::Error.code(), -1);
        assert_eq!(Status::BufferTooSmall.code(), -2);
        assert_eq!(Status::InvalidHandle.code(), -3);
        assert_eq!(Status::NoData.code(), -4);
        assert_eq!(Status::OutOfChunks.code(), -5);
        assert_eq!(Status::InternalError.code(), -255);
    }

    #[test]
    fn test_from_code() {
        assert_eq!(Status::from_code(-3), Some(Status::InvalidHandle));
        assert_eq!(Status::from_code(-255), Some(Status::InternalError));
        assert_eq!(Status::from_code(42), None);
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(UadiError::AlreadyClaimed("dev-A".into()).status(), Status::InvalidHandle);
        assert_eq!(UadiError::DeviceNotFound("nope".into()).status(), Status::Error);
        assert_eq!(
            UadiError::ChunkTooSmall { len: 1, min: 2 }.status(),
            Status::BufferTooSmall
        );
        assert_eq!(UadiError::NullChunk.status(), Status::Error);
        let internal = UadiError::Internal {
            key: "dev-A".into(),
            reason: "boom".into(),
        };
        assert_eq!(internal.status(), Status::InternalError);
        assert_eq!(internal.to_string(), "Internal error on device 'dev-A': boom");
    }
}

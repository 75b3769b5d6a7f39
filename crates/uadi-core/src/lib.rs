//! UaDI: Unified Abstract Dataproducer Interface
//!
//! Streams data from producer devices into memory owned by the consumer,
//! without copying. The consumer allocates fixed-size chunks and hands them to
//! a device; the device's producer thread fills them and hands them back.
//!
//! # Architecture
//!
//! ```text
//! consumer ──claim/push──▶ free ──producer fills──▶ full ──pop──▶ consumer
//!                                       │
//!                                       └──▶ receive callback (if registered)
//! ```
//!
//! - [`Library`] owns the device registry and the wait coordinator
//! - [`DeviceHandle`] is the consumer's handle to one claimed device
//! - [`Chunk`] is an ownership token for one consumer buffer: whoever holds
//!   it may touch the bytes, nobody else
//! - [`DataSource`] / [`DeviceCatalog`] plug in the actual data producers
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use uadi_core::{Chunk, Library, MIN_CHUNK_SIZE};
//!
//! let lib = Library::init();
//! let chunks = (0..4)
//!     .map(|_| Chunk::zeroed(MIN_CHUNK_SIZE))
//!     .collect::<Result<Vec<_>, _>>()?;
//! let device = lib.claim_device("dev-A", chunks).map_err(|r| r.error)?;
//!
//! if lib.wait_for_data(Duration::from_millis(100)).is_ready() {
//!     if let Some(chunk) = device.pop_chunk()? {
//!         println!("{} bytes", chunk.filled());
//!         device.push_chunk(chunk).map_err(|r| r.error)?;
//!     }
//! }
//! device.release();
//! # Ok::<(), uadi_core::UadiError>(())
//! ```

pub mod chunk;
pub mod config;
pub mod device;
pub mod error;
pub mod library;
pub mod producer;
pub mod queue;
pub mod registry;
pub mod source;
mod sync;
pub mod wait;

pub use chunk::{Chunk, MIN_CHUNK_SIZE};
pub use config::{DeviceProfile, ProducerConfig, SourceKind, UadiConfig};
pub use device::{DeviceHandle, DeviceState, ErrorCallback, ReceiveCallback, ReleaseCallback};
pub use error::{ChunkRejection, Status, UadiError, UadiResult};
pub use library::{Library, LibraryMetadata, LIBRARY_NAME, LIBRARY_VERSION};
pub use queue::ChunkQueue;
pub use source::{ConfigCatalog, DataSource, DeviceCatalog, DeviceInfo, SourceError};
pub use wait::{WaitCoordinator, WaitOutcome};

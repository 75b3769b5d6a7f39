//! Per-device chunk queue
//!
//! Holds ownership tokens for the chunks a device currently owns, split into
//! two disjoint sets:
//!
//! ```text
//! consumer ──push_free──▶ [free] ──take_free──▶ producer (filling)
//!                                                   │
//! consumer ◀──pop_full── [full] ◀──publish_full─────┘
//! ```
//!
//! A single mutex guards both sets and is held only for the O(1) move, so
//! every operation is linearizable with respect to the others. Both sets are
//! FIFO: chunks are filled in the order they were pushed and popped in the
//! order they were published.

use crate::chunk::Chunk;
use crate::error::{UadiError, UadiResult};
use crate::sync::{lock, Mutex};
use std::collections::VecDeque;

#[derive(Default)]
struct Sets {
    free: VecDeque<Chunk>,
    full: VecDeque<Chunk>,
}

impl Sets {
    #[cfg(debug_assertions)]
    fn holds(&self, addr: usize) -> bool {
        self.free.iter().chain(self.full.iter()).any(|c| c.addr() == addr)
    }
}

/// Free/full chunk sets for one device
pub struct ChunkQueue {
    sets: Mutex<Sets>,
}

impl Default for ChunkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkQueue {
    pub fn new() -> Self {
        Self {
            sets: Mutex::new(Sets::default()),
        }
    }

    /// Hand a chunk to the queue for filling
    pub fn push_free(&self, chunk: Chunk) {
        let mut sets = lock(&self.sets);
        #[cfg(debug_assertions)]
        debug_assert!(!sets.holds(chunk.addr()), "chunk {:#x} pushed twice", chunk.addr());
        sets.free.push_back(chunk);
    }

    /// Hand a batch of chunks to the queue, preserving batch order
    pub fn push_free_batch(&self, chunks: impl IntoIterator<Item = Chunk>) {
        let mut sets = lock(&self.sets);
        for chunk in chunks {
            #[cfg(debug_assertions)]
            debug_assert!(!sets.holds(chunk.addr()), "chunk {:#x} pushed twice", chunk.addr());
            sets.free.push_back(chunk);
        }
    }

    /// Take the next free chunk for filling
    ///
    /// Returns `OutOfChunks` if the free set is empty.
    pub fn take_free(&self) -> UadiResult<Chunk> {
        lock(&self.sets).free.pop_front().ok_or(UadiError::OutOfChunks)
    }

    /// Publish a filled chunk (one previously obtained from `take_free`)
    pub fn publish_full(&self, chunk: Chunk) {
        let mut sets = lock(&self.sets);
        #[cfg(debug_assertions)]
        debug_assert!(!sets.holds(chunk.addr()), "chunk {:#x} published while queued", chunk.addr());
        sets.full.push_back(chunk);
    }

    /// Pop the oldest filled chunk
    ///
    /// Returns `NoData` if nothing has been published.
    pub fn pop_full(&self) -> UadiResult<Chunk> {
        lock(&self.sets).full.pop_front().ok_or(UadiError::NoData)
    }

    /// Remove the next chunk the queue still owns, full chunks first
    ///
    /// Used while draining a device on release.
    pub fn drain_next(&self) -> Option<Chunk> {
        let mut sets = lock(&self.sets);
        sets.full.pop_front().or_else(|| sets.free.pop_front())
    }

    /// Whether at least one filled chunk is waiting
    pub fn has_data(&self) -> bool {
        !lock(&self.sets).full.is_empty()
    }

    /// Whether both sets are empty
    pub fn is_empty(&self) -> bool {
        let sets = lock(&self.sets);
        sets.free.is_empty() && sets.full.is_empty()
    }

    /// Number of chunks in `(free, full)`, taken atomically
    pub fn depths(&self) -> (usize, usize) {
        let sets = lock(&self.sets);
        (sets.free.len(), sets.full.len())
    }

    /// Addresses held in `(free, full)`, taken atomically
    pub fn snapshot(&self) -> (Vec<usize>, Vec<usize>) {
        let sets = lock(&self.sets);
        (
            sets.free.iter().map(Chunk::addr).collect(),
            sets.full.iter().map(Chunk::addr).collect(),
        )
    }
}

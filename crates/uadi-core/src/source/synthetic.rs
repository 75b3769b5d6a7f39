//! Built-in synthetic sources
//!
//! Each source writes little-endian `f32` samples and fills the whole chunk
//! (rounded down to a whole sample). State carries across fills, so
//! consecutive chunks continue the same signal.

use super::{DataSource, SourceError};
use std::f32::consts::TAU;

const SAMPLE_BYTES: usize = std::mem::size_of::<f32>();

/// Write samples produced by `next` into `data`, returning bytes written
fn write_samples(data: &mut [u8], mut next: impl FnMut() -> f32) -> usize {
    let mut written = 0;
    for sample in data.chunks_exact_mut(SAMPLE_BYTES) {
        sample.copy_from_slice(&next().to_le_bytes());
        written += SAMPLE_BYTES;
    }
    written
}

/// Monotonically increasing counter
///
/// Wraps back to zero at 2^24, the last integer an f32 represents exactly.
#[derive(Debug, Default)]
pub struct RampSource {
    counter: u32,
}

impl RampSource {
    const WRAP: u32 = 1 << 24;

    pub fn new() -> Self {
        Self::default()
    }
}

impl DataSource for RampSource {
    fn fill(&mut self, data: &mut [u8]) -> Result<usize, SourceError> {
        Ok(write_samples(data, || {
            let value = self.counter as f32;
            self.counter = (self.counter + 1) % Self::WRAP;
            value
        }))
    }
}

/// Sine wave with continuous phase across chunks
#[derive(Debug)]
pub struct SineSource {
    phase: f32,
    step: f32,
}

impl SineSource {
    pub fn new(frequency_hz: f32, sample_rate: u32) -> Self {
        let step = if sample_rate == 0 {
            0.0
        } else {
            TAU * frequency_hz / sample_rate as f32
        };
        Self { phase: 0.0, step }
    }
}

impl DataSource for SineSource {
    fn fill(&mut self, data: &mut [u8]) -> Result<usize, SourceError> {
        Ok(write_samples(data, || {
            let value = self.phase.sin();
            self.phase = (self.phase + self.step) % TAU;
            value
        }))
    }
}

/// Every sample set to the same value
#[derive(Debug)]
pub struct ConstantSource {
    value: f32,
}

impl ConstantSource {
    pub fn new(value: f32) -> Self {
        Self { value }
    }
}

impl DataSource for ConstantSource {
    fn fill(&mut self, data: &mut [u8]) -> Result<usize, SourceError> {
        let value = self.value;
        Ok(write_samples(data, || value))
    }
}

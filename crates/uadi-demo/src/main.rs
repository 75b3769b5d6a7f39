//! UaDI demo consumer
//!
//! Allocates a pool of chunks, claims one device and keeps the chunks
//! cycling: wait for data, pop a chunk, inspect it, push it back. Releases
//! the device and the library on exit.
//!
//! ## Command line flags
//!
//! - `--device <key>`: device to claim (default: `dev-A`)
//! - `--chunks <n>`: number of chunks to allocate (default: 128)
//! - `--iterations <n>`: chunks to consume before exiting (default: 1000)
//! - `--config <path>`: config file (default: `~/.config/uadi/uadi.yaml`)
//! - `--list`: print the device enumeration and exit

use anyhow::{anyhow, bail, Context, Result};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use uadi_core::{Chunk, Library, WaitOutcome, MIN_CHUNK_SIZE};

const WAIT_TIMEOUT: Duration = Duration::from_millis(100);

struct Args {
    device: String,
    chunks: usize,
    iterations: u64,
    config: Option<PathBuf>,
    list: bool,
}

impl Args {
    fn parse() -> Result<Self> {
        let mut args = Args {
            device: "dev-A".to_string(),
            chunks: 128,
            iterations: 1000,
            config: None,
            list: false,
        };

        let mut iter = std::env::args().skip(1);
        while let Some(arg) = iter.next() {
            let mut value = || iter.next().ok_or_else(|| anyhow!("{} needs a value", arg));
            match arg.as_str() {
                "--device" => args.device = value()?,
                "--chunks" => args.chunks = value()?.parse().context("--chunks")?,
                "--iterations" => args.iterations = value()?.parse().context("--iterations")?,
                "--config" => args.config = Some(PathBuf::from(value()?)),
                "--list" => args.list = true,
                other => bail!("Unknown argument: {}", other),
            }
        }
        if args.chunks == 0 {
            bail!("--chunks must be at least 1");
        }
        Ok(args)
    }
}

/// First little-endian f32 sample of a chunk, if any
fn first_sample(chunk: &Chunk) -> Option<f32> {
    let bytes = chunk.data().get(..4)?;
    Some(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn main() -> Result<()> {
    // Set RUST_LOG=debug for verbose output
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = Args::parse()?;
    let lib = match &args.config {
        Some(path) => Library::from_config_file(path),
        None => Library::init(),
    };

    let mut buf = vec![0u8; MIN_CHUNK_SIZE];
    let len = lib.enumerate(&mut buf).context("Failed to enumerate devices")?;
    let listing = std::str::from_utf8(&buf[..len]).context("Enumeration is not UTF-8")?;
    if args.list {
        println!("{}", listing);
        return Ok(());
    }
    log::info!("Devices: {}", listing);

    let chunks = (0..args.chunks)
        .map(|_| Chunk::zeroed(MIN_CHUNK_SIZE))
        .collect::<Result<Vec<_>, _>>()?;
    let device = lib
        .claim_device(&args.device, chunks)
        .map_err(|rejection| rejection.error)
        .with_context(|| format!("Failed to claim '{}'", args.device))?;
    log::info!("Claimed '{}' with {} chunks", device.key(), args.chunks);

    let start = Instant::now();
    let mut consumed: u64 = 0;
    let mut bytes: u64 = 0;
    while consumed < args.iterations {
        if lib.wait_for_data(WAIT_TIMEOUT) == WaitOutcome::TimedOut {
            log::debug!("No data within {:?}", WAIT_TIMEOUT);
            continue;
        }

        while let Some(chunk) = device.pop_chunk()? {
            consumed += 1;
            bytes += chunk.filled() as u64;
            log::debug!(
                "Got chunk {:#x}: {} bytes, first sample {:?}",
                chunk.addr(),
                chunk.filled(),
                first_sample(&chunk)
            );
            device.push_chunk(chunk).map_err(|rejection| rejection.error)?;
        }
    }

    let elapsed = start.elapsed().as_secs_f64();
    log::info!(
        "Consumed {} chunks ({:.1} MiB) in {:.2}s",
        consumed,
        bytes as f64 / (1024.0 * 1024.0),
        elapsed
    );

    let leftovers = device.release();
    log::info!("Released '{}', {} chunks returned", args.device, leftovers.len());
    lib.release_lib(drop);
    Ok(())
}

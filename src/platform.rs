//! The PC side of the program: host randomness, and the devices it can talk to.

use std::path::Path;

use anyhow::Context as _;
use chacha20::ChaCha8Rng;
use rand_core::{OsRng, SeedableRng};

use crate::Result;

pub mod emulator;

/// What the getpass flow runs on.
pub struct Platform {
    pub transport: emulator::Emulator,
    pub rng: ChaCha8Rng,
}

pub fn init_platform(device_dir: impl AsRef<Path>) -> Result<Platform> {
    let rng = host_rng()?;
    let transport = emulator::Emulator::new(device_dir);

    Ok(Platform { transport, rng })
}

/// ChaCha8, seeded from the operating system.
pub fn host_rng() -> Result<ChaCha8Rng> {
    ChaCha8Rng::from_rng(OsRng).context("cannot seed the host RNG")
}

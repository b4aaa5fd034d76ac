//! Shared helpers for scenario tests.

#![allow(dead_code)] // Not every helper is used by every scenario file

use rtstream_common::error::RtResult;
use rtstream_common::time::Timespec;
use rtstream_runtime::clock::SimulatedClock;
use rtstream_runtime::periodic::CycleBody;
use std::io::Write;
use tempfile::NamedTempFile;

/// Wraps a body and charges a fixed execution time to the simulated clock.
pub struct Timed<B> {
    pub body: B,
    pub clock: SimulatedClock,
    pub cost: Timespec,
}

impl<B: CycleBody> CycleBody for Timed<B> {
    fn run_cycle(&mut self) -> RtResult<()> {
        self.clock.advance(self.cost);
        self.body.run_cycle()
    }
}

/// A source file holding `chunks` chunks; chunk `n` is filled with byte `n + 1`.
pub fn chunked_source(chunks: u8, chunk_size: usize) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create source file");
    for n in 1..=chunks {
        file.write_all(&vec![n; chunk_size]).expect("write chunk");
    }
    file.flush().expect("flush source");
    file
}

/// Check if running as root (required for RT priority).
pub fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions.
    unsafe { libc::geteuid() == 0 }
}

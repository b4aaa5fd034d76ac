//! Lowest-priority task: prints the playback state.

use crate::pause::PauseState;
use crate::periodic::CycleBody;
use rtstream_common::error::{Endpoint, RtError, RtResult};
use std::io::Write;

/// Status line while paused.
pub const PAUSED_LINE: &str = "Reproduction paused";
/// Status line while playing.
pub const RESUMED_LINE: &str = "Reproduction resumed";

/// Writes one status line per cycle.
pub struct StateReporter<'a, S> {
    sink: S,
    pause: &'a PauseState,
    reports: u64,
}

impl<'a, S: Write> StateReporter<'a, S> {
    /// Create a reporter writing to `sink`.
    pub fn new(sink: S, pause: &'a PauseState) -> Self {
        Self {
            sink,
            pause,
            reports: 0,
        }
    }

    /// Lines written so far.
    pub fn reports(&self) -> u64 {
        self.reports
    }

    /// Give back the sink.
    pub fn into_inner(self) -> S {
        self.sink
    }

    /// Write the current state and flush.
    ///
    /// # Errors
    ///
    /// A failed write or flush is [`RtError::IoFailure`].
    pub fn report(&mut self) -> RtResult<&'static str> {
        let line = if self.pause.is_paused() {
            PAUSED_LINE
        } else {
            RESUMED_LINE
        };
        writeln!(self.sink, "{line}")
            .and_then(|()| self.sink.flush())
            .map_err(|err| RtError::io(Endpoint::StatusSink, &err))?;
        self.reports += 1;
        Ok(line)
    }
}

impl<S: Write> CycleBody for StateReporter<'_, S> {
    fn run_cycle(&mut self) -> RtResult<()> {
        self.report().map(|_| ())
    }
}

//! Middle-priority task: turns control input into pause/resume.

use crate::pause::PauseState;
use crate::periodic::CycleBody;
use rtstream_common::error::{Endpoint, RtError, RtResult};
use std::io::{ErrorKind, Read};
use tracing::{debug, info};

/// Control byte that resumes playback; also the initial value.
pub const RESUME_BYTE: u8 = b'1';
/// Control byte that pauses playback.
pub const PAUSE_BYTE: u8 = b'0';

/// Meaning of one control byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Clear the pause flag.
    Resume,
    /// Set the pause flag.
    Pause,
    /// Leave the flag as it is.
    Ignore,
}

impl ControlCommand {
    /// Decode a control byte.
    #[must_use]
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            RESUME_BYTE => Self::Resume,
            PAUSE_BYTE => Self::Pause,
            _ => Self::Ignore,
        }
    }
}

/// Applies the last control byte each cycle, then waits for the next one.
pub struct CommandListener<'a, I> {
    input: I,
    pause: &'a PauseState,
    last: u8,
    bytes_received: u64,
}

impl<'a, I: Read> CommandListener<'a, I> {
    /// Create a listener whose first cycle resumes playback.
    pub fn new(input: I, pause: &'a PauseState) -> Self {
        Self {
            input,
            pause,
            last: RESUME_BYTE,
            bytes_received: 0,
        }
    }

    /// Bytes read from the control input so far.
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Apply the most recent byte to the pause flag.
    pub fn apply_last(&self) -> ControlCommand {
        let command = ControlCommand::from_byte(self.last);
        let paused = match command {
            ControlCommand::Resume => false,
            ControlCommand::Pause => true,
            ControlCommand::Ignore => return command,
        };
        if self.pause.set_paused(paused) != paused {
            info!(paused, "Playback {}", if paused { "paused" } else { "resumed" });
        }
        command
    }

    /// Block until the next control byte arrives.
    ///
    /// # Errors
    ///
    /// End of input or a read error is [`RtError::IoFailure`].
    pub fn next_byte(&mut self) -> RtResult<u8> {
        let mut byte = [0u8; 1];
        loop {
            match self.input.read(&mut byte) {
                Ok(0) => {
                    return Err(RtError::IoFailure {
                        endpoint: Endpoint::ControlInput,
                        reason: "end of control input".to_string(),
                    })
                }
                Ok(_) => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(RtError::io(Endpoint::ControlInput, &err)),
            }
        }
        self.last = byte[0];
        self.bytes_received += 1;
        debug!(byte = self.last, "Control byte received");
        Ok(self.last)
    }
}

impl<I: Read> CycleBody for CommandListener<'_, I> {
    fn run_cycle(&mut self) -> RtResult<()> {
        self.apply_last();
        self.next_byte().map(|_| ())
    }
}

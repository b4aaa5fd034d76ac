//! The three cycle bodies sharing the pause state.

pub mod listener;
pub mod reporter;
pub mod streamer;

pub use listener::{CommandListener, ControlCommand, PAUSE_BYTE, RESUME_BYTE};
pub use reporter::{StateReporter, PAUSED_LINE, RESUMED_LINE};
pub use streamer::AudioStreamer;

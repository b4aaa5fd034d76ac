use std::fmt;
use thiserror::Error;

/// The byte endpoint an I/O failure occurred on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Chunked data source read by the streamer.
    Source,
    /// Output transport written by the streamer.
    Transport,
    /// Control character input read by the command listener.
    ControlInput,
    /// Status line sink written by the state reporter.
    StatusSink,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Transport => write!(f, "transport"),
            Self::ControlInput => write!(f, "control input"),
            Self::StatusSink => write!(f, "status sink"),
        }
    }
}

/// Failure classes reported before the process terminates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Open, read or write error on an endpoint.
    IoFailure,
    /// A cycle body exceeded its period.
    DeadlineOverrun,
    /// Startup or configuration problem.
    Config,
    /// Task state machine misuse.
    InvalidState,
    /// A task thread panicked.
    TaskPanic,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IoFailure => write!(f, "IO_FAILURE"),
            Self::DeadlineOverrun => write!(f, "DEADLINE_OVERRUN"),
            Self::Config => write!(f, "CONFIG"),
            Self::InvalidState => write!(f, "INVALID_STATE"),
            Self::TaskPanic => write!(f, "TASK_PANIC"),
        }
    }
}

/// Runtime error types. Every variant is terminal for the task that raised it.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RtError {
    /// Configuration or initialization error.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O failure on one of the task endpoints.
    #[error("I/O failure on {endpoint}: {reason}")]
    IoFailure {
        /// Endpoint the failure occurred on.
        endpoint: Endpoint,
        /// Description of the failure.
        reason: String,
    },

    /// Cycle body ran for at least its whole period.
    #[error("deadline overrun in {task}: period {period_ns}ns, elapsed {elapsed_ns}ns")]
    DeadlineOverrun {
        /// Name of the task that missed its deadline.
        task: String,
        /// Configured period in nanoseconds.
        period_ns: u64,
        /// Measured cycle time in nanoseconds.
        elapsed_ns: u64,
    },

    /// Invalid state transition attempted.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Source state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// A task thread panicked instead of returning an error.
    #[error("task {task} panicked: {message}")]
    TaskPanicked {
        /// Name of the task.
        task: String,
        /// Panic payload, when it was a string.
        message: String,
    },
}

impl RtError {
    /// Build an I/O failure from a `std::io::Error`.
    pub fn io(endpoint: Endpoint, err: &std::io::Error) -> Self {
        Self::IoFailure {
            endpoint,
            reason: err.to_string(),
        }
    }

    /// The failure class, used when reporting a fatal error.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Config(_) => FailureKind::Config,
            Self::IoFailure { .. } => FailureKind::IoFailure,
            Self::DeadlineOverrun { .. } => FailureKind::DeadlineOverrun,
            Self::InvalidStateTransition { .. } => FailureKind::InvalidState,
            Self::TaskPanicked { .. } => FailureKind::TaskPanic,
        }
    }
}

/// Convenience type alias for runtime operations.
pub type RtResult<T> = Result<T, RtError>;

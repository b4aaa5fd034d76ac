//! Per-task state machine for periodic execution.
//!
//! State transitions:
//! IDLE → RUNNING ⇄ SLEEPING, and IDLE/RUNNING/SLEEPING → FAULTED
//!
//! FAULTED is terminal: a missed deadline or I/O failure is never retried.

use crate::error::{RtError, RtResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle states of a periodic task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Created but not launched.
    #[default]
    Idle,
    /// Executing a cycle body or its bookkeeping.
    Running,
    /// Suspended until the next cycle start.
    Sleeping,
    /// Deadline missed or body failed; terminal.
    Faulted,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Running => write!(f, "RUNNING"),
            Self::Sleeping => write!(f, "SLEEPING"),
            Self::Faulted => write!(f, "FAULTED"),
        }
    }
}

impl TaskState {
    /// Check if a transition to `target` is valid from the current state.
    #[must_use]
    pub fn can_transition_to(&self, target: TaskState) -> bool {
        use TaskState::{Faulted, Idle, Running, Sleeping};

        matches!(
            (self, target),
            (Idle, Running)
                | (Running, Sleeping)
                | (Sleeping, Running)
                | (Idle, Faulted)
                | (Running, Faulted)
                | (Sleeping, Faulted)
        )
    }

    /// Returns true once the task can no longer run.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Faulted)
    }
}

/// State machine wrapper with transition history tracking.
#[derive(Debug, Clone)]
pub struct StateMachine {
    current: TaskState,
    previous: Option<TaskState>,
    transition_count: u64,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// Create a new state machine starting in IDLE.
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: TaskState::Idle,
            previous: None,
            transition_count: 0,
        }
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.current
    }

    /// Get the previous state (if any transition occurred).
    #[must_use]
    pub fn previous_state(&self) -> Option<TaskState> {
        self.previous
    }

    /// Get total number of transitions.
    #[must_use]
    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Attempt a state transition.
    pub fn transition(&mut self, target: TaskState) -> RtResult<()> {
        if self.current.can_transition_to(target) {
            self.previous = Some(self.current);
            self.current = target;
            self.transition_count += 1;
            Ok(())
        } else {
            Err(RtError::InvalidStateTransition {
                from: self.current.to_string(),
                to: target.to_string(),
            })
        }
    }

    /// Force a transition to FAULTED (no-op if already faulted).
    pub fn enter_fault(&mut self) {
        if self.current.can_transition_to(TaskState::Faulted) {
            self.previous = Some(self.current);
            self.current = TaskState::Faulted;
            self.transition_count += 1;
        }
    }
}

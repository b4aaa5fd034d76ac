//! Shared pause flag behind a priority-ceiling mutex.
//!
//! The flag is the only state shared between tasks. Every access goes
//! through [`CeilingMutex::lock`], which applies the immediate priority
//! ceiling protocol: the calling thread runs at the ceiling (the highest
//! priority of any task that touches the lock) for the whole critical
//! section. A lower-priority holder therefore cannot be preempted by a task
//! that might want the lock, and a waiter blocks for at most one critical
//! section.

use crossbeam_utils::CachePadded;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Raises and restores the calling thread's scheduling priority.
pub trait PriorityControl: Send + Sync {
    /// Raise the calling thread to `ceiling` if it runs below it.
    ///
    /// Returns the priority to restore, or `None` when nothing changed.
    fn raise_to(&self, ceiling: u8) -> Option<u8>;

    /// Return the calling thread to `previous`.
    fn restore(&self, previous: u8);
}

/// Leaves thread priorities alone; used when real-time scheduling is off.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPriorityControl;

impl PriorityControl for NoPriorityControl {
    fn raise_to(&self, _ceiling: u8) -> Option<u8> {
        None
    }

    fn restore(&self, _previous: u8) {}
}

/// A mutex whose holders run at a fixed ceiling priority.
pub struct CeilingMutex<T> {
    inner: CachePadded<Mutex<T>>,
    ceiling: u8,
    control: Arc<dyn PriorityControl>,
}

impl<T> CeilingMutex<T> {
    /// Create a mutex with the given ceiling.
    pub fn new(value: T, ceiling: u8, control: Arc<dyn PriorityControl>) -> Self {
        Self {
            inner: CachePadded::new(Mutex::new(value)),
            ceiling,
            control,
        }
    }

    /// Ceiling priority.
    pub fn ceiling(&self) -> u8 {
        self.ceiling
    }

    /// Raise to the ceiling, then acquire.
    ///
    /// A poisoned lock is recovered: the protected values are plain data
    /// and remain valid after a panicking holder.
    pub fn lock(&self) -> CeilingGuard<'_, T> {
        let restore = PriorityRestore {
            control: &*self.control,
            previous: self.control.raise_to(self.ceiling),
        };
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        CeilingGuard {
            guard,
            _restore: restore,
        }
    }
}

/// Access to the value inside a [`CeilingMutex`].
///
/// Dropping the guard unlocks first and restores the thread priority after.
pub struct CeilingGuard<'a, T> {
    // Field order is drop order: unlock, then lower the priority.
    guard: MutexGuard<'a, T>,
    _restore: PriorityRestore<'a>,
}

impl<T> Deref for CeilingGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for CeilingGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

struct PriorityRestore<'a> {
    control: &'a dyn PriorityControl,
    previous: Option<u8>,
}

impl Drop for PriorityRestore<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous {
            self.control.restore(previous);
        }
    }
}

/// Playback pause flag shared by the streamer, listener and reporter.
pub struct PauseState {
    paused: CeilingMutex<bool>,
}

impl PauseState {
    /// Create an unpaused state protected at `ceiling`.
    pub fn new(ceiling: u8, control: Arc<dyn PriorityControl>) -> Self {
        Self {
            paused: CeilingMutex::new(false, ceiling, control),
        }
    }

    /// Create an unpaused state that never changes thread priorities.
    pub fn without_priority_control() -> Self {
        Self::new(0, Arc::new(NoPriorityControl))
    }

    /// Set the flag, returning its previous value.
    pub fn set_paused(&self, value: bool) -> bool {
        let previous = {
            let mut paused = self.paused.lock();
            std::mem::replace(&mut *paused, value)
        };
        if previous != value {
            debug!(paused = value, "Pause state changed");
        }
        previous
    }

    /// Read the flag.
    pub fn is_paused(&self) -> bool {
        *self.paused.lock()
    }

    /// Ceiling priority of the protecting mutex.
    pub fn ceiling(&self) -> u8 {
        self.paused.ceiling()
    }
}

impl std::fmt::Debug for PauseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PauseState")
            .field("paused", &self.is_paused())
            .field("ceiling", &self.ceiling())
            .finish()
    }
}

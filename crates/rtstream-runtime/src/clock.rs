//! Time sources for periodic tasks.
//!
//! [`MonotonicClock`] reads the OS monotonic clock and sleeps with
//! `clock_nanosleep`. [`SimulatedClock`] only moves when told to, so the
//! cycle arithmetic can be checked exactly without real time passing.

use rtstream_common::time::{sum, CycleDuration, CycleInstant, Timespec};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

/// A clock a periodic task measures and sleeps against.
pub trait Clock {
    /// Current time on this clock.
    fn now(&self) -> CycleInstant;

    /// Suspend the calling thread for `duration`.
    fn sleep(&self, duration: CycleDuration);
}

/// The OS monotonic clock, measured from the moment the clock was created.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    /// Create a clock whose zero is now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> CycleInstant {
        Timespec::from(self.origin.elapsed())
    }

    #[cfg(target_os = "linux")]
    fn sleep(&self, duration: CycleDuration) {
        if duration.is_zero() {
            return;
        }

        let request = libc::timespec {
            tv_sec: duration.secs() as libc::time_t,
            tv_nsec: duration.subsec_nanos() as libc::c_long,
        };
        if let Err(errno) = monotonic_nanosleep(request) {
            tracing::error!(
                errno,
                error = %std::io::Error::from_raw_os_error(errno),
                requested = %duration,
                "clock_nanosleep failed, cycle sleep skipped"
            );
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn sleep(&self, duration: CycleDuration) {
        std::thread::sleep(duration.into());
    }
}

/// Relative sleep on `CLOCK_MONOTONIC`, resumed after signal interruptions.
///
/// Returns the errno of any other failure.
#[cfg(target_os = "linux")]
#[allow(unsafe_code)]
fn monotonic_nanosleep(mut request: libc::timespec) -> Result<(), i32> {
    let mut remaining = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    loop {
        // SAFETY: both pointers refer to live, initialized timespecs.
        let rc =
            unsafe { libc::clock_nanosleep(libc::CLOCK_MONOTONIC, 0, &request, &mut remaining) };
        match rc {
            0 => return Ok(()),
            libc::EINTR => request = remaining,
            errno => return Err(errno),
        }
    }
}

#[derive(Debug, Default)]
struct SimulatedState {
    now: Timespec,
    sleeps: Vec<Timespec>,
}

/// A manually driven clock.
///
/// Clones share the same time, so a test can hold one handle while the task
/// owns another. `sleep` records the request and advances time by it.
#[derive(Debug, Clone, Default)]
pub struct SimulatedClock {
    state: Arc<Mutex<SimulatedState>>,
}

impl SimulatedClock {
    /// Create a clock reading `start`.
    #[must_use]
    pub fn new(start: CycleInstant) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimulatedState {
                now: start,
                sleeps: Vec::new(),
            })),
        }
    }

    /// Move time forward, as if a cycle body had run for `by`.
    pub fn advance(&self, by: CycleDuration) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.now = sum(state.now, by);
    }

    /// Every sleep requested so far, oldest first.
    #[must_use]
    pub fn sleeps(&self) -> Vec<CycleDuration> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sleeps
            .clone()
    }
}

impl Clock for SimulatedClock {
    fn now(&self) -> CycleInstant {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).now
    }

    fn sleep(&self, duration: CycleDuration) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.sleeps.push(duration);
        state.now = sum(state.now, duration);
    }
}

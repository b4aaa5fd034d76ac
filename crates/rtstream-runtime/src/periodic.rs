//! Drift-free periodic execution.
//!
//! Every task runs the same cycle:
//! 1. Run the body
//! 2. Measure elapsed time since the nominal cycle start
//! 3. Fault if the body used the whole period (or realign, see below)
//! 4. Sleep the remainder of the period
//! 5. Advance the nominal start by exactly one period
//!
//! The next start is derived from the previous nominal start, never from the
//! wake-up time, so sleep jitter does not accumulate across cycles.

use crate::clock::Clock;
use rtstream_common::config::{RuntimeConfig, TaskKind};
use rtstream_common::error::{RtError, RtResult};
use rtstream_common::metrics::CycleMetrics;
use rtstream_common::state::{StateMachine, TaskState};
use rtstream_common::time::{
    compare, difference, split_periods, sum, CycleDuration, CycleInstant,
};
use std::cmp::Ordering;
use std::convert::Infallible;
use tracing::{debug, error, info, trace, warn};

/// What a task does when a cycle uses its whole period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverrunPolicy {
    /// Missed deadline: fault the task.
    #[default]
    Fatal,
    /// The cycle waits on external events: skip the missed periods and
    /// resume on the original phase.
    Realign,
}

/// Immutable description of one periodic task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSpec {
    /// Name used in logs and errors.
    pub name: String,
    /// Nominal cycle length.
    pub period: CycleDuration,
    /// Static scheduling priority.
    pub priority: u8,
    /// Overrun handling.
    pub overrun: OverrunPolicy,
}

impl TaskSpec {
    /// A task with the fatal overrun policy.
    pub fn new(name: impl Into<String>, period: CycleDuration, priority: u8) -> Self {
        Self {
            name: name.into(),
            period,
            priority,
            overrun: OverrunPolicy::Fatal,
        }
    }

    /// Replace the overrun policy.
    #[must_use]
    pub fn with_overrun(mut self, overrun: OverrunPolicy) -> Self {
        self.overrun = overrun;
        self
    }

    /// The spec of one of the three runtime tasks.
    ///
    /// The command listener blocks on control input inside its cycle and
    /// therefore realigns instead of faulting.
    #[must_use]
    pub fn for_kind(config: &RuntimeConfig, kind: TaskKind) -> Self {
        let sched = config.scheduling(kind);
        let overrun = match kind {
            TaskKind::Listener => OverrunPolicy::Realign,
            TaskKind::Streamer | TaskKind::Reporter => OverrunPolicy::Fatal,
        };
        Self::new(kind.name(), sched.period, sched.priority).with_overrun(overrun)
    }
}

/// The work a periodic task performs once per cycle.
pub trait CycleBody {
    /// Run one cycle. An error is terminal for the task.
    fn run_cycle(&mut self) -> RtResult<()>;
}

/// Result of a single completed cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleOutcome {
    /// Cycle number, starting at 1.
    pub cycle: u64,
    /// Time from the nominal start to the end of the body.
    pub elapsed: CycleDuration,
    /// Time slept before the next cycle.
    pub slept: CycleDuration,
    /// Whole periods skipped by a realigned cycle (0 normally).
    pub skipped_periods: u64,
    /// Nominal start of the next cycle.
    pub next_start: CycleInstant,
}

/// A task executing a [`CycleBody`] every period against a [`Clock`].
pub struct PeriodicTask<C: Clock> {
    spec: TaskSpec,
    clock: C,
    state: StateMachine,
    /// Nominal start of the current cycle; set on launch.
    start: Option<CycleInstant>,
    cycle_count: u64,
    metrics: CycleMetrics,
    /// Log a metrics summary every this many cycles (0 disables).
    report_every: u64,
}

impl<C: Clock> PeriodicTask<C> {
    /// Create an idle task.
    pub fn new(spec: TaskSpec, clock: C) -> Self {
        let metrics = CycleMetrics::new(1_000, spec.period);
        Self {
            spec,
            clock,
            state: StateMachine::new(),
            start: None,
            cycle_count: 0,
            metrics,
            report_every: 0,
        }
    }

    /// Configure metrics history and periodic summary logging.
    #[must_use]
    pub fn with_metrics(mut self, history: usize, report_every: u64) -> Self {
        self.metrics = CycleMetrics::new(history, self.spec.period);
        self.report_every = report_every;
        self
    }

    /// Task description.
    pub fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TaskState {
        self.state.state()
    }

    /// Nominal start of the upcoming cycle.
    pub fn nominal_start(&self) -> Option<CycleInstant> {
        self.start
    }

    /// Completed cycles.
    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    /// Elapsed-time statistics.
    pub fn metrics(&self) -> &CycleMetrics {
        &self.metrics
    }

    /// Capture the first nominal start and begin running.
    ///
    /// Transitions IDLE → RUNNING.
    pub fn launch(&mut self) -> RtResult<()> {
        self.state.transition(TaskState::Running)?;
        let start = self.clock.now();
        self.start = Some(start);

        info!(
            task = %self.spec.name,
            period = %self.spec.period,
            priority = self.spec.priority,
            policy = ?self.spec.overrun,
            "Task launched"
        );
        Ok(())
    }

    /// Execute one cycle: body, overrun check, sleep, advance.
    ///
    /// # Errors
    ///
    /// A body error or a deadline overrun faults the task and is returned.
    /// In both cases no sleep happens and the nominal start is unchanged.
    pub fn run_cycle<B: CycleBody + ?Sized>(&mut self, body: &mut B) -> RtResult<CycleOutcome> {
        let start = match (self.state.state(), self.start) {
            (TaskState::Running, Some(start)) => start,
            (state, _) => {
                return Err(RtError::InvalidStateTransition {
                    from: state.to_string(),
                    to: TaskState::Running.to_string(),
                })
            }
        };

        if let Err(e) = body.run_cycle() {
            self.enter_fault(&e);
            return Err(e);
        }

        let end = self.clock.now();
        let elapsed = difference(end, start);
        let period = self.spec.period;
        self.cycle_count += 1;
        self.metrics.record(elapsed);

        let (slept, advance, skipped_periods) = if compare(period, elapsed) == Ordering::Greater {
            (difference(period, elapsed), period, 0)
        } else {
            match self.spec.overrun {
                OverrunPolicy::Fatal => {
                    let err = RtError::DeadlineOverrun {
                        task: self.spec.name.clone(),
                        period_ns: period.as_nanos_u64(),
                        elapsed_ns: elapsed.as_nanos_u64(),
                    };
                    self.enter_fault(&err);
                    return Err(err);
                }
                OverrunPolicy::Realign => {
                    let (whole, into_period) = split_periods(elapsed, period);
                    warn!(
                        task = %self.spec.name,
                        cycle = self.cycle_count,
                        elapsed = %elapsed,
                        skipped_periods = whole,
                        "Cycle outlasted its period, realigning to the next period boundary"
                    );
                    (
                        difference(period, into_period),
                        period.saturating_mul(whole + 1),
                        whole,
                    )
                }
            }
        };

        self.state.transition(TaskState::Sleeping)?;
        self.clock.sleep(slept);
        let next_start = sum(start, advance);
        self.start = Some(next_start);
        self.state.transition(TaskState::Running)?;

        trace!(
            task = %self.spec.name,
            cycle = self.cycle_count,
            elapsed_us = elapsed.as_nanos() / 1_000,
            slept_us = slept.as_nanos() / 1_000,
            "Cycle complete"
        );

        if self.report_every > 0 && self.cycle_count % self.report_every == 0 {
            let snapshot = self.metrics.snapshot();
            debug!(
                task = %self.spec.name,
                cycles = snapshot.total_cycles,
                mean_ns = snapshot.mean_ns.unwrap_or(0),
                max_ns = snapshot.max_ns.unwrap_or(0),
                p99_ns = self.metrics.percentile(99.0).map_or(0, |p| p.as_nanos_u64()),
                jitter_ns = snapshot.jitter_ns().unwrap_or(0),
                utilization = snapshot.utilization().unwrap_or(0.0),
                overruns = snapshot.overrun_count,
                "Periodic status"
            );
        }

        Ok(CycleOutcome {
            cycle: self.cycle_count,
            elapsed,
            slept,
            skipped_periods,
            next_start,
        })
    }

    /// Run cycles until the task faults.
    ///
    /// Launches the task first if it is still idle. Never returns `Ok`; the
    /// error is the terminal failure and the caller decides what happens to
    /// the process.
    pub fn run<B: CycleBody + ?Sized>(&mut self, body: &mut B) -> RtResult<Infallible> {
        if self.state.state() == TaskState::Idle {
            self.launch()?;
        }
        loop {
            self.run_cycle(body)?;
        }
    }

    fn enter_fault(&mut self, reason: &RtError) {
        self.state.enter_fault();
        error!(
            task = %self.spec.name,
            cycle = self.cycle_count,
            from = ?self.state.previous_state(),
            kind = %reason.kind(),
            error = %reason,
            "Task faulted"
        );
    }
}

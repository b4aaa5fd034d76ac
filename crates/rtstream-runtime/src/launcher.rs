//! Task threads and first-failure collection.
//!
//! Each task gets its own named OS thread. Scheduling is applied from inside
//! that thread before the job starts, and the first terminal error any task
//! returns is handed back to the caller.

use crate::realtime::apply_thread_scheduling;
use rtstream_common::config::{RealtimeConfig, SchedulingConfig, TaskKind};
use rtstream_common::error::{RtError, RtResult};
use std::any::Any;
use std::convert::Infallible;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

/// Headroom above the pre-faulted region of each task stack.
const STACK_HEADROOM: usize = 1024 * 1024;

/// The terminal error of one task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskFailure {
    /// Task that stopped.
    pub task: TaskKind,
    /// Why it stopped.
    pub error: RtError,
}

/// Spawns task threads and waits for the first of them to fail.
pub struct TaskLauncher {
    realtime: RealtimeConfig,
    tx: Sender<TaskFailure>,
    rx: Receiver<TaskFailure>,
    handles: Vec<JoinHandle<()>>,
}

impl TaskLauncher {
    /// Create a launcher applying `realtime` to every spawned thread.
    #[must_use]
    pub fn new(realtime: RealtimeConfig) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            realtime,
            tx,
            rx,
            handles: Vec::new(),
        }
    }

    /// Number of tasks spawned.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.handles.len()
    }

    /// Start `job` on a new thread scheduled according to `sched`.
    ///
    /// The job runs until it returns its terminal error.
    ///
    /// # Errors
    ///
    /// Returns [`RtError::Config`] if the thread cannot be created.
    pub fn spawn<F>(&mut self, sched: SchedulingConfig, job: F) -> RtResult<()>
    where
        F: FnOnce() -> RtResult<Infallible> + Send + 'static,
    {
        let kind = sched.kind;
        let realtime = self.realtime.clone();
        let tx = self.tx.clone();

        let handle = thread::Builder::new()
            .name(kind.name().to_string())
            .stack_size(realtime.prefault_stack_size + STACK_HEADROOM)
            .spawn(move || {
                let error = match apply_thread_scheduling(&sched, &realtime) {
                    Ok(_) => {
                        debug!(task = %kind, "Task thread started");
                        match panic::catch_unwind(AssertUnwindSafe(job)) {
                            Ok(Ok(never)) => match never {},
                            Ok(Err(error)) => error,
                            Err(payload) => RtError::TaskPanicked {
                                task: kind.name().to_string(),
                                message: panic_message(payload.as_ref()),
                            },
                        }
                    }
                    Err(error) => error,
                };
                error!(task = %kind, kind = %error.kind(), %error, "Task stopped");
                // The receiver is gone only once the launcher has been dropped.
                let _ = tx.send(TaskFailure { task: kind, error });
            })
            .map_err(|e| RtError::Config(format!("Failed to spawn {kind} thread: {e}")))?;

        info!(task = %kind, priority = sched.priority, period = %sched.period, "Task launched");
        self.handles.push(handle);
        Ok(())
    }

    /// Block until some task fails and return its failure.
    ///
    /// The remaining tasks keep running; the caller is expected to tear the
    /// process down.
    ///
    /// # Errors
    ///
    /// Returns [`RtError::Config`] if no task was spawned, or if every task
    /// thread ended without reporting.
    pub fn wait_for_failure(self) -> RtResult<TaskFailure> {
        let Self {
            tx, rx, handles, ..
        } = self;
        if handles.is_empty() {
            return Err(RtError::Config("no tasks launched".to_string()));
        }
        drop(tx);

        rx.recv().map_err(|_| {
            RtError::Config("all task threads ended without reporting a failure".to_string())
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl std::fmt::Debug for TaskLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskLauncher")
            .field("realtime", &self.realtime)
            .field("tasks", &self.handles.len())
            .finish_non_exhaustive()
    }
}

//! Threaded runs with file-backed endpoints.

use super::common::{chunked_source, is_root};
use rtstream_common::config::{RealtimeConfig, RuntimeConfig, SchedulingConfig, TaskKind};
use rtstream_common::error::{Endpoint, FailureKind, RtError};
use rtstream_common::time::Timespec;
use rtstream_runtime::clock::MonotonicClock;
use rtstream_runtime::launcher::TaskLauncher;
use rtstream_runtime::pause::PauseState;
use rtstream_runtime::periodic::{PeriodicTask, TaskSpec};
use rtstream_runtime::realtime::priority_control;
use rtstream_runtime::tasks::AudioStreamer;
use std::fs::File;
use std::sync::Arc;

const CHUNK: usize = 128;

fn fast_streamer(period: Timespec) -> SchedulingConfig {
    SchedulingConfig {
        kind: TaskKind::Streamer,
        priority: 3,
        period,
        ceiling: 3,
    }
}

fn spawn_streamer(
    launcher: &mut TaskLauncher,
    sched: SchedulingConfig,
    source: File,
    transport: File,
    pause: Arc<PauseState>,
) {
    let mut task = PeriodicTask::new(
        TaskSpec::new(sched.kind.name(), sched.period, sched.priority),
        MonotonicClock::new(),
    );
    launcher
        .spawn(sched, move || {
            let mut body = AudioStreamer::new(source, transport, &pause, CHUNK);
            task.run(&mut body)
        })
        .unwrap();
}

#[test]
fn streamer_copies_source_then_reports_exhaustion() {
    let source = chunked_source(3, CHUNK);
    let transport = tempfile::NamedTempFile::new().unwrap();

    let mut launcher = TaskLauncher::new(RealtimeConfig::default());
    spawn_streamer(
        &mut launcher,
        fast_streamer(Timespec::from_millis(50)),
        File::open(source.path()).unwrap(),
        transport.reopen().unwrap(),
        Arc::new(PauseState::without_priority_control()),
    );

    let failure = launcher.wait_for_failure().unwrap();

    assert_eq!(failure.task, TaskKind::Streamer);
    assert_eq!(failure.error.kind(), FailureKind::IoFailure);
    assert_eq!(
        failure.error,
        RtError::IoFailure {
            endpoint: Endpoint::Source,
            reason: "source exhausted".to_string(),
        }
    );
    let written = std::fs::read(transport.path()).unwrap();
    assert_eq!(written, std::fs::read(source.path()).unwrap());
}

#[test]
fn paused_streamer_fails_on_unwritable_transport() {
    let source = chunked_source(1, CHUNK);
    let transport = tempfile::NamedTempFile::new().unwrap();
    let pause = Arc::new(PauseState::without_priority_control());
    pause.set_paused(true);

    // Read-only transport: the first silent chunk fails to write.
    let mut launcher = TaskLauncher::new(RealtimeConfig::default());
    spawn_streamer(
        &mut launcher,
        fast_streamer(Timespec::from_millis(20)),
        File::open(source.path()).unwrap(),
        File::open(transport.path()).unwrap(),
        Arc::clone(&pause),
    );

    let failure = launcher.wait_for_failure().unwrap();
    assert!(matches!(
        failure.error,
        RtError::IoFailure {
            endpoint: Endpoint::Transport,
            ..
        }
    ));
    assert!(pause.is_paused());
}

#[test]
#[ignore = "Requires root or CAP_SYS_NICE"]
fn realtime_streamer_runs_at_its_priority() {
    if !is_root() {
        eprintln!("Skipping: not running as root");
        return;
    }

    let config = RuntimeConfig {
        realtime: RealtimeConfig {
            enabled: true,
            lock_memory: false,
            ..RealtimeConfig::default()
        },
        ..RuntimeConfig::default()
    };
    let pause = Arc::new(PauseState::new(
        config.ceiling(),
        priority_control(&config.realtime),
    ));

    let mut launcher = TaskLauncher::new(config.realtime.clone());
    let shared = Arc::clone(&pause);
    launcher
        .spawn(config.scheduling(TaskKind::Reporter), move || {
            // SAFETY: pid 0 addresses the calling thread.
            let policy = unsafe { libc::sched_getscheduler(0) };
            shared.set_paused(true);
            Err(RtError::Config(format!("policy={policy}")))
        })
        .unwrap();

    let failure = launcher.wait_for_failure().unwrap();
    assert_eq!(
        failure.error,
        RtError::Config(format!("policy={}", libc::SCHED_FIFO))
    );
    assert!(pause.is_paused());
}

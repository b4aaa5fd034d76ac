//! Cycle timing scenarios on a simulated clock.

use super::common::Timed;
use rtstream_common::config::{RuntimeConfig, TaskKind};
use rtstream_common::error::RtError;
use rtstream_common::state::TaskState;
use rtstream_common::time::{difference, Timespec};
use rtstream_runtime::clock::{Clock, SimulatedClock};
use rtstream_runtime::pause::PauseState;
use rtstream_runtime::periodic::{PeriodicTask, TaskSpec};
use rtstream_runtime::tasks::{AudioStreamer, CommandListener};
use std::io::Cursor;

#[test]
fn streamer_keeps_phase_over_many_cycles() {
    let config = RuntimeConfig::default();
    let clock = SimulatedClock::new(Timespec::new(7, 999_999_999));
    let pause = PauseState::without_priority_control();
    pause.set_paused(true);

    let mut task =
        PeriodicTask::new(TaskSpec::for_kind(&config, TaskKind::Streamer), clock.clone());
    task.launch().unwrap();
    let origin = task.nominal_start().unwrap();

    let mut body = Timed {
        body: AudioStreamer::new(std::io::empty(), std::io::sink(), &pause, 128),
        clock: clock.clone(),
        cost: Timespec::from_nanos(7_300_000),
    };
    for _ in 0..1_000 {
        task.run_cycle(&mut body).unwrap();
    }

    let expected = Timespec::from_millis(32).saturating_mul(1_000);
    assert_eq!(difference(task.nominal_start().unwrap(), origin), expected);
    assert_eq!(clock.now(), task.nominal_start().unwrap());
    assert_eq!(task.metrics().overrun_count(), 0);
}

#[test]
fn streamer_overrun_is_fatal() {
    let config = RuntimeConfig::default();
    let clock = SimulatedClock::new(Timespec::ZERO);
    let pause = PauseState::without_priority_control();

    let mut task =
        PeriodicTask::new(TaskSpec::for_kind(&config, TaskKind::Streamer), clock.clone());
    let mut body = Timed {
        body: AudioStreamer::new(Cursor::new(vec![0u8; 1024]), Vec::new(), &pause, 128),
        clock: clock.clone(),
        cost: Timespec::from_millis(32),
    };

    let err = task.run(&mut body).unwrap_err();

    assert_eq!(
        err,
        RtError::DeadlineOverrun {
            task: "audio-streamer".to_string(),
            period_ns: 32_000_000,
            elapsed_ns: 32_000_000,
        }
    );
    assert_eq!(task.state(), TaskState::Faulted);
    assert_eq!(task.nominal_start(), Some(Timespec::ZERO));
    assert!(clock.sleeps().is_empty());
}

#[test]
fn slow_control_input_realigns_listener() {
    let config = RuntimeConfig::default();
    let clock = SimulatedClock::new(Timespec::ZERO);
    let pause = PauseState::without_priority_control();

    let mut task =
        PeriodicTask::new(TaskSpec::for_kind(&config, TaskKind::Listener), clock.clone());
    task.launch().unwrap();

    // The operator takes 4.5 s to press a key.
    let mut body = Timed {
        body: CommandListener::new(Cursor::new(b"0".to_vec()), &pause),
        clock: clock.clone(),
        cost: Timespec::from_millis(4_500),
    };
    let outcome = task.run_cycle(&mut body).unwrap();

    assert_eq!(outcome.skipped_periods, 2);
    assert_eq!(outcome.slept, Timespec::from_millis(1_500));
    assert_eq!(outcome.next_start, Timespec::from_secs(6));
    assert_eq!(clock.now(), Timespec::from_secs(6));
    assert_eq!(task.state(), TaskState::Running);
}

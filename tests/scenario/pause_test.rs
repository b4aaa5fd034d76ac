//! Pause control scenarios.
//!
//! Control bytes flow from the listener through the shared pause state to
//! the streamer and the reporter.

use super::common::Timed;
use rtstream_common::config::{RuntimeConfig, TaskKind};
use rtstream_common::error::{Endpoint, RtError};
use rtstream_common::state::TaskState;
use rtstream_common::time::Timespec;
use rtstream_runtime::clock::SimulatedClock;
use rtstream_runtime::pause::PauseState;
use rtstream_runtime::periodic::{PeriodicTask, TaskSpec};
use rtstream_runtime::tasks::{AudioStreamer, CommandListener, StateReporter};
use std::io::Cursor;

#[test]
fn control_bytes_toggle_reported_state() {
    let config = RuntimeConfig::default();
    let clock = SimulatedClock::new(Timespec::ZERO);
    let pause = PauseState::without_priority_control();

    let mut listener_task =
        PeriodicTask::new(TaskSpec::for_kind(&config, TaskKind::Listener), clock.clone());
    let mut reporter_task =
        PeriodicTask::new(TaskSpec::for_kind(&config, TaskKind::Reporter), clock.clone());
    listener_task.launch().unwrap();
    reporter_task.launch().unwrap();

    let mut listener = Timed {
        body: CommandListener::new(Cursor::new(b"01".to_vec()), &pause),
        clock: clock.clone(),
        cost: Timespec::from_millis(1),
    };
    let mut reporter = StateReporter::new(Vec::new(), &pause);

    // Initial '1' applied, '0' received.
    listener_task.run_cycle(&mut listener).unwrap();
    assert!(!pause.is_paused());

    // '0' applied, '1' received.
    listener_task.run_cycle(&mut listener).unwrap();
    assert!(pause.is_paused());
    reporter_task.run_cycle(&mut reporter).unwrap();

    // '1' applied, then the control input ends.
    let err = listener_task.run_cycle(&mut listener).unwrap_err();
    assert!(!pause.is_paused());
    assert!(matches!(
        err,
        RtError::IoFailure {
            endpoint: Endpoint::ControlInput,
            ..
        }
    ));
    assert_eq!(listener_task.state(), TaskState::Faulted);

    reporter_task.run_cycle(&mut reporter).unwrap();
    let out = String::from_utf8(reporter.into_inner()).unwrap();
    assert_eq!(out, "Reproduction paused\nReproduction resumed\n");
}

#[test]
fn paused_streamer_sends_silence_and_keeps_source_position() {
    let pause = PauseState::without_priority_control();
    let source = Cursor::new((1..=3u8).flat_map(|n| [n; 4]).collect::<Vec<_>>());
    let mut streamer = AudioStreamer::new(source, Vec::new(), &pause, 4);
    let mut listener = CommandListener::new(Cursor::new(b"01".to_vec()), &pause);

    streamer.stream_chunk().unwrap();
    listener.next_byte().unwrap();
    listener.apply_last();
    streamer.stream_chunk().unwrap();
    streamer.stream_chunk().unwrap();
    listener.next_byte().unwrap();
    listener.apply_last();
    streamer.stream_chunk().unwrap();
    streamer.stream_chunk().unwrap();

    let (source, out) = streamer.into_parts();
    assert_eq!(source.position(), 12);
    assert_eq!(out, [[1u8; 4], [0; 4], [0; 4], [2; 4], [3; 4]].concat());
}

#[test]
fn resumed_streamer_faults_when_source_runs_out() {
    let config = RuntimeConfig::default();
    let clock = SimulatedClock::new(Timespec::from_secs(1));
    let pause = PauseState::without_priority_control();

    let mut task = PeriodicTask::new(TaskSpec::for_kind(&config, TaskKind::Streamer), clock);
    let mut streamer = AudioStreamer::new(Cursor::new(vec![9u8; 256]), Vec::new(), &pause, 128);

    let err = task.run(&mut streamer).unwrap_err();

    assert_eq!(task.cycle_count(), 2);
    assert_eq!(task.state(), TaskState::Faulted);
    assert_eq!(
        err,
        RtError::IoFailure {
            endpoint: Endpoint::Source,
            reason: "source exhausted".to_string(),
        }
    );
    assert_eq!(streamer.chunks_sent(), 2);
}

//! End-to-end scenarios: bring-up, clean moves, communication faults,
//! stall detection, the settle workaround and the hardware self-fault
//! disable, all against in-process controller emulators.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use motion_core::command::{Directive, MotionCommand};
use motion_core::config::ControllerConfig;
use motion_core::status::AxisReadback;
use motion_engine::{Controller, ControllerHandle, MotionRequest};
use motion_mock::{spawn, MockProfile};

fn test_config() -> ControllerConfig {
    ControllerConfig {
        axes: Some(2),
        scan_rate_hz: 60,
        send_timeout: Duration::from_millis(100),
        recv_timeout: Duration::from_millis(50),
        no_motion_ceiling: 3,
        ..ControllerConfig::default()
    }
}

async fn connect_mm4000(
    profile: MockProfile,
) -> (
    ControllerHandle,
    motion_mock::MockHandle,
    tokio::sync::mpsc::UnboundedReceiver<motion_engine::HostEvent>,
) {
    let (wire, mock) = spawn(profile);
    let (controller, handle, host_rx) = Controller::connect(
        test_config(),
        Arc::new(motion_dialects::mm4000()),
        Box::new(wire),
    )
    .await
    .expect("bring-up against the emulator");
    tokio::spawn(controller.run());
    (handle, mock, host_rx)
}

async fn wait_for(
    handle: &ControllerHandle,
    axis: usize,
    what: &str,
    pred: impl Fn(&AxisReadback) -> bool,
) -> AxisReadback {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(readback) = handle.axis(axis) {
            if pred(&readback) {
                return readback;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}; last readback: {:?}",
            handle.axis(axis)
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn bring_up_discovers_axes_and_probes() {
    let (handle, mock, _host) = connect_mm4000(MockProfile::default()).await;

    assert_eq!(handle.axis_count(), 2);
    assert!(handle.ident().contains("MM4000"));
    // Identity, stop-all and the per-axis probes all went out.
    assert!(mock.saw("VE"));
    assert!(mock.saw("1TC"));
    assert!(mock.saw("2TU"));

    // The first published snapshot is real hardware state.
    let readback = handle.axis(0).expect("axis 0 snapshot");
    assert!(readback.status.gain_support);
    assert!(readback.status.encoder_present);
    assert!(!readback.status.comm_error);

    handle.shutdown();
}

#[tokio::test]
async fn bring_up_fails_against_a_silent_controller() {
    let (engine_side, _mock_side) = tokio::io::duplex(64);
    let result = Controller::connect(
        test_config(),
        Arc::new(motion_dialects::mm4000()),
        Box::new(engine_side),
    )
    .await;

    let err = format!("{:#}", result.err().expect("silent controller must fail"));
    assert!(err.contains("3 attempts"), "unexpected error: {err}");
}

#[tokio::test]
async fn clean_move_reaches_target_with_post_move_dispatch() {
    let (handle, mock, _host) = connect_mm4000(MockProfile {
        units_per_poll: 1.0,
        ..MockProfile::default()
    })
    .await;

    handle
        .submit(
            MotionRequest::new(0, MotionCommand::MoveAbs(2000.0))
                .post(Directive::Controller("1MO".to_string())),
        )
        .expect("submit");

    let readback = wait_for(&handle, 0, "move completion", |r| {
        r.status.done && r.position == 2000
    })
    .await;
    assert_eq!(readback.position, 2000);
    assert_eq!(readback.encoder_position, 2); // raw units, encoder fitted
    assert!(!readback.status.problem);
    assert!(!readback.status.comm_error);

    // The move went out scaled to controller units, and the post-move
    // directive fired exactly once.
    assert!(mock.saw("1PA2.0000"));
    tokio::time::sleep(Duration::from_millis(100)).await;
    let dispatches = mock
        .received()
        .iter()
        .filter(|c| c.as_str() == "1MO")
        .count();
    assert_eq!(dispatches, 1);

    handle.shutdown();
}

#[tokio::test]
async fn transient_glitch_is_absorbed_silently() {
    let (handle, mock, _host) = connect_mm4000(MockProfile {
        units_per_poll: 1.0,
        ..MockProfile::default()
    })
    .await;

    handle
        .submit(MotionRequest::new(0, MotionCommand::MoveAbs(2000.0)))
        .expect("submit");
    // One swallowed status reply: the first sweep times out, the retry
    // state absorbs it, and the move still completes cleanly.
    mock.drop_next_replies(1);

    let readback = wait_for(&handle, 0, "recovery from glitch", |r| {
        r.status.done && r.position == 2000
    })
    .await;
    assert!(!readback.status.comm_error);
    assert!(!readback.status.problem);

    handle.shutdown();
}

#[tokio::test]
async fn persistent_failure_fails_the_axis_and_clears_the_motion() {
    let (handle, mock, _host) = connect_mm4000(MockProfile::default()).await;

    handle
        .submit(MotionRequest::new(0, MotionCommand::MoveAbs(5000.0)))
        .expect("submit");
    // Swallow every reply: Normal -> Retry -> CommError.
    mock.drop_next_replies(50);

    let readback = wait_for(&handle, 0, "comm error surfaced", |r| {
        r.status.comm_error
    })
    .await;
    assert!(readback.status.problem);
    assert!(!readback.status.done);

    handle.shutdown();
}

#[tokio::test]
async fn stalled_axis_gets_stopped_and_recovers_on_the_next_move() {
    let (handle, mock, _host) = connect_mm4000(MockProfile {
        units_per_poll: 1.0,
        ..MockProfile::default()
    })
    .await;

    mock.freeze(true);
    handle
        .submit(MotionRequest::new(0, MotionCommand::MoveAbs(2000.0)))
        .expect("submit");

    // The no-motion ceiling trips: problem asserted, stop issued.
    let readback = wait_for(&handle, 0, "stall detection", |r| r.status.problem).await;
    assert!(!readback.status.comm_error);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(mock.saw("1ST"));

    // The stall is not fatal: the next move succeeds.
    mock.freeze(false);
    handle
        .submit(MotionRequest::new(0, MotionCommand::MoveAbs(2000.0)))
        .expect("submit after stall");
    let readback = wait_for(&handle, 0, "recovery move", |r| {
        r.status.done && r.position == 2000
    })
    .await;
    assert!(!readback.status.problem);

    handle.shutdown();
}

#[tokio::test]
async fn premature_done_is_caught_by_the_settle_requery() {
    let (handle, mock, _host) = connect_mm4000(MockProfile {
        units_per_poll: 1.0,
        premature_done: true,
        ..MockProfile::default()
    })
    .await;

    handle
        .submit(
            MotionRequest::new(0, MotionCommand::MoveAbs(3000.0))
                .post(Directive::Controller("1MO".to_string())),
        )
        .expect("submit");

    // The first status reply claims done while the stage is still
    // travelling; the settle re-query must withdraw it, so completion
    // only lands at the true target with a single dispatch.
    let readback = wait_for(&handle, 0, "settled completion", |r| r.status.done).await;
    assert_eq!(readback.position, 3000);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let dispatches = mock
        .received()
        .iter()
        .filter(|c| c.as_str() == "1MO")
        .count();
    assert_eq!(dispatches, 1);

    handle.shutdown();
}

#[tokio::test]
async fn host_directive_is_delivered_not_sent_to_the_wire() {
    let (handle, mock, mut host_rx) = connect_mm4000(MockProfile {
        units_per_poll: 1.0,
        ..MockProfile::default()
    })
    .await;

    handle
        .submit(
            MotionRequest::new(1, MotionCommand::MoveAbs(1000.0)).post(Directive::Host {
                target: "beamline:shutter".to_string(),
                value: 1.0,
            }),
        )
        .expect("submit");

    let event = tokio::time::timeout(Duration::from_secs(5), host_rx.recv())
        .await
        .expect("host event within deadline")
        .expect("channel open");
    assert_eq!(event.target, "beamline:shutter");
    assert_eq!(event.value, 1.0);

    // Host directives never become controller traffic.
    assert!(!mock.saw("beamline"));

    handle.shutdown();
}

#[tokio::test]
async fn hardware_self_fault_disables_the_whole_instance() {
    let (engine_side, mock_side) = tokio::io::duplex(1024);

    // Scripted OMS-style responder: healthy through bring-up, then the
    // watchdog register reports nonzero once a move is under way.
    let responder = tokio::spawn(async move {
        let (read_half, mut write_half) = tokio::io::split(mock_side);
        let mut reader = BufReader::new(read_half);
        let mut line = Vec::new();
        let mut moving = false;
        loop {
            line.clear();
            match reader.read_until(b'\r', &mut line).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let message = String::from_utf8_lossy(&line).into_owned();
            let reply = match message.as_str() {
                "AX RP" => Some(if moving { "50" } else { "0" }),
                "AX RA" => Some(if moving { "PNNN" } else { "PDNN" }),
                "#WS" => Some(if moving { "=1" } else { "=0" }),
                "WY" => Some("VME58 ver 2.35-8"),
                "AA ST" => None,
                m if m.starts_with("AX MA") => {
                    moving = true;
                    None
                }
                _ => None,
            };
            if let Some(reply) = reply {
                if write_half
                    .write_all(format!("{reply}\r").as_bytes())
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }
    });

    let config = ControllerConfig {
        axes: Some(1),
        ..test_config()
    };
    let (controller, handle, _host) = Controller::connect(
        config,
        Arc::new(motion_dialects::oms58()),
        Box::new(engine_side),
    )
    .await
    .expect("bring-up");
    assert!(handle.ident().contains("VME58"));
    tokio::spawn(controller.run());

    handle
        .submit(MotionRequest::new(0, MotionCommand::MoveAbs(100.0)))
        .expect("submit");

    let readback = wait_for(&handle, 0, "self-fault disable", |r| r.status.problem).await;
    assert!(readback.status.problem);
    assert!(handle.is_disabled());

    // A disabled instance accepts nothing further.
    let err = handle
        .submit(MotionRequest::new(0, MotionCommand::MoveAbs(0.0)))
        .err()
        .expect("submit after disable must fail");
    assert!(matches!(err, motion_core::error::MotionError::Disabled));

    responder.abort();
}

#[tokio::test]
async fn read_info_refreshes_an_idle_axis() {
    let (handle, _mock, _host) = connect_mm4000(MockProfile::default()).await;

    handle
        .submit(MotionRequest::new(0, MotionCommand::ReadInfo))
        .expect("submit");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let readback = handle.axis(0).expect("snapshot");
    assert!(readback.status.done);
    assert!(!readback.status.moving);

    handle.shutdown();
}

mod support;

use std::collections::VecDeque;
use std::time::Duration;

use camnode_core::capture::MemoryClass;
use camnode_core::cycle::{CycleController, CycleFault, CycleOutcome, CyclePhase, CycleReport};
use camnode_core::power::{POWER_DOWN_STEPS, PowerDomain, PowerState, StepFault};
use camnode_core::upload::FailureReason;
use embassy_futures::block_on;

use support::{Call, Exchange, OK_RESPONSE, Rig, Shared, config, jpeg, rig};

const POLL: Duration = Duration::from_millis(500);
const RETRY: Duration = Duration::from_secs(2);
const SETTLE: Duration = Duration::from_millis(100);

#[test]
fn first_attempt_success_uploads_once() {
    let mut rig = rig();
    rig.connector.exchanges.push_back(Exchange::Respond(OK_RESPONSE));

    let (result, bench) = run(rig);
    let report = result.expect("cycle should complete");
    let bench = bench.borrow();

    assert_eq!(report.outcome, CycleOutcome::Uploaded { attempts: 1 });
    assert!(report.outcome.is_success());
    assert_eq!(report.upload_attempts, 1);
    assert_eq!(bench.count(&Call::Connect), 1);
    assert_eq!(bench.requests.len(), 1);
    assert_eq!(bench.requests[0].body, jpeg(5000));
    assert_eq!(report.artifact_len, Some(report.body_bytes_sent));
    assert_eq!(bench.responses, [(1, b"{\"stored\":true}".to_vec())]);
    assert_eq!(bench.delays(), [POLL, POLL, SETTLE]);
    assert_eq!(report.active_for, POLL * 2);
    assert_eq!(report.phase, CyclePhase::Sleeping);
    assert_eq!(report.power.final_state, PowerState::Sleeping);
}

#[test]
fn request_carries_identity_headers() {
    let mut rig = rig();
    rig.connector.exchanges.push_back(Exchange::Respond(OK_RESPONSE));

    let (_, bench) = run(rig);
    let bench = bench.borrow();
    let head = &bench.requests[0].head;

    assert!(head.starts_with("POST /upload HTTP/1.1\r\n"), "{head}");
    assert!(head.contains("\r\nHost: 192.168.4.1:5000\r\n"));
    assert!(head.contains("\r\nX-API-Key: test-key\r\n"));
    assert!(head.contains("\r\nContent-Type: image/jpeg\r\n"));
    assert!(head.contains("\r\nDevice-ID: ESP32_CAM_001\r\n"));
    assert!(head.contains("\r\nContent-Length: 5000\r\n"));
}

#[test]
fn link_failure_skips_upload_and_still_sleeps() {
    let mut rig = rig();
    rig.radio.associate_on_poll = None;

    let (result, bench) = run(rig);
    let report = result.expect("link failure is not fatal");
    let bench = bench.borrow();

    assert_eq!(report.outcome, CycleOutcome::NoLink);
    assert_eq!(report.link.polls, 30);
    assert_eq!(report.upload_attempts, 0);
    assert_eq!(bench.count(&Call::Connect), 0);
    assert!(bench.requests.is_empty());
    assert_eq!(bench.count(&Call::CameraGiveBack), 1);
    assert_eq!(bench.count(&Call::RadioDisconnect { forget: true }), 0);
    assert_eq!(bench.count(&Call::Suspend), 1);
    assert_eq!(report.phase, CyclePhase::Sleeping);

    let delays = bench.delays();
    assert_eq!(delays.len(), 30);
    assert!(delays[..29].iter().all(|delay| *delay == POLL));
    assert!(has_event(&bench.lines, "link-unavailable"));
    assert!(has_event(&bench.lines, "upload-skipped"));
}

#[test]
fn refused_connections_exhaust_three_attempts() {
    let (result, bench) = run(rig());
    let report = result.expect("transport failure is not fatal");
    let bench = bench.borrow();

    assert_eq!(
        report.outcome,
        CycleOutcome::UploadFailed {
            attempts: 3,
            last: Some(FailureReason::ConnectionRefused),
        }
    );
    assert!(!report.outcome.is_success());
    assert_eq!(bench.count(&Call::Connect), 3);
    assert_eq!(bench.count(&Call::Close), 3);
    assert_eq!(bench.delays(), [POLL, POLL, RETRY, RETRY, SETTLE]);
    assert_eq!(bench.count(&Call::Suspend), 1);
    assert!(has_event(&bench.lines, "uploads-exhausted"));
    assert_eq!(report.power.final_state, PowerState::Sleeping);
}

#[test]
fn server_errors_are_retried_until_success() {
    let mut rig = rig();
    rig.connector.exchanges = VecDeque::from([
        Exchange::Respond("HTTP/1.1 500 Internal Server Error\r\n\r\n"),
        Exchange::Respond("HTTP/1.1 404 Not Found\r\n\r\n"),
        Exchange::Respond(OK_RESPONSE),
    ]);

    let (result, bench) = run(rig);
    let report = result.expect("cycle should complete");
    let bench = bench.borrow();

    assert_eq!(report.outcome, CycleOutcome::Uploaded { attempts: 3 });
    assert_eq!(bench.requests.len(), 3);
    assert!(bench.requests.iter().all(|request| request.body.len() == 5000));
    assert_eq!(bench.delays(), [POLL, POLL, RETRY, RETRY, SETTLE]);

    let failures: Vec<&String> = bench
        .lines
        .iter()
        .filter(|line| event_of(line).starts_with("upload-failed"))
        .collect();
    assert_eq!(failures.len(), 2);
    assert!(failures[0].contains("status=500"));
    assert!(failures[1].contains("server error 404"));
}

#[test]
fn retries_stop_on_first_success() {
    let mut rig = rig();
    rig.connector.exchanges = VecDeque::from([
        Exchange::ConnectTimeout,
        Exchange::Respond(OK_RESPONSE),
        Exchange::Respond(OK_RESPONSE),
    ]);

    let (result, bench) = run(rig);
    let report = result.expect("cycle should complete");
    let bench = bench.borrow();

    assert_eq!(report.outcome, CycleOutcome::Uploaded { attempts: 2 });
    assert_eq!(bench.count(&Call::Connect), 2);
    assert_eq!(bench.delays(), [POLL, POLL, RETRY, SETTLE]);
}

#[test]
fn dropped_transfer_counts_as_attempt() {
    let mut rig = rig();
    rig.connector.exchanges = VecDeque::from([Exchange::DropMidBody, Exchange::Respond(OK_RESPONSE)]);

    let (result, bench) = run(rig);
    let report = result.expect("cycle should complete");
    let bench = bench.borrow();

    assert_eq!(report.outcome, CycleOutcome::Uploaded { attempts: 2 });
    assert!(bench.requests[0].body.is_empty());
    assert_eq!(bench.requests[1].body.len(), 5000);
    assert_eq!(report.body_bytes_sent, 5000);
}

#[test]
fn empty_captures_skip_upload() {
    let mut rig = rig();
    rig.camera.frames = VecDeque::from([None, None, None]);
    rig.connector.exchanges.push_back(Exchange::Respond(OK_RESPONSE));

    let (result, bench) = run(rig);
    let report = result.expect("empty capture is not fatal");
    let bench = bench.borrow();

    assert_eq!(report.outcome, CycleOutcome::NoImage);
    assert_eq!(report.capture_attempts, 3);
    assert_eq!(report.artifact_len, None);
    assert_eq!(bench.count(&Call::CameraGrab), 3);
    assert_eq!(bench.count(&Call::Connect), 0);
    assert_eq!(bench.count(&Call::CameraGiveBack), 0);
    assert_eq!(bench.delays(), [POLL, POLL, RETRY, RETRY, SETTLE]);
    assert_eq!(bench.count(&Call::Suspend), 1);
}

#[test]
fn capture_retry_recovers_on_third_attempt() {
    let mut rig = rig();
    rig.camera.frames = VecDeque::from([None, None, Some(jpeg(1200))]);
    rig.connector.exchanges.push_back(Exchange::Respond(OK_RESPONSE));

    let (result, bench) = run(rig);
    let report = result.expect("cycle should complete");
    let bench = bench.borrow();

    assert_eq!(report.capture_attempts, 3);
    assert_eq!(report.artifact_len, Some(1200));
    assert_eq!(bench.requests[0].body, jpeg(1200));
    assert_eq!(bench.count(&Call::CameraGiveBack), 1);
}

#[test]
fn link_dropping_before_upload_uses_the_retry_budget() {
    let mut rig = rig();
    rig.radio.drop_after_probes = Some(0);

    let (result, bench) = run(rig);
    let report = result.expect("cycle should complete");
    let bench = bench.borrow();

    assert_eq!(
        report.outcome,
        CycleOutcome::UploadFailed {
            attempts: 3,
            last: Some(FailureReason::NoLink),
        }
    );
    assert_eq!(bench.count(&Call::Connect), 0);
    assert_eq!(bench.count(&Call::CameraGiveBack), 1);
    assert_eq!(bench.delays(), [POLL, POLL, RETRY, RETRY, SETTLE]);
}

#[test]
fn link_recovering_between_attempts_uploads_on_retry() {
    let mut rig = rig();
    rig.radio.drop_on_probe = Some(0);
    rig.connector.exchanges.push_back(Exchange::Segments(&[
        "HTTP/1.1 200 OK\r\n",
        "Content-Length: 15\r\n\r\n",
        "{\"stored\":true}",
    ]));

    let (result, bench) = run(rig);
    let report = result.expect("cycle should complete");
    let bench = bench.borrow();

    assert_eq!(report.outcome, CycleOutcome::Uploaded { attempts: 2 });
    assert_eq!(report.upload_attempts, 2);
    assert_eq!(bench.count(&Call::Connect), 1);
    assert_eq!(bench.requests[0].body, jpeg(5000));
    assert_eq!(bench.responses, [(2, b"{\"stored\":true}".to_vec())]);
    assert_eq!(bench.delays(), [POLL, POLL, RETRY, SETTLE]);
    assert_eq!(bench.count(&Call::RadioDisconnect { forget: true }), 1);
}

#[test]
fn power_down_runs_every_step_despite_failures() {
    let mut rig = rig();
    rig.connector.exchanges.push_back(Exchange::Respond(OK_RESPONSE));
    rig.camera.fail_deinit = true;
    rig.radio.fail_stop = true;
    rig.sleeper.fail_domain = Some(PowerDomain::RtcSlowMemory);

    let (result, bench) = run(rig);
    let report = result.expect("step failures are not fatal");
    let bench = bench.borrow();

    let order = [
        Call::CameraDeinit,
        Call::CameraPowerDown,
        Call::RadioDisconnect { forget: true },
        Call::RadioStop,
        Call::ShortRangeOff,
        Call::DomainOff(PowerDomain::RtcPeripherals),
        Call::DomainOff(PowerDomain::RtcSlowMemory),
        Call::DomainOff(PowerDomain::RtcFastMemory),
        Call::WakeArmed(Duration::from_secs(60)),
        Call::Flush,
        Call::Delay(SETTLE),
        Call::Suspend,
    ];
    let positions: Vec<usize> = order
        .iter()
        .map(|call| bench.position(call).unwrap_or_else(|| panic!("missing {call:?}")))
        .collect();
    assert!(
        positions.windows(2).all(|pair| pair[0] < pair[1]),
        "power-down out of order: {:?}",
        bench.calls
    );

    assert_eq!(
        report.power.visited,
        [
            PowerState::SensorShutdown,
            PowerState::RadioShutdown,
            PowerState::DomainShutdown,
            PowerState::Sleeping,
        ]
    );
    let planned: Vec<PowerState> = POWER_DOWN_STEPS.iter().map(|step| step.enters).collect();
    assert_eq!(report.power.visited.as_slice(), planned.as_slice());
    assert_eq!(
        report.power.faults,
        [
            StepFault::SensorDeinit,
            StepFault::RadioStop,
            StepFault::Domain(PowerDomain::RtcSlowMemory),
        ]
    );
    assert!(bench.lines.iter().any(|line| {
        line.contains("power-fault sensor-shutdown") && line.contains("camera deinit failed")
    }));
    assert!(
        bench
            .lines
            .iter()
            .any(|line| line.contains("power sleeping") && line.contains("wake_in=60s"))
    );
}

#[test]
fn sensor_init_failure_is_fatal() {
    let mut rig = rig();
    rig.camera.fail_init = true;

    let (result, bench) = run(rig);
    let bench = bench.borrow();

    assert_eq!(result, Err(CycleFault::SensorInit));
    assert_eq!(bench.count(&Call::CameraGrab), 0);
    assert_eq!(bench.count(&Call::Connect), 0);
    assert_eq!(bench.count(&Call::Suspend), 0);
    assert!(has_event(&bench.lines, "sensor-init-failed"));
}

#[test]
fn phases_are_logged_in_order() {
    let mut rig = rig();
    rig.connector.exchanges.push_back(Exchange::Respond(OK_RESPONSE));

    let (_, bench) = run(rig);
    let bench = bench.borrow();
    let phases: Vec<&str> = bench
        .lines
        .iter()
        .filter_map(|line| event_of(line).strip_prefix("phase "))
        .collect();

    assert_eq!(
        phases,
        [
            "linking",
            "configuring",
            "acquiring",
            "uploading",
            "releasing",
            "powering-down",
        ]
    );
    let summary = bench
        .lines
        .iter()
        .find(|line| event_of(line).starts_with("cycle-summary"))
        .expect("summary logged");
    assert!(summary.contains("result=success captures=1 uploads=1"));
}

#[test]
fn every_acquired_frame_is_released_once() {
    let scenarios: [fn(&mut Rig); 4] = [
        |rig| rig.connector.exchanges.push_back(Exchange::Respond(OK_RESPONSE)),
        |rig| rig.radio.associate_on_poll = None,
        |_| {},
        |rig| rig.camera.frames = VecDeque::from([None, Some(jpeg(64))]),
    ];

    for configure in scenarios {
        let mut rig = rig();
        configure(&mut rig);
        let (result, bench) = run(rig);
        result.expect("cycle should complete");

        let bench = bench.borrow();
        let acquired = bench
            .lines
            .iter()
            .filter(|line| event_of(line).starts_with("frame-acquired"))
            .count();
        let released = bench
            .lines
            .iter()
            .filter(|line| event_of(line).starts_with("frame-released"))
            .count();
        assert_eq!(acquired, 1);
        assert_eq!(released, acquired);
        assert_eq!(bench.count(&Call::CameraGiveBack), acquired);
    }
}

fn run(rig: Rig) -> (Result<CycleReport, CycleFault>, Shared) {
    let Rig {
        bench,
        radio,
        camera,
        connector,
        sleeper,
        clock,
        sink,
    } = rig;
    let controller = CycleController::new(
        config(),
        MemoryClass::Abundant,
        radio,
        camera,
        connector,
        sleeper,
        clock,
        sink,
    );
    (block_on(controller.run()), bench)
}

fn event_of(line: &str) -> &str {
    line.split_once("] ").map_or(line, |(_, event)| event)
}

fn has_event(lines: &[String], event: &str) -> bool {
    lines.iter().any(|line| event_of(line).starts_with(event))
}

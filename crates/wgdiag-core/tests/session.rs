//! Session and transport worker behavior against the demo adapter

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::{demo_session, fast_config, wait_until, Recorder};
use wgdiag_core::demo::{DemoAdapter, DemoConnector};
use wgdiag_core::prelude::*;

const WAIT: Duration = Duration::from_secs(5);

fn command(request: &str, timeout_ms: u64) -> Command {
    Command::new(request, None, timeout_ms).unwrap()
}

#[test]
fn test_start_twice_is_rejected() {
    let (session, _adapter) = demo_session();
    session.start("demo").unwrap();
    assert_eq!(session.start("demo"), Err(SessionError::AlreadyStarted));
    session.stop();
    assert!(!session.is_started());

    // A stopped session can be started again
    session.start("demo").unwrap();
    session.stop();
}

#[test]
fn test_operations_require_started_session() {
    let (session, _adapter) = demo_session();
    let recorder = Recorder::new();

    assert_eq!(
        session.write(&command("ATZ", 1000)),
        Err(SessionError::NotStarted)
    );
    assert_eq!(
        session.set_response_listener(recorder.listener()),
        Err(SessionError::NotStarted)
    );
    assert_eq!(
        session.submit(&command("ATZ", 1000), recorder.listener()),
        Err(SessionError::NotStarted)
    );
    assert_eq!(session.state(), None);
    assert_eq!(session.link_id(), None);

    // Stopping a session that never started does nothing
    session.stop();
}

#[test]
fn test_submit_delivers_complete_response() {
    let (session, adapter) = demo_session();
    session.start("demo").unwrap();

    let recorder = Recorder::new();
    session
        .submit(&command("ATZ", 1000), recorder.listener())
        .unwrap();

    let outcomes = recorder.wait_for(1, WAIT);
    assert_eq!(outcomes, vec![Outcome::Complete("ELM327 v1.5".to_string())]);
    assert_eq!(adapter.requests(), vec!["ATZ"]);
    assert!(wait_until(WAIT, || session.state() == Some(WorkerState::Idle)));
    assert_eq!(session.link_id(), Some(1));
    session.stop();
}

#[test]
fn test_echo_is_stripped_with_and_without_echo_mode() {
    let (session, _adapter) = demo_session();
    session.start("demo").unwrap();

    let recorder = Recorder::new();
    for request in ["ATE0", "21 20", "ATE1", "ATRV"] {
        session.submit(&command(request, 1000), recorder.listener()).unwrap();
    }

    let outcomes = recorder.wait_for(4, WAIT);
    assert_eq!(outcomes[0], Outcome::Complete("OK".to_string()));
    match &outcomes[1] {
        Outcome::Complete(frame) => assert!(frame.starts_with("61 20 03 5A")),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(outcomes[2], Outcome::Complete("OK".to_string()));
    assert_eq!(outcomes[3], Outcome::Complete("12.6V".to_string()));
    session.stop();
}

#[test]
fn test_stopped_notice_is_filtered() {
    let (session, adapter) = demo_session();
    adapter.set_interrupted("ATFI");
    session.start("demo").unwrap();

    let recorder = Recorder::new();
    session.submit(&command("ATFI", 1000), recorder.listener()).unwrap();

    assert_eq!(
        recorder.wait_for(1, WAIT),
        vec![Outcome::Complete("BUS INIT: OK".to_string())]
    );
    session.stop();
}

#[test]
fn test_silent_adapter_times_out_with_empty_partial() {
    let (session, adapter) = demo_session();
    adapter.set_silent("21 12");
    session.start("demo").unwrap();

    let recorder = Recorder::new();
    let started = Instant::now();
    session.submit(&command("21 12", 100), recorder.listener()).unwrap();

    assert_eq!(
        recorder.wait_for(1, WAIT),
        vec![Outcome::Incomplete(String::new())]
    );
    assert!(started.elapsed() >= Duration::from_millis(100));

    // The slot is free again once the deadline passed
    session.submit(&command("ATZ", 1000), recorder.listener()).unwrap();
    let outcomes = recorder.wait_for(2, WAIT);
    assert_eq!(outcomes[1], Outcome::Complete("ELM327 v1.5".to_string()));
    session.stop();
}

#[test]
fn test_partial_response_is_reported_on_timeout() {
    let (session, adapter) = demo_session();
    adapter.set_partial("ATI");
    session.start("demo").unwrap();

    let recorder = Recorder::new();
    session.submit(&command("ATI", 150), recorder.listener()).unwrap();

    assert_eq!(
        recorder.wait_for(1, WAIT),
        vec![Outcome::Incomplete("ELM327 v1.5".to_string())]
    );
    session.stop();
}

#[test]
fn test_late_response_does_not_reach_next_command() {
    let (session, adapter) = demo_session();
    adapter.set_reply_delay(Duration::from_millis(200));
    session.start("demo").unwrap();

    let recorder = Recorder::new();
    session.submit(&command("ATZ", 50), recorder.listener()).unwrap();
    let outcomes = recorder.wait_for(1, WAIT);
    assert_eq!(outcomes[0], Outcome::Incomplete(String::new()));

    // The late "ELM327" reply arrives while nothing is in flight
    thread::sleep(Duration::from_millis(300));
    adapter.set_reply_delay(Duration::ZERO);
    session.submit(&command("ATRV", 1000), recorder.listener()).unwrap();

    let outcomes = recorder.wait_for(2, WAIT);
    assert_eq!(outcomes[1], Outcome::Complete("12.6V".to_string()));
    session.stop();
}

#[test]
fn test_at_most_one_command_in_flight() {
    let (session, adapter) = demo_session();
    adapter.set_reply_delay(Duration::from_millis(3));
    session.start("demo").unwrap();

    let recorder = Recorder::new();
    let mut callers = Vec::new();
    for caller in 0..4 {
        let session = session.clone();
        let recorder = recorder.clone();
        callers.push(thread::spawn(move || {
            let request = ["ATZ", "ATRV", "21 20", "ATI"][caller];
            for _ in 0..10 {
                session
                    .submit(&command(request, 1000), recorder.listener())
                    .unwrap();
            }
        }));
    }
    for caller in callers {
        caller.join().unwrap();
    }

    let outcomes = recorder.wait_for(40, WAIT);
    assert!(outcomes.iter().all(|o| matches!(o, Outcome::Complete(_))));
    assert_eq!(adapter.request_count(), 40);
    assert_eq!(adapter.overlaps(), 0);
    session.stop();
}

#[test]
fn test_busy_when_slot_not_released_in_time() {
    let (session, adapter) = demo_session();
    adapter.set_silent("21 12");
    session.start("demo").unwrap();

    let recorder = Recorder::new();
    session.submit(&command("21 12", 2000), recorder.listener()).unwrap();

    let result = session.submit_within(
        &command("ATZ", 1000),
        recorder.listener(),
        Duration::from_millis(50),
    );
    assert!(matches!(
        result,
        Err(SessionError::Protocol(ProtocolError::Busy { .. }))
    ));
    session.stop();
}

#[test]
fn test_not_ready_while_adapter_unreachable() {
    let adapter = DemoAdapter::deterministic();
    adapter.set_refuse_connections(true);
    let session = Session::with_connector(
        fast_config(),
        Arc::new(DemoConnector::new(adapter.clone())),
    );
    session.start("demo").unwrap();

    let recorder = Recorder::new();
    let result = session.submit_within(
        &command("ATZ", 1000),
        recorder.listener(),
        Duration::from_millis(50),
    );
    let error = result.unwrap_err();
    assert!(matches!(
        error,
        SessionError::Protocol(ProtocolError::NotReady { .. })
    ));
    assert!(error.is_transport());

    // Once the adapter accepts, the same session gets through
    adapter.set_refuse_connections(false);
    session.submit(&command("ATZ", 1000), recorder.listener()).unwrap();
    assert_eq!(
        recorder.wait_for(1, WAIT),
        vec![Outcome::Complete("ELM327 v1.5".to_string())]
    );
    session.stop();
}

#[test]
fn test_stop_fails_in_flight_command_and_ends_loop() {
    let (session, adapter) = demo_session();
    adapter.set_silent("21 12");
    session.start("demo").unwrap();

    let recorder = Recorder::new();
    session.submit(&command("21 12", 5000), recorder.listener()).unwrap();
    assert!(session.is_running());

    let started = Instant::now();
    session.stop();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!session.is_running());
    assert!(!session.is_started());

    assert_eq!(
        recorder.wait_for(1, WAIT),
        vec![Outcome::Failed(ProtocolError::Stopped)]
    );
}

#[test]
fn test_stop_from_listener_does_not_deadlock() {
    let (session, _adapter) = demo_session();
    session.start("demo").unwrap();

    let stopper = session.clone();
    let done = Arc::new(AtomicUsize::new(0));
    let seen = done.clone();
    let listener: Arc<dyn ResponseListener> = Arc::new(move |_outcome: Outcome| {
        stopper.stop();
        seen.fetch_add(1, Ordering::SeqCst);
    });
    session.submit(&command("ATZ", 1000), listener).unwrap();

    assert!(wait_until(WAIT, || done.load(Ordering::SeqCst) == 1));
    assert!(!session.is_started());
}

#[test]
fn test_panicking_listener_does_not_kill_worker() {
    let (session, _adapter) = demo_session();
    session.start("demo").unwrap();

    let listener: Arc<dyn ResponseListener> =
        Arc::new(|_outcome: Outcome| panic!("listener failure"));
    session.submit(&command("ATZ", 1000), listener).unwrap();

    let recorder = Recorder::new();
    session.submit(&command("ATI", 1000), recorder.listener()).unwrap();
    assert_eq!(
        recorder.wait_for(1, WAIT),
        vec![Outcome::Complete("ELM327 v1.5".to_string())]
    );
    assert!(session.is_running());
    session.stop();
}

#[test]
fn test_link_failure_reconnects() {
    let (session, adapter) = demo_session();
    session.start("demo").unwrap();

    let recorder = Recorder::new();
    session.submit(&command("ATZ", 1000), recorder.listener()).unwrap();
    recorder.wait_for(1, WAIT);
    assert_eq!(session.link_id(), Some(1));

    adapter.set_fail_io(true);
    assert!(wait_until(WAIT, || adapter.connections() >= 2));
    assert!(wait_until(WAIT, || session.link_id() == Some(2)));

    session.submit(&command("ATRV", 1000), recorder.listener()).unwrap();
    let outcomes = recorder.wait_for(2, WAIT);
    assert_eq!(outcomes[1], Outcome::Complete("12.6V".to_string()));
    session.stop();
}

#[test]
fn test_write_uses_registered_listener() {
    let (session, _adapter) = demo_session();
    session.start("demo").unwrap();

    let first = Recorder::new();
    let second = Recorder::new();

    session.set_response_listener(first.listener()).unwrap();
    session.write(&command("ATZ", 1000)).unwrap();
    // Waits for the ATZ outcome before swapping
    session.set_response_listener(second.listener()).unwrap();
    session.write(&command("ATRV", 1000)).unwrap();

    assert_eq!(
        first.wait_for(1, WAIT),
        vec![Outcome::Complete("ELM327 v1.5".to_string())]
    );
    assert_eq!(
        second.wait_for(1, WAIT),
        vec![Outcome::Complete("12.6V".to_string())]
    );
    session.stop();
}

/// Registration and write are separate calls: a listener registered by one
/// caller receives the response to another caller's write. `submit` pairs
/// them and is not affected.
#[test]
fn test_separate_registration_can_misroute_responses() {
    let (session, _adapter) = demo_session();
    session.start("demo").unwrap();

    let caller_a = Recorder::new();
    let caller_b = Recorder::new();

    // A registers, B registers before A gets to write
    session.set_response_listener(caller_a.listener()).unwrap();
    session.set_response_listener(caller_b.listener()).unwrap();
    session.write(&command("ATZ", 1000)).unwrap();

    assert_eq!(
        caller_b.wait_for(1, WAIT),
        vec![Outcome::Complete("ELM327 v1.5".to_string())]
    );
    assert_eq!(caller_a.len(), 0);

    session.submit(&command("ATRV", 1000), caller_a.listener()).unwrap();
    assert_eq!(
        caller_a.wait_for(1, WAIT),
        vec![Outcome::Complete("12.6V".to_string())]
    );
    assert_eq!(caller_b.len(), 1);
    session.stop();
}

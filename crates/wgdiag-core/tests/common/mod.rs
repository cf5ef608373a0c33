//! Shared helpers for tests driving the demo adapter

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use wgdiag_core::demo::{DemoAdapter, DemoConnector};
use wgdiag_core::protocol::{Outcome, ResponseListener};
use wgdiag_core::prelude::{Session, SessionConfig};

/// Settings with short polling so tests stay fast
pub fn fast_config() -> SessionConfig {
    SessionConfig {
        poll_interval_ms: 2,
        acquire_timeout_ms: 3000,
        listener_wait_ms: 2000,
        reconnect_delay_ms: 10,
        ..SessionConfig::default()
    }
}

/// Route library logs to the test output; `RUST_LOG=debug` shows traffic
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Session wired to a deterministic demo adapter
pub fn demo_session() -> (Arc<Session>, DemoAdapter) {
    init_logging();
    let adapter = DemoAdapter::deterministic();
    let session = Session::with_connector(
        fast_config(),
        Arc::new(DemoConnector::new(adapter.clone())),
    );
    (Arc::new(session), adapter)
}

/// Listener collecting every outcome it receives
#[derive(Clone, Default)]
pub struct Recorder {
    outcomes: Arc<Mutex<Vec<Outcome>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listener feeding this recorder
    pub fn listener(&self) -> Arc<dyn ResponseListener> {
        let recorder = self.clone();
        Arc::new(move |outcome: Outcome| recorder.push(outcome))
    }

    pub fn push(&self, outcome: Outcome) {
        self.outcomes.lock().unwrap().push(outcome);
    }

    pub fn outcomes(&self) -> Vec<Outcome> {
        self.outcomes.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.outcomes.lock().unwrap().len()
    }

    /// Wait until at least `count` outcomes arrived
    pub fn wait_for(&self, count: usize, timeout: Duration) -> Vec<Outcome> {
        assert!(
            wait_until(timeout, || self.len() >= count),
            "expected {} outcomes, got {:?}",
            count,
            self.outcomes()
        );
        self.outcomes()
    }
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

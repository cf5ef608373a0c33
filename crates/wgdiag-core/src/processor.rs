//! Execution Orchestrator
//!
//! Runs diagnostic packages over a [`Session`]: the init sequence once per
//! link establishment, then the cyclic commands forever, forwarding decoded
//! values to a [`DataHandler`] until cancelled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::command::Command;
use crate::handler::DataHandler;
use crate::package::{catalog, Package};
use crate::protocol::{Outcome, ProtocolError, ResponseListener};
use crate::session::{Session, SessionError};

/// Text reported for every field of a command that timed out
pub const NOT_AVAILABLE: &str = "NA";

/// Cooperative cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create an unset token
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How a package run ended
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Interrupted through the handle
    Cancelled,
    /// An init command got an unexpected answer or none at all
    InitFailed {
        /// The failing request
        request: String,
        /// What came back (partial on timeout)
        response: String,
    },
    /// The session failed in a way retrying cannot fix
    Aborted(SessionError),
    /// The run thread panicked
    Panicked,
}

/// Terminal result of one command, as seen by the processor
enum Exec {
    Complete(String),
    Incomplete(String),
    Failed(ProtocolError),
    Rejected(SessionError),
    Cancelled,
}

/// Forwards the outcome of one command to the waiting processor thread
struct OutcomeSink(Mutex<Sender<Outcome>>);

impl OutcomeSink {
    fn send(&self, outcome: Outcome) {
        let tx = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        // The processor may have stopped waiting after a cancellation
        let _ = tx.send(outcome);
    }
}

impl ResponseListener for OutcomeSink {
    fn on_response(&self, response: &str) {
        self.send(Outcome::Complete(response.to_string()));
    }

    fn on_incomplete_response(&self, partial: &str) {
        self.send(Outcome::Incomplete(partial.to_string()));
    }

    fn on_error(&self, error: &ProtocolError) {
        self.send(Outcome::Failed(error.clone()));
    }
}

/// Send `command` and block until its outcome or cancellation
fn execute(session: &Session, command: &Command, cancel: &CancelToken) -> Exec {
    let poll = session.config().poll_interval();
    let acquire = session.config().acquire_timeout();
    let (tx, rx) = mpsc::channel();
    let sink: Arc<dyn ResponseListener> = Arc::new(OutcomeSink(Mutex::new(tx)));

    // Acquire in poll-sized steps so cancellation is seen while waiting
    let started = Instant::now();
    loop {
        if cancel.is_cancelled() {
            return Exec::Cancelled;
        }
        match session.submit_within(command, sink.clone(), poll) {
            Ok(()) => break,
            Err(SessionError::Protocol(
                ProtocolError::Busy { .. } | ProtocolError::NotReady { .. },
            )) if started.elapsed() < acquire => continue,
            Err(e) => return Exec::Rejected(e),
        }
    }
    drop(sink);

    loop {
        if cancel.is_cancelled() {
            return Exec::Cancelled;
        }
        match rx.recv_timeout(poll) {
            Ok(Outcome::Complete(response)) => return Exec::Complete(response),
            Ok(Outcome::Incomplete(partial)) => return Exec::Incomplete(partial),
            Ok(Outcome::Failed(e)) => return Exec::Failed(e),
            Err(RecvTimeoutError::Timeout) => continue,
            // Worker dropped the listener without an outcome
            Err(RecvTimeoutError::Disconnected) => return Exec::Failed(ProtocolError::Stopped),
        }
    }
}

fn forward(handler: &dyn DataHandler, key: &str, text: &str, value: f64) {
    if let Err(e) = handler.handle_text(key, text) {
        warn!("Data handler rejected text of '{}': {}", key, e);
    }
    if let Err(e) = handler.handle_value(key, value) {
        warn!("Data handler rejected value of '{}': {}", key, e);
    }
}

enum InitStep {
    Done,
    Retry,
    Stop(RunOutcome),
}

fn run_init(session: &Session, package: &Package, cancel: &CancelToken) -> InitStep {
    for command in package.init_commands() {
        match execute(session, command, cancel) {
            Exec::Complete(response) if command.verify_response(&response) => {}
            Exec::Complete(response) | Exec::Incomplete(response) => {
                return InitStep::Stop(RunOutcome::InitFailed {
                    request: command.request().to_string(),
                    response,
                });
            }
            Exec::Failed(e) if e.is_transport() => {
                warn!("Init of '{}' interrupted: {}", package.name(), e);
                return InitStep::Retry;
            }
            Exec::Rejected(e) if e.is_transport() => {
                warn!("Init of '{}' interrupted: {}", package.name(), e);
                return InitStep::Retry;
            }
            Exec::Failed(e) => return InitStep::Stop(RunOutcome::Aborted(e.into())),
            Exec::Rejected(e) => return InitStep::Stop(RunOutcome::Aborted(e)),
            Exec::Cancelled => return InitStep::Stop(RunOutcome::Cancelled),
        }
    }
    InitStep::Done
}

fn run_package(
    session: &Session,
    package: &Package,
    handler: &dyn DataHandler,
    cancel: &CancelToken,
) -> RunOutcome {
    let poll = session.config().poll_interval();
    if let Err(e) = handler.switch_package(package) {
        warn!("Data handler rejected package '{}': {}", package.name(), e);
    }

    let mut cycle = package.command_cycle();
    let mut initialized = false;
    let mut initialized_link = None;

    while !cancel.is_cancelled() {
        // The ECU session does not survive a reconnection
        if initialized {
            let link = session.link_id();
            if initialized_link.is_none() {
                initialized_link = link;
            } else if link != initialized_link {
                info!("Link to adapter re-established, re-initializing '{}'", package.name());
                initialized = false;
            }
        }

        if !initialized {
            match run_init(session, package, cancel) {
                InitStep::Done => {
                    info!("Package '{}' initialized", package.name());
                    initialized = true;
                    // A link lost during init fails one of its commands
                    initialized_link = session.link_id();
                }
                InitStep::Retry => thread::sleep(poll),
                InitStep::Stop(outcome) => return outcome,
            }
            continue;
        }

        let command = cycle.next_command();
        match execute(session, command.command(), cancel) {
            Exec::Complete(response) => {
                if !command.verify_response(&response) {
                    debug!("Unexpected answer to {:?}: {:?}", command.request(), response);
                    continue;
                }
                for field in command.decode(&response) {
                    forward(handler, &field.key, &field.text, field.value);
                }
            }
            Exec::Incomplete(_) => {
                for field in command.fields() {
                    forward(handler, field.key(), NOT_AVAILABLE, 0.0);
                }
            }
            Exec::Failed(e) if e.is_transport() => {
                warn!("Transport error on {:?}: {}, re-initializing", command.request(), e);
                initialized = false;
                thread::sleep(poll);
            }
            Exec::Rejected(e) if e.is_transport() => {
                warn!("Link unavailable for {:?}: {}, re-initializing", command.request(), e);
                initialized = false;
            }
            Exec::Failed(e) => return RunOutcome::Aborted(e.into()),
            Exec::Rejected(e) => return RunOutcome::Aborted(e),
            Exec::Cancelled => break,
        }
    }

    RunOutcome::Cancelled
}

/// Handle to a running package.
///
/// Dropping the handle cancels the run without waiting for it.
pub struct ExecutionHandle {
    cancel: CancelToken,
    thread: Mutex<Option<JoinHandle<RunOutcome>>>,
    outcome: Mutex<Option<RunOutcome>>,
}

impl ExecutionHandle {
    /// Request cancellation; with `block`, wait until the run has exited
    pub fn interrupt(&self, block: bool) {
        self.cancel.cancel();
        if block {
            self.join();
        }
    }

    /// Whether the run has exited
    pub fn is_finished(&self) -> bool {
        let thread = self.thread.lock().unwrap_or_else(PoisonError::into_inner);
        thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Token cancelling this run
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Wait for the run to exit and return how it ended
    pub fn wait(self) -> RunOutcome {
        self.join();
        self.outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or(RunOutcome::Panicked)
    }

    fn join(&self) {
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let outcome = handle.join().unwrap_or(RunOutcome::Panicked);
            *self.outcome.lock().unwrap_or_else(PoisonError::into_inner) = Some(outcome);
        }
    }
}

impl Drop for ExecutionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Verifies adapters and runs packages over one session
pub struct Processor {
    session: Arc<Session>,
    verification: Vec<Command>,
}

impl Processor {
    /// Processor using the built-in verification sequence
    pub fn new(session: Arc<Session>) -> Self {
        Self::with_verification(session, catalog::verification_commands())
    }

    /// Processor with a custom verification sequence
    pub fn with_verification(session: Arc<Session>, verification: Vec<Command>) -> Self {
        Self {
            session,
            verification,
        }
    }

    /// The session commands go through
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Start a session on `address` and check the adapter answers the
    /// verification sequence as expected.
    ///
    /// The session is stopped before returning, whatever the result.
    pub fn verify(&self, address: &str) -> Result<bool, SessionError> {
        info!("Verifying adapter at {}", address);
        self.session.start(address)?;

        let never = CancelToken::new();
        let mut verified = true;
        for command in &self.verification {
            let passed = match execute(&self.session, command, &never) {
                Exec::Complete(response) => {
                    let ok = command.verify_response(&response);
                    if !ok {
                        info!("Unexpected answer to {:?}: {:?}", command.request(), response);
                    }
                    ok
                }
                Exec::Incomplete(partial) => {
                    info!("No answer to {:?} (got {:?})", command.request(), partial);
                    false
                }
                Exec::Failed(e) => {
                    warn!("Verification of {} failed: {}", address, e);
                    false
                }
                Exec::Rejected(e) => {
                    warn!("Verification of {} failed: {}", address, e);
                    false
                }
                Exec::Cancelled => false,
            };
            if !passed {
                verified = false;
                break;
            }
        }

        self.session.stop();
        Ok(verified)
    }

    /// Run `package` on a separate thread until cancelled.
    ///
    /// The session must already be started. Values go to `handler`;
    /// `switch_package` is called once before the first value.
    pub fn run(
        &self,
        package: Package,
        handler: Arc<dyn DataHandler>,
    ) -> Result<ExecutionHandle, SessionError> {
        if !self.session.is_started() {
            return Err(SessionError::NotStarted);
        }

        let cancel = CancelToken::new();
        let token = cancel.clone();
        let session = self.session.clone();
        let thread = thread::Builder::new()
            .name("wgdiag-processor".to_string())
            .spawn(move || {
                info!("Running package '{}'", package.name());
                let outcome = run_package(&session, &package, handler.as_ref(), &token);
                match &outcome {
                    RunOutcome::InitFailed { request, response } => error!(
                        "Package '{}' aborted: {:?} answered {:?}",
                        package.name(),
                        request,
                        response
                    ),
                    RunOutcome::Aborted(e) => {
                        error!("Package '{}' aborted: {}", package.name(), e)
                    }
                    _ => info!("Package '{}' finished: {:?}", package.name(), outcome),
                }
                outcome
            })
            .map_err(|e| SessionError::Protocol(e.into()))?;

        Ok(ExecutionHandle {
            cancel,
            thread: Mutex::new(Some(thread)),
            outcome: Mutex::new(None),
        })
    }
}

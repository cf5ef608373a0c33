//! Transport worker
//!
//! Owns the adapter connection. A dedicated thread runs the receive loop
//! (deadline expiry, reconnection, reading, framing) and is the only user of
//! the receive buffer. Callers issue commands from their own threads; the
//! in-flight slot guarantees at most one command awaits a response.
//!
//! Outcomes are handed to a second thread for delivery so a slow listener
//! never stalls reception.

use std::io::{self, Read, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{Channel, Connector, FrameBuffer, Outcome, ProtocolError, ResponseListener};
use crate::command::Command;
use crate::config::SessionConfig;

/// Observable worker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    /// No link; the next loop iteration tries to connect
    Disconnected,
    /// A connection attempt is running
    Connecting,
    /// Connected, nothing in flight
    Idle,
    /// Connected, one command awaiting its response
    AwaitingResponse,
    /// Terminal
    Stopped,
}

struct InFlight {
    seq: u64,
    request: String,
    deadline: Instant,
    listener: Option<Arc<dyn ResponseListener>>,
}

/// State shared between callers and the receive loop
struct Slot {
    state: WorkerState,
    writer: Option<Box<dyn Channel>>,
    listener: Option<Arc<dyn ResponseListener>>,
    in_flight: Option<InFlight>,
    next_seq: u64,
}

struct Delivery {
    listener: Arc<dyn ResponseListener>,
    outcome: Outcome,
}

struct Shared {
    address: String,
    connector: Arc<dyn Connector>,
    poll_interval: Duration,
    reconnect_delay: Duration,
    slot: Mutex<Slot>,
    ready: Condvar,
    stop: AtomicBool,
    restart: AtomicBool,
    running: AtomicBool,
    links: AtomicU64,
    dispatch: Mutex<Option<Sender<Delivery>>>,
}

/// Clears the running flag however the receive loop exits
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Connection owner enforcing a single in-flight command
pub struct TransportWorker {
    shared: Arc<Shared>,
    io_thread: Mutex<Option<JoinHandle<()>>>,
    dispatch_thread: Mutex<Option<JoinHandle<()>>>,
}

impl TransportWorker {
    /// Spawn the receive loop for `address`.
    ///
    /// Returns immediately; the connection is established by the loop, and
    /// commands issued before that wait for it.
    pub fn start(
        address: &str,
        connector: Arc<dyn Connector>,
        config: &SessionConfig,
    ) -> Result<Self, ProtocolError> {
        let (tx, rx) = mpsc::channel();
        let shared = Arc::new(Shared {
            address: address.to_string(),
            connector,
            poll_interval: config.poll_interval(),
            reconnect_delay: config.reconnect_delay(),
            slot: Mutex::new(Slot {
                state: WorkerState::Disconnected,
                writer: None,
                listener: None,
                in_flight: None,
                next_seq: 0,
            }),
            ready: Condvar::new(),
            stop: AtomicBool::new(false),
            restart: AtomicBool::new(false),
            running: AtomicBool::new(true),
            links: AtomicU64::new(0),
            dispatch: Mutex::new(Some(tx)),
        });

        let dispatch_thread = thread::Builder::new()
            .name("wgdiag-dispatch".to_string())
            .spawn(move || dispatch_loop(rx))?;

        let loop_shared = shared.clone();
        let io_thread = match thread::Builder::new()
            .name("wgdiag-io".to_string())
            .spawn(move || receive_loop(loop_shared))
        {
            Ok(handle) => handle,
            Err(e) => {
                shared.running.store(false, Ordering::SeqCst);
                shared.close_dispatch();
                let _ = dispatch_thread.join();
                return Err(e.into());
            }
        };

        info!("Transport worker started for {}", address);
        Ok(Self {
            shared,
            io_thread: Mutex::new(Some(io_thread)),
            dispatch_thread: Mutex::new(Some(dispatch_thread)),
        })
    }

    /// Address the worker connects to
    pub fn address(&self) -> &str {
        &self.shared.address
    }

    /// Current state
    pub fn state(&self) -> WorkerState {
        self.shared.lock().state
    }

    /// Whether the receive loop is still alive
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Number of links established so far; changes whenever the connection
    /// was re-opened
    pub fn link_count(&self) -> u64 {
        self.shared.links.load(Ordering::SeqCst)
    }

    /// Whether a command is awaiting its response
    pub fn has_in_flight(&self) -> bool {
        self.shared.lock().in_flight.is_some()
    }

    /// Register the listener used by [`TransportWorker::write`].
    ///
    /// Waits up to `wait` for the in-flight command to finish so the
    /// listener is never swapped mid-command.
    pub fn set_response_listener(
        &self,
        listener: Arc<dyn ResponseListener>,
        wait: Duration,
    ) -> Result<(), ProtocolError> {
        let started = Instant::now();
        let mut slot = self.shared.lock();

        loop {
            if self.shared.stop.load(Ordering::SeqCst) {
                return Err(ProtocolError::Stopped);
            }
            let Some(in_flight) = &slot.in_flight else {
                break;
            };
            let elapsed = started.elapsed();
            if elapsed >= wait {
                return Err(ProtocolError::Busy {
                    request: in_flight.request.clone(),
                    waited_ms: elapsed.as_millis() as u64,
                });
            }
            slot = self.shared.wait(slot, wait - elapsed);
        }

        slot.listener = Some(listener);
        Ok(())
    }

    /// Send a command; the outcome goes to the listener registered at the
    /// time of the call.
    ///
    /// The registration and the write are separate calls, so with several
    /// callers a response can reach a listener registered for another
    /// command. [`TransportWorker::submit`] pairs them atomically.
    pub fn write(&self, command: &Command, acquire: Duration) -> Result<(), ProtocolError> {
        self.issue(command, None, acquire)
    }

    /// Send a command whose outcome goes to `listener`
    pub fn submit(
        &self,
        command: &Command,
        listener: Arc<dyn ResponseListener>,
        acquire: Duration,
    ) -> Result<(), ProtocolError> {
        self.issue(command, Some(listener), acquire)
    }

    /// Ask the receive loop to drop and re-open the connection
    pub fn restart(&self) {
        if !self.shared.stop.load(Ordering::SeqCst) {
            info!("Restart requested for {}", self.shared.address);
            self.shared.restart.store(true, Ordering::SeqCst);
        }
    }

    /// Stop the worker and wait for the receive loop to exit.
    ///
    /// A command still in flight is failed with [`ProtocolError::Stopped`].
    /// Safe to call from any thread, including from a listener, and more
    /// than once.
    pub fn stop(&self) {
        let first = !self.shared.stop.swap(true, Ordering::SeqCst);
        self.shared.ready.notify_all();

        let io_thread = self
            .io_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = io_thread {
            if handle.join().is_err() {
                warn!("Receive loop for {} panicked", self.shared.address);
            }
        }

        {
            let mut slot = self.shared.lock();
            slot.writer = None;
            slot.listener = None;
            slot.state = WorkerState::Stopped;
            if let Some(in_flight) = slot.in_flight.take() {
                self.shared
                    .deliver(in_flight.listener, Outcome::Failed(ProtocolError::Stopped));
            }
        }
        self.shared.ready.notify_all();
        self.shared.close_dispatch();

        let dispatch_thread = self
            .dispatch_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = dispatch_thread {
            if handle.thread().id() == thread::current().id() {
                // Stopped from a listener; the dispatch loop ends on its own
                // once the callback returns.
            } else if handle.join().is_err() {
                warn!("Dispatch thread for {} panicked", self.shared.address);
            }
        }

        if first {
            info!("Transport worker for {} stopped", self.shared.address);
        }
    }

    fn issue(
        &self,
        command: &Command,
        listener: Option<Arc<dyn ResponseListener>>,
        acquire: Duration,
    ) -> Result<(), ProtocolError> {
        let started = Instant::now();
        let mut slot = self.shared.lock();

        loop {
            if self.shared.stop.load(Ordering::SeqCst) {
                return Err(ProtocolError::Stopped);
            }
            if slot.writer.is_some() && slot.in_flight.is_none() {
                break;
            }
            let elapsed = started.elapsed();
            if elapsed >= acquire {
                let waited_ms = elapsed.as_millis() as u64;
                return Err(match &slot.in_flight {
                    Some(_) => ProtocolError::Busy {
                        request: command.request().to_string(),
                        waited_ms,
                    },
                    None => ProtocolError::NotReady { waited_ms },
                });
            }
            slot = self.shared.wait(slot, acquire - elapsed);
        }

        let listener = listener.or_else(|| slot.listener.clone());
        let seq = slot.next_seq;
        slot.next_seq += 1;

        debug!(" > {:?}", command.request());
        let bytes = command.to_bytes();
        let written = match slot.writer.as_mut() {
            Some(writer) => writer.write_all(&bytes).and_then(|()| writer.flush()),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "no writer")),
        };

        match written {
            Ok(()) => {
                slot.in_flight = Some(InFlight {
                    seq,
                    request: command.request().to_string(),
                    deadline: Instant::now() + command.timeout(),
                    listener,
                });
                slot.state = WorkerState::AwaitingResponse;
            }
            Err(e) => {
                warn!("Write of {:?} failed: {}", command.request(), e);
                slot.writer = None;
                slot.state = WorkerState::Disconnected;
                self.shared.restart.store(true, Ordering::SeqCst);
                self.shared.deliver(listener, Outcome::Failed(e.into()));
            }
        }
        Ok(())
    }
}

impl Drop for TransportWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, Slot>, timeout: Duration) -> MutexGuard<'a, Slot> {
        self.ready
            .wait_timeout(guard, timeout)
            .unwrap_or_else(PoisonError::into_inner)
            .0
    }

    fn deliver(&self, listener: Option<Arc<dyn ResponseListener>>, outcome: Outcome) {
        let Some(listener) = listener else {
            debug!("No listener for {:?}", outcome);
            return;
        };
        let dispatch = self.dispatch.lock().unwrap_or_else(PoisonError::into_inner);
        match dispatch.as_ref() {
            Some(tx) => {
                if tx.send(Delivery { listener, outcome }).is_err() {
                    warn!("Dispatch thread gone, outcome dropped");
                }
            }
            None => debug!("Worker stopped, outcome dropped: {:?}", outcome),
        }
    }

    fn close_dispatch(&self) {
        self.dispatch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Release the in-flight slot if its deadline passed
    fn expire_deadline(&self, buffer: &mut FrameBuffer) {
        let mut slot = self.lock();
        let expired = matches!(&slot.in_flight, Some(f) if Instant::now() > f.deadline);
        if !expired {
            return;
        }
        if let Some(in_flight) = slot.in_flight.take() {
            let partial = buffer.take_partial();
            slot.state = if slot.writer.is_some() {
                WorkerState::Idle
            } else {
                WorkerState::Disconnected
            };
            self.ready.notify_all();
            self.deliver(in_flight.listener, Outcome::Incomplete(partial));
        }
    }

    /// Prepare the buffer for the response of a newly issued command
    fn arm_echo(&self, buffer: &mut FrameBuffer, armed: &mut Option<u64>) {
        let slot = self.lock();
        if let Some(in_flight) = &slot.in_flight {
            if *armed != Some(in_flight.seq) {
                buffer.clear();
                buffer.expect_echo(&in_flight.request);
                *armed = Some(in_flight.seq);
            }
        }
    }

    fn complete(&self, frame: String) {
        let mut slot = self.lock();
        match slot.in_flight.take() {
            Some(in_flight) => {
                slot.state = WorkerState::Idle;
                self.ready.notify_all();
                self.deliver(in_flight.listener, Outcome::Complete(frame));
            }
            None => debug!("Discarding unsolicited frame {:?}", frame),
        }
    }

    /// Drop the link; the in-flight command, if any, fails with `error`
    fn drop_link(&self, error: ProtocolError) {
        let mut slot = self.lock();
        slot.writer = None;
        if slot.state != WorkerState::Stopped {
            slot.state = WorkerState::Disconnected;
        }
        if let Some(in_flight) = slot.in_flight.take() {
            self.deliver(in_flight.listener, Outcome::Failed(error));
        }
        self.ready.notify_all();
    }

    fn connect(&self) -> Option<Box<dyn Channel>> {
        self.lock().state = WorkerState::Connecting;
        debug!("Connecting to {}", self.address);

        let result = self.connector.connect(&self.address).and_then(|mut channel| {
            if let Err(e) = channel.clear_input() {
                debug!("Could not clear input of {}: {}", self.address, e);
            }
            let writer = channel.try_clone()?;
            Ok((channel, writer))
        });

        match result {
            Ok((reader, writer)) => {
                let mut slot = self.lock();
                if self.stop.load(Ordering::SeqCst) {
                    return None;
                }
                slot.writer = Some(writer);
                slot.state = WorkerState::Idle;
                self.links.fetch_add(1, Ordering::SeqCst);
                self.ready.notify_all();
                info!("Link to {} established", self.address);
                Some(reader)
            }
            Err(e) => {
                warn!("Connection to {} failed: {}", self.address, e);
                self.lock().state = WorkerState::Disconnected;
                None
            }
        }
    }
}

/// Read everything currently available without blocking
fn read_available(channel: &mut dyn Channel) -> io::Result<Vec<u8>> {
    let available = channel.bytes_to_read()? as usize;
    if available == 0 {
        return Ok(Vec::new());
    }

    let mut bytes = vec![0u8; available];
    match channel.read(&mut bytes) {
        Ok(0) => Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "adapter closed the connection",
        )),
        Ok(n) => {
            bytes.truncate(n);
            Ok(bytes)
        }
        Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
            Ok(Vec::new())
        }
        Err(e) => Err(e),
    }
}

fn receive_loop(shared: Arc<Shared>) {
    let _running = RunningGuard(&shared.running);
    let mut reader: Option<Box<dyn Channel>> = None;
    let mut buffer = FrameBuffer::new();
    let mut armed: Option<u64> = None;
    let mut last_attempt: Option<Instant> = None;

    while !shared.stop.load(Ordering::SeqCst) {
        shared.expire_deadline(&mut buffer);

        let restart = shared.restart.swap(false, Ordering::SeqCst);
        if restart && reader.is_some() {
            info!("Restarting link to {}", shared.address);
            reader = None;
            shared.drop_link(ProtocolError::NotConnected);
        }

        if reader.is_none() {
            buffer.clear();
            armed = None;
            let due = last_attempt.map_or(true, |t| t.elapsed() >= shared.reconnect_delay);
            if due {
                last_attempt = Some(Instant::now());
                reader = shared.connect();
            }
            if reader.is_none() {
                thread::sleep(shared.poll_interval);
            }
            continue;
        }
        let Some(channel) = reader.as_mut() else {
            continue;
        };

        match read_available(channel.as_mut()) {
            Ok(bytes) if bytes.is_empty() => thread::sleep(shared.poll_interval),
            Ok(bytes) => {
                shared.arm_echo(&mut buffer, &mut armed);
                buffer.push(&bytes);
                if let Some(frame) = buffer.take_frame() {
                    shared.complete(frame);
                }
            }
            Err(e) => {
                warn!("Read from {} failed: {}", shared.address, e);
                reader = None;
                shared.drop_link(e.into());
            }
        }
    }

    debug!("Receive loop for {} exiting", shared.address);
}

fn dispatch_loop(rx: Receiver<Delivery>) {
    for delivery in rx {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            delivery.listener.deliver(&delivery.outcome)
        }));
        if result.is_err() {
            warn!("Response listener panicked on {:?}", delivery.outcome);
        }
    }
}

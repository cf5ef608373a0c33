//! Session
//!
//! Owns at most one [`TransportWorker`] and gives callers `write` and
//! listener registration. Listeners registered through the session log every
//! response and restart the link when a transport error is reported.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::command::Command;
use crate::config::SessionConfig;
use crate::protocol::{
    Connector, ConnectorChain, ProtocolError, ResponseListener, TransportWorker, WorkerState,
};

/// Errors of session operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// A worker is already running
    #[error("Session already started")]
    AlreadyStarted,

    /// No worker is running
    #[error("Session not started")]
    NotStarted,

    /// The transport refused or failed
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl SessionError {
    /// Whether the failure came from the physical link
    pub fn is_transport(&self) -> bool {
        matches!(self, SessionError::Protocol(e) if e.is_transport())
    }
}

/// Listener wrapper adding logging and restart-on-error
struct SessionListener {
    inner: Arc<dyn ResponseListener>,
    worker: Weak<TransportWorker>,
}

impl ResponseListener for SessionListener {
    fn on_response(&self, response: &str) {
        debug!(" < {:?}", response);
        self.inner.on_response(response);
    }

    fn on_incomplete_response(&self, partial: &str) {
        debug!(" (timeout) < {:?}", partial);
        self.inner.on_incomplete_response(partial);
    }

    fn on_error(&self, error: &ProtocolError) {
        // NotConnected is what a restart itself reports
        if error.is_transport() && *error != ProtocolError::NotConnected {
            warn!("Transport error: {}, restarting link", error);
            if let Some(worker) = self.worker.upgrade() {
                worker.restart();
            }
        } else {
            debug!(" (error) < {}", error);
        }
        self.inner.on_error(error);
    }
}

/// Explicitly owned connection to one adapter
pub struct Session {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    worker: Mutex<Option<Arc<TransportWorker>>>,
}

impl Session {
    /// Create a session connecting over serial, then TCP
    pub fn new(config: SessionConfig) -> Self {
        let connector = ConnectorChain::standard(config.baud_rate, config.connect_timeout());
        Self::with_connector(config, Arc::new(connector))
    }

    /// Create a session with a custom connection strategy
    pub fn with_connector(config: SessionConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            worker: Mutex::new(None),
        }
    }

    /// Session settings
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn slot(&self) -> MutexGuard<'_, Option<Arc<TransportWorker>>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn worker(&self) -> Result<Arc<TransportWorker>, SessionError> {
        self.slot().clone().ok_or(SessionError::NotStarted)
    }

    /// Start a worker for `address`
    pub fn start(&self, address: &str) -> Result<(), SessionError> {
        let mut slot = self.slot();
        if slot.is_some() {
            return Err(SessionError::AlreadyStarted);
        }
        let worker = TransportWorker::start(address, self.connector.clone(), &self.config)?;
        *slot = Some(Arc::new(worker));
        info!("Session started for {}", address);
        Ok(())
    }

    /// Stop and discard the worker; does nothing if not started
    pub fn stop(&self) {
        let worker = self.slot().take();
        if let Some(worker) = worker {
            worker.stop();
            info!("Session for {} stopped", worker.address());
        }
    }

    /// Whether a worker is present
    pub fn is_started(&self) -> bool {
        self.slot().is_some()
    }

    /// Worker state, `None` when not started
    pub fn state(&self) -> Option<WorkerState> {
        self.slot().as_ref().map(|worker| worker.state())
    }

    /// Identifies the current link; changes after every reconnection.
    /// `None` when not started or not yet connected.
    pub fn link_id(&self) -> Option<u64> {
        self.slot()
            .as_ref()
            .map(|worker| worker.link_count())
            .filter(|&links| links > 0)
    }

    /// Whether the worker's receive loop is alive
    pub fn is_running(&self) -> bool {
        self.slot().as_ref().is_some_and(|worker| worker.is_running())
    }

    fn wrap(&self, worker: &Arc<TransportWorker>, listener: Arc<dyn ResponseListener>) -> Arc<dyn ResponseListener> {
        Arc::new(SessionListener {
            inner: listener,
            worker: Arc::downgrade(worker),
        })
    }

    /// Register the listener receiving the outcome of later [`Session::write`]s
    pub fn set_response_listener(
        &self,
        listener: Arc<dyn ResponseListener>,
    ) -> Result<(), SessionError> {
        let worker = self.worker()?;
        let wrapped = self.wrap(&worker, listener);
        worker.set_response_listener(wrapped, self.config.listener_wait())?;
        Ok(())
    }

    /// Send a command to the registered listener.
    ///
    /// Blocks until the link is up and no command is in flight, bounded by
    /// the configured acquire timeout.
    pub fn write(&self, command: &Command) -> Result<(), SessionError> {
        let worker = self.worker()?;
        worker.write(command, self.config.acquire_timeout())?;
        Ok(())
    }

    /// Send a command together with the listener for its outcome
    pub fn submit(
        &self,
        command: &Command,
        listener: Arc<dyn ResponseListener>,
    ) -> Result<(), SessionError> {
        self.submit_within(command, listener, self.config.acquire_timeout())
    }

    /// [`Session::submit`] with an explicit bound on the wait for the link
    /// and the in-flight slot
    pub fn submit_within(
        &self,
        command: &Command,
        listener: Arc<dyn ResponseListener>,
        acquire: Duration,
    ) -> Result<(), SessionError> {
        let worker = self.worker()?;
        let wrapped = self.wrap(&worker, listener);
        worker.submit(command, wrapped, acquire)?;
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

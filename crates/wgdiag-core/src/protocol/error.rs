//! Protocol errors

use thiserror::Error;

/// Errors raised by the transport layer.
///
/// `Clone` so a single failure can be handed to every waiting listener.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The serial driver failed
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// Reading or writing the link failed
    #[error("I/O error: {0}")]
    Io(String),

    /// No connector could open the address
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The link is down
    #[error("Not connected to adapter")]
    NotConnected,

    /// The previous command did not complete in time
    #[error("Command {request:?} not sent: another command still in flight after {waited_ms} ms")]
    Busy {
        /// Request that was refused
        request: String,
        /// How long the caller waited
        waited_ms: u64,
    },

    /// The link did not come up in time
    #[error("Transport not ready after {waited_ms} ms")]
    NotReady {
        /// How long the caller waited
        waited_ms: u64,
    },

    /// The worker was stopped
    #[error("Transport worker stopped")]
    Stopped,
}

impl ProtocolError {
    /// Whether this is a failure of the physical link, as opposed to misuse
    /// of the worker
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ProtocolError::SerialError(_)
                | ProtocolError::Io(_)
                | ProtocolError::ConnectionFailed(_)
                | ProtocolError::NotConnected
                | ProtocolError::NotReady { .. }
        )
    }
}

impl From<std::io::Error> for ProtocolError {
    fn from(e: std::io::Error) -> Self {
        ProtocolError::Io(e.to_string())
    }
}

impl From<serialport::Error> for ProtocolError {
    fn from(e: serialport::Error) -> Self {
        ProtocolError::SerialError(e.to_string())
    }
}

//! Adapter Transport
//!
//! Line-based ASCII protocol spoken by ELM327-class diagnostic adapters:
//! requests are terminated by `\n\r`, responses are space separated hex
//! tokens closed by a `>` prompt.
//!
//! A [`TransportWorker`] owns the connection, runs the receive loop on its
//! own thread and keeps at most one command in flight.

mod channel;
mod connector;
mod error;
mod framing;
mod listener;
pub mod serial;
mod worker;

pub use channel::{Channel, SerialChannel, TcpChannel};
pub use connector::{Connector, ConnectorChain, SerialConnector, TcpConnector};
pub use error::ProtocolError;
pub use framing::FrameBuffer;
pub use listener::{Outcome, ResponseListener};
pub use serial::{configure_port, list_ports, open_port, PortInfo};
pub use worker::{TransportWorker, WorkerState};

use uuid::Uuid;

/// Prompt closing every response
pub const RESPONSE_TERMINATOR: char = '>';

/// Appended to every request
pub const LINE_TERMINATOR: &str = "\n\r";

/// Status word the adapter inserts when a request is interrupted
pub const STATUS_SENTINEL: &str = "STOPPED";

/// Receive loop period when idle, in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 20;

/// Default baud rate of ELM327 adapters
pub const DEFAULT_BAUD_RATE: u32 = 38400;

/// Bluetooth Serial Port Profile service class
/// (`00001101-0000-1000-8000-00805F9B34FB`)
pub const SERIAL_PORT_PROFILE: Uuid = Uuid::from_u128(0x0000_1101_0000_1000_8000_0080_5F9B_34FB);

//! Connection strategies
//!
//! The worker opens its link through a [`Connector`]. A [`ConnectorChain`]
//! tries several strategies in order and keeps the first that succeeds.

use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, info};

use super::channel::{Channel, SerialChannel, TcpChannel};
use super::serial::{configure_port, open_port};
use super::{ProtocolError, DEFAULT_BAUD_RATE, SERIAL_PORT_PROFILE};

/// One way of turning an address into an open channel
pub trait Connector: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Open a channel to `address`
    fn connect(&self, address: &str) -> Result<Box<dyn Channel>, ProtocolError>;
}

/// Opens the address as a serial device.
///
/// Covers USB adapters and Bluetooth adapters bound to an RFCOMM device
/// through the Serial Port Profile.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    baud_rate: u32,
}

impl SerialConnector {
    /// Create a serial connector
    pub fn new(baud_rate: u32) -> Self {
        Self { baud_rate }
    }
}

impl Default for SerialConnector {
    fn default() -> Self {
        Self::new(DEFAULT_BAUD_RATE)
    }
}

impl Connector for SerialConnector {
    fn name(&self) -> &str {
        "serial"
    }

    fn connect(&self, address: &str) -> Result<Box<dyn Channel>, ProtocolError> {
        if address.contains("rfcomm") {
            debug!("{} is bound to service {}", address, SERIAL_PORT_PROFILE);
        }
        let mut port = open_port(address, Some(self.baud_rate))?;
        configure_port(port.as_mut())?;
        Ok(Box::new(SerialChannel::new(port)))
    }
}

/// Opens `host:port` as a TCP connection (Wi-Fi adapters)
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
}

impl TcpConnector {
    /// Create a TCP connector
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Connector for TcpConnector {
    fn name(&self) -> &str {
        "tcp"
    }

    fn connect(&self, address: &str) -> Result<Box<dyn Channel>, ProtocolError> {
        let addr = address
            .to_socket_addrs()
            .map_err(|e| ProtocolError::ConnectionFailed(format!("{}: {}", address, e)))?
            .next()
            .ok_or_else(|| {
                ProtocolError::ConnectionFailed(format!("{}: no address resolved", address))
            })?;

        let stream = TcpStream::connect_timeout(&addr, self.connect_timeout)?;
        stream.set_nodelay(true)?;
        Ok(Box::new(TcpChannel::new(stream)))
    }
}

/// Ordered list of strategies, tried until one succeeds
pub struct ConnectorChain {
    strategies: Vec<Box<dyn Connector>>,
}

impl ConnectorChain {
    /// Create a chain from explicit strategies
    pub fn new(strategies: Vec<Box<dyn Connector>>) -> Self {
        Self { strategies }
    }

    /// Serial device first, TCP as fallback
    pub fn standard(baud_rate: u32, connect_timeout: Duration) -> Self {
        Self::new(vec![
            Box::new(SerialConnector::new(baud_rate)),
            Box::new(TcpConnector::new(connect_timeout)),
        ])
    }

    /// Strategy names, in order
    pub fn names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }
}

impl Connector for ConnectorChain {
    fn name(&self) -> &str {
        "chain"
    }

    fn connect(&self, address: &str) -> Result<Box<dyn Channel>, ProtocolError> {
        let mut failures = Vec::with_capacity(self.strategies.len());

        for strategy in &self.strategies {
            match strategy.connect(address) {
                Ok(channel) => {
                    info!("Connected to {} via {}", address, strategy.name());
                    return Ok(channel);
                }
                Err(e) => {
                    debug!("{} connection to {} failed: {}", strategy.name(), address, e);
                    failures.push(format!("{}: {}", strategy.name(), e));
                }
            }
        }

        if failures.is_empty() {
            failures.push("no connection strategy configured".to_string());
        }
        Err(ProtocolError::ConnectionFailed(format!(
            "{} ({})",
            address,
            failures.join("; ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Failing(Arc<AtomicUsize>);

    impl Connector for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn connect(&self, _address: &str) -> Result<Box<dyn Channel>, ProtocolError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(ProtocolError::NotConnected)
        }
    }

    #[test]
    fn test_chain_falls_back_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let attempts = Arc::new(AtomicUsize::new(0));

        let chain = ConnectorChain::new(vec![
            Box::new(Failing(attempts.clone())),
            Box::new(TcpConnector::new(Duration::from_secs(1))),
            Box::new(Failing(attempts.clone())),
        ]);

        assert!(chain.connect(&addr).is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_chain_reports_every_failure() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let chain = ConnectorChain::new(vec![
            Box::new(Failing(attempts.clone())),
            Box::new(Failing(attempts.clone())),
        ]);

        match chain.connect("nowhere") {
            Err(ProtocolError::ConnectionFailed(msg)) => {
                assert_eq!(msg.matches("failing:").count(), 2);
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_standard_chain_order() {
        let chain = ConnectorChain::standard(38400, Duration::from_secs(1));
        assert_eq!(chain.names(), vec!["serial", "tcp"]);
    }
}

//! Byte-stream channels to the adapter

use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

/// Bidirectional byte stream to an adapter (serial device or TCP socket)
pub trait Channel: Read + Write + Send {
    /// Number of bytes that can be read without blocking
    fn bytes_to_read(&mut self) -> io::Result<u32>;

    /// Discard anything received but not yet read
    fn clear_input(&mut self) -> io::Result<()>;

    /// Second handle to the same stream, used for writing while the
    /// receive loop owns the first one
    fn try_clone(&self) -> io::Result<Box<dyn Channel>>;
}

fn serial_io(e: serialport::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}

/// Serial port wrapper implementing [`Channel`]
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
}

impl SerialChannel {
    /// Wrap an opened serial port
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

impl Read for SerialChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl Channel for SerialChannel {
    fn bytes_to_read(&mut self) -> io::Result<u32> {
        self.port.bytes_to_read().map_err(serial_io)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(serial_io)
    }

    fn try_clone(&self) -> io::Result<Box<dyn Channel>> {
        let port = self.port.try_clone().map_err(serial_io)?;
        Ok(Box::new(SerialChannel::new(port)))
    }
}

/// TCP stream wrapper implementing [`Channel`] (Wi-Fi adapters)
pub struct TcpChannel {
    stream: TcpStream,
}

impl TcpChannel {
    /// Wrap a connected stream
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }
}

impl Read for TcpChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for TcpChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

/// Longest a readiness check may block.
///
/// A read timeout rather than non-blocking mode: the flag would be shared
/// with the writer handle, whose writes must keep blocking.
const READY_TIMEOUT: Duration = Duration::from_millis(1);

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

impl Channel for TcpChannel {
    fn bytes_to_read(&mut self) -> io::Result<u32> {
        self.stream.set_read_timeout(Some(READY_TIMEOUT))?;
        // peek() reports min(available, buffer size)
        let mut buf = [0u8; 4096];
        match self.stream.peek(&mut buf) {
            // Readable with nothing to read means the peer closed
            Ok(0) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "adapter closed the connection",
            )),
            Ok(n) => Ok(n as u32),
            Err(ref e) if is_timeout(e) => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.stream.set_read_timeout(Some(READY_TIMEOUT))?;
        let mut buf = [0u8; 1024];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => return Ok(()),
                Ok(_) => continue,
                Err(ref e) if is_timeout(e) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    fn try_clone(&self) -> io::Result<Box<dyn Channel>> {
        Ok(Box::new(TcpChannel::new(self.stream.try_clone()?)))
    }
}

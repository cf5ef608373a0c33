//! Response framing
//!
//! Turns the raw byte stream into response frames. Line breaks are dropped,
//! the adapter's `STOPPED` notices are removed, the echo of the in-flight
//! request is stripped once, and a frame ends at the first `>` prompt.

use super::{RESPONSE_TERMINATOR, STATUS_SENTINEL};

/// Receive buffer owned by the worker's receive loop
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buffer: String,
    echo: Option<String>,
}

impl FrameBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm echo suppression for a freshly sent request
    pub fn expect_echo(&mut self, request: &str) {
        self.echo = Some(request.to_string());
    }

    /// Append received bytes and normalize the buffer
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));
        self.buffer.retain(|c| c != '\r' && c != '\n');

        if self.buffer.contains(STATUS_SENTINEL) {
            self.buffer = self.buffer.replace(STATUS_SENTINEL, "");
        }

        if let Some(echo) = &self.echo {
            if self.buffer.starts_with(echo.as_str()) {
                self.buffer.drain(..echo.len());
                self.echo = None;
            }
        }
    }

    /// Take the complete frame, if a prompt has been received.
    ///
    /// Anything after the first prompt is discarded along with it.
    pub fn take_frame(&mut self) -> Option<String> {
        let end = self.buffer.find(RESPONSE_TERMINATOR)?;
        let frame = self.buffer[..end].to_string();
        self.clear();
        Some(frame)
    }

    /// Take whatever has been received so far, without a prompt
    pub fn take_partial(&mut self) -> String {
        self.echo = None;
        std::mem::take(&mut self.buffer)
    }

    /// Drop buffered data and any pending echo
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.echo = None;
    }

    /// Whether nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Buffered text
    pub fn as_str(&self) -> &str {
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_and_line_breaks_removed() {
        let mut buf = FrameBuffer::new();
        buf.expect_echo("21 12");
        buf.push(b"21 12\r61 12 0B 3E\r\n>");
        assert_eq!(buf.take_frame().as_deref(), Some("61 12 0B 3E"));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_frame_split_across_reads() {
        let mut buf = FrameBuffer::new();
        buf.expect_echo("ATRV");
        buf.push(b"AT");
        assert_eq!(buf.take_frame(), None);
        buf.push(b"RV\r12.");
        assert_eq!(buf.as_str(), "12.");
        buf.push(b"6V\r\r>");
        assert_eq!(buf.take_frame().as_deref(), Some("12.6V"));
    }

    #[test]
    fn test_sentinel_removed_before_echo() {
        let mut buf = FrameBuffer::new();
        buf.expect_echo("21 28");
        buf.push(b"STOPPED\r21 28\r61 28 02 EE\r\r>");
        assert_eq!(buf.take_frame().as_deref(), Some("61 28 02 EE"));
    }

    #[test]
    fn test_sentinel_split_across_reads() {
        let mut buf = FrameBuffer::new();
        buf.push(b"OK STOP");
        buf.push(b"PED\r>");
        assert_eq!(buf.take_frame().as_deref(), Some("OK "));
    }

    #[test]
    fn test_echo_stripped_only_once() {
        let mut buf = FrameBuffer::new();
        buf.expect_echo("OK");
        buf.push(b"OK\rOK\r\r>");
        assert_eq!(buf.take_frame().as_deref(), Some("OK"));
    }

    #[test]
    fn test_trailing_data_after_prompt_discarded() {
        let mut buf = FrameBuffer::new();
        buf.push(b"OK\r>garbage");
        assert_eq!(buf.take_frame().as_deref(), Some("OK"));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_take_partial() {
        let mut buf = FrameBuffer::new();
        buf.expect_echo("21 20");
        buf.push(b"21 20\r61 20 03");
        assert_eq!(buf.take_frame(), None);
        assert_eq!(buf.take_partial(), "61 20 03");
        assert!(buf.is_empty());
    }
}

//! Response delivery

use super::ProtocolError;

/// Terminal outcome of one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A prompt-terminated response
    Complete(String),
    /// The deadline passed before a prompt arrived; carries what was received
    Incomplete(String),
    /// The command failed on the transport, or the worker stopped
    Failed(ProtocolError),
}

/// Receives the outcome of commands.
///
/// Called on the worker's dispatch thread, never on the receive loop, so a
/// slow listener delays later deliveries but not reception.
pub trait ResponseListener: Send + Sync {
    /// A complete response arrived
    fn on_response(&self, response: &str);

    /// The command timed out; `partial` is whatever arrived before the deadline
    fn on_incomplete_response(&self, partial: &str);

    /// The command failed; by default treated as an empty incomplete response
    fn on_error(&self, error: &ProtocolError) {
        let _ = error;
        self.on_incomplete_response("");
    }

    /// Route an outcome to the matching callback
    fn deliver(&self, outcome: &Outcome) {
        match outcome {
            Outcome::Complete(response) => self.on_response(response),
            Outcome::Incomplete(partial) => self.on_incomplete_response(partial),
            Outcome::Failed(error) => self.on_error(error),
        }
    }
}

impl<F> ResponseListener for F
where
    F: Fn(Outcome) + Send + Sync,
{
    fn on_response(&self, response: &str) {
        self(Outcome::Complete(response.to_string()))
    }

    fn on_incomplete_response(&self, partial: &str) {
        self(Outcome::Incomplete(partial.to_string()))
    }

    fn on_error(&self, error: &ProtocolError) {
        self(Outcome::Failed(error.clone()))
    }
}

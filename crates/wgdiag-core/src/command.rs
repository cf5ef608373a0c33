//! Command Model
//!
//! Immutable request definitions. A [`Command`] is a request line with an
//! optional expected response prefix; a [`DiagCommand`] adds the ordered list
//! of fields decoded from its response.

use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::num::NonZeroU64;
use std::time::Duration;
use tracing::debug;

use crate::codec::Field;
use crate::package::CatalogError;
use crate::protocol::LINE_TERMINATOR;

/// Timeout used when a command does not specify one
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 2000;

/// Plain request with response verification
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Command {
    request: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expected_prefix: Option<String>,
    timeout_ms: NonZeroU64,
}

impl Command {
    /// Create a command. `expected_prefix = None` accepts any response.
    pub fn new(
        request: impl Into<String>,
        expected_prefix: Option<&str>,
        timeout_ms: u64,
    ) -> Result<Self, CatalogError> {
        let request = request.into();
        let timeout_ms =
            NonZeroU64::new(timeout_ms).ok_or_else(|| CatalogError::InvalidTimeout(request.clone()))?;
        Ok(Self::with_timeout(request, expected_prefix, timeout_ms))
    }

    /// Create a command with an already validated timeout
    pub fn with_timeout(
        request: impl Into<String>,
        expected_prefix: Option<&str>,
        timeout_ms: NonZeroU64,
    ) -> Self {
        Self {
            request: request.into(),
            expected_prefix: expected_prefix.map(str::to_string),
            timeout_ms,
        }
    }

    /// Request text, sent verbatim
    pub fn request(&self) -> &str {
        &self.request
    }

    /// Prefix a valid response starts with, if any
    pub fn expected_prefix(&self) -> Option<&str> {
        self.expected_prefix.as_deref()
    }

    /// Response timeout in milliseconds (always > 0)
    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms.get()
    }

    /// Response timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.get())
    }

    /// Check a response against the expected prefix
    pub fn verify_response(&self, response: &str) -> bool {
        match &self.expected_prefix {
            Some(prefix) => response.starts_with(prefix.as_str()),
            None => true,
        }
    }

    /// Bytes put on the wire: request text plus line terminator
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.request.as_bytes().to_vec();
        bytes.extend_from_slice(LINE_TERMINATOR.as_bytes());
        bytes
    }
}

/// One decoded field of a response
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedField {
    /// Field key
    pub key: String,
    /// Formatted value, units included
    pub text: String,
    /// Numeric value
    pub value: f64,
}

/// Diagnostic command: a [`Command`] plus the fields its response carries.
///
/// Identity is the request text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagCommand {
    #[serde(flatten)]
    command: Command,
    fields: Vec<Field>,
}

impl DiagCommand {
    /// Create a diagnostic command
    pub fn new(command: Command, fields: Vec<Field>) -> Self {
        Self { command, fields }
    }

    /// The underlying request definition
    pub fn command(&self) -> &Command {
        &self.command
    }

    /// Request text
    pub fn request(&self) -> &str {
        self.command.request()
    }

    /// Fields decoded from the response, in declaration order
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Check a response against the expected prefix
    pub fn verify_response(&self, response: &str) -> bool {
        self.command.verify_response(response)
    }

    /// Decode every field of a response.
    ///
    /// Fields that fail to decode are skipped; the others are still returned.
    pub fn decode(&self, response: &str) -> Vec<DecodedField> {
        let mut decoded = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            match (field.text_value(response), field.value(response)) {
                (Ok(text), Ok(value)) => decoded.push(DecodedField {
                    key: field.key().to_string(),
                    text,
                    value,
                }),
                (Err(e), _) | (_, Err(e)) => {
                    debug!(
                        "Skipping field '{}' of {:?}: {}",
                        field.key(),
                        self.request(),
                        e
                    );
                }
            }
        }
        decoded
    }
}

impl PartialEq for DiagCommand {
    fn eq(&self, other: &Self) -> bool {
        self.request() == other.request()
    }
}

impl Eq for DiagCommand {}

impl Hash for DiagCommand {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.request().hash(state);
    }
}

//! Decode errors

use thiserror::Error;

/// Errors raised while extracting a single field from a response.
///
/// A decode error only affects the field it was raised for; the remaining
/// fields of the response are still delivered.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The field reaches past the end of the response
    #[error("Token {index} out of range: response has {available} tokens")]
    TokenOutOfRange {
        /// Last token the field needs
        index: usize,
        /// Tokens in the response
        available: usize,
    },

    /// A token is not a hex byte
    #[error("Invalid hex token '{0}'")]
    InvalidHex(String),

    /// The assembled value is wider than the target integer
    #[error("Value '{hex}' does not fit into {bits} bits")]
    Overflow {
        /// Concatenated hex digits
        hex: String,
        /// Width of the target integer
        bits: usize,
    },

    /// No integer type holds this many tokens
    #[error("Unsupported field width: {0} tokens")]
    UnsupportedWidth(usize),

    /// A text field carries no parsable number
    #[error("No number in text response '{0}'")]
    InvalidNumber(String),
}

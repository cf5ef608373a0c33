//! Field Codec
//!
//! Pure decoding rules that turn positional hex tokens of an adapter response
//! into calibrated values: byte-position extraction, 16-bit sign correction,
//! scaling and display formatting.

mod error;
mod field;
mod format;

pub use error::DecodeError;
pub use field::{decode_numeric, decode_text_value, Field, FieldRule, NumericRule};
pub use format::{PatternError, ValueFormat};

/// Widest positional field supported by the codec (64 bits)
pub const MAX_TOKEN_LENGTH: usize = 8;

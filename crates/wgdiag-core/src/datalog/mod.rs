//! Data Logging
//!
//! Records decoded values as CSV: a timestamp column followed by one column
//! per field of the running package.

mod format;
mod recorder;

pub use format::{escape_field, write_header, write_row, write_separator};
pub use recorder::CsvLogger;

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A single log row with timestamp and values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Time since logging started
    pub timestamp: Duration,
    /// Values, in column order
    pub values: Vec<f64>,
}

impl LogEntry {
    /// Create a new log entry
    pub fn new(timestamp: Duration, values: Vec<f64>) -> Self {
        Self { timestamp, values }
    }
}

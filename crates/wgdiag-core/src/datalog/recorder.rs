//! CSV data logger
//!
//! Collects numeric values until every column of the current package has
//! one, then writes a row and starts over. Switching to a package with a
//! different field set writes a blank separator and a new header.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::debug;

use super::{format, LogEntry};
use crate::handler::{DataHandler, HandlerError};
use crate::package::Package;

struct LoggerState<W> {
    out: W,
    columns: Vec<String>,
    row: HashMap<String, f64>,
    header_written: bool,
    rows: usize,
}

/// Data handler writing CSV to any writer
pub struct CsvLogger<W: Write + Send> {
    state: Mutex<LoggerState<W>>,
    start_time: Instant,
}

impl CsvLogger<BufWriter<File>> {
    /// Log to a new file, truncating an existing one
    pub fn create<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write + Send> CsvLogger<W> {
    /// Log to `out`; timestamps count from now
    pub fn new(out: W) -> Self {
        Self {
            state: Mutex::new(LoggerState {
                out,
                columns: Vec::new(),
                row: HashMap::new(),
                header_written: false,
                rows: 0,
            }),
            start_time: Instant::now(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LoggerState<W>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of data rows written
    pub fn rows_written(&self) -> usize {
        self.lock().rows
    }

    /// Flush the underlying writer
    pub fn flush(&self) -> std::io::Result<()> {
        self.lock().out.flush()
    }

    /// Flush and return the underlying writer
    pub fn into_inner(self) -> std::io::Result<W> {
        let mut state = self
            .state
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        state.out.flush()?;
        Ok(state.out)
    }
}

impl<W: Write + Send> DataHandler for CsvLogger<W> {
    fn handle_text(&self, _key: &str, _value: &str) -> Result<(), HandlerError> {
        Ok(())
    }

    fn handle_value(&self, key: &str, value: f64) -> Result<(), HandlerError> {
        let mut state = self.lock();
        if !state.columns.iter().any(|c| c == key) {
            return Ok(());
        }
        state.row.insert(key.to_string(), value);
        if state.row.len() < state.columns.len() {
            return Ok(());
        }

        let values = state
            .columns
            .iter()
            .map(|c| state.row.get(c).copied().unwrap_or_default())
            .collect();
        let entry = LogEntry::new(self.start_time.elapsed(), values);
        state.row.clear();

        format::write_row(&mut state.out, &entry)?;
        state.out.flush()?;
        state.rows += 1;
        Ok(())
    }

    fn switch_package(&self, package: &Package) -> Result<(), HandlerError> {
        let columns: Vec<String> = package.field_keys().into_iter().map(String::from).collect();
        let mut state = self.lock();
        state.row.clear();

        if state.header_written && state.columns == columns {
            return Ok(());
        }
        debug!("Logging {} columns for '{}'", columns.len(), package.name());

        if state.header_written {
            format::write_separator(&mut state.out)?;
        }
        format::write_header(&mut state.out, &columns)?;
        state.out.flush()?;
        state.columns = columns;
        state.header_written = true;
        Ok(())
    }
}

//! CSV encoding

use std::io::{self, Write};

use super::LogEntry;

/// Name of the first column
pub const TIMESTAMP_COLUMN: &str = "timestamp";

/// Quote a field if it contains a separator, quote or line break
pub fn escape_field(field: &str) -> String {
    if field.contains(&[',', '"', '\n', '\r'][..]) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Write the header row
pub fn write_header<W: Write + ?Sized>(writer: &mut W, columns: &[String]) -> io::Result<()> {
    write!(writer, "{}", TIMESTAMP_COLUMN)?;
    for column in columns {
        write!(writer, ",{}", escape_field(column))?;
    }
    writeln!(writer)
}

/// Write one data row: seconds with one decimal, then the values
pub fn write_row<W: Write + ?Sized>(writer: &mut W, entry: &LogEntry) -> io::Result<()> {
    write!(writer, "{:.1}", entry.timestamp.as_secs_f64())?;
    for value in &entry.values {
        write!(writer, ",{:.4}", value)?;
    }
    writeln!(writer)
}

/// Write the blank row separating data sets
pub fn write_separator<W: Write + ?Sized>(writer: &mut W) -> io::Result<()> {
    writeln!(writer)
}

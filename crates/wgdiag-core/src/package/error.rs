//! Catalog errors

use thiserror::Error;

use crate::codec::PatternError;

/// Errors raised while building or loading commands and packages
#[derive(Error, Debug)]
pub enum CatalogError {
    /// A command timeout is zero
    #[error("Command '{0}' has a non-positive timeout")]
    InvalidTimeout(String),

    /// Scale factor is zero or not finite
    #[error("Invalid scale factor: {0}")]
    InvalidScale(f64),

    /// Field width outside 1 to 8 tokens
    #[error("Invalid field width: {0} tokens")]
    InvalidWidth(usize),

    /// Offset is not finite
    #[error("Invalid offset: {0}")]
    InvalidOffset(f64),

    /// Display pattern does not parse
    #[error(transparent)]
    Pattern(#[from] PatternError),

    /// A package has nothing to poll
    #[error("Package '{0}' has no cyclic commands")]
    EmptyCycle(String),

    /// Two fields share a key but differ
    #[error("Package '{package}' declares two different fields with key '{key}'")]
    ConflictingField {
        /// Package name
        package: String,
        /// Shared field key
        key: String,
    },

    /// Two packages share a name
    #[error("Duplicate package name: {0}")]
    DuplicatePackage(String),

    /// Reading the catalog file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The catalog is not valid JSON or fails validation
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

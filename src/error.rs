//! Custom error types for dmmconc.
//!
//! This module defines all error types used throughout the pipeline.
//! Library functions return `Result<T, ConcordError>` instead of panicking.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for dmmconc operations.
///
/// Uses `thiserror` for ergonomic error handling and automatic `Display` implementation.
#[derive(Debug, Error)]
pub enum ConcordError {
    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV read/write error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// XML parsing error
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// ZIP archive error (xlsx container)
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// SQLite error
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Workbook structure error (missing sheet, malformed reference, ...)
    #[error("Workbook error: {0}")]
    Workbook(String),

    /// Required input file not found
    #[error("Input not found: {0}")]
    InputNotFound(PathBuf),

    /// Input data failed a structural check
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Result type alias using `ConcordError`
pub type Result<T> = std::result::Result<T, ConcordError>;

/// Extension trait for adding workbook context to Option types
pub trait OptionExt<T> {
    /// Convert Option to Result with a workbook error message
    fn ok_or_workbook(self, msg: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_workbook(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| ConcordError::Workbook(msg.to_string()))
    }
}

//! Error types.

use crate::xml::ParseStatus;
use std::io;
use thiserror::Error;

/// A configuration document could not be accepted.
///
/// Carries every status produced while parsing, not just the first error.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ParseFailure {
    /// Summary message
    pub message: String,
    /// All statuses (errors and warnings) produced during the parse
    pub statuses: Vec<ParseStatus>,
}

impl ParseFailure {
    /// Number of error-severity statuses.
    pub fn error_count(&self) -> usize {
        self.statuses.iter().filter(|s| s.is_error()).count()
    }
}

/// Writing a configuration document failed.
#[derive(Debug, Error)]
pub enum SerializeError {
    #[error("I/O error while writing configuration: {0}")]
    Io(#[from] io::Error),

    #[error("XML error while writing configuration: {0}")]
    Xml(String),
}

/// Loading a configuration file failed.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Parse(#[from] ParseFailure),
}

/// Reading or writing the binary request log failed.
#[derive(Debug, Error)]
pub enum RequestLogError {
    #[error("I/O error on request log: {0}")]
    Io(#[from] io::Error),

    #[error("corrupt request log: {0}")]
    Corrupt(String),

    #[error("truncated request log: expected {expected} bytes, got {actual}")]
    Truncated { expected: u64, actual: u64 },
}

/// Mock server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("server is closed")]
    Closed,

    #[error("invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

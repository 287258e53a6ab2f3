//! Error types for zentinel-waf.

use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for zentinel-waf operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration value (engine status, limit action, ...).
    #[error("configuration error: {message}")]
    Config {
        /// Error message.
        message: String,
    },

    /// Invalid audit log parts string.
    #[error("invalid audit log part '{part}' in '{parts}'")]
    InvalidAuditLogParts {
        /// The full parts string.
        parts: String,
        /// The offending character.
        part: char,
    },

    /// Error parsing a macro template.
    #[error("macro parse error at offset {offset}: {message}")]
    MacroParse {
        /// Human-readable error message.
        message: String,
        /// Byte offset in the template.
        offset: usize,
    },

    /// Unknown variable name.
    #[error("unknown variable: {name}")]
    UnknownVariable {
        /// The unknown variable name.
        name: String,
    },

    /// Error compiling a regex pattern.
    #[error("invalid regex pattern '{pattern}': {source}")]
    RegexCompile {
        /// The pattern that failed to compile.
        pattern: String,
        /// Underlying regex error.
        #[source]
        source: regex::Error,
    },

    /// Malformed request line.
    #[error("invalid request line: {line:?}")]
    RequestLine {
        /// The line as read.
        line: String,
    },

    /// Malformed request header line.
    #[error("invalid request header: {line:?}")]
    RequestHeader {
        /// The line as read.
        line: String,
    },

    /// Error decoding a request body.
    #[error("failed to process request body: {message}")]
    RequestBody {
        /// Error message.
        message: String,
    },

    /// I/O error from a body buffer or a caller-supplied reader.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Audit logger failure.
    #[error("failed to write audit log: {message}")]
    AuditLog {
        /// Error message.
        message: String,
    },
}

impl Error {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a macro parse error at a byte offset.
    pub fn macro_parse(message: impl Into<String>, offset: usize) -> Self {
        Self::MacroParse {
            message: message.into(),
            offset,
        }
    }

    /// Create a request body error.
    pub fn request_body(message: impl Into<String>) -> Self {
        Self::RequestBody {
            message: message.into(),
        }
    }
}

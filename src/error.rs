//! Error types for pactproxy

use std::io;
use thiserror::Error;

/// Result type for pactproxy operations
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Errors that can occur in pactproxy
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Bad startup parameters or invalid mode combination
    #[error("Configuration error: {0}")]
    Config(String),

    /// Pact persistence failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid archive or pact file contents
    #[error("Invalid pact format: {0}")]
    InvalidFormat(String),

    /// Archive data corrupted (CRC mismatch)
    #[error("Archive corrupted at offset {offset}: expected CRC {expected:#x}, got {actual:#x}")]
    CorruptedData {
        /// Offset where corruption was detected
        offset: u64,
        /// Expected CRC32 value
        expected: u32,
        /// Actual CRC32 value
        actual: u32,
    },

    /// No recorded exchange matches the request
    #[error("No recording found for {0}")]
    MatchMiss(String),

    /// Live traffic does not satisfy the recorded contract
    #[error("Validation failed: {0}")]
    Validation(#[from] crate::schema::ValidationError),

    /// Forwarding to the upstream server failed
    #[error("Upstream error: {message}")]
    Upstream {
        /// Original error text
        message: String,
        /// Whether the upstream call timed out
        timeout: bool,
    },

    /// Invalid pact identifier
    #[error("Invalid pact id: {0}")]
    InvalidPactId(String),

    /// Request/response too large
    #[error("Data too large: {size} bytes exceeds limit of {limit} bytes")]
    DataTooLarge {
        /// Actual size
        size: usize,
        /// Size limit
        limit: usize,
    },

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl ProxyError {
    /// HTTP status code used when this error is reported to a client
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::Config(_) | Self::InvalidPactId(_) => 400,
            Self::MatchMiss(_) => 404,
            Self::DataTooLarge { .. } => 413,
            Self::Validation(_) => 422,
            Self::Upstream { timeout: true, .. } => 504,
            Self::Upstream { timeout: false, .. } => 502,
            _ => 500,
        }
    }

    /// Short error kind name used in diagnostic bodies
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "ConfigError",
            Self::Storage(_) | Self::Io(_) | Self::InvalidFormat(_) | Self::CorruptedData { .. } => {
                "StorageError"
            }
            Self::MatchMiss(_) => "MatchMiss",
            Self::Validation(_) => "ValidationError",
            Self::Upstream { .. } => "UpstreamError",
            Self::InvalidPactId(_) => "InvalidPactId",
            Self::DataTooLarge { .. } => "DataTooLarge",
            Self::Other(_) => "InternalError",
        }
    }
}

impl From<serde_json::Error> for ProxyError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidFormat(e.to_string())
    }
}

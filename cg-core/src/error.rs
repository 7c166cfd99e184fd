//! Error types for the Cognigy socket client.
//!
//! Every failure the client can report synchronously is folded into a
//! single `CgError` enum. Failures that happen in the background (protocol
//! errors, backend exceptions, exhausted reconnects) are not errors in this
//! sense: they are delivered as events on the session's event bus.

use thiserror::Error;

/// Convenience type alias for Results using CgError.
pub type CgResult<T> = Result<T, CgError>;

/// Unified error type for the client crates.
#[derive(Error, Debug)]
pub enum CgError {
    // -- Configuration errors --
    /// Failed to load or parse configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A required configuration value is missing.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    /// The endpoint URL could not be parsed.
    #[error("invalid endpoint url: {0}")]
    InvalidUrl(String),

    // -- Connection errors --
    /// The transport failed to establish a connection.
    #[error("connection error: {0}")]
    Connection(String),

    /// The transport gave up waiting for the connection to open.
    #[error("connection timed out after {0} ms")]
    ConnectTimeout(u64),

    /// The connection attempt was superseded or torn down before it settled.
    #[error("connection attempt cancelled")]
    ConnectCancelled,

    /// An operation required a live connection.
    #[error("not connected")]
    NotConnected,

    /// The transport session failed after it was established.
    #[error("transport error: {0}")]
    Transport(String),

    /// A frame received from the server could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    // -- HTTP / auth errors --
    /// HTTP request failed.
    #[error("http error: {0}")]
    Http(String),

    /// HTTP request timed out.
    #[error("request timeout: {0}")]
    Timeout(String),

    /// Credentials were rejected or no token came back.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// A token could not be decoded.
    #[error("invalid token: {0}")]
    InvalidToken(String),

    // -- File/IO errors --
    /// File system operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    // -- Generic --
    /// An unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),

    /// Wrapping anyhow errors for interop.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for CgError {
    fn from(e: serde_json::Error) -> Self {
        CgError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for CgError {
    fn from(e: toml::de::Error) -> Self {
        CgError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cg_error_display() {
        let err = CgError::Config("bad value".to_string());
        assert_eq!(err.to_string(), "configuration error: bad value");

        let err = CgError::ConnectTimeout(20_000);
        assert_eq!(err.to_string(), "connection timed out after 20000 ms");
    }

    #[test]
    fn test_serde_json_conversion() {
        let parse: Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: CgError = parse.unwrap_err().into();
        assert!(matches!(err, CgError::Serialization(_)));
    }
}

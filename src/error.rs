//! Error types for the Gopher server.
//!
//! Failures fall into four groups:
//! - `Protocol`: the request line was oversized or malformed
//! - `Transport`: connection I/O failed or a deadline passed
//! - `Resource`: a selector did not resolve to anything servable
//! - `Config`: a local directory entry was written without an external address
//!
//! None of these are ever reported to the client; the connection is simply
//! closed.

use std::io;

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// All errors produced while serving a connection.
#[derive(Debug, Error)]
pub enum Error {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("cannot serve selector '{selector}': {source}")]
    Resource {
        selector: String,
        #[source]
        source: io::Error,
    },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Request line violations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The request grew past the configured maximum before a newline arrived.
    #[error("request exceeds maximum size of {limit} bytes")]
    SizeLimit { limit: usize },

    /// The peer closed its side before sending a newline.
    #[error("connection closed before end of request line")]
    Unterminated,
}

/// Connection-level I/O failures.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{0}")]
    Io(#[from] io::Error),

    #[error("deadline exceeded")]
    DeadlineExceeded,
}

/// Missing settings needed to advertise this server in a listing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing external host")]
    MissingExtHost,

    #[error("missing external port")]
    MissingExtPort,
}

impl Error {
    /// Build a resource error for `selector`.
    pub fn resource(selector: impl Into<String>, source: io::Error) -> Self {
        Error::Resource {
            selector: selector.into(),
            source,
        }
    }

    /// True when the client sent more than the permitted request size.
    pub fn is_size_limit(&self) -> bool {
        matches!(self, Error::Protocol(ProtocolError::SizeLimit { .. }))
    }

    /// True when a read or write deadline expired.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Transport(TransportError::DeadlineExceeded))
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Transport(TransportError::Io(e))
    }
}

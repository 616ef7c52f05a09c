//! Error sink injected into the server configuration.

use std::fmt;

/// Destination for per-connection error reports.
///
/// Implementations must not block the caller for long and must never panic.
pub trait ErrorSink: Send + Sync {
    fn log(&self, message: fmt::Arguments<'_>);
}

/// Forwards every report to `tracing` at warn level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn log(&self, message: fmt::Arguments<'_>) {
        tracing::warn!("{}", message);
    }
}

//! Bounded request line reader.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{ProtocolError, Result};

/// Read chunk size; never larger than the remaining budget.
const CHUNK_SIZE: usize = 1024;

/// Reads a single LF-terminated line, refusing to consume more than `limit`
/// bytes in total.
pub struct LineReader<R> {
    inner: R,
    limit: usize,
    remaining: usize,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(inner: R, limit: usize) -> Self {
        Self {
            inner,
            limit,
            remaining: limit,
        }
    }

    /// Read one line and strip its terminator.
    ///
    /// Fails with `ProtocolError::SizeLimit` as soon as the budget is spent
    /// without a newline, and with `ProtocolError::Unterminated` when the
    /// peer closes first. No partial line is returned on failure.
    pub async fn read_line(&mut self) -> Result<Bytes> {
        let mut line = BytesMut::new();
        let mut chunk = [0u8; CHUNK_SIZE];

        loop {
            if self.remaining == 0 {
                return Err(ProtocolError::SizeLimit { limit: self.limit }.into());
            }

            let want = self.remaining.min(CHUNK_SIZE);
            let n = self.inner.read(&mut chunk[..want]).await?;
            if n == 0 {
                return Err(ProtocolError::Unterminated.into());
            }
            self.remaining -= n;

            if let Some(pos) = chunk[..n].iter().position(|&b| b == b'\n') {
                line.extend_from_slice(&chunk[..=pos]);
                let len = trim_line_ending(&line).len();
                line.truncate(len);
                return Ok(line.freeze());
            }

            line.extend_from_slice(&chunk[..n]);
        }
    }
}

/// Strip one trailing LF, then one trailing CR.
pub fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

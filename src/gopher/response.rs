//! Response writers: raw pass-through and dot-stuffed directory listings.

use std::fmt;
use std::io;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

use super::{with_deadline, ItemType};
use crate::error::{ConfigError, Error, Result};
use crate::server::ServerConfig;

/// Boxed write half of a client connection.
type Conn = Box<dyn AsyncWrite + Send + Unpin>;

/// A single line of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub item_type: ItemType,
    /// Display name, raw bytes.
    pub name: Bytes,
    /// Selector the entry points to, raw bytes.
    pub path: Bytes,
    pub host: String,
    pub port: String,
}

impl DirEntry {
    /// Entry without an address, to be filled in by `DirectoryWriter::local_entry`.
    pub fn new(item_type: ItemType, name: impl Into<Bytes>, path: impl Into<Bytes>) -> Self {
        Self {
            item_type,
            name: name.into(),
            path: path.into(),
            host: String::new(),
            port: String::new(),
        }
    }

    /// Point the entry at another server.
    pub fn with_address(mut self, host: impl Into<String>, port: impl Into<String>) -> Self {
        self.host = host.into();
        self.port = port.into();
        self
    }

    /// Append `{type}{name}\t{path}\t{host}\t{port}\n` to `out`.
    pub fn encode(&self, out: &mut BytesMut) {
        out.reserve(self.name.len() + self.path.len() + self.host.len() + self.port.len() + 5);
        out.put_u8(self.item_type.code());
        out.extend_from_slice(&self.name);
        out.put_u8(b'\t');
        out.extend_from_slice(&self.path);
        out.put_u8(b'\t');
        out.extend_from_slice(self.host.as_bytes());
        out.put_u8(b'\t');
        out.extend_from_slice(self.port.as_bytes());
        out.put_u8(b'\n');
    }
}

/// Raw output for one connection.
///
/// Bytes pass straight through; the only end marker for a raw body is the
/// connection closing.
pub struct ResponseWriter {
    conn: Conn,
    config: Arc<ServerConfig>,
    deadline: Option<Instant>,
    closed: bool,
}

impl ResponseWriter {
    /// Wrap a connection. Every write must finish before `deadline`.
    pub fn new<W>(conn: W, config: Arc<ServerConfig>, deadline: Option<Instant>) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            conn: Box::new(conn),
            config,
            deadline,
            closed: false,
        }
    }

    /// Configuration of the server that accepted this connection.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Report an error through the server's error sink.
    pub fn log_error(&self, message: fmt::Arguments<'_>) {
        self.config.error_log.log(message);
    }

    /// Write all of `buf` to the client.
    pub async fn write(&mut self, buf: &[u8]) -> Result<()> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "response already closed").into());
        }

        let conn = &mut self.conn;
        with_deadline(self.deadline, async move {
            conn.write_all(buf).await.map_err(Error::from)
        })
        .await
    }

    /// End the response. Later calls are no-ops.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let conn = &mut self.conn;
        with_deadline(self.deadline, async move {
            conn.flush().await?;
            conn.shutdown().await.map_err(Error::from)
        })
        .await
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Start a directory listing on this connection.
    pub fn directory(&mut self) -> DirectoryWriter<'_> {
        DirectoryWriter::new(self)
    }
}

/// Writes a directory listing with dot-stuffing and the `.` terminator.
///
/// `close` must be called once the listing ends, on success or failure.
/// After a write error or `abort`, closing releases the connection without
/// the terminator so a truncated listing never looks complete.
pub struct DirectoryWriter<'a> {
    w: &'a mut ResponseWriter,
    buf: BytesMut,
    line_start: bool,
    failed: bool,
    closed: bool,
}

impl<'a> DirectoryWriter<'a> {
    fn new(w: &'a mut ResponseWriter) -> Self {
        Self {
            w,
            buf: BytesMut::with_capacity(256),
            line_start: true,
            failed: false,
            closed: false,
        }
    }

    /// Write one entry exactly as given.
    pub async fn entry(&mut self, e: &DirEntry) -> Result<()> {
        let mut line = BytesMut::new();
        e.encode(&mut line);
        self.write_text(&line).await
    }

    /// Write an entry that points back at this server.
    ///
    /// Host and port are replaced by the configured external address. If
    /// either is missing nothing is written and `ConfigError` is returned.
    pub async fn local_entry(&mut self, mut e: DirEntry) -> Result<()> {
        let config = self.w.config();
        if config.ext_host.is_empty() {
            return Err(ConfigError::MissingExtHost.into());
        }
        if config.ext_port.is_empty() {
            return Err(ConfigError::MissingExtPort.into());
        }
        e.host.clone_from(&config.ext_host);
        e.port.clone_from(&config.ext_port);

        self.entry(&e).await
    }

    /// Write free text through the dot-stuffing encoder.
    pub async fn write_text(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "listing already closed").into());
        }
        self.stuff(data);
        self.flush().await
    }

    /// Mark the listing as failed; `close` will skip the terminator.
    pub fn abort(&mut self) {
        self.failed = true;
    }

    /// Write the terminator (unless failed) and close the connection.
    /// Only the first call has any effect.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let terminated = if self.failed {
            self.buf.clear();
            Ok(())
        } else {
            if !self.line_start {
                self.buf.put_u8(b'\n');
            }
            self.buf.extend_from_slice(b".\n");
            self.flush().await
        };

        let closed = self.w.close().await;
        terminated.and(closed)
    }

    fn stuff(&mut self, data: &[u8]) {
        self.buf.reserve(data.len());
        for &b in data {
            if self.line_start && b == b'.' {
                self.buf.put_u8(b'.');
            }
            self.buf.put_u8(b);
            self.line_start = b == b'\n';
        }
    }

    async fn flush(&mut self) -> Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let result = self.w.write(&self.buf).await;
        self.buf.clear();
        if result.is_err() {
            self.failed = true;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::tests::config_with_addr;
    use tokio::io::{AsyncReadExt, DuplexStream};

    fn pipe(config: ServerConfig) -> (DuplexStream, ResponseWriter) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        (client, ResponseWriter::new(server, Arc::new(config), None))
    }

    async fn drain(mut client: DuplexStream) -> Vec<u8> {
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        out
    }

    #[test]
    fn test_encode_entry() {
        let e = DirEntry::new(ItemType::TEXT, "a", "/a").with_address("h", "70");
        let mut out = BytesMut::new();
        e.encode(&mut out);
        assert_eq!(&out[..], b"0a\t/a\th\t70\n");
    }

    #[test]
    fn test_encode_entry_raw_bytes() {
        let e = DirEntry::new(ItemType::TEXT, &b"caf\xe9"[..], &b"/caf\xe9"[..]).with_address("h", "70");
        let mut out = BytesMut::new();
        e.encode(&mut out);
        assert_eq!(&out[..], b"0caf\xe9\t/caf\xe9\th\t70\n");
    }

    #[tokio::test]
    async fn test_raw_body_unframed() {
        let (client, mut w) = pipe(config_with_addr("h", "70"));
        w.write(b"hello\n.\nworld").await.unwrap();
        w.close().await.unwrap();
        assert_eq!(drain(client).await, b"hello\n.\nworld");
    }

    #[tokio::test]
    async fn test_write_after_close_fails() {
        let (_client, mut w) = pipe(config_with_addr("h", "70"));
        w.close().await.unwrap();
        assert!(w.is_closed());
        assert!(w.write(b"late").await.is_err());
        // Closing twice is harmless
        w.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_entry_exact_bytes() {
        let (client, mut w) = pipe(config_with_addr("h", "70"));
        let mut dir = w.directory();
        let e = DirEntry::new(ItemType::TEXT, "a", "/a").with_address("h", "70");
        dir.entry(&e).await.unwrap();
        dir.close().await.unwrap();
        assert_eq!(drain(client).await, b"0a\t/a\th\t70\n.\n");
    }

    #[tokio::test]
    async fn test_empty_listing() {
        let (client, mut w) = pipe(config_with_addr("h", "70"));
        let mut dir = w.directory();
        dir.close().await.unwrap();
        assert_eq!(drain(client).await, b".\n");
    }

    #[tokio::test]
    async fn test_double_close_single_terminator() {
        let (client, mut w) = pipe(config_with_addr("h", "70"));
        let mut dir = w.directory();
        dir.entry(&DirEntry::new(ItemType::DIRECTORY, "c/", "/c").with_address("h", "70"))
            .await
            .unwrap();
        dir.close().await.unwrap();
        dir.close().await.unwrap();
        assert_eq!(drain(client).await, b"1c/\t/c\th\t70\n.\n");
    }

    #[tokio::test]
    async fn test_local_entry_uses_external_address() {
        let (client, mut w) = pipe(config_with_addr("gopher.example", "7070"));
        let mut dir = w.directory();
        let e = DirEntry::new(ItemType::HTML, "a.html", "/a.html").with_address("ignored", "1");
        dir.local_entry(e).await.unwrap();
        dir.close().await.unwrap();
        assert_eq!(
            drain(client).await,
            b"ha.html\t/a.html\tgopher.example\t7070\n.\n"
        );
    }

    #[tokio::test]
    async fn test_local_entry_missing_host() {
        let (client, mut w) = pipe(config_with_addr("", "70"));
        let mut dir = w.directory();
        let err = dir
            .local_entry(DirEntry::new(ItemType::TEXT, "a", "/a"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::MissingExtHost)));
        dir.abort();
        dir.close().await.unwrap();
        assert!(drain(client).await.is_empty());
    }

    #[tokio::test]
    async fn test_local_entry_missing_port() {
        let (client, mut w) = pipe(config_with_addr("h", ""));
        let mut dir = w.directory();
        let err = dir
            .local_entry(DirEntry::new(ItemType::TEXT, "a", "/a"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::MissingExtPort)));
        // Nothing was written by the failed call
        dir.close().await.unwrap();
        assert_eq!(drain(client).await, b".\n");
    }

    #[tokio::test]
    async fn test_dot_stuffing() {
        let (client, mut w) = pipe(config_with_addr("h", "70"));
        let mut dir = w.directory();
        dir.entry(&DirEntry::new(ItemType(b'.'), "hidden", "/x").with_address("h", "70"))
            .await
            .unwrap();
        dir.write_text(b".\nmid.dot\n..two\n").await.unwrap();
        dir.close().await.unwrap();
        assert_eq!(
            drain(client).await,
            b"..hidden\t/x\th\t70\n..\nmid.dot\n...two\n.\n"
        );
    }

    #[tokio::test]
    async fn test_stuffing_state_spans_writes() {
        let (client, mut w) = pipe(config_with_addr("h", "70"));
        let mut dir = w.directory();
        dir.write_text(b"iabc").await.unwrap();
        dir.write_text(b".def\n").await.unwrap();
        dir.write_text(b".").await.unwrap();
        dir.close().await.unwrap();
        // Unterminated text gets a newline before the terminator
        assert_eq!(drain(client).await, b"iabc.def\n..\n.\n");
    }

    #[tokio::test]
    async fn test_failed_write_suppresses_terminator() {
        let (client, mut w) = pipe(config_with_addr("h", "70"));
        drop(client);
        let mut dir = w.directory();
        let e = DirEntry::new(ItemType::TEXT, "a", "/a").with_address("h", "70");
        assert!(dir.entry(&e).await.is_err());
        // No terminator write is attempted, so closing succeeds
        dir.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_write_deadline() {
        // Tiny pipe that nobody drains
        let (_client, server) = tokio::io::duplex(4);
        let deadline = Instant::now() + std::time::Duration::from_millis(20);
        let mut w = ResponseWriter::new(server, Arc::new(config_with_addr("h", "70")), Some(deadline));
        let err = w.write(&[0u8; 1024]).await.unwrap_err();
        assert!(err.is_timeout());
    }
}

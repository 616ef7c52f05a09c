//! Handler that serves a file tree: raw bytes for files, listings for
//! directories.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Error, Result};
use crate::fs::{FileInfo, FileSystem, FsFile, LocalFs};
use crate::gopher::{classify, DirEntry, DirectoryWriter, ResponseWriter};
use crate::server::{Handler, Request};

/// Copy buffer size for file bodies.
const COPY_BUFFER_SIZE: usize = 32 * 1024;

/// Serves selectors from a `FileSystem`.
#[derive(Clone)]
pub struct FileServer {
    fs: Arc<dyn FileSystem>,
}

impl FileServer {
    pub fn new(fs: impl FileSystem + 'static) -> Self {
        Self { fs: Arc::new(fs) }
    }

    /// Serve a directory on local disk.
    pub fn local(root: impl Into<std::path::PathBuf>) -> Self {
        Self::new(LocalFs::new(root))
    }

    async fn serve(&self, w: &mut ResponseWriter, req: &Request) -> Result<()> {
        let path = clean_selector(&req.content);
        let shown = String::from_utf8_lossy(&path);

        let mut file = self
            .fs
            .open(&path)
            .await
            .map_err(|e| Error::resource(shown.as_ref(), e))?;
        let info = file
            .stat()
            .await
            .map_err(|e| Error::resource(shown.as_ref(), e))?;

        if info.is_dir {
            serve_directory(w, &path, file.as_mut()).await
        } else {
            debug!(path = %shown, "Serving file");
            copy_file(w, &path, file.as_mut()).await
        }
    }
}

#[async_trait]
impl Handler for FileServer {
    async fn serve_gopher(&self, w: &mut ResponseWriter, req: &Request) {
        if let Err(e) = self.serve(w, req).await {
            w.log_error(format_args!("{}: {}", req.remote_addr, e));
        }
    }
}

async fn serve_directory(w: &mut ResponseWriter, path: &[u8], file: &mut dyn FsFile) -> Result<()> {
    let mut entries = file
        .read_entries()
        .await
        .map_err(|e| Error::resource(String::from_utf8_lossy(path), e))?;
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    debug!(path = %String::from_utf8_lossy(path), entries = entries.len(), "Serving directory");

    let mut dir = w.directory();
    let result = write_entries(&mut dir, path, &entries).await;
    if result.is_err() {
        dir.abort();
    }
    let closed = dir.close().await;
    result.and(closed)
}

async fn write_entries(dir: &mut DirectoryWriter<'_>, path: &[u8], entries: &[FileInfo]) -> Result<()> {
    for info in entries {
        let mut name = info.name.to_vec();
        if info.is_dir {
            name.push(b'/');
        }
        let entry = DirEntry::new(
            classify(&info.name, info.is_dir),
            name,
            join_selector(path, &info.name),
        );
        dir.local_entry(entry).await?;
    }
    Ok(())
}

async fn copy_file(w: &mut ResponseWriter, path: &[u8], file: &mut dyn FsFile) -> Result<()> {
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        let n = file
            .read(&mut buf)
            .await
            .map_err(|e| Error::resource(String::from_utf8_lossy(path), e))?;
        if n == 0 {
            return Ok(());
        }
        w.write(&buf[..n]).await?;
    }
}

/// Anchor a selector at `/` and collapse `.`, `..` and repeated separators.
/// The result never climbs above `/`. Bytes other than `/` are kept as is.
pub fn clean_selector(selector: &[u8]) -> Vec<u8> {
    let mut parts: Vec<&[u8]> = Vec::new();
    for part in selector.split(|&b| b == b'/') {
        match part {
            b"" | b"." => {}
            b".." => {
                parts.pop();
            }
            _ => parts.push(part),
        }
    }

    let mut out = Vec::with_capacity(selector.len() + 1);
    out.push(b'/');
    out.extend_from_slice(&parts.join(&b'/'));
    out
}

/// Selector of `name` inside the directory selector `dir`.
pub fn join_selector(dir: &[u8], name: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(dir.len() + name.len() + 1);
    out.extend_from_slice(dir);
    if !dir.ends_with(b"/") {
        out.push(b'/');
    }
    out.extend_from_slice(name);
    out
}

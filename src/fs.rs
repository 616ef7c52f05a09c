//! File-system backends for the file server.
//!
//! Paths handed to a `FileSystem` are already cleaned and absolute
//! (`/`, `/docs/a.txt`); backends resolve them below their own root.
//! Paths and names are raw bytes: nothing requires them to be UTF-8.
//!
//! - `LocalFs`: a directory on local disk
//! - `MemFs`: an in-memory tree, for tests and embedded content

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncReadExt;

#[cfg(unix)]
use std::os::unix::ffi::{OsStrExt, OsStringExt};

/// Name and kind of a file or directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub name: Bytes,
    pub is_dir: bool,
}

/// Source of servable resources. Must tolerate concurrent calls.
#[async_trait]
pub trait FileSystem: Send + Sync {
    async fn open(&self, path: &[u8]) -> io::Result<Box<dyn FsFile>>;
}

/// An opened file or directory.
#[async_trait]
pub trait FsFile: Send {
    async fn stat(&self) -> io::Result<FileInfo>;

    /// Children of a directory, in no particular order.
    async fn read_entries(&mut self) -> io::Result<Vec<FileInfo>>;

    /// Read file content into `buf`; 0 means end of stream.
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

fn not_a_directory() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, "not a directory")
}

fn is_a_directory() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, "is a directory")
}

fn split_path(path: &[u8]) -> impl Iterator<Item = &[u8]> {
    path.split(|&b| b == b'/').filter(|p| !p.is_empty())
}

/// Last component of a cleaned path, `/` for the root.
fn base_name(path: &[u8]) -> Bytes {
    match split_path(path).last() {
        Some(name) => Bytes::copy_from_slice(name),
        None => Bytes::from_static(b"/"),
    }
}

#[cfg(unix)]
fn os_name(bytes: &[u8]) -> Cow<'_, OsStr> {
    Cow::Borrowed(OsStr::from_bytes(bytes))
}

#[cfg(not(unix))]
fn os_name(bytes: &[u8]) -> Cow<'_, OsStr> {
    Cow::Owned(OsString::from(String::from_utf8_lossy(bytes).into_owned()))
}

#[cfg(unix)]
fn name_bytes(name: OsString) -> Bytes {
    Bytes::from(name.into_vec())
}

#[cfg(not(unix))]
fn name_bytes(name: OsString) -> Bytes {
    Bytes::from(name.to_string_lossy().into_owned())
}

/// Serves files below a local directory.
///
/// Symbolic links that resolve outside the root are refused unless
/// `follow_symlinks` is set.
#[derive(Debug, Clone)]
pub struct LocalFs {
    root: PathBuf,
    follow_symlinks: bool,
}

impl LocalFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            follow_symlinks: false,
        }
    }

    /// Allow links that point outside the root.
    pub fn follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &[u8]) -> PathBuf {
        let mut full = self.root.clone();
        for part in split_path(path).filter(|p| *p != b"." && *p != b"..") {
            full.push(&*os_name(part));
        }
        full
    }

    /// Canonical form of `full`, which must stay below the canonical root.
    async fn contained(&self, full: &Path) -> io::Result<PathBuf> {
        let root = tokio::fs::canonicalize(&self.root).await?;
        let real = tokio::fs::canonicalize(full).await?;
        if real.starts_with(&root) {
            Ok(real)
        } else {
            Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "path resolves outside the served root",
            ))
        }
    }
}

#[async_trait]
impl FileSystem for LocalFs {
    async fn open(&self, path: &[u8]) -> io::Result<Box<dyn FsFile>> {
        let mut full = self.resolve(path);
        if !self.follow_symlinks {
            full = self.contained(&full).await?;
        }
        let meta = tokio::fs::metadata(&full).await?;
        let name = base_name(path);

        if meta.is_dir() {
            Ok(Box::new(LocalFile::Dir { path: full, name }))
        } else {
            let file = tokio::fs::File::open(&full).await?;
            Ok(Box::new(LocalFile::File { file, name }))
        }
    }
}

enum LocalFile {
    Dir { path: PathBuf, name: Bytes },
    File { file: tokio::fs::File, name: Bytes },
}

#[async_trait]
impl FsFile for LocalFile {
    async fn stat(&self) -> io::Result<FileInfo> {
        match self {
            LocalFile::Dir { name, .. } => Ok(FileInfo {
                name: name.clone(),
                is_dir: true,
            }),
            LocalFile::File { file, name } => {
                let meta = file.metadata().await?;
                Ok(FileInfo {
                    name: name.clone(),
                    is_dir: meta.is_dir(),
                })
            }
        }
    }

    async fn read_entries(&mut self) -> io::Result<Vec<FileInfo>> {
        let path = match self {
            LocalFile::Dir { path, .. } => path,
            LocalFile::File { .. } => return Err(not_a_directory()),
        };

        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(path.as_path()).await?;
        while let Some(entry) = dir.next_entry().await? {
            let file_type = entry.file_type().await?;
            // Links are listed by what they point to; dangling ones as files
            let is_dir = if file_type.is_symlink() {
                tokio::fs::metadata(entry.path())
                    .await
                    .map(|m| m.is_dir())
                    .unwrap_or(false)
            } else {
                file_type.is_dir()
            };
            entries.push(FileInfo {
                name: name_bytes(entry.file_name()),
                is_dir,
            });
        }
        Ok(entries)
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            LocalFile::File { file, .. } => file.read(buf).await,
            LocalFile::Dir { .. } => Err(is_a_directory()),
        }
    }
}

#[derive(Debug, Clone)]
enum MemNode {
    Dir,
    File(Bytes),
}

/// In-memory file tree. Parent directories are created implicitly.
#[derive(Debug, Clone)]
pub struct MemFs {
    nodes: Arc<BTreeMap<Vec<u8>, MemNode>>,
}

impl Default for MemFs {
    fn default() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(b"/".to_vec(), MemNode::Dir);
        Self {
            nodes: Arc::new(nodes),
        }
    }
}

impl MemFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file at `path` (absolute, `/`-separated).
    pub fn with_file(mut self, path: impl AsRef<[u8]>, content: impl Into<Bytes>) -> Self {
        let path = normalize(path.as_ref());
        self.add_parents(&path);
        Arc::make_mut(&mut self.nodes).insert(path, MemNode::File(content.into()));
        self
    }

    /// Add an empty directory at `path`.
    pub fn with_dir(mut self, path: impl AsRef<[u8]>) -> Self {
        let path = normalize(path.as_ref());
        self.add_parents(&path);
        Arc::make_mut(&mut self.nodes).insert(path, MemNode::Dir);
        self
    }

    fn add_parents(&mut self, path: &[u8]) {
        let nodes = Arc::make_mut(&mut self.nodes);
        let mut parent = parent_of(path);
        while let Some(p) = parent {
            nodes.entry(p.to_vec()).or_insert(MemNode::Dir);
            parent = parent_of(p);
        }
    }
}

fn normalize(path: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(path.len() + 1);
    for part in split_path(path) {
        out.push(b'/');
        out.extend_from_slice(part);
    }
    if out.is_empty() {
        out.push(b'/');
    }
    out
}

fn parent_of(path: &[u8]) -> Option<&[u8]> {
    if path == b"/" {
        return None;
    }
    match path.iter().rposition(|&b| b == b'/') {
        Some(0) => Some(&b"/"[..]),
        Some(i) => Some(&path[..i]),
        None => None,
    }
}

#[async_trait]
impl FileSystem for MemFs {
    async fn open(&self, path: &[u8]) -> io::Result<Box<dyn FsFile>> {
        let path = normalize(path);
        match self.nodes.get(&path) {
            Some(MemNode::Dir) => Ok(Box::new(MemFile::Dir {
                nodes: Arc::clone(&self.nodes),
                path,
            })),
            Some(MemNode::File(content)) => Ok(Box::new(MemFile::File {
                name: base_name(&path),
                content: content.clone(),
                pos: 0,
            })),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{}: no such file or directory", String::from_utf8_lossy(&path)),
            )),
        }
    }
}

enum MemFile {
    Dir {
        nodes: Arc<BTreeMap<Vec<u8>, MemNode>>,
        path: Vec<u8>,
    },
    File {
        name: Bytes,
        content: Bytes,
        pos: usize,
    },
}

#[async_trait]
impl FsFile for MemFile {
    async fn stat(&self) -> io::Result<FileInfo> {
        Ok(match self {
            MemFile::Dir { path, .. } => FileInfo {
                name: base_name(path),
                is_dir: true,
            },
            MemFile::File { name, .. } => FileInfo {
                name: name.clone(),
                is_dir: false,
            },
        })
    }

    async fn read_entries(&mut self) -> io::Result<Vec<FileInfo>> {
        let (nodes, path) = match self {
            MemFile::Dir { nodes, path } => (nodes, path),
            MemFile::File { .. } => return Err(not_a_directory()),
        };

        Ok(nodes
            .iter()
            .filter(|(child, _)| parent_of(child) == Some(path.as_slice()))
            .map(|(child, node)| FileInfo {
                name: base_name(child),
                is_dir: matches!(node, MemNode::Dir),
            })
            .collect())
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            MemFile::File { content, pos, .. } => {
                let rest = &content[*pos..];
                let n = rest.len().min(buf.len());
                buf[..n].copy_from_slice(&rest[..n]);
                *pos += n;
                Ok(n)
            }
            MemFile::Dir { .. } => Err(is_a_directory()),
        }
    }
}

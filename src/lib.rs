//! gopherd: a Gopher (RFC 1436) server.
//!
//! - `server`: accept loop, one task per connection, request dispatch
//! - `gopher`: request line reader, raw and directory response writers
//! - `file_server`: handler serving a `FileSystem` tree
//! - `fs`: local-disk and in-memory file systems
//! - `config`: CLI and TOML configuration for the binary

pub mod config;
pub mod error;
pub mod file_server;
pub mod fs;
pub mod gopher;
pub mod logging;
pub mod server;

pub use error::{Error, Result};
pub use file_server::FileServer;
pub use fs::{FileInfo, FileSystem, FsFile, LocalFs, MemFs};
pub use gopher::{DirEntry, DirectoryWriter, ItemType, ResponseWriter};
pub use logging::{ErrorSink, TracingSink};
pub use server::{Handler, Request, Server, ServerConfig};

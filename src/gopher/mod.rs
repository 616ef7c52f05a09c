//! Gopher protocol (RFC 1436) framing.
//!
//! A client connects, sends one selector line, and the server answers with
//! either raw bytes or a directory listing, then closes the connection:
//!
//! ```text
//! Request:  <selector>\r\n
//! Response: <raw bytes>                              (closed by server)
//!
//! Request:  /docs\r\n
//! Response: 0notes.txt\t/docs/notes.txt\tgopher.example\t70\n
//!           1old/\t/docs/old\tgopher.example\t70\n
//!           .\n
//! ```
//!
//! Listing lines beginning with `.` are dot-stuffed so that the lone `.`
//! terminator is unambiguous. There are no status codes: failures show up as
//! an empty or truncated response.

pub mod item_type;
pub mod parser;
pub mod response;

pub use item_type::{classify, ItemType};
pub use parser::LineReader;
pub use response::{DirEntry, DirectoryWriter, ResponseWriter};

use std::future::Future;
use tokio::time::Instant;

use crate::error::{Result, TransportError};

/// Run `fut` to completion or fail once `deadline` passes.
pub(crate) async fn with_deadline<T, F>(deadline: Option<Instant>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match deadline {
        Some(deadline) => match tokio::time::timeout_at(deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::DeadlineExceeded.into()),
        },
        None => fut.await,
    }
}

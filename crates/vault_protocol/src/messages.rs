//! Request, response and stream messages.

use crate::document::{Document, File};
use crate::update::Update;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest chunk carried by one file stream message (256 KiB).
pub const CHUNK_SIZE: usize = 256 * 1024;

/// Largest file the server accepts (14 MiB).
pub const MAX_FILE_SIZE: usize = 14 << 20;

/// Opaque bearer credential.
///
/// Carried out of band on every authenticated call. Clients never inspect the
/// bytes except to learn the expiry for refresh scheduling.
#[derive(Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BearerToken(Bytes);

impl BearerToken {
    /// Wraps raw token bytes.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Returns the raw token bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns true for the empty (logged out) token.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BearerToken({} bytes)", self.0.len())
    }
}

/// Register/Login request.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    /// User login.
    pub login: String,
    /// User password.
    pub password: String,
}

impl LoginRequest {
    /// Creates a login request.
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("login", &self.login)
            .finish_non_exhaustive()
    }
}

/// Update stream request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRequest {
    /// Exclusive lower bound: the caller's current watermark.
    pub min_serial: u64,
}

/// A frame of the server-streamed update feed.
///
/// The first frame is always [`UpdateFrame::Begin`]; documents follow in no
/// particular cross-kind order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateFrame {
    /// Announces the inclusive upper bound of this sync.
    Begin {
        /// Snapshot serial; the next watermark on success.
        snapshot_serial: u64,
    },
    /// One changed document.
    Document(Update),
}

/// Request addressing one document by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRequest {
    /// Document identifier.
    pub id: String,
}

/// A piece of file content.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileChunk {
    /// Content bytes.
    pub data: Bytes,
    /// Set on the final chunk.
    pub eof: bool,
}

impl fmt::Debug for FileChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileChunk")
            .field("len", &self.data.len())
            .field("eof", &self.eof)
            .finish()
    }
}

/// One message of a chunked file upload or download.
///
/// A transfer is one [`FileStreamMessage::Info`] followed by chunks, the last
/// of which has `eof` set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileStreamMessage {
    /// File document without content.
    Info(Document<File>),
    /// Content chunk.
    Chunk(FileChunk),
}

impl FileStreamMessage {
    /// Splits a file document into an info message and content chunks of at
    /// most `chunk_size` bytes.
    ///
    /// An empty file yields a single empty final chunk.
    pub fn split(mut doc: Document<File>, chunk_size: usize) -> Vec<FileStreamMessage> {
        let data = std::mem::take(&mut doc.payload.data);
        let chunk_size = chunk_size.max(1);
        let mut messages = Vec::with_capacity(2 + data.len() / chunk_size);
        messages.push(FileStreamMessage::Info(doc));

        let mut offset = 0;
        loop {
            let end = (offset + chunk_size).min(data.len());
            let eof = end == data.len();
            messages.push(FileStreamMessage::Chunk(FileChunk {
                data: data.slice(offset..end),
                eof,
            }));
            if eof {
                break;
            }
            offset = end;
        }
        messages
    }
}

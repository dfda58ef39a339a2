//! Chunked file transfer.
//!
//! An upload is one info message followed by content chunks, the last one
//! flagged end-of-file. Uploads arrive over a channel and limits are checked
//! per message, so an oversized upload fails before the sender finishes. Size
//! and digest are always computed here; values sent by the client are
//! overwritten.

use crate::error::{DocumentError, DocumentResult};
use bytes::BytesMut;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use vault_protocol::{Document, File, FileStreamMessage};

/// Incoming upload messages, closed by the sender when the upload ends.
pub type FileStream = mpsc::Receiver<FileStreamMessage>;

/// Returns the lower-case hex SHA-256 of `data`.
pub fn content_digest(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Reassembles an uploaded file from stream messages.
#[derive(Debug)]
pub struct FileUpload {
    chunk_size: usize,
    max_file_size: usize,
    info: Option<Document<File>>,
    data: BytesMut,
    complete: bool,
}

impl FileUpload {
    /// Creates an empty upload with the given limits.
    pub fn new(chunk_size: usize, max_file_size: usize) -> Self {
        Self {
            chunk_size,
            max_file_size,
            info: None,
            data: BytesMut::new(),
            complete: false,
        }
    }

    /// Accepts the next message.
    ///
    /// # Errors
    ///
    /// `BadRequest` when the message is out of order or a size limit is
    /// exceeded.
    pub fn push(&mut self, message: FileStreamMessage) -> DocumentResult<()> {
        if self.complete {
            return Err(DocumentError::bad_request("data after end of file"));
        }
        match message {
            FileStreamMessage::Info(doc) => {
                if self.info.is_some() {
                    return Err(DocumentError::bad_request("unexpected file info"));
                }
                if !doc.payload.data.is_empty() {
                    return Err(DocumentError::bad_request(
                        "file content must be sent in chunks",
                    ));
                }
                self.info = Some(doc);
            }
            FileStreamMessage::Chunk(chunk) => {
                if self.info.is_none() {
                    return Err(DocumentError::bad_request("file info must come first"));
                }
                if chunk.data.len() > self.chunk_size {
                    return Err(DocumentError::bad_request(format!(
                        "chunk exceeds {} bytes",
                        self.chunk_size
                    )));
                }
                if self.data.len() + chunk.data.len() > self.max_file_size {
                    return Err(DocumentError::bad_request(format!(
                        "file exceeds {} bytes",
                        self.max_file_size
                    )));
                }
                self.data.extend_from_slice(&chunk.data);
                self.complete = chunk.eof;
            }
        }
        Ok(())
    }

    /// Completes the upload.
    ///
    /// # Errors
    ///
    /// `BadRequest` ("incomplete file data") if no end-of-file chunk arrived.
    pub fn finish(self) -> DocumentResult<Document<File>> {
        let mut doc = match (self.info, self.complete) {
            (Some(doc), true) => doc,
            _ => return Err(DocumentError::bad_request("incomplete file data")),
        };
        let data = self.data.freeze();
        doc.payload.size = data.len() as u64;
        doc.payload.digest = content_digest(&data);
        doc.payload.data = data;
        Ok(doc)
    }

    /// Reads an upload from `messages` until the sender closes it.
    ///
    /// The first rejected message ends the upload and drops the receiver, so
    /// the sender sees the channel close.
    ///
    /// # Errors
    ///
    /// Same as [`FileUpload::push`] and [`FileUpload::finish`].
    pub async fn receive(
        mut messages: FileStream,
        chunk_size: usize,
        max_file_size: usize,
    ) -> DocumentResult<Document<File>> {
        let mut upload = Self::new(chunk_size, max_file_size);
        while let Some(message) = messages.recv().await {
            upload.push(message)?;
        }
        upload.finish()
    }

    /// Assembles a whole message sequence.
    ///
    /// # Errors
    ///
    /// Same as [`FileUpload::push`] and [`FileUpload::finish`].
    pub fn assemble(
        messages: impl IntoIterator<Item = FileStreamMessage>,
        chunk_size: usize,
        max_file_size: usize,
    ) -> DocumentResult<Document<File>> {
        let mut upload = Self::new(chunk_size, max_file_size);
        for message in messages {
            upload.push(message)?;
        }
        upload.finish()
    }
}

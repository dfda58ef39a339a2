//! In-process transport backed by a [`VaultServer`].
//!
//! Every request and response is encoded and decoded with the wire codec, so
//! the loopback behaves like a network transport minus the network.

use crate::transport::{FrameStream, VaultTransport};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;
use vault_protocol::{
    codec, BearerToken, Code, Document, DocumentKind, DocumentRequest, File, FileStreamMessage,
    LoginRequest, Status, Update, UpdateRequest,
};
use vault_server::{FileStream, VaultServer};

/// Default number of update frames buffered between server and client.
const DEFAULT_STREAM_BUFFER: usize = 64;

/// Transport calling a [`VaultServer`] in the same process.
#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    server: Arc<VaultServer>,
    stream_buffer: usize,
}

impl LoopbackTransport {
    /// Creates a loopback transport for `server`.
    pub fn new(server: Arc<VaultServer>) -> Self {
        Self {
            server,
            stream_buffer: DEFAULT_STREAM_BUFFER,
        }
    }

    /// Sets the number of frames buffered per update stream.
    pub fn with_stream_buffer(mut self, frames: usize) -> Self {
        self.stream_buffer = frames.max(1);
        self
    }

    /// Returns the server behind this transport.
    pub fn server(&self) -> &Arc<VaultServer> {
        &self.server
    }

    /// Streams upload messages to the server one at a time.
    ///
    /// The pump stops as soon as the server drops the receiver, which is how
    /// a rejected upload ends early.
    fn upload(&self, messages: Vec<FileStreamMessage>) -> FileStream {
        let (tx, rx) = mpsc::channel(self.stream_buffer);
        tokio::spawn(async move {
            for message in messages {
                let message = match wire(&message) {
                    Ok(message) => message,
                    Err(status) => {
                        debug!(error = %status, "upload message not encodable");
                        return;
                    }
                };
                if tx.send(message).await.is_err() {
                    debug!("upload closed by server");
                    return;
                }
            }
        });
        rx
    }
}

/// Sends `value` across the wire.
fn wire<T: Serialize + DeserializeOwned>(value: &T) -> Result<T, Status> {
    codec::encode(value)
        .and_then(|bytes| codec::decode(&bytes))
        .map_err(|err| Status::new(Code::Unavailable, err.to_string()))
}

/// Sends a server response back across the wire.
fn reply<T: Serialize + DeserializeOwned>(response: Result<T, Status>) -> Result<T, Status> {
    wire(&response)?
}

#[async_trait]
impl VaultTransport for LoopbackTransport {
    async fn register(&self, request: LoginRequest) -> Result<BearerToken, Status> {
        reply(self.server.register(wire(&request)?).await)
    }

    async fn login(&self, request: LoginRequest) -> Result<BearerToken, Status> {
        reply(self.server.login(wire(&request)?).await)
    }

    async fn refresh(&self, token: &BearerToken) -> Result<BearerToken, Status> {
        reply(self.server.refresh(&wire(token)?).await)
    }

    async fn add_document(&self, token: &BearerToken, doc: Update) -> Result<String, Status> {
        reply(self.server.add_document(&wire(token)?, wire(&doc)?).await)
    }

    async fn update_document(&self, token: &BearerToken, doc: Update) -> Result<(), Status> {
        reply(self.server.update_document(&wire(token)?, wire(&doc)?).await)
    }

    async fn delete_document(&self, token: &BearerToken, doc: Update) -> Result<(), Status> {
        reply(self.server.delete_document(&wire(token)?, wire(&doc)?).await)
    }

    async fn get_document(
        &self,
        token: &BearerToken,
        kind: DocumentKind,
        request: DocumentRequest,
    ) -> Result<Update, Status> {
        reply(
            self.server
                .get_document(&wire(token)?, wire(&kind)?, wire(&request)?)
                .await,
        )
    }

    async fn add_file(
        &self,
        token: &BearerToken,
        messages: Vec<FileStreamMessage>,
    ) -> Result<String, Status> {
        let token = wire(token)?;
        reply(self.server.add_file(&token, self.upload(messages)).await)
    }

    async fn update_file(
        &self,
        token: &BearerToken,
        messages: Vec<FileStreamMessage>,
    ) -> Result<(), Status> {
        let token = wire(token)?;
        reply(self.server.update_file(&token, self.upload(messages)).await)
    }

    async fn update_file_info(
        &self,
        token: &BearerToken,
        doc: Document<File>,
    ) -> Result<(), Status> {
        reply(self.server.update_file_info(&wire(token)?, wire(&doc)?).await)
    }

    async fn download_file(
        &self,
        token: &BearerToken,
        request: DocumentRequest,
    ) -> Result<Vec<FileStreamMessage>, Status> {
        reply(self.server.download_file(&wire(token)?, wire(&request)?).await)
    }

    async fn get_update_stream(
        &self,
        token: &BearerToken,
        request: UpdateRequest,
    ) -> Result<FrameStream, Status> {
        let mut feed = self
            .server
            .get_update_stream(&wire(token)?, wire(&request)?)
            .await
            .map_err(|status| wire(&status).unwrap_or_else(|err| err))?;

        let (tx, rx) = mpsc::channel(self.stream_buffer);
        tokio::spawn(async move {
            while let Some(frame) = feed.next_frame().await {
                let frame = reply(frame);
                let failed = frame.is_err();
                if tx.send(frame).await.is_err() {
                    debug!("update stream abandoned by client");
                    return;
                }
                if failed {
                    return;
                }
            }
        });
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vault_protocol::{Note, UpdateFrame};
    use vault_server::ServerConfig;

    fn transport() -> LoopbackTransport {
        let (server, _store) = VaultServer::in_memory(ServerConfig::default());
        LoopbackTransport::new(Arc::new(server))
    }

    #[tokio::test]
    async fn statuses_cross_the_wire() {
        let transport = transport();
        let status = transport
            .login(LoginRequest::new("nobody", "pw"))
            .await
            .unwrap_err();
        assert_eq!(status.code, Code::Unauthenticated);
    }

    #[tokio::test]
    async fn stream_starts_with_header() {
        let transport = transport();
        let token = transport
            .register(LoginRequest::new("alice", "pw"))
            .await
            .unwrap();
        transport
            .add_document(&token, Update::Note(Document::new("todo", Note::new("milk"))))
            .await
            .unwrap();

        let mut stream = transport
            .get_update_stream(&token, UpdateRequest { min_serial: 0 })
            .await
            .unwrap();
        let header = stream.recv().await.unwrap().unwrap();
        let UpdateFrame::Begin { snapshot_serial } = header else {
            panic!("expected stream header, got {header:?}");
        };
        assert!(snapshot_serial >= 1);

        let Some(Ok(UpdateFrame::Document(Update::Note(note)))) = stream.recv().await else {
            panic!("expected one note");
        };
        assert_eq!(note.payload.text, "milk");
        assert!(stream.recv().await.is_none());
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected() {
        let config = ServerConfig::default().with_max_file_size(1024);
        let (server, store) = VaultServer::in_memory(config);
        let transport = LoopbackTransport::new(Arc::new(server)).with_stream_buffer(1);
        let token = transport
            .register(LoginRequest::new("alice", "pw"))
            .await
            .unwrap();

        let mut payload = File::named("big.bin");
        payload.data = vec![1u8; 4096].into();
        let messages = FileStreamMessage::split(Document::new("big", payload), 256);
        let status = transport.add_file(&token, messages).await.unwrap_err();
        assert_eq!(status.code, Code::BadRequest);
        assert!(store.files.is_empty());
    }

    #[tokio::test]
    async fn dropped_stream_is_abandoned() {
        let transport = transport().with_stream_buffer(1);
        let token = transport
            .register(LoginRequest::new("alice", "pw"))
            .await
            .unwrap();
        for i in 0..8 {
            transport
                .add_document(
                    &token,
                    Update::Note(Document::new(format!("n{i}"), Note::new("x"))),
                )
                .await
                .unwrap();
        }

        let stream = transport
            .get_update_stream(&token, UpdateRequest { min_serial: 0 })
            .await
            .unwrap();
        drop(stream);

        // The server keeps serving writes after the abandoned sync.
        transport
            .add_document(&token, Update::Note(Document::new("after", Note::new("y"))))
            .await
            .unwrap();
    }
}

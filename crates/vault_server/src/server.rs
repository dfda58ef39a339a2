//! RPC facade.
//!
//! [`VaultServer`] is the request surface a transport binds to. Every call
//! except register/login carries a bearer token that passes the [`Gate`]
//! first; the admitted subject becomes the owner of every document the call
//! touches. Failures leave as wire [`Status`] values, with anything that is
//! not a client error logged here and reported as `Internal`.

use crate::accounts::Accounts;
use crate::auth::{Gate, Principal, TokenIssuer};
use crate::config::ServerConfig;
use crate::documents::{Controlled, Documents};
use crate::error::{DocumentError, DocumentResult, ServerError, ServerResult};
use crate::files::{FileStream, FileUpload};
use crate::updates::{UpdateMerger, UpdateStream};
use std::sync::Arc;
use tracing::{debug, error};
use vault_protocol::{
    BearerToken, Card, Credential, Document, DocumentKind, DocumentRequest, File,
    FileStreamMessage, LoginRequest, Note, Payload, Status, Update, UpdateFrame, UpdateRequest,
};
use vault_storage::{MemoryStore, Ports};

/// The vault sync server.
pub struct VaultServer {
    config: ServerConfig,
    accounts: Accounts,
    gate: Gate,
    documents: Documents,
    merger: UpdateMerger,
}

impl VaultServer {
    /// Creates a server over the given storage ports.
    pub fn new(config: ServerConfig, ports: Ports) -> Self {
        let issuer = Arc::new(TokenIssuer::new(&config.token_key, config.token_ttl));
        let documents = Documents::new(&ports, config.serial_batch_size);
        let merger = UpdateMerger::new(&documents, config.stream_buffer);
        Self {
            accounts: Accounts::new(ports.users.clone(), issuer.clone()),
            gate: Gate::new(issuer),
            documents,
            merger,
            config,
        }
    }

    /// Creates a server over a fresh in-memory store and returns both.
    pub fn in_memory(config: ServerConfig) -> (Self, MemoryStore) {
        let store = MemoryStore::new();
        (Self::new(config, store.ports()), store)
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the document controllers.
    pub fn documents(&self) -> &Documents {
        &self.documents
    }

    // Accounts

    /// Creates an account and returns a token for its first session.
    pub async fn register(&self, request: LoginRequest) -> Result<BearerToken, Status> {
        debug!(login = %request.login, "register request");
        let result = self
            .accounts
            .register(&request.login, &request.password)
            .await
            .map_err(ServerError::from);
        reply("register", result)
    }

    /// Opens a session for an existing account.
    pub async fn login(&self, request: LoginRequest) -> Result<BearerToken, Status> {
        debug!(login = %request.login, "login request");
        let result = self
            .accounts
            .login(&request.login, &request.password)
            .await
            .map_err(ServerError::from);
        reply("login", result)
    }

    /// Exchanges a valid token for a successor in the same session.
    pub async fn refresh(&self, token: &BearerToken) -> Result<BearerToken, Status> {
        reply("refresh", self.accounts.refresh(token).map_err(ServerError::from))
    }

    // Documents

    /// Adds a note, credential or card and returns its id.
    ///
    /// Files are added with [`VaultServer::add_file`].
    pub async fn add_document(&self, token: &BearerToken, doc: Update) -> Result<String, Status> {
        let result = async move {
            let principal = self.admit(token)?;
            let id = match doc {
                Update::Note(doc) => self.add(&principal, doc).await?,
                Update::Credential(doc) => self.add(&principal, doc).await?,
                Update::Card(doc) => self.add(&principal, doc).await?,
                Update::File(_) => return Err(file_content_required()),
            };
            Ok::<_, ServerError>(id)
        };
        reply("add", result.await)
    }

    /// Replaces a note, credential or card.
    ///
    /// Files are updated with [`VaultServer::update_file`] or
    /// [`VaultServer::update_file_info`].
    pub async fn update_document(&self, token: &BearerToken, doc: Update) -> Result<(), Status> {
        let result = async move {
            let principal = self.admit(token)?;
            match doc {
                Update::Note(doc) => self.update(&principal, doc).await?,
                Update::Credential(doc) => self.update(&principal, doc).await?,
                Update::Card(doc) => self.update(&principal, doc).await?,
                Update::File(_) => return Err(file_content_required()),
            };
            Ok::<_, ServerError>(())
        };
        reply("update", result.await)
    }

    /// Deletes a document of any kind, leaving a tombstone.
    pub async fn delete_document(&self, token: &BearerToken, doc: Update) -> Result<(), Status> {
        let result = async move {
            let principal = self.admit(token)?;
            match doc {
                Update::Note(doc) => self.delete(&principal, doc).await?,
                Update::Credential(doc) => self.delete(&principal, doc).await?,
                Update::Card(doc) => self.delete(&principal, doc).await?,
                Update::File(doc) => self.delete(&principal, doc).await?,
            };
            Ok::<_, ServerError>(())
        };
        reply("delete", result.await)
    }

    /// Reads one document of the caller. Files are returned without content.
    pub async fn get_document(
        &self,
        token: &BearerToken,
        kind: DocumentKind,
        request: DocumentRequest,
    ) -> Result<Update, Status> {
        let result = async move {
            let principal = self.admit(token)?;
            let id = &request.id;
            let update = match kind {
                DocumentKind::Note => self.get::<Note>(&principal, id).await?,
                DocumentKind::Credential => {
                    self.get::<Credential>(&principal, id).await?
                }
                DocumentKind::Card => self.get::<Card>(&principal, id).await?,
                DocumentKind::File => self.get::<File>(&principal, id).await?,
            };
            Ok::<_, ServerError>(update)
        };
        reply("get", result.await)
    }

    // Files

    /// Uploads a new file and returns its id.
    ///
    /// The token is checked before any message is read; the upload ends when
    /// the sender closes `messages`.
    pub async fn add_file(
        &self,
        token: &BearerToken,
        messages: FileStream,
    ) -> Result<String, Status> {
        let result = async move {
            let principal = self.admit(token)?;
            let doc = self.receive(messages).await?;
            Ok::<_, ServerError>(self.add(&principal, doc).await?)
        };
        reply("add file", result.await)
    }

    /// Uploads new content for an existing file.
    ///
    /// If the content digest matches the stored one only name and metadata
    /// are rewritten.
    pub async fn update_file(
        &self,
        token: &BearerToken,
        messages: FileStream,
    ) -> Result<(), Status> {
        let result = async move {
            let principal = self.admit(token)?;
            let doc = self.receive(messages).await?;
            self.update(&principal, doc).await?;
            Ok::<_, ServerError>(())
        };
        reply("update file", result.await)
    }

    /// Rewrites name and metadata of a file without touching its content.
    pub async fn update_file_info(
        &self,
        token: &BearerToken,
        mut doc: Document<File>,
    ) -> Result<(), Status> {
        let result = async move {
            let principal = self.admit(token)?;
            doc.owner_id = principal.subject;
            self.documents.files.update_info(doc).await?;
            Ok::<_, ServerError>(())
        };
        reply("update file info", result.await)
    }

    /// Streams a stored file: info first, then content chunks.
    pub async fn download_file(
        &self,
        token: &BearerToken,
        request: DocumentRequest,
    ) -> Result<Vec<FileStreamMessage>, Status> {
        let result = async move {
            let principal = self.admit(token)?;
            let doc = self
                .documents
                .files
                .get(&request.id, &principal.subject)
                .await?;
            if doc.state.is_deleted() {
                return Err(DocumentError::Deleted.into());
            }
            Ok::<_, ServerError>(FileStreamMessage::split(doc, self.config.chunk_size))
        };
        reply("download file", result.await)
    }

    // Update feed

    /// Opens the update feed above the caller's watermark.
    pub async fn get_update_stream(
        &self,
        token: &BearerToken,
        request: UpdateRequest,
    ) -> Result<UpdateFeed, Status> {
        let result = async move {
            let principal = self.admit(token)?;
            let stream = self
                .merger
                .get_updates(&principal.subject, request.min_serial)
                .await?;
            Ok::<_, ServerError>(UpdateFeed {
                begun: false,
                stream,
            })
        };
        reply("update stream", result.await)
    }

    fn admit(&self, token: &BearerToken) -> ServerResult<Principal> {
        Ok(self.gate.admit(token)?)
    }

    async fn receive(&self, messages: FileStream) -> DocumentResult<Document<File>> {
        FileUpload::receive(messages, self.config.chunk_size, self.config.max_file_size).await
    }

    async fn add<P: Controlled>(
        &self,
        principal: &Principal,
        mut doc: Document<P>,
    ) -> DocumentResult<String> {
        doc.owner_id.clone_from(&principal.subject);
        P::controller(&self.documents).add(doc).await
    }

    async fn update<P: Controlled>(
        &self,
        principal: &Principal,
        mut doc: Document<P>,
    ) -> DocumentResult<u64> {
        doc.owner_id.clone_from(&principal.subject);
        P::controller(&self.documents).update(doc).await
    }

    async fn delete<P: Controlled>(
        &self,
        principal: &Principal,
        mut doc: Document<P>,
    ) -> DocumentResult<u64> {
        doc.owner_id.clone_from(&principal.subject);
        P::controller(&self.documents).delete(doc).await
    }

    async fn get<P: Controlled>(&self, principal: &Principal, id: &str) -> DocumentResult<Update> {
        let mut doc = P::controller(&self.documents)
            .get(id, &principal.subject)
            .await?;
        doc.payload = doc.payload.feed_view();
        Ok(P::into_update(doc))
    }
}

impl std::fmt::Debug for VaultServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultServer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn file_content_required() -> ServerError {
    DocumentError::bad_request("file content must be uploaded").into()
}

fn reply<T>(op: &'static str, result: ServerResult<T>) -> Result<T, Status> {
    result.map_err(|err| {
        if !err.is_client_error() {
            error!(op, error = %err, "request failed");
        }
        err.to_status()
    })
}

/// Server side of one update stream, framed for the wire.
///
/// Yields [`UpdateFrame::Begin`] first, then the documents.
#[derive(Debug)]
pub struct UpdateFeed {
    begun: bool,
    stream: UpdateStream,
}

impl UpdateFeed {
    /// Returns the snapshot serial announced by the first frame.
    pub fn snapshot_serial(&self) -> u64 {
        self.stream.snapshot_serial()
    }

    /// Returns the next frame, a failure status once, or `None` at the end.
    pub async fn next_frame(&mut self) -> Option<Result<UpdateFrame, Status>> {
        if !self.begun {
            self.begun = true;
            return Some(Ok(UpdateFrame::Begin {
                snapshot_serial: self.stream.snapshot_serial(),
            }));
        }
        match self.stream.recv().await? {
            Ok(update) => Some(Ok(UpdateFrame::Document(update))),
            Err(err) => Some(reply("update stream", Err(err.into()))),
        }
    }

    /// Drains the feed into frames.
    ///
    /// # Errors
    ///
    /// Returns the failure status; frames received before it are dropped.
    pub async fn collect(mut self) -> Result<Vec<UpdateFrame>, Status> {
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame().await {
            frames.push(frame?);
        }
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use vault_protocol::{Code, FileChunk};

    fn server() -> VaultServer {
        let config = ServerConfig::new()
            .with_token_key(b"server-test-key".to_vec())
            .with_chunk_size(4);
        VaultServer::in_memory(config).0
    }

    async fn session(server: &VaultServer, login: &str) -> BearerToken {
        server
            .register(LoginRequest::new(login, "password"))
            .await
            .unwrap()
    }

    fn note(text: &str) -> Update {
        Update::Note(Document::new("todo", Note::new(text)))
    }

    #[tokio::test]
    async fn calls_without_session_are_rejected() {
        let server = server();
        let err = server
            .add_document(&BearerToken::default(), note("x"))
            .await
            .unwrap_err();
        assert_eq!(err.code, Code::Unauthenticated);

        let err = server
            .get_update_stream(&BearerToken::new(vec![9; 64]), UpdateRequest { min_serial: 0 })
            .await
            .unwrap_err();
        assert_eq!(err.code, Code::Unauthenticated);
    }

    #[tokio::test]
    async fn owner_comes_from_the_session() {
        let (server, store) = VaultServer::in_memory(
            ServerConfig::new().with_token_key(b"server-test-key".to_vec()),
        );
        let token = session(&server, "alice").await;

        let mut doc = Document::new("todo", Note::new("x"));
        doc.owner_id = "someone-else".into();
        let id = server
            .add_document(&token, Update::Note(doc))
            .await
            .unwrap();

        let stored = store.notes.peek(&id).unwrap();
        assert_ne!(stored.owner_id, "someone-else");
        assert!(!stored.owner_id.is_empty());
    }

    #[tokio::test]
    async fn users_are_isolated() {
        let server = server();
        let alice = session(&server, "alice").await;
        let bob = session(&server, "bob").await;

        let id = server.add_document(&alice, note("secret")).await.unwrap();
        let err = server
            .get_document(&bob, DocumentKind::Note, DocumentRequest { id: id.clone() })
            .await
            .unwrap_err();
        assert_eq!(err.code, Code::NotFound);

        let frames = server
            .get_update_stream(&bob, UpdateRequest { min_serial: 0 })
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(frames.len(), 1);
    }

    #[tokio::test]
    async fn conflict_codes_reach_the_client() {
        let server = server();
        let token = session(&server, "alice").await;
        let id = server
            .add_document(&token, Update::Credential(Document::new("bank", Credential::new("a", "b"))))
            .await
            .unwrap();

        let stale = Document::new("bank", Credential::new("a", "c")).with_id(&id);
        server
            .update_document(&token, Update::Credential(stale.clone().with_serial(1)))
            .await
            .unwrap();
        let err = server
            .update_document(&token, Update::Credential(stale.clone()))
            .await
            .unwrap_err();
        assert_eq!(err.code, Code::Changed);

        let current = server
            .get_document(&token, DocumentKind::Credential, DocumentRequest { id: id.clone() })
            .await
            .unwrap();
        server
            .delete_document(&token, Update::Credential(stale.clone().with_serial(current.serial())))
            .await
            .unwrap();
        let err = server
            .delete_document(&token, Update::Credential(stale.with_serial(u64::MAX)))
            .await
            .unwrap_err();
        assert_eq!(err.code, Code::Deleted);
    }

    #[tokio::test]
    async fn update_stream_starts_with_snapshot() {
        let server = server();
        let token = session(&server, "alice").await;
        server.add_document(&token, note("a")).await.unwrap();
        server.add_document(&token, note("b")).await.unwrap();

        let feed = server
            .get_update_stream(&token, UpdateRequest { min_serial: 0 })
            .await
            .unwrap();
        let snapshot = feed.snapshot_serial();
        let frames = feed.collect().await.unwrap();

        assert_eq!(frames[0], UpdateFrame::Begin { snapshot_serial: snapshot });
        assert_eq!(frames.len(), 3);
        for frame in &frames[1..] {
            match frame {
                UpdateFrame::Document(update) => assert!(update.serial() < snapshot),
                other => panic!("unexpected frame {other:?}"),
            }
        }
    }

    fn stream(messages: Vec<FileStreamMessage>) -> FileStream {
        let (tx, rx) = tokio::sync::mpsc::channel(messages.len().max(1));
        for message in messages {
            tx.try_send(message).unwrap();
        }
        rx
    }

    fn upload(name: &str, content: &'static [u8]) -> FileStream {
        stream(split(name, content))
    }

    fn split(name: &str, content: &'static [u8]) -> Vec<FileStreamMessage> {
        let mut payload = File::named(name);
        payload.data = Bytes::from_static(content);
        FileStreamMessage::split(Document::new(name, payload), 4)
    }

    #[tokio::test]
    async fn file_round_trip() {
        let server = server();
        let token = session(&server, "alice").await;

        let id = server
            .add_file(&token, upload("notes.txt", b"hello vault"))
            .await
            .unwrap();

        let messages = server
            .download_file(&token, DocumentRequest { id: id.clone() })
            .await
            .unwrap();
        let doc = FileUpload::assemble(messages, 4, 1024).unwrap();
        assert_eq!(doc.payload.data.as_ref(), b"hello vault");
        assert_eq!(doc.payload.size, 11);

        let info = server
            .get_document(&token, DocumentKind::File, DocumentRequest { id })
            .await
            .unwrap();
        match info {
            Update::File(doc) => {
                assert!(doc.payload.data.is_empty());
                assert_eq!(doc.payload.size, 11);
            }
            other => panic!("unexpected update {other:?}"),
        }
    }

    #[tokio::test]
    async fn file_upload_errors_are_bad_requests() {
        let server = server();
        let token = session(&server, "alice").await;

        let chunk_first = vec![FileStreamMessage::Chunk(FileChunk {
            data: Bytes::from_static(b"x"),
            eof: true,
        })];
        let err = server.add_file(&token, stream(chunk_first)).await.unwrap_err();
        assert_eq!(err.code, Code::BadRequest);

        let mut truncated = split("a.txt", b"0123456789");
        truncated.pop();
        let err = server.add_file(&token, stream(truncated)).await.unwrap_err();
        assert_eq!(err.code, Code::BadRequest);
        assert_eq!(err.message, "incomplete file data");

        let err = server
            .add_document(&token, Update::File(Document::new("a", File::named("a.txt"))))
            .await
            .unwrap_err();
        assert_eq!(err.code, Code::BadRequest);
    }

    #[tokio::test]
    async fn oversized_upload_fails_while_streaming() {
        let (server, store) = VaultServer::in_memory(
            ServerConfig::new()
                .with_token_key(b"server-test-key".to_vec())
                .with_chunk_size(4)
                .with_max_file_size(8),
        );
        let token = session(&server, "alice").await;

        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let sender = tokio::spawn(async move {
            let info = Document::new("big", File::named("big.bin"));
            if tx.send(FileStreamMessage::Info(info)).await.is_err() {
                return 0;
            }
            let mut sent = 0usize;
            while tx
                .send(FileStreamMessage::Chunk(FileChunk {
                    data: Bytes::from_static(b"abcd"),
                    eof: false,
                }))
                .await
                .is_ok()
            {
                sent += 1;
            }
            sent
        });

        let err = server.add_file(&token, rx).await.unwrap_err();
        assert_eq!(err.code, Code::BadRequest);
        assert_eq!(err.message, "file exceeds 8 bytes");
        assert!(sender.await.unwrap() <= 4);
        assert!(store.files.is_empty());

        let mut payload = File::named("smuggled.bin");
        payload.data = Bytes::from(vec![0u8; 64]);
        let smuggled = vec![
            FileStreamMessage::Info(Document::new("smuggled", payload)),
            FileStreamMessage::Chunk(FileChunk {
                data: Bytes::new(),
                eof: true,
            }),
        ];
        let err = server.add_file(&token, stream(smuggled)).await.unwrap_err();
        assert_eq!(err.code, Code::BadRequest);
        assert_eq!(err.message, "file content must be sent in chunks");
    }

    #[tokio::test]
    async fn file_info_update_keeps_content() {
        let (server, store) = VaultServer::in_memory(
            ServerConfig::new().with_token_key(b"server-test-key".to_vec()),
        );
        let token = session(&server, "alice").await;
        let id = server
            .add_file(&token, upload("a.txt", b"content"))
            .await
            .unwrap();

        let info = Document::new("renamed", File::named("a.txt"))
            .with_id(&id)
            .with_serial(store.files.peek(&id).unwrap().serial);
        server.update_file_info(&token, info).await.unwrap();

        let stored = store.files.peek(&id).unwrap();
        assert_eq!(stored.name, "renamed");
        assert_eq!(stored.payload.data.as_ref(), b"content");
    }

    #[tokio::test]
    async fn login_codes() {
        let server = server();
        session(&server, "alice").await;

        let err = server
            .register(LoginRequest::new("alice", "x"))
            .await
            .unwrap_err();
        assert_eq!(err.code, Code::AlreadyExists);

        let err = server
            .login(LoginRequest::new("alice", "wrong"))
            .await
            .unwrap_err();
        assert_eq!(err.code, Code::Unauthenticated);

        let err = server
            .register(LoginRequest::new("", "x"))
            .await
            .unwrap_err();
        assert_eq!(err.code, Code::BadRequest);

        let token = server
            .login(LoginRequest::new("alice", "password"))
            .await
            .unwrap();
        assert!(server.refresh(&token).await.is_ok());
    }
}

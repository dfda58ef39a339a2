//! The client facade.

use crate::cache::LocalCache;
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::reconciler::Reconciler;
use crate::session::{Session, SessionState};
use crate::transport::VaultTransport;
use bytes::BytesMut;
use std::sync::Arc;
use tracing::{debug, info, warn};
use vault_protocol::{
    BearerToken, Code, Document, DocumentRequest, File, FileStreamMessage, LoginRequest, Payload,
    Status, CHUNK_SIZE,
};

/// A vault client: session, local cache and document operations.
///
/// Every call that receives `Unauthenticated` clears the local cache, ends
/// the session and returns [`ClientError::MustReLogin`].
pub struct VaultClient {
    transport: Arc<dyn VaultTransport>,
    reconciler: Reconciler,
}

impl VaultClient {
    /// Creates a logged out client.
    pub fn new(transport: Arc<dyn VaultTransport>, config: ClientConfig) -> Self {
        let session = Session::new(Arc::clone(&transport), config);
        let reconciler = Reconciler::new(
            Arc::clone(&transport),
            session,
            Arc::new(LocalCache::new()),
        );
        Self {
            transport,
            reconciler,
        }
    }

    // Session

    /// Creates an account and logs in to it.
    ///
    /// # Errors
    ///
    /// The server status, e.g. `AlreadyExists` for a taken login.
    pub async fn register(&self, login: &str, password: &str) -> ClientResult<()> {
        let token = self
            .transport
            .register(LoginRequest::new(login, password))
            .await?;
        self.start(token);
        info!(login, "registered");
        Ok(())
    }

    /// Logs in, replacing any current session and its cache.
    ///
    /// # Errors
    ///
    /// The server status; `Unauthenticated` for wrong credentials.
    pub async fn login(&self, login: &str, password: &str) -> ClientResult<()> {
        let token = self
            .transport
            .login(LoginRequest::new(login, password))
            .await?;
        self.start(token);
        info!(login, "logged in");
        Ok(())
    }

    /// Ends the session and clears the cache.
    pub fn logout(&self) {
        self.session().logout();
        self.cache().clear();
        info!("logged out");
    }

    /// Returns the session.
    pub fn session(&self) -> &Session {
        self.reconciler.session()
    }

    /// Returns the session state.
    pub fn state(&self) -> SessionState {
        self.session().state()
    }

    fn start(&self, token: BearerToken) {
        self.cache().clear();
        self.session().install(token);
    }

    // Cache

    /// Returns the local cache.
    pub fn cache(&self) -> &LocalCache {
        self.reconciler.cache()
    }

    /// Pulls changes above the watermark into the cache.
    ///
    /// # Errors
    ///
    /// See [`Reconciler::update`].
    pub async fn update(&self) -> ClientResult<u64> {
        self.reconciler.update().await
    }

    /// Returns a cached document.
    pub fn get<P: Payload>(&self, id: &str) -> Option<Document<P>> {
        self.cache().document(id)
    }

    /// Returns all cached documents of a kind.
    pub fn list<P: Payload>(&self) -> Vec<Document<P>> {
        self.cache().documents()
    }

    // Documents

    /// Adds a document and returns its id.
    ///
    /// # Errors
    ///
    /// `BadRequest` for missing fields or for files, which go through
    /// [`VaultClient::upload_file`].
    pub async fn add<P: Payload>(&self, doc: Document<P>) -> ClientResult<String> {
        let token = self.token()?;
        let id = self.checked(self.transport.add_document(&token, P::into_update(doc)).await)?;
        debug!(kind = %P::KIND.as_str(), document_id = %id, "document added");
        Ok(id)
    }

    /// Saves a modified document.
    ///
    /// `doc.serial` must be the serial last seen for it.
    ///
    /// # Errors
    ///
    /// `Changed` if someone else saved it since, `Deleted` if it was deleted.
    pub async fn save<P: Payload>(&self, doc: Document<P>) -> ClientResult<()> {
        let token = self.token()?;
        let id = doc.id.clone();
        self.checked(
            self.transport
                .update_document(&token, P::into_update(doc))
                .await,
        )?;
        debug!(kind = %P::KIND.as_str(), document_id = %id, "document saved");
        Ok(())
    }

    /// Deletes a document of any kind.
    ///
    /// # Errors
    ///
    /// Same fencing as [`VaultClient::save`].
    pub async fn delete<P: Payload>(&self, doc: &Document<P>) -> ClientResult<()> {
        let token = self.token()?;
        let request = Document::new(doc.name.clone(), P::default())
            .with_id(doc.id.clone())
            .with_serial(doc.serial);
        self.checked(
            self.transport
                .delete_document(&token, P::into_update(request))
                .await,
        )?;
        debug!(kind = %P::KIND.as_str(), document_id = %doc.id, "document deleted");
        Ok(())
    }

    /// Reads a document straight from the server, bypassing the cache.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown ids.
    pub async fn fetch<P: Payload>(&self, id: &str) -> ClientResult<Document<P>> {
        let token = self.token()?;
        let request = DocumentRequest { id: id.to_owned() };
        let update = self.checked(self.transport.get_document(&token, P::KIND, request).await)?;
        P::from_update(update).ok_or_else(|| ClientError::protocol("document of another kind"))
    }

    // Files

    /// Uploads a new file and returns its id.
    ///
    /// # Errors
    ///
    /// `BadRequest` for an empty name or oversized content.
    pub async fn upload_file(&self, doc: Document<File>) -> ClientResult<String> {
        let token = self.token()?;
        let messages = FileStreamMessage::split(doc, CHUNK_SIZE);
        let id = self.checked(self.transport.add_file(&token, messages).await)?;
        debug!(document_id = %id, "file uploaded");
        Ok(id)
    }

    /// Uploads new content for an existing file.
    ///
    /// # Errors
    ///
    /// Same fencing as [`VaultClient::save`].
    pub async fn replace_file(&self, doc: Document<File>) -> ClientResult<()> {
        let token = self.token()?;
        let messages = FileStreamMessage::split(doc, CHUNK_SIZE);
        self.checked(self.transport.update_file(&token, messages).await)
    }

    /// Renames a file or rewrites its metadata without re-uploading it.
    ///
    /// # Errors
    ///
    /// Same fencing as [`VaultClient::save`].
    pub async fn save_file_info(&self, mut doc: Document<File>) -> ClientResult<()> {
        let token = self.token()?;
        doc.payload = doc.payload.info();
        self.checked(self.transport.update_file_info(&token, doc).await)
    }

    /// Downloads a file with its content.
    ///
    /// # Errors
    ///
    /// `Deleted` for a deleted file, `Protocol` for a malformed transfer.
    pub async fn download_file(&self, id: &str) -> ClientResult<Document<File>> {
        let token = self.token()?;
        let request = DocumentRequest { id: id.to_owned() };
        let messages = self.checked(self.transport.download_file(&token, request).await)?;
        reassemble(messages)
    }

    fn token(&self) -> ClientResult<BearerToken> {
        self.session()
            .token()
            .ok_or_else(|| self.reconciler.session_lost())
    }

    fn checked<T>(&self, result: Result<T, Status>) -> ClientResult<T> {
        result.map_err(|status| {
            if status.code == Code::Unauthenticated {
                warn!(error = %status, "request rejected, session lost");
                self.reconciler.session_lost()
            } else {
                ClientError::Status(status)
            }
        })
    }
}

impl std::fmt::Debug for VaultClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultClient")
            .field("reconciler", &self.reconciler)
            .finish_non_exhaustive()
    }
}

fn reassemble(messages: Vec<FileStreamMessage>) -> ClientResult<Document<File>> {
    let mut messages = messages.into_iter();
    let Some(FileStreamMessage::Info(mut doc)) = messages.next() else {
        return Err(ClientError::protocol("file info must come first"));
    };

    let mut data = BytesMut::new();
    let mut complete = false;
    for message in messages {
        match message {
            FileStreamMessage::Chunk(chunk) if !complete => {
                data.extend_from_slice(&chunk.data);
                complete = chunk.eof;
            }
            _ => return Err(ClientError::protocol("unexpected file message")),
        }
    }
    if !complete {
        return Err(ClientError::protocol("incomplete file data"));
    }
    if data.len() as u64 != doc.payload.size {
        return Err(ClientError::protocol("file size mismatch"));
    }
    doc.payload.data = data.freeze();
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use std::time::Duration;
    use vault_protocol::{FileChunk, Note};

    #[tokio::test]
    async fn calls_without_session_must_relogin() {
        let client = VaultClient::new(Arc::new(MockTransport::new()), ClientConfig::default());
        let err = client
            .add(Document::new("n", Note::new("text")))
            .await
            .unwrap_err();
        assert_eq!(err, ClientError::MustReLogin);
    }

    #[tokio::test]
    async fn other_failures_keep_the_session() {
        let client = VaultClient::new(Arc::new(MockTransport::new()), ClientConfig::default());
        client
            .session()
            .install(MockTransport::token(Duration::from_secs(3600)));

        let err = client.fetch::<Note>("x").await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(client.state(), SessionState::Active);
    }

    fn file(data: &'static [u8]) -> Document<File> {
        let mut payload = File::named("a.txt");
        payload.size = data.len() as u64;
        payload.data = data.into();
        Document::new("a", payload)
    }

    #[test]
    fn reassembles_split_files() {
        let original = file(b"hello world");
        let messages = FileStreamMessage::split(original.clone(), 4);
        assert_eq!(reassemble(messages).unwrap(), original);
    }

    #[test]
    fn rejects_malformed_transfers() {
        let chunk = |data: &'static [u8], eof| {
            FileStreamMessage::Chunk(FileChunk {
                data: data.into(),
                eof,
            })
        };
        let mut info = file(b"abc");
        info.payload.data = Default::default();

        assert!(reassemble(vec![chunk(b"abc", true)]).is_err());
        assert!(reassemble(vec![FileStreamMessage::Info(info.clone()), chunk(b"abc", false)]).is_err());
        assert!(reassemble(vec![FileStreamMessage::Info(info.clone()), chunk(b"ab", true)]).is_err());
        assert!(reassemble(vec![
            FileStreamMessage::Info(info.clone()),
            chunk(b"abc", true),
            chunk(b"", true)
        ])
        .is_err());
        assert!(reassemble(vec![FileStreamMessage::Info(info), chunk(b"abc", true)]).is_ok());
    }
}

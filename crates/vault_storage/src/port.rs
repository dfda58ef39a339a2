//! Storage port consumed by the server.

use crate::error::StorageResult;
use crate::user::UserRecord;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use vault_protocol::{Card, Credential, Document, File, Note, Payload, Update};

/// Channel end a streaming read delivers documents into.
pub type UpdateSink = mpsc::Sender<Update>;

/// Storage for one document kind.
///
/// Every lookup is owner-scoped: a document owned by another user behaves
/// exactly like a missing one.
///
/// # Invariants
///
/// - `add` assigns and returns a fresh, non-empty id
/// - `modify` replaces the whole stored record
/// - `modify_info` rewrites only the envelope (serial, state, name, metadata)
/// - `scan` delivers every record of the owner with
///   `min_serial < serial <= max_serial`, as [`Payload::feed_view`]
#[async_trait]
pub trait DocumentStore<P: Payload>: Send + Sync {
    /// Persists a new document and returns its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the write.
    async fn add(&self, doc: Document<P>) -> StorageResult<String>;

    /// Reads a document by id and owner.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`](crate::StorageError::NotFound) if
    /// no such document exists for this owner.
    async fn get(&self, id: &str, owner_id: &str) -> StorageResult<Document<P>>;

    /// Reads a document without its bulk content.
    ///
    /// Defaults to [`DocumentStore::get`].
    ///
    /// # Errors
    ///
    /// Same as [`DocumentStore::get`].
    async fn get_info(&self, id: &str, owner_id: &str) -> StorageResult<Document<P>> {
        self.get(id, owner_id).await
    }

    /// Replaces a stored document.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the id/owner pair does not exist.
    async fn modify(&self, doc: Document<P>) -> StorageResult<()>;

    /// Rewrites the envelope of a stored document, keeping its payload.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the id/owner pair does not exist.
    async fn modify_info(&self, doc: Document<P>) -> StorageResult<()>;

    /// Streams the owner's documents in the half-open serial range
    /// `(min_serial, max_serial]` into `sink`.
    ///
    /// # Errors
    ///
    /// Returns `Closed` if the sink's receiver is dropped, or a backend error.
    async fn scan(
        &self,
        owner_id: &str,
        min_serial: u64,
        max_serial: u64,
        sink: &UpdateSink,
    ) -> StorageResult<()>;
}

/// Backing counter for the serial allocator.
#[async_trait]
pub trait SerialSource: Send + Sync {
    /// Reserves `n` serials and returns the base `b`; the caller owns
    /// `b + 1 ..= b + n`.
    ///
    /// # Errors
    ///
    /// Returns an error if the counter cannot be advanced. Nothing is
    /// reserved in that case.
    async fn get_batch(&self, n: u64) -> StorageResult<u64>;
}

/// Storage for user accounts.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Persists a new user and returns it with its id set.
    ///
    /// # Errors
    ///
    /// Returns `Duplicate` if the login is taken.
    async fn add_user(&self, user: UserRecord) -> StorageResult<UserRecord>;

    /// Looks a user up by login.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown logins.
    async fn get_user_by_login(&self, login: &str) -> StorageResult<UserRecord>;
}

/// The full set of storage handles the server needs.
///
/// Fields are public so tests and embedders can swap a single port.
#[derive(Clone)]
pub struct Ports {
    /// Note storage.
    pub notes: Arc<dyn DocumentStore<Note>>,
    /// Credential storage.
    pub credentials: Arc<dyn DocumentStore<Credential>>,
    /// Card storage.
    pub cards: Arc<dyn DocumentStore<Card>>,
    /// File storage.
    pub files: Arc<dyn DocumentStore<File>>,
    /// Serial counter.
    pub serials: Arc<dyn SerialSource>,
    /// User accounts.
    pub users: Arc<dyn UserStore>,
}

//! In-memory storage backend.

use crate::error::{StorageError, StorageResult};
use crate::port::{DocumentStore, Ports, SerialSource, UpdateSink, UserStore};
use crate::user::UserRecord;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;
use vault_protocol::{Card, Credential, Document, File, Note, Payload};

/// In-memory storage for one document kind.
///
/// # Thread Safety
///
/// The collection is guarded by a single `RwLock` held only for the duration
/// of one map operation; `scan` copies matching records out before sending so
/// no lock is held across an `await`.
#[derive(Debug)]
pub struct MemoryCollection<P> {
    records: RwLock<HashMap<String, Document<P>>>,
}

impl<P: Payload> MemoryCollection<P> {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the number of stored records, tombstones included.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if nothing was ever stored.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Returns a copy of a record regardless of owner.
    ///
    /// Useful for assertions in tests.
    pub fn peek(&self, id: &str) -> Option<Document<P>> {
        self.records.read().get(id).cloned()
    }
}

impl<P: Payload> Default for MemoryCollection<P> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<P: Payload> DocumentStore<P> for MemoryCollection<P> {
    async fn add(&self, mut doc: Document<P>) -> StorageResult<String> {
        let id = Uuid::new_v4().simple().to_string();
        doc.id = id.clone();
        self.records.write().insert(id.clone(), doc);
        Ok(id)
    }

    async fn get(&self, id: &str, owner_id: &str) -> StorageResult<Document<P>> {
        self.records
            .read()
            .get(id)
            .filter(|doc| doc.owner_id == owner_id)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn get_info(&self, id: &str, owner_id: &str) -> StorageResult<Document<P>> {
        let mut doc = self.get(id, owner_id).await?;
        doc.payload = doc.payload.feed_view();
        Ok(doc)
    }

    async fn modify(&self, doc: Document<P>) -> StorageResult<()> {
        let mut records = self.records.write();
        match records.get_mut(&doc.id) {
            Some(stored) if stored.owner_id == doc.owner_id => {
                *stored = doc;
                Ok(())
            }
            _ => Err(StorageError::NotFound),
        }
    }

    async fn modify_info(&self, doc: Document<P>) -> StorageResult<()> {
        let mut records = self.records.write();
        match records.get_mut(&doc.id) {
            Some(stored) if stored.owner_id == doc.owner_id => {
                stored.serial = doc.serial;
                stored.state = doc.state;
                stored.name = doc.name;
                stored.metadata = doc.metadata;
                Ok(())
            }
            _ => Err(StorageError::NotFound),
        }
    }

    async fn scan(
        &self,
        owner_id: &str,
        min_serial: u64,
        max_serial: u64,
        sink: &UpdateSink,
    ) -> StorageResult<()> {
        let mut matching: Vec<Document<P>> = self
            .records
            .read()
            .values()
            .filter(|doc| {
                doc.owner_id == owner_id && doc.serial > min_serial && doc.serial <= max_serial
            })
            .map(|doc| Document {
                payload: doc.payload.feed_view(),
                ..doc.clone()
            })
            .collect();
        matching.sort_by_key(|doc| doc.serial);

        for doc in matching {
            sink.send(P::into_update(doc))
                .await
                .map_err(|_| StorageError::Closed)?;
        }
        Ok(())
    }
}

/// In-memory serial counter.
///
/// Starts at 0 unless constructed with [`MemoryCounter::starting_at`].
#[derive(Debug, Default)]
pub struct MemoryCounter {
    next: Mutex<u64>,
    batches: Mutex<u64>,
}

impl MemoryCounter {
    /// Creates a counter starting at 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a counter with an existing position, as after a restart.
    #[must_use]
    pub fn starting_at(next: u64) -> Self {
        Self {
            next: Mutex::new(next),
            batches: Mutex::new(0),
        }
    }

    /// Returns how many batches were handed out.
    pub fn batches(&self) -> u64 {
        *self.batches.lock()
    }

    /// Returns the current counter position.
    pub fn position(&self) -> u64 {
        *self.next.lock()
    }
}

#[async_trait]
impl SerialSource for MemoryCounter {
    async fn get_batch(&self, n: u64) -> StorageResult<u64> {
        let mut next = self.next.lock();
        let base = *next;
        *next = base
            .checked_add(n)
            .ok_or_else(|| StorageError::Backend("serial counter overflow".into()))?;
        *self.batches.lock() += 1;
        Ok(base)
    }
}

/// In-memory user accounts, unique by login.
#[derive(Debug, Default)]
pub struct MemoryUsers {
    by_login: RwLock<HashMap<String, UserRecord>>,
}

impl MemoryUsers {
    /// Creates an empty account table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUsers {
    async fn add_user(&self, mut user: UserRecord) -> StorageResult<UserRecord> {
        let mut by_login = self.by_login.write();
        if by_login.contains_key(&user.login) {
            return Err(StorageError::Duplicate(user.login.clone()));
        }
        user.id = Uuid::new_v4().simple().to_string();
        by_login.insert(user.login.clone(), user.clone());
        Ok(user)
    }

    async fn get_user_by_login(&self, login: &str) -> StorageResult<UserRecord> {
        self.by_login
            .read()
            .get(login)
            .cloned()
            .ok_or(StorageError::NotFound)
    }
}

/// In-memory implementation of every storage port.
///
/// # Example
///
/// ```rust
/// use vault_storage::MemoryStore;
///
/// let store = MemoryStore::new();
/// let ports = store.ports();
/// assert_eq!(store.notes.len(), 0);
/// # drop(ports);
/// ```
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    /// Notes.
    pub notes: Arc<MemoryCollection<Note>>,
    /// Credentials.
    pub credentials: Arc<MemoryCollection<Credential>>,
    /// Cards.
    pub cards: Arc<MemoryCollection<Card>>,
    /// Files.
    pub files: Arc<MemoryCollection<File>>,
    /// Serial counter.
    pub serials: Arc<MemoryCounter>,
    /// User accounts.
    pub users: Arc<MemoryUsers>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns port handles sharing this store's state.
    pub fn ports(&self) -> Ports {
        Ports {
            notes: self.notes.clone(),
            credentials: self.credentials.clone(),
            cards: self.cards.clone(),
            files: self.files.clone(),
            serials: self.serials.clone(),
            users: self.users.clone(),
        }
    }
}

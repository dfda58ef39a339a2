//! Optimistic-concurrency document controller.
//!
//! One [`DocumentController`] exists per document kind. All of them share the
//! same serial allocator and write queue, so serials are globally ordered and
//! an owner's mutations never interleave across kinds.
//!
//! ## Fencing
//!
//! Update and delete read the stored document under the owner's reservation
//! and reject the call when:
//! - the document does not exist for this owner (`NotFound`)
//! - the stored document is a tombstone (`Deleted`)
//! - the stored serial is greater than the submitted one (`Changed`)
//!
//! Only then is a new serial drawn and the write performed.

use crate::error::{DocumentError, DocumentResult};
use crate::queue::WriteQueue;
use crate::serial::SerialAllocator;
use std::sync::Arc;
use tracing::{debug, info, warn};
use vault_protocol::{Card, Credential, Document, DocumentState, File, Note, Payload};
use vault_storage::{DocumentStore, Ports};

/// Create/update/delete for one document kind.
pub struct DocumentController<P: Payload> {
    store: Arc<dyn DocumentStore<P>>,
    serials: Arc<SerialAllocator>,
    queue: WriteQueue,
}

impl<P: Payload> DocumentController<P> {
    /// Creates a controller over one storage port.
    pub fn new(
        store: Arc<dyn DocumentStore<P>>,
        serials: Arc<SerialAllocator>,
        queue: WriteQueue,
    ) -> Self {
        Self {
            store,
            serials,
            queue,
        }
    }

    /// Persists a new document and returns its id.
    ///
    /// Client-supplied id, serial and state are ignored.
    ///
    /// # Errors
    ///
    /// `BadRequest` for missing required fields; allocator and storage
    /// failures otherwise. A serial consumed before a failed write is not
    /// reused.
    pub async fn add(&self, mut doc: Document<P>) -> DocumentResult<String> {
        debug!(kind = %P::KIND, owner = %doc.owner_id, "add request");
        doc.validate().map_err(DocumentError::bad_request)?;

        let _reservation = self.queue.reserve(&doc.owner_id).await;
        doc.id.clear();
        doc.serial = self.serials.next().await?;
        doc.state = DocumentState::Active;

        let serial = doc.serial;
        let owner = doc.owner_id.clone();
        match self.store.add(doc).await {
            Ok(id) => {
                info!(kind = %P::KIND, %owner, document_id = %id, serial, "document added");
                Ok(id)
            }
            Err(err) => {
                warn!(kind = %P::KIND, %owner, error = %err, "add failed");
                Err(err.into())
            }
        }
    }

    /// Replaces a stored document and returns its new serial.
    ///
    /// # Errors
    ///
    /// `BadRequest`, `NotFound`, `Deleted` or `Changed` as described in the
    /// module docs, or an allocator/storage failure.
    pub async fn update(&self, mut doc: Document<P>) -> DocumentResult<u64> {
        debug!(kind = %P::KIND, owner = %doc.owner_id, document_id = %doc.id, "update request");
        require_id(&doc)?;
        doc.validate().map_err(DocumentError::bad_request)?;

        let _reservation = self.queue.reserve(&doc.owner_id).await;
        let stored = self.fence(&doc).await?;

        doc.serial = self.serials.next().await?;
        doc.state = DocumentState::Active;
        let serial = doc.serial;
        let id = doc.id.clone();

        let result = if P::same_body(&stored.payload, &doc.payload) {
            self.store.modify_info(doc).await
        } else {
            self.store.modify(doc).await
        };
        self.finish(result, "updated", &id, serial)
    }

    /// Rewrites only name and metadata of a stored document and returns its
    /// new serial.
    ///
    /// # Errors
    ///
    /// Same as [`DocumentController::update`].
    pub async fn update_info(&self, mut doc: Document<P>) -> DocumentResult<u64> {
        debug!(kind = %P::KIND, owner = %doc.owner_id, document_id = %doc.id, "update info request");
        require_id(&doc)?;
        if doc.name.is_empty() {
            return Err(DocumentError::bad_request("name is empty"));
        }

        let _reservation = self.queue.reserve(&doc.owner_id).await;
        self.fence(&doc).await?;

        doc.serial = self.serials.next().await?;
        doc.state = DocumentState::Active;
        let serial = doc.serial;
        let id = doc.id.clone();
        let result = self.store.modify_info(doc).await;
        self.finish(result, "info updated", &id, serial)
    }

    /// Replaces a stored document with its tombstone and returns the
    /// tombstone's serial.
    ///
    /// # Errors
    ///
    /// Same as [`DocumentController::update`].
    pub async fn delete(&self, doc: Document<P>) -> DocumentResult<u64> {
        debug!(kind = %P::KIND, owner = %doc.owner_id, document_id = %doc.id, "delete request");
        require_id(&doc)?;

        let _reservation = self.queue.reserve(&doc.owner_id).await;
        let stored = self.fence(&doc).await?;

        let serial = self.serials.next().await?;
        let result = self.store.modify(stored.tombstone(serial)).await;
        self.finish(result, "deleted", &doc.id, serial)
    }

    /// Reads a document, including its body.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown ids and for other owners' documents.
    pub async fn get(&self, id: &str, owner_id: &str) -> DocumentResult<Document<P>> {
        if id.is_empty() {
            return Err(DocumentError::bad_request("id is empty"));
        }
        Ok(self.store.get(id, owner_id).await?)
    }

    /// Returns the storage port.
    pub fn store(&self) -> &Arc<dyn DocumentStore<P>> {
        &self.store
    }

    async fn fence(&self, doc: &Document<P>) -> DocumentResult<Document<P>> {
        let stored = self.store.get_info(&doc.id, &doc.owner_id).await?;
        if stored.state.is_deleted() {
            warn!(kind = %P::KIND, document_id = %doc.id, "mutation of deleted document");
            return Err(DocumentError::Deleted);
        }
        if stored.serial > doc.serial {
            warn!(
                kind = %P::KIND,
                document_id = %doc.id,
                stored = stored.serial,
                submitted = doc.serial,
                "stale serial"
            );
            return Err(DocumentError::Changed);
        }
        Ok(stored)
    }

    fn finish(
        &self,
        result: vault_storage::StorageResult<()>,
        action: &str,
        id: &str,
        serial: u64,
    ) -> DocumentResult<u64> {
        match result {
            Ok(()) => {
                info!(kind = %P::KIND, document_id = %id, serial, "document {action}");
                Ok(serial)
            }
            Err(err) => {
                warn!(kind = %P::KIND, document_id = %id, error = %err, "document {action} failed");
                Err(err.into())
            }
        }
    }
}

fn require_id<P>(doc: &Document<P>) -> DocumentResult<()> {
    if doc.id.is_empty() {
        return Err(DocumentError::bad_request("id is empty"));
    }
    Ok(())
}

/// Payload kinds served by a [`Documents`] bundle.
pub trait Controlled: Payload {
    /// Returns the controller for this kind.
    fn controller(documents: &Documents) -> &DocumentController<Self>;
}

impl Controlled for Note {
    fn controller(documents: &Documents) -> &DocumentController<Self> {
        &documents.notes
    }
}

impl Controlled for Credential {
    fn controller(documents: &Documents) -> &DocumentController<Self> {
        &documents.credentials
    }
}

impl Controlled for Card {
    fn controller(documents: &Documents) -> &DocumentController<Self> {
        &documents.cards
    }
}

impl Controlled for File {
    fn controller(documents: &Documents) -> &DocumentController<Self> {
        &documents.files
    }
}

/// The four document controllers plus the shared allocator.
pub struct Documents {
    /// Notes.
    pub notes: DocumentController<Note>,
    /// Credentials.
    pub credentials: DocumentController<Credential>,
    /// Cards.
    pub cards: DocumentController<Card>,
    /// Files.
    pub files: DocumentController<File>,
    /// Shared serial allocator.
    pub serials: Arc<SerialAllocator>,
    /// Shared write queue.
    pub queue: WriteQueue,
}

impl Documents {
    /// Builds controllers for every kind over the given ports.
    pub fn new(ports: &Ports, serial_batch_size: u64) -> Self {
        let serials = Arc::new(SerialAllocator::new(
            ports.serials.clone(),
            serial_batch_size,
        ));
        let queue = WriteQueue::new();
        Self {
            notes: DocumentController::new(ports.notes.clone(), serials.clone(), queue.clone()),
            credentials: DocumentController::new(
                ports.credentials.clone(),
                serials.clone(),
                queue.clone(),
            ),
            cards: DocumentController::new(ports.cards.clone(), serials.clone(), queue.clone()),
            files: DocumentController::new(ports.files.clone(), serials.clone(), queue.clone()),
            serials,
            queue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vault_storage::MemoryStore;

    fn setup() -> (MemoryStore, Documents) {
        let store = MemoryStore::new();
        let docs = Documents::new(&store.ports(), 10);
        (store, docs)
    }

    fn note(owner: &str, text: &str) -> Document<Note> {
        let mut doc = Document::new("groceries", Note::new(text));
        doc.owner_id = owner.into();
        doc
    }

    #[tokio::test]
    async fn add_ignores_client_envelope() {
        let (store, docs) = setup();
        let mut doc = note("alice", "milk")
            .with_id("client-chosen")
            .with_serial(999);
        doc.state = DocumentState::Deleted;

        let id = docs.notes.add(doc).await.unwrap();
        assert_ne!(id, "client-chosen");

        let stored = store.notes.peek(&id).unwrap();
        assert_eq!(stored.serial, 1);
        assert_eq!(stored.state, DocumentState::Active);
        assert_eq!(stored.owner_id, "alice");
    }

    #[tokio::test]
    async fn add_rejects_missing_name() {
        let (_, docs) = setup();
        let mut doc = note("alice", "milk");
        doc.name.clear();
        assert!(matches!(
            docs.notes.add(doc).await,
            Err(DocumentError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn stale_serial_is_changed_then_retry_succeeds() {
        let (store, docs) = setup();
        // Move the allocator so the note lands on serial 5.
        for _ in 0..4 {
            docs.serials.next().await.unwrap();
        }
        let id = docs.notes.add(note("alice", "v1")).await.unwrap();
        assert_eq!(store.notes.peek(&id).unwrap().serial, 5);

        // Another device updates to 6.
        let other = note("alice", "v2").with_id(&id).with_serial(5);
        assert_eq!(docs.notes.update(other).await.unwrap(), 6);

        // This device still holds 5.
        let stale = note("alice", "mine").with_id(&id).with_serial(5);
        assert!(matches!(
            docs.notes.update(stale).await,
            Err(DocumentError::Changed)
        ));
        assert_eq!(store.notes.peek(&id).unwrap().payload.text, "v2");

        let retry = note("alice", "mine").with_id(&id).with_serial(6);
        assert_eq!(docs.notes.update(retry).await.unwrap(), 7);
        let stored = store.notes.peek(&id).unwrap();
        assert_eq!(stored.serial, 7);
        assert_eq!(stored.payload.text, "mine");
    }

    #[tokio::test]
    async fn submitting_current_serial_is_allowed() {
        let (_, docs) = setup();
        let id = docs.notes.add(note("alice", "v1")).await.unwrap();
        let current = note("alice", "v2").with_id(&id).with_serial(1);
        assert!(docs.notes.update(current).await.is_ok());
    }

    #[tokio::test]
    async fn other_owner_sees_not_found() {
        let (_, docs) = setup();
        let id = docs.notes.add(note("alice", "v1")).await.unwrap();

        let foreign = note("mallory", "pwned").with_id(&id).with_serial(100);
        assert!(matches!(
            docs.notes.update(foreign.clone()).await,
            Err(DocumentError::NotFound)
        ));
        assert!(matches!(
            docs.notes.delete(foreign).await,
            Err(DocumentError::NotFound)
        ));
        assert!(matches!(
            docs.notes.get(&id, "mallory").await,
            Err(DocumentError::NotFound)
        ));
    }

    #[tokio::test]
    async fn update_without_id_is_bad_request() {
        let (_, docs) = setup();
        assert!(matches!(
            docs.notes.update(note("alice", "x")).await,
            Err(DocumentError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn tombstones_are_terminal() {
        let (store, docs) = setup();
        let mut doc = Document::new("bank", Credential::new("alice", "hunter2"))
            .with_meta("url", "https://bank.example");
        doc.owner_id = "alice".into();
        let id = docs.credentials.add(doc.clone()).await.unwrap();

        let del = doc.clone().with_id(&id).with_serial(1);
        let serial = docs.credentials.delete(del).await.unwrap();

        let tomb = store.credentials.peek(&id).unwrap();
        assert_eq!(tomb.serial, serial);
        assert_eq!(tomb.state, DocumentState::Deleted);
        assert_eq!(tomb.name, "bank");
        assert_eq!(tomb.owner_id, "alice");
        assert!(tomb.metadata.is_empty());
        assert_eq!(tomb.payload, Credential::default());

        let again = doc.clone().with_id(&id).with_serial(serial);
        assert!(matches!(
            docs.credentials.update(again.clone()).await,
            Err(DocumentError::Deleted)
        ));
        assert!(matches!(
            docs.credentials.delete(again).await,
            Err(DocumentError::Deleted)
        ));
    }

    #[tokio::test]
    async fn changed_update_never_persists() {
        let (store, docs) = setup();
        let id = docs.notes.add(note("alice", "v1")).await.unwrap();
        docs.notes
            .update(note("alice", "v2").with_id(&id).with_serial(1))
            .await
            .unwrap();

        let before = store.notes.peek(&id).unwrap();
        let _ = docs
            .notes
            .delete(note("alice", "v1").with_id(&id).with_serial(1))
            .await;
        assert_eq!(store.notes.peek(&id).unwrap(), before);
    }

    fn file(owner: &str, digest: &str, data: &'static [u8]) -> Document<File> {
        let mut payload = File::named("scan.pdf");
        payload.digest = digest.into();
        payload.size = data.len() as u64;
        payload.data = data.into();
        let mut doc = Document::new("scan", payload);
        doc.owner_id = owner.into();
        doc
    }

    #[tokio::test]
    async fn same_digest_updates_metadata_only() {
        let (store, docs) = setup();
        let id = docs.files.add(file("alice", "aa", b"body")).await.unwrap();

        // Same digest, different (empty) body: only the envelope is rewritten.
        let mut same = file("alice", "aa", b"").with_id(&id).with_serial(1);
        same.name = "renamed".into();
        docs.files.update(same).await.unwrap();

        let stored = store.files.peek(&id).unwrap();
        assert_eq!(stored.name, "renamed");
        assert_eq!(stored.payload.data.as_ref(), b"body");
        assert_eq!(stored.serial, 2);

        // New digest: full replacement.
        let changed = file("alice", "bb", b"new body").with_id(&id).with_serial(2);
        docs.files.update(changed).await.unwrap();
        let stored = store.files.peek(&id).unwrap();
        assert_eq!(stored.payload.digest, "bb");
        assert_eq!(stored.payload.data.as_ref(), b"new body");
    }

    #[tokio::test]
    async fn update_info_goes_through_fencing() {
        let (store, docs) = setup();
        let id = docs.files.add(file("alice", "aa", b"body")).await.unwrap();
        docs.files
            .update_info(file("alice", "", b"").with_id(&id).with_serial(1).with_meta("k", "v"))
            .await
            .unwrap();

        let stored = store.files.peek(&id).unwrap();
        assert_eq!(stored.metadata.len(), 1);
        assert_eq!(stored.payload.digest, "aa");

        let stale = file("alice", "", b"").with_id(&id).with_serial(1);
        assert!(matches!(
            docs.files.update_info(stale).await,
            Err(DocumentError::Changed)
        ));
    }

    #[tokio::test]
    async fn serials_are_shared_across_kinds() {
        let (store, docs) = setup();
        let n = docs.notes.add(note("alice", "x")).await.unwrap();
        let mut card = Document::new("visa", Card::default());
        card.owner_id = "bob".into();
        let c = docs.cards.add(card).await.unwrap();

        assert_eq!(store.notes.peek(&n).unwrap().serial, 1);
        assert_eq!(store.cards.peek(&c).unwrap().serial, 2);
        assert_eq!(docs.queue.live_keys(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_one_wins_per_serial() {
        let (store, docs) = setup();
        let docs = Arc::new(docs);
        let id = docs.notes.add(note("alice", "v0")).await.unwrap();

        // Every device read serial 1; exactly one of them may win.
        let mut tasks = Vec::new();
        for i in 0..8 {
            let docs = docs.clone();
            let doc = note("alice", &format!("device {i}")).with_id(&id).with_serial(1);
            tasks.push(tokio::spawn(async move { docs.notes.update(doc).await }));
        }

        let mut won = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => won += 1,
                Err(DocumentError::Changed) => {}
                Err(other) => panic!("unexpected error {other}"),
            }
        }
        assert_eq!(won, 1);
        assert_eq!(store.notes.peek(&id).unwrap().serial, 2);
    }
}

//! Incremental update feed.
//!
//! A sync call allocates one serial as its snapshot bound, then scans every
//! document kind concurrently for the owner's documents in
//! `(min_serial, snapshot_serial]`, fanning them into one channel.
//!
//! The bound is allocated under the owner's write reservation. Every
//! mutation holds that reservation from drawing its serial until it commits,
//! so each of the owner's serials below the bound is already persisted when
//! the scans start, and anything committed later carries a larger serial and
//! is left for the next sync.

use crate::documents::Documents;
use crate::error::{DocumentError, DocumentResult};
use crate::queue::WriteQueue;
use crate::serial::SerialAllocator;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, warn};
use vault_protocol::{Card, Credential, File, Note, Payload, Update};
use vault_storage::{DocumentStore, StorageError, UpdateSink};

/// Fans per-kind scans into one bounded feed.
pub struct UpdateMerger {
    notes: Arc<dyn DocumentStore<Note>>,
    credentials: Arc<dyn DocumentStore<Credential>>,
    cards: Arc<dyn DocumentStore<Card>>,
    files: Arc<dyn DocumentStore<File>>,
    serials: Arc<SerialAllocator>,
    queue: WriteQueue,
    buffer: usize,
}

impl UpdateMerger {
    /// Creates a merger over the controllers' storage ports.
    ///
    /// `buffer` is the capacity of the merged channel.
    pub fn new(documents: &Documents, buffer: usize) -> Self {
        Self {
            notes: documents.notes.store().clone(),
            credentials: documents.credentials.store().clone(),
            cards: documents.cards.store().clone(),
            files: documents.files.store().clone(),
            serials: documents.serials.clone(),
            queue: documents.queue.clone(),
            buffer: buffer.max(1),
        }
    }

    /// Starts a sync for `owner_id` above `min_serial`.
    ///
    /// # Errors
    ///
    /// Fails before streaming anything if no snapshot serial can be
    /// allocated. Scan failures are reported through the returned stream.
    pub async fn get_updates(&self, owner_id: &str, min_serial: u64) -> DocumentResult<UpdateStream> {
        let reservation = self.queue.reserve(owner_id).await;
        let snapshot_serial = self.serials.next().await?;
        reservation.release();
        debug!(owner = %owner_id, min_serial, snapshot_serial, "update stream started");

        let (tx, rx) = mpsc::channel(self.buffer);
        let mut scans = JoinSet::new();
        spawn_scan(&mut scans, &self.notes, owner_id, min_serial, snapshot_serial, &tx);
        spawn_scan(&mut scans, &self.credentials, owner_id, min_serial, snapshot_serial, &tx);
        spawn_scan(&mut scans, &self.cards, owner_id, min_serial, snapshot_serial, &tx);
        spawn_scan(&mut scans, &self.files, owner_id, min_serial, snapshot_serial, &tx);
        drop(tx);

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let owner = owner_id.to_owned();
        let supervisor = tokio::spawn(async move {
            let outcome = supervise(scans).await;
            if let Err(err) = &outcome {
                warn!(%owner, snapshot_serial, error = %err, "update stream failed");
            }
            let _ = outcome_tx.send(outcome);
        });

        Ok(UpdateStream {
            snapshot_serial,
            documents: rx,
            outcome: Some(outcome_rx),
            supervisor,
        })
    }
}

fn spawn_scan<P: Payload>(
    scans: &mut JoinSet<DocumentResult<()>>,
    store: &Arc<dyn DocumentStore<P>>,
    owner_id: &str,
    min_serial: u64,
    max_serial: u64,
    sink: &UpdateSink,
) {
    let store = store.clone();
    let owner = owner_id.to_owned();
    let sink = sink.clone();
    scans.spawn(async move {
        store
            .scan(&owner, min_serial, max_serial, &sink)
            .await
            .map_err(DocumentError::Storage)
    });
}

/// Waits for every scan; the first failure cancels the rest.
async fn supervise(mut scans: JoinSet<DocumentResult<()>>) -> DocumentResult<()> {
    let mut outcome = Ok(());
    while let Some(joined) = scans.join_next().await {
        let result = match joined {
            Ok(result) => result,
            Err(err) if err.is_cancelled() => continue,
            Err(err) => Err(DocumentError::Storage(StorageError::Backend(format!(
                "scan task failed: {err}"
            )))),
        };
        if let Err(err) = result {
            if outcome.is_ok() {
                scans.abort_all();
                outcome = Err(err);
            }
        }
    }
    outcome
}

/// The consumer end of one sync.
///
/// Dropping the stream cancels every outstanding scan.
pub struct UpdateStream {
    snapshot_serial: u64,
    documents: mpsc::Receiver<Update>,
    outcome: Option<oneshot::Receiver<DocumentResult<()>>>,
    supervisor: JoinHandle<()>,
}

impl UpdateStream {
    /// Returns the inclusive upper bound of this sync.
    pub fn snapshot_serial(&self) -> u64 {
        self.snapshot_serial
    }

    /// Returns the next document, the scan failure once, or `None` when the
    /// sync completed.
    ///
    /// Documents delivered before a failure are not retracted; the sync only
    /// counts as complete if it ends with `None`.
    pub async fn recv(&mut self) -> Option<DocumentResult<Update>> {
        if let Some(update) = self.documents.recv().await {
            return Some(Ok(update));
        }
        let outcome = self.outcome.take()?;
        match outcome.await {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(Err(err)),
            Err(_) => Some(Err(DocumentError::Storage(StorageError::Closed))),
        }
    }

    /// Drains the stream.
    ///
    /// # Errors
    ///
    /// Returns the first scan failure; partial results are discarded.
    pub async fn collect(mut self) -> DocumentResult<Vec<Update>> {
        let mut updates = Vec::new();
        while let Some(next) = self.recv().await {
            updates.push(next?);
        }
        Ok(updates)
    }
}

impl Drop for UpdateStream {
    fn drop(&mut self) {
        self.supervisor.abort();
    }
}

impl std::fmt::Debug for UpdateStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateStream")
            .field("snapshot_serial", &self.snapshot_serial)
            .finish_non_exhaustive()
    }
}

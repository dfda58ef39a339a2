//! Local read cache of the user's documents.
//!
//! One map per kind keyed by id, plus the watermark: the snapshot serial of
//! the last completed sync. Every [`LocalCache::clear`] starts a new epoch;
//! writes tagged with an older epoch are dropped, so a sync that started
//! before a logout cannot repopulate the cache.

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use vault_protocol::{Document, DocumentKind, Payload, Update};

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<DocumentKind, BTreeMap<String, Update>>,
    watermark: u64,
    epoch: u64,
}

impl CacheState {
    fn apply(&mut self, update: Update) {
        let entries = self.entries.entry(update.kind()).or_default();
        if update.state().is_deleted() {
            entries.remove(update.id());
        } else {
            entries.insert(update.id().to_owned(), update);
        }
    }
}

/// In-memory copy of the documents delivered by the update feed.
#[derive(Debug, Default)]
pub struct LocalCache {
    state: RwLock<CacheState>,
}

impl LocalCache {
    /// Creates an empty cache at watermark 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one delivered document: tombstones remove the entry, anything
    /// else replaces it wholesale.
    pub fn apply(&self, update: Update) {
        self.state.write().apply(update);
    }

    /// Applies `update` if no clear happened since `epoch`.
    pub fn apply_in(&self, epoch: u64, update: Update) -> bool {
        let mut state = self.state.write();
        if state.epoch != epoch {
            return false;
        }
        state.apply(update);
        true
    }

    /// Sets the watermark if no clear happened since `epoch`.
    pub fn advance_in(&self, epoch: u64, watermark: u64) -> bool {
        let mut state = self.state.write();
        if state.epoch != epoch {
            return false;
        }
        state.watermark = watermark;
        true
    }

    /// Returns the current epoch.
    pub fn epoch(&self) -> u64 {
        self.state.read().epoch
    }

    /// Returns the watermark.
    pub fn watermark(&self) -> u64 {
        self.state.read().watermark
    }

    /// Drops every entry of every kind and resets the watermark.
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.entries.clear();
        state.watermark = 0;
        state.epoch += 1;
    }

    /// Returns one entry.
    pub fn get(&self, kind: DocumentKind, id: &str) -> Option<Update> {
        self.state.read().entries.get(&kind)?.get(id).cloned()
    }

    /// Returns all entries of a kind, ordered by id.
    pub fn list(&self, kind: DocumentKind) -> Vec<Update> {
        self.state
            .read()
            .entries
            .get(&kind)
            .map(|entries| entries.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns one typed document.
    pub fn document<P: Payload>(&self, id: &str) -> Option<Document<P>> {
        self.get(P::KIND, id).and_then(P::from_update)
    }

    /// Returns all typed documents of a kind, ordered by id.
    pub fn documents<P: Payload>(&self) -> Vec<Document<P>> {
        self.list(P::KIND)
            .into_iter()
            .filter_map(P::from_update)
            .collect()
    }

    /// Returns the number of cached documents across all kinds.
    pub fn len(&self) -> usize {
        self.state.read().entries.values().map(BTreeMap::len).sum()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! Per-owner write serialization.
//!
//! Every check-then-write sequence on an owner's documents runs while holding
//! that owner's [`Reservation`]. Reservations for one key are granted in
//! arrival order; different keys never contend.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Default)]
struct Entry {
    lock: Arc<AsyncMutex<()>>,
    /// Holders plus waiters.
    users: usize,
}

type Slots = Arc<Mutex<HashMap<String, Entry>>>;

/// Map of owner keys to their write slot.
///
/// The map lock only covers bookkeeping. The document read-validate-write
/// sequence is protected by holding the reservation.
#[derive(Clone, Default)]
pub struct WriteQueue {
    slots: Slots,
}

impl WriteQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `key`.
    ///
    /// Dropping the returned reservation releases it. Dropping the future
    /// before it resolves gives up the place in line without blocking anyone.
    pub async fn reserve(&self, key: &str) -> Reservation {
        let ticket = Ticket::take(&self.slots, key);
        let guard = ticket.lock.clone().lock_owned().await;
        Reservation {
            _guard: guard,
            _ticket: ticket,
        }
    }

    /// Returns the number of keys with a holder or waiter.
    pub fn live_keys(&self) -> usize {
        self.slots.lock().len()
    }
}

impl std::fmt::Debug for WriteQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteQueue")
            .field("live_keys", &self.live_keys())
            .finish()
    }
}

/// A place in one key's line. Removes the key when the last user leaves.
struct Ticket {
    key: String,
    lock: Arc<AsyncMutex<()>>,
    slots: Slots,
}

impl Ticket {
    fn take(slots: &Slots, key: &str) -> Self {
        let mut map = slots.lock();
        let entry = map.entry(key.to_owned()).or_default();
        entry.users += 1;
        Self {
            key: key.to_owned(),
            lock: entry.lock.clone(),
            slots: slots.clone(),
        }
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        let mut map = self.slots.lock();
        if let Some(entry) = map.get_mut(&self.key) {
            entry.users = entry.users.saturating_sub(1);
            if entry.users == 0 {
                map.remove(&self.key);
            }
        }
    }
}

/// Exclusive hold on one owner key.
///
/// Released on drop, including on early return and task cancellation.
#[must_use = "the reservation is released as soon as it is dropped"]
pub struct Reservation {
    // Field order matters: the guard unlocks before the ticket leaves.
    _guard: OwnedMutexGuard<()>,
    _ticket: Ticket,
}

impl Reservation {
    /// Releases the reservation.
    pub fn release(self) {}
}

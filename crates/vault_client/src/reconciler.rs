//! Incremental sync of the update feed into the [`LocalCache`].

use crate::cache::LocalCache;
use crate::error::{ClientError, ClientResult};
use crate::session::Session;
use crate::transport::VaultTransport;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use vault_protocol::{BearerToken, UpdateFrame, UpdateRequest};

type Outcome = Option<ClientResult<u64>>;

struct Inner {
    transport: Arc<dyn VaultTransport>,
    session: Session,
    cache: Arc<LocalCache>,
    inflight: Mutex<Option<watch::Receiver<Outcome>>>,
}

/// Pulls the update feed into the local cache, one sync at a time.
///
/// Concurrent [`Reconciler::update`] calls share a single in-flight sync and
/// all receive its result. The sync runs on its own task, so a caller that
/// gives up waiting does not abort it for the others.
#[derive(Clone)]
pub struct Reconciler {
    inner: Arc<Inner>,
}

impl Reconciler {
    /// Creates a reconciler for `cache`.
    pub fn new(
        transport: Arc<dyn VaultTransport>,
        session: Session,
        cache: Arc<LocalCache>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                session,
                cache,
                inflight: Mutex::new(None),
            }),
        }
    }

    /// Returns the cache this reconciler fills.
    pub fn cache(&self) -> &Arc<LocalCache> {
        &self.inner.cache
    }

    /// Returns the session whose token is used.
    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    /// Syncs the cache and returns the new watermark.
    ///
    /// # Errors
    ///
    /// `MustReLogin` if the session is gone; the cache has been cleared.
    /// Other failures leave the watermark where it was, so the next call
    /// resumes from it. Documents applied before a failure stay applied.
    pub async fn update(&self) -> ClientResult<u64> {
        let mut outcome = {
            let mut inflight = self.inner.inflight.lock();
            match inflight.as_ref() {
                Some(pending) => pending.clone(),
                None => {
                    let (tx, rx) = watch::channel(None);
                    *inflight = Some(rx.clone());
                    tokio::spawn(Arc::clone(&self.inner).lead(tx));
                    rx
                }
            }
        };

        let result = match outcome.wait_for(Option::is_some).await {
            Ok(done) => done.clone(),
            Err(_) => None,
        };
        match result {
            Some(result) => result,
            None => {
                let mut inflight = self.inner.inflight.lock();
                if inflight
                    .as_ref()
                    .is_some_and(|pending| pending.same_channel(&outcome))
                {
                    *inflight = None;
                }
                Err(ClientError::Cancelled)
            }
        }
    }

    /// Clears the cache, ends the session and returns `MustReLogin`.
    pub(crate) fn session_lost(&self) -> ClientError {
        self.inner.session_lost()
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("watermark", &self.inner.cache.watermark())
            .field("session", &self.inner.session)
            .finish_non_exhaustive()
    }
}

impl Inner {
    async fn lead(self: Arc<Self>, tx: watch::Sender<Outcome>) {
        let result = self.sync().await;
        *self.inflight.lock() = None;
        // No receivers left is fine.
        let _ = tx.send(Some(result));
    }

    async fn sync(&self) -> ClientResult<u64> {
        let Some(token) = self.session.token() else {
            return Err(self.session_lost());
        };

        let epoch = self.cache.epoch();
        let min_serial = self.cache.watermark();
        match self.pull(&token, epoch, min_serial).await {
            Ok(snapshot) => {
                if !self.cache.advance_in(epoch, snapshot) {
                    return Err(ClientError::Cancelled);
                }
                info!(min_serial, watermark = snapshot, "cache synced");
                Ok(snapshot)
            }
            Err(err) if err.is_auth_failure() => {
                warn!(error = %err, "sync rejected, session lost");
                Err(self.session_lost())
            }
            Err(err) => {
                warn!(min_serial, error = %err, "sync failed");
                Err(err)
            }
        }
    }

    async fn pull(&self, token: &BearerToken, epoch: u64, min_serial: u64) -> ClientResult<u64> {
        let mut frames = self
            .transport
            .get_update_stream(token, UpdateRequest { min_serial })
            .await?;

        let snapshot = match frames.recv().await {
            Some(Ok(UpdateFrame::Begin { snapshot_serial })) => snapshot_serial,
            Some(Err(status)) => return Err(status.into()),
            Some(Ok(UpdateFrame::Document(_))) | None => {
                return Err(ClientError::protocol("missing stream header"))
            }
        };

        let mut applied = 0usize;
        while let Some(frame) = frames.recv().await {
            match frame? {
                UpdateFrame::Document(update) => {
                    if !self.cache.apply_in(epoch, update) {
                        return Err(ClientError::Cancelled);
                    }
                    applied += 1;
                }
                UpdateFrame::Begin { .. } => {
                    return Err(ClientError::protocol("repeated stream header"))
                }
            }
        }
        debug!(min_serial, snapshot, applied, "update stream drained");
        Ok(snapshot)
    }

    fn session_lost(&self) -> ClientError {
        self.cache.clear();
        self.session.logout();
        ClientError::MustReLogin
    }
}

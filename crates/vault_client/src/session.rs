//! Session lifecycle.
//!
//! A [`Session`] holds the current bearer token and keeps it alive with one
//! background refresh task per installed token. The task sleeps until
//! `expires_at - refresh_margin`, racing the timer against the token's
//! cancellation signal. Installing a new token or logging out cancels the
//! previous task, so at most one refresh task is live per session.
//!
//! Refresh outcomes:
//! - success: the new token is installed and a new task scheduled for it
//! - `Unauthenticated`: the session ends as [`SessionState::Rejected`]
//! - anything else: retried every `refresh_retry_interval` until
//!   `expires_at + expiry_grace`, then the session ends as
//!   [`SessionState::Expired`]

use crate::config::ClientConfig;
use crate::transport::VaultTransport;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vault_protocol::{BearerToken, Code, TokenClaims};

/// Where a session stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No token installed.
    LoggedOut,
    /// A token is installed and refreshed in the background.
    Active,
    /// The server refused to refresh the token.
    Rejected,
    /// Refresh kept failing until the token expired.
    Expired,
}

impl SessionState {
    /// Returns true if the session ended without a logout.
    pub fn is_lost(&self) -> bool {
        matches!(self, Self::Rejected | Self::Expired)
    }
}

struct Slot {
    token: Option<BearerToken>,
    cancel: CancellationToken,
    state: SessionState,
}

impl Slot {
    /// Installs `token`, cancelling the previous refresh task.
    fn swap(&mut self, token: BearerToken) -> CancellationToken {
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
        self.token = Some(token);
        self.state = SessionState::Active;
        self.cancel.clone()
    }
}

struct Inner {
    transport: Arc<dyn VaultTransport>,
    config: ClientConfig,
    slot: RwLock<Slot>,
}

/// Shared handle to the client session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    /// Creates a logged out session.
    pub fn new(transport: Arc<dyn VaultTransport>, config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                slot: RwLock::new(Slot {
                    token: None,
                    cancel: CancellationToken::new(),
                    state: SessionState::LoggedOut,
                }),
            }),
        }
    }

    /// Installs a freshly issued token and schedules its refresh.
    ///
    /// Must be called within a Tokio runtime.
    pub fn install(&self, token: BearerToken) {
        let cancel = self.inner.slot.write().swap(token.clone());
        self.inner.spawn_refresh(token, cancel);
    }

    /// Returns the current token.
    pub fn token(&self) -> Option<BearerToken> {
        self.inner.slot.read().token.clone()
    }

    /// Returns the session state.
    pub fn state(&self) -> SessionState {
        self.inner.slot.read().state
    }

    /// Returns the unverified claims of the current token.
    pub fn claims(&self) -> Option<TokenClaims> {
        self.token()
            .and_then(|token| TokenClaims::peek(&token).ok())
    }

    /// Drops the token and stops its refresh task.
    pub fn logout(&self) {
        let mut slot = self.inner.slot.write();
        slot.cancel.cancel();
        slot.cancel = CancellationToken::new();
        slot.token = None;
        slot.state = SessionState::LoggedOut;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn spawn_refresh(self: &Arc<Self>, token: BearerToken, cancel: CancellationToken) {
        tokio::spawn(Arc::clone(self).refresh_loop(token, cancel));
    }

    /// Installs a refreshed token unless `current` was superseded meanwhile.
    fn renew(self: &Arc<Self>, current: &CancellationToken, token: BearerToken) -> bool {
        let cancel = {
            let mut slot = self.slot.write();
            if current.is_cancelled() {
                return false;
            }
            slot.swap(token.clone())
        };
        self.spawn_refresh(token, cancel);
        true
    }

    /// Ends the session unless `current` was superseded meanwhile.
    fn end(&self, current: &CancellationToken, state: SessionState) {
        let mut slot = self.slot.write();
        if current.is_cancelled() {
            return;
        }
        current.cancel();
        slot.token = None;
        slot.state = state;
    }

    async fn refresh_loop(self: Arc<Self>, token: BearerToken, cancel: CancellationToken) {
        let claims = match TokenClaims::peek(&token) {
            Ok(claims) => claims,
            Err(err) => {
                warn!(error = %err, "token unreadable, refresh not scheduled");
                return;
            }
        };
        let session_id = claims.session_id.as_str();

        let expires = instant_of(claims.expires_at_time());
        let wake = expires
            .checked_sub(self.config.refresh_margin)
            .unwrap_or_else(Instant::now);
        let give_up = expires
            .checked_add(self.config.expiry_grace)
            .unwrap_or(expires);
        debug!(session_id, "token refresh scheduled");

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = sleep_until(wake) => {}
        }

        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = self.transport.refresh(&token) => result,
            };

            match result {
                Ok(renewed) => {
                    if self.renew(&cancel, renewed) {
                        info!(session_id, "token refreshed");
                    }
                    return;
                }
                Err(status) if status.code == Code::Unauthenticated => {
                    warn!(session_id, error = %status, "token refresh rejected");
                    self.end(&cancel, SessionState::Rejected);
                    return;
                }
                Err(status) => {
                    let retry_at = Instant::now() + self.config.refresh_retry_interval;
                    if retry_at > give_up {
                        warn!(session_id, error = %status, "token expired before refresh succeeded");
                        self.end(&cancel, SessionState::Expired);
                        return;
                    }
                    debug!(session_id, error = %status, "token refresh failed, retrying");
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = sleep_until(retry_at) => {}
                    }
                }
            }
        }
    }
}

/// Expiries further out than this are scheduled at this distance.
const MAX_SCHEDULE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

/// Maps a wall-clock time onto the runtime clock.
fn instant_of(time: SystemTime) -> Instant {
    let remaining = time
        .duration_since(SystemTime::now())
        .unwrap_or(Duration::ZERO)
        .min(MAX_SCHEDULE);
    let now = Instant::now();
    now.checked_add(remaining)
        .or_else(|| now.checked_add(Duration::from_secs(24 * 60 * 60)))
        .unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockTransport, RefreshReply};
    use std::time::UNIX_EPOCH;
    use tokio::time::sleep;
    use vault_protocol::{codec, SIGNATURE_LEN};

    const TTL: Duration = Duration::from_secs(2 * 60 * 60);

    fn session(reply: RefreshReply) -> (Arc<MockTransport>, Session) {
        let transport = Arc::new(MockTransport::new());
        transport.set_refresh_reply(reply);
        let session = Session::new(transport.clone(), ClientConfig::default());
        (transport, session)
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_refresh_ends_the_session() {
        let (transport, session) = session(RefreshReply::Reject);
        session.install(MockTransport::token(TTL));

        sleep(TTL - Duration::from_secs(121)).await;
        assert_eq!(transport.refresh_calls(), 0);
        assert_eq!(session.state(), SessionState::Active);

        sleep(Duration::from_secs(2)).await;
        assert_eq!(transport.refresh_calls(), 1);
        assert_eq!(session.state(), SessionState::Rejected);
        assert!(session.token().is_none());

        sleep(TTL * 5).await;
        assert_eq!(transport.refresh_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_refresh_reschedules() {
        let (transport, session) = session(RefreshReply::Renew(TTL));
        let first = MockTransport::token(TTL);
        session.install(first.clone());

        sleep(TTL - Duration::from_secs(119)).await;
        assert_eq!(transport.refresh_calls(), 1);
        let second = session.token().unwrap();
        assert_ne!(second, first);
        assert_eq!(session.state(), SessionState::Active);

        sleep(TTL).await;
        assert_eq!(transport.refresh_calls(), 2);
        assert_ne!(session.token().unwrap(), second);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_retry_until_expiry() {
        let (transport, session) = session(RefreshReply::Fail);
        session.install(MockTransport::token(TTL));

        sleep(TTL + Duration::from_secs(10)).await;
        // Every 5 s from 2 min before expiry up to expiry itself.
        assert_eq!(transport.refresh_calls(), 25);
        assert_eq!(session.state(), SessionState::Expired);
        assert!(session.state().is_lost());
        assert!(session.token().is_none());

        sleep(TTL).await;
        assert_eq!(transport.refresh_calls(), 25);
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_after_transient_failure() {
        let (transport, session) = session(RefreshReply::Fail);
        session.install(MockTransport::token(TTL));

        sleep(TTL - Duration::from_secs(112)).await;
        assert_eq!(transport.refresh_calls(), 2);

        transport.set_refresh_reply(RefreshReply::Renew(TTL));
        sleep(Duration::from_secs(5)).await;
        assert_eq!(transport.refresh_calls(), 3);
        assert_eq!(session.state(), SessionState::Active);

        sleep(TTL).await;
        assert_eq!(session.state(), SessionState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn installing_cancels_the_previous_task() {
        let (transport, session) = session(RefreshReply::Reject);
        session.install(MockTransport::token(TTL));
        let second = MockTransport::token(TTL * 10);
        session.install(second.clone());

        sleep(TTL * 3).await;
        assert_eq!(transport.refresh_calls(), 0);
        assert_eq!(session.token(), Some(second));
        assert_eq!(session.state(), SessionState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn logout_cancels_refresh() {
        let (transport, session) = session(RefreshReply::Renew(TTL));
        session.install(MockTransport::token(TTL));
        assert!(session.claims().is_some());

        session.logout();
        assert_eq!(session.state(), SessionState::LoggedOut);
        assert!(session.token().is_none());

        sleep(TTL * 3).await;
        assert_eq!(transport.refresh_calls(), 0);
        assert_eq!(session.state(), SessionState::LoggedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn unreadable_token_is_not_refreshed() {
        let (transport, session) = session(RefreshReply::Renew(TTL));
        session.install(BearerToken::new(vec![1u8, 2, 3]));

        sleep(TTL * 3).await;
        assert_eq!(transport.refresh_calls(), 0);
        assert_eq!(session.state(), SessionState::Active);
        assert!(session.claims().is_none());
    }

    fn token_expiring_at(expires_at: u64) -> BearerToken {
        let claims = TokenClaims {
            subject: "user".into(),
            session_id: "session".into(),
            token_id: "token".into(),
            issued_at: 0,
            expires_at,
        };
        let mut bytes = codec::encode(&claims).unwrap();
        bytes.extend_from_slice(&[0u8; SIGNATURE_LEN]);
        BearerToken::new(bytes)
    }

    #[test]
    fn far_expiry_is_clamped() {
        let start = Instant::now();
        let at = instant_of(UNIX_EPOCH + Duration::from_millis(u64::MAX));
        assert!(at >= start + Duration::from_secs(365 * 24 * 60 * 60));
        assert!(at <= Instant::now() + MAX_SCHEDULE);

        assert!(instant_of(UNIX_EPOCH) <= Instant::now());
    }

    #[tokio::test(start_paused = true)]
    async fn far_expiry_keeps_the_task_alive() {
        let (transport, session) = session(RefreshReply::Reject);
        let token = token_expiring_at(u64::MAX);
        session.install(token.clone());

        sleep(TTL * 10).await;
        assert_eq!(transport.refresh_calls(), 0);
        assert_eq!(session.state(), SessionState::Active);

        // The task is still there to be cancelled by the next token.
        session.install(MockTransport::token(TTL));
        sleep(TTL).await;
        assert_eq!(transport.refresh_calls(), 1);
        assert_eq!(session.state(), SessionState::Rejected);
    }
}

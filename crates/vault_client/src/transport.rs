//! Transport abstraction for talking to a vault server.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use vault_protocol::{
    codec, unix_millis, BearerToken, Code, Document, DocumentKind, DocumentRequest, File,
    FileStreamMessage, LoginRequest, Status, TokenClaims, Update, UpdateFrame, UpdateRequest,
    SIGNATURE_LEN,
};

/// Receiving end of an update stream.
///
/// The first item is [`UpdateFrame::Begin`]. The stream ends when the channel
/// closes; a failure arrives as one `Err` item. Dropping the receiver abandons
/// the sync on the server.
pub type FrameStream = mpsc::Receiver<Result<UpdateFrame, Status>>;

/// One call per server operation. Failures are wire statuses; transport
/// problems are reported as [`Code::Unavailable`].
#[async_trait]
pub trait VaultTransport: Send + Sync {
    /// Creates an account.
    async fn register(&self, request: LoginRequest) -> Result<BearerToken, Status>;

    /// Opens a session.
    async fn login(&self, request: LoginRequest) -> Result<BearerToken, Status>;

    /// Exchanges a token for its successor.
    async fn refresh(&self, token: &BearerToken) -> Result<BearerToken, Status>;

    /// Adds a non-file document.
    async fn add_document(&self, token: &BearerToken, doc: Update) -> Result<String, Status>;

    /// Updates a non-file document.
    async fn update_document(&self, token: &BearerToken, doc: Update) -> Result<(), Status>;

    /// Deletes a document of any kind.
    async fn delete_document(&self, token: &BearerToken, doc: Update) -> Result<(), Status>;

    /// Reads one document.
    async fn get_document(
        &self,
        token: &BearerToken,
        kind: DocumentKind,
        request: DocumentRequest,
    ) -> Result<Update, Status>;

    /// Uploads a new file.
    async fn add_file(
        &self,
        token: &BearerToken,
        messages: Vec<FileStreamMessage>,
    ) -> Result<String, Status>;

    /// Uploads new content for a file.
    async fn update_file(
        &self,
        token: &BearerToken,
        messages: Vec<FileStreamMessage>,
    ) -> Result<(), Status>;

    /// Rewrites file name and metadata.
    async fn update_file_info(&self, token: &BearerToken, doc: Document<File>)
        -> Result<(), Status>;

    /// Downloads a file.
    async fn download_file(
        &self,
        token: &BearerToken,
        request: DocumentRequest,
    ) -> Result<Vec<FileStreamMessage>, Status>;

    /// Opens the update stream above `request.min_serial`.
    async fn get_update_stream(
        &self,
        token: &BearerToken,
        request: UpdateRequest,
    ) -> Result<FrameStream, Status>;
}

/// Scripted answer of [`MockTransport::refresh`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshReply {
    /// Issue a fresh token with the given lifetime.
    Renew(Duration),
    /// Answer `Unauthenticated`.
    Reject,
    /// Answer `Unavailable`.
    Fail,
}

/// A mock transport for testing.
///
/// Only `refresh` and `get_update_stream` are scripted; every other call
/// answers `Unavailable`.
#[derive(Debug)]
pub struct MockTransport {
    refresh_reply: Mutex<RefreshReply>,
    refresh_calls: AtomicUsize,
    frames: Mutex<Vec<Result<UpdateFrame, Status>>>,
    stream_delay: Mutex<Duration>,
    stream_calls: AtomicUsize,
}

impl MockTransport {
    /// Creates a mock that renews tokens for two hours and streams nothing.
    pub fn new() -> Self {
        Self {
            refresh_reply: Mutex::new(RefreshReply::Renew(Duration::from_secs(2 * 60 * 60))),
            refresh_calls: AtomicUsize::new(0),
            frames: Mutex::new(vec![Ok(UpdateFrame::Begin { snapshot_serial: 0 })]),
            stream_delay: Mutex::new(Duration::ZERO),
            stream_calls: AtomicUsize::new(0),
        }
    }

    /// Mints a structurally valid, unsigned token expiring after `ttl`.
    pub fn token(ttl: Duration) -> BearerToken {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);

        let now = SystemTime::now();
        let claims = TokenClaims {
            subject: "mock-user".into(),
            session_id: "mock-session".into(),
            token_id: NEXT_ID.fetch_add(1, Ordering::Relaxed).to_string(),
            issued_at: unix_millis(now),
            expires_at: unix_millis(now + ttl),
        };
        let mut bytes = codec::encode(&claims).unwrap_or_default();
        bytes.extend_from_slice(&[0u8; SIGNATURE_LEN]);
        BearerToken::new(bytes)
    }

    /// Sets the refresh answer.
    pub fn set_refresh_reply(&self, reply: RefreshReply) {
        *self.refresh_reply.lock() = reply;
    }

    /// Sets the items every update stream yields.
    pub fn set_frames(&self, frames: Vec<Result<UpdateFrame, Status>>) {
        *self.frames.lock() = frames;
    }

    /// Delays every update stream by `delay` before it opens.
    pub fn set_stream_delay(&self, delay: Duration) {
        *self.stream_delay.lock() = delay;
    }

    /// Number of refresh calls so far.
    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    /// Number of update streams opened so far.
    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn unscripted() -> Status {
    Status::new(Code::Unavailable, "mock transport")
}

#[async_trait]
impl VaultTransport for MockTransport {
    async fn register(&self, _request: LoginRequest) -> Result<BearerToken, Status> {
        Err(unscripted())
    }

    async fn login(&self, _request: LoginRequest) -> Result<BearerToken, Status> {
        Err(unscripted())
    }

    async fn refresh(&self, _token: &BearerToken) -> Result<BearerToken, Status> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.refresh_reply.lock().clone();
        match reply {
            RefreshReply::Renew(ttl) => Ok(Self::token(ttl)),
            RefreshReply::Reject => Err(Status::unauthenticated("session rejected")),
            RefreshReply::Fail => Err(unscripted()),
        }
    }

    async fn add_document(&self, _token: &BearerToken, _doc: Update) -> Result<String, Status> {
        Err(unscripted())
    }

    async fn update_document(&self, _token: &BearerToken, _doc: Update) -> Result<(), Status> {
        Err(unscripted())
    }

    async fn delete_document(&self, _token: &BearerToken, _doc: Update) -> Result<(), Status> {
        Err(unscripted())
    }

    async fn get_document(
        &self,
        _token: &BearerToken,
        _kind: DocumentKind,
        _request: DocumentRequest,
    ) -> Result<Update, Status> {
        Err(unscripted())
    }

    async fn add_file(
        &self,
        _token: &BearerToken,
        _messages: Vec<FileStreamMessage>,
    ) -> Result<String, Status> {
        Err(unscripted())
    }

    async fn update_file(
        &self,
        _token: &BearerToken,
        _messages: Vec<FileStreamMessage>,
    ) -> Result<(), Status> {
        Err(unscripted())
    }

    async fn update_file_info(
        &self,
        _token: &BearerToken,
        _doc: Document<File>,
    ) -> Result<(), Status> {
        Err(unscripted())
    }

    async fn download_file(
        &self,
        _token: &BearerToken,
        _request: DocumentRequest,
    ) -> Result<Vec<FileStreamMessage>, Status> {
        Err(unscripted())
    }

    async fn get_update_stream(
        &self,
        _token: &BearerToken,
        _request: UpdateRequest,
    ) -> Result<FrameStream, Status> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.stream_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let frames = self.frames.lock().clone();
        let (tx, rx) = mpsc::channel(frames.len().max(1));
        for frame in frames {
            // Capacity covers every frame.
            let _ = tx.try_send(frame);
        }
        Ok(rx)
    }
}

//! Error types for the vault client.

use thiserror::Error;
use vault_protocol::{CodecError, Code, Status};

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the vault client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The session is gone; the local cache has been cleared.
    #[error("session ended, log in again")]
    MustReLogin,

    /// The server answered with a failure status.
    #[error("{0}")]
    Status(Status),

    /// The server sent something the client cannot interpret.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Encoding or decoding a wire message failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// A sync in progress was abandoned before it finished.
    #[error("sync cancelled")]
    Cancelled,
}

impl ClientError {
    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Returns the wire status code, if the server sent one.
    pub fn code(&self) -> Option<Code> {
        match self {
            Self::Status(status) => Some(status.code),
            _ => None,
        }
    }

    /// Returns true if the session must be re-established.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::MustReLogin) || self.code() == Some(Code::Unauthenticated)
    }

    /// Returns true if repeating the call unchanged may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self.code(), Some(Code::Unavailable)) || matches!(self, Self::Cancelled)
    }

    /// Returns true for a stale-serial conflict.
    pub fn is_conflict(&self) -> bool {
        self.code() == Some(Code::Changed)
    }

    /// Returns the message shown to the user.
    pub fn user_message(&self) -> String {
        match self.code() {
            Some(Code::Changed) => "someone else updated this, refresh and retry".into(),
            Some(Code::Deleted) => "this item no longer exists".into(),
            Some(Code::Unauthenticated) => "session ended, log in again".into(),
            _ => self.to_string(),
        }
    }
}

impl From<Status> for ClientError {
    fn from(status: Status) -> Self {
        Self::Status(status)
    }
}

impl From<CodecError> for ClientError {
    fn from(err: CodecError) -> Self {
        Self::Codec(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(ClientError::Status(Status::new(Code::Unavailable, "down")).is_retryable());
        assert!(ClientError::Cancelled.is_retryable());
        assert!(!ClientError::Status(Status::new(Code::Changed, "stale")).is_retryable());
        assert!(!ClientError::MustReLogin.is_retryable());
    }

    #[test]
    fn auth_failures() {
        assert!(ClientError::MustReLogin.is_auth_failure());
        assert!(ClientError::from(Status::unauthenticated("expired")).is_auth_failure());
        assert!(!ClientError::from(Status::bad_request("name")).is_auth_failure());
    }

    #[test]
    fn user_messages() {
        let changed = ClientError::from(Status::new(Code::Changed, "mismatch"));
        assert!(changed.is_conflict());
        assert_eq!(
            changed.user_message(),
            "someone else updated this, refresh and retry"
        );

        let deleted = ClientError::from(Status::new(Code::Deleted, "gone"));
        assert_eq!(deleted.user_message(), "this item no longer exists");
    }

    #[test]
    fn error_display() {
        let err = ClientError::from(Status::new(Code::NotFound, "document not found"));
        assert_eq!(err.to_string(), "not found: document not found");

        let err = ClientError::protocol("missing stream header");
        assert_eq!(err.to_string(), "protocol error: missing stream header");
    }
}

//! Error types for the vault server.

use thiserror::Error;
use vault_protocol::{Code, CodecError, Status};
use vault_storage::StorageError;

/// Result type for document operations.
pub type DocumentResult<T> = Result<T, DocumentError>;

/// Result type for session and account operations.
pub type AuthResult<T> = Result<T, AuthError>;

/// Result type for server facade operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors from the document controllers, the allocator and the update feed.
#[derive(Error, Debug)]
pub enum DocumentError {
    /// No such document for this owner.
    #[error("document not found")]
    NotFound,

    /// The stored document is a tombstone.
    #[error("document deleted")]
    Deleted,

    /// The submitted serial is older than the stored one.
    #[error("document server version mismatch")]
    Changed,

    /// A required field is missing or malformed.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The serial allocator's backing counter failed.
    #[error("no serial source: {0}")]
    NoSerialSource(#[source] StorageError),

    /// Any other storage failure.
    #[error("storage error: {0}")]
    Storage(#[source] StorageError),
}

impl DocumentError {
    /// Returns true for errors that are returned to the caller untouched.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            DocumentError::NotFound
                | DocumentError::Deleted
                | DocumentError::Changed
                | DocumentError::BadRequest(_)
        )
    }

    /// Returns true if the same call may succeed when retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            DocumentError::NoSerialSource(_) => true,
            DocumentError::Storage(err) => err.is_transient(),
            _ => false,
        }
    }

    /// Shorthand for a `BadRequest` error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        DocumentError::BadRequest(message.into())
    }
}

impl From<StorageError> for DocumentError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound => DocumentError::NotFound,
            other => DocumentError::Storage(other),
        }
    }
}

/// Errors from token handling and accounts.
#[derive(Error, Debug)]
pub enum AuthError {
    /// The call carried no token.
    #[error("missing token")]
    MissingToken,

    /// The token bytes could not be parsed.
    #[error("malformed token")]
    Malformed,

    /// The token signature does not verify.
    #[error("invalid token signature")]
    BadSignature,

    /// The token is past its expiry.
    #[error("token expired")]
    Expired,

    /// The token lacks a subject or session id.
    #[error("token missing required claims")]
    MissingClaims,

    /// Unknown login or wrong password.
    #[error("invalid login or password")]
    InvalidCredentials,

    /// Register/Login was called with an empty login or password.
    #[error("login and password are required")]
    EmptyCredentials,

    /// Registration with a login that already exists.
    #[error("login already taken: {0}")]
    LoginTaken(String),

    /// The signing key was rejected by the MAC.
    #[error("signing key rejected")]
    SigningKey,

    /// Password hashing failed or the stored hash is unreadable.
    #[error("password hashing failed: {0}")]
    PasswordHash(String),

    /// Claims could not be encoded.
    #[error("token encoding failed: {0}")]
    Codec(#[from] CodecError),

    /// Account storage failed.
    #[error("account storage error: {0}")]
    Storage(#[source] StorageError),
}

impl AuthError {
    /// Returns true if the caller must authenticate again.
    pub fn is_unauthenticated(&self) -> bool {
        matches!(
            self,
            AuthError::MissingToken
                | AuthError::Malformed
                | AuthError::BadSignature
                | AuthError::Expired
                | AuthError::MissingClaims
                | AuthError::InvalidCredentials
        )
    }
}

/// Any failure surfaced by the server facade.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Session or account failure.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Document, allocator or update feed failure.
    #[error(transparent)]
    Document(#[from] DocumentError),
}

impl ServerError {
    /// Returns true if this error is reported to the client with its own code.
    pub fn is_client_error(&self) -> bool {
        match self {
            ServerError::Auth(err) => {
                err.is_unauthenticated()
                    || matches!(err, AuthError::EmptyCredentials | AuthError::LoginTaken(_))
            }
            ServerError::Document(err) => err.is_validation(),
        }
    }

    /// Converts to the wire status.
    ///
    /// Anything that is not a client error becomes a generic `Internal`
    /// status so storage details never reach the caller.
    pub fn to_status(&self) -> Status {
        match self {
            ServerError::Auth(err) if err.is_unauthenticated() => {
                Status::unauthenticated(err.to_string())
            }
            ServerError::Auth(AuthError::EmptyCredentials) => {
                Status::bad_request(AuthError::EmptyCredentials.to_string())
            }
            ServerError::Auth(AuthError::LoginTaken(_)) => {
                Status::new(Code::AlreadyExists, "login already taken")
            }
            ServerError::Document(DocumentError::NotFound) => {
                Status::new(Code::NotFound, DocumentError::NotFound.to_string())
            }
            ServerError::Document(DocumentError::Deleted) => {
                Status::new(Code::Deleted, DocumentError::Deleted.to_string())
            }
            ServerError::Document(DocumentError::Changed) => {
                Status::new(Code::Changed, DocumentError::Changed.to_string())
            }
            ServerError::Document(DocumentError::BadRequest(message)) => {
                Status::bad_request(message.clone())
            }
            _ => Status::internal(),
        }
    }
}

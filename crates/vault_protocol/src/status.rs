//! Wire-level error taxonomy.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Status code carried by a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Code {
    /// No such document for this owner.
    NotFound,
    /// The document is a tombstone and cannot be mutated.
    Deleted,
    /// The submitted serial is older than the stored one.
    Changed,
    /// A required field is missing or malformed.
    BadRequest,
    /// A unique resource (login) already exists.
    AlreadyExists,
    /// Missing, invalid, expired or rejected session.
    Unauthenticated,
    /// Transport or backing store unreachable.
    Unavailable,
    /// Unclassified server failure.
    Internal,
}

impl Code {
    /// Returns the code name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Code::NotFound => "not found",
            Code::Deleted => "deleted",
            Code::Changed => "changed",
            Code::BadRequest => "bad request",
            Code::AlreadyExists => "already exists",
            Code::Unauthenticated => "unauthenticated",
            Code::Unavailable => "unavailable",
            Code::Internal => "internal",
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed call: code plus a client-safe message.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct Status {
    /// Status code.
    pub code: Code,
    /// Human readable message. Never carries storage details.
    pub message: String,
}

impl Status {
    /// Creates a status.
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Shorthand for an `Unauthenticated` status.
    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(Code::Unauthenticated, message)
    }

    /// Shorthand for a `BadRequest` status.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(Code::BadRequest, message)
    }

    /// Shorthand for the generic `Internal` status.
    pub fn internal() -> Self {
        Self::new(Code::Internal, "server error")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_display() {
        let status = Status::new(Code::Changed, "document server version mismatch");
        assert_eq!(
            status.to_string(),
            "changed: document server version mismatch"
        );
    }
}

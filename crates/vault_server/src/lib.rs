//! # Vault Server
//!
//! Synchronization and consistency core of the vault sync service.
//!
//! This crate provides:
//! - A batched, monotonic serial allocator ([`SerialAllocator`])
//! - Per-owner write serialization ([`WriteQueue`])
//! - One optimistic-concurrency [`DocumentController`] per document kind
//! - The snapshot-bounded, multi-kind update feed ([`UpdateMerger`])
//! - HMAC-SHA256 bearer tokens, the request [`Gate`] and [`Accounts`]
//! - Chunked file upload assembly ([`FileUpload`])
//! - The [`VaultServer`] facade mapping every failure to a wire status
//!
//! # Consistency
//!
//! There are no database transactions. Lost updates are prevented by
//! holding the owner's write reservation across the read-validate-write
//! sequence and by fencing on the stored serial: a client whose serial is
//! older than the stored one gets `Changed` and must sync before retrying.
//!
//! ```rust,ignore
//! use vault_server::{ServerConfig, VaultServer};
//! use vault_protocol::{Document, LoginRequest, Note, Update};
//!
//! let (server, _store) = VaultServer::in_memory(ServerConfig::default());
//! let token = server.register(LoginRequest::new("alice", "pw")).await?;
//! let id = server
//!     .add_document(&token, Update::Note(Document::new("todo", Note::new("milk"))))
//!     .await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod accounts;
mod auth;
mod config;
mod documents;
mod error;
mod files;
mod queue;
mod serial;
mod server;
mod updates;

pub use accounts::Accounts;
pub use auth::{Gate, Principal, TokenIssuer, MIN_KEY_LEN};
pub use config::ServerConfig;
pub use documents::{Controlled, DocumentController, Documents};
pub use error::{
    AuthError, AuthResult, DocumentError, DocumentResult, ServerError, ServerResult,
};
pub use files::{content_digest, FileStream, FileUpload};
pub use queue::{Reservation, WriteQueue};
pub use serial::SerialAllocator;
pub use server::{UpdateFeed, VaultServer};
pub use updates::{UpdateMerger, UpdateStream};

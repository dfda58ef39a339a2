//! # Vault Protocol
//!
//! Document model and wire types for the vault sync service.
//!
//! This crate provides:
//! - [`Document`] envelope and the four payload kinds ([`Note`],
//!   [`Credential`], [`Card`], [`File`])
//! - [`Update`], the tagged variant carried by the update feed
//! - Request/stream messages and the [`Status`] error taxonomy
//! - The bearer token layout ([`TokenClaims`])
//! - CBOR encoding/decoding
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

pub mod codec;
mod document;
mod messages;
mod status;
mod token;
mod update;

pub use codec::{CodecError, CodecResult};
pub use document::{
    Card, Credential, Document, DocumentKind, DocumentState, File, Meta, Note, Payload,
};
pub use messages::{
    BearerToken, DocumentRequest, FileChunk, FileStreamMessage, LoginRequest, UpdateFrame,
    UpdateRequest, CHUNK_SIZE, MAX_FILE_SIZE,
};
pub use status::{Code, Status};
pub use token::{unix_millis, TokenClaims, SIGNATURE_LEN};
pub use update::Update;

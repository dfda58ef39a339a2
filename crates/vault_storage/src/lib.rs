//! # Vault Storage
//!
//! Storage port and in-memory backend for the vault sync service.
//!
//! The server consumes storage only through the traits in this crate:
//! - [`DocumentStore`]: add/get/modify plus an owner-scoped, serial-bounded
//!   streaming read, one instance per document kind
//! - [`SerialSource`]: the backing counter behind the serial allocator
//! - [`UserStore`]: account lookup for register/login
//!
//! [`MemoryStore`] implements all of them and is suitable for tests and
//! ephemeral deployments.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod error;
mod memory;
mod port;
mod user;

pub use error::{StorageError, StorageResult};
pub use memory::{MemoryCollection, MemoryCounter, MemoryStore, MemoryUsers};
pub use port::{DocumentStore, Ports, SerialSource, UpdateSink, UserStore};
pub use user::UserRecord;

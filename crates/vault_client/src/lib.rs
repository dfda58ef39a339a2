//! # Vault Client
//!
//! Client side of the vault sync service.
//!
//! This crate provides:
//! - [`VaultTransport`], the call surface of a vault server, with an
//!   in-process [`LoopbackTransport`] and a scripted [`MockTransport`]
//! - [`Session`], which keeps the bearer token alive with a cancellable
//!   background refresh task
//! - [`LocalCache`] and the [`Reconciler`] that pulls the update feed into it,
//!   coalescing concurrent syncs
//! - The [`VaultClient`] facade tying them together
//!
//! The server is the single source of truth. The client never merges
//! conflicting edits: a stale save fails with `Changed`, the user syncs and
//! retries.
//!
//! ```rust,ignore
//! use vault_client::{ClientConfig, LoopbackTransport, VaultClient};
//! use vault_protocol::{Document, Note};
//!
//! let client = VaultClient::new(Arc::new(LoopbackTransport::new(server)), ClientConfig::default());
//! client.login("alice", "pw").await?;
//! client.add(Document::new("todo", Note::new("milk"))).await?;
//! client.update().await?;
//! let notes = client.list::<Note>();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod cache;
mod client;
mod config;
mod error;
mod loopback;
mod reconciler;
mod session;
mod transport;

pub use cache::LocalCache;
pub use client::VaultClient;
pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};
pub use loopback::LoopbackTransport;
pub use reconciler::Reconciler;
pub use session::{Session, SessionState};
pub use transport::{FrameStream, MockTransport, RefreshReply, VaultTransport};

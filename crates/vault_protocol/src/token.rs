//! Bearer token layout.
//!
//! ## Token Format
//!
//! - CBOR-encoded [`TokenClaims`]
//! - 32 bytes: HMAC-SHA256 of the claims bytes
//!
//! Only the server can verify a token. Clients read the claims unverified to
//! learn when to refresh.

use crate::codec::{self, CodecError, CodecResult};
use crate::messages::BearerToken;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Length of the trailing signature.
pub const SIGNATURE_LEN: usize = 32;

/// Claims carried by a bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Authenticated user id.
    pub subject: String,
    /// Stable across refreshes of one login.
    pub session_id: String,
    /// Unique per issuance.
    pub token_id: String,
    /// Issue time, unix millis.
    pub issued_at: u64,
    /// Expiry time, unix millis.
    pub expires_at: u64,
}

impl TokenClaims {
    /// Splits a token into claims bytes and signature.
    ///
    /// # Errors
    ///
    /// Returns a decode error if the token is too short to carry both.
    pub fn split(token: &[u8]) -> CodecResult<(&[u8], &[u8])> {
        if token.len() <= SIGNATURE_LEN {
            return Err(CodecError::Decode("token too short".into()));
        }
        Ok(token.split_at(token.len() - SIGNATURE_LEN))
    }

    /// Reads the claims of a token without checking its signature.
    ///
    /// # Errors
    ///
    /// Returns a decode error for malformed tokens.
    pub fn peek(token: &BearerToken) -> CodecResult<Self> {
        let (claims, _) = Self::split(token.as_bytes())?;
        codec::decode(claims)
    }

    /// Returns the expiry as a wall-clock time.
    pub fn expires_at_time(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.expires_at)
    }
}

/// Converts a wall-clock time to unix millis, clamping pre-epoch times to 0.
pub fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

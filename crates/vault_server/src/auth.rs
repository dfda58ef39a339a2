//! Token issuance and the request gate.
//!
//! Tokens are HMAC-SHA256 signed CBOR claims (see
//! [`TokenClaims`](vault_protocol::TokenClaims)). Validation is stateless:
//! the server keeps no session table, so any replica holding the key can
//! admit a request.

use crate::error::{AuthError, AuthResult};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use uuid::Uuid;
use vault_protocol::{codec, unix_millis, BearerToken, TokenClaims};
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// Keys shorter than this are replaced by a random key.
pub const MIN_KEY_LEN: usize = 8;

const GENERATED_KEY_LEN: usize = 64;

/// Mints and verifies bearer tokens.
pub struct TokenIssuer {
    key: Zeroizing<Vec<u8>>,
    ttl: Duration,
}

impl TokenIssuer {
    /// Creates an issuer.
    ///
    /// A key shorter than [`MIN_KEY_LEN`] is replaced by a random 64-byte
    /// key, which invalidates tokens across restarts.
    pub fn new(key: &[u8], ttl: Duration) -> Self {
        let key = if key.len() < MIN_KEY_LEN {
            tracing::warn!("token key too short, generating a random key");
            let mut generated = Zeroizing::new(vec![0u8; GENERATED_KEY_LEN]);
            rand::thread_rng().fill_bytes(&mut generated);
            generated
        } else {
            Zeroizing::new(key.to_vec())
        };
        Self { key, ttl }
    }

    /// Returns the token lifetime.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issues a token for a new session of `subject`.
    ///
    /// # Errors
    ///
    /// Returns an error if the claims cannot be encoded or signed.
    pub fn issue(&self, subject: &str) -> AuthResult<(BearerToken, TokenClaims)> {
        let session_id = Uuid::new_v4().to_string();
        self.mint(subject, &session_id)
    }

    /// Issues a successor token for the same session, with a new token id
    /// and expiry.
    ///
    /// # Errors
    ///
    /// Returns an error if the claims cannot be encoded or signed.
    pub fn reissue(&self, claims: &TokenClaims) -> AuthResult<(BearerToken, TokenClaims)> {
        self.mint(&claims.subject, &claims.session_id)
    }

    fn mint(&self, subject: &str, session_id: &str) -> AuthResult<(BearerToken, TokenClaims)> {
        let issued_at = unix_millis(SystemTime::now());
        let ttl = u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX);
        let claims = TokenClaims {
            subject: subject.to_owned(),
            session_id: session_id.to_owned(),
            token_id: Uuid::new_v4().to_string(),
            issued_at,
            expires_at: issued_at.saturating_add(ttl),
        };

        let mut token = codec::encode(&claims)?;
        let signature = self.mac()?.chain_update(&token).finalize().into_bytes();
        token.extend_from_slice(&signature);
        Ok((BearerToken::new(token), claims))
    }

    /// Verifies signature, expiry and required claims.
    ///
    /// # Errors
    ///
    /// Returns the matching [`AuthError`] for empty, malformed, badly signed,
    /// expired or incomplete tokens.
    pub fn verify(&self, token: &BearerToken) -> AuthResult<TokenClaims> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        let (claims_bytes, signature) =
            TokenClaims::split(token.as_bytes()).map_err(|_| AuthError::Malformed)?;

        self.mac()?
            .chain_update(claims_bytes)
            .verify_slice(signature)
            .map_err(|_| AuthError::BadSignature)?;

        let claims: TokenClaims = codec::decode(claims_bytes).map_err(|_| AuthError::Malformed)?;
        if unix_millis(SystemTime::now()) >= claims.expires_at {
            return Err(AuthError::Expired);
        }
        if claims.subject.is_empty() || claims.session_id.is_empty() {
            return Err(AuthError::MissingClaims);
        }
        Ok(claims)
    }

    fn mac(&self) -> AuthResult<HmacSha256> {
        HmacSha256::new_from_slice(&self.key).map_err(|_| AuthError::SigningKey)
    }
}

impl fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

/// Identity attached to an admitted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// User id; becomes the owner of every document touched by the call.
    pub subject: String,
    /// Session the token belongs to.
    pub session_id: String,
}

/// Admits or rejects calls by their bearer token.
#[derive(Debug, Clone)]
pub struct Gate {
    issuer: Arc<TokenIssuer>,
}

impl Gate {
    /// Creates a gate backed by `issuer`.
    pub fn new(issuer: Arc<TokenIssuer>) -> Self {
        Self { issuer }
    }

    /// Admits a call.
    ///
    /// # Errors
    ///
    /// Fails for missing, malformed, badly signed, expired or incomplete
    /// tokens.
    pub fn admit(&self, token: &BearerToken) -> AuthResult<Principal> {
        match self.issuer.verify(token) {
            Ok(claims) => Ok(Principal {
                subject: claims.subject,
                session_id: claims.session_id,
            }),
            Err(err) => {
                tracing::debug!(error = %err, "request rejected");
                Err(err)
            }
        }
    }
}

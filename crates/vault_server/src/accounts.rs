//! Register, login and token refresh.

use crate::auth::TokenIssuer;
use crate::error::{AuthError, AuthResult};
use argon2::password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand::RngCore;
use std::sync::Arc;
use tracing::{info, warn};
use vault_protocol::BearerToken;
use vault_storage::{StorageError, UserRecord, UserStore};
use zeroize::Zeroizing;

const SALT_LEN: usize = 16;

/// Account controller.
pub struct Accounts {
    users: Arc<dyn UserStore>,
    issuer: Arc<TokenIssuer>,
}

impl Accounts {
    /// Creates an account controller.
    pub fn new(users: Arc<dyn UserStore>, issuer: Arc<TokenIssuer>) -> Self {
        Self { users, issuer }
    }

    /// Creates an account and opens a session for it.
    ///
    /// # Errors
    ///
    /// `EmptyCredentials` for an empty login or password, `LoginTaken` if
    /// the login exists.
    pub async fn register(&self, login: &str, password: &str) -> AuthResult<BearerToken> {
        if login.is_empty() || password.is_empty() {
            return Err(AuthError::EmptyCredentials);
        }

        let password_hash = hash_password(password).await?;

        let user = self
            .users
            .add_user(UserRecord::new(login, password_hash))
            .await
            .map_err(|err| match err {
                StorageError::Duplicate(_) => AuthError::LoginTaken(login.to_owned()),
                other => AuthError::Storage(other),
            })?;

        let (token, claims) = self.issuer.issue(&user.id)?;
        info!(user = %user.id, session_id = %claims.session_id, "user registered");
        Ok(token)
    }

    /// Opens a new session for an existing account.
    ///
    /// # Errors
    ///
    /// `InvalidCredentials` for unknown logins and wrong passwords alike.
    pub async fn login(&self, login: &str, password: &str) -> AuthResult<BearerToken> {
        if login.is_empty() || password.is_empty() {
            return Err(AuthError::EmptyCredentials);
        }

        let user = match self.users.get_user_by_login(login).await {
            Ok(user) => user,
            Err(StorageError::NotFound) => {
                warn!("login for unknown user");
                return Err(AuthError::InvalidCredentials);
            }
            Err(err) => return Err(AuthError::Storage(err)),
        };

        if !verify_password(password, user.password_hash.clone()).await? {
            warn!(user = %user.id, "wrong password");
            return Err(AuthError::InvalidCredentials);
        }

        let (token, claims) = self.issuer.issue(&user.id)?;
        info!(user = %user.id, session_id = %claims.session_id, "user logged in");
        Ok(token)
    }

    /// Exchanges a valid token for a successor in the same session.
    ///
    /// # Errors
    ///
    /// Any token validation failure.
    pub fn refresh(&self, token: &BearerToken) -> AuthResult<BearerToken> {
        let claims = self.issuer.verify(token)?;
        let (token, renewed) = self.issuer.reissue(&claims)?;
        info!(user = %renewed.subject, session_id = %renewed.session_id, "token refreshed");
        Ok(token)
    }
}

/// Hashes a password with Argon2id and a fresh salt, returning the PHC string.
///
/// Hashing is CPU bound and runs on the blocking pool.
async fn hash_password(password: &str) -> AuthResult<String> {
    let password = Zeroizing::new(password.to_owned());
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);

    tokio::task::spawn_blocking(move || {
        let salt = SaltString::encode_b64(&salt).map_err(hash_error)?;
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(hash_error)
    })
    .await
    .map_err(|err| AuthError::PasswordHash(err.to_string()))?
}

/// Checks a password against a stored PHC string.
///
/// A mismatch is `Ok(false)`; an unreadable hash is an error.
async fn verify_password(password: &str, stored: String) -> AuthResult<bool> {
    let password = Zeroizing::new(password.to_owned());
    let stored = Zeroizing::new(stored);

    tokio::task::spawn_blocking(move || {
        let hash = PasswordHash::new(&stored).map_err(hash_error)?;
        match Argon2::default().verify_password(password.as_bytes(), &hash) {
            Ok(()) => Ok(true),
            Err(password_hash::Error::Password) => Ok(false),
            Err(err) => Err(hash_error(err)),
        }
    })
    .await
    .map_err(|err| AuthError::PasswordHash(err.to_string()))?
}

fn hash_error(err: password_hash::Error) -> AuthError {
    AuthError::PasswordHash(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use vault_storage::MemoryUsers;

    fn accounts() -> (Arc<MemoryUsers>, Arc<TokenIssuer>, Accounts) {
        let users = Arc::new(MemoryUsers::new());
        let issuer = Arc::new(TokenIssuer::new(
            b"accounts-test-key",
            Duration::from_secs(7200),
        ));
        let accounts = Accounts::new(users.clone(), issuer.clone());
        (users, issuer, accounts)
    }

    #[tokio::test]
    async fn register_then_login() {
        let (users, issuer, accounts) = accounts();
        let token = accounts.register("alice", "correct horse").await.unwrap();
        let user_id = issuer.verify(&token).unwrap().subject;

        let stored = users.get_user_by_login("alice").await.unwrap();
        assert_eq!(stored.id, user_id);
        assert!(stored.password_hash.starts_with("$argon2id$"));
        assert!(!stored.password_hash.contains("correct horse"));

        let token = accounts.login("alice", "correct horse").await.unwrap();
        assert_eq!(issuer.verify(&token).unwrap().subject, user_id);
    }

    #[tokio::test]
    async fn duplicate_login_is_rejected() {
        let (_, _, accounts) = accounts();
        accounts.register("alice", "pw").await.unwrap();
        assert!(matches!(
            accounts.register("alice", "other").await,
            Err(AuthError::LoginTaken(_))
        ));
    }

    #[tokio::test]
    async fn empty_credentials_are_bad_requests() {
        let (_, _, accounts) = accounts();
        assert!(matches!(
            accounts.register("", "pw").await,
            Err(AuthError::EmptyCredentials)
        ));
        assert!(matches!(
            accounts.register("alice", "").await,
            Err(AuthError::EmptyCredentials)
        ));
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_user_look_alike() {
        let (_, _, accounts) = accounts();
        accounts.register("alice", "pw").await.unwrap();

        let wrong = accounts.login("alice", "nope").await.unwrap_err();
        let unknown = accounts.login("bob", "pw").await.unwrap_err();
        assert!(matches!(wrong, AuthError::InvalidCredentials));
        assert!(matches!(unknown, AuthError::InvalidCredentials));
        assert_eq!(wrong.to_string(), unknown.to_string());
    }

    #[tokio::test]
    async fn refresh_keeps_the_session() {
        let (_, issuer, accounts) = accounts();
        let token = accounts.register("alice", "pw").await.unwrap();
        let before = issuer.verify(&token).unwrap();

        let renewed = accounts.refresh(&token).unwrap();
        let after = issuer.verify(&renewed).unwrap();
        assert_eq!(after.session_id, before.session_id);
        assert_ne!(after.token_id, before.token_id);

        let forged = accounts.refresh(&BearerToken::new(vec![0u8; 40])).unwrap_err();
        assert!(forged.is_unauthenticated());
    }

    #[tokio::test]
    async fn same_password_gets_distinct_hashes() {
        let (users, _, accounts) = accounts();
        accounts.register("alice", "shared").await.unwrap();
        accounts.register("bob", "shared").await.unwrap();

        let alice = users.get_user_by_login("alice").await.unwrap();
        let bob = users.get_user_by_login("bob").await.unwrap();
        assert_ne!(alice.password_hash, bob.password_hash);

        let hash = PasswordHash::new(&alice.password_hash).unwrap();
        assert_eq!(hash.algorithm, argon2::ARGON2ID_IDENT);
        assert!(hash.salt.is_some());
    }

    #[tokio::test]
    async fn unreadable_stored_hash_is_not_a_wrong_password() {
        let (users, _, accounts) = accounts();
        users
            .add_user(UserRecord::new("mallory", "not a phc string"))
            .await
            .unwrap();

        let err = accounts.login("mallory", "pw").await.unwrap_err();
        assert!(matches!(err, AuthError::PasswordHash(_)));
        assert!(!err.is_unauthenticated());
    }
}

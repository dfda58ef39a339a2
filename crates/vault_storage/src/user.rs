//! User account records.

use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A stored user account.
///
/// The password itself is never stored; `password_hash` is a PHC string
/// (algorithm, parameters, salt and hash) produced by the server's account
/// controller.
#[derive(Clone, PartialEq, Eq, Default, Zeroize, ZeroizeOnDrop)]
pub struct UserRecord {
    /// User identifier, assigned by the store on insert.
    pub id: String,
    /// Unique login.
    pub login: String,
    /// Password hash in PHC string format.
    pub password_hash: String,
}

impl UserRecord {
    /// Creates a record that has not been stored yet.
    pub fn new(login: impl Into<String>, password_hash: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            login: login.into(),
            password_hash: password_hash.into(),
        }
    }
}

impl fmt::Debug for UserRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserRecord")
            .field("id", &self.id)
            .field("login", &self.login)
            .finish_non_exhaustive()
    }
}

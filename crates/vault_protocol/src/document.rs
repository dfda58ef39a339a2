//! Document envelope and payload kinds.
//!
//! Every vault item shares one envelope ([`Document`]) carrying identity,
//! ownership, the global serial and the lifecycle state. The kind-specific
//! fields live in the payload type parameter.

use crate::update::Update;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a stored document.
///
/// On the wire the state is the literal string `"Active"` or `"Deleted"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DocumentState {
    /// Live document.
    #[default]
    Active,
    /// Tombstone. Terminal: no further mutation is accepted.
    Deleted,
}

impl DocumentState {
    /// Returns the wire name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentState::Active => "Active",
            DocumentState::Deleted => "Deleted",
        }
    }

    /// Returns true for tombstones.
    pub fn is_deleted(&self) -> bool {
        matches!(self, DocumentState::Deleted)
    }
}

impl fmt::Display for DocumentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discriminator of the four document kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DocumentKind {
    /// Free text note.
    Note,
    /// Login/password pair.
    Credential,
    /// Payment card.
    Card,
    /// Binary file.
    File,
}

impl DocumentKind {
    /// All kinds, in feed order.
    pub const ALL: [DocumentKind; 4] = [
        DocumentKind::Note,
        DocumentKind::Credential,
        DocumentKind::Card,
        DocumentKind::File,
    ];

    /// Returns a lower-case name suitable for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Note => "note",
            DocumentKind::Credential => "credential",
            DocumentKind::Card => "card",
            DocumentKind::File => "file",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A free-form key/value pair attached to a document.
///
/// Keys are not unique; order is preserved.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Meta {
    /// Key.
    pub key: String,
    /// Value.
    pub value: String,
}

impl Meta {
    /// Creates a metadata pair.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// The envelope shared by all document kinds.
///
/// # Fields
///
/// - `id`: server-assigned identifier, empty until first persisted
/// - `owner_id`: owning user, always taken from the authenticated session
/// - `serial`: version/ordering number drawn from the global allocator
/// - `state`: `Active` or `Deleted`
/// - `name`: display name, kept on tombstones
/// - `metadata`: ordered free-form pairs
/// - `payload`: kind-specific fields
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Document<P> {
    /// Document identifier.
    pub id: String,
    /// Owning user identifier.
    pub owner_id: String,
    /// Version/ordering serial.
    pub serial: u64,
    /// Lifecycle state.
    pub state: DocumentState,
    /// Display name.
    pub name: String,
    /// Ordered metadata pairs.
    pub metadata: Vec<Meta>,
    /// Kind-specific payload.
    pub payload: P,
}

impl<P: Payload> Document<P> {
    /// Creates a new, not yet persisted document.
    pub fn new(name: impl Into<String>, payload: P) -> Self {
        Self {
            id: String::new(),
            owner_id: String::new(),
            serial: 0,
            state: DocumentState::Active,
            name: name.into(),
            metadata: Vec::new(),
            payload,
        }
    }

    /// Appends a metadata pair.
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push(Meta::new(key, value));
        self
    }

    /// Sets the identifier.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Sets the serial the caller last observed.
    pub fn with_serial(mut self, serial: u64) -> Self {
        self.serial = serial;
        self
    }

    /// Returns the kind of this document.
    pub fn kind(&self) -> DocumentKind {
        P::KIND
    }

    /// Builds the tombstone for this document carrying `serial`.
    ///
    /// Only identity, owner, name, serial and state survive.
    pub fn tombstone(&self, serial: u64) -> Self {
        Self {
            id: self.id.clone(),
            owner_id: self.owner_id.clone(),
            serial,
            state: DocumentState::Deleted,
            name: self.name.clone(),
            metadata: Vec::new(),
            payload: P::default(),
        }
    }

    /// Checks the fields every request must carry.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.name.is_empty() {
            return Err("name is empty");
        }
        self.payload.validate()
    }
}

/// Kind-specific payload of a [`Document`].
///
/// Implemented by [`Note`], [`Credential`], [`Card`] and [`File`]. The
/// document controller is generic over this trait so that all kinds share one
/// validation and fencing algorithm.
pub trait Payload:
    Clone + Default + fmt::Debug + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// The discriminator of this payload kind.
    const KIND: DocumentKind;

    /// Wraps a document of this kind into the update sum type.
    fn into_update(doc: Document<Self>) -> Update;

    /// Extracts a document of this kind from an update.
    fn from_update(update: Update) -> Option<Document<Self>>;

    /// Checks kind-specific required fields.
    fn validate(&self) -> Result<(), &'static str> {
        Ok(())
    }

    /// Returns true when `submitted` carries the same body as `stored`, so
    /// only the envelope needs to be rewritten.
    fn same_body(_stored: &Self, _submitted: &Self) -> bool {
        false
    }

    /// Returns the representation delivered through the update feed.
    fn feed_view(&self) -> Self {
        self.clone()
    }
}

/// A free text note.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Note {
    /// Note text.
    pub text: String,
}

impl Note {
    /// Creates a note payload.
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// A login/password pair.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Credential {
    /// Login.
    pub login: String,
    /// Password.
    pub password: String,
}

impl Credential {
    /// Creates a credential payload.
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Payment card data.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Card {
    /// Card holder name.
    pub cardholder: String,
    /// Card number.
    pub number: String,
    /// Expiry, as printed.
    pub expires: String,
    /// PIN.
    pub pin: String,
    /// Security code.
    pub code: String,
}

impl fmt::Debug for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Card")
            .field("cardholder", &self.cardholder)
            .field("expires", &self.expires)
            .finish_non_exhaustive()
    }
}

/// A stored file.
///
/// `size` and `digest` are computed by the server from the uploaded bytes.
/// Documents delivered through the update feed carry an empty `data`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct File {
    /// Original file name.
    pub filename: String,
    /// Size in bytes.
    pub size: u64,
    /// Lower-case hex SHA-256 of the content.
    pub digest: String,
    /// Content bytes.
    pub data: Bytes,
}

impl File {
    /// Creates a file payload with only the file name set.
    pub fn named(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            ..Self::default()
        }
    }

    /// Returns a copy without the content bytes.
    pub fn info(&self) -> Self {
        Self {
            filename: self.filename.clone(),
            size: self.size,
            digest: self.digest.clone(),
            data: Bytes::new(),
        }
    }
}

impl Payload for Note {
    const KIND: DocumentKind = DocumentKind::Note;

    fn into_update(doc: Document<Self>) -> Update {
        Update::Note(doc)
    }

    fn from_update(update: Update) -> Option<Document<Self>> {
        match update {
            Update::Note(doc) => Some(doc),
            _ => None,
        }
    }
}

impl Payload for Credential {
    const KIND: DocumentKind = DocumentKind::Credential;

    fn into_update(doc: Document<Self>) -> Update {
        Update::Credential(doc)
    }

    fn from_update(update: Update) -> Option<Document<Self>> {
        match update {
            Update::Credential(doc) => Some(doc),
            _ => None,
        }
    }
}

impl Payload for Card {
    const KIND: DocumentKind = DocumentKind::Card;

    fn into_update(doc: Document<Self>) -> Update {
        Update::Card(doc)
    }

    fn from_update(update: Update) -> Option<Document<Self>> {
        match update {
            Update::Card(doc) => Some(doc),
            _ => None,
        }
    }
}

impl Payload for File {
    const KIND: DocumentKind = DocumentKind::File;

    fn into_update(doc: Document<Self>) -> Update {
        Update::File(doc)
    }

    fn from_update(update: Update) -> Option<Document<Self>> {
        match update {
            Update::File(doc) => Some(doc),
            _ => None,
        }
    }

    fn validate(&self) -> Result<(), &'static str> {
        if self.filename.is_empty() {
            return Err("filename is empty");
        }
        Ok(())
    }

    fn same_body(stored: &Self, submitted: &Self) -> bool {
        !stored.digest.is_empty() && stored.digest == submitted.digest
    }

    fn feed_view(&self) -> Self {
        self.info()
    }
}

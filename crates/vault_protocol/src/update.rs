//! The multi-kind update feed item.

use crate::document::{Card, Credential, Document, DocumentKind, DocumentState, File, Note};
use serde::{Deserialize, Serialize};

/// One document of any kind, as delivered by the update stream.
///
/// Consumers switch on the variant (or on [`Update::kind`]) instead of
/// inspecting types at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Update {
    /// A note.
    Note(Document<Note>),
    /// A credential.
    Credential(Document<Credential>),
    /// A card.
    Card(Document<Card>),
    /// File info (without content bytes).
    File(Document<File>),
}

macro_rules! envelope {
    ($self:ident, $doc:ident => $expr:expr) => {
        match $self {
            Update::Note($doc) => $expr,
            Update::Credential($doc) => $expr,
            Update::Card($doc) => $expr,
            Update::File($doc) => $expr,
        }
    };
}

impl Update {
    /// Returns the kind discriminator.
    pub fn kind(&self) -> DocumentKind {
        match self {
            Update::Note(_) => DocumentKind::Note,
            Update::Credential(_) => DocumentKind::Credential,
            Update::Card(_) => DocumentKind::Card,
            Update::File(_) => DocumentKind::File,
        }
    }

    /// Returns the document identifier.
    pub fn id(&self) -> &str {
        envelope!(self, doc => doc.id.as_str())
    }

    /// Returns the owner identifier.
    pub fn owner_id(&self) -> &str {
        envelope!(self, doc => doc.owner_id.as_str())
    }

    /// Returns the document serial.
    pub fn serial(&self) -> u64 {
        envelope!(self, doc => doc.serial)
    }

    /// Returns the lifecycle state.
    pub fn state(&self) -> DocumentState {
        envelope!(self, doc => doc.state)
    }

    /// Returns the display name.
    pub fn name(&self) -> &str {
        envelope!(self, doc => doc.name.as_str())
    }
}

impl From<Document<Note>> for Update {
    fn from(doc: Document<Note>) -> Self {
        Update::Note(doc)
    }
}

impl From<Document<Credential>> for Update {
    fn from(doc: Document<Credential>) -> Self {
        Update::Credential(doc)
    }
}

impl From<Document<Card>> for Update {
    fn from(doc: Document<Card>) -> Self {
        Update::Card(doc)
    }
}

impl From<Document<File>> for Update {
    fn from(doc: Document<File>) -> Self {
        Update::File(doc)
    }
}

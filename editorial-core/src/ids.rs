//! Identifiers and the polymorphic party reference.

use serde::{Deserialize, Serialize};

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

row_id!(
    /// A manuscript row.
    ManuscriptId
);
row_id!(
    /// A revision row.
    RevisionId
);
row_id!(
    /// A reviewer assignment on one revision.
    RevisionReviewerId
);
row_id!(
    /// A co-author assignment on one revision.
    RevisionAuthorId
);
row_id!(ReviewId);
row_id!(
    /// A registered account (author, reviewer, editor, ...).
    AuthorId
);
row_id!(
    /// An unverified party known only by name and email.
    GuestAuthorId
);

closed_set! {
    /// Discriminant of [`ReviewerRef`], as carried in signed links and rows.
    pub enum ReviewerKind {
        Registered => "author",
        Guest => "guest-author",
    }
}

/// A reviewer or co-author: either a registered account or a guest.
///
/// All lookups and notifications go through [`Contact`], whichever variant
/// the party is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "kebab-case")]
pub enum ReviewerRef {
    Registered(AuthorId),
    Guest(GuestAuthorId),
}

impl ReviewerRef {
    pub fn kind(&self) -> ReviewerKind {
        match self {
            ReviewerRef::Registered(_) => ReviewerKind::Registered,
            ReviewerRef::Guest(_) => ReviewerKind::Guest,
        }
    }

    /// Raw row id within the variant's table.
    pub fn raw_id(&self) -> i64 {
        match self {
            ReviewerRef::Registered(id) => id.0,
            ReviewerRef::Guest(id) => id.0,
        }
    }

    pub fn from_parts(kind: ReviewerKind, id: i64) -> Self {
        match kind {
            ReviewerKind::Registered => ReviewerRef::Registered(AuthorId(id)),
            ReviewerKind::Guest => ReviewerRef::Guest(GuestAuthorId(id)),
        }
    }

    pub fn as_registered(&self) -> Option<AuthorId> {
        match self {
            ReviewerRef::Registered(id) => Some(*id),
            ReviewerRef::Guest(_) => None,
        }
    }
}

impl From<AuthorId> for ReviewerRef {
    fn from(id: AuthorId) -> Self {
        ReviewerRef::Registered(id)
    }
}

impl From<GuestAuthorId> for ReviewerRef {
    fn from(id: GuestAuthorId) -> Self {
        ReviewerRef::Guest(id)
    }
}

impl std::fmt::Display for ReviewerRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.kind(), self.raw_id())
    }
}

/// Where a notification can be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub email: String,
}

impl Contact {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}

//! Repository abstraction for workflow persistence.
//!
//! [`WorkflowRepository`] stores manuscripts, revisions, assignments,
//! reviews and the audit trail; [`Directory`] resolves parties (registered
//! accounts and guests) to contacts. Both are implemented in memory and on
//! SQLite. Operations that must not interleave (opening a new revision
//! round, answering an invitation) are single repository calls so each
//! backend can make them atomic.

mod memory;
mod sqlite;

pub use memory::InMemoryRepository;
pub use sqlite::SqliteRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use editorial_core::{
    AuthorId, Contact, FileRef, GuestAuthorId, Manuscript, ManuscriptAggregate,
    ManuscriptId, ManuscriptType, Review, ReviewId, ReviewInput, ReviewerRef, Revision,
    RevisionAuthor, RevisionAuthorId, RevisionContent, RevisionEvent, RevisionId,
    RevisionReviewer, RevisionReviewerId, Section,
};
use thiserror::Error;

/// Errors from repository operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("storage error during {operation}: {message}")]
    Storage {
        operation: &'static str,
        message: String,
    },

    #[error("corrupt {what} in storage")]
    Corruption { what: String },

    #[error("{entity} {key} not found")]
    NotFound { entity: &'static str, key: String },

    /// A concurrent writer got there first (stale current revision, duplicate
    /// revision index, ...).
    #[error("conflicting update: {0}")]
    Conflict(String),
}

impl RepositoryError {
    pub fn storage(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Storage {
            operation,
            message: message.into(),
        }
    }

    pub fn corruption(what: impl Into<String>) -> Self {
        Self::Corruption { what: what.into() }
    }

    pub fn not_found(entity: &'static str, key: impl std::fmt::Display) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }
}

/// Whether soft-deleted parties take part in a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletedParties {
    Exclude,
    Include,
}

/// A registered account or guest as seen by the workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Party {
    pub party: ReviewerRef,
    pub contact: Contact,
    /// Registered accounts only.
    pub section: Option<Section>,
    pub deleted: bool,
}

/// Fields for a brand-new manuscript and its initial revision.
#[derive(Debug, Clone)]
pub struct NewManuscript {
    pub author_id: AuthorId,
    pub manuscript_type: ManuscriptType,
    pub research_areas: Vec<String>,
    pub copyright_form: Option<FileRef>,
    pub content: RevisionContent,
    pub minimum_reviews: u32,
    pub created_at: DateTime<Utc>,
}

/// Fields for a reviewer or co-author assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAssignment {
    pub revision_id: RevisionId,
    pub party: ReviewerRef,
    pub section: Option<Section>,
    pub created_by: Option<AuthorId>,
}

/// Everything that changes when an author opens a new revision round.
#[derive(Debug, Clone)]
pub struct RevisionRound {
    pub manuscript_id: ManuscriptId,
    /// Revision being replied to; must still be current when applied.
    pub previous: RevisionId,
    pub previous_index: u32,
    pub comment_reply: Option<String>,
    pub comment_reply_file: Option<FileRef>,
    pub content: RevisionContent,
    pub associate_editor_id: Option<AuthorId>,
    pub minimum_reviews: u32,
    /// Assignments copied onto the new revision (invitation state is not).
    pub carried_reviewers: Vec<NewAssignment>,
    pub actor: Option<AuthorId>,
    pub created_at: DateTime<Utc>,
}

/// How an invitation was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InviteResponse {
    Accept,
    Deny,
}

impl InviteResponse {
    pub fn as_str(self) -> &'static str {
        match self {
            InviteResponse::Accept => "accept",
            InviteResponse::Deny => "deny",
        }
    }
}

impl std::fmt::Display for InviteResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for InviteResponse {
    type Err = editorial_core::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accept" => Ok(InviteResponse::Accept),
            "deny" => Ok(InviteResponse::Deny),
            other => Err(editorial_core::ParseError::new("InviteResponse", other)),
        }
    }
}

/// A reviewer assignment picked up by a sweep, with enough context to
/// notify about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepCandidate {
    pub manuscript_id: ManuscriptId,
    pub assignment: RevisionReviewer,
}

/// Persistence for manuscripts and everything hanging off them.
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    // =========================================================================
    // Manuscripts and revisions
    // =========================================================================

    /// Insert a manuscript with revision 0 in `pending`, assign its code
    /// (`PMSL-YY-NNNN`, numbered per creation year) and append the opening
    /// status event.
    async fn create_manuscript(
        &self,
        new: NewManuscript,
    ) -> Result<ManuscriptAggregate, RepositoryError>;

    async fn load(&self, id: ManuscriptId)
        -> Result<Option<ManuscriptAggregate>, RepositoryError>;

    async fn find_by_code(&self, code: &str) -> Result<Option<ManuscriptId>, RepositoryError>;

    /// Overwrite the manuscript row. The current revision pointer is not
    /// touched here; only [`Self::create_revision_round`] moves it.
    async fn update_manuscript(&self, manuscript: &Manuscript) -> Result<(), RepositoryError>;

    /// Overwrite a revision's mutable fields (not its index or manuscript).
    async fn update_revision(&self, revision: &Revision) -> Result<(), RepositoryError>;

    /// Persist a status change and its audit row together.
    async fn record_status_change(
        &self,
        revision: &Revision,
        event: RevisionEvent,
    ) -> Result<(), RepositoryError>;

    /// Atomically: stamp the reply on the previous revision, insert the next
    /// revision (`previous_index + 1`, `submitted`), copy the carried
    /// reviewers, repoint the manuscript and append the status event.
    ///
    /// Fails with [`RepositoryError::Conflict`] if `previous` is no longer
    /// the current revision.
    async fn create_revision_round(&self, round: RevisionRound)
        -> Result<Revision, RepositoryError>;

    /// Audit trail of every revision of a manuscript, oldest first.
    async fn events(&self, manuscript: ManuscriptId)
        -> Result<Vec<RevisionEvent>, RepositoryError>;

    // =========================================================================
    // Reviewer and co-author assignments
    // =========================================================================

    /// Assign a reviewer. A party holds at most one assignment per
    /// revision; a second one fails with [`RepositoryError::Conflict`].
    async fn add_reviewer(&self, new: NewAssignment) -> Result<RevisionReviewer, RepositoryError>;

    /// Assign several reviewers at once. Either every assignment is stored
    /// or, on the first failure, none is.
    async fn add_reviewers(
        &self,
        batch: Vec<NewAssignment>,
    ) -> Result<Vec<RevisionReviewer>, RepositoryError>;

    /// Remove an assignment, but only if it belongs to `revision`.
    async fn remove_reviewer(
        &self,
        revision: RevisionId,
        id: RevisionReviewerId,
    ) -> Result<Option<RevisionReviewer>, RepositoryError>;

    /// Record one more invitation: bump `invite_count` in place, stamp
    /// `invited_at` and, when `by` is set, `invited_by`. Applied only while
    /// the invitation is unanswered; returns whether it was.
    async fn invite(
        &self,
        id: RevisionReviewerId,
        at: DateTime<Utc>,
        by: Option<AuthorId>,
    ) -> Result<bool, RepositoryError>;

    /// Bump `remind_count` in place. Applied only while the invitation is
    /// accepted; returns whether it was.
    async fn remind(&self, id: RevisionReviewerId) -> Result<bool, RepositoryError>;

    /// Answer an invitation with a single conditional write: applied only
    /// while neither `accepted_at` nor `denied_at` is set. Returns whether
    /// this call won.
    async fn resolve_invitation(
        &self,
        id: RevisionReviewerId,
        response: InviteResponse,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// Same uniqueness as [`Self::add_reviewer`]: one assignment per party
    /// per revision.
    async fn add_co_author(&self, new: NewAssignment) -> Result<RevisionAuthor, RepositoryError>;

    async fn remove_co_author(
        &self,
        revision: RevisionId,
        id: RevisionAuthorId,
    ) -> Result<Option<RevisionAuthor>, RepositoryError>;

    // =========================================================================
    // Reviews
    // =========================================================================

    /// Insert or update the review keyed by (revision, reviewer).
    async fn upsert_review(
        &self,
        revision: RevisionId,
        reviewer: ReviewerRef,
        input: ReviewInput,
        at: DateTime<Utc>,
    ) -> Result<Review, RepositoryError>;

    async fn update_review(&self, review: &Review) -> Result<(), RepositoryError>;

    async fn review(&self, id: ReviewId) -> Result<Option<Review>, RepositoryError>;

    // =========================================================================
    // Sweep queries
    // =========================================================================

    /// Open invitations (invited, unanswered) with `invite_count < cap` on
    /// a manuscript's current revision while it is `submitted`.
    async fn reinvite_candidates(&self, cap: u32)
        -> Result<Vec<SweepCandidate>, RepositoryError>;

    /// Accepted, not denied, `remind_count < cap`, on a current `submitted`
    /// revision, with no review yet from that reviewer on that revision.
    async fn remind_candidates(&self, cap: u32) -> Result<Vec<SweepCandidate>, RepositoryError>;

    /// Manuscripts whose current revision is rejected, withdrawn or deleted,
    /// was last updated before `cutoff`, and that still reference stored
    /// files.
    async fn retention_candidates(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ManuscriptId>, RepositoryError>;
}

/// Party lookup. Every query states whether soft-deleted parties count.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn party(
        &self,
        party: ReviewerRef,
        deleted: DeletedParties,
    ) -> Result<Option<Party>, RepositoryError>;

    /// Registered accounts first, then guests.
    async fn find_by_email(
        &self,
        email: &str,
        deleted: DeletedParties,
    ) -> Result<Option<Party>, RepositoryError>;

    /// Registered accounts only.
    async fn registered_by_email(&self, email: &str) -> Result<Option<Party>, RepositoryError>;

    async fn create_author(
        &self,
        contact: Contact,
        section: Section,
    ) -> Result<AuthorId, RepositoryError>;

    async fn create_guest(&self, contact: Contact) -> Result<GuestAuthorId, RepositoryError>;

    /// Mark a guest deleted, e.g. once they register an account.
    async fn soft_delete_guest(&self, id: GuestAuthorId) -> Result<(), RepositoryError>;
}

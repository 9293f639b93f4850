//! Errors returned by workflow operations.

use editorial_core::{Action, Status};
use thiserror::Error;

use super::repository::RepositoryError;
use crate::storage::StorageError;

/// A business rule the request broke. The message is shown to the user;
/// nothing was mutated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleViolation {
    // ===== reviewer candidates =====
    #[error("Reviewer not found.")]
    ReviewerNotFound,
    #[error("Corresponding author can not added as reviewer.")]
    CorrespondingAuthorAsReviewer,
    #[error("Co author can not added as reviewer.")]
    CoAuthorAsReviewer,
    #[error("Reviewer can not added twice.")]
    ReviewerTwice,
    #[error("Associate editor can not added as reviewer.")]
    AssociateEditorAsReviewer,

    // ===== co-author candidates =====
    #[error("Author not found.")]
    AuthorNotFound,
    #[error("Corresponding author can not added as co-author.")]
    CorrespondingAuthorAsCoAuthor,
    #[error("Co-author can not added twice.")]
    CoAuthorTwice,
    #[error("Reviewer can not added as co-author.")]
    ReviewerAsCoAuthor,
    #[error("Associate editor can not added as co-author.")]
    AssociateEditorAsCoAuthor,

    // ===== stage guards =====
    #[error("Manuscript is already {status}; no further changes are possible.")]
    Concluded { status: Status },
    #[error("Only a pending manuscript can be submitted.")]
    NotPending,
    #[error("Manuscript is not waiting for a revision.")]
    NotUnderRevision,
    #[error("Manuscript is not conditionally accepted.")]
    NotConditionallyAccepted,
    #[error("There is no previous revision to reply to.")]
    NoPreviousRevision,
    #[error("The associate editor does not exist.")]
    NotAssociateEditor,
    #[error("{action} is not possible while the manuscript is {status}.")]
    WrongStage { action: Action, status: Status },
    #[error("No reviewer has been invited to this revision.")]
    NoInvitation,
    #[error("Reviewer has not accepted the invitation.")]
    ReviewerNotAccepted,
    #[error("Reviewer has already answered the invitation.")]
    InvitationAnswered,
    #[error("Missing required file: {0}.")]
    MissingFile(&'static str),
    #[error("Similarity must be a percentage between 0 and 100.")]
    SimilarityOutOfRange,
}

/// Errors from the workflow service.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("{0}")]
    Rejected(#[from] RuleViolation),

    #[error("{action} is not permitted here")]
    NotPermitted { action: Action },

    #[error("{entity} {key} not found")]
    NotFound { entity: &'static str, key: String },

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl WorkflowError {
    pub fn not_found(entity: &'static str, key: impl std::fmt::Display) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }
}

//! Domain model and pure workflow rules for the manuscript editorial service.
//!
//! Nothing in this crate performs I/O. The server crate owns persistence,
//! notification dispatch and scheduling; the CLI reuses the permission table
//! and enums for offline inspection.

#[macro_use]
mod closed_set;

pub mod action;
pub mod clock;
pub mod error;
pub mod filter;
pub mod ids;
pub mod invitation;
pub mod labels;
pub mod model;
pub mod permissions;
pub mod section;
pub mod status;

pub use action::Action;
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::ParseError;
pub use filter::{Filter, Viewer};
pub use ids::{
    AuthorId, Contact, GuestAuthorId, ManuscriptId, ReviewId, ReviewerKind, ReviewerRef,
    RevisionAuthorId, RevisionId, RevisionReviewerId,
};
pub use invitation::{Invitation, InvitationState, SweepPolicy};
pub use model::{
    AggregateError, FileRef, Manuscript, ManuscriptAggregate, ProductionChecks, ProductionFiles,
    Review, ReviewInput, Revision, RevisionAuthor, RevisionContent, RevisionEvent,
    RevisionReviewer, DEFAULT_MINIMUM_REVIEWS,
};
pub use permissions::{allowed_actions, permitted_actions, ACTION_TABLE};
pub use section::Section;
pub use status::{EventKind, ManuscriptType, ReviewDecision, Status};

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

/// Short git hash of the build, or "unknown".
pub fn get_service_version() -> String {
    let hash = option_env!("EDITORIAL_GIT_HASH").or(built_info::GIT_COMMIT_HASH);
    match hash {
        Some(hash) if hash.len() >= 8 => hash[..8].to_string(),
        Some(hash) => hash.to_string(),
        None => "unknown".to_string(),
    }
}

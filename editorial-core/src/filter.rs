//! Listing filters and the predicates behind them.
//!
//! A filter names a slice of the manuscript list as seen by one account
//! ("invite", "with-eic", ...). Which actions are offered depends on which
//! filters a manuscript currently falls under, so the predicates here are
//! the ground truth for the permission gate as well as for listings.

use serde::{Deserialize, Serialize};

use crate::ids::{AuthorId, ReviewerRef};
use crate::model::ManuscriptAggregate;
use crate::section::Section;
use crate::status::Status;

closed_set! {
    pub enum Filter {
        Pending => "pending",
        Submitted => "submitted",
        Withdrawn => "withdrawn",
        Deleted => "deleted",
        Rejected => "rejected",
        ConditionallyAccepted => "conditionally-accepted",
        Accepted => "accepted",
        Production => "production",
        Publication => "publication",
        Published => "published",
        Invite => "invite",
        Invited => "invited",
        Review => "review",
        Reviewed => "reviewed",
        UnderRevision => "under-revision",
        UnderReview => "under-review",
        WithAe => "with-ae",
        WithEic => "with-eic",
        UnderSimilarityCheck => "under-similarity-check",
        UnderPagination => "under-pagination",
        UnderGrammarCheck => "under-grammar-check",
        ReadyForAccept => "ready-for-accept",
        Formatter => "formatter",
        Proofreader => "proofreader",
        ReadyArticle => "ready-article",
    }
}

/// The signed-in account a listing or permission check is evaluated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewer {
    pub id: AuthorId,
    pub section: Section,
}

impl Viewer {
    pub fn new(id: AuthorId, section: Section) -> Self {
        Self { id, section }
    }

    fn as_party(&self) -> ReviewerRef {
        ReviewerRef::Registered(self.id)
    }
}

impl Filter {
    /// Whether `agg` appears under this filter for `viewer`.
    pub fn matches(self, viewer: &Viewer, agg: &ManuscriptAggregate) -> bool {
        in_scope(viewer, agg) && self.condition(viewer, agg)
    }

    /// Every filter `agg` currently appears under for `viewer`.
    pub fn matching(viewer: &Viewer, agg: &ManuscriptAggregate) -> Vec<Filter> {
        Filter::ALL
            .iter()
            .copied()
            .filter(|f| f.matches(viewer, agg))
            .collect()
    }

    fn condition(self, viewer: &Viewer, agg: &ManuscriptAggregate) -> bool {
        let current = agg.current();
        let status = current.status;
        let submitted = status == Status::Submitted;
        let conditionally_accepted = status == Status::ConditionallyAccepted;
        let checks = &current.checks;

        match self {
            Filter::Invite => submitted && !agg.has_invited_reviewers(),

            Filter::Invited => {
                submitted && current.comments_to_eic.is_none() && agg.has_invited_reviewers()
            }

            Filter::Review => match viewer.section {
                Section::Reviewer => submitted && review_pending(viewer, agg),
                _ => true,
            },

            Filter::Reviewed => match viewer.section {
                Section::Reviewer => agg
                    .reviews()
                    .iter()
                    .any(|r| r.reviewer == viewer.as_party()),
                Section::AssociateEditor => {
                    submitted
                        && current.comments_to_eic.is_none()
                        && agg.reviews_of(current.id).count() >= current.minimum_reviews as usize
                }
                _ => true,
            },

            Filter::UnderRevision => status.is_revision_required(),

            Filter::WithAe => {
                submitted
                    && current.associate_editor_id.is_some()
                    && current.comments_to_eic.is_none()
            }

            Filter::WithEic => submitted && current.comments_to_eic.is_some(),

            Filter::Submitted => match viewer.section {
                Section::Author => submitted && !agg.has_invited_reviewers(),
                Section::EditorInChief => submitted && current.associate_editor_id.is_none(),
                _ => submitted,
            },

            Filter::UnderReview => submitted && agg.has_invited_reviewers(),

            Filter::ConditionallyAccepted => {
                conditionally_accepted && !checks.similarity_check_required
            }

            Filter::UnderSimilarityCheck => {
                conditionally_accepted
                    && checks.similarity_check_required
                    && checks.similarity.is_none()
            }

            Filter::UnderPagination => {
                conditionally_accepted && checks.pagination_required && checks.pages.is_none()
            }

            Filter::UnderGrammarCheck => {
                conditionally_accepted
                    && checks.grammar_check_required
                    && checks.grammar_updated != Some(true)
            }

            Filter::ReadyForAccept => {
                conditionally_accepted
                    && checks.grammar_check_required
                    && checks.grammar_updated == Some(true)
            }

            Filter::Pending => status == Status::Pending,
            Filter::Withdrawn => status == Status::Withdrawn,
            Filter::Deleted => status == Status::Deleted,
            Filter::Rejected => status == Status::Rejected,
            Filter::Accepted => status == Status::Accepted,
            Filter::Production => status == Status::Production,
            Filter::Publication => status == Status::Publication,
            Filter::Published => status == Status::Published,
            Filter::Formatter => status == Status::Formatter,
            Filter::Proofreader => status == Status::Proofreader,
            Filter::ReadyArticle => status == Status::ReadyArticle,
        }
    }
}

/// Authors only see their own manuscripts and associate editors only the
/// ones they handle; everyone else sees everything.
fn in_scope(viewer: &Viewer, agg: &ManuscriptAggregate) -> bool {
    match viewer.section {
        Section::Author => agg.manuscript().author_id == viewer.id,
        Section::AssociateEditor => agg.current().associate_editor_id == Some(viewer.id),
        _ => true,
    }
}

/// The viewer accepted an invitation on the current revision and has not
/// reviewed it yet.
fn review_pending(viewer: &Viewer, agg: &ManuscriptAggregate) -> bool {
    let me = viewer.as_party();
    let current = agg.current().id;
    let accepted = agg.current_reviewers().any(|r| {
        r.reviewer == me
            && r.invitation.invited_at.is_some()
            && r.invitation.accepted_at.is_some()
            && r.invitation.denied_at.is_none()
    });
    accepted && !agg.has_review(current, me)
}

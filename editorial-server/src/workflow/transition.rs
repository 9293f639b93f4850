//! Pure workflow transitions.
//!
//! Each function takes the current records and returns the records to
//! persist plus the effects to run afterwards. Nothing here touches storage
//! or the clock; callers pass `now`.

use chrono::{DateTime, Utc};
use editorial_core::{
    AuthorId, FileRef, ManuscriptAggregate, ReviewerRef, Revision, RevisionContent, RevisionEvent,
    Status,
};

use super::effect::{Effect, LogLevel};
use super::error::RuleViolation;
use super::repository::{NewAssignment, RevisionRound};
use crate::notify::NotificationKind;

/// A status change ready to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionResult {
    pub revision: Revision,
    pub event: RevisionEvent,
    pub effects: Vec<Effect>,
}

/// Author notification sent when a revision reaches `status`, if any.
fn author_notice(status: Status) -> Option<NotificationKind> {
    match status {
        Status::Submitted => Some(NotificationKind::Submitted),
        Status::MinorRevisionRequired | Status::MajorRevisionRequired => {
            Some(NotificationKind::RevisionRequired)
        }
        Status::Withdrawn => Some(NotificationKind::Withdrawn),
        Status::Rejected => Some(NotificationKind::Rejected),
        Status::ConditionallyAccepted => Some(NotificationKind::ConditionallyAccepted),
        Status::Accepted => Some(NotificationKind::Accepted),
        Status::Published => Some(NotificationKind::Published),
        _ => None,
    }
}

/// Move `revision` to `target`, producing the audit row and the author
/// notification.
pub fn apply_status_change(
    revision: &Revision,
    target: Status,
    actor: Option<AuthorId>,
    now: DateTime<Utc>,
) -> Result<TransitionResult, RuleViolation> {
    if revision.status.is_terminal() {
        return Err(RuleViolation::Concluded {
            status: revision.status,
        });
    }
    if target == Status::Submitted && revision.status != Status::Pending {
        return Err(RuleViolation::NotPending);
    }

    let from = revision.status;
    let revision = Revision {
        status: target,
        updated_at: now,
        ..revision.clone()
    };
    let event = RevisionEvent::status_updated(revision.id, target, actor, now);

    let mut effects = vec![Effect::info(format!(
        "Revision {} ({}): {} -> {}",
        revision.id,
        revision.code(),
        from,
        target
    ))];
    if let Some(kind) = author_notice(target) {
        effects.push(Effect::NotifyAuthor { kind });
    }

    Ok(TransitionResult {
        revision,
        event,
        effects,
    })
}

// =============================================================================
// Conditionally-accepted pipeline
// =============================================================================

/// One step of the similarity → pagination → grammar pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProductionStep {
    SendForSimilarityCheck,
    UpdateSimilarity(u8),
    SendForPagination,
    UpdatePages {
        pages: u32,
        source_file: Option<FileRef>,
    },
    SendForGrammarCheck,
    GrammarChecked {
        source_file: Option<FileRef>,
    },
}

pub fn apply_production_step(
    revision: &Revision,
    step: ProductionStep,
    now: DateTime<Utc>,
) -> Result<Revision, RuleViolation> {
    if revision.status != Status::ConditionallyAccepted {
        return Err(RuleViolation::NotConditionallyAccepted);
    }

    let mut next = revision.clone();
    let checks = &mut next.checks;
    match step {
        ProductionStep::SendForSimilarityCheck => {
            checks.similarity_check_required = true;
            checks.similarity = None;
        }
        ProductionStep::UpdateSimilarity(percent) => {
            if percent > 100 {
                return Err(RuleViolation::SimilarityOutOfRange);
            }
            checks.similarity = Some(percent);
            checks.pagination_required = true;
            checks.pages = None;
        }
        ProductionStep::SendForPagination => {
            checks.pagination_required = true;
            checks.pages = None;
        }
        ProductionStep::UpdatePages { pages, source_file } => {
            checks.pages = Some(pages);
            checks.grammar_check_required = true;
            checks.grammar_updated = None;
            if source_file.is_some() {
                next.content.source_file = source_file;
            }
        }
        ProductionStep::SendForGrammarCheck => {
            checks.grammar_check_required = true;
            checks.grammar_updated = Some(false);
        }
        ProductionStep::GrammarChecked { source_file } => {
            checks.grammar_updated = Some(true);
            if source_file.is_some() {
                next.content.source_file = source_file;
            }
        }
    }
    next.updated_at = now;
    Ok(next)
}

// =============================================================================
// Revision rounds
// =============================================================================

/// What the author sends back with a revised manuscript.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevisionSubmission {
    pub comment_reply: Option<String>,
    pub comment_reply_file: Option<FileRef>,
    /// Files left empty keep the previous revision's.
    pub content: RevisionContent,
}

#[derive(Debug, Clone)]
pub struct RoundPlan {
    pub round: RevisionRound,
    pub effects: Vec<Effect>,
}

/// Plan the next revision of a manuscript that is waiting for one.
///
/// Reviewers who reviewed the current revision are carried into the new
/// round with fresh invitation state; everyone else is dropped.
pub fn plan_revision_round(
    agg: &ManuscriptAggregate,
    submission: RevisionSubmission,
    actor: Option<AuthorId>,
    now: DateTime<Utc>,
) -> Result<RoundPlan, RuleViolation> {
    let current = agg.current();
    if !current.status.is_revision_required() {
        return Err(RuleViolation::NotUnderRevision);
    }

    let (carried, dropped): (Vec<_>, Vec<_>) = agg
        .current_reviewers()
        .partition(|rr| agg.has_review(current.id, rr.reviewer));
    let carried_reviewers: Vec<NewAssignment> = carried
        .into_iter()
        .map(|rr| NewAssignment {
            revision_id: current.id,
            party: rr.reviewer,
            section: rr.section,
            created_by: rr.created_by,
        })
        .collect();

    let mut content = submission.content;
    if content.anonymous_file.is_none() {
        content.anonymous_file = current.content.anonymous_file.clone();
    }
    if content.source_file.is_none() {
        content.source_file = current.content.source_file.clone();
    }

    let mut effects = vec![Effect::info(format!(
        "Manuscript {} revised after {}: carrying {} reviewer(s)",
        agg.manuscript().code,
        current.code(),
        carried_reviewers.len()
    ))];
    if !dropped.is_empty() {
        effects.push(Effect::Log {
            level: LogLevel::Info,
            message: format!(
                "Manuscript {}: dropping {} reviewer(s) without a review on {}",
                agg.manuscript().code,
                dropped.len(),
                current.code()
            ),
        });
    }
    effects.push(Effect::NotifyAuthor {
        kind: NotificationKind::RevisionSubmitted,
    });

    Ok(RoundPlan {
        round: RevisionRound {
            manuscript_id: agg.manuscript().id,
            previous: current.id,
            previous_index: current.index,
            comment_reply: submission.comment_reply,
            comment_reply_file: submission.comment_reply_file,
            content,
            associate_editor_id: current.associate_editor_id,
            minimum_reviews: current.minimum_reviews,
            carried_reviewers,
            actor,
            created_at: now,
        },
        effects,
    })
}

// =============================================================================
// Candidate checks
// =============================================================================

/// Checks applied before adding `party` as a reviewer of the current
/// revision, in order; the first failure is reported.
pub fn check_reviewer_candidate(
    agg: &ManuscriptAggregate,
    party: ReviewerRef,
) -> Result<(), RuleViolation> {
    if agg.is_corresponding_author(party) {
        return Err(RuleViolation::CorrespondingAuthorAsReviewer);
    }
    if agg.is_co_author(party) {
        return Err(RuleViolation::CoAuthorAsReviewer);
    }
    if agg.is_current_reviewer(party) {
        return Err(RuleViolation::ReviewerTwice);
    }
    if agg.is_associate_editor(party) {
        return Err(RuleViolation::AssociateEditorAsReviewer);
    }
    Ok(())
}

/// Checks applied before adding `party` as a co-author.
pub fn check_co_author_candidate(
    agg: &ManuscriptAggregate,
    party: ReviewerRef,
) -> Result<(), RuleViolation> {
    if agg.is_corresponding_author(party) {
        return Err(RuleViolation::CorrespondingAuthorAsCoAuthor);
    }
    if agg.is_co_author(party) {
        return Err(RuleViolation::CoAuthorTwice);
    }
    if agg.is_reviewer_anywhere(party) {
        return Err(RuleViolation::ReviewerAsCoAuthor);
    }
    if agg.is_associate_editor(party) {
        return Err(RuleViolation::AssociateEditorAsCoAuthor);
    }
    Ok(())
}

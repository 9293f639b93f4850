//! Role × filter → action permission table.
//!
//! The table is the whole permission surface: a row lists the actions a
//! section may start from a manuscript listed under a filter. Starting some
//! of those actions opens a detail page with further actions; those are
//! listed in [`FOLLOW_UPS`]. Nothing here looks at anything but its inputs.

use std::collections::BTreeSet;

use crate::action::Action;
use crate::filter::{Filter, Viewer};
use crate::model::ManuscriptAggregate;
use crate::section::Section;

use Action as A;

/// `(section, filter, actions)` rows.
pub static ACTION_TABLE: &[(Section, Filter, &[Action])] = &[
    // ===== author =====
    (Section::Author, Filter::Pending, &[A::Edit]),
    (Section::Author, Filter::UnderRevision, &[A::Revise]),
    // ===== reviewer =====
    (Section::Reviewer, Filter::Review, &[A::Review]),
    // ===== associate editor =====
    (Section::AssociateEditor, Filter::Invite, &[A::InviteReviewer]),
    (
        Section::AssociateEditor,
        Filter::Invited,
        &[A::InviteMoreReviewer],
    ),
    (Section::AssociateEditor, Filter::Reviewed, &[A::SendToEic]),
    // ===== editor in chief =====
    (Section::EditorInChief, Filter::Pending, &[A::Delete]),
    (
        Section::EditorInChief,
        Filter::WithAe,
        &[A::AssignAssociateEditor, A::Withdraw],
    ),
    (
        Section::EditorInChief,
        Filter::UnderRevision,
        &[A::RemindAuthor, A::Withdraw],
    ),
    (
        Section::EditorInChief,
        Filter::Submitted,
        &[
            A::AssignAssociateEditor,
            A::ConditionallyAccept,
            A::Accept,
            A::Withdraw,
            A::Reject,
        ],
    ),
    (
        Section::EditorInChief,
        Filter::WithEic,
        &[
            A::MinorRevisionRequired,
            A::MajorRevisionRequired,
            A::ConditionallyAccept,
            A::Accept,
            A::Withdraw,
            A::Reject,
        ],
    ),
    (
        Section::EditorInChief,
        Filter::ConditionallyAccepted,
        &[A::SendForSimilarityCheck, A::Accept, A::Withdraw, A::Reject],
    ),
    (
        Section::EditorInChief,
        Filter::ReadyForAccept,
        &[A::Accept, A::Withdraw, A::Reject],
    ),
    (
        Section::EditorInChief,
        Filter::Accepted,
        &[A::Formatter, A::Withdraw, A::Reject],
    ),
    (Section::EditorInChief, Filter::ReadyArticle, &[A::Publication]),
    (Section::EditorInChief, Filter::Proofreader, &[A::Proofreader]),
    (
        Section::EditorInChief,
        Filter::Production,
        &[A::Publication, A::Withdraw, A::Reject],
    ),
    (
        Section::EditorInChief,
        Filter::Publication,
        &[A::Publish, A::Withdraw, A::Reject],
    ),
    // ===== production manager =====
    (Section::Epm, Filter::UnderSimilarityCheck, &[A::UpdateSimilarity]),
    (Section::Epm, Filter::UnderPagination, &[A::UpdatePages]),
    (Section::Epm, Filter::UnderGrammarCheck, &[A::GrammarChecked]),
    // ===== formatting and proofreading =====
    (Section::Formatter, Filter::Formatter, &[A::UpdateFormatter]),
    (
        Section::Proofreader,
        Filter::Proofreader,
        &[A::GetProofreader, A::UpdateProofreader],
    ),
];

/// Filters under which the editor in chief may not amend the previous
/// round's comment reply.
const COMMENT_REPLY_LOCKED: &[Filter] = &[
    Filter::ConditionallyAccepted,
    Filter::UnderSimilarityCheck,
    Filter::UnderPagination,
    Filter::UnderGrammarCheck,
    Filter::ReadyForAccept,
    Filter::Formatter,
    Filter::Proofreader,
    Filter::ReadyArticle,
    Filter::Production,
];

/// Actions opened up by starting a listed action.
pub static FOLLOW_UPS: &[(Action, &[Action])] = &[
    (
        A::Edit,
        &[
            A::Submit,
            A::Authors,
            A::AddAuthor,
            A::AddAuthorManually,
            A::RemoveAuthor,
        ],
    ),
    (
        A::InviteReviewer,
        &[
            A::Invite,
            A::Reviewers,
            A::AddReviewer,
            A::AddReviewers,
            A::AddReviewerManually,
            A::RemoveReviewer,
            A::ReinviteReviewer,
            A::RemindReviewer,
        ],
    ),
    (
        A::InviteMoreReviewer,
        &[
            A::InviteReviewer,
            A::Invite,
            A::Reviewers,
            A::AddReviewer,
            A::AddReviewers,
            A::AddReviewerManually,
            A::RemoveReviewer,
            A::ReinviteReviewer,
            A::RemindReviewer,
        ],
    ),
    (A::SendToEic, &[A::UpdateComment, A::RemindReviewer]),
    (A::MinorRevisionRequired, &[A::UpdateComment]),
    (A::MajorRevisionRequired, &[A::UpdateComment]),
    (
        A::SendForSimilarityCheck,
        &[A::SendForPagination, A::SendForGrammarCheck],
    ),
];

/// Actions every section holds on any manuscript it can see.
pub fn standing_actions(section: Section) -> &'static [Action] {
    match section {
        Section::EditorInChief => &[A::View, A::Edit],
        _ => &[A::View],
    }
}

/// Actions `section` may start from a manuscript listed under `filter`.
pub fn allowed_actions(
    section: Section,
    filter: Filter,
    revision_has_multiple: bool,
) -> BTreeSet<Action> {
    let mut actions: BTreeSet<Action> = ACTION_TABLE
        .iter()
        .filter(|(s, f, _)| *s == section && *f == filter)
        .flat_map(|(_, _, actions)| actions.iter().copied())
        .collect();

    if section == Section::EditorInChief
        && revision_has_multiple
        && !COMMENT_REPLY_LOCKED.contains(&filter)
    {
        actions.insert(A::UpdateCommentReply);
    }

    actions
}

pub fn follow_up_actions(action: Action) -> &'static [Action] {
    FOLLOW_UPS
        .iter()
        .find(|(a, _)| *a == action)
        .map(|(_, follow_ups)| *follow_ups)
        .unwrap_or(&[])
}

/// Everything `viewer` may do to `agg` right now.
///
/// Empty when the manuscript is not visible to the viewer under any filter.
pub fn permitted_actions(viewer: &Viewer, agg: &ManuscriptAggregate) -> BTreeSet<Action> {
    let filters = Filter::matching(viewer, agg);
    if filters.is_empty() {
        return BTreeSet::new();
    }

    let multiple = agg.has_multiple_revisions();
    let mut listed: BTreeSet<Action> = standing_actions(viewer.section).iter().copied().collect();
    for filter in filters {
        listed.extend(allowed_actions(viewer.section, filter, multiple));
    }

    let mut actions = listed.clone();
    for action in &listed {
        actions.extend(follow_up_actions(*action).iter().copied());
    }

    // An invited reviewer may answer from inside the application as well as
    // through the signed link.
    let me = crate::ids::ReviewerRef::Registered(viewer.id);
    if agg
        .current_reviewers()
        .any(|r| r.reviewer == me && r.invitation.is_open())
    {
        actions.insert(A::AcceptReviewInvite);
        actions.insert(A::DenyReviewInvite);
    }

    actions
}

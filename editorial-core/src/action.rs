//! Action tokens a user can request against a manuscript.

use crate::status::Status;

closed_set! {
    pub enum Action {
        // ===== manuscript =====
        Create => "create",
        Edit => "edit",
        View => "view",
        Submit => "submit",

        // ===== reviewers =====
        Reviewers => "reviewers",
        AddReviewer => "add-reviewer",
        AddReviewers => "add-reviewers",
        AddReviewerManually => "add-reviewer-manually",
        RemoveReviewer => "remove-reviewer",

        // ===== co-authors =====
        Authors => "authors",
        AddAuthor => "add-author",
        AddAuthorManually => "add-author-manually",
        RemoveAuthor => "remove-author",

        // ===== status changes =====
        Withdraw => "withdraw",
        Delete => "delete",
        ConditionallyAccept => "conditionally-accept",
        Accept => "accept",
        Reject => "reject",
        Production => "production",
        Formatter => "formatter",
        Proofreader => "proofreader",
        Publication => "publication",
        Publish => "publish",
        MinorRevisionRequired => "minor-revision-required",
        MajorRevisionRequired => "major-revision-required",

        // ===== review round =====
        Invite => "invite",
        AssignAssociateEditor => "assign-associate-editor",
        InviteReviewer => "invite-reviewer",
        InviteMoreReviewer => "invite-more-reviewer",
        ReinviteReviewer => "reinvite-reviewer",
        AcceptReviewInvite => "accept-review-invite",
        DenyReviewInvite => "deny-review-invite",
        RemindReviewer => "remind-reviewer",
        Review => "review",
        SendToEic => "send-to-eic",
        Revise => "revise",
        UpdateComment => "update-comment",
        UpdateCommentReply => "update-comment-reply",
        RemindAuthor => "remind-author",

        // ===== production sub-stages =====
        SendForSimilarityCheck => "send-for-similarity-check",
        UpdateSimilarity => "update-similarity",
        SendForPagination => "send-for-pagination",
        UpdatePages => "update-pages",
        SendForGrammarCheck => "send-for-grammar-check",
        GrammarChecked => "grammar-checked",
        UpdateFormatter => "update-formatter",
        UpdateProofreader => "update-proofreader",
        GetProofreader => "get-proofreader",
    }
}

impl Action {
    /// Status a revision moves to when this action is applied, for actions
    /// that are plain status changes.
    pub fn target_status(self) -> Option<Status> {
        match self {
            Action::Submit => Some(Status::Submitted),
            Action::Withdraw => Some(Status::Withdrawn),
            Action::Delete => Some(Status::Deleted),
            Action::ConditionallyAccept => Some(Status::ConditionallyAccepted),
            Action::Accept => Some(Status::Accepted),
            Action::Reject => Some(Status::Rejected),
            Action::Production => Some(Status::Production),
            Action::Formatter => Some(Status::Formatter),
            Action::Proofreader => Some(Status::Proofreader),
            Action::Publication => Some(Status::Publication),
            Action::Publish => Some(Status::Published),
            Action::MinorRevisionRequired => Some(Status::MinorRevisionRequired),
            Action::MajorRevisionRequired => Some(Status::MajorRevisionRequired),
            _ => None,
        }
    }

    /// Actions that only read state.
    pub fn is_read_only(self) -> bool {
        matches!(
            self,
            Action::View | Action::Reviewers | Action::Authors | Action::GetProofreader
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_targets_published() {
        assert_eq!(Action::Publish.target_status(), Some(Status::Published));
        assert_eq!(Action::Publication.target_status(), Some(Status::Publication));
        assert_eq!(Action::InviteReviewer.target_status(), None);
    }

    #[test]
    fn every_action_round_trips_through_its_token() {
        for action in Action::ALL {
            assert_eq!(action.to_string().parse::<Action>().unwrap(), *action);
        }
    }

    #[test]
    fn read_only_actions_have_no_target_status() {
        for action in Action::ALL.iter().filter(|a| a.is_read_only()) {
            assert_eq!(action.target_status(), None);
        }
    }
}

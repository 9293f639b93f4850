//! English display labels.
//!
//! Kept apart from the domain enums so the enums stay plain closed sets;
//! a translated front end swaps this module out instead of touching them.

use crate::action::Action;
use crate::filter::Filter;
use crate::section::Section;
use crate::status::{ManuscriptType, ReviewDecision, Status};

pub fn status_label(status: Status) -> &'static str {
    match status {
        Status::Pending => "Created",
        Status::Submitted => "Submitted",
        Status::MinorRevisionRequired => "Minor Revision Required",
        Status::MajorRevisionRequired => "Major Revision Required",
        Status::Withdrawn => "Withdrawn",
        Status::Deleted => "Deleted",
        Status::Rejected => "Rejected",
        Status::ConditionallyAccepted => "Conditionally Accepted",
        Status::Accepted => "Accepted",
        Status::Production => "Production",
        Status::Formatter => "Formatter",
        Status::Proofreader => "Proofreader",
        Status::ReadyArticle => "Ready Article",
        Status::Publication => "Publication",
        Status::Published => "Published",
    }
}

pub fn action_label(action: Action) -> &'static str {
    match action {
        Action::Create => "Create",
        Action::Edit => "Edit",
        Action::View => "View",
        Action::Submit => "Submit",
        Action::Reviewers => "Reviewers",
        Action::AddReviewer => "Add Reviewer",
        Action::AddReviewers => "Add Reviewers",
        Action::AddReviewerManually => "Add Reviewer Manually",
        Action::RemoveReviewer => "Remove Reviewer",
        Action::Authors => "Authors",
        Action::AddAuthor => "Add Author",
        Action::AddAuthorManually => "Add Author Manually",
        Action::RemoveAuthor => "Remove Author",
        Action::Withdraw => "Withdraw",
        Action::Delete => "Delete",
        Action::ConditionallyAccept => "Conditionally Accept",
        Action::Accept => "Accept",
        Action::Reject => "Reject",
        Action::Production => "To Production",
        Action::Formatter => "To Format",
        Action::Proofreader => "To Proof Read",
        Action::Publication => "To Publication",
        Action::Publish => "Publish",
        Action::MinorRevisionRequired => "Minor Revision Required",
        Action::MajorRevisionRequired => "Major Revision Required",
        Action::Invite => "Invite",
        Action::AssignAssociateEditor => "Assign Associate Editor",
        Action::InviteReviewer => "Invite Reviewer",
        Action::InviteMoreReviewer => "Invite More Reviewer",
        Action::ReinviteReviewer => "Reinvite Reviewer",
        Action::AcceptReviewInvite => "Accept Review Invite",
        Action::DenyReviewInvite => "Deny Review Invite",
        Action::RemindReviewer => "Remind Reviewer",
        Action::Review => "Review",
        Action::SendToEic => "Send to EIC",
        Action::Revise => "Revise",
        Action::UpdateComment => "Update Comment",
        Action::UpdateCommentReply => "Update Comment Reply",
        Action::RemindAuthor => "Remind Author",
        Action::SendForSimilarityCheck => "Send for Similarity Check",
        Action::UpdateSimilarity => "Update Similarity",
        Action::SendForPagination => "Send for Pagination",
        Action::UpdatePages => "Update Pages",
        Action::SendForGrammarCheck => "Send for Grammar Check",
        Action::GrammarChecked => "Grammar Checked",
        Action::UpdateFormatter => "Update Formatter",
        Action::UpdateProofreader => "Update Proofreader",
        Action::GetProofreader => "Proofreader Copy",
    }
}

pub fn decision_label(decision: ReviewDecision) -> &'static str {
    match decision {
        ReviewDecision::Accept => "Accept as it is",
        ReviewDecision::MinorRevisionRequired => "Minor Revision Required",
        ReviewDecision::MajorRevisionRequired => "Major Revision Required",
        ReviewDecision::Reject => "Reject",
    }
}

pub fn manuscript_type_label(kind: ManuscriptType) -> &'static str {
    match kind {
        ManuscriptType::Research => "Research Manuscript",
        ManuscriptType::Review => "Review Manuscript",
        ManuscriptType::CaseStudy => "Case Study",
    }
}

pub fn section_label(section: Section) -> &'static str {
    match section {
        Section::Admin => "Admin",
        Section::Author => "Author",
        Section::Reviewer => "Reviewer",
        Section::AssociateEditor => "Associate Editor",
        Section::EditorInChief => "Editor in Chief",
        Section::Epm => "EPM",
        Section::Formatter => "Formatter",
        Section::Proofreader => "Proofreader",
        Section::ReadyArticle => "Ready Article",
    }
}

pub fn filter_label(filter: Filter) -> &'static str {
    match filter {
        Filter::Pending => "Pending",
        Filter::Submitted => "Submitted",
        Filter::Withdrawn => "Withdrawn",
        Filter::Deleted => "Deleted",
        Filter::Rejected => "Rejected",
        Filter::ConditionallyAccepted => "Conditionally Accepted",
        Filter::Accepted => "Accepted",
        Filter::Production => "Production",
        Filter::Publication => "Publication",
        Filter::Published => "Published",
        Filter::Invite => "Invite Reviewers",
        Filter::Invited => "Reviewers Invited",
        Filter::Review => "To Review",
        Filter::Reviewed => "Reviewed",
        Filter::UnderRevision => "Under Revision",
        Filter::UnderReview => "Under Review",
        Filter::WithAe => "With Associate Editor",
        Filter::WithEic => "With EIC",
        Filter::UnderSimilarityCheck => "Under Similarity Check",
        Filter::UnderPagination => "Under Pagination",
        Filter::UnderGrammarCheck => "Under Grammar Check",
        Filter::ReadyForAccept => "Ready for Accept",
        Filter::Formatter => "Formatter",
        Filter::Proofreader => "Proofreader",
        Filter::ReadyArticle => "Ready Article",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_is_the_pending_label() {
        assert_eq!(status_label(Status::Pending), "Created");
        assert_eq!(action_label(Action::Formatter), "To Format");
        assert_eq!(decision_label(ReviewDecision::Accept), "Accept as it is");
    }

    #[test]
    fn every_status_has_a_nonempty_label() {
        for status in Status::ALL {
            assert!(!status_label(*status).is_empty());
        }
    }
}

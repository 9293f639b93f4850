//! Lifecycle status of a revision and the other small closed sets attached
//! to revisions and reviews.

closed_set! {
    /// Status of a revision. The manuscript's status is the status of its
    /// current revision.
    pub enum Status {
        Pending => "pending",
        Submitted => "submitted",
        MinorRevisionRequired => "minor-revision-required",
        MajorRevisionRequired => "major-revision-required",
        Withdrawn => "withdrawn",
        Deleted => "deleted",
        Rejected => "rejected",
        ConditionallyAccepted => "conditionally-accepted",
        Accepted => "accepted",
        Production => "production",
        Formatter => "formatter",
        Proofreader => "proofreader",
        ReadyArticle => "ready-article",
        Publication => "publication",
        Published => "published",
    }
}

impl Status {
    /// No action leads out of a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Status::Published | Status::Rejected | Status::Withdrawn | Status::Deleted
        )
    }

    pub fn is_revision_required(self) -> bool {
        matches!(
            self,
            Status::MinorRevisionRequired | Status::MajorRevisionRequired
        )
    }

    /// Concluded without publication; the retention sweep reclaims files of
    /// manuscripts that reached one of these.
    pub fn is_abandoned(self) -> bool {
        matches!(self, Status::Rejected | Status::Withdrawn | Status::Deleted)
    }
}

closed_set! {
    /// Kind of an audit-trail row.
    pub enum EventKind {
        StatusUpdated => "status_updated",
    }
}

closed_set! {
    /// A reviewer's verdict.
    pub enum ReviewDecision {
        Accept => "accept",
        MinorRevisionRequired => "minor-revision-required",
        MajorRevisionRequired => "major-revision-required",
        Reject => "reject",
    }
}

closed_set! {
    pub enum ManuscriptType {
        Research => "research",
        Review => "review",
        CaseStudy => "case-study",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        let terminal: Vec<Status> = Status::ALL
            .iter()
            .copied()
            .filter(|s| s.is_terminal())
            .collect();
        assert_eq!(
            terminal,
            vec![
                Status::Withdrawn,
                Status::Deleted,
                Status::Rejected,
                Status::Published
            ]
        );
    }

    #[test]
    fn status_parses_its_own_spelling() {
        for status in Status::ALL {
            assert_eq!(status.as_str().parse::<Status>().unwrap(), *status);
        }
        assert!("under-review".parse::<Status>().is_err());
    }

    #[test]
    fn serde_uses_wire_spelling() {
        let json = serde_json::to_string(&Status::ConditionallyAccepted).unwrap();
        assert_eq!(json, "\"conditionally-accepted\"");
        let kind: EventKind = serde_json::from_str("\"status_updated\"").unwrap();
        assert_eq!(kind, EventKind::StatusUpdated);
    }

    #[test]
    fn abandoned_is_terminal_but_not_published() {
        assert!(Status::Rejected.is_abandoned());
        assert!(!Status::Published.is_abandoned());
        for status in Status::ALL.iter().filter(|s| s.is_abandoned()) {
            assert!(status.is_terminal());
        }
    }
}

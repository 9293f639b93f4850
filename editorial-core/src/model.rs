//! Records of the editorial workflow and the aggregate snapshot the pure
//! rules evaluate against.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::{
    AuthorId, ManuscriptId, ReviewId, ReviewerRef, RevisionAuthorId, RevisionId,
    RevisionReviewerId,
};
use crate::invitation::Invitation;
use crate::section::Section;
use crate::status::{EventKind, ManuscriptType, ReviewDecision, Status};

/// Reviews an associate editor must collect before a round counts as reviewed.
pub const DEFAULT_MINIMUM_REVIEWS: u32 = 8;

/// Opaque reference returned by file storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileRef(pub String);

impl From<String> for FileRef {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for FileRef {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for FileRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manuscript {
    pub id: ManuscriptId,
    /// Public code, `PMSL-YY-NNNN`.
    pub code: String,
    pub manuscript_type: ManuscriptType,
    /// Corresponding author.
    pub author_id: AuthorId,
    pub current_revision_id: RevisionId,
    pub research_areas: Vec<String>,
    pub copyright_form: Option<FileRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Author-supplied content of one revision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionContent {
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub keywords: String,
    pub novelty: String,
    pub anonymous_file: Option<FileRef>,
    pub source_file: Option<FileRef>,
}

/// Flags driving the conditionally-accepted pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductionChecks {
    pub similarity_check_required: bool,
    /// Similarity percentage reported by the check.
    pub similarity: Option<u8>,
    pub pagination_required: bool,
    pub pages: Option<u32>,
    pub grammar_check_required: bool,
    /// `Some(false)` while the check is in progress, `Some(true)` once done.
    pub grammar_updated: Option<bool>,
}

/// Papers uploaded after acceptance by the formatter and proofreader.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductionFiles {
    pub formatted_paper: Option<FileRef>,
    pub correction_file: Option<FileRef>,
    pub proofread_paper: Option<FileRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub id: RevisionId,
    pub manuscript_id: ManuscriptId,
    /// 0 for the initial submission; unique per manuscript.
    pub index: u32,
    pub content: RevisionContent,
    pub status: Status,
    pub associate_editor_id: Option<AuthorId>,
    pub minimum_reviews: u32,
    pub comments_to_eic: Option<String>,
    /// The author's reply to this round's comments, written when revising.
    pub comment_reply: Option<String>,
    pub comment_reply_file: Option<FileRef>,
    pub checks: ProductionChecks,
    pub files: ProductionFiles,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Revision {
    pub fn code(&self) -> String {
        format!("R{}", self.index)
    }

    /// Every stored file this revision references.
    pub fn file_refs(&self) -> Vec<&FileRef> {
        [
            &self.content.anonymous_file,
            &self.content.source_file,
            &self.comment_reply_file,
            &self.files.formatted_paper,
            &self.files.correction_file,
            &self.files.proofread_paper,
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// A reviewer's assignment to one revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionReviewer {
    pub id: RevisionReviewerId,
    pub revision_id: RevisionId,
    pub reviewer: ReviewerRef,
    /// Section of the account that created the assignment.
    pub section: Option<Section>,
    pub created_by: Option<AuthorId>,
    pub invitation: Invitation,
}

/// A co-author's assignment to one revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionAuthor {
    pub id: RevisionAuthorId,
    pub revision_id: RevisionId,
    pub author: ReviewerRef,
    pub section: Option<Section>,
    pub created_by: Option<AuthorId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub id: ReviewId,
    pub revision_id: RevisionId,
    pub reviewer: ReviewerRef,
    pub decision: ReviewDecision,
    pub comments_to_author: String,
    pub comments_to_associate_editor: Option<String>,
    pub review_report: Option<FileRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields a reviewer submits; upserted per (revision, reviewer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewInput {
    pub decision: ReviewDecision,
    pub comments_to_author: String,
    pub comments_to_associate_editor: Option<String>,
    pub review_report: Option<FileRef>,
}

/// One row of the append-only audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionEvent {
    pub revision_id: RevisionId,
    pub event: EventKind,
    pub value: String,
    pub created_by: Option<AuthorId>,
    pub created_at: DateTime<Utc>,
}

impl RevisionEvent {
    pub fn status_updated(
        revision_id: RevisionId,
        status: Status,
        created_by: Option<AuthorId>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            revision_id,
            event: EventKind::StatusUpdated,
            value: status.as_str().to_string(),
            created_by,
            created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregateError {
    #[error("manuscript {manuscript} points at revision {revision} which was not loaded")]
    MissingCurrentRevision {
        manuscript: ManuscriptId,
        revision: RevisionId,
    },
    #[error("manuscript {manuscript} revision indices are not contiguous from 0: {indices:?}")]
    NonContiguousIndices {
        manuscript: ManuscriptId,
        indices: Vec<u32>,
    },
}

/// A manuscript with everything the workflow rules read: all revisions in
/// index order, their reviewer and co-author assignments, and their reviews.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManuscriptAggregate {
    manuscript: Manuscript,
    revisions: Vec<Revision>,
    reviewers: Vec<RevisionReviewer>,
    authors: Vec<RevisionAuthor>,
    reviews: Vec<Review>,
    #[serde(skip)]
    current: usize,
}

impl ManuscriptAggregate {
    pub fn new(
        manuscript: Manuscript,
        mut revisions: Vec<Revision>,
        reviewers: Vec<RevisionReviewer>,
        authors: Vec<RevisionAuthor>,
        reviews: Vec<Review>,
    ) -> Result<Self, AggregateError> {
        revisions.sort_by_key(|r| r.index);

        let contiguous = revisions
            .iter()
            .enumerate()
            .all(|(position, r)| r.index as usize == position);
        if !contiguous {
            return Err(AggregateError::NonContiguousIndices {
                manuscript: manuscript.id,
                indices: revisions.iter().map(|r| r.index).collect(),
            });
        }

        let current = revisions
            .iter()
            .position(|r| r.id == manuscript.current_revision_id)
            .ok_or(AggregateError::MissingCurrentRevision {
                manuscript: manuscript.id,
                revision: manuscript.current_revision_id,
            })?;

        Ok(Self {
            manuscript,
            revisions,
            reviewers,
            authors,
            reviews,
            current,
        })
    }

    pub fn manuscript(&self) -> &Manuscript {
        &self.manuscript
    }

    /// All revisions, lowest index first.
    pub fn revisions(&self) -> &[Revision] {
        &self.revisions
    }

    pub fn current(&self) -> &Revision {
        &self.revisions[self.current]
    }

    /// The revision before the current one, if any.
    pub fn previous(&self) -> Option<&Revision> {
        self.current
            .checked_sub(1)
            .and_then(|i| self.revisions.get(i))
    }

    pub fn status(&self) -> Status {
        self.current().status
    }

    pub fn has_multiple_revisions(&self) -> bool {
        self.revisions.len() > 1
    }

    pub fn revision(&self, id: RevisionId) -> Option<&Revision> {
        self.revisions.iter().find(|r| r.id == id)
    }

    pub fn reviewers(&self) -> &[RevisionReviewer] {
        &self.reviewers
    }

    pub fn reviewers_of(&self, revision: RevisionId) -> impl Iterator<Item = &RevisionReviewer> {
        self.reviewers
            .iter()
            .filter(move |r| r.revision_id == revision)
    }

    pub fn current_reviewers(&self) -> impl Iterator<Item = &RevisionReviewer> {
        self.reviewers_of(self.current().id)
    }

    pub fn reviews(&self) -> &[Review] {
        &self.reviews
    }

    pub fn reviews_of(&self, revision: RevisionId) -> impl Iterator<Item = &Review> {
        self.reviews.iter().filter(move |r| r.revision_id == revision)
    }

    pub fn has_review(&self, revision: RevisionId, reviewer: ReviewerRef) -> bool {
        self.reviews_of(revision).any(|r| r.reviewer == reviewer)
    }

    pub fn authors(&self) -> &[RevisionAuthor] {
        &self.authors
    }

    /// Distinct co-authors across every revision, in first-added order.
    pub fn co_authors(&self) -> Vec<ReviewerRef> {
        let mut seen = BTreeSet::new();
        self.authors
            .iter()
            .map(|a| a.author)
            .filter(|a| seen.insert(*a))
            .collect()
    }

    pub fn is_co_author(&self, party: ReviewerRef) -> bool {
        self.authors.iter().any(|a| a.author == party)
    }

    /// Reviewer on any revision of this manuscript.
    pub fn is_reviewer_anywhere(&self, party: ReviewerRef) -> bool {
        self.reviewers.iter().any(|r| r.reviewer == party)
    }

    pub fn is_current_reviewer(&self, party: ReviewerRef) -> bool {
        self.current_reviewers().any(|r| r.reviewer == party)
    }

    /// Associate editors assigned to any revision.
    pub fn associate_editors(&self) -> BTreeSet<AuthorId> {
        self.revisions
            .iter()
            .filter_map(|r| r.associate_editor_id)
            .collect()
    }

    pub fn is_associate_editor(&self, party: ReviewerRef) -> bool {
        party
            .as_registered()
            .is_some_and(|id| self.associate_editors().contains(&id))
    }

    pub fn is_corresponding_author(&self, party: ReviewerRef) -> bool {
        party == ReviewerRef::Registered(self.manuscript.author_id)
    }

    /// Any reviewer of the current revision has been sent an invitation.
    pub fn has_invited_reviewers(&self) -> bool {
        self.current_reviewers()
            .any(|r| r.invitation.invited_at.is_some())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Builders shared by the filter and permission tests.

    use super::*;
    use crate::ids::GuestAuthorId;
    use chrono::TimeZone;

    pub fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap()
    }

    pub fn manuscript(author: i64, current: i64) -> Manuscript {
        Manuscript {
            id: ManuscriptId(1),
            code: "PMSL-24-0001".to_string(),
            manuscript_type: ManuscriptType::Research,
            author_id: AuthorId(author),
            current_revision_id: RevisionId(current),
            research_areas: vec![],
            copyright_form: None,
            created_at: at(1),
            updated_at: at(1),
        }
    }

    pub fn revision(id: i64, index: u32, status: Status) -> Revision {
        Revision {
            id: RevisionId(id),
            manuscript_id: ManuscriptId(1),
            index,
            content: RevisionContent {
                title: format!("Title {}", index),
                ..Default::default()
            },
            status,
            associate_editor_id: None,
            minimum_reviews: DEFAULT_MINIMUM_REVIEWS,
            comments_to_eic: None,
            comment_reply: None,
            comment_reply_file: None,
            checks: ProductionChecks::default(),
            files: ProductionFiles::default(),
            created_at: at(1),
            updated_at: at(1),
        }
    }

    pub fn reviewer(id: i64, revision: i64, who: ReviewerRef) -> RevisionReviewer {
        RevisionReviewer {
            id: RevisionReviewerId(id),
            revision_id: RevisionId(revision),
            reviewer: who,
            section: Some(Section::AssociateEditor),
            created_by: None,
            invitation: Invitation::default(),
        }
    }

    pub fn review(id: i64, revision: i64, who: ReviewerRef) -> Review {
        Review {
            id: ReviewId(id),
            revision_id: RevisionId(revision),
            reviewer: who,
            decision: ReviewDecision::Accept,
            comments_to_author: "fine".to_string(),
            comments_to_associate_editor: None,
            review_report: None,
            created_at: at(2),
            updated_at: at(2),
        }
    }

    pub fn guest(id: i64) -> ReviewerRef {
        ReviewerRef::Guest(GuestAuthorId(id))
    }

    pub fn registered(id: i64) -> ReviewerRef {
        ReviewerRef::Registered(AuthorId(id))
    }

    /// One-revision aggregate owned by author 10.
    pub fn single(status: Status) -> ManuscriptAggregate {
        ManuscriptAggregate::new(
            manuscript(10, 100),
            vec![revision(100, 0, status)],
            vec![],
            vec![],
            vec![],
        )
        .unwrap()
    }
}

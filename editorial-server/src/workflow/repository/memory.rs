//! In-memory implementation of the workflow repository and directory.
//!
//! All tables live behind one `RwLock` so every multi-row operation is
//! atomic with respect to every other. State is lost on restart.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use tokio::sync::RwLock;

use super::{
    DeletedParties, Directory, InviteResponse, NewAssignment, NewManuscript, Party,
    RepositoryError, RevisionRound, SweepCandidate, WorkflowRepository,
};
use editorial_core::{
    AuthorId, Contact, GuestAuthorId, Invitation, Manuscript, ManuscriptAggregate, ManuscriptId,
    ProductionChecks, ProductionFiles, Review, ReviewId, ReviewInput, ReviewerRef, Revision,
    RevisionAuthor, RevisionAuthorId, RevisionEvent, RevisionId, RevisionReviewer,
    RevisionReviewerId, Section, Status,
};

#[derive(Default)]
struct Tables {
    next_id: i64,
    manuscripts: BTreeMap<ManuscriptId, Manuscript>,
    revisions: BTreeMap<RevisionId, Revision>,
    reviewers: BTreeMap<RevisionReviewerId, RevisionReviewer>,
    authors: BTreeMap<RevisionAuthorId, RevisionAuthor>,
    reviews: BTreeMap<ReviewId, Review>,
    events: Vec<RevisionEvent>,
    accounts: BTreeMap<AuthorId, Party>,
    guests: BTreeMap<GuestAuthorId, Party>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn revision(&self, id: RevisionId) -> Result<&Revision, RepositoryError> {
        self.revisions
            .get(&id)
            .ok_or_else(|| RepositoryError::not_found("revision", id))
    }

    fn aggregate(&self, id: ManuscriptId) -> Result<Option<ManuscriptAggregate>, RepositoryError> {
        let Some(manuscript) = self.manuscripts.get(&id) else {
            return Ok(None);
        };
        let revisions: Vec<Revision> = self
            .revisions
            .values()
            .filter(|r| r.manuscript_id == id)
            .cloned()
            .collect();
        let belongs = |rev: RevisionId| revisions.iter().any(|r| r.id == rev);
        let reviewers = self
            .reviewers
            .values()
            .filter(|r| belongs(r.revision_id))
            .cloned()
            .collect();
        let authors = self
            .authors
            .values()
            .filter(|a| belongs(a.revision_id))
            .cloned()
            .collect();
        let reviews = self
            .reviews
            .values()
            .filter(|r| belongs(r.revision_id))
            .cloned()
            .collect();

        ManuscriptAggregate::new(manuscript.clone(), revisions, reviewers, authors, reviews)
            .map(Some)
            .map_err(|e| RepositoryError::corruption(e.to_string()))
    }

    /// Current revision of its manuscript and still collecting reviews.
    fn is_live_submitted(&self, revision: RevisionId) -> Option<ManuscriptId> {
        let rev = self.revisions.get(&revision)?;
        let manuscript = self.manuscripts.get(&rev.manuscript_id)?;
        (manuscript.current_revision_id == revision && rev.status == Status::Submitted)
            .then_some(manuscript.id)
    }

    /// The revision exists and `new.party` is not assigned to it yet.
    fn check_reviewer_slot(&self, new: &NewAssignment) -> Result<(), RepositoryError> {
        self.revision(new.revision_id)?;
        if self
            .reviewers
            .values()
            .any(|r| r.revision_id == new.revision_id && r.reviewer == new.party)
        {
            return Err(duplicate("reviewer", new));
        }
        Ok(())
    }

    fn insert_reviewer(&mut self, new: NewAssignment) -> RevisionReviewer {
        let id = RevisionReviewerId(self.next_id());
        let assignment = RevisionReviewer {
            id,
            revision_id: new.revision_id,
            reviewer: new.party,
            section: new.section,
            created_by: new.created_by,
            invitation: Invitation::default(),
        };
        self.reviewers.insert(id, assignment.clone());
        assignment
    }

    fn has_review(&self, revision: RevisionId, reviewer: ReviewerRef) -> bool {
        self.reviews
            .values()
            .any(|r| r.revision_id == revision && r.reviewer == reviewer)
    }
}

fn duplicate(role: &str, new: &NewAssignment) -> RepositoryError {
    RepositoryError::Conflict(format!(
        "{} is already a {} of revision {}",
        new.party, role, new.revision_id
    ))
}

fn visible(party: &Party, deleted: DeletedParties) -> bool {
    deleted == DeletedParties::Include || !party.deleted
}

/// In-memory workflow repository.
pub struct InMemoryRepository {
    tables: RwLock<Tables>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkflowRepository for InMemoryRepository {
    async fn create_manuscript(
        &self,
        new: NewManuscript,
    ) -> Result<ManuscriptAggregate, RepositoryError> {
        let mut t = self.tables.write().await;

        let year = new.created_at.year();
        let this_year = t
            .manuscripts
            .values()
            .filter(|m| m.created_at.year() == year)
            .count();
        let code = format!("PMSL-{}-{:04}", new.created_at.format("%y"), this_year + 1);

        let manuscript_id = ManuscriptId(t.next_id());
        let revision_id = RevisionId(t.next_id());
        t.revisions.insert(
            revision_id,
            Revision {
                id: revision_id,
                manuscript_id,
                index: 0,
                content: new.content,
                status: Status::Pending,
                associate_editor_id: None,
                minimum_reviews: new.minimum_reviews,
                comments_to_eic: None,
                comment_reply: None,
                comment_reply_file: None,
                checks: ProductionChecks::default(),
                files: ProductionFiles::default(),
                created_at: new.created_at,
                updated_at: new.created_at,
            },
        );
        t.manuscripts.insert(
            manuscript_id,
            Manuscript {
                id: manuscript_id,
                code,
                manuscript_type: new.manuscript_type,
                author_id: new.author_id,
                current_revision_id: revision_id,
                research_areas: new.research_areas,
                copyright_form: new.copyright_form,
                created_at: new.created_at,
                updated_at: new.created_at,
            },
        );
        t.events.push(RevisionEvent::status_updated(
            revision_id,
            Status::Pending,
            Some(new.author_id),
            new.created_at,
        ));

        t.aggregate(manuscript_id)?
            .ok_or_else(|| RepositoryError::not_found("manuscript", manuscript_id))
    }

    async fn load(
        &self,
        id: ManuscriptId,
    ) -> Result<Option<ManuscriptAggregate>, RepositoryError> {
        self.tables.read().await.aggregate(id)
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<ManuscriptId>, RepositoryError> {
        let t = self.tables.read().await;
        Ok(t.manuscripts.values().find(|m| m.code == code).map(|m| m.id))
    }

    async fn update_manuscript(&self, manuscript: &Manuscript) -> Result<(), RepositoryError> {
        let mut t = self.tables.write().await;
        let stored = t
            .manuscripts
            .get_mut(&manuscript.id)
            .ok_or_else(|| RepositoryError::not_found("manuscript", manuscript.id))?;
        let current = stored.current_revision_id;
        *stored = Manuscript {
            current_revision_id: current,
            ..manuscript.clone()
        };
        Ok(())
    }

    async fn update_revision(&self, revision: &Revision) -> Result<(), RepositoryError> {
        let mut t = self.tables.write().await;
        let stored = t
            .revisions
            .get_mut(&revision.id)
            .ok_or_else(|| RepositoryError::not_found("revision", revision.id))?;
        *stored = Revision {
            manuscript_id: stored.manuscript_id,
            index: stored.index,
            ..revision.clone()
        };
        Ok(())
    }

    async fn record_status_change(
        &self,
        revision: &Revision,
        event: RevisionEvent,
    ) -> Result<(), RepositoryError> {
        let mut t = self.tables.write().await;
        let stored = t
            .revisions
            .get_mut(&revision.id)
            .ok_or_else(|| RepositoryError::not_found("revision", revision.id))?;
        *stored = Revision {
            manuscript_id: stored.manuscript_id,
            index: stored.index,
            ..revision.clone()
        };
        t.events.push(event);
        Ok(())
    }

    async fn create_revision_round(
        &self,
        round: RevisionRound,
    ) -> Result<Revision, RepositoryError> {
        let mut t = self.tables.write().await;

        let manuscript = t
            .manuscripts
            .get(&round.manuscript_id)
            .ok_or_else(|| RepositoryError::not_found("manuscript", round.manuscript_id))?;
        if manuscript.current_revision_id != round.previous {
            return Err(RepositoryError::Conflict(format!(
                "revision {} is no longer current for manuscript {}",
                round.previous, round.manuscript_id
            )));
        }
        let index = round.previous_index + 1;
        if t
            .revisions
            .values()
            .any(|r| r.manuscript_id == round.manuscript_id && r.index == index)
        {
            return Err(RepositoryError::Conflict(format!(
                "manuscript {} already has revision R{}",
                round.manuscript_id, index
            )));
        }

        let previous = t
            .revisions
            .get_mut(&round.previous)
            .ok_or_else(|| RepositoryError::not_found("revision", round.previous))?;
        previous.comment_reply = round.comment_reply;
        previous.comment_reply_file = round.comment_reply_file;
        previous.updated_at = round.created_at;

        let id = RevisionId(t.next_id());
        let revision = Revision {
            id,
            manuscript_id: round.manuscript_id,
            index,
            content: round.content,
            status: Status::Submitted,
            associate_editor_id: round.associate_editor_id,
            minimum_reviews: round.minimum_reviews,
            comments_to_eic: None,
            comment_reply: None,
            comment_reply_file: None,
            checks: ProductionChecks::default(),
            files: ProductionFiles::default(),
            created_at: round.created_at,
            updated_at: round.created_at,
        };
        t.revisions.insert(id, revision.clone());

        for carried in round.carried_reviewers {
            t.insert_reviewer(NewAssignment {
                revision_id: id,
                ..carried
            });
        }

        if let Some(m) = t.manuscripts.get_mut(&round.manuscript_id) {
            m.current_revision_id = id;
            m.updated_at = round.created_at;
        }
        t.events.push(RevisionEvent::status_updated(
            id,
            Status::Submitted,
            round.actor,
            round.created_at,
        ));

        Ok(revision)
    }

    async fn events(
        &self,
        manuscript: ManuscriptId,
    ) -> Result<Vec<RevisionEvent>, RepositoryError> {
        let t = self.tables.read().await;
        Ok(t.events
            .iter()
            .filter(|e| {
                t.revisions
                    .get(&e.revision_id)
                    .is_some_and(|r| r.manuscript_id == manuscript)
            })
            .cloned()
            .collect())
    }

    async fn add_reviewer(&self, new: NewAssignment) -> Result<RevisionReviewer, RepositoryError> {
        let mut t = self.tables.write().await;
        t.check_reviewer_slot(&new)?;
        Ok(t.insert_reviewer(new))
    }

    async fn add_reviewers(
        &self,
        batch: Vec<NewAssignment>,
    ) -> Result<Vec<RevisionReviewer>, RepositoryError> {
        let mut t = self.tables.write().await;
        for (i, new) in batch.iter().enumerate() {
            t.check_reviewer_slot(new)?;
            if batch[..i]
                .iter()
                .any(|earlier| earlier.revision_id == new.revision_id && earlier.party == new.party)
            {
                return Err(duplicate("reviewer", new));
            }
        }
        Ok(batch.into_iter().map(|new| t.insert_reviewer(new)).collect())
    }

    async fn remove_reviewer(
        &self,
        revision: RevisionId,
        id: RevisionReviewerId,
    ) -> Result<Option<RevisionReviewer>, RepositoryError> {
        let mut t = self.tables.write().await;
        if t.reviewers.get(&id).map(|r| r.revision_id) != Some(revision) {
            return Ok(None);
        }
        Ok(t.reviewers.remove(&id))
    }

    async fn invite(
        &self,
        id: RevisionReviewerId,
        at: DateTime<Utc>,
        by: Option<AuthorId>,
    ) -> Result<bool, RepositoryError> {
        let mut t = self.tables.write().await;
        let stored = t
            .reviewers
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::not_found("revision reviewer", id))?;
        if stored.invitation.is_resolved() {
            return Ok(false);
        }
        stored.invitation.invite(at, by);
        Ok(true)
    }

    async fn remind(&self, id: RevisionReviewerId) -> Result<bool, RepositoryError> {
        let mut t = self.tables.write().await;
        let stored = t
            .reviewers
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::not_found("revision reviewer", id))?;
        if stored.invitation.accepted_at.is_none() || stored.invitation.denied_at.is_some() {
            return Ok(false);
        }
        stored.invitation.remind();
        Ok(true)
    }

    async fn resolve_invitation(
        &self,
        id: RevisionReviewerId,
        response: InviteResponse,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut t = self.tables.write().await;
        let stored = t
            .reviewers
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::not_found("revision reviewer", id))?;
        Ok(match response {
            InviteResponse::Accept => stored.invitation.accept(at),
            InviteResponse::Deny => stored.invitation.deny(at),
        })
    }

    async fn add_co_author(&self, new: NewAssignment) -> Result<RevisionAuthor, RepositoryError> {
        let mut t = self.tables.write().await;
        t.revision(new.revision_id)?;
        if t
            .authors
            .values()
            .any(|a| a.revision_id == new.revision_id && a.author == new.party)
        {
            return Err(duplicate("co-author", &new));
        }
        let id = RevisionAuthorId(t.next_id());
        let assignment = RevisionAuthor {
            id,
            revision_id: new.revision_id,
            author: new.party,
            section: new.section,
            created_by: new.created_by,
        };
        t.authors.insert(id, assignment.clone());
        Ok(assignment)
    }

    async fn remove_co_author(
        &self,
        revision: RevisionId,
        id: RevisionAuthorId,
    ) -> Result<Option<RevisionAuthor>, RepositoryError> {
        let mut t = self.tables.write().await;
        if t.authors.get(&id).map(|a| a.revision_id) != Some(revision) {
            return Ok(None);
        }
        Ok(t.authors.remove(&id))
    }

    async fn upsert_review(
        &self,
        revision: RevisionId,
        reviewer: ReviewerRef,
        input: ReviewInput,
        at: DateTime<Utc>,
    ) -> Result<Review, RepositoryError> {
        let mut t = self.tables.write().await;
        t.revision(revision)?;

        if let Some(existing) = t
            .reviews
            .values_mut()
            .find(|r| r.revision_id == revision && r.reviewer == reviewer)
        {
            existing.decision = input.decision;
            existing.comments_to_author = input.comments_to_author;
            existing.comments_to_associate_editor = input.comments_to_associate_editor;
            existing.review_report = input.review_report;
            existing.updated_at = at;
            return Ok(existing.clone());
        }

        let id = ReviewId(t.next_id());
        let review = Review {
            id,
            revision_id: revision,
            reviewer,
            decision: input.decision,
            comments_to_author: input.comments_to_author,
            comments_to_associate_editor: input.comments_to_associate_editor,
            review_report: input.review_report,
            created_at: at,
            updated_at: at,
        };
        t.reviews.insert(id, review.clone());
        Ok(review)
    }

    async fn update_review(&self, review: &Review) -> Result<(), RepositoryError> {
        let mut t = self.tables.write().await;
        let stored = t
            .reviews
            .get_mut(&review.id)
            .ok_or_else(|| RepositoryError::not_found("review", review.id))?;
        *stored = review.clone();
        Ok(())
    }

    async fn review(&self, id: ReviewId) -> Result<Option<Review>, RepositoryError> {
        Ok(self.tables.read().await.reviews.get(&id).cloned())
    }

    async fn reinvite_candidates(
        &self,
        cap: u32,
    ) -> Result<Vec<SweepCandidate>, RepositoryError> {
        let t = self.tables.read().await;
        Ok(t.reviewers
            .values()
            .filter(|r| r.invitation.is_open() && r.invitation.invite_count < cap)
            .filter_map(|r| {
                t.is_live_submitted(r.revision_id)
                    .map(|manuscript_id| SweepCandidate {
                        manuscript_id,
                        assignment: r.clone(),
                    })
            })
            .collect())
    }

    async fn remind_candidates(&self, cap: u32) -> Result<Vec<SweepCandidate>, RepositoryError> {
        let t = self.tables.read().await;
        Ok(t.reviewers
            .values()
            .filter(|r| {
                r.invitation.accepted_at.is_some()
                    && r.invitation.denied_at.is_none()
                    && r.invitation.remind_count < cap
                    && !t.has_review(r.revision_id, r.reviewer)
            })
            .filter_map(|r| {
                t.is_live_submitted(r.revision_id)
                    .map(|manuscript_id| SweepCandidate {
                        manuscript_id,
                        assignment: r.clone(),
                    })
            })
            .collect())
    }

    async fn retention_candidates(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ManuscriptId>, RepositoryError> {
        let t = self.tables.read().await;
        Ok(t.manuscripts
            .values()
            .filter(|m| {
                let Some(current) = t.revisions.get(&m.current_revision_id) else {
                    return false;
                };
                let holds_files = m.copyright_form.is_some()
                    || t.revisions
                        .values()
                        .any(|r| r.manuscript_id == m.id && !r.file_refs().is_empty());
                current.status.is_abandoned() && current.updated_at < cutoff && holds_files
            })
            .map(|m| m.id)
            .collect())
    }
}

#[async_trait]
impl Directory for InMemoryRepository {
    async fn party(
        &self,
        party: ReviewerRef,
        deleted: DeletedParties,
    ) -> Result<Option<Party>, RepositoryError> {
        let t = self.tables.read().await;
        let found = match party {
            ReviewerRef::Registered(id) => t.accounts.get(&id),
            ReviewerRef::Guest(id) => t.guests.get(&id),
        };
        Ok(found.filter(|p| visible(p, deleted)).cloned())
    }

    async fn find_by_email(
        &self,
        email: &str,
        deleted: DeletedParties,
    ) -> Result<Option<Party>, RepositoryError> {
        let t = self.tables.read().await;
        let matches = |p: &&Party| p.contact.email.eq_ignore_ascii_case(email) && visible(p, deleted);
        Ok(t.accounts
            .values()
            .find(matches)
            .or_else(|| t.guests.values().find(matches))
            .cloned())
    }

    async fn registered_by_email(&self, email: &str) -> Result<Option<Party>, RepositoryError> {
        let t = self.tables.read().await;
        Ok(t.accounts
            .values()
            .find(|p| p.contact.email.eq_ignore_ascii_case(email) && !p.deleted)
            .cloned())
    }

    async fn create_author(
        &self,
        contact: Contact,
        section: Section,
    ) -> Result<AuthorId, RepositoryError> {
        let mut t = self.tables.write().await;
        if t
            .accounts
            .values()
            .any(|p| p.contact.email.eq_ignore_ascii_case(&contact.email))
        {
            return Err(RepositoryError::Conflict(format!(
                "an account for {} already exists",
                contact.email
            )));
        }
        let id = AuthorId(t.next_id());
        t.accounts.insert(
            id,
            Party {
                party: ReviewerRef::Registered(id),
                contact,
                section: Some(section),
                deleted: false,
            },
        );
        Ok(id)
    }

    async fn create_guest(&self, contact: Contact) -> Result<GuestAuthorId, RepositoryError> {
        let mut t = self.tables.write().await;
        let id = GuestAuthorId(t.next_id());
        t.guests.insert(
            id,
            Party {
                party: ReviewerRef::Guest(id),
                contact,
                section: None,
                deleted: false,
            },
        );
        Ok(id)
    }

    async fn soft_delete_guest(&self, id: GuestAuthorId) -> Result<(), RepositoryError> {
        let mut t = self.tables.write().await;
        let guest = t
            .guests
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::not_found("guest author", id))?;
        guest.deleted = true;
        Ok(())
    }
}

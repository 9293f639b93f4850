//! Workflow handlers.
//!
//! Every mutating handler has the same shape: check the request against the
//! loaded aggregate, persist, then run the effects against the reloaded
//! aggregate. A handler never returns success before its write is stored,
//! and effect failures never turn a stored write into an error.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use editorial_core::{
    Action, AuthorId, Clock, Contact, FileRef, ManuscriptAggregate, ManuscriptId, ManuscriptType,
    ReviewDecision, ReviewId, ReviewInput, ReviewerRef, Revision, RevisionAuthorId,
    RevisionContent, RevisionReviewer, RevisionReviewerId, Section, Status, Viewer,
    DEFAULT_MINIMUM_REVIEWS,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::effect::Effect;
use super::error::{RuleViolation, WorkflowError};
use super::interpreter::{execute_effects, InterpreterContext};
use super::repository::{
    DeletedParties, Directory, InviteResponse, NewAssignment, NewManuscript, Party,
    RepositoryError, WorkflowRepository,
};
use super::transition::{
    apply_production_step, apply_status_change, check_co_author_candidate,
    check_reviewer_candidate, plan_revision_round, ProductionStep, RevisionSubmission,
};
use crate::notify::{CustomMessage, NotificationKind, Notifier};
use crate::signed_link::LinkSigner;
use crate::storage::FileStorage;

/// Files `after` references that `before` does not.
fn added_files(before: &Revision, after: &Revision) -> Vec<FileRef> {
    let known = before.file_refs();
    after
        .file_refs()
        .into_iter()
        .filter(|file| !known.contains(file))
        .cloned()
        .collect()
}

/// Report a uniqueness conflict from the store as the rule it enforces.
fn conflict_as(violation: RuleViolation) -> impl FnOnce(RepositoryError) -> WorkflowError {
    move |e| match e {
        RepositoryError::Conflict(_) => violation.into(),
        other => other.into(),
    }
}

/// A file as received from the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

/// Revision text plus optional replacement files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentDraft {
    pub title: String,
    pub abstract_text: String,
    pub keywords: String,
    pub novelty: String,
    pub anonymous_file: Option<Upload>,
    pub source_file: Option<Upload>,
}

/// Fields of the create and edit forms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManuscriptDraft {
    pub manuscript_type: ManuscriptType,
    pub research_areas: Vec<String>,
    pub content: ContentDraft,
    pub copyright_form: Option<Upload>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewDraft {
    pub decision: ReviewDecision,
    pub comments_to_author: String,
    pub comments_to_associate_editor: Option<String>,
    pub report: Option<Upload>,
}

/// An editor's amendment to an existing review. `None` keeps the field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReviewEdit {
    pub decision: Option<ReviewDecision>,
    pub comments_to_author: Option<String>,
    pub comments_to_associate_editor: Option<String>,
}

/// The author's answer to a revision verdict.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevisionDraft {
    pub comment_reply: Option<String>,
    pub comment_reply_file: Option<Upload>,
    pub content: ContentDraft,
}

/// One audit row as shown on a manuscript's timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    /// Revision code, `R0`, `R1`, ...
    pub revision: String,
    pub event: String,
    pub value: String,
    pub created_by: Option<AuthorId>,
    pub created_at: DateTime<Utc>,
}

pub struct WorkflowService {
    repo: Arc<dyn WorkflowRepository>,
    directory: Arc<dyn Directory>,
    storage: Arc<dyn FileStorage>,
    effects: InterpreterContext,
    clock: Arc<dyn Clock>,
}

impl WorkflowService {
    pub fn new(
        repo: Arc<dyn WorkflowRepository>,
        directory: Arc<dyn Directory>,
        storage: Arc<dyn FileStorage>,
        notifier: Arc<dyn Notifier>,
        signer: LinkSigner,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let effects = InterpreterContext {
            directory: directory.clone(),
            notifier,
            signer,
        };
        Self {
            repo,
            directory,
            storage,
            effects,
            clock,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn interpreter(&self) -> &InterpreterContext {
        &self.effects
    }

    pub async fn load(&self, id: ManuscriptId) -> Result<ManuscriptAggregate, WorkflowError> {
        self.repo
            .load(id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("manuscript", id))
    }

    pub async fn load_by_code(&self, code: &str) -> Result<ManuscriptAggregate, WorkflowError> {
        let id = self
            .repo
            .find_by_code(code)
            .await?
            .ok_or_else(|| WorkflowError::not_found("manuscript", code))?;
        self.load(id).await
    }

    /// Reload after a write and run the effects against the fresh state.
    async fn finish(
        &self,
        id: ManuscriptId,
        effects: Vec<Effect>,
        now: DateTime<Utc>,
    ) -> Result<ManuscriptAggregate, WorkflowError> {
        let agg = self.load(id).await?;
        execute_effects(&self.effects, &agg, effects, now).await;
        Ok(agg)
    }

    /// Store an upload under the manuscript's folder for `revision_index`.
    pub async fn attach(
        &self,
        agg: &ManuscriptAggregate,
        revision_index: u32,
        slot: &str,
        upload: Upload,
    ) -> Result<FileRef, WorkflowError> {
        let name = Path::new(&upload.name)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload");
        let path = format!(
            "manuscripts/{}/R{}/{}-{}",
            agg.manuscript().code,
            revision_index,
            slot,
            name
        );
        Ok(self.storage.store(upload.bytes, &path).await?)
    }

    async fn attach_opt(
        &self,
        agg: &ManuscriptAggregate,
        revision_index: u32,
        slot: &str,
        upload: Option<Upload>,
    ) -> Result<Option<FileRef>, WorkflowError> {
        match upload {
            Some(upload) => Ok(Some(self.attach(agg, revision_index, slot, upload).await?)),
            None => Ok(None),
        }
    }

    /// Apply text and any replacement files of `draft` onto `content`.
    async fn apply_content(
        &self,
        agg: &ManuscriptAggregate,
        revision_index: u32,
        content: &mut RevisionContent,
        draft: ContentDraft,
    ) -> Result<(), WorkflowError> {
        content.title = draft.title;
        content.abstract_text = draft.abstract_text;
        content.keywords = draft.keywords;
        content.novelty = draft.novelty;
        if let Some(file) = self
            .attach_opt(agg, revision_index, "anonymous", draft.anonymous_file)
            .await?
        {
            content.anonymous_file = Some(file);
        }
        if let Some(file) = self
            .attach_opt(agg, revision_index, "source", draft.source_file)
            .await?
        {
            content.source_file = Some(file);
        }
        Ok(())
    }

    fn current_reviewer(
        agg: &ManuscriptAggregate,
        id: RevisionReviewerId,
    ) -> Result<RevisionReviewer, WorkflowError> {
        agg.current_reviewers()
            .find(|rr| rr.id == id)
            .cloned()
            .ok_or_else(|| WorkflowError::not_found("reviewer assignment", id))
    }

    // =========================================================================
    // Manuscript
    // =========================================================================

    /// Create a manuscript in `pending` owned by `author`.
    pub async fn create_manuscript(
        &self,
        author: AuthorId,
        draft: ManuscriptDraft,
    ) -> Result<ManuscriptAggregate, WorkflowError> {
        let now = self.clock.now();
        let content = RevisionContent {
            title: draft.content.title.clone(),
            abstract_text: draft.content.abstract_text.clone(),
            keywords: draft.content.keywords.clone(),
            novelty: draft.content.novelty.clone(),
            anonymous_file: None,
            source_file: None,
        };
        let created = self
            .repo
            .create_manuscript(NewManuscript {
                author_id: author,
                manuscript_type: draft.manuscript_type,
                research_areas: draft.research_areas.clone(),
                copyright_form: None,
                content,
                minimum_reviews: DEFAULT_MINIMUM_REVIEWS,
                created_at: now,
            })
            .await?;

        // Files live under the manuscript code, which only exists now.
        let has_files = draft.copyright_form.is_some()
            || draft.content.anonymous_file.is_some()
            || draft.content.source_file.is_some();
        if has_files {
            if let Err(e) = self.write_draft(&created, draft, now).await {
                warn!(
                    "Manuscript {} was created but its files could not be stored: {}",
                    created.manuscript().code,
                    e
                );
                return Err(e);
            }
        }

        let code = created.manuscript().code.clone();
        self.finish(
            created.manuscript().id,
            vec![Effect::info(format!(
                "Manuscript {} created by author {}",
                code, author
            ))],
            now,
        )
        .await
    }

    /// Store the draft's files and write it over the current revision.
    /// Files stored for a write that did not go through are removed again.
    async fn write_draft(
        &self,
        agg: &ManuscriptAggregate,
        draft: ManuscriptDraft,
        now: DateTime<Utc>,
    ) -> Result<(), WorkflowError> {
        let mut revision = agg.current().clone();
        let mut manuscript = agg.manuscript().clone();
        manuscript.manuscript_type = draft.manuscript_type;
        manuscript.research_areas = draft.research_areas;
        manuscript.updated_at = now;
        revision.updated_at = now;

        let mut stored = self
            .apply_content(agg, revision.index, &mut revision.content, draft.content)
            .await;
        if stored.is_ok() {
            match self
                .attach_opt(agg, revision.index, "copyright", draft.copyright_form)
                .await
            {
                Ok(Some(form)) => manuscript.copyright_form = Some(form),
                Ok(None) => {}
                Err(e) => stored = Err(e),
            }
        }
        let new_form = manuscript
            .copyright_form
            .clone()
            .filter(|form| agg.manuscript().copyright_form.as_ref() != Some(form));
        let mut new_files = added_files(agg.current(), &revision);
        new_files.extend(new_form.clone());

        if let Err(e) = stored {
            self.discard(new_files).await;
            return Err(e);
        }
        if let Err(e) = self.repo.update_revision(&revision).await {
            self.discard(new_files).await;
            return Err(e.into());
        }
        if let Err(e) = self.repo.update_manuscript(&manuscript).await {
            self.discard(new_form.into_iter().collect()).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Remove stored files nothing refers to. Failures are only logged.
    async fn discard(&self, files: Vec<FileRef>) {
        for file in files {
            match self.storage.delete(&file).await {
                Ok(_) => info!("Removed unreferenced file {}", file.0),
                Err(e) => warn!("Failed to remove unreferenced file {}: {}", file.0, e),
            }
        }
    }

    /// Replace the current revision's text and, where given, its files.
    pub async fn edit(
        &self,
        agg: &ManuscriptAggregate,
        draft: ManuscriptDraft,
    ) -> Result<ManuscriptAggregate, WorkflowError> {
        let now = self.clock.now();
        self.write_draft(agg, draft, now).await?;
        self.finish(
            agg.manuscript().id,
            vec![Effect::info(format!(
                "Manuscript {} edited ({})",
                agg.manuscript().code,
                agg.current().code()
            ))],
            now,
        )
        .await
    }

    /// Submit a pending manuscript; both manuscript files must be attached.
    pub async fn submit(
        &self,
        agg: &ManuscriptAggregate,
        actor: AuthorId,
    ) -> Result<ManuscriptAggregate, WorkflowError> {
        let content = &agg.current().content;
        if content.anonymous_file.is_none() {
            return Err(RuleViolation::MissingFile("anonymous file").into());
        }
        if content.source_file.is_none() {
            return Err(RuleViolation::MissingFile("source file").into());
        }
        self.change_status(agg, Status::Submitted, actor).await
    }

    /// Move the current revision to `target`, record the event and notify.
    pub async fn change_status(
        &self,
        agg: &ManuscriptAggregate,
        target: Status,
        actor: AuthorId,
    ) -> Result<ManuscriptAggregate, WorkflowError> {
        let now = self.clock.now();
        let result = apply_status_change(agg.current(), target, Some(actor), now)?;
        self.repo
            .record_status_change(&result.revision, result.event)
            .await?;
        self.finish(agg.manuscript().id, result.effects, now).await
    }

    pub async fn assign_associate_editor(
        &self,
        agg: &ManuscriptAggregate,
        associate_editor: AuthorId,
    ) -> Result<ManuscriptAggregate, WorkflowError> {
        let party = ReviewerRef::Registered(associate_editor);
        let is_editor = self
            .directory
            .party(party, DeletedParties::Exclude)
            .await?
            .is_some_and(|p| p.section == Some(Section::AssociateEditor));
        if !is_editor {
            return Err(RuleViolation::NotAssociateEditor.into());
        }

        let now = self.clock.now();
        let mut revision = agg.current().clone();
        revision.associate_editor_id = Some(associate_editor);
        revision.updated_at = now;
        self.repo.update_revision(&revision).await?;

        self.finish(
            agg.manuscript().id,
            vec![
                Effect::info(format!(
                    "Manuscript {}: associate editor {} assigned",
                    agg.manuscript().code,
                    associate_editor
                )),
                Effect::NotifyParty {
                    party,
                    kind: NotificationKind::AssociateEditorAssigned,
                },
            ],
            now,
        )
        .await
    }

    // =========================================================================
    // Reviewers
    // =========================================================================

    async fn existing_party(
        &self,
        party: ReviewerRef,
        missing: RuleViolation,
    ) -> Result<Party, WorkflowError> {
        self.directory
            .party(party, DeletedParties::Exclude)
            .await?
            .ok_or_else(|| missing.into())
    }

    pub async fn add_reviewer(
        &self,
        agg: &ManuscriptAggregate,
        actor: &Viewer,
        party: ReviewerRef,
    ) -> Result<ManuscriptAggregate, WorkflowError> {
        self.add_reviewers(agg, actor, vec![party]).await
    }

    /// Add several reviewers. Every candidate is checked before any is
    /// stored; the first violation is reported and nothing is added.
    pub async fn add_reviewers(
        &self,
        agg: &ManuscriptAggregate,
        actor: &Viewer,
        parties: Vec<ReviewerRef>,
    ) -> Result<ManuscriptAggregate, WorkflowError> {
        let mut accepted: Vec<ReviewerRef> = Vec::with_capacity(parties.len());
        for party in parties {
            self.existing_party(party, RuleViolation::ReviewerNotFound)
                .await?;
            check_reviewer_candidate(agg, party)?;
            if accepted.contains(&party) {
                return Err(RuleViolation::ReviewerTwice.into());
            }
            accepted.push(party);
        }

        let batch = accepted
            .iter()
            .map(|party| NewAssignment {
                revision_id: agg.current().id,
                party: *party,
                section: Some(actor.section),
                created_by: Some(actor.id),
            })
            .collect();
        // A conflict means a concurrent request assigned one of them first.
        self.repo
            .add_reviewers(batch)
            .await
            .map_err(conflict_as(RuleViolation::ReviewerTwice))?;

        let now = self.clock.now();
        self.finish(
            agg.manuscript().id,
            vec![Effect::info(format!(
                "Manuscript {}: {} reviewer(s) added to {}",
                agg.manuscript().code,
                accepted.len(),
                agg.current().code()
            ))],
            now,
        )
        .await
    }

    /// Add a reviewer by name and email, creating a guest when nobody has
    /// that address.
    pub async fn add_reviewer_manually(
        &self,
        agg: &ManuscriptAggregate,
        actor: &Viewer,
        contact: Contact,
    ) -> Result<ManuscriptAggregate, WorkflowError> {
        let party = self.party_for_contact(contact).await?;
        self.add_reviewer(agg, actor, party).await
    }

    async fn party_for_contact(&self, contact: Contact) -> Result<ReviewerRef, WorkflowError> {
        match self
            .directory
            .find_by_email(&contact.email, DeletedParties::Exclude)
            .await?
        {
            Some(found) => Ok(found.party),
            None => Ok(self.directory.create_guest(contact).await?.into()),
        }
    }

    pub async fn remove_reviewer(
        &self,
        agg: &ManuscriptAggregate,
        id: RevisionReviewerId,
    ) -> Result<ManuscriptAggregate, WorkflowError> {
        let removed = self
            .repo
            .remove_reviewer(agg.current().id, id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("reviewer assignment", id))?;
        self.finish(
            agg.manuscript().id,
            vec![Effect::info(format!(
                "Manuscript {}: reviewer {} removed",
                agg.manuscript().code,
                removed.reviewer
            ))],
            self.clock.now(),
        )
        .await
    }

    /// Set how many reviews the round needs.
    pub async fn set_minimum_reviews(
        &self,
        agg: &ManuscriptAggregate,
        minimum_reviews: u32,
    ) -> Result<ManuscriptAggregate, WorkflowError> {
        let now = self.clock.now();
        let mut revision = agg.current().clone();
        revision.minimum_reviews = minimum_reviews;
        revision.updated_at = now;
        self.repo.update_revision(&revision).await?;
        self.finish(agg.manuscript().id, vec![], now).await
    }

    pub async fn invite_reviewer(
        &self,
        agg: &ManuscriptAggregate,
        actor: AuthorId,
        id: RevisionReviewerId,
    ) -> Result<ManuscriptAggregate, WorkflowError> {
        self.send_invitation(agg, actor, id, NotificationKind::ReviewerInvited, None)
            .await
    }

    /// Re-invite with an editor-written message.
    pub async fn reinvite_reviewer(
        &self,
        agg: &ManuscriptAggregate,
        actor: AuthorId,
        id: RevisionReviewerId,
        message: CustomMessage,
    ) -> Result<ManuscriptAggregate, WorkflowError> {
        self.send_invitation(
            agg,
            actor,
            id,
            NotificationKind::ReviewerReinvited,
            Some(message),
        )
        .await
    }

    async fn send_invitation(
        &self,
        agg: &ManuscriptAggregate,
        actor: AuthorId,
        id: RevisionReviewerId,
        kind: NotificationKind,
        custom: Option<CustomMessage>,
    ) -> Result<ManuscriptAggregate, WorkflowError> {
        let now = self.clock.now();
        let assignment = Self::current_reviewer(agg, id)?;
        if assignment.invitation.is_resolved() {
            return Err(RuleViolation::InvitationAnswered.into());
        }
        // The stored row may have been answered since `agg` was loaded.
        if !self.repo.invite(assignment.id, now, Some(actor)).await? {
            return Err(RuleViolation::InvitationAnswered.into());
        }

        self.finish(
            agg.manuscript().id,
            vec![
                Effect::info(format!(
                    "Manuscript {}: invitation sent to {}",
                    agg.manuscript().code,
                    assignment.reviewer
                )),
                Effect::InviteReviewer {
                    party: assignment.reviewer,
                    kind,
                    custom,
                },
            ],
            now,
        )
        .await
    }

    /// Nudge an accepted reviewer to submit the review.
    pub async fn remind_reviewer(
        &self,
        agg: &ManuscriptAggregate,
        id: RevisionReviewerId,
    ) -> Result<ManuscriptAggregate, WorkflowError> {
        let assignment = Self::current_reviewer(agg, id)?;
        if assignment.invitation.invited_at.is_none() {
            return Err(RuleViolation::NoInvitation.into());
        }
        if assignment.invitation.accepted_at.is_none()
            || !self.repo.remind(assignment.id).await?
        {
            return Err(RuleViolation::ReviewerNotAccepted.into());
        }

        self.finish(
            agg.manuscript().id,
            vec![Effect::NotifyParty {
                party: assignment.reviewer,
                kind: NotificationKind::ReviewReminder,
            }],
            self.clock.now(),
        )
        .await
    }

    /// Answer the open invitation `party` holds on the manuscript's current
    /// revision. Returns whether this answer was the one recorded; a second
    /// answer loses silently.
    ///
    /// A soft-deleted guest is resolved to the registered account with the
    /// same email.
    pub async fn respond_to_invitation(
        &self,
        manuscript: ManuscriptId,
        party: ReviewerRef,
        response: InviteResponse,
    ) -> Result<bool, WorkflowError> {
        let agg = self.load(manuscript).await?;
        self.answer_invitation(&agg, party, response).await
    }

    /// [`Self::respond_to_invitation`] on an already loaded manuscript. The
    /// answer itself is a conditional write, so `agg` may be slightly stale.
    pub async fn answer_invitation(
        &self,
        agg: &ManuscriptAggregate,
        party: ReviewerRef,
        response: InviteResponse,
    ) -> Result<bool, WorkflowError> {
        let mut candidates = vec![party];
        if let Some(found) = self.directory.party(party, DeletedParties::Include).await? {
            if found.deleted {
                if let Some(account) = self
                    .directory
                    .registered_by_email(&found.contact.email)
                    .await?
                {
                    candidates.insert(0, account.party);
                }
            }
        }

        let assignment = candidates
            .iter()
            .find_map(|candidate| {
                agg.current_reviewers()
                    .find(|rr| rr.reviewer == *candidate && rr.invitation.is_open())
            })
            .cloned()
            .ok_or_else(|| WorkflowError::not_found("open invitation", party))?;

        let now = self.clock.now();
        let won = self
            .repo
            .resolve_invitation(assignment.id, response, now)
            .await?;
        if !won {
            info!(
                "Manuscript {}: late {} from {} ignored",
                agg.manuscript().code,
                response,
                assignment.reviewer
            );
            return Ok(false);
        }

        let mut effects = vec![Effect::info(format!(
            "Manuscript {}: {} answered {}",
            agg.manuscript().code,
            assignment.reviewer,
            response
        ))];
        if response == InviteResponse::Deny {
            effects.push(Effect::NotifyParty {
                party: assignment.reviewer,
                kind: NotificationKind::ReviewInviteDenied,
            });
        }
        self.finish(agg.manuscript().id, effects, now).await?;
        Ok(true)
    }

    // =========================================================================
    // Co-authors
    // =========================================================================

    pub async fn add_co_author(
        &self,
        agg: &ManuscriptAggregate,
        actor: &Viewer,
        party: ReviewerRef,
    ) -> Result<ManuscriptAggregate, WorkflowError> {
        self.existing_party(party, RuleViolation::AuthorNotFound)
            .await?;
        check_co_author_candidate(agg, party)?;
        self.repo
            .add_co_author(NewAssignment {
                revision_id: agg.current().id,
                party,
                section: Some(actor.section),
                created_by: Some(actor.id),
            })
            .await
            .map_err(conflict_as(RuleViolation::CoAuthorTwice))?;
        self.finish(
            agg.manuscript().id,
            vec![Effect::info(format!(
                "Manuscript {}: co-author {} added",
                agg.manuscript().code,
                party
            ))],
            self.clock.now(),
        )
        .await
    }

    pub async fn add_co_author_manually(
        &self,
        agg: &ManuscriptAggregate,
        actor: &Viewer,
        contact: Contact,
    ) -> Result<ManuscriptAggregate, WorkflowError> {
        let party = self.party_for_contact(contact).await?;
        self.add_co_author(agg, actor, party).await
    }

    pub async fn remove_co_author(
        &self,
        agg: &ManuscriptAggregate,
        id: RevisionAuthorId,
    ) -> Result<ManuscriptAggregate, WorkflowError> {
        self.repo
            .remove_co_author(agg.current().id, id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("co-author assignment", id))?;
        self.finish(agg.manuscript().id, vec![], self.clock.now())
            .await
    }

    // =========================================================================
    // Reviews and decisions
    // =========================================================================

    /// Store (or replace) `reviewer`'s review of the current revision.
    pub async fn submit_review(
        &self,
        agg: &ManuscriptAggregate,
        reviewer: ReviewerRef,
        draft: ReviewDraft,
    ) -> Result<ManuscriptAggregate, WorkflowError> {
        let current = agg.current();
        let accepted = agg
            .current_reviewers()
            .any(|rr| rr.reviewer == reviewer && rr.invitation.accepted_at.is_some());
        if !accepted {
            return Err(RuleViolation::ReviewerNotAccepted.into());
        }

        let previous_report = agg
            .reviews_of(current.id)
            .find(|r| r.reviewer == reviewer)
            .and_then(|r| r.review_report.clone());
        let report = match self
            .attach_opt(agg, current.index, "review-report", draft.report)
            .await?
        {
            Some(file) => Some(file),
            None => previous_report,
        };

        let now = self.clock.now();
        self.repo
            .upsert_review(
                current.id,
                reviewer,
                ReviewInput {
                    decision: draft.decision,
                    comments_to_author: draft.comments_to_author,
                    comments_to_associate_editor: draft.comments_to_associate_editor,
                    review_report: report,
                },
                now,
            )
            .await?;

        self.finish(
            agg.manuscript().id,
            vec![
                Effect::info(format!(
                    "Manuscript {}: review of {} by {} ({})",
                    agg.manuscript().code,
                    current.code(),
                    reviewer,
                    draft.decision
                )),
                Effect::NotifyParty {
                    party: reviewer,
                    kind: NotificationKind::ReviewSubmitted,
                },
            ],
            now,
        )
        .await
    }

    /// An editor amends a review of the current revision.
    pub async fn update_comment(
        &self,
        agg: &ManuscriptAggregate,
        id: ReviewId,
        edit: ReviewEdit,
    ) -> Result<ManuscriptAggregate, WorkflowError> {
        let mut review = self
            .repo
            .review(id)
            .await?
            .filter(|r| r.revision_id == agg.current().id)
            .ok_or_else(|| WorkflowError::not_found("review", id))?;

        if let Some(decision) = edit.decision {
            review.decision = decision;
        }
        if let Some(comments) = edit.comments_to_author {
            review.comments_to_author = comments;
        }
        if let Some(comments) = edit.comments_to_associate_editor {
            review.comments_to_associate_editor = Some(comments);
        }
        let now = self.clock.now();
        review.updated_at = now;
        self.repo.update_review(&review).await?;
        self.finish(agg.manuscript().id, vec![], now).await
    }

    /// The associate editor's summary for the editor in chief.
    pub async fn send_to_eic(
        &self,
        agg: &ManuscriptAggregate,
        comments: String,
    ) -> Result<ManuscriptAggregate, WorkflowError> {
        let now = self.clock.now();
        let mut revision = agg.current().clone();
        revision.comments_to_eic = Some(comments);
        revision.updated_at = now;
        self.repo.update_revision(&revision).await?;
        self.finish(
            agg.manuscript().id,
            vec![Effect::info(format!(
                "Manuscript {}: {} sent to the editor in chief",
                agg.manuscript().code,
                revision.code()
            ))],
            now,
        )
        .await
    }

    /// Open the next revision round with the author's reply and new content.
    pub async fn revise(
        &self,
        agg: &ManuscriptAggregate,
        actor: AuthorId,
        draft: RevisionDraft,
    ) -> Result<ManuscriptAggregate, WorkflowError> {
        let current = agg.current();
        if !current.status.is_revision_required() {
            return Err(RuleViolation::NotUnderRevision.into());
        }
        let next_index = current.index + 1;

        let comment_reply_file = self
            .attach_opt(agg, current.index, "comment-reply", draft.comment_reply_file)
            .await?;
        let mut content = RevisionContent::default();
        let filled = self
            .apply_content(agg, next_index, &mut content, draft.content)
            .await;
        let stored: Vec<FileRef> = comment_reply_file
            .iter()
            .chain(&content.anonymous_file)
            .chain(&content.source_file)
            .cloned()
            .collect();
        if let Err(e) = filled {
            self.discard(stored).await;
            return Err(e);
        }

        let now = self.clock.now();
        let submission = RevisionSubmission {
            comment_reply: draft.comment_reply,
            comment_reply_file,
            content,
        };
        match self.open_round(agg, submission, actor, now).await {
            Ok(effects) => self.finish(agg.manuscript().id, effects, now).await,
            Err(e) => {
                // Typically a concurrent revise that opened the round first.
                self.discard(stored).await;
                Err(e)
            }
        }
    }

    async fn open_round(
        &self,
        agg: &ManuscriptAggregate,
        submission: RevisionSubmission,
        actor: AuthorId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Effect>, WorkflowError> {
        let plan = plan_revision_round(agg, submission, Some(actor), now)?;
        self.repo.create_revision_round(plan.round).await?;
        Ok(plan.effects)
    }

    /// Amend the reply stored on the previous revision.
    pub async fn update_comment_reply(
        &self,
        agg: &ManuscriptAggregate,
        reply: Option<String>,
        reply_file: Option<Upload>,
    ) -> Result<ManuscriptAggregate, WorkflowError> {
        let previous = agg.previous().ok_or(RuleViolation::NoPreviousRevision)?;
        let mut revision: Revision = previous.clone();
        if let Some(file) = self
            .attach_opt(agg, previous.index, "comment-reply", reply_file)
            .await?
        {
            revision.comment_reply_file = Some(file);
        }
        if reply.is_some() {
            revision.comment_reply = reply;
        }
        let now = self.clock.now();
        revision.updated_at = now;
        self.repo.update_revision(&revision).await?;
        self.finish(agg.manuscript().id, vec![], now).await
    }

    pub async fn remind_author(
        &self,
        agg: &ManuscriptAggregate,
    ) -> Result<ManuscriptAggregate, WorkflowError> {
        if !agg.status().is_revision_required() {
            return Err(RuleViolation::NotUnderRevision.into());
        }
        let now = self.clock.now();
        execute_effects(
            &self.effects,
            agg,
            vec![Effect::NotifyAuthor {
                kind: NotificationKind::RevisionReminder,
            }],
            now,
        )
        .await;
        Ok(agg.clone())
    }

    // =========================================================================
    // Production
    // =========================================================================

    pub async fn production_step(
        &self,
        agg: &ManuscriptAggregate,
        step: ProductionStep,
    ) -> Result<ManuscriptAggregate, WorkflowError> {
        let now = self.clock.now();
        let label = format!("{:?}", step);
        let revision = apply_production_step(agg.current(), step, now)?;
        self.repo.update_revision(&revision).await?;
        self.finish(
            agg.manuscript().id,
            vec![Effect::info(format!(
                "Manuscript {}: {}",
                agg.manuscript().code,
                label
            ))],
            now,
        )
        .await
    }

    /// Formatter uploads the formatted paper; the manuscript moves on to
    /// proofreading.
    pub async fn update_formatter(
        &self,
        agg: &ManuscriptAggregate,
        actor: AuthorId,
        formatted_paper: Upload,
        correction_file: Option<Upload>,
    ) -> Result<ManuscriptAggregate, WorkflowError> {
        let current = agg.current();
        if current.status != Status::Formatter {
            return Err(RuleViolation::WrongStage {
                action: Action::UpdateFormatter,
                status: current.status,
            }
            .into());
        }
        let mut revision = current.clone();
        revision.files.formatted_paper = Some(
            self.attach(agg, current.index, "formatted", formatted_paper)
                .await?,
        );
        if let Some(file) = self
            .attach_opt(agg, current.index, "correction", correction_file)
            .await?
        {
            revision.files.correction_file = Some(file);
        }
        self.advance_with_files(agg, revision, Status::Proofreader, actor)
            .await
    }

    /// Proofreader uploads the proofread paper; the article is ready.
    pub async fn update_proofreader(
        &self,
        agg: &ManuscriptAggregate,
        actor: AuthorId,
        proofread_paper: Upload,
    ) -> Result<ManuscriptAggregate, WorkflowError> {
        let current = agg.current();
        if current.status != Status::Proofreader {
            return Err(RuleViolation::WrongStage {
                action: Action::UpdateProofreader,
                status: current.status,
            }
            .into());
        }
        let mut revision = current.clone();
        revision.files.proofread_paper = Some(
            self.attach(agg, current.index, "proofread", proofread_paper)
                .await?,
        );
        self.advance_with_files(agg, revision, Status::ReadyArticle, actor)
            .await
    }

    async fn advance_with_files(
        &self,
        agg: &ManuscriptAggregate,
        revision: Revision,
        target: Status,
        actor: AuthorId,
    ) -> Result<ManuscriptAggregate, WorkflowError> {
        let now = self.clock.now();
        let result = apply_status_change(&revision, target, Some(actor), now)?;
        self.repo
            .record_status_change(&result.revision, result.event)
            .await?;
        self.finish(agg.manuscript().id, result.effects, now).await
    }

    // =========================================================================
    // Reading
    // =========================================================================

    /// Audit trail of every revision, oldest first.
    pub async fn timeline(&self, code: &str) -> Result<Vec<TimelineEntry>, WorkflowError> {
        let agg = self.load_by_code(code).await?;
        let events = self.repo.events(agg.manuscript().id).await?;
        Ok(events
            .into_iter()
            .map(|e| TimelineEntry {
                revision: agg
                    .revision(e.revision_id)
                    .map(|r| r.code())
                    .unwrap_or_else(|| e.revision_id.to_string()),
                event: e.event.to_string(),
                value: e.value,
                created_by: e.created_by,
                created_at: e.created_at,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests;

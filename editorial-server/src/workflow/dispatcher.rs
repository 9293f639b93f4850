//! Single entry point for user-requested actions.
//!
//! [`WorkflowService::dispatch`] checks the request against
//! [`permitted_actions`] for the viewer and the manuscript as currently
//! stored, and only then routes it to the handler. A request outside the
//! permitted set fails with [`WorkflowError::NotPermitted`] before anything
//! is written.

use editorial_core::{
    permitted_actions, Action, AuthorId, Contact, FileRef, ManuscriptAggregate, ManuscriptId,
    ProductionFiles, ReviewId, ReviewerRef, RevisionAuthor, RevisionAuthorId, RevisionReviewer,
    RevisionReviewerId, Section, Viewer,
};
use tracing::{debug, warn};

use super::error::WorkflowError;
use super::repository::InviteResponse;
use super::service::{
    ManuscriptDraft, ReviewDraft, ReviewEdit, RevisionDraft, Upload, WorkflowService,
};
use super::transition::ProductionStep;
use crate::notify::CustomMessage;

/// A requested action together with its form data.
#[derive(Debug, Clone)]
pub enum ActionRequest {
    // ===== manuscript =====
    Create(ManuscriptDraft),
    Edit(ManuscriptDraft),
    View,
    Submit,

    // ===== reviewers =====
    Reviewers,
    AddReviewer(ReviewerRef),
    AddReviewers(Vec<ReviewerRef>),
    AddReviewerManually(Contact),
    RemoveReviewer(RevisionReviewerId),

    // ===== co-authors =====
    Authors,
    AddAuthor(ReviewerRef),
    AddAuthorManually(Contact),
    RemoveAuthor(RevisionAuthorId),

    /// One of the plain status changes (`withdraw`, `reject`, `publish`, ...).
    ChangeStatus(Action),

    // ===== review round =====
    Invite {
        minimum_reviews: u32,
    },
    AssignAssociateEditor(AuthorId),
    InviteReviewer(RevisionReviewerId),
    InviteMoreReviewer(RevisionReviewerId),
    ReinviteReviewer {
        id: RevisionReviewerId,
        message: CustomMessage,
    },
    AcceptReviewInvite,
    DenyReviewInvite,
    RemindReviewer(RevisionReviewerId),
    Review(ReviewDraft),
    SendToEic {
        comments: String,
    },
    Revise(RevisionDraft),
    UpdateComment {
        review: ReviewId,
        edit: ReviewEdit,
    },
    UpdateCommentReply {
        reply: Option<String>,
        reply_file: Option<Upload>,
    },
    RemindAuthor,

    // ===== production sub-stages =====
    SendForSimilarityCheck,
    UpdateSimilarity(u8),
    SendForPagination,
    UpdatePages {
        pages: u32,
        source_file: Option<Upload>,
    },
    SendForGrammarCheck,
    GrammarChecked {
        source_file: Option<Upload>,
    },
    UpdateFormatter {
        formatted_paper: Upload,
        correction_file: Option<Upload>,
    },
    UpdateProofreader {
        proofread_paper: Upload,
    },
    GetProofreader,
}

impl ActionRequest {
    /// The action token the request is checked against.
    pub fn action(&self) -> Action {
        match self {
            ActionRequest::Create(_) => Action::Create,
            ActionRequest::Edit(_) => Action::Edit,
            ActionRequest::View => Action::View,
            ActionRequest::Submit => Action::Submit,
            ActionRequest::Reviewers => Action::Reviewers,
            ActionRequest::AddReviewer(_) => Action::AddReviewer,
            ActionRequest::AddReviewers(_) => Action::AddReviewers,
            ActionRequest::AddReviewerManually(_) => Action::AddReviewerManually,
            ActionRequest::RemoveReviewer(_) => Action::RemoveReviewer,
            ActionRequest::Authors => Action::Authors,
            ActionRequest::AddAuthor(_) => Action::AddAuthor,
            ActionRequest::AddAuthorManually(_) => Action::AddAuthorManually,
            ActionRequest::RemoveAuthor(_) => Action::RemoveAuthor,
            ActionRequest::ChangeStatus(action) => *action,
            ActionRequest::Invite { .. } => Action::Invite,
            ActionRequest::AssignAssociateEditor(_) => Action::AssignAssociateEditor,
            ActionRequest::InviteReviewer(_) => Action::InviteReviewer,
            ActionRequest::InviteMoreReviewer(_) => Action::InviteMoreReviewer,
            ActionRequest::ReinviteReviewer { .. } => Action::ReinviteReviewer,
            ActionRequest::AcceptReviewInvite => Action::AcceptReviewInvite,
            ActionRequest::DenyReviewInvite => Action::DenyReviewInvite,
            ActionRequest::RemindReviewer(_) => Action::RemindReviewer,
            ActionRequest::Review(_) => Action::Review,
            ActionRequest::SendToEic { .. } => Action::SendToEic,
            ActionRequest::Revise(_) => Action::Revise,
            ActionRequest::UpdateComment { .. } => Action::UpdateComment,
            ActionRequest::UpdateCommentReply { .. } => Action::UpdateCommentReply,
            ActionRequest::RemindAuthor => Action::RemindAuthor,
            ActionRequest::SendForSimilarityCheck => Action::SendForSimilarityCheck,
            ActionRequest::UpdateSimilarity(_) => Action::UpdateSimilarity,
            ActionRequest::SendForPagination => Action::SendForPagination,
            ActionRequest::UpdatePages { .. } => Action::UpdatePages,
            ActionRequest::SendForGrammarCheck => Action::SendForGrammarCheck,
            ActionRequest::GrammarChecked { .. } => Action::GrammarChecked,
            ActionRequest::UpdateFormatter { .. } => Action::UpdateFormatter,
            ActionRequest::UpdateProofreader { .. } => Action::UpdateProofreader,
            ActionRequest::GetProofreader => Action::GetProofreader,
        }
    }
}

/// What a dispatched request hands back.
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    /// The manuscript after the action was applied.
    Manuscript(ManuscriptAggregate),
    /// Whether an invitation answer was the one recorded.
    Answered(bool),
    Reviewers(Vec<RevisionReviewer>),
    Authors(Vec<RevisionAuthor>),
    ProductionFiles(ProductionFiles),
}

impl WorkflowService {
    /// Check `request` against what `viewer` may do to `manuscript` and run
    /// it. `manuscript` is `None` only for [`ActionRequest::Create`].
    pub async fn dispatch(
        &self,
        viewer: &Viewer,
        manuscript: Option<ManuscriptId>,
        request: ActionRequest,
    ) -> Result<DispatchOutcome, WorkflowError> {
        let action = request.action();

        let (id, request) = match (manuscript, request) {
            (_, ActionRequest::Create(draft)) => {
                if viewer.section != Section::Author {
                    warn!("{} may not create manuscripts", viewer.section);
                    return Err(WorkflowError::NotPermitted { action });
                }
                let agg = self.create_manuscript(viewer.id, draft).await?;
                return Ok(DispatchOutcome::Manuscript(agg));
            }
            (Some(id), request) => (id, request),
            (None, _) => return Err(WorkflowError::not_found("manuscript", "(none)")),
        };

        let agg = self.load(id).await?;
        if !permitted_actions(viewer, &agg).contains(&action) {
            warn!(
                "Refused {} on {} for {} {}",
                action,
                agg.manuscript().code,
                viewer.section,
                viewer.id
            );
            return Err(WorkflowError::NotPermitted { action });
        }
        debug!(
            "Dispatching {} on {} for {} {}",
            action,
            agg.manuscript().code,
            viewer.section,
            viewer.id
        );

        self.route(viewer, &agg, request).await
    }

    async fn route(
        &self,
        viewer: &Viewer,
        agg: &ManuscriptAggregate,
        request: ActionRequest,
    ) -> Result<DispatchOutcome, WorkflowError> {
        use DispatchOutcome::Manuscript;

        let me = ReviewerRef::Registered(viewer.id);
        let outcome = match request {
            ActionRequest::Create(_) => {
                return Err(WorkflowError::NotPermitted {
                    action: Action::Create,
                })
            }

            // ===== reads =====
            ActionRequest::View => Manuscript(agg.clone()),
            ActionRequest::Reviewers => {
                DispatchOutcome::Reviewers(agg.current_reviewers().cloned().collect())
            }
            ActionRequest::Authors => DispatchOutcome::Authors(
                agg.authors()
                    .iter()
                    .filter(|a| a.revision_id == agg.current().id)
                    .cloned()
                    .collect(),
            ),
            ActionRequest::GetProofreader => {
                DispatchOutcome::ProductionFiles(agg.current().files.clone())
            }

            // ===== manuscript =====
            ActionRequest::Edit(draft) => Manuscript(self.edit(agg, draft).await?),
            ActionRequest::Submit => Manuscript(self.submit(agg, viewer.id).await?),
            ActionRequest::ChangeStatus(action) => {
                let target = action
                    .target_status()
                    .ok_or(WorkflowError::NotPermitted { action })?;
                Manuscript(self.change_status(agg, target, viewer.id).await?)
            }

            // ===== reviewers =====
            ActionRequest::AddReviewer(party) => {
                Manuscript(self.add_reviewer(agg, viewer, party).await?)
            }
            ActionRequest::AddReviewers(parties) => {
                Manuscript(self.add_reviewers(agg, viewer, parties).await?)
            }
            ActionRequest::AddReviewerManually(contact) => {
                Manuscript(self.add_reviewer_manually(agg, viewer, contact).await?)
            }
            ActionRequest::RemoveReviewer(id) => Manuscript(self.remove_reviewer(agg, id).await?),

            // ===== co-authors =====
            ActionRequest::AddAuthor(party) => {
                Manuscript(self.add_co_author(agg, viewer, party).await?)
            }
            ActionRequest::AddAuthorManually(contact) => {
                Manuscript(self.add_co_author_manually(agg, viewer, contact).await?)
            }
            ActionRequest::RemoveAuthor(id) => Manuscript(self.remove_co_author(agg, id).await?),

            // ===== review round =====
            ActionRequest::Invite { minimum_reviews } => {
                Manuscript(self.set_minimum_reviews(agg, minimum_reviews).await?)
            }
            ActionRequest::AssignAssociateEditor(ae) => {
                Manuscript(self.assign_associate_editor(agg, ae).await?)
            }
            ActionRequest::InviteReviewer(id) | ActionRequest::InviteMoreReviewer(id) => {
                Manuscript(self.invite_reviewer(agg, viewer.id, id).await?)
            }
            ActionRequest::ReinviteReviewer { id, message } => {
                Manuscript(self.reinvite_reviewer(agg, viewer.id, id, message).await?)
            }
            ActionRequest::AcceptReviewInvite => DispatchOutcome::Answered(
                self.respond_to_invitation(agg.manuscript().id, me, InviteResponse::Accept)
                    .await?,
            ),
            ActionRequest::DenyReviewInvite => DispatchOutcome::Answered(
                self.respond_to_invitation(agg.manuscript().id, me, InviteResponse::Deny)
                    .await?,
            ),
            ActionRequest::RemindReviewer(id) => Manuscript(self.remind_reviewer(agg, id).await?),
            ActionRequest::Review(draft) => Manuscript(self.submit_review(agg, me, draft).await?),
            ActionRequest::SendToEic { comments } => {
                Manuscript(self.send_to_eic(agg, comments).await?)
            }
            ActionRequest::Revise(draft) => Manuscript(self.revise(agg, viewer.id, draft).await?),
            ActionRequest::UpdateComment { review, edit } => {
                Manuscript(self.update_comment(agg, review, edit).await?)
            }
            ActionRequest::UpdateCommentReply { reply, reply_file } => {
                Manuscript(self.update_comment_reply(agg, reply, reply_file).await?)
            }
            ActionRequest::RemindAuthor => Manuscript(self.remind_author(agg).await?),

            // ===== production sub-stages =====
            ActionRequest::SendForSimilarityCheck => Manuscript(
                self.production_step(agg, ProductionStep::SendForSimilarityCheck)
                    .await?,
            ),
            ActionRequest::UpdateSimilarity(percent) => Manuscript(
                self.production_step(agg, ProductionStep::UpdateSimilarity(percent))
                    .await?,
            ),
            ActionRequest::SendForPagination => Manuscript(
                self.production_step(agg, ProductionStep::SendForPagination)
                    .await?,
            ),
            ActionRequest::UpdatePages { pages, source_file } => {
                let source_file = self.attach_source(agg, source_file).await?;
                Manuscript(
                    self.production_step(agg, ProductionStep::UpdatePages { pages, source_file })
                        .await?,
                )
            }
            ActionRequest::SendForGrammarCheck => Manuscript(
                self.production_step(agg, ProductionStep::SendForGrammarCheck)
                    .await?,
            ),
            ActionRequest::GrammarChecked { source_file } => {
                let source_file = self.attach_source(agg, source_file).await?;
                Manuscript(
                    self.production_step(agg, ProductionStep::GrammarChecked { source_file })
                        .await?,
                )
            }
            ActionRequest::UpdateFormatter {
                formatted_paper,
                correction_file,
            } => Manuscript(
                self.update_formatter(agg, viewer.id, formatted_paper, correction_file)
                    .await?,
            ),
            ActionRequest::UpdateProofreader { proofread_paper } => Manuscript(
                self.update_proofreader(agg, viewer.id, proofread_paper)
                    .await?,
            ),
        };
        Ok(outcome)
    }

    async fn attach_source(
        &self,
        agg: &ManuscriptAggregate,
        upload: Option<Upload>,
    ) -> Result<Option<FileRef>, WorkflowError> {
        match upload {
            Some(upload) => Ok(Some(
                self.attach(agg, agg.current().index, "source", upload)
                    .await?,
            )),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};
    use editorial_core::{FixedClock, ManuscriptType, ReviewDecision, Status};

    use super::*;
    use crate::notify::testing::CapturingNotifier;
    use crate::signed_link::LinkSigner;
    use crate::storage::testing::MemoryFileStorage;
    use crate::workflow::repository::{Directory, InMemoryRepository};
    use crate::workflow::service::ContentDraft;

    struct Desk {
        service: WorkflowService,
        eic: Viewer,
        ae: Viewer,
        author: Viewer,
        other_author: Viewer,
        reviewer: Viewer,
        epm: Viewer,
    }

    async fn desk() -> Desk {
        let repo = Arc::new(InMemoryRepository::new());
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 3, 4, 8, 0, 0).unwrap(),
        ));
        let mut viewers = Vec::new();
        for (name, section) in [
            ("eic", Section::EditorInChief),
            ("ae", Section::AssociateEditor),
            ("author", Section::Author),
            ("other", Section::Author),
            ("reviewer", Section::Reviewer),
            ("epm", Section::Epm),
        ] {
            let id = repo
                .create_author(
                    Contact::new(name, format!("{}@example.org", name)),
                    section,
                )
                .await
                .unwrap();
            viewers.push(Viewer::new(id, section));
        }
        let service = WorkflowService::new(
            repo.clone(),
            repo,
            Arc::new(MemoryFileStorage::default()),
            Arc::new(CapturingNotifier::default()),
            LinkSigner::new(b"k", "http://localhost:3000", Duration::days(14)).unwrap(),
            clock,
        );
        Desk {
            service,
            eic: viewers[0],
            ae: viewers[1],
            author: viewers[2],
            other_author: viewers[3],
            reviewer: viewers[4],
            epm: viewers[5],
        }
    }

    fn draft() -> ManuscriptDraft {
        ManuscriptDraft {
            manuscript_type: ManuscriptType::CaseStudy,
            research_areas: vec![],
            content: ContentDraft {
                title: "A case".to_string(),
                anonymous_file: Some(Upload::new("a.pdf", b"a".to_vec())),
                source_file: Some(Upload::new("s.docx", b"s".to_vec())),
                ..ContentDraft::default()
            },
            copyright_form: None,
        }
    }

    fn manuscript(outcome: DispatchOutcome) -> ManuscriptAggregate {
        match outcome {
            DispatchOutcome::Manuscript(agg) => agg,
            other => panic!("expected a manuscript, got {:?}", other),
        }
    }

    async fn created(d: &Desk) -> ManuscriptId {
        let agg = manuscript(
            d.service
                .dispatch(&d.author, None, ActionRequest::Create(draft()))
                .await
                .unwrap(),
        );
        agg.manuscript().id
    }

    async fn submitted(d: &Desk) -> ManuscriptId {
        let id = created(d).await;
        // Submitting is a follow-up of editing the own pending manuscript.
        d.service
            .dispatch(&d.author, Some(id), ActionRequest::Submit)
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn only_authors_create() {
        let d = desk().await;
        let err = d
            .service
            .dispatch(&d.reviewer, None, ActionRequest::Create(draft()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::NotPermitted {
                action: Action::Create
            }
        ));
        let id = created(&d).await;
        let agg = d.service.load(id).await.unwrap();
        assert_eq!(agg.status(), Status::Pending);
    }

    #[tokio::test]
    async fn other_authors_see_nothing() {
        let d = desk().await;
        let id = created(&d).await;
        let err = d
            .service
            .dispatch(&d.other_author, Some(id), ActionRequest::View)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::NotPermitted {
                action: Action::View
            }
        ));
    }

    #[tokio::test]
    async fn author_cannot_reject_own_manuscript() {
        let d = desk().await;
        let id = submitted(&d).await;
        let err = d
            .service
            .dispatch(
                &d.author,
                Some(id),
                ActionRequest::ChangeStatus(Action::Reject),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::NotPermitted {
                action: Action::Reject
            }
        ));
        assert_eq!(
            d.service.load(id).await.unwrap().status(),
            Status::Submitted
        );

        let agg = manuscript(
            d.service
                .dispatch(&d.eic, Some(id), ActionRequest::ChangeStatus(Action::Reject))
                .await
                .unwrap(),
        );
        assert_eq!(agg.status(), Status::Rejected);
    }

    #[tokio::test]
    async fn status_change_needs_a_status_action() {
        let d = desk().await;
        let id = submitted(&d).await;
        // `view` is permitted but is not a status change.
        let err = d
            .service
            .dispatch(&d.eic, Some(id), ActionRequest::ChangeStatus(Action::View))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NotPermitted { .. }));
    }

    #[tokio::test]
    async fn review_round_through_the_gate() {
        let d = desk().await;
        let id = submitted(&d).await;
        let reviewer = ReviewerRef::Registered(d.reviewer.id);

        // Not yet handling the manuscript.
        let err = d
            .service
            .dispatch(&d.ae, Some(id), ActionRequest::AddReviewer(reviewer))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NotPermitted { .. }));

        d.service
            .dispatch(
                &d.eic,
                Some(id),
                ActionRequest::AssignAssociateEditor(d.ae.id),
            )
            .await
            .unwrap();
        let agg = manuscript(
            d.service
                .dispatch(&d.ae, Some(id), ActionRequest::AddReviewer(reviewer))
                .await
                .unwrap(),
        );
        let assignment = agg.current_reviewers().next().unwrap().id;
        d.service
            .dispatch(&d.ae, Some(id), ActionRequest::InviteReviewer(assignment))
            .await
            .unwrap();

        let answered = d
            .service
            .dispatch(&d.reviewer, Some(id), ActionRequest::AcceptReviewInvite)
            .await
            .unwrap();
        assert!(matches!(answered, DispatchOutcome::Answered(true)));

        // The invitation is resolved, so answering again is no longer offered.
        let err = d
            .service
            .dispatch(&d.reviewer, Some(id), ActionRequest::DenyReviewInvite)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NotPermitted { .. }));

        let agg = manuscript(
            d.service
                .dispatch(
                    &d.reviewer,
                    Some(id),
                    ActionRequest::Review(ReviewDraft {
                        decision: ReviewDecision::MinorRevisionRequired,
                        comments_to_author: "Fine".to_string(),
                        comments_to_associate_editor: None,
                        report: None,
                    }),
                )
                .await
                .unwrap(),
        );
        assert_eq!(agg.reviews().len(), 1);

        match d
            .service
            .dispatch(&d.ae, Some(id), ActionRequest::Reviewers)
            .await
            .unwrap()
        {
            DispatchOutcome::Reviewers(list) => assert_eq!(list.len(), 1),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn epm_pipeline_follows_the_filters() {
        let d = desk().await;
        let id = submitted(&d).await;
        d.service
            .dispatch(
                &d.eic,
                Some(id),
                ActionRequest::ChangeStatus(Action::ConditionallyAccept),
            )
            .await
            .unwrap();

        // Similarity has not been requested yet.
        let err = d
            .service
            .dispatch(&d.epm, Some(id), ActionRequest::UpdateSimilarity(9))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NotPermitted { .. }));

        d.service
            .dispatch(&d.eic, Some(id), ActionRequest::SendForSimilarityCheck)
            .await
            .unwrap();
        d.service
            .dispatch(&d.epm, Some(id), ActionRequest::UpdateSimilarity(9))
            .await
            .unwrap();
        let agg = manuscript(
            d.service
                .dispatch(
                    &d.epm,
                    Some(id),
                    ActionRequest::UpdatePages {
                        pages: 12,
                        source_file: Some(Upload::new("paged.docx", b"p".to_vec())),
                    },
                )
                .await
                .unwrap(),
        );
        let checks = &agg.current().checks;
        assert_eq!(checks.similarity, Some(9));
        assert_eq!(checks.pages, Some(12));
        assert!(checks.grammar_check_required);
        let source = agg.current().content.source_file.clone().unwrap();
        assert!(source.0.ends_with("source-paged.docx"));
    }
}

//! Handler tests against the in-memory repository.

use std::sync::Arc;

use chrono::{Duration, TimeZone};
use editorial_core::{FixedClock, GuestAuthorId};

use super::*;
use crate::notify::testing::{CapturingNotifier, FailingNotifier};
use crate::storage::testing::MemoryFileStorage;
use crate::workflow::repository::InMemoryRepository;

struct Harness {
    service: WorkflowService,
    repo: Arc<InMemoryRepository>,
    storage: Arc<MemoryFileStorage>,
    notes: Arc<CapturingNotifier>,
    clock: Arc<FixedClock>,
    eic: Viewer,
    ae: Viewer,
    author: Viewer,
    rae: Viewer,
    ray: Viewer,
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
}

async fn account(repo: &InMemoryRepository, name: &str, section: Section) -> Viewer {
    let email = format!("{}@example.org", name.to_lowercase());
    let id = repo
        .create_author(Contact::new(name, email), section)
        .await
        .unwrap();
    Viewer::new(id, section)
}

async fn harness_with(notifier: Option<Arc<dyn Notifier>>) -> Harness {
    let repo = Arc::new(InMemoryRepository::new());
    let storage = Arc::new(MemoryFileStorage::default());
    let notes = Arc::new(CapturingNotifier::default());
    let clock = Arc::new(FixedClock::new(start()));
    let notifier: Arc<dyn Notifier> = match notifier {
        Some(notifier) => notifier,
        None => notes.clone(),
    };

    let service = WorkflowService::new(
        repo.clone(),
        repo.clone(),
        storage.clone(),
        notifier,
        LinkSigner::new(b"secret", "https://journal.example", Duration::days(14)).unwrap(),
        clock.clone(),
    );

    Harness {
        eic: account(&repo, "Eve", Section::EditorInChief).await,
        ae: account(&repo, "Abe", Section::AssociateEditor).await,
        author: account(&repo, "Ada", Section::Author).await,
        rae: account(&repo, "Rae", Section::Reviewer).await,
        ray: account(&repo, "Ray", Section::Reviewer).await,
        service,
        repo,
        storage,
        notes,
        clock,
    }
}

async fn harness() -> Harness {
    harness_with(None).await
}

fn draft() -> ManuscriptDraft {
    ManuscriptDraft {
        manuscript_type: ManuscriptType::Research,
        research_areas: vec!["optics".to_string()],
        content: ContentDraft {
            title: "On light".to_string(),
            abstract_text: "Light is fast.".to_string(),
            keywords: "light".to_string(),
            novelty: "Faster".to_string(),
            anonymous_file: Some(Upload::new("anon.pdf", b"%PDF".to_vec())),
            source_file: Some(Upload::new("paper.docx", b"doc".to_vec())),
        },
        copyright_form: Some(Upload::new("copyright.pdf", b"%PDF".to_vec())),
    }
}

fn party(viewer: &Viewer) -> ReviewerRef {
    ReviewerRef::Registered(viewer.id)
}

/// Submitted with the associate editor assigned.
async fn submitted(h: &Harness) -> ManuscriptAggregate {
    let agg = h
        .service
        .create_manuscript(h.author.id, draft())
        .await
        .unwrap();
    let agg = h.service.submit(&agg, h.author.id).await.unwrap();
    h.service
        .assign_associate_editor(&agg, h.ae.id)
        .await
        .unwrap()
}

/// Add, invite and accept each reviewer.
async fn with_accepted(h: &Harness, agg: ManuscriptAggregate, reviewers: &[Viewer]) -> ManuscriptAggregate {
    let parties: Vec<_> = reviewers.iter().map(party).collect();
    let mut agg = h.service.add_reviewers(&agg, &h.ae, parties.clone()).await.unwrap();
    for p in &parties {
        let id = agg.current_reviewers().find(|rr| rr.reviewer == *p).unwrap().id;
        agg = h.service.invite_reviewer(&agg, h.ae.id, id).await.unwrap();
        assert!(h
            .service
            .respond_to_invitation(agg.manuscript().id, *p, InviteResponse::Accept)
            .await
            .unwrap());
    }
    h.service.load(agg.manuscript().id).await.unwrap()
}

fn review_draft(decision: ReviewDecision) -> ReviewDraft {
    ReviewDraft {
        decision,
        comments_to_author: "Tighten section 2".to_string(),
        comments_to_associate_editor: None,
        report: None,
    }
}

// =============================================================================
// Manuscript lifecycle
// =============================================================================

#[tokio::test]
async fn create_stores_files_under_the_code() {
    let h = harness().await;
    let agg = h
        .service
        .create_manuscript(h.author.id, draft())
        .await
        .unwrap();

    assert_eq!(agg.manuscript().code, "PMSL-24-0001");
    assert_eq!(agg.status(), Status::Pending);
    let anon = agg.current().content.anonymous_file.clone().unwrap();
    assert_eq!(anon.0, "manuscripts/PMSL-24-0001/R0/anonymous-anon.pdf");
    assert!(h.storage.contains(&anon.0));
    assert!(agg.manuscript().copyright_form.is_some());
}

#[tokio::test]
async fn submit_needs_both_files() {
    let h = harness().await;
    let mut d = draft();
    d.content.source_file = None;
    let agg = h.service.create_manuscript(h.author.id, d).await.unwrap();

    let err = h.service.submit(&agg, h.author.id).await.unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::Rejected(RuleViolation::MissingFile("source file"))
    ));
    let agg = h.service.load(agg.manuscript().id).await.unwrap();
    assert_eq!(agg.status(), Status::Pending);
}

#[tokio::test]
async fn submit_notifies_the_author() {
    let h = harness().await;
    let agg = h
        .service
        .create_manuscript(h.author.id, draft())
        .await
        .unwrap();
    let agg = h.service.submit(&agg, h.author.id).await.unwrap();

    assert_eq!(agg.status(), Status::Submitted);
    assert_eq!(h.notes.kinds(), vec![NotificationKind::Submitted]);
    assert_eq!(h.notes.sent()[0].to.email, "ada@example.org");

    let timeline = h.service.timeline("PMSL-24-0001").await.unwrap();
    let values: Vec<_> = timeline.iter().map(|e| e.value.as_str()).collect();
    assert_eq!(values, vec!["pending", "submitted"]);
    assert!(timeline.iter().all(|e| e.revision == "R0"));
}

#[tokio::test]
async fn rejection_sends_one_notice_with_co_authors_in_cc() {
    let h = harness().await;
    let agg = submitted(&h).await;
    let agg = h
        .service
        .add_co_author_manually(&agg, &h.author, Contact::new("Bob", "bob@example.org"))
        .await
        .unwrap();
    let agg = h
        .service
        .add_co_author_manually(&agg, &h.author, Contact::new("Cy", "cy@example.org"))
        .await
        .unwrap();
    let before = h.repo.events(agg.manuscript().id).await.unwrap().len();

    let agg = h
        .service
        .change_status(&agg, Status::Rejected, h.eic.id)
        .await
        .unwrap();

    assert_eq!(agg.status(), Status::Rejected);
    let events = h.repo.events(agg.manuscript().id).await.unwrap();
    assert_eq!(events.len(), before + 1);
    assert_eq!(events.last().unwrap().value, "rejected");

    let rejected: Vec<_> = h
        .notes
        .sent()
        .into_iter()
        .filter(|n| n.kind == NotificationKind::Rejected)
        .collect();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].cc.len(), 2);
}

#[tokio::test]
async fn failed_notification_keeps_the_transition() {
    let h = harness_with(Some(Arc::new(FailingNotifier))).await;
    let agg = h
        .service
        .create_manuscript(h.author.id, draft())
        .await
        .unwrap();
    let agg = h.service.submit(&agg, h.author.id).await.unwrap();
    assert_eq!(agg.status(), Status::Submitted);
}

#[tokio::test]
async fn associate_editor_must_hold_the_role() {
    let h = harness().await;
    let agg = h
        .service
        .create_manuscript(h.author.id, draft())
        .await
        .unwrap();
    let err = h
        .service
        .assign_associate_editor(&agg, h.rae.id)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::Rejected(RuleViolation::NotAssociateEditor)
    ));

    let agg = h
        .service
        .assign_associate_editor(&agg, h.ae.id)
        .await
        .unwrap();
    assert_eq!(agg.current().associate_editor_id, Some(h.ae.id));
    assert_eq!(
        h.notes.kinds(),
        vec![NotificationKind::AssociateEditorAssigned]
    );
}

// =============================================================================
// Reviewers
// =============================================================================

#[tokio::test]
async fn reviewer_rules_are_checked_before_anything_is_added() {
    let h = harness().await;
    let agg = submitted(&h).await;

    let err = h
        .service
        .add_reviewer(&agg, &h.ae, party(&h.author))
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Corresponding author can not added as reviewer."
    );

    let err = h
        .service
        .add_reviewer(&agg, &h.ae, ReviewerRef::Guest(GuestAuthorId(404)))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::Rejected(RuleViolation::ReviewerNotFound)
    ));

    let err = h
        .service
        .add_reviewers(&agg, &h.ae, vec![party(&h.rae), party(&h.ae)])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::Rejected(RuleViolation::AssociateEditorAsReviewer)
    ));

    let err = h
        .service
        .add_reviewers(&agg, &h.ae, vec![party(&h.rae), party(&h.rae)])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::Rejected(RuleViolation::ReviewerTwice)
    ));

    let agg = h.service.load(agg.manuscript().id).await.unwrap();
    assert_eq!(agg.current_reviewers().count(), 0);
}

#[tokio::test]
async fn reviewer_added_twice_from_the_same_view_is_refused() {
    let h = harness().await;
    let agg = submitted(&h).await;

    h.service
        .add_reviewer(&agg, &h.ae, party(&h.rae))
        .await
        .unwrap();
    // `agg` predates the first assignment, so only the store can tell.
    let err = h
        .service
        .add_reviewer(&agg, &h.ae, party(&h.rae))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::Rejected(RuleViolation::ReviewerTwice)
    ));
    let err = h
        .service
        .add_reviewers(&agg, &h.ae, vec![party(&h.ray), party(&h.rae)])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::Rejected(RuleViolation::ReviewerTwice)
    ));

    let agg = h.service.load(agg.manuscript().id).await.unwrap();
    let assigned: Vec<_> = agg.current_reviewers().map(|rr| rr.reviewer).collect();
    assert_eq!(assigned, vec![party(&h.rae)]);
}

#[tokio::test]
async fn co_author_added_twice_from_the_same_view_is_refused() {
    let h = harness().await;
    let agg = submitted(&h).await;
    let guest = h
        .repo
        .create_guest(Contact::new("Cy", "cy@example.org"))
        .await
        .unwrap();

    h.service
        .add_co_author(&agg, &h.author, guest.into())
        .await
        .unwrap();
    let err = h
        .service
        .add_co_author(&agg, &h.author, guest.into())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::Rejected(RuleViolation::CoAuthorTwice)
    ));
    let agg = h.service.load(agg.manuscript().id).await.unwrap();
    assert_eq!(agg.authors().len(), 1);
}

#[tokio::test]
async fn manual_reviewer_becomes_a_guest_once() {
    let h = harness().await;
    let agg = submitted(&h).await;
    let contact = Contact::new("Gus", "gus@example.org");

    let agg = h
        .service
        .add_reviewer_manually(&agg, &h.ae, contact.clone())
        .await
        .unwrap();
    let added: Vec<_> = agg.current_reviewers().collect();
    assert_eq!(added.len(), 1);
    assert!(matches!(added[0].reviewer, ReviewerRef::Guest(_)));
    assert_eq!(added[0].created_by, Some(h.ae.id));

    let err = h
        .service
        .add_reviewer_manually(&agg, &h.ae, contact)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::Rejected(RuleViolation::ReviewerTwice)
    ));
}

#[tokio::test]
async fn manual_reviewer_matches_an_existing_account() {
    let h = harness().await;
    let agg = submitted(&h).await;
    let agg = h
        .service
        .add_reviewer_manually(&agg, &h.ae, Contact::new("Rae R.", "RAE@example.org"))
        .await
        .unwrap();
    let reviewers: Vec<_> = agg.current_reviewers().map(|rr| rr.reviewer).collect();
    assert_eq!(reviewers, vec![party(&h.rae)]);
}

#[tokio::test]
async fn remove_reviewer_of_another_manuscript_is_not_found() {
    let h = harness().await;
    let first = submitted(&h).await;
    let first = h
        .service
        .add_reviewer(&first, &h.ae, party(&h.rae))
        .await
        .unwrap();
    let foreign = first.current_reviewers().next().unwrap().id;

    let second = submitted(&h).await;
    let err = h
        .service
        .remove_reviewer(&second, foreign)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::NotFound { .. }));

    let first = h.service.remove_reviewer(&first, foreign).await.unwrap();
    assert_eq!(first.current_reviewers().count(), 0);
}

// =============================================================================
// Invitations
// =============================================================================

#[tokio::test]
async fn invitation_links_and_first_answer_wins() {
    let h = harness().await;
    let agg = submitted(&h).await;
    let agg = h
        .service
        .add_reviewer(&agg, &h.ae, party(&h.rae))
        .await
        .unwrap();
    let id = agg.current_reviewers().next().unwrap().id;

    let agg = h.service.invite_reviewer(&agg, h.ae.id, id).await.unwrap();
    let rr = agg.current_reviewers().next().unwrap();
    assert_eq!(rr.invitation.invite_count, 1);
    assert_eq!(rr.invitation.invited_by, Some(h.ae.id));
    let invite = h.notes.sent().pop().unwrap();
    assert_eq!(invite.kind, NotificationKind::ReviewerInvited);
    assert_eq!(invite.links.len(), 2);

    let m = agg.manuscript().id;
    assert!(h
        .service
        .respond_to_invitation(m, party(&h.rae), InviteResponse::Accept)
        .await
        .unwrap());
    // The invitation is no longer open, so a second answer finds nothing.
    let err = h
        .service
        .respond_to_invitation(m, party(&h.rae), InviteResponse::Deny)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::NotFound { .. }));

    let agg = h.service.load(m).await.unwrap();
    let rr = agg.current_reviewers().next().unwrap();
    assert!(rr.invitation.accepted_at.is_some());
    assert!(rr.invitation.denied_at.is_none());
    assert!(!h.notes.kinds().contains(&NotificationKind::ReviewInviteDenied));
}

#[tokio::test]
async fn denial_notifies_the_reviewer() {
    let h = harness().await;
    let agg = submitted(&h).await;
    let agg = h
        .service
        .add_reviewer(&agg, &h.ae, party(&h.ray))
        .await
        .unwrap();
    let id = agg.current_reviewers().next().unwrap().id;
    let agg = h.service.invite_reviewer(&agg, h.ae.id, id).await.unwrap();

    assert!(h
        .service
        .respond_to_invitation(agg.manuscript().id, party(&h.ray), InviteResponse::Deny)
        .await
        .unwrap());
    let last = h.notes.sent().pop().unwrap();
    assert_eq!(last.kind, NotificationKind::ReviewInviteDenied);
    assert_eq!(last.to.email, "ray@example.org");
}

#[tokio::test]
async fn uninvited_reviewer_cannot_answer() {
    let h = harness().await;
    let agg = submitted(&h).await;
    let agg = h
        .service
        .add_reviewer(&agg, &h.ae, party(&h.rae))
        .await
        .unwrap();
    let err = h
        .service
        .respond_to_invitation(agg.manuscript().id, party(&h.rae), InviteResponse::Accept)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::NotFound { .. }));
}

#[tokio::test]
async fn deleted_guest_link_resolves_to_the_account() {
    let h = harness().await;
    let guest = h
        .repo
        .create_guest(Contact::new("Rae", "rae@example.org"))
        .await
        .unwrap();
    h.repo.soft_delete_guest(guest).await.unwrap();

    let agg = submitted(&h).await;
    let agg = h
        .service
        .add_reviewer(&agg, &h.ae, party(&h.rae))
        .await
        .unwrap();
    let id = agg.current_reviewers().next().unwrap().id;
    let agg = h.service.invite_reviewer(&agg, h.ae.id, id).await.unwrap();

    assert!(h
        .service
        .respond_to_invitation(agg.manuscript().id, guest.into(), InviteResponse::Accept)
        .await
        .unwrap());
    let agg = h.service.load(agg.manuscript().id).await.unwrap();
    assert!(agg.current_reviewers().next().unwrap().invitation.accepted_at.is_some());
}

#[tokio::test]
async fn reinvite_uses_the_editor_message() {
    let h = harness().await;
    let agg = submitted(&h).await;
    let agg = h
        .service
        .add_reviewer(&agg, &h.ae, party(&h.rae))
        .await
        .unwrap();
    let id = agg.current_reviewers().next().unwrap().id;
    let agg = h.service.invite_reviewer(&agg, h.ae.id, id).await.unwrap();
    h.clock.advance(Duration::days(3));

    let agg = h
        .service
        .reinvite_reviewer(
            &agg,
            h.ae.id,
            id,
            CustomMessage {
                subject: "Still keen?".to_string(),
                body: "We would value your view.".to_string(),
            },
        )
        .await
        .unwrap();

    let rr = agg.current_reviewers().next().unwrap();
    assert_eq!(rr.invitation.invite_count, 2);
    assert_eq!(rr.invitation.invited_at, Some(start() + Duration::days(3)));
    let last = h.notes.sent().pop().unwrap();
    assert_eq!(last.kind, NotificationKind::ReviewerReinvited);
    assert_eq!(last.custom.unwrap().subject, "Still keen?");
}

#[tokio::test]
async fn invites_from_the_same_view_both_count() {
    let h = harness().await;
    let agg = submitted(&h).await;
    let agg = h
        .service
        .add_reviewer(&agg, &h.ae, party(&h.rae))
        .await
        .unwrap();
    let id = agg.current_reviewers().next().unwrap().id;

    h.service.invite_reviewer(&agg, h.ae.id, id).await.unwrap();
    let fresh = h.service.invite_reviewer(&agg, h.ae.id, id).await.unwrap();
    assert_eq!(
        fresh.current_reviewers().next().unwrap().invitation.invite_count,
        2
    );
}

#[tokio::test]
async fn answered_invitation_is_not_sent_again() {
    let h = harness().await;
    let agg = submitted(&h).await;
    let agg = h
        .service
        .add_reviewer(&agg, &h.ae, party(&h.rae))
        .await
        .unwrap();
    let id = agg.current_reviewers().next().unwrap().id;
    let invited = h.service.invite_reviewer(&agg, h.ae.id, id).await.unwrap();
    h.service
        .respond_to_invitation(agg.manuscript().id, party(&h.rae), InviteResponse::Accept)
        .await
        .unwrap();
    let sent = h.notes.sent().len();

    // Still shows the invitation open.
    let err = h
        .service
        .invite_reviewer(&invited, h.ae.id, id)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::Rejected(RuleViolation::InvitationAnswered)
    ));

    let agg = h.service.load(agg.manuscript().id).await.unwrap();
    let err = h
        .service
        .reinvite_reviewer(
            &agg,
            h.ae.id,
            id,
            CustomMessage {
                subject: "Again".to_string(),
                body: "Please".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::Rejected(RuleViolation::InvitationAnswered)
    ));

    assert_eq!(h.notes.sent().len(), sent);
    let rr = agg.current_reviewers().next().unwrap();
    assert_eq!(rr.invitation.invite_count, 1);
}

#[tokio::test]
async fn reminders_need_an_accepted_invitation() {
    let h = harness().await;
    let agg = submitted(&h).await;
    let agg = h
        .service
        .add_reviewer(&agg, &h.ae, party(&h.rae))
        .await
        .unwrap();
    let id = agg.current_reviewers().next().unwrap().id;

    let err = h.service.remind_reviewer(&agg, id).await.unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::Rejected(RuleViolation::NoInvitation)
    ));

    let agg = h.service.invite_reviewer(&agg, h.ae.id, id).await.unwrap();
    let err = h.service.remind_reviewer(&agg, id).await.unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::Rejected(RuleViolation::ReviewerNotAccepted)
    ));

    h.service
        .respond_to_invitation(agg.manuscript().id, party(&h.rae), InviteResponse::Accept)
        .await
        .unwrap();
    let agg = h.service.load(agg.manuscript().id).await.unwrap();
    let agg = h.service.remind_reviewer(&agg, id).await.unwrap();
    assert_eq!(
        agg.current_reviewers().next().unwrap().invitation.remind_count,
        1
    );
    assert_eq!(h.notes.kinds().last(), Some(&NotificationKind::ReviewReminder));
}

// =============================================================================
// Reviews and revision rounds
// =============================================================================

#[tokio::test]
async fn review_is_upserted_and_keeps_its_report() {
    let h = harness().await;
    let agg = with_accepted(&h, submitted(&h).await, &[h.rae]).await;

    let mut first = review_draft(ReviewDecision::MajorRevisionRequired);
    first.report = Some(Upload::new("report.pdf", b"%PDF".to_vec()));
    let agg = h
        .service
        .submit_review(&agg, party(&h.rae), first)
        .await
        .unwrap();
    let agg = h
        .service
        .submit_review(&agg, party(&h.rae), review_draft(ReviewDecision::Accept))
        .await
        .unwrap();

    let reviews: Vec<_> = agg.reviews_of(agg.current().id).collect();
    assert_eq!(reviews.len(), 1);
    assert_eq!(reviews[0].decision, ReviewDecision::Accept);
    assert!(reviews[0].review_report.is_some());
    assert_eq!(h.notes.kinds().last(), Some(&NotificationKind::ReviewSubmitted));
}

#[tokio::test]
async fn reviewer_who_did_not_accept_cannot_review() {
    let h = harness().await;
    let agg = submitted(&h).await;
    let err = h
        .service
        .submit_review(&agg, party(&h.rae), review_draft(ReviewDecision::Reject))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::Rejected(RuleViolation::ReviewerNotAccepted)
    ));
}

#[tokio::test]
async fn revise_carries_only_reviewers_who_reviewed() {
    let h = harness().await;
    let agg = with_accepted(&h, submitted(&h).await, &[h.rae]).await;
    let agg = h
        .service
        .add_reviewer(&agg, &h.ae, party(&h.ray))
        .await
        .unwrap();
    let ray_id = agg
        .current_reviewers()
        .find(|rr| rr.reviewer == party(&h.ray))
        .unwrap()
        .id;
    let agg = h.service.invite_reviewer(&agg, h.ae.id, ray_id).await.unwrap();
    let agg = h
        .service
        .submit_review(&agg, party(&h.rae), review_draft(ReviewDecision::MajorRevisionRequired))
        .await
        .unwrap();
    let agg = h
        .service
        .send_to_eic(&agg, "Major revision".to_string())
        .await
        .unwrap();
    let agg = h
        .service
        .change_status(&agg, Status::MajorRevisionRequired, h.eic.id)
        .await
        .unwrap();
    assert_eq!(h.notes.kinds().last(), Some(&NotificationKind::RevisionRequired));

    let agg = h
        .service
        .revise(
            &agg,
            h.author.id,
            RevisionDraft {
                comment_reply: Some("addressed comments".to_string()),
                comment_reply_file: None,
                content: ContentDraft {
                    title: "On light, revised".to_string(),
                    ..ContentDraft::default()
                },
            },
        )
        .await
        .unwrap();

    assert_eq!(agg.current().index, 1);
    assert_eq!(agg.status(), Status::Submitted);
    assert_eq!(agg.current().associate_editor_id, Some(h.ae.id));
    assert_eq!(agg.current().content.title, "On light, revised");
    assert!(agg.current().content.anonymous_file.is_some());
    assert_eq!(
        agg.previous().unwrap().comment_reply.as_deref(),
        Some("addressed comments")
    );
    let carried: Vec<_> = agg.current_reviewers().collect();
    assert_eq!(carried.len(), 1);
    assert_eq!(carried[0].reviewer, party(&h.rae));
    assert!(carried[0].invitation.invited_at.is_none());
    assert_eq!(h.notes.kinds().last(), Some(&NotificationKind::RevisionSubmitted));

    let timeline = h.service.timeline(&agg.manuscript().code).await.unwrap();
    let last = timeline.last().unwrap();
    assert_eq!((last.revision.as_str(), last.value.as_str()), ("R1", "submitted"));
}

/// Reviewed by Rae and sent back to the author for a major revision.
async fn awaiting_revision(h: &Harness) -> ManuscriptAggregate {
    let agg = with_accepted(h, submitted(h).await, &[h.rae]).await;
    let agg = h
        .service
        .submit_review(&agg, party(&h.rae), review_draft(ReviewDecision::MajorRevisionRequired))
        .await
        .unwrap();
    let agg = h
        .service
        .send_to_eic(&agg, "Major revision".to_string())
        .await
        .unwrap();
    h.service
        .change_status(&agg, Status::MajorRevisionRequired, h.eic.id)
        .await
        .unwrap()
}

fn revision_draft(file: &str) -> RevisionDraft {
    RevisionDraft {
        comment_reply: Some("addressed comments".to_string()),
        comment_reply_file: Some(Upload::new(format!("reply-{file}"), b"r".to_vec())),
        content: ContentDraft {
            title: "On light, revised".to_string(),
            anonymous_file: Some(Upload::new(file, b"%PDF".to_vec())),
            ..ContentDraft::default()
        },
    }
}

#[tokio::test]
async fn losing_revise_removes_its_files() {
    let h = harness().await;
    let agg = awaiting_revision(&h).await;
    let code = agg.manuscript().code.clone();

    h.service
        .revise(&agg, h.author.id, revision_draft("first.pdf"))
        .await
        .unwrap();
    let err = h
        .service
        .revise(&agg, h.author.id, revision_draft("second.pdf"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::Repository(RepositoryError::Conflict(_))
    ));

    assert!(h.storage.contains(&format!("manuscripts/{code}/R1/anonymous-first.pdf")));
    assert!(h.storage.contains(&format!("manuscripts/{code}/R0/comment-reply-reply-first.pdf")));
    assert!(!h.storage.contains(&format!("manuscripts/{code}/R1/anonymous-second.pdf")));
    assert!(!h.storage.contains(&format!("manuscripts/{code}/R0/comment-reply-reply-second.pdf")));

    let agg = h.service.load(agg.manuscript().id).await.unwrap();
    assert_eq!(agg.revisions().len(), 2);
}

#[tokio::test]
async fn failed_upload_on_create_leaves_no_stray_files() {
    let h = harness().await;
    h.storage.refuse_store("paper.docx");

    let err = h
        .service
        .create_manuscript(h.author.id, draft())
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Storage(_)));

    // The row is kept as a file-less draft; the anonymous file is gone.
    let agg = h.service.load_by_code("PMSL-24-0001").await.unwrap();
    assert_eq!(agg.status(), Status::Pending);
    assert!(agg.current().content.anonymous_file.is_none());
    assert!(!h
        .storage
        .contains("manuscripts/PMSL-24-0001/R0/anonymous-anon.pdf"));
}

#[tokio::test]
async fn revise_outside_a_revision_verdict_is_rejected() {
    let h = harness().await;
    let agg = submitted(&h).await;
    let err = h
        .service
        .revise(&agg, h.author.id, RevisionDraft::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::Rejected(RuleViolation::NotUnderRevision)
    ));
}

#[tokio::test]
async fn comment_reply_needs_a_previous_revision() {
    let h = harness().await;
    let agg = submitted(&h).await;
    let err = h
        .service
        .update_comment_reply(&agg, Some("x".to_string()), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::Rejected(RuleViolation::NoPreviousRevision)
    ));
}

#[tokio::test]
async fn update_comment_is_scoped_to_the_current_revision() {
    let h = harness().await;
    let agg = with_accepted(&h, submitted(&h).await, &[h.rae]).await;
    let agg = h
        .service
        .submit_review(&agg, party(&h.rae), review_draft(ReviewDecision::Reject))
        .await
        .unwrap();
    let review = agg.reviews()[0].id;

    let agg = h
        .service
        .update_comment(
            &agg,
            review,
            ReviewEdit {
                comments_to_author: Some("Edited by the editor".to_string()),
                ..ReviewEdit::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(agg.reviews()[0].comments_to_author, "Edited by the editor");
    assert_eq!(agg.reviews()[0].decision, ReviewDecision::Reject);

    let other = submitted(&h).await;
    let err = h
        .service
        .update_comment(&other, review, ReviewEdit::default())
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::NotFound { .. }));
}

// =============================================================================
// Production
// =============================================================================

#[tokio::test]
async fn formatter_then_proofreader_reach_ready_article() {
    let h = harness().await;
    let agg = submitted(&h).await;
    let agg = h
        .service
        .change_status(&agg, Status::Accepted, h.eic.id)
        .await
        .unwrap();

    let err = h
        .service
        .update_formatter(&agg, h.eic.id, Upload::new("formatted.pdf", b"f".to_vec()), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::Rejected(RuleViolation::WrongStage { .. })
    ));

    let agg = h
        .service
        .change_status(&agg, Status::Formatter, h.eic.id)
        .await
        .unwrap();
    let agg = h
        .service
        .update_formatter(
            &agg,
            h.eic.id,
            Upload::new("formatted.pdf", b"f".to_vec()),
            Some(Upload::new("corrections.pdf", b"c".to_vec())),
        )
        .await
        .unwrap();
    assert_eq!(agg.status(), Status::Proofreader);
    assert!(agg.current().files.formatted_paper.is_some());
    assert!(agg.current().files.correction_file.is_some());

    let agg = h
        .service
        .update_proofreader(&agg, h.eic.id, Upload::new("final.pdf", b"p".to_vec()))
        .await
        .unwrap();
    assert_eq!(agg.status(), Status::ReadyArticle);
    assert!(agg.current().files.proofread_paper.is_some());
}

#[tokio::test]
async fn production_steps_are_persisted() {
    let h = harness().await;
    let agg = submitted(&h).await;
    let agg = h
        .service
        .change_status(&agg, Status::ConditionallyAccepted, h.eic.id)
        .await
        .unwrap();
    let agg = h
        .service
        .production_step(&agg, ProductionStep::SendForSimilarityCheck)
        .await
        .unwrap();
    let agg = h
        .service
        .production_step(&agg, ProductionStep::UpdateSimilarity(7))
        .await
        .unwrap();

    let reloaded = h.service.load(agg.manuscript().id).await.unwrap();
    assert_eq!(reloaded.current().checks.similarity, Some(7));
    assert!(reloaded.current().checks.pagination_required);
}

//! Periodic sweep jobs.
//!
//! Each job scans for rows that need a time-based action and handles them
//! one at a time: resend an unanswered invitation, remind an accepted
//! reviewer who has not reviewed yet, or drop the files of manuscripts that
//! were abandoned long enough ago. Jobs are safe to call at any time;
//! overlap between runs of the same job is prevented by the scheduler.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use editorial_core::{Clock, FileRef, ManuscriptId, ParseError, SweepPolicy};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::notify::NotificationKind;
use crate::storage::FileStorage;
use crate::workflow::{
    execute_effects, Effect, InterpreterContext, RepositoryError, SweepCandidate,
    WorkflowRepository,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SweepJob {
    Reinvite,
    Remind,
    Retention,
}

impl SweepJob {
    pub const ALL: &'static [SweepJob] = &[
        SweepJob::Reinvite,
        SweepJob::Remind,
        SweepJob::Retention,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SweepJob::Reinvite => "reinvite",
            SweepJob::Remind => "remind",
            SweepJob::Retention => "retention",
        }
    }
}

impl fmt::Display for SweepJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SweepJob {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SweepJob::ALL
            .iter()
            .copied()
            .find(|job| job.as_str() == s)
            .ok_or_else(|| ParseError::new("SweepJob", s))
    }
}

/// Outcome of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub job: SweepJob,
    /// Rows that were due.
    pub selected: usize,
    /// Rows handled without error.
    pub processed: usize,
    /// Rows that changed between selection and update, left untouched.
    pub skipped: usize,
    pub failed: usize,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
}

impl SweepReport {
    fn new(job: SweepJob, dry_run: bool, started_at: DateTime<Utc>) -> Self {
        Self {
            job,
            selected: 0,
            processed: 0,
            skipped: 0,
            failed: 0,
            dry_run,
            started_at,
        }
    }
}

/// Policies for the three jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepSettings {
    pub reinvite: SweepPolicy,
    pub remind: SweepPolicy,
    /// Days after the last change before an abandoned manuscript's files go.
    pub retention_days: u32,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            reinvite: SweepPolicy::new(2, 5),
            remind: SweepPolicy::new(6, 7),
            retention_days: 30,
        }
    }
}

pub struct Sweeper {
    repo: Arc<dyn WorkflowRepository>,
    storage: Arc<dyn FileStorage>,
    effects: InterpreterContext,
    clock: Arc<dyn Clock>,
    settings: SweepSettings,
}

impl Sweeper {
    pub fn new(
        repo: Arc<dyn WorkflowRepository>,
        storage: Arc<dyn FileStorage>,
        effects: InterpreterContext,
        clock: Arc<dyn Clock>,
        settings: SweepSettings,
    ) -> Self {
        Self {
            repo,
            storage,
            effects,
            clock,
            settings,
        }
    }

    /// Run `job` once. With `dry_run` set, only count what is due.
    pub async fn run(&self, job: SweepJob, dry_run: bool) -> Result<SweepReport, RepositoryError> {
        let now = self.clock.now();
        info!("Starting {} sweep{}", job, if dry_run { " (dry run)" } else { "" });

        let mut report = SweepReport::new(job, dry_run, now);
        match job {
            SweepJob::Reinvite => self.reinvite(now, &mut report).await?,
            SweepJob::Remind => self.remind(now, &mut report).await?,
            SweepJob::Retention => self.retention(now, &mut report).await?,
        }

        info!(
            "Finished {} sweep: {} selected, {} processed, {} skipped, {} failed",
            job, report.selected, report.processed, report.skipped, report.failed
        );
        Ok(report)
    }

    // =========================================================================
    // Reviewer invitations
    // =========================================================================

    async fn reinvite(
        &self,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> Result<(), RepositoryError> {
        let due = self.due_reinvites(now).await?;
        report.selected = due.len();
        if !report.dry_run {
            self.send_reinvites(due, now, report).await;
        }
        Ok(())
    }

    async fn due_reinvites(&self, now: DateTime<Utc>) -> Result<Vec<SweepCandidate>, RepositoryError> {
        let policy = self.settings.reinvite;
        Ok(self
            .repo
            .reinvite_candidates(policy.cap)
            .await?
            .into_iter()
            .filter(|c| c.assignment.invitation.reinvite_due(&policy, now))
            .collect())
    }

    async fn send_reinvites(
        &self,
        due: Vec<SweepCandidate>,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) {
        for candidate in due {
            let applied = self.repo.invite(candidate.assignment.id, now, None).await;
            let effects = vec![
                Effect::info(format!(
                    "Reinvite sweep: invitation #{} to {}",
                    candidate.assignment.invitation.invite_count + 1,
                    candidate.assignment.reviewer
                )),
                Effect::InviteReviewer {
                    party: candidate.assignment.reviewer,
                    kind: NotificationKind::ReviewerInvited,
                    custom: None,
                },
            ];
            self.apply(&candidate, applied, effects, now, report).await;
        }
    }

    async fn remind(
        &self,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> Result<(), RepositoryError> {
        let policy = self.settings.remind;
        // The query already leaves out reviewers who have reviewed.
        let due: Vec<SweepCandidate> = self
            .repo
            .remind_candidates(policy.cap)
            .await?
            .into_iter()
            .filter(|c| c.assignment.invitation.remind_due(&policy, now, false))
            .collect();
        report.selected = due.len();
        if report.dry_run {
            return Ok(());
        }

        for candidate in due {
            let applied = self.repo.remind(candidate.assignment.id).await;
            let effects = vec![Effect::NotifyParty {
                party: candidate.assignment.reviewer,
                kind: NotificationKind::ReviewReminder,
            }];
            self.apply(&candidate, applied, effects, now, report).await;
        }
        Ok(())
    }

    /// Notify once the counter write went through. A row whose invitation
    /// changed since it was selected is skipped; a failed row is logged and
    /// counted. The sweep goes on either way.
    async fn apply(
        &self,
        candidate: &SweepCandidate,
        applied: Result<bool, RepositoryError>,
        effects: Vec<Effect>,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) {
        let id = candidate.assignment.id;
        match applied {
            Ok(true) => {}
            Ok(false) => {
                info!(
                    "{} sweep: assignment {} was answered since it was selected; skipping",
                    report.job, id
                );
                report.skipped += 1;
                return;
            }
            Err(e) => {
                error!("{} sweep: failed to update assignment {}: {}", report.job, id, e);
                report.failed += 1;
                return;
            }
        }
        match self.repo.load(candidate.manuscript_id).await {
            Ok(Some(agg)) => execute_effects(&self.effects, &agg, effects, now).await,
            Ok(None) => warn!(
                "{} sweep: manuscript {} vanished before notifying",
                report.job, candidate.manuscript_id
            ),
            Err(e) => error!(
                "{} sweep: failed to load manuscript {}: {}",
                report.job, candidate.manuscript_id, e
            ),
        }
        report.processed += 1;
    }

    // =========================================================================
    // Retention
    // =========================================================================

    async fn retention(
        &self,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> Result<(), RepositoryError> {
        let cutoff = now - Duration::days(i64::from(self.settings.retention_days));
        let due = self.repo.retention_candidates(cutoff).await?;
        report.selected = due.len();
        if report.dry_run {
            return Ok(());
        }

        for id in due {
            match self.purge(id).await {
                Ok(true) => report.processed += 1,
                Ok(false) => report.failed += 1,
                Err(e) => {
                    error!("Retention sweep: manuscript {} failed: {}", id, e);
                    report.failed += 1;
                }
            }
        }
        Ok(())
    }

    /// Delete every file of the manuscript and clear the references that are
    /// gone. Returns whether every file could be removed; references to files
    /// that failed to delete are kept so the next run tries again.
    async fn purge(&self, id: ManuscriptId) -> Result<bool, RepositoryError> {
        let Some(agg) = self.repo.load(id).await? else {
            return Ok(true);
        };
        let mut clean = true;

        for revision in agg.revisions() {
            let mut updated = revision.clone();
            let slots = [
                &mut updated.content.anonymous_file,
                &mut updated.content.source_file,
                &mut updated.comment_reply_file,
                &mut updated.files.formatted_paper,
                &mut updated.files.correction_file,
                &mut updated.files.proofread_paper,
            ];
            let mut changed = false;
            for slot in slots {
                if let Some(file) = slot.take() {
                    if self.remove(&file).await {
                        changed = true;
                    } else {
                        *slot = Some(file);
                        clean = false;
                    }
                }
            }
            if changed {
                self.repo.update_revision(&updated).await?;
            }
        }

        let mut manuscript = agg.manuscript().clone();
        if let Some(form) = manuscript.copyright_form.take() {
            if self.remove(&form).await {
                self.repo.update_manuscript(&manuscript).await?;
            } else {
                clean = false;
            }
        }

        info!(
            "Retention sweep: files of {} {}",
            agg.manuscript().code,
            if clean { "removed" } else { "partly removed" }
        );
        Ok(clean)
    }

    /// Whether the file is gone afterwards.
    async fn remove(&self, file: &FileRef) -> bool {
        match self.storage.exists(file).await {
            Ok(false) => return true,
            Ok(true) => {}
            Err(e) => {
                error!("Retention sweep: cannot check {}: {}", file, e);
                return false;
            }
        }
        match self.storage.delete(file).await {
            Ok(_) => true,
            Err(e) => {
                error!("Retention sweep: cannot delete {}: {}", file, e);
                false
            }
        }
    }
}

//! Runs sweep jobs without overlap.
//!
//! Every job has its own lock. A run that finds its job's lock taken is
//! skipped, whether it came from the periodic loop or a manual trigger.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::sweep::{SweepJob, SweepReport, Sweeper};
use crate::workflow::RepositoryError;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("{0} sweep is already running")]
    AlreadyRunning(SweepJob),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub struct SweepScheduler {
    sweeper: Sweeper,
    reinvite: Mutex<()>,
    remind: Mutex<()>,
    retention: Mutex<()>,
}

impl SweepScheduler {
    pub fn new(sweeper: Sweeper) -> Self {
        Self {
            sweeper,
            reinvite: Mutex::new(()),
            remind: Mutex::new(()),
            retention: Mutex::new(()),
        }
    }

    fn lock(&self, job: SweepJob) -> &Mutex<()> {
        match job {
            SweepJob::Reinvite => &self.reinvite,
            SweepJob::Remind => &self.remind,
            SweepJob::Retention => &self.retention,
        }
    }

    /// Run `job` now unless a run of it is still in flight.
    pub async fn run(&self, job: SweepJob, dry_run: bool) -> Result<SweepReport, SchedulerError> {
        let Ok(_running) = self.lock(job).try_lock() else {
            info!("Skipping {} sweep: previous run still in progress", job);
            return Err(SchedulerError::AlreadyRunning(job));
        };
        Ok(self.sweeper.run(job, dry_run).await?)
    }

    /// Run `job` every `every`, starting immediately. Ticks that fall due
    /// while a run is still going are dropped.
    pub fn spawn_periodic(self: &Arc<Self>, job: SweepJob, every: Duration) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match scheduler.run(job, false).await {
                    Ok(_) => {}
                    Err(SchedulerError::AlreadyRunning(_)) => {
                        warn!("{} sweep overran its interval", job)
                    }
                    Err(e) => error!("{} sweep failed: {}", job, e),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::testing::CapturingNotifier;
    use crate::signed_link::LinkSigner;
    use crate::storage::testing::MemoryFileStorage;
    use crate::storage::{FileStorage, StorageError};
    use crate::sweep::SweepSettings;
    use crate::workflow::{
        ContentDraft, Directory, InMemoryRepository, ManuscriptDraft, Upload, WorkflowService,
    };
    use async_trait::async_trait;
    use chrono::TimeZone;
    use editorial_core::{Contact, FileRef, FixedClock, ManuscriptType, Section, Status};
    use tokio::sync::{Notify, Semaphore};

    /// Holds every `exists` call until the test opens the gate.
    struct GatedStorage {
        inner: MemoryFileStorage,
        entered: Notify,
        gate: Semaphore,
    }

    #[async_trait]
    impl FileStorage for GatedStorage {
        async fn store(&self, bytes: Vec<u8>, logical_path: &str) -> Result<FileRef, StorageError> {
            self.inner.store(bytes, logical_path).await
        }

        async fn exists(&self, file: &FileRef) -> Result<bool, StorageError> {
            self.entered.notify_one();
            let _permit = self.gate.acquire().await.unwrap();
            self.inner.exists(file).await
        }

        async fn delete(&self, file: &FileRef) -> Result<bool, StorageError> {
            self.inner.delete(file).await
        }
    }

    /// A scheduler whose retention sweep has one rejected manuscript to
    /// purge and blocks on it.
    async fn blocked_retention() -> (Arc<SweepScheduler>, Arc<GatedStorage>) {
        let repo = Arc::new(InMemoryRepository::new());
        let storage = Arc::new(GatedStorage {
            inner: MemoryFileStorage::default(),
            entered: Notify::new(),
            gate: Semaphore::new(0),
        });
        let clock = Arc::new(FixedClock::new(
            chrono::Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
        ));
        let service = WorkflowService::new(
            repo.clone(),
            repo.clone(),
            storage.clone(),
            Arc::new(CapturingNotifier::default()),
            LinkSigner::new(b"k", "http://localhost:3000", chrono::Duration::days(1)).unwrap(),
            clock.clone(),
        );

        let author = repo
            .create_author(Contact::new("Ada", "ada@example.org"), Section::Author)
            .await
            .unwrap();
        let draft = ManuscriptDraft {
            manuscript_type: ManuscriptType::Research,
            research_areas: vec![],
            content: ContentDraft {
                title: "Gone".to_string(),
                anonymous_file: Some(Upload::new("a.pdf", b"a".to_vec())),
                ..ContentDraft::default()
            },
            copyright_form: None,
        };
        let agg = service.create_manuscript(author, draft).await.unwrap();
        service
            .change_status(&agg, Status::Withdrawn, author)
            .await
            .unwrap();
        clock.advance(chrono::Duration::days(40));

        let sweeper = Sweeper::new(
            repo,
            storage.clone(),
            service.interpreter().clone(),
            clock,
            SweepSettings::default(),
        );
        (Arc::new(SweepScheduler::new(sweeper)), storage)
    }

    #[tokio::test]
    async fn second_run_of_the_same_job_is_skipped() {
        let (scheduler, storage) = blocked_retention().await;

        let first = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run(SweepJob::Retention, false).await }
        });
        storage.entered.notified().await;

        let err = scheduler
            .run(SweepJob::Retention, false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::AlreadyRunning(SweepJob::Retention)
        ));

        // Other jobs are not held up.
        let report = scheduler.run(SweepJob::Reinvite, false).await.unwrap();
        assert_eq!(report.selected, 0);

        storage.gate.add_permits(8);
        let report = first.await.unwrap().unwrap();
        assert_eq!((report.selected, report.processed), (1, 1));

        // Free again once the first run is done.
        let report = scheduler.run(SweepJob::Retention, false).await.unwrap();
        assert_eq!(report.selected, 0);
    }

    #[tokio::test]
    async fn periodic_runs_block_manual_triggers() {
        let (scheduler, storage) = blocked_retention().await;

        let handle = scheduler.spawn_periodic(SweepJob::Retention, Duration::from_millis(10));
        tokio::time::timeout(Duration::from_secs(5), storage.entered.notified())
            .await
            .unwrap();

        let err = scheduler.run(SweepJob::Retention, true).await.unwrap_err();
        assert!(matches!(err, SchedulerError::AlreadyRunning(_)));

        handle.abort();
    }
}

//! SQLite implementation of [`WorkflowRepository`] and [`Directory`].
//!
//! # Schema Versioning
//!
//! The database has a `schema_version` table that tracks the schema version.
//! When the schema needs to change, increment `CURRENT_SCHEMA_VERSION` and add
//! a migration in `run_migrations()`. Migrations run sequentially from the
//! current version to the target version.
//!
//! # Atomicity
//!
//! Every multi-row write (manuscript creation, a new revision round, a status
//! change with its audit row, a batch of reviewer assignments) runs in a
//! single transaction. Invitation responses are one conditional `UPDATE`, so
//! concurrent accept/deny calls cannot both win; invite and remind counters
//! are incremented in SQL rather than written back from a snapshot. A unique
//! index keeps each party to one assignment per revision.

mod directory;
mod rows;


use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

use super::{
    InviteResponse, NewAssignment, NewManuscript, RepositoryError, RevisionRound,
    SweepCandidate, WorkflowRepository,
};
use editorial_core::{
    AuthorId, Manuscript, ManuscriptAggregate, ManuscriptId, ProductionChecks,
    ProductionFiles, Review, ReviewId, ReviewInput, ReviewerRef, Revision, RevisionAuthor,
    RevisionAuthorId, RevisionContent, RevisionEvent, RevisionId, RevisionReviewer,
    RevisionReviewerId, Status,
};
use rows::{
    conflict_or_storage, file_column, load_aggregate, millis, query_all, query_one,
    select_co_author, select_review, select_reviewer, select_revision, storage, RawEvent,
    RawReview, RawReviewer, RowRecord,
};

/// Current schema version. Increment this when making schema changes and add
/// corresponding migration logic in `run_migrations()`.
const CURRENT_SCHEMA_VERSION: i64 = 3;

/// SQLite-backed workflow repository.
///
/// Uses `tokio::task::spawn_blocking` to run synchronous rusqlite operations
/// without blocking the async runtime.
pub struct SqliteRepository {
    /// Exposed as `pub(crate)` so tests can age rows directly.
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl SqliteRepository {
    /// Open (or create) the database at `path` and migrate it.
    ///
    /// # Durability
    ///
    /// The database is configured with:
    /// - `journal_mode = WAL` for better concurrency and crash safety
    /// - `synchronous = FULL` so committed rounds survive power loss
    /// - `busy_timeout = 5000ms` to handle concurrent access gracefully
    /// - `foreign_keys = ON` so assignments can't outlive their revision
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, RepositoryError> {
        let path_ref = path.as_ref();
        let path_str = path_ref.to_string_lossy();
        let is_in_memory = path_str == ":memory:";

        if !is_in_memory && !path_str.is_empty() {
            if let Some(parent) = path_ref.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        RepositoryError::storage(
                            "create database directory",
                            format!("{}: {}", parent.display(), e),
                        )
                    })?;

                    // Manuscript metadata and reviewer identities are private.
                    #[cfg(unix)]
                    {
                        use std::os::unix::fs::PermissionsExt;
                        let dir_permissions = std::fs::Permissions::from_mode(0o700);
                        if let Err(e) = std::fs::set_permissions(parent, dir_permissions) {
                            warn!(
                                "Failed to set restrictive permissions on state directory: {}",
                                e
                            );
                        }
                    }
                }
            }
        }

        let conn = Connection::open(path_ref)
            .map_err(|e| RepositoryError::storage("open database", e.to_string()))?;

        #[cfg(unix)]
        if !is_in_memory && !path_str.is_empty() {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            if let Err(e) = std::fs::set_permissions(path_ref, permissions) {
                warn!(
                    "Failed to set restrictive permissions on database file: {}",
                    e
                );
            }
        }

        // SQLite can silently stay in DELETE mode on filesystems without
        // shared memory; in-memory databases report "memory".
        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(|e| RepositoryError::storage("set journal_mode", e.to_string()))?;
        let journal_mode_ok = journal_mode.eq_ignore_ascii_case("wal")
            || (is_in_memory && journal_mode.eq_ignore_ascii_case("memory"));
        if !journal_mode_ok {
            return Err(RepositoryError::storage(
                "configure journal_mode",
                format!(
                    "Failed to enable WAL mode: SQLite returned '{}' instead of 'wal'. \
                     The workflow database requires WAL mode.",
                    journal_mode
                ),
            ));
        }

        conn.execute_batch(
            r#"
            PRAGMA synchronous = FULL;
            PRAGMA busy_timeout = 5000;
            PRAGMA foreign_keys = ON;
            "#,
        )
        .map_err(|e| RepositoryError::storage("configure pragmas", e.to_string()))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );
            "#,
        )
        .map_err(|e| RepositoryError::storage("create schema_version table", e.to_string()))?;

        let current_version: i64 = conn
            .query_row(
                "SELECT version FROM schema_version WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| RepositoryError::storage("get schema version", e.to_string()))?
            .unwrap_or(0);

        Self::run_migrations(&conn, current_version)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run migrations from `from_version` to `CURRENT_SCHEMA_VERSION`.
    fn run_migrations(conn: &Connection, from_version: i64) -> Result<(), RepositoryError> {
        if from_version > CURRENT_SCHEMA_VERSION {
            return Err(RepositoryError::storage(
                "schema version",
                format!(
                    "Database schema version {} is newer than supported version {}. \
                     Please upgrade the application.",
                    from_version, CURRENT_SCHEMA_VERSION
                ),
            ));
        }

        if from_version == CURRENT_SCHEMA_VERSION {
            return Ok(());
        }

        // Version 1: parties, manuscripts, revisions and the audit trail.
        if from_version < 1 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS authors (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    email TEXT NOT NULL COLLATE NOCASE UNIQUE,
                    section TEXT NOT NULL,
                    deleted INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS guest_authors (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    email TEXT NOT NULL COLLATE NOCASE,
                    deleted INTEGER NOT NULL DEFAULT 0
                );
                CREATE INDEX IF NOT EXISTS idx_guest_email ON guest_authors(email);

                CREATE TABLE IF NOT EXISTS manuscripts (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    code TEXT NOT NULL UNIQUE,
                    manuscript_type TEXT NOT NULL,
                    author_id INTEGER NOT NULL,
                    current_revision_id INTEGER,
                    research_areas TEXT NOT NULL,
                    copyright_form TEXT,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS revisions (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    manuscript_id INTEGER NOT NULL REFERENCES manuscripts(id),
                    idx INTEGER NOT NULL,
                    title TEXT NOT NULL,
                    abstract TEXT NOT NULL,
                    keywords TEXT NOT NULL,
                    novelty TEXT NOT NULL,
                    anonymous_file TEXT,
                    source_file TEXT,
                    status TEXT NOT NULL,
                    associate_editor_id INTEGER,
                    minimum_reviews INTEGER NOT NULL,
                    comments_to_eic TEXT,
                    comment_reply TEXT,
                    comment_reply_file TEXT,
                    checks TEXT NOT NULL,
                    files TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL,
                    UNIQUE (manuscript_id, idx)
                );
                CREATE INDEX IF NOT EXISTS idx_revisions_status ON revisions(status);

                CREATE TABLE IF NOT EXISTS revision_events (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    revision_id INTEGER NOT NULL REFERENCES revisions(id),
                    event TEXT NOT NULL,
                    value TEXT NOT NULL,
                    created_by INTEGER,
                    created_at INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_revision_events_revision
                    ON revision_events(revision_id);
                "#,
            )
            .map_err(|e| RepositoryError::storage("migration v1", e.to_string()))?;
        }

        // Version 2: reviewer and co-author assignments, and reviews.
        if from_version < 2 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS revision_reviewers (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    revision_id INTEGER NOT NULL REFERENCES revisions(id),
                    reviewer_type TEXT NOT NULL,
                    reviewer_id INTEGER NOT NULL,
                    section TEXT,
                    created_by INTEGER,
                    invited_by INTEGER,
                    invited_at INTEGER,
                    accepted_at INTEGER,
                    denied_at INTEGER,
                    invite_count INTEGER NOT NULL DEFAULT 0,
                    remind_count INTEGER NOT NULL DEFAULT 0,
                    CHECK (accepted_at IS NULL OR denied_at IS NULL)
                );
                CREATE INDEX IF NOT EXISTS idx_revision_reviewers_revision
                    ON revision_reviewers(revision_id);

                CREATE TABLE IF NOT EXISTS revision_authors (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    revision_id INTEGER NOT NULL REFERENCES revisions(id),
                    author_type TEXT NOT NULL,
                    author_id INTEGER NOT NULL,
                    section TEXT,
                    created_by INTEGER
                );
                CREATE INDEX IF NOT EXISTS idx_revision_authors_revision
                    ON revision_authors(revision_id);

                CREATE TABLE IF NOT EXISTS reviews (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    revision_id INTEGER NOT NULL REFERENCES revisions(id),
                    reviewer_type TEXT NOT NULL,
                    reviewer_id INTEGER NOT NULL,
                    decision TEXT NOT NULL,
                    comments_to_author TEXT NOT NULL,
                    comments_to_associate_editor TEXT,
                    review_report TEXT,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL,
                    UNIQUE (revision_id, reviewer_type, reviewer_id)
                );
                "#,
            )
            .map_err(|e| RepositoryError::storage("migration v2", e.to_string()))?;
        }

        // Version 3: one assignment per party per revision. Duplicates left
        // by older versions keep their oldest row.
        if from_version < 3 {
            conn.execute_batch(
                r#"
                DELETE FROM revision_reviewers WHERE id NOT IN (
                    SELECT MIN(id) FROM revision_reviewers
                    GROUP BY revision_id, reviewer_type, reviewer_id
                );
                CREATE UNIQUE INDEX IF NOT EXISTS idx_revision_reviewers_party
                    ON revision_reviewers(revision_id, reviewer_type, reviewer_id);

                DELETE FROM revision_authors WHERE id NOT IN (
                    SELECT MIN(id) FROM revision_authors
                    GROUP BY revision_id, author_type, author_id
                );
                CREATE UNIQUE INDEX IF NOT EXISTS idx_revision_authors_party
                    ON revision_authors(revision_id, author_type, author_id);
                "#,
            )
            .map_err(|e| RepositoryError::storage("migration v3", e.to_string()))?;
        }

        conn.execute(
            "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?1)",
            params![CURRENT_SCHEMA_VERSION],
        )
        .map_err(|e| RepositoryError::storage("update schema version", e.to_string()))?;

        Ok(())
    }

    /// Create a new in-memory SQLite repository (for testing).
    pub fn new_in_memory() -> Result<Self, RepositoryError> {
        Self::new(":memory:")
    }

    /// Run `f` against the connection on the blocking pool.
    async fn blocking<T, F>(&self, operation: &'static str, f: F) -> Result<T, RepositoryError>
    where
        F: FnOnce(&mut Connection) -> Result<T, RepositoryError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap();
            f(&mut conn)
        })
        .await
        .map_err(|e| RepositoryError::storage(operation, e.to_string()))?
    }
}

// =============================================================================
// Shared statements
// =============================================================================

fn json(value: &impl serde::Serialize, what: &'static str) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::storage(what, e.to_string()))
}

struct RevisionInsert<'a> {
    manuscript_id: ManuscriptId,
    index: u32,
    content: &'a RevisionContent,
    status: Status,
    associate_editor_id: Option<editorial_core::AuthorId>,
    minimum_reviews: u32,
    at: DateTime<Utc>,
}

fn insert_revision(conn: &Connection, new: RevisionInsert<'_>) -> Result<RevisionId, RepositoryError> {
    let at = millis(new.at);
    conn.execute(
        "INSERT INTO revisions (manuscript_id, idx, title, abstract, keywords, novelty,
            anonymous_file, source_file, status, associate_editor_id, minimum_reviews,
            checks, files, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)",
        params![
            new.manuscript_id.0,
            new.index,
            new.content.title,
            new.content.abstract_text,
            new.content.keywords,
            new.content.novelty,
            file_column(&new.content.anonymous_file),
            file_column(&new.content.source_file),
            new.status.as_str(),
            new.associate_editor_id.map(|a| a.0),
            new.minimum_reviews,
            json(&ProductionChecks::default(), "serialize checks")?,
            json(&ProductionFiles::default(), "serialize files")?,
            at,
        ],
    )
    .map_err(conflict_or_storage("insert revision"))?;
    Ok(RevisionId(conn.last_insert_rowid()))
}

fn write_revision(conn: &Connection, revision: &Revision) -> Result<(), RepositoryError> {
    let changed = conn
        .execute(
            "UPDATE revisions SET title = ?1, abstract = ?2, keywords = ?3, novelty = ?4,
                anonymous_file = ?5, source_file = ?6, status = ?7, associate_editor_id = ?8,
                minimum_reviews = ?9, comments_to_eic = ?10, comment_reply = ?11,
                comment_reply_file = ?12, checks = ?13, files = ?14, updated_at = ?15
             WHERE id = ?16",
            params![
                revision.content.title,
                revision.content.abstract_text,
                revision.content.keywords,
                revision.content.novelty,
                file_column(&revision.content.anonymous_file),
                file_column(&revision.content.source_file),
                revision.status.as_str(),
                revision.associate_editor_id.map(|a| a.0),
                revision.minimum_reviews,
                revision.comments_to_eic,
                revision.comment_reply,
                file_column(&revision.comment_reply_file),
                json(&revision.checks, "serialize checks")?,
                json(&revision.files, "serialize files")?,
                millis(revision.updated_at),
                revision.id.0,
            ],
        )
        .map_err(storage("update revision"))?;
    if changed == 0 {
        return Err(RepositoryError::not_found("revision", revision.id));
    }
    Ok(())
}

fn insert_event(conn: &Connection, event: &RevisionEvent) -> Result<(), RepositoryError> {
    conn.execute(
        "INSERT INTO revision_events (revision_id, event, value, created_by, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            event.revision_id.0,
            event.event.as_str(),
            event.value,
            event.created_by.map(|a| a.0),
            millis(event.created_at),
        ],
    )
    .map_err(storage("insert event"))?;
    Ok(())
}

fn revision_exists(conn: &Connection, id: RevisionId) -> Result<(), RepositoryError> {
    conn.query_row("SELECT 1 FROM revisions WHERE id = ?1", [id.0], |_| Ok(()))
        .optional()
        .map_err(storage("check revision"))?
        .ok_or_else(|| RepositoryError::not_found("revision", id))
}

fn insert_reviewer(
    conn: &Connection,
    new: &NewAssignment,
) -> Result<RevisionReviewerId, RepositoryError> {
    conn.execute(
        "INSERT INTO revision_reviewers (revision_id, reviewer_type, reviewer_id, section, created_by)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            new.revision_id.0,
            new.party.kind().as_str(),
            new.party.raw_id(),
            new.section.map(|s| s.as_str()),
            new.created_by.map(|a| a.0),
        ],
    )
    .map_err(conflict_or_storage("insert reviewer"))?;
    Ok(RevisionReviewerId(conn.last_insert_rowid()))
}

/// Outcome of a conditional update on one assignment: `false` when the row
/// exists but the condition did not hold.
fn applied_or_missing(
    conn: &Connection,
    id: RevisionReviewerId,
    changed: usize,
) -> Result<bool, RepositoryError> {
    if changed == 1 {
        return Ok(true);
    }
    select_reviewer(conn, id)?
        .map(|_| false)
        .ok_or_else(|| RepositoryError::not_found("revision reviewer", id))
}

fn sweep_candidates(
    conn: &Connection,
    condition: &str,
    cap: u32,
) -> Result<Vec<SweepCandidate>, RepositoryError> {
    let sql = format!(
        "SELECT {}, m.id FROM revision_reviewers rr
         JOIN revisions r ON r.id = rr.revision_id
         JOIN manuscripts m ON m.current_revision_id = r.id
         WHERE r.status = ?1 AND {}
         ORDER BY rr.id",
        RawReviewer::COLUMNS,
        condition
    );
    let mut stmt = conn.prepare(&sql).map_err(storage("prepare sweep query"))?;
    let raw = stmt
        .query_map(params![Status::Submitted.as_str(), cap], |row| {
            Ok((RawReviewer::read(row)?, row.get::<_, i64>(12)?))
        })
        .map_err(storage("run sweep query"))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(storage("read sweep rows"))?;

    raw.into_iter()
        .map(|(reviewer, manuscript)| {
            Ok(SweepCandidate {
                manuscript_id: ManuscriptId(manuscript),
                assignment: reviewer.decode()?,
            })
        })
        .collect()
}

// =============================================================================
// WorkflowRepository trait implementation
// =============================================================================

#[async_trait]
impl WorkflowRepository for SqliteRepository {
    async fn create_manuscript(
        &self,
        new: NewManuscript,
    ) -> Result<ManuscriptAggregate, RepositoryError> {
        let prefix = format!("PMSL-{}-", new.created_at.format("%y"));
        let research_areas = json(&new.research_areas, "serialize research areas")?;

        self.blocking("create_manuscript", move |conn| {
            let tx = conn.transaction().map_err(storage("begin create_manuscript"))?;

            let taken: i64 = tx
                .query_row(
                    "SELECT COUNT(*) FROM manuscripts WHERE code LIKE ?1 || '%'",
                    [&prefix],
                    |row| row.get(0),
                )
                .map_err(storage("count manuscripts"))?;
            let code = format!("{}{:04}", prefix, taken + 1);
            let at = millis(new.created_at);

            tx.execute(
                "INSERT INTO manuscripts (code, manuscript_type, author_id, research_areas,
                    copyright_form, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![
                    code,
                    new.manuscript_type.as_str(),
                    new.author_id.0,
                    research_areas,
                    file_column(&new.copyright_form),
                    at,
                ],
            )
            .map_err(conflict_or_storage("insert manuscript"))?;
            let manuscript_id = ManuscriptId(tx.last_insert_rowid());

            let revision_id = insert_revision(
                &tx,
                RevisionInsert {
                    manuscript_id,
                    index: 0,
                    content: &new.content,
                    status: Status::Pending,
                    associate_editor_id: None,
                    minimum_reviews: new.minimum_reviews,
                    at: new.created_at,
                },
            )?;
            tx.execute(
                "UPDATE manuscripts SET current_revision_id = ?1 WHERE id = ?2",
                params![revision_id.0, manuscript_id.0],
            )
            .map_err(storage("point at first revision"))?;
            insert_event(
                &tx,
                &RevisionEvent::status_updated(
                    revision_id,
                    Status::Pending,
                    Some(new.author_id),
                    new.created_at,
                ),
            )?;

            tx.commit().map_err(storage("commit create_manuscript"))?;

            load_aggregate(conn, manuscript_id)?
                .ok_or_else(|| RepositoryError::not_found("manuscript", manuscript_id))
        })
        .await
    }

    async fn load(
        &self,
        id: ManuscriptId,
    ) -> Result<Option<ManuscriptAggregate>, RepositoryError> {
        self.blocking("load", move |conn| load_aggregate(conn, id))
            .await
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<ManuscriptId>, RepositoryError> {
        let code = code.to_string();
        self.blocking("find_by_code", move |conn| {
            conn.query_row(
                "SELECT id FROM manuscripts WHERE code = ?1",
                [&code],
                |row| row.get(0),
            )
            .optional()
            .map(|id| id.map(ManuscriptId))
            .map_err(storage("find_by_code"))
        })
        .await
    }

    async fn update_manuscript(&self, manuscript: &Manuscript) -> Result<(), RepositoryError> {
        let m = manuscript.clone();
        let research_areas = json(&m.research_areas, "serialize research areas")?;
        self.blocking("update_manuscript", move |conn| {
            let changed = conn
                .execute(
                    "UPDATE manuscripts SET manuscript_type = ?1, research_areas = ?2,
                        copyright_form = ?3, updated_at = ?4
                     WHERE id = ?5",
                    params![
                        m.manuscript_type.as_str(),
                        research_areas,
                        file_column(&m.copyright_form),
                        millis(m.updated_at),
                        m.id.0,
                    ],
                )
                .map_err(storage("update manuscript"))?;
            if changed == 0 {
                return Err(RepositoryError::not_found("manuscript", m.id));
            }
            Ok(())
        })
        .await
    }

    async fn update_revision(&self, revision: &Revision) -> Result<(), RepositoryError> {
        let revision = revision.clone();
        self.blocking("update_revision", move |conn| write_revision(conn, &revision))
            .await
    }

    async fn record_status_change(
        &self,
        revision: &Revision,
        event: RevisionEvent,
    ) -> Result<(), RepositoryError> {
        let revision = revision.clone();
        self.blocking("record_status_change", move |conn| {
            let tx = conn.transaction().map_err(storage("begin status change"))?;
            write_revision(&tx, &revision)?;
            insert_event(&tx, &event)?;
            tx.commit().map_err(storage("commit status change"))
        })
        .await
    }

    async fn create_revision_round(
        &self,
        round: RevisionRound,
    ) -> Result<Revision, RepositoryError> {
        self.blocking("create_revision_round", move |conn| {
            let tx = conn.transaction().map_err(storage("begin revision round"))?;

            let current: Option<i64> = tx
                .query_row(
                    "SELECT current_revision_id FROM manuscripts WHERE id = ?1",
                    [round.manuscript_id.0],
                    |row| row.get(0),
                )
                .optional()
                .map_err(storage("read current revision"))?
                .ok_or_else(|| RepositoryError::not_found("manuscript", round.manuscript_id))?;
            if current != Some(round.previous.0) {
                return Err(RepositoryError::Conflict(format!(
                    "revision {} is no longer current for manuscript {}",
                    round.previous, round.manuscript_id
                )));
            }

            let at = millis(round.created_at);
            tx.execute(
                "UPDATE revisions SET comment_reply = ?1, comment_reply_file = ?2, updated_at = ?3
                 WHERE id = ?4",
                params![
                    round.comment_reply,
                    file_column(&round.comment_reply_file),
                    at,
                    round.previous.0,
                ],
            )
            .map_err(storage("store comment reply"))?;

            let id = insert_revision(
                &tx,
                RevisionInsert {
                    manuscript_id: round.manuscript_id,
                    index: round.previous_index + 1,
                    content: &round.content,
                    status: Status::Submitted,
                    associate_editor_id: round.associate_editor_id,
                    minimum_reviews: round.minimum_reviews,
                    at: round.created_at,
                },
            )?;

            for carried in &round.carried_reviewers {
                insert_reviewer(
                    &tx,
                    &NewAssignment {
                        revision_id: id,
                        ..carried.clone()
                    },
                )?;
            }

            let repointed = tx
                .execute(
                    "UPDATE manuscripts SET current_revision_id = ?1, updated_at = ?2
                     WHERE id = ?3 AND current_revision_id = ?4",
                    params![id.0, at, round.manuscript_id.0, round.previous.0],
                )
                .map_err(storage("repoint manuscript"))?;
            if repointed != 1 {
                return Err(RepositoryError::Conflict(format!(
                    "manuscript {} moved on while opening a revision round",
                    round.manuscript_id
                )));
            }

            insert_event(
                &tx,
                &RevisionEvent::status_updated(id, Status::Submitted, round.actor, round.created_at),
            )?;
            tx.commit().map_err(storage("commit revision round"))?;

            select_revision(conn, id)?.ok_or_else(|| RepositoryError::not_found("revision", id))
        })
        .await
    }

    async fn events(
        &self,
        manuscript: ManuscriptId,
    ) -> Result<Vec<RevisionEvent>, RepositoryError> {
        self.blocking("events", move |conn| {
            query_all::<RawEvent>(
                conn,
                &format!(
                    "SELECT {} FROM revision_events e
                     JOIN revisions r ON r.id = e.revision_id
                     WHERE r.manuscript_id = ?1 ORDER BY e.id",
                    RawEvent::COLUMNS
                ),
                [manuscript.0],
            )
        })
        .await
    }

    async fn add_reviewer(&self, new: NewAssignment) -> Result<RevisionReviewer, RepositoryError> {
        self.blocking("add_reviewer", move |conn| {
            revision_exists(conn, new.revision_id)?;
            let id = insert_reviewer(conn, &new)?;
            select_reviewer(conn, id)?
                .ok_or_else(|| RepositoryError::not_found("revision reviewer", id))
        })
        .await
    }

    async fn add_reviewers(
        &self,
        batch: Vec<NewAssignment>,
    ) -> Result<Vec<RevisionReviewer>, RepositoryError> {
        self.blocking("add_reviewers", move |conn| {
            let tx = conn.transaction().map_err(storage("begin add_reviewers"))?;
            let mut ids = Vec::with_capacity(batch.len());
            for new in &batch {
                revision_exists(&tx, new.revision_id)?;
                ids.push(insert_reviewer(&tx, new)?);
            }
            tx.commit().map_err(storage("commit add_reviewers"))?;

            ids.into_iter()
                .map(|id| {
                    select_reviewer(conn, id)?
                        .ok_or_else(|| RepositoryError::not_found("revision reviewer", id))
                })
                .collect()
        })
        .await
    }

    async fn remove_reviewer(
        &self,
        revision: RevisionId,
        id: RevisionReviewerId,
    ) -> Result<Option<RevisionReviewer>, RepositoryError> {
        self.blocking("remove_reviewer", move |conn| {
            let Some(existing) = select_reviewer(conn, id)? else {
                return Ok(None);
            };
            if existing.revision_id != revision {
                return Ok(None);
            }
            conn.execute("DELETE FROM revision_reviewers WHERE id = ?1", [id.0])
                .map_err(storage("delete reviewer"))?;
            Ok(Some(existing))
        })
        .await
    }

    async fn invite(
        &self,
        id: RevisionReviewerId,
        at: DateTime<Utc>,
        by: Option<AuthorId>,
    ) -> Result<bool, RepositoryError> {
        self.blocking("invite", move |conn| {
            let changed = conn
                .execute(
                    "UPDATE revision_reviewers SET invite_count = invite_count + 1,
                        invited_at = ?1, invited_by = COALESCE(?2, invited_by)
                     WHERE id = ?3 AND accepted_at IS NULL AND denied_at IS NULL",
                    params![millis(at), by.map(|a| a.0), id.0],
                )
                .map_err(storage("invite"))?;
            applied_or_missing(conn, id, changed)
        })
        .await
    }

    async fn remind(&self, id: RevisionReviewerId) -> Result<bool, RepositoryError> {
        self.blocking("remind", move |conn| {
            let changed = conn
                .execute(
                    "UPDATE revision_reviewers SET remind_count = remind_count + 1
                     WHERE id = ?1 AND accepted_at IS NOT NULL AND denied_at IS NULL",
                    [id.0],
                )
                .map_err(storage("remind"))?;
            applied_or_missing(conn, id, changed)
        })
        .await
    }

    async fn resolve_invitation(
        &self,
        id: RevisionReviewerId,
        response: InviteResponse,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let sql = match response {
            InviteResponse::Accept => {
                "UPDATE revision_reviewers SET accepted_at = ?1
                 WHERE id = ?2 AND accepted_at IS NULL AND denied_at IS NULL"
            }
            InviteResponse::Deny => {
                "UPDATE revision_reviewers SET denied_at = ?1
                 WHERE id = ?2 AND accepted_at IS NULL AND denied_at IS NULL"
            }
        };
        self.blocking("resolve_invitation", move |conn| {
            let changed = conn
                .execute(sql, params![millis(at), id.0])
                .map_err(storage("resolve invitation"))?;
            applied_or_missing(conn, id, changed)
        })
        .await
    }

    async fn add_co_author(&self, new: NewAssignment) -> Result<RevisionAuthor, RepositoryError> {
        self.blocking("add_co_author", move |conn| {
            revision_exists(conn, new.revision_id)?;
            conn.execute(
                "INSERT INTO revision_authors (revision_id, author_type, author_id, section, created_by)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    new.revision_id.0,
                    new.party.kind().as_str(),
                    new.party.raw_id(),
                    new.section.map(|s| s.as_str()),
                    new.created_by.map(|a| a.0),
                ],
            )
            .map_err(conflict_or_storage("insert co-author"))?;
            let id = RevisionAuthorId(conn.last_insert_rowid());
            select_co_author(conn, id)?
                .ok_or_else(|| RepositoryError::not_found("revision author", id))
        })
        .await
    }

    async fn remove_co_author(
        &self,
        revision: RevisionId,
        id: RevisionAuthorId,
    ) -> Result<Option<RevisionAuthor>, RepositoryError> {
        self.blocking("remove_co_author", move |conn| {
            let Some(existing) = select_co_author(conn, id)? else {
                return Ok(None);
            };
            if existing.revision_id != revision {
                return Ok(None);
            }
            conn.execute("DELETE FROM revision_authors WHERE id = ?1", [id.0])
                .map_err(storage("delete co-author"))?;
            Ok(Some(existing))
        })
        .await
    }

    async fn upsert_review(
        &self,
        revision: RevisionId,
        reviewer: ReviewerRef,
        input: ReviewInput,
        at: DateTime<Utc>,
    ) -> Result<Review, RepositoryError> {
        self.blocking("upsert_review", move |conn| {
            revision_exists(conn, revision)?;
            let at = millis(at);
            conn.execute(
                "INSERT INTO reviews (revision_id, reviewer_type, reviewer_id, decision,
                    comments_to_author, comments_to_associate_editor, review_report,
                    created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
                 ON CONFLICT (revision_id, reviewer_type, reviewer_id) DO UPDATE SET
                    decision = excluded.decision,
                    comments_to_author = excluded.comments_to_author,
                    comments_to_associate_editor = excluded.comments_to_associate_editor,
                    review_report = excluded.review_report,
                    updated_at = excluded.updated_at",
                params![
                    revision.0,
                    reviewer.kind().as_str(),
                    reviewer.raw_id(),
                    input.decision.as_str(),
                    input.comments_to_author,
                    input.comments_to_associate_editor,
                    file_column(&input.review_report),
                    at,
                ],
            )
            .map_err(storage("upsert review"))?;

            query_one::<RawReview>(
                conn,
                &format!(
                    "SELECT {} FROM reviews v
                     WHERE v.revision_id = ?1 AND v.reviewer_type = ?2 AND v.reviewer_id = ?3",
                    RawReview::COLUMNS
                ),
                params![revision.0, reviewer.kind().as_str(), reviewer.raw_id()],
            )?
            .ok_or_else(|| RepositoryError::not_found("review", format!("{revision}/{reviewer}")))
        })
        .await
    }

    async fn update_review(&self, review: &Review) -> Result<(), RepositoryError> {
        let review = review.clone();
        self.blocking("update_review", move |conn| {
            let changed = conn
                .execute(
                    "UPDATE reviews SET decision = ?1, comments_to_author = ?2,
                        comments_to_associate_editor = ?3, review_report = ?4, updated_at = ?5
                     WHERE id = ?6",
                    params![
                        review.decision.as_str(),
                        review.comments_to_author,
                        review.comments_to_associate_editor,
                        file_column(&review.review_report),
                        millis(review.updated_at),
                        review.id.0,
                    ],
                )
                .map_err(storage("update review"))?;
            if changed == 0 {
                return Err(RepositoryError::not_found("review", review.id));
            }
            Ok(())
        })
        .await
    }

    async fn review(&self, id: ReviewId) -> Result<Option<Review>, RepositoryError> {
        self.blocking("review", move |conn| select_review(conn, id))
            .await
    }

    async fn reinvite_candidates(
        &self,
        cap: u32,
    ) -> Result<Vec<SweepCandidate>, RepositoryError> {
        self.blocking("reinvite_candidates", move |conn| {
            sweep_candidates(
                conn,
                "rr.invited_at IS NOT NULL AND rr.accepted_at IS NULL \
                 AND rr.denied_at IS NULL AND rr.invite_count < ?2",
                cap,
            )
        })
        .await
    }

    async fn remind_candidates(&self, cap: u32) -> Result<Vec<SweepCandidate>, RepositoryError> {
        self.blocking("remind_candidates", move |conn| {
            sweep_candidates(
                conn,
                "rr.accepted_at IS NOT NULL AND rr.denied_at IS NULL \
                 AND rr.remind_count < ?2 \
                 AND NOT EXISTS (SELECT 1 FROM reviews v \
                     WHERE v.revision_id = rr.revision_id \
                     AND v.reviewer_type = rr.reviewer_type \
                     AND v.reviewer_id = rr.reviewer_id)",
                cap,
            )
        })
        .await
    }

    async fn retention_candidates(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ManuscriptId>, RepositoryError> {
        self.blocking("retention_candidates", move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT m.id FROM manuscripts m
                     JOIN revisions r ON r.id = m.current_revision_id
                     WHERE r.status IN (?1, ?2, ?3) AND r.updated_at < ?4
                     ORDER BY m.id",
                )
                .map_err(storage("prepare retention query"))?;
            let ids = stmt
                .query_map(
                    params![
                        Status::Rejected.as_str(),
                        Status::Withdrawn.as_str(),
                        Status::Deleted.as_str(),
                        millis(cutoff),
                    ],
                    |row| row.get::<_, i64>(0),
                )
                .map_err(storage("run retention query"))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(storage("read retention rows"))?;

            let mut holding_files = Vec::new();
            for id in ids.into_iter().map(ManuscriptId) {
                let Some(agg) = load_aggregate(conn, id)? else {
                    continue;
                };
                let has_files = agg.manuscript().copyright_form.is_some()
                    || agg.revisions().iter().any(|r| !r.file_refs().is_empty());
                if has_files {
                    holding_files.push(id);
                }
            }
            Ok(holding_files)
        })
        .await
    }
}

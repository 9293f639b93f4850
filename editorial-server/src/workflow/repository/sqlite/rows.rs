//! Row mapping between SQLite and the workflow records.
//!
//! Each table has a `Raw*` struct holding the column values exactly as
//! stored; `decode` turns it into the domain record and reports anything
//! that doesn't parse as corruption. Column lists assume the table aliases
//! used throughout the queries (`m`, `r`, `rr`, `ra`, `v`, `e`).

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Params, Row};

use super::super::RepositoryError;
use editorial_core::{
    AuthorId, FileRef, Invitation, Manuscript, ManuscriptAggregate, ManuscriptId, ReviewId,
    ReviewerKind, ReviewerRef, Review, Revision, RevisionAuthor, RevisionAuthorId,
    RevisionContent, RevisionEvent, RevisionId, RevisionReviewer, RevisionReviewerId,
};

// =============================================================================
// Scalar helpers
// =============================================================================

pub(super) fn storage(operation: &'static str) -> impl FnOnce(rusqlite::Error) -> RepositoryError {
    move |e| RepositoryError::storage(operation, e.to_string())
}

/// Like [`storage`], but unique-constraint failures become conflicts.
pub(super) fn conflict_or_storage(
    operation: &'static str,
) -> impl FnOnce(rusqlite::Error) -> RepositoryError {
    move |e| match &e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            RepositoryError::Conflict(format!("{operation}: {e}"))
        }
        _ => RepositoryError::storage(operation, e.to_string()),
    }
}

pub(super) fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn timestamp(value: i64, what: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::from_timestamp_millis(value)
        .ok_or_else(|| RepositoryError::corruption(format!("{what} timestamp {value}")))
}

fn maybe_timestamp(value: Option<i64>, what: &str) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|v| timestamp(v, what)).transpose()
}

fn parse<T: FromStr>(value: &str, what: &str) -> Result<T, RepositoryError> {
    value
        .parse()
        .map_err(|_| RepositoryError::corruption(format!("{what} {value:?}")))
}

fn party(kind: &str, id: i64) -> Result<ReviewerRef, RepositoryError> {
    let kind: ReviewerKind = parse(kind, "party kind")?;
    Ok(ReviewerRef::from_parts(kind, id))
}

pub(super) fn file_column(file: &Option<FileRef>) -> Option<&str> {
    file.as_ref().map(|f| f.0.as_str())
}

// =============================================================================
// Row records
// =============================================================================

/// A table row that can be read raw and decoded afterwards.
pub(super) trait RowRecord: Sized {
    type Record;
    const COLUMNS: &'static str;

    fn read(row: &Row<'_>) -> rusqlite::Result<Self>;
    fn decode(self) -> Result<Self::Record, RepositoryError>;
}

pub(super) fn query_one<R: RowRecord>(
    conn: &Connection,
    sql: &str,
    params: impl Params,
) -> Result<Option<R::Record>, RepositoryError> {
    conn.query_row(sql, params, R::read)
        .optional()
        .map_err(storage("query row"))?
        .map(R::decode)
        .transpose()
}

pub(super) fn query_all<R: RowRecord>(
    conn: &Connection,
    sql: &str,
    params: impl Params,
) -> Result<Vec<R::Record>, RepositoryError> {
    let mut stmt = conn.prepare(sql).map_err(storage("prepare query"))?;
    let raw = stmt
        .query_map(params, R::read)
        .map_err(storage("run query"))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(storage("read rows"))?;
    raw.into_iter().map(R::decode).collect()
}

pub(super) struct RawManuscript {
    id: i64,
    code: String,
    manuscript_type: String,
    author_id: i64,
    current_revision_id: Option<i64>,
    research_areas: String,
    copyright_form: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl RowRecord for RawManuscript {
    type Record = Manuscript;
    const COLUMNS: &'static str = "m.id, m.code, m.manuscript_type, m.author_id, \
        m.current_revision_id, m.research_areas, m.copyright_form, m.created_at, m.updated_at";

    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            code: row.get(1)?,
            manuscript_type: row.get(2)?,
            author_id: row.get(3)?,
            current_revision_id: row.get(4)?,
            research_areas: row.get(5)?,
            copyright_form: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn decode(self) -> Result<Manuscript, RepositoryError> {
        let current = self.current_revision_id.ok_or_else(|| {
            RepositoryError::corruption(format!("manuscript {} without revision", self.id))
        })?;
        let research_areas = serde_json::from_str(&self.research_areas)
            .map_err(|_| RepositoryError::corruption("research areas JSON"))?;
        Ok(Manuscript {
            id: ManuscriptId(self.id),
            code: self.code,
            manuscript_type: parse(&self.manuscript_type, "manuscript type")?,
            author_id: AuthorId(self.author_id),
            current_revision_id: RevisionId(current),
            research_areas,
            copyright_form: self.copyright_form.map(FileRef),
            created_at: timestamp(self.created_at, "manuscript created")?,
            updated_at: timestamp(self.updated_at, "manuscript updated")?,
        })
    }
}

pub(super) struct RawRevision {
    id: i64,
    manuscript_id: i64,
    index: u32,
    title: String,
    abstract_text: String,
    keywords: String,
    novelty: String,
    anonymous_file: Option<String>,
    source_file: Option<String>,
    status: String,
    associate_editor_id: Option<i64>,
    minimum_reviews: u32,
    comments_to_eic: Option<String>,
    comment_reply: Option<String>,
    comment_reply_file: Option<String>,
    checks: String,
    files: String,
    created_at: i64,
    updated_at: i64,
}

impl RowRecord for RawRevision {
    type Record = Revision;
    const COLUMNS: &'static str = "r.id, r.manuscript_id, r.idx, r.title, r.abstract, \
        r.keywords, r.novelty, r.anonymous_file, r.source_file, r.status, \
        r.associate_editor_id, r.minimum_reviews, r.comments_to_eic, r.comment_reply, \
        r.comment_reply_file, r.checks, r.files, r.created_at, r.updated_at";

    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            manuscript_id: row.get(1)?,
            index: row.get(2)?,
            title: row.get(3)?,
            abstract_text: row.get(4)?,
            keywords: row.get(5)?,
            novelty: row.get(6)?,
            anonymous_file: row.get(7)?,
            source_file: row.get(8)?,
            status: row.get(9)?,
            associate_editor_id: row.get(10)?,
            minimum_reviews: row.get(11)?,
            comments_to_eic: row.get(12)?,
            comment_reply: row.get(13)?,
            comment_reply_file: row.get(14)?,
            checks: row.get(15)?,
            files: row.get(16)?,
            created_at: row.get(17)?,
            updated_at: row.get(18)?,
        })
    }

    fn decode(self) -> Result<Revision, RepositoryError> {
        Ok(Revision {
            id: RevisionId(self.id),
            manuscript_id: ManuscriptId(self.manuscript_id),
            index: self.index,
            content: RevisionContent {
                title: self.title,
                abstract_text: self.abstract_text,
                keywords: self.keywords,
                novelty: self.novelty,
                anonymous_file: self.anonymous_file.map(FileRef),
                source_file: self.source_file.map(FileRef),
            },
            status: parse(&self.status, "revision status")?,
            associate_editor_id: self.associate_editor_id.map(AuthorId),
            minimum_reviews: self.minimum_reviews,
            comments_to_eic: self.comments_to_eic,
            comment_reply: self.comment_reply,
            comment_reply_file: self.comment_reply_file.map(FileRef),
            checks: serde_json::from_str(&self.checks)
                .map_err(|_| RepositoryError::corruption("production checks JSON"))?,
            files: serde_json::from_str(&self.files)
                .map_err(|_| RepositoryError::corruption("production files JSON"))?,
            created_at: timestamp(self.created_at, "revision created")?,
            updated_at: timestamp(self.updated_at, "revision updated")?,
        })
    }
}

pub(super) struct RawReviewer {
    id: i64,
    revision_id: i64,
    kind: String,
    party_id: i64,
    section: Option<String>,
    created_by: Option<i64>,
    invited_by: Option<i64>,
    invited_at: Option<i64>,
    accepted_at: Option<i64>,
    denied_at: Option<i64>,
    invite_count: u32,
    remind_count: u32,
}

impl RowRecord for RawReviewer {
    type Record = RevisionReviewer;
    const COLUMNS: &'static str = "rr.id, rr.revision_id, rr.reviewer_type, rr.reviewer_id, \
        rr.section, rr.created_by, rr.invited_by, rr.invited_at, rr.accepted_at, \
        rr.denied_at, rr.invite_count, rr.remind_count";

    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            revision_id: row.get(1)?,
            kind: row.get(2)?,
            party_id: row.get(3)?,
            section: row.get(4)?,
            created_by: row.get(5)?,
            invited_by: row.get(6)?,
            invited_at: row.get(7)?,
            accepted_at: row.get(8)?,
            denied_at: row.get(9)?,
            invite_count: row.get(10)?,
            remind_count: row.get(11)?,
        })
    }

    fn decode(self) -> Result<RevisionReviewer, RepositoryError> {
        Ok(RevisionReviewer {
            id: RevisionReviewerId(self.id),
            revision_id: RevisionId(self.revision_id),
            reviewer: party(&self.kind, self.party_id)?,
            section: self
                .section
                .map(|s| parse(&s, "section"))
                .transpose()?,
            created_by: self.created_by.map(AuthorId),
            invitation: Invitation {
                invited_by: self.invited_by.map(AuthorId),
                invited_at: maybe_timestamp(self.invited_at, "invited")?,
                accepted_at: maybe_timestamp(self.accepted_at, "accepted")?,
                denied_at: maybe_timestamp(self.denied_at, "denied")?,
                invite_count: self.invite_count,
                remind_count: self.remind_count,
            },
        })
    }
}

pub(super) struct RawAuthor {
    id: i64,
    revision_id: i64,
    kind: String,
    party_id: i64,
    section: Option<String>,
    created_by: Option<i64>,
}

impl RowRecord for RawAuthor {
    type Record = RevisionAuthor;
    const COLUMNS: &'static str =
        "ra.id, ra.revision_id, ra.author_type, ra.author_id, ra.section, ra.created_by";

    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            revision_id: row.get(1)?,
            kind: row.get(2)?,
            party_id: row.get(3)?,
            section: row.get(4)?,
            created_by: row.get(5)?,
        })
    }

    fn decode(self) -> Result<RevisionAuthor, RepositoryError> {
        Ok(RevisionAuthor {
            id: RevisionAuthorId(self.id),
            revision_id: RevisionId(self.revision_id),
            author: party(&self.kind, self.party_id)?,
            section: self
                .section
                .map(|s| parse(&s, "section"))
                .transpose()?,
            created_by: self.created_by.map(AuthorId),
        })
    }
}

pub(super) struct RawReview {
    id: i64,
    revision_id: i64,
    kind: String,
    party_id: i64,
    decision: String,
    comments_to_author: String,
    comments_to_associate_editor: Option<String>,
    review_report: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl RowRecord for RawReview {
    type Record = Review;
    const COLUMNS: &'static str = "v.id, v.revision_id, v.reviewer_type, v.reviewer_id, \
        v.decision, v.comments_to_author, v.comments_to_associate_editor, v.review_report, \
        v.created_at, v.updated_at";

    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            revision_id: row.get(1)?,
            kind: row.get(2)?,
            party_id: row.get(3)?,
            decision: row.get(4)?,
            comments_to_author: row.get(5)?,
            comments_to_associate_editor: row.get(6)?,
            review_report: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    fn decode(self) -> Result<Review, RepositoryError> {
        Ok(Review {
            id: ReviewId(self.id),
            revision_id: RevisionId(self.revision_id),
            reviewer: party(&self.kind, self.party_id)?,
            decision: parse(&self.decision, "review decision")?,
            comments_to_author: self.comments_to_author,
            comments_to_associate_editor: self.comments_to_associate_editor,
            review_report: self.review_report.map(FileRef),
            created_at: timestamp(self.created_at, "review created")?,
            updated_at: timestamp(self.updated_at, "review updated")?,
        })
    }
}

pub(super) struct RawEvent {
    revision_id: i64,
    event: String,
    value: String,
    created_by: Option<i64>,
    created_at: i64,
}

impl RowRecord for RawEvent {
    type Record = RevisionEvent;
    const COLUMNS: &'static str = "e.revision_id, e.event, e.value, e.created_by, e.created_at";

    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            revision_id: row.get(0)?,
            event: row.get(1)?,
            value: row.get(2)?,
            created_by: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    fn decode(self) -> Result<RevisionEvent, RepositoryError> {
        Ok(RevisionEvent {
            revision_id: RevisionId(self.revision_id),
            event: parse(&self.event, "event kind")?,
            value: self.value,
            created_by: self.created_by.map(AuthorId),
            created_at: timestamp(self.created_at, "event")?,
        })
    }
}

// =============================================================================
// Aggregate loading
// =============================================================================

pub(super) fn select_revision(
    conn: &Connection,
    id: RevisionId,
) -> Result<Option<Revision>, RepositoryError> {
    query_one::<RawRevision>(
        conn,
        &format!("SELECT {} FROM revisions r WHERE r.id = ?1", RawRevision::COLUMNS),
        [id.0],
    )
}

pub(super) fn select_reviewer(
    conn: &Connection,
    id: RevisionReviewerId,
) -> Result<Option<RevisionReviewer>, RepositoryError> {
    query_one::<RawReviewer>(
        conn,
        &format!(
            "SELECT {} FROM revision_reviewers rr WHERE rr.id = ?1",
            RawReviewer::COLUMNS
        ),
        [id.0],
    )
}

pub(super) fn select_co_author(
    conn: &Connection,
    id: RevisionAuthorId,
) -> Result<Option<RevisionAuthor>, RepositoryError> {
    query_one::<RawAuthor>(
        conn,
        &format!(
            "SELECT {} FROM revision_authors ra WHERE ra.id = ?1",
            RawAuthor::COLUMNS
        ),
        [id.0],
    )
}

pub(super) fn select_review(
    conn: &Connection,
    id: ReviewId,
) -> Result<Option<Review>, RepositoryError> {
    query_one::<RawReview>(
        conn,
        &format!("SELECT {} FROM reviews v WHERE v.id = ?1", RawReview::COLUMNS),
        [id.0],
    )
}

/// Load a manuscript with all of its revisions, assignments and reviews.
pub(super) fn load_aggregate(
    conn: &Connection,
    id: ManuscriptId,
) -> Result<Option<ManuscriptAggregate>, RepositoryError> {
    let Some(manuscript) = query_one::<RawManuscript>(
        conn,
        &format!("SELECT {} FROM manuscripts m WHERE m.id = ?1", RawManuscript::COLUMNS),
        [id.0],
    )?
    else {
        return Ok(None);
    };

    let revisions = query_all::<RawRevision>(
        conn,
        &format!(
            "SELECT {} FROM revisions r WHERE r.manuscript_id = ?1 ORDER BY r.idx",
            RawRevision::COLUMNS
        ),
        [id.0],
    )?;
    let reviewers = query_all::<RawReviewer>(
        conn,
        &format!(
            "SELECT {} FROM revision_reviewers rr
             JOIN revisions r ON r.id = rr.revision_id
             WHERE r.manuscript_id = ?1 ORDER BY rr.id",
            RawReviewer::COLUMNS
        ),
        [id.0],
    )?;
    let authors = query_all::<RawAuthor>(
        conn,
        &format!(
            "SELECT {} FROM revision_authors ra
             JOIN revisions r ON r.id = ra.revision_id
             WHERE r.manuscript_id = ?1 ORDER BY ra.id",
            RawAuthor::COLUMNS
        ),
        [id.0],
    )?;
    let reviews = query_all::<RawReview>(
        conn,
        &format!(
            "SELECT {} FROM reviews v
             JOIN revisions r ON r.id = v.revision_id
             WHERE r.manuscript_id = ?1 ORDER BY v.id",
            RawReview::COLUMNS
        ),
        [id.0],
    )?;

    ManuscriptAggregate::new(manuscript, revisions, reviewers, authors, reviews)
        .map(Some)
        .map_err(|e| RepositoryError::corruption(e.to_string()))
}

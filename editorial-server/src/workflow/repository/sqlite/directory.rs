//! Party lookups backed by the `authors` and `guest_authors` tables.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use super::super::{DeletedParties, Directory, Party, RepositoryError};
use super::rows::{conflict_or_storage, storage};
use super::SqliteRepository;
use editorial_core::{AuthorId, Contact, GuestAuthorId, ReviewerRef, Section};

fn account(
    conn: &Connection,
    clause: &str,
    value: &dyn rusqlite::ToSql,
) -> Result<Option<Party>, RepositoryError> {
    let row = conn
        .query_row(
            &format!(
                "SELECT id, name, email, section, deleted FROM authors WHERE {clause} \
                 ORDER BY id LIMIT 1"
            ),
            [value],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, bool>(4)?,
                ))
            },
        )
        .optional()
        .map_err(storage("read author"))?;

    row.map(|(id, name, email, section, deleted)| {
        let section: Section = section
            .parse()
            .map_err(|_| RepositoryError::corruption(format!("author section {section:?}")))?;
        Ok(Party {
            party: ReviewerRef::Registered(AuthorId(id)),
            contact: Contact::new(name, email),
            section: Some(section),
            deleted,
        })
    })
    .transpose()
}

fn guest(
    conn: &Connection,
    clause: &str,
    value: &dyn rusqlite::ToSql,
) -> Result<Option<Party>, RepositoryError> {
    conn.query_row(
        &format!(
            "SELECT id, name, email, deleted FROM guest_authors WHERE {clause} \
             ORDER BY deleted, id LIMIT 1"
        ),
        [value],
        |row| {
            Ok(Party {
                party: ReviewerRef::Guest(GuestAuthorId(row.get(0)?)),
                contact: Contact::new(row.get::<_, String>(1)?, row.get::<_, String>(2)?),
                section: None,
                deleted: row.get(3)?,
            })
        },
    )
    .optional()
    .map_err(storage("read guest author"))
}

fn visible(party: Option<Party>, deleted: DeletedParties) -> Option<Party> {
    party.filter(|p| deleted == DeletedParties::Include || !p.deleted)
}

#[async_trait]
impl Directory for SqliteRepository {
    async fn party(
        &self,
        party: ReviewerRef,
        deleted: DeletedParties,
    ) -> Result<Option<Party>, RepositoryError> {
        self.blocking("party", move |conn| {
            let found = match party {
                ReviewerRef::Registered(id) => account(conn, "id = ?1", &id.0)?,
                ReviewerRef::Guest(id) => guest(conn, "id = ?1", &id.0)?,
            };
            Ok(visible(found, deleted))
        })
        .await
    }

    async fn find_by_email(
        &self,
        email: &str,
        deleted: DeletedParties,
    ) -> Result<Option<Party>, RepositoryError> {
        let email = email.to_string();
        self.blocking("find_by_email", move |conn| {
            if let Some(found) = visible(account(conn, "email = ?1", &email)?, deleted) {
                return Ok(Some(found));
            }
            let clause = match deleted {
                DeletedParties::Exclude => "email = ?1 AND deleted = 0",
                DeletedParties::Include => "email = ?1",
            };
            guest(conn, clause, &email)
        })
        .await
    }

    async fn registered_by_email(&self, email: &str) -> Result<Option<Party>, RepositoryError> {
        let email = email.to_string();
        self.blocking("registered_by_email", move |conn| {
            Ok(visible(
                account(conn, "email = ?1", &email)?,
                DeletedParties::Exclude,
            ))
        })
        .await
    }

    async fn create_author(
        &self,
        contact: Contact,
        section: Section,
    ) -> Result<AuthorId, RepositoryError> {
        self.blocking("create_author", move |conn| {
            conn.execute(
                "INSERT INTO authors (name, email, section) VALUES (?1, ?2, ?3)",
                params![contact.name, contact.email, section.as_str()],
            )
            .map_err(conflict_or_storage("insert author"))?;
            Ok(AuthorId(conn.last_insert_rowid()))
        })
        .await
    }

    async fn create_guest(&self, contact: Contact) -> Result<GuestAuthorId, RepositoryError> {
        self.blocking("create_guest", move |conn| {
            conn.execute(
                "INSERT INTO guest_authors (name, email) VALUES (?1, ?2)",
                params![contact.name, contact.email],
            )
            .map_err(storage("insert guest author"))?;
            Ok(GuestAuthorId(conn.last_insert_rowid()))
        })
        .await
    }

    async fn soft_delete_guest(&self, id: GuestAuthorId) -> Result<(), RepositoryError> {
        self.blocking("soft_delete_guest", move |conn| {
            let changed = conn
                .execute(
                    "UPDATE guest_authors SET deleted = 1 WHERE id = ?1",
                    [id.0],
                )
                .map_err(storage("soft delete guest"))?;
            if changed == 0 {
                return Err(RepositoryError::not_found("guest author", id));
            }
            Ok(())
        })
        .await
    }
}

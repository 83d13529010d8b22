use chrono::Utc;
use rusqlite::OptionalExtension;
use tracing::{debug, instrument, warn};

use mailctx_core::context::Context;
use mailctx_core::ids::{ContextId, ThreadId};

use crate::database::Database;
use crate::error::{is_constraint_violation, StoreError};
use crate::rows::RowReader;

/// A context together with the revision token it was read at.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredContext {
    pub context: Context,
    pub revision: u64,
}

/// One context per thread. Writes are optimistic: an update only lands when
/// the row still carries the revision the writer read.
#[derive(Clone)]
pub struct ContextRepo {
    db: Database,
}

impl ContextRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self), fields(context_id = %id))]
    pub fn get(&self, id: &ContextId) -> Result<StoredContext, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT document, revision FROM contexts WHERE context_id = ?1")?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_stored(row),
                None => Err(StoreError::NotFound(format!("context {id}"))),
            }
        })
    }

    #[instrument(skip(self), fields(thread_id = %thread_id))]
    pub fn get_by_thread(&self, thread_id: &ThreadId) -> Result<Option<StoredContext>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT document, revision FROM contexts WHERE thread_id = ?1")?;
            let mut rows = stmt.query([thread_id.as_str()])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_stored(row)?)),
                None => Ok(None),
            }
        })
    }

    /// Insert the first context of a thread at revision 1.
    /// A thread that already has a context yields `Conflict`.
    #[instrument(skip(self, context), fields(thread_id = %context.thread_id))]
    pub fn insert(&self, context: &Context) -> Result<StoredContext, StoreError> {
        let document = serde_json::to_string(context)?;
        self.db.with_transaction(|tx| {
            let now = Utc::now().to_rfc3339();
            let inserted = tx.execute(
                "INSERT INTO contexts (context_id, thread_id, email_id, revision, confidence_score,
                                       document, analyzed_at, updated_at)
                 VALUES (?1, ?2, ?3, 1, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    context.context_id.as_str(),
                    context.thread_id.as_str(),
                    context.email_id.as_str(),
                    context.confidence_score,
                    document,
                    context.analyzed_at.to_rfc3339(),
                    now,
                ],
            );
            match inserted {
                Ok(_) => {}
                Err(e) if is_constraint_violation(&e) => {
                    return Err(StoreError::Conflict(format!(
                        "thread {} already has a context",
                        context.thread_id
                    )));
                }
                Err(e) => return Err(e.into()),
            }
            append_revision(tx, context, 1, &document, &now)?;
            Ok(StoredContext {
                context: context.clone(),
                revision: 1,
            })
        })
    }

    /// Replace the thread's context if it is still at `expected_revision`.
    #[instrument(skip(self, context), fields(thread_id = %context.thread_id))]
    pub fn replace(&self, context: &Context, expected_revision: u64) -> Result<StoredContext, StoreError> {
        let document = serde_json::to_string(context)?;
        let next = expected_revision + 1;
        self.db.with_transaction(|tx| {
            let now = Utc::now().to_rfc3339();
            let changed = tx.execute(
                "UPDATE contexts SET email_id = ?1, revision = ?2, confidence_score = ?3, document = ?4,
                                     analyzed_at = ?5, updated_at = ?6
                 WHERE context_id = ?7 AND thread_id = ?8 AND revision = ?9",
                rusqlite::params![
                    context.email_id.as_str(),
                    next as i64,
                    context.confidence_score,
                    document,
                    context.analyzed_at.to_rfc3339(),
                    now,
                    context.context_id.as_str(),
                    context.thread_id.as_str(),
                    expected_revision as i64,
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::Conflict(format!(
                    "context {} moved past revision {expected_revision}",
                    context.context_id
                )));
            }
            append_revision(tx, context, next, &document, &now)?;
            Ok(StoredContext {
                context: context.clone(),
                revision: next,
            })
        })
    }

    /// Read the thread's current context, combine it with `f`, and write the
    /// result back. `f` sees `None` for a thread with no context yet. On a
    /// concurrent write the whole read-combine-write is retried, up to
    /// `max_attempts` times.
    pub fn merge_then_store<F, E>(
        &self,
        thread_id: &ThreadId,
        max_attempts: u32,
        mut f: F,
    ) -> Result<StoredContext, E>
    where
        F: FnMut(Option<&Context>) -> Result<Context, E>,
        E: From<StoreError>,
    {
        let attempts = max_attempts.max(1);
        for attempt in 1..=attempts {
            let current = self.get_by_thread(thread_id)?;
            let combined = f(current.as_ref().map(|s| &s.context))?;
            let written = match &current {
                None => self.insert(&combined),
                Some(stored) => self.replace(&combined, stored.revision),
            };
            match written {
                Ok(stored) => {
                    debug!(thread_id = %thread_id, revision = stored.revision, attempt, "context stored");
                    return Ok(stored);
                }
                Err(e) if e.is_conflict() => {
                    warn!(thread_id = %thread_id, attempt, error = %e, "context write conflict, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(StoreError::Conflict(format!(
            "thread {thread_id}: gave up after {attempts} conflicting writes"
        ))
        .into())
    }

    /// Every stored revision of a context, oldest first.
    #[instrument(skip(self), fields(context_id = %id))]
    pub fn history(&self, id: &ContextId) -> Result<Vec<StoredContext>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT document, revision FROM context_revisions
                 WHERE context_id = ?1 ORDER BY revision ASC",
            )?;
            let mut rows = stmt.query([id.as_str()])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_stored(row)?);
            }
            Ok(out)
        })
    }

    pub fn revision_of(&self, id: &ContextId) -> Result<Option<u64>, StoreError> {
        self.db.with_conn(|conn| {
            let rev: Option<i64> = conn
                .query_row(
                    "SELECT revision FROM contexts WHERE context_id = ?1",
                    [id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(rev.map(|r| r as u64))
        })
    }
}

fn append_revision(
    conn: &rusqlite::Connection,
    context: &Context,
    revision: u64,
    document: &str,
    stored_at: &str,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO context_revisions (context_id, revision, email_id, document, stored_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![
            context.context_id.as_str(),
            revision as i64,
            context.email_id.as_str(),
            document,
            stored_at,
        ],
    )?;
    Ok(())
}

fn row_to_stored(row: &rusqlite::Row<'_>) -> Result<StoredContext, StoreError> {
    let r = RowReader::new(row, "contexts");
    Ok(StoredContext {
        context: r.json(0, "document")?,
        revision: r.count(1, "revision")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use mailctx_core::ids::EmailId;

    fn ctx(thread: &str, email: &str, confidence: f64) -> Context {
        Context {
            context_id: ContextId::new(),
            email_id: EmailId::from_raw(email),
            thread_id: ThreadId::from_raw(thread),
            project_contexts: vec![],
            relationship_contexts: vec![],
            topics: vec!["budget".into()],
            confidence_score: confidence,
            analyzed_at: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    fn repo() -> ContextRepo {
        ContextRepo::new(Database::in_memory().unwrap())
    }

    #[test]
    fn insert_then_get() {
        let repo = repo();
        let c = ctx("t1", "e1", 0.9);
        let stored = repo.insert(&c).unwrap();
        assert_eq!(stored.revision, 1);

        let by_id = repo.get(&c.context_id).unwrap();
        assert_eq!(by_id.context, c);
        let by_thread = repo.get_by_thread(&c.thread_id).unwrap().unwrap();
        assert_eq!(by_thread.context.context_id, c.context_id);
    }

    #[test]
    fn get_missing_is_not_found() {
        let repo = repo();
        assert!(matches!(repo.get(&ContextId::new()), Err(StoreError::NotFound(_))));
        assert!(repo.get_by_thread(&ThreadId::from_raw("none")).unwrap().is_none());
    }

    #[test]
    fn second_insert_for_thread_conflicts() {
        let repo = repo();
        repo.insert(&ctx("t1", "e1", 0.9)).unwrap();
        let err = repo.insert(&ctx("t1", "e2", 0.8)).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn stale_replace_conflicts() {
        let repo = repo();
        let mut c = ctx("t1", "e1", 0.8);
        repo.insert(&c).unwrap();

        c.confidence_score = 0.9;
        let stored = repo.replace(&c, 1).unwrap();
        assert_eq!(stored.revision, 2);

        c.confidence_score = 0.95;
        let err = repo.replace(&c, 1).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(repo.revision_of(&c.context_id).unwrap(), Some(2));
    }

    #[test]
    fn merge_then_store_creates_then_updates() {
        let repo = repo();
        let thread = ThreadId::from_raw("t1");
        let first = repo
            .merge_then_store::<_, StoreError>(&thread, 3, |existing| {
                assert!(existing.is_none());
                Ok(ctx("t1", "e1", 0.8))
            })
            .unwrap();
        assert_eq!(first.revision, 1);

        let second = repo
            .merge_then_store::<_, StoreError>(&thread, 3, |existing| {
                let mut next = existing.unwrap().clone();
                next.confidence_score = 0.9;
                Ok(next)
            })
            .unwrap();
        assert_eq!(second.revision, 2);
        assert_eq!(second.context.confidence_score, 0.9);

        let history = repo.history(&first.context.context_id).unwrap();
        assert_eq!(history.iter().map(|h| h.revision).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(history[0].context.confidence_score, 0.8);
    }

    #[test]
    fn merge_then_store_retries_after_concurrent_write() {
        let repo = repo();
        let thread = ThreadId::from_raw("t1");
        let seed = ctx("t1", "e1", 0.5);
        repo.insert(&seed).unwrap();

        let other = ContextRepo::new(repo.db.clone());
        let mut calls = 0;
        let stored = repo
            .merge_then_store::<_, StoreError>(&thread, 3, |existing| {
                calls += 1;
                let existing = existing.unwrap().clone();
                if calls == 1 {
                    // Another writer lands between our read and our write.
                    let mut bumped = existing.clone();
                    bumped.topics.push("interloper".into());
                    other.replace(&bumped, 1).unwrap();
                }
                let mut next = existing;
                next.confidence_score = 0.99;
                Ok(next)
            })
            .unwrap();

        assert_eq!(calls, 2);
        assert_eq!(stored.revision, 3);
        assert!(stored.context.topics.contains(&"interloper".to_string()));
    }

    #[test]
    fn merge_then_store_gives_up_after_budget() {
        let repo = repo();
        let thread = ThreadId::from_raw("t1");
        repo.insert(&ctx("t1", "e1", 0.5)).unwrap();
        let other = ContextRepo::new(repo.db.clone());

        let err = repo
            .merge_then_store::<_, StoreError>(&thread, 2, |existing| {
                let current = other.get_by_thread(&thread).unwrap().unwrap();
                other.replace(&current.context, current.revision).unwrap();
                Ok(existing.unwrap().clone())
            })
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn concurrent_writers_do_not_lose_updates() {
        let repo = repo();
        let thread = ThreadId::from_raw("t1");
        repo.insert(&ctx("t1", "e0", 0.5)).unwrap();

        std::thread::scope(|s| {
            for i in 0..8 {
                let repo = ContextRepo::new(repo.db.clone());
                let thread = thread.clone();
                s.spawn(move || {
                    repo.merge_then_store::<_, StoreError>(&thread, 50, |existing| {
                        let mut next = existing.unwrap().clone();
                        next.topics.push(format!("topic-{i}"));
                        Ok(next)
                    })
                    .unwrap();
                });
            }
        });

        let stored = repo.get_by_thread(&thread).unwrap().unwrap();
        assert_eq!(stored.revision, 9);
        assert_eq!(stored.context.topics.len(), 9);
    }
}

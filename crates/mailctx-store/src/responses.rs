use tracing::instrument;

use mailctx_core::ids::{EmailId, ResponseId};
use mailctx_core::response::Response;

use crate::database::Database;
use crate::error::{is_constraint_violation, StoreError};
use crate::rows::RowReader;

/// Generated and customised responses. Rows are never updated: a
/// customisation is stored as a new response that points at its original.
#[derive(Clone)]
pub struct ResponseRepo {
    db: Database,
}

impl ResponseRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, response), fields(response_id = %response.response_id, email_id = %response.email_id))]
    pub fn insert(&self, response: &Response) -> Result<(), StoreError> {
        let document = serde_json::to_string(response)?;
        self.db.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO responses (response_id, email_id, thread_id, template_id, template_version,
                                        tone, status, document, generated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    response.response_id.as_str(),
                    response.email_id.as_str(),
                    response.thread_id.as_ref().map(|t| t.as_str()),
                    response.template_id.as_ref().map(|t| t.as_str()),
                    response.template_version,
                    response.tone.as_str(),
                    response.status.as_str(),
                    document,
                    response.generated_at.to_rfc3339(),
                ],
            );
            match inserted {
                Ok(_) => Ok(()),
                Err(e) if is_constraint_violation(&e) => Err(StoreError::Conflict(format!(
                    "response {} already exists",
                    response.response_id
                ))),
                Err(e) => Err(e.into()),
            }
        })
    }

    #[instrument(skip(self), fields(response_id = %id))]
    pub fn get(&self, id: &ResponseId) -> Result<Response, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT document FROM responses WHERE response_id = ?1")?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_response(row),
                None => Err(StoreError::NotFound(format!("response {id}"))),
            }
        })
    }

    /// Responses drafted for an email, oldest first.
    #[instrument(skip(self), fields(email_id = %email_id))]
    pub fn list_for_email(&self, email_id: &EmailId) -> Result<Vec<Response>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT document FROM responses WHERE email_id = ?1 ORDER BY generated_at ASC, response_id ASC",
            )?;
            let mut rows = stmt.query([email_id.as_str()])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_response(row)?);
            }
            Ok(out)
        })
    }
}

fn row_to_response(row: &rusqlite::Row<'_>) -> Result<Response, StoreError> {
    RowReader::new(row, "responses").json(0, "document")
}

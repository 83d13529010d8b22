#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{0} not found")]
    NotFound(String),

    /// Another writer got there first. A fresh read resolves it.
    #[error("write conflict: {0}")]
    Conflict(String),

    #[error("encoding document: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("corrupt row in {table}.{column}: {detail}")]
    CorruptRow {
        table: &'static str,
        column: &'static str,
        detail: String,
    },

    #[error("schema v{found} is newer than this build (v{supported})")]
    SchemaTooNew { found: u32, supported: u32 },

    #[error("preparing {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// UNIQUE and PRIMARY KEY violations both report `ConstraintViolation`.
pub(crate) fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    e.sqlite_error_code() == Some(rusqlite::ErrorCode::ConstraintViolation)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_key_is_a_constraint_violation() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (k TEXT PRIMARY KEY); INSERT INTO t VALUES ('a');")
            .unwrap();
        let err = conn.execute("INSERT INTO t VALUES ('a')", []).unwrap_err();
        assert!(is_constraint_violation(&err));

        let missing = conn.execute("INSERT INTO nope VALUES (1)", []).unwrap_err();
        assert!(!is_constraint_violation(&missing));
    }

    #[test]
    fn only_conflicts_are_conflicts() {
        assert!(StoreError::Conflict("rev 3".into()).is_conflict());
        assert!(!StoreError::NotFound("context".into()).is_conflict());
    }
}

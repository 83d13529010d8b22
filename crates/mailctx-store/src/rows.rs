//! Typed column access for repository rows.
//!
//! Every decode failure names the table and column it came from so a corrupt
//! document surfaces as [`StoreError::CorruptRow`] instead of a bare SQLite error.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::FromSql;
use rusqlite::Row;
use serde::de::DeserializeOwned;

use crate::error::StoreError;

/// A row bound to the table it was selected from.
pub struct RowReader<'r, 's> {
    row: &'r Row<'s>,
    table: &'static str,
}

impl<'r, 's> RowReader<'r, 's> {
    pub fn new(row: &'r Row<'s>, table: &'static str) -> Self {
        Self { row, table }
    }

    /// Reads columns that belong to a joined table.
    pub fn joined(&self, table: &'static str) -> RowReader<'r, 's> {
        RowReader { row: self.row, table }
    }

    fn corrupt(&self, column: &'static str, detail: impl Into<String>) -> StoreError {
        StoreError::CorruptRow {
            table: self.table,
            column,
            detail: detail.into(),
        }
    }

    pub fn value<T: FromSql>(&self, idx: usize, column: &'static str) -> Result<T, StoreError> {
        self.row.get(idx).map_err(|e| self.corrupt(column, e.to_string()))
    }

    /// JSON text column.
    pub fn json<T: DeserializeOwned>(&self, idx: usize, column: &'static str) -> Result<T, StoreError> {
        let raw: String = self.value(idx, column)?;
        decode_json(&raw).map_err(|detail| self.corrupt(column, detail))
    }

    /// Text column holding a `FromStr` wire name.
    pub fn parsed<T: FromStr>(&self, idx: usize, column: &'static str) -> Result<T, StoreError> {
        let raw: String = self.value(idx, column)?;
        raw.parse().map_err(|_| self.corrupt(column, format!("unknown variant: {raw}")))
    }

    pub fn timestamp(&self, idx: usize, column: &'static str) -> Result<DateTime<Utc>, StoreError> {
        let raw: String = self.value(idx, column)?;
        decode_timestamp(&raw).map_err(|detail| self.corrupt(column, detail))
    }

    pub fn timestamp_opt(&self, idx: usize, column: &'static str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let raw: Option<String> = self.value(idx, column)?;
        raw.map(|raw| decode_timestamp(&raw).map_err(|detail| self.corrupt(column, detail)))
            .transpose()
    }

    /// Non-negative counter stored as INTEGER.
    pub fn count(&self, idx: usize, column: &'static str) -> Result<u64, StoreError> {
        let raw: i64 = self.value(idx, column)?;
        u64::try_from(raw).map_err(|_| self.corrupt(column, format!("negative count: {raw}")))
    }
}

fn decode_json<T: DeserializeOwned>(raw: &str) -> Result<T, String> {
    serde_json::from_str(raw).map_err(|e| format!("invalid JSON: {e}"))
}

fn decode_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("invalid timestamp {raw}: {e}"))
}

/// Escapes `%`, `_` and `\` for a `LIKE ... ESCAPE '\'` pattern.
pub fn like_pattern(needle: &str) -> String {
    let mut out = String::with_capacity(needle.len() + 2);
    out.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

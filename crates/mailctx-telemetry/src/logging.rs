use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::{span, Level};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        level TEXT NOT NULL,
        target TEXT NOT NULL,
        message TEXT NOT NULL,
        fields TEXT,
        span_id TEXT,
        email_id TEXT,
        thread_id TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_logs_level ON logs(level);
    CREATE INDEX IF NOT EXISTS idx_logs_email ON logs(email_id);
    CREATE INDEX IF NOT EXISTS idx_logs_thread ON logs(thread_id);
    CREATE INDEX IF NOT EXISTS idx_logs_timestamp ON logs(timestamp);";

/// Every filter is optional; an absent one matches all rows.
const SELECT_LOGS: &str = "
    SELECT id, timestamp, level, target, message, fields, span_id, email_id, thread_id
    FROM logs
    WHERE (?1 IS NULL OR level = ?1)
      AND (?2 IS NULL OR instr(target, ?2) > 0)
      AND (?3 IS NULL OR email_id = ?3)
      AND (?4 IS NULL OR thread_id = ?4)
      AND (?5 IS NULL OR timestamp >= ?5)
    ORDER BY id DESC
    LIMIT ?6";

const DEFAULT_LIMIT: u32 = 100;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: i64,
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    pub fields: Option<String>,
    pub span_id: Option<String>,
    pub email_id: Option<String>,
    pub thread_id: Option<String>,
}

impl LogRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            timestamp: row.get("timestamp")?,
            level: row.get("level")?,
            target: row.get("target")?,
            message: row.get("message")?,
            fields: row.get("fields")?,
            span_id: row.get("span_id")?,
            email_id: row.get("email_id")?,
            thread_id: row.get("thread_id")?,
        })
    }
}

/// Filters for [`SqliteLogSink::query`]. `target` is a substring match.
#[derive(Clone, Debug, Default)]
pub struct LogQuery {
    pub level: Option<String>,
    pub target: Option<String>,
    pub email_id: Option<String>,
    pub thread_id: Option<String>,
    pub since: Option<String>,
    pub limit: Option<u32>,
}

/// Email and thread an event concerns.
#[derive(Clone, Debug, Default, PartialEq)]
struct Correlation {
    email_id: Option<String>,
    thread_id: Option<String>,
}

impl Correlation {
    fn is_empty(&self) -> bool {
        self.email_id.is_none() && self.thread_id.is_none()
    }

    fn is_complete(&self) -> bool {
        self.email_id.is_some() && self.thread_id.is_some()
    }

    /// Fill gaps from an enclosing span; ids already set win.
    fn inherit(&mut self, outer: &Correlation) {
        if self.email_id.is_none() {
            self.email_id.clone_from(&outer.email_id);
        }
        if self.thread_id.is_none() {
            self.thread_id.clone_from(&outer.thread_id);
        }
    }
}

/// Persistent store for warnings and errors, one row per event.
pub struct SqliteLogSink {
    conn: Mutex<Connection>,
}

impl SqliteLogSink {
    pub fn new(db_path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = db_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::with_schema(conn)
    }

    pub fn in_memory() -> Result<Self, rusqlite::Error> {
        Self::with_schema(Connection::open_in_memory()?)
    }

    fn with_schema(conn: Connection) -> Result<Self, rusqlite::Error> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Logging must never fail the caller, so write errors are dropped.
    fn append(&self, level: Level, target: &str, event: EventFields, span_id: Option<String>) {
        let fields = (!event.extra.is_empty()).then(|| Value::Object(event.extra).to_string());
        let _ = self.conn.lock().execute(
            "INSERT INTO logs (timestamp, level, target, message, fields, span_id, email_id, thread_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                Utc::now().to_rfc3339(),
                level.as_str(),
                target,
                event.message.unwrap_or_default(),
                fields,
                span_id,
                event.correlation.email_id,
                event.correlation.thread_id,
            ],
        );
    }

    /// Most recent first.
    pub fn query(&self, q: &LogQuery) -> Result<Vec<LogRecord>, rusqlite::Error> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(SELECT_LOGS)?;
        let rows = stmt.query_map(
            params![
                q.level.as_deref().map(str::to_uppercase),
                q.target,
                q.email_id,
                q.thread_id,
                q.since,
                q.limit.unwrap_or(DEFAULT_LIMIT),
            ],
            LogRecord::from_row,
        )?;
        rows.collect()
    }

    pub fn count(&self) -> Result<i64, rusqlite::Error> {
        self.conn
            .lock()
            .query_row("SELECT COUNT(*) FROM logs", [], |row| row.get(0))
    }

    /// The newest record for a thread, if any.
    pub fn latest_for_thread(&self, thread_id: &str) -> Result<Option<LogRecord>, rusqlite::Error> {
        self.conn
            .lock()
            .query_row(
                "SELECT id, timestamp, level, target, message, fields, span_id, email_id, thread_id
                 FROM logs WHERE thread_id = ?1 ORDER BY id DESC LIMIT 1",
                [thread_id],
                LogRecord::from_row,
            )
            .optional()
    }
}

/// Collected fields of one event or span.
#[derive(Default)]
struct EventFields {
    message: Option<String>,
    correlation: Correlation,
    extra: Map<String, Value>,
}

impl EventFields {
    fn text(&mut self, name: &str, value: String) {
        match name {
            "message" => self.message = Some(value),
            "email_id" => self.correlation.email_id = Some(value),
            "thread_id" => self.correlation.thread_id = Some(value),
            _ => {
                self.extra.insert(name.to_owned(), Value::String(value));
            }
        }
    }
}

impl Visit for EventFields {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        // Display-captured ids land here unquoted; Debug-captured ones quoted.
        let rendered = format!("{value:?}");
        self.text(field.name(), rendered.trim_matches('"').to_owned());
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.text(field.name(), value.to_owned());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.extra.insert(field.name().to_owned(), Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.extra.insert(field.name().to_owned(), Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        // NaN and infinities have no JSON form.
        if value.is_finite() {
            self.extra.insert(field.name().to_owned(), Value::from(value));
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.extra.insert(field.name().to_owned(), Value::from(value));
    }
}

/// Layer persisting events at or above `min_level` (WARN by default). Each
/// row carries the email and thread ids found on the event or, failing that,
/// on the nearest enclosing span that has them.
pub struct SqliteLogLayer {
    sink: Arc<SqliteLogSink>,
    min_level: Level,
}

impl SqliteLogLayer {
    pub fn new(sink: Arc<SqliteLogSink>) -> Self {
        Self {
            sink,
            min_level: Level::WARN,
        }
    }

    pub fn with_min_level(mut self, level: Level) -> Self {
        self.min_level = level;
        self
    }
}

impl<S> Layer<S> for SqliteLogLayer
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut fields = EventFields::default();
        attrs.record(&mut fields);
        if fields.correlation.is_empty() {
            return;
        }
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(fields.correlation);
        }
    }

    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        // `Level` orders by verbosity: ERROR < WARN < INFO.
        if *metadata.level() > self.min_level {
            return;
        }

        let mut fields = EventFields::default();
        event.record(&mut fields);

        let mut span_id = None;
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope {
                span_id.get_or_insert_with(|| format!("{:?}", span.id()));
                if fields.correlation.is_complete() {
                    break;
                }
                if let Some(outer) = span.extensions().get::<Correlation>() {
                    fields.correlation.inherit(outer);
                }
            }
        }

        self.sink.append(*metadata.level(), metadata.target(), fields, span_id);
    }
}

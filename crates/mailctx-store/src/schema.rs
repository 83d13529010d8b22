/// SQL DDL for the mailctx database.
/// Contexts and responses are stored as JSON documents next to the columns
/// queries filter on; template versions and their analytics are relational.
pub const SCHEMA_VERSION: u32 = 1;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS contexts (
    context_id TEXT PRIMARY KEY,
    thread_id TEXT NOT NULL UNIQUE,
    email_id TEXT NOT NULL,
    revision INTEGER NOT NULL,
    confidence_score REAL NOT NULL,
    document TEXT NOT NULL,
    analyzed_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS context_revisions (
    context_id TEXT NOT NULL,
    revision INTEGER NOT NULL,
    email_id TEXT NOT NULL,
    document TEXT NOT NULL,
    stored_at TEXT NOT NULL,
    PRIMARY KEY (context_id, revision)
);

CREATE TABLE IF NOT EXISTS templates (
    template_id TEXT NOT NULL,
    version INTEGER NOT NULL,
    name TEXT NOT NULL,
    content TEXT NOT NULL,
    tone TEXT NOT NULL,
    category TEXT NOT NULL,
    placeholders TEXT NOT NULL,
    tags TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    is_current INTEGER NOT NULL DEFAULT 1,
    metadata TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (template_id, version)
);

CREATE TABLE IF NOT EXISTS template_analytics (
    template_id TEXT NOT NULL,
    version INTEGER NOT NULL,
    usage_count INTEGER NOT NULL DEFAULT 0,
    success_rate REAL NOT NULL DEFAULT 0.0,
    last_used TEXT,
    PRIMARY KEY (template_id, version),
    FOREIGN KEY (template_id, version) REFERENCES templates(template_id, version)
);

CREATE TABLE IF NOT EXISTS responses (
    response_id TEXT PRIMARY KEY,
    email_id TEXT NOT NULL,
    thread_id TEXT,
    template_id TEXT,
    template_version INTEGER,
    tone TEXT NOT NULL,
    status TEXT NOT NULL,
    document TEXT NOT NULL,
    generated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_contexts_email ON contexts(email_id);
CREATE INDEX IF NOT EXISTS idx_templates_current ON templates(is_current, category);
CREATE INDEX IF NOT EXISTS idx_templates_tone ON templates(tone);
CREATE INDEX IF NOT EXISTS idx_responses_email ON responses(email_id);
CREATE INDEX IF NOT EXISTS idx_responses_template ON responses(template_id, template_version);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;

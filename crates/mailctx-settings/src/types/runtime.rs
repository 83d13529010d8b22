use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    /// SQLite file holding contexts, templates and responses. `~/` expands
    /// to `$HOME`.
    pub database_path: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_path: "~/.mailctx/mailctx.db".to_string(),
        }
    }
}

impl StorageSettings {
    pub fn resolved_path(&self) -> PathBuf {
        expand_home(&self.database_path)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `trace` | `debug` | `info` | `warn` | `error`. RUST_LOG wins when set.
    pub level: String,
    pub json: bool,
    /// Persist WARN and above to a queryable SQLite log.
    pub persist_warnings: bool,
    pub log_db_path: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
            persist_warnings: true,
            log_db_path: "~/.mailctx/logs.db".to_string(),
        }
    }
}

impl LoggingSettings {
    pub fn resolved_log_db_path(&self) -> PathBuf {
        expand_home(&self.log_db_path)
    }
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(rest)
        }
        None => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_paths_untouched() {
        let s = StorageSettings {
            database_path: "/var/lib/mailctx/db.sqlite".into(),
        };
        assert_eq!(s.resolved_path(), PathBuf::from("/var/lib/mailctx/db.sqlite"));
    }

    #[test]
    fn tilde_expands() {
        let s = StorageSettings::default();
        let resolved = s.resolved_path();
        assert!(resolved.ends_with(".mailctx/mailctx.db"));
        assert!(!resolved.to_string_lossy().starts_with('~'));
    }

    #[test]
    fn logging_defaults() {
        let l = LoggingSettings::default();
        assert_eq!(l.level, "info");
        assert!(l.persist_warnings);
        assert!(l.resolved_log_db_path().ends_with("logs.db"));
    }
}

//! Tracing setup for mailctx: one formatted stderr stream plus an optional
//! SQLite store of warnings that the `logs` command can query later.

mod logging;

pub use logging::{LogQuery, LogRecord, SqliteLogLayer, SqliteLogSink};

use std::path::PathBuf;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line, with the span list attached.
    Json,
    Text,
}

#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Base level. `RUST_LOG`, when set, replaces the whole filter.
    pub level: Level,
    /// Per-target levels layered on top of `level`, e.g. `("mailctx_engine", DEBUG)`.
    pub overrides: Vec<(String, Level)>,
    pub format: LogFormat,
    /// SQLite file for persisted records. `None` disables persistence.
    pub persist_to: Option<PathBuf>,
    pub persist_level: Level,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            overrides: Vec::new(),
            format: LogFormat::Json,
            persist_to: None,
            persist_level: Level::WARN,
        }
    }
}

impl TelemetryConfig {
    fn directives(&self) -> String {
        std::iter::once(self.level.as_str().to_ascii_lowercase())
            .chain(
                self.overrides
                    .iter()
                    .map(|(target, level)| format!("{target}={}", level.as_str().to_ascii_lowercase())),
            )
            .collect::<Vec<_>>()
            .join(",")
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.directives()))
    }

    fn stderr_layer(&self) -> Box<dyn Layer<Registry> + Send + Sync> {
        let base = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
        match self.format {
            LogFormat::Json => base
                .json()
                .with_target(true)
                .with_span_list(true)
                .with_filter(self.filter())
                .boxed(),
            LogFormat::Text => base.with_target(false).with_filter(self.filter()).boxed(),
        }
    }
}

/// Holds the persisted-log sink, if one was opened.
pub struct TelemetryGuard {
    sink: Option<Arc<SqliteLogSink>>,
}

impl TelemetryGuard {
    pub fn logs(&self) -> Option<&SqliteLogSink> {
        self.sink.as_deref()
    }
}

/// Installs the global subscriber. Only the first call in a process takes
/// effect; later calls still return a guard over their own sink.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let sink = config.persist_to.as_deref().and_then(|path| match SqliteLogSink::new(path) {
        Ok(sink) => Some(Arc::new(sink)),
        Err(e) => {
            eprintln!("mailctx-telemetry: log store {} unavailable: {e}", path.display());
            None
        }
    });
    let persisted = sink
        .clone()
        .map(|sink| SqliteLogLayer::new(sink).with_min_level(config.persist_level));

    let installed = tracing_subscriber::registry()
        .with(config.stderr_layer())
        .with(persisted)
        .try_init();
    if let Err(e) = installed {
        eprintln!("mailctx-telemetry: keeping existing subscriber: {e}");
    }

    TelemetryGuard { sink }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_append_target_overrides() {
        let config = TelemetryConfig {
            level: Level::WARN,
            overrides: vec![
                ("mailctx_engine".into(), Level::DEBUG),
                ("mailctx_store".into(), Level::TRACE),
            ],
            ..Default::default()
        };
        assert_eq!(config.directives(), "warn,mailctx_engine=debug,mailctx_store=trace");
    }

    #[test]
    fn persistence_is_opt_in() {
        let config = TelemetryConfig::default();
        assert!(config.persist_to.is_none());
        assert_eq!(config.persist_level, Level::WARN);
        assert_eq!(config.format, LogFormat::Json);
    }

    #[test]
    fn guard_exposes_the_opened_sink() {
        let path = std::env::temp_dir()
            .join(format!("mailctx-telemetry-{}", std::process::id()))
            .join("logs.db");
        let guard = init_telemetry(TelemetryConfig {
            format: LogFormat::Text,
            persist_to: Some(path.clone()),
            ..Default::default()
        });
        assert!(guard.logs().unwrap().count().is_ok());
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}

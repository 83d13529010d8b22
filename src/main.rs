//! mailctx CLI
//!
//! Email context analysis and reply generation over a local SQLite store.
//!
//! # Commands
//!
//! - `analyze`: analyze one email and fold it into its thread context
//! - `batch`: analyze JSON-lines input concurrently; Ctrl-C cancels the rest
//! - `context`: show a thread's stored context or its revision history
//! - `merge`: merge two context documents
//! - `template`: create, revise, search and track response templates
//! - `respond`: generate or customize replies
//! - `logs`: query persisted warnings and errors
//!
//! Results go to stdout as JSON; logs go to stderr.

mod app;

use std::collections::BTreeSet;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context as _, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

use mailctx_core::context::Context;
use mailctx_core::ids::{EmailId, ResponseId, TemplateId, ThreadId};
use mailctx_core::response::{ContextData, Customization, Preferences};
use mailctx_core::template::{NewTemplate, TemplateQuery, TemplateRevision, UsageData};
use mailctx_core::wire::{ResponseTone, TemplateCategory};
use mailctx_engine::BatchItem;
use mailctx_settings::{get_settings, init_settings, load_settings_from_path};
use mailctx_telemetry::{init_telemetry, LogFormat, LogQuery, TelemetryConfig};

use crate::app::App;

#[derive(Parser)]
#[command(name = "mailctx", version, about = "Email context engine and reply generator")]
#[command(propagate_version = true)]
struct Cli {
    /// Settings file (defaults to ~/.mailctx/settings.json)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Analyze one email and store the merged thread context
    Analyze {
        #[arg(long)]
        email_id: String,
        #[arg(long)]
        thread_id: String,
        /// Email body file; reads stdin when omitted
        #[arg(long)]
        file: Option<PathBuf>,
        /// Print the analysis without touching the store
        #[arg(long)]
        dry_run: bool,
    },
    /// Analyze emails from a JSON-lines file of {emailId, content, threadId}
    Batch {
        input: PathBuf,
    },
    /// Stored thread contexts
    Context {
        #[command(subcommand)]
        action: ContextCommand,
    },
    /// Merge two context documents from the same thread
    Merge {
        existing: PathBuf,
        incoming: PathBuf,
    },
    /// Response templates
    Template {
        #[command(subcommand)]
        action: TemplateCommand,
    },
    /// Reply generation
    Respond {
        #[command(subcommand)]
        action: RespondCommand,
    },
    /// Query persisted warn+ logs
    Logs {
        #[arg(long)]
        level: Option<String>,
        #[arg(long)]
        email_id: Option<String>,
        #[arg(long)]
        thread_id: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
}

#[derive(Subcommand)]
enum ContextCommand {
    Show { thread_id: String },
    History { thread_id: String },
}

#[derive(Subcommand)]
enum TemplateCommand {
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        tone: ResponseTone,
        #[arg(long, default_value = "GENERAL")]
        category: TemplateCategory,
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Template body file with `{placeholder}` markers
        #[arg(long)]
        file: PathBuf,
    },
    /// Write a new version with changed content and/or tone
    Version {
        template_id: String,
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long)]
        tone: Option<ResponseTone>,
    },
    Show { template_id: String },
    History { template_id: String },
    Find {
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long)]
        category: Option<TemplateCategory>,
        #[arg(long)]
        name: Option<String>,
    },
    /// Record one use of the current version
    Track {
        template_id: String,
        #[arg(long, conflicts_with = "failure")]
        success: bool,
        #[arg(long)]
        failure: bool,
    },
}

#[derive(Subcommand)]
enum RespondCommand {
    Generate {
        #[arg(long)]
        email_id: String,
        #[arg(long, default_value = "PROFESSIONAL")]
        tone: ResponseTone,
        /// JSON object of context values
        #[arg(long)]
        context: PathBuf,
        #[arg(long)]
        category: Option<TemplateCategory>,
        #[arg(long)]
        signature: Option<String>,
    },
    Customize {
        response_id: String,
        /// `FROM=TO`, applied in order
        #[arg(long = "replace")]
        replacements: Vec<String>,
        #[arg(long)]
        append: Option<String>,
        #[arg(long)]
        tone: Option<ResponseTone>,
        #[arg(long)]
        preserve_context: bool,
    },
    Show { response_id: String },
    List { email_id: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.settings.as_deref().map(load_settings_from_path) {
        Some(Ok(settings)) => {
            let _ = init_settings(settings);
        }
        Some(Err(e)) => {
            eprintln!("mailctx: {e}");
            return ExitCode::from(2);
        }
        None => {}
    }
    let settings = get_settings();

    let logging = &settings.logging;
    let telemetry = init_telemetry(TelemetryConfig {
        level: logging.level.parse().unwrap_or(Level::INFO),
        format: if logging.json { LogFormat::Json } else { LogFormat::Text },
        persist_to: logging.persist_warnings.then(|| logging.resolved_log_db_path()),
        ..Default::default()
    });

    let result = match cli.command {
        Command::Logs {
            level,
            email_id,
            thread_id,
            limit,
        } => match telemetry.logs() {
            Some(sink) => sink
                .query(&LogQuery {
                    level,
                    email_id,
                    thread_id,
                    limit: Some(limit),
                    ..Default::default()
                })
                .map_err(anyhow::Error::from)
                .and_then(|records| print(&records)),
            None => Err(anyhow::anyhow!("log persistence is disabled")),
        },
        command => match App::open(settings) {
            Ok(app) => run(&app, command).await,
            Err(e) => Err(e),
        },
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("mailctx: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(app: &App, command: Command) -> Result<()> {
    match command {
        Command::Analyze {
            email_id,
            thread_id,
            file,
            dry_run,
        } => {
            let content = read_body(file.as_deref())?;
            let analyzer = app.analyzer()?;
            let (email_id, thread_id) = (EmailId::from_raw(email_id), ThreadId::from_raw(thread_id));
            if dry_run {
                print(&analyzer.analyze(&email_id, &content, &thread_id).await?)
            } else {
                let stored = analyzer.analyze_and_store(&email_id, &content, &thread_id).await?;
                print(&json!({ "revision": stored.revision, "context": stored.context }))
            }
        }
        Command::Batch { input } => {
            let items = read_batch(&input)?;
            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, cancelling pending items");
                    on_signal.cancel();
                }
            });
            let outcome = app.analyzer()?.analyze_batch(items, &cancel).await;
            info!(
                total = outcome.total(),
                failed = outcome.failed.len(),
                cancelled = outcome.cancelled(),
                "batch finished"
            );
            let failed: Vec<Value> = outcome
                .failed
                .iter()
                .map(|(id, e)| json!({ "emailId": id, "kind": e.error_kind(), "error": e.to_string() }))
                .collect();
            print(&json!({ "succeeded": outcome.succeeded, "failed": failed }))
        }
        Command::Context { action } => {
            let repo = app.contexts();
            match action {
                ContextCommand::Show { thread_id } => {
                    let stored = repo
                        .get_by_thread(&ThreadId::from_raw(&thread_id))?
                        .with_context(|| format!("no context for thread {thread_id}"))?;
                    print(&json!({ "revision": stored.revision, "context": stored.context }))
                }
                ContextCommand::History { thread_id } => {
                    let stored = repo
                        .get_by_thread(&ThreadId::from_raw(&thread_id))?
                        .with_context(|| format!("no context for thread {thread_id}"))?;
                    let history: Vec<Value> = repo
                        .history(&stored.context.context_id)?
                        .into_iter()
                        .map(|s| json!({ "revision": s.revision, "context": s.context }))
                        .collect();
                    print(&history)
                }
            }
        }
        Command::Merge { existing, incoming } => {
            let existing: Context = read_json(&existing)?;
            let incoming: Context = read_json(&incoming)?;
            print(&mailctx_engine::merger::merge(&existing, &incoming)?)
        }
        Command::Template { action } => template(app, action).await,
        Command::Respond { action } => respond(app, action).await,
        Command::Logs { .. } => bail!("logs is handled before the store is opened"),
    }
}

async fn template(app: &App, action: TemplateCommand) -> Result<()> {
    let store = app.templates();
    match action {
        TemplateCommand::Create {
            name,
            tone,
            category,
            tags,
            file,
        } => {
            let created = store
                .create(NewTemplate {
                    name,
                    content: read_body(Some(&file))?,
                    tone,
                    category,
                    tags: tags.into_iter().collect(),
                    ..Default::default()
                })
                .await?;
            print(&created)
        }
        TemplateCommand::Version { template_id, file, tone } => {
            let content = file.as_deref().map(|f| read_body(Some(f))).transpose()?;
            let next = store
                .version(&TemplateId::from_raw(template_id), TemplateRevision { content, tone })
                .await?;
            print(&next)
        }
        TemplateCommand::Show { template_id } => print(&store.get(&TemplateId::from_raw(template_id))?),
        TemplateCommand::History { template_id } => {
            print(&store.get_versions(&TemplateId::from_raw(template_id))?)
        }
        TemplateCommand::Find { tags, category, name } => print(&store.find(&TemplateQuery {
            tags: tags.into_iter().collect::<BTreeSet<_>>(),
            category,
            name_pattern: name,
        })?),
        TemplateCommand::Track {
            template_id,
            success,
            failure,
        } => {
            let outcome = match (success, failure) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            print(&store.track_usage(&TemplateId::from_raw(template_id), UsageData { success: outcome })?)
        }
    }
}

async fn respond(app: &App, action: RespondCommand) -> Result<()> {
    match action {
        RespondCommand::Generate {
            email_id,
            tone,
            context,
            category,
            signature,
        } => {
            let context_data: ContextData = read_json(&context)?;
            let preferences = Preferences {
                template_category: category,
                signature,
            };
            let response = app
                .generator()?
                .generate_response(&EmailId::from_raw(email_id), &context_data, tone, &preferences)
                .await?;
            print(&response)
        }
        RespondCommand::Customize {
            response_id,
            replacements,
            append,
            tone,
            preserve_context,
        } => {
            let replacements = replacements
                .iter()
                .map(|pair| {
                    pair.split_once('=')
                        .map(|(from, to)| (from.to_string(), to.to_string()))
                        .with_context(|| format!("--replace expects FROM=TO, got {pair:?}"))
                })
                .collect::<Result<Vec<_>>>()?;
            let customization = Customization {
                replacements,
                append,
                tone,
            };
            let custom = app
                .generator()?
                .customize_response(&ResponseId::from_raw(response_id), customization, preserve_context)
                .await?;
            print(&custom)
        }
        RespondCommand::Show { response_id } => print(&app.responses().get(&ResponseId::from_raw(response_id))?),
        RespondCommand::List { email_id } => {
            print(&app.responses().list_for_email(&EmailId::from_raw(email_id))?)
        }
    }
}

fn read_body(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display())),
        None => {
            let mut body = String::new();
            std::io::stdin().read_to_string(&mut body).context("reading stdin")?;
            Ok(body)
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn read_batch(path: &Path) -> Result<Vec<BatchItem>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| serde_json::from_str(line).with_context(|| format!("{}:{}", path.display(), n + 1)))
        .collect()
}

fn print<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

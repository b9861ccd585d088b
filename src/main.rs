//! Aperture command-line interface
//!
//! Imports processed images as subjects, runs rate-limited evaluations and
//! inspects history, sessions and usage.

use anyhow::{bail, Context};
#[cfg(feature = "keyring-fallback")]
use aperture_core::config::ProviderKind;
use aperture_core::{
    credentials::ChainedCredentialStore,
    ApertureConfig, EvaluationEngine, EvaluationResult, EvaluationStore, SqliteStore, Subject,
    SubjectId,
};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tracing::{debug, warn, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "aperture")]
#[command(about = "Rate-limited photo evaluation with durable history", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Set log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Config file (defaults to the user config directory)
    #[arg(long, env = "APERTURE_CONFIG")]
    config: Option<PathBuf>,

    /// Database path (overrides the config file)
    #[arg(long, env = "APERTURE_DB_PATH")]
    db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Register processed images as subjects
    Import {
        /// Artifact paths, relative to the artifact root or absolute
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// List subjects with their current result
    List {
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Evaluate subjects
    Run {
        /// Subject ids to evaluate (default: every subject without a successful result)
        ids: Vec<String>,

        /// Re-evaluate every subject
        #[arg(long, conflicts_with = "ids")]
        all: bool,
    },

    /// Show the evaluation history of a subject
    History {
        id: String,

        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show recent evaluation sessions
    Sessions {
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
    },

    /// Show cumulative token and cost usage
    Stats,

    /// Manage provider API keys in the OS keychain
    #[cfg(feature = "keyring-fallback")]
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },
}

#[cfg(feature = "keyring-fallback")]
#[derive(Subcommand)]
enum KeyAction {
    /// Store an API key
    Set { provider: String, key: String },
    /// Remove an API key
    Delete { provider: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn parse_subject_id(id: &str) -> anyhow::Result<SubjectId> {
    SubjectId::from_string(id).with_context(|| format!("invalid subject id: {}", id))
}

fn print_result(result: &EvaluationResult) {
    let marker = if result.is_current { "*" } else { " " };
    match &result.scores {
        Some(scores) => println!(
            "{} {}  {}  overall {:.2}  (tech {:.1}, comp {:.1}, market {:.1}, art {:.1})  {}  {}/{}",
            marker,
            result.evaluated_at.format("%Y-%m-%d %H:%M"),
            result.id,
            scores.overall,
            scores.technical_quality,
            scores.composition,
            scores.commercial_potential,
            scores.artistic_merit,
            result.placement.map(|p| p.as_str()).unwrap_or("-"),
            result.provider,
            result.model,
        ),
        None => println!(
            "{} {}  {}  FAILED [{}] {} (retries: {})",
            marker,
            result.evaluated_at.format("%Y-%m-%d %H:%M"),
            result.id,
            result.error_code.as_deref().unwrap_or("unknown"),
            result.error_message.as_deref().unwrap_or(""),
            result.retry_count,
        ),
    }
}

async fn select_subjects(
    store: &SqliteStore,
    ids: &[String],
    all: bool,
) -> anyhow::Result<Vec<Subject>> {
    if !ids.is_empty() {
        let mut subjects = Vec::with_capacity(ids.len());
        for id in ids {
            subjects.push(store.get_subject(parse_subject_id(id)?).await?);
        }
        return Ok(subjects);
    }

    let mut subjects = Vec::new();
    for subject in store.list_subjects().await? {
        let done = match store.current_result(subject.id).await? {
            Some(result) => result.is_success(),
            None => false,
        };
        if all || !done {
            subjects.push(subject);
        }
    }
    Ok(subjects)
}

async fn run_engine(engine: &EvaluationEngine) -> anyhow::Result<()> {
    if engine.queued() == 0 {
        engine.start().await?;
        println!("{}", engine.status().message);
        return Ok(());
    }
    engine.start().await?;

    let mut updates = engine.subscribe();
    let mut last_message = String::new();
    let mut cancel_requested = false;

    loop {
        tokio::select! {
            update = updates.next() => {
                let Some(status) = update else { break };
                if status.message != last_message {
                    eprintln!("{}", status.message);
                    last_message = status.message.clone();
                }
                if status.state.is_terminal() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c(), if !cancel_requested => {
                cancel_requested = true;
                if let Err(e) = engine.cancel() {
                    warn!("Could not cancel: {}", e);
                }
            }
        }
    }

    let report = engine.wait().await?;
    println!(
        "Processed {}: {} succeeded, {} failed{}",
        report.processed,
        report.succeeded,
        report.failed,
        if report.cancelled { " (cancelled)" } else { "" }
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // RUST_LOG wins when set; otherwise keep HTTP internals quiet
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "aperture={0},aperture_core={0},hyper=warn,reqwest=warn",
            level.as_str().to_lowercase()
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    debug!("Aperture v{} starting", env!("CARGO_PKG_VERSION"));

    let config_path = cli.config.clone().unwrap_or_else(ApertureConfig::default_path);

    if let Commands::Init { force } = &cli.command {
        if config_path.exists() && !force {
            bail!(
                "{} already exists (use --force to overwrite)",
                config_path.display()
            );
        }
        ApertureConfig::default().save(&config_path)?;
        println!("Wrote {}", config_path.display());
        return Ok(());
    }

    #[cfg(feature = "keyring-fallback")]
    if let Commands::Key { action } = &cli.command {
        let keyring = aperture_core::credentials::KeyringCredentialStore;
        match action {
            KeyAction::Set { provider, key } => {
                let kind: ProviderKind = provider.parse()?;
                keyring.set_credential(kind.id(), key)?;
                println!("Stored API key for {}", kind.id());
            }
            KeyAction::Delete { provider } => {
                let kind: ProviderKind = provider.parse()?;
                keyring.delete_credential(kind.id())?;
                println!("Removed API key for {}", kind.id());
            }
        }
        return Ok(());
    }

    let mut config = ApertureConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    if let Some(db_path) = &cli.db_path {
        config.storage.database_path = db_path.clone();
    }

    let store = Arc::new(SqliteStore::open(&config.storage.database_path).await?);

    match cli.command {
        Commands::Import { paths } => {
            for path in paths {
                let filename = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| path.display().to_string());
                let subject = Subject::new(path, filename);
                store.insert_subject(&subject).await?;
                println!("{}  {}", subject.id, subject.original_filename);
            }
        }

        Commands::List { format } => {
            let subjects = store.list_subjects().await?;
            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&subjects)?);
                }
                OutputFormat::Text => {
                    for subject in subjects {
                        let summary = match store.current_result(subject.id).await? {
                            Some(r) => match r.scores {
                                Some(s) => format!("{:.2}", s.overall),
                                None => format!("failed ({})", r.error_code.unwrap_or_default()),
                            },
                            None => "not evaluated".to_string(),
                        };
                        println!(
                            "{}  {}{}  {}",
                            subject.id,
                            subject.original_filename,
                            if subject.is_favorite { " ★" } else { "" },
                            summary
                        );
                    }
                }
            }
        }

        Commands::Run { ids, all } => {
            let subjects = select_subjects(&store, &ids, all).await?;
            let credentials = Arc::new(ChainedCredentialStore::system_default());
            let engine = EvaluationEngine::from_config(&config, store.clone(), credentials)?;
            engine.enqueue(subjects)?;
            run_engine(&engine).await?;
        }

        Commands::History { id, format } => {
            let history = store.history(parse_subject_id(&id)?).await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&history)?),
                OutputFormat::Text => {
                    if history.is_empty() {
                        println!("No evaluations yet");
                    }
                    for result in &history {
                        print_result(result);
                    }
                }
            }
        }

        Commands::Sessions { limit } => {
            for session in store.list_sessions(limit).await? {
                println!(
                    "{}  {}  {}/{} processed  {} ok  {} failed  ${:.4}  avg {:.0} ms  [{}]{}",
                    session.id,
                    session.started_at.format("%Y-%m-%d %H:%M"),
                    session.processed(),
                    session.total_subjects,
                    session.success_count,
                    session.failure_count,
                    session.total_cost_usd,
                    session.average_processing_time_ms,
                    session.providers.iter().cloned().collect::<Vec<_>>().join(", "),
                    if session.is_closed() { "" } else { "  (open)" }
                );
            }
        }

        Commands::Stats => {
            let stats = store.usage_stats().await?;
            println!("Images evaluated: {}", stats.images_evaluated);
            println!("Input tokens:     {}", stats.total_input_tokens);
            println!("Output tokens:    {}", stats.total_output_tokens);
            println!("Total cost:       ${:.4}", stats.total_cost_usd);
            if let Some(at) = stats.last_updated {
                println!("Last updated:     {}", at.format("%Y-%m-%d %H:%M"));
            }
        }

        Commands::Init { .. } => {}
        #[cfg(feature = "keyring-fallback")]
        Commands::Key { .. } => {}
    }

    Ok(())
}

//! # Workspace Recall CLI (`recall`)
//!
//! Indexes a workspace directory and queries it from the command line.
//!
//! ## Usage
//!
//! ```bash
//! recall --config ./config/recall.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `recall init` | Create the SQLite database and run schema migrations |
//! | `recall index` | Bring the index up to date with the workspace |
//! | `recall search "<query>"` | Ranked snippets for a query |
//! | `recall context "<query>"` | Prompt-ready context block for a query |
//! | `recall stats` | Index size, coverage and file list |
//! | `recall embed pending` | Backfill vectors for chunks stored without one |
//!
//! Logs go to stderr and are controlled by `RUST_LOG` (default `warn`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use workspace_recall::{config, search, stats, MemoryEngine};

/// Workspace Recall CLI: a local hybrid memory engine for AI assistants.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/recall.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "recall",
    about = "Workspace Recall — local hybrid search over a workspace for AI assistants",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/recall.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Index new and changed files and drop deleted ones.
    Index {
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Search the index.
    Search {
        /// The search query.
        query: String,

        /// Maximum number of results (defaults to `retrieval.top_k`).
        #[arg(long)]
        top_k: Option<usize>,

        /// Minimum blended score (defaults to `retrieval.min_score`).
        #[arg(long)]
        min_score: Option<f64>,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print the context block a host would inject into a prompt.
    Context {
        query: String,

        /// Maximum number of snippets (defaults to `retrieval.context_snippets`).
        #[arg(long)]
        max_snippets: Option<usize>,
    },

    /// Show index statistics.
    Stats {
        /// Print stats as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Embedding management.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },
}

#[derive(Subcommand)]
enum EmbedAction {
    /// Embed chunks that were stored without a vector.
    Pending,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let engine = MemoryEngine::open(cfg).await?;

    match cli.command {
        Commands::Init => {
            println!("Database initialized successfully.");
        }
        Commands::Index { json } => {
            let report = engine.index_with_report().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else if report.skipped_busy {
                println!("index: another pass is running; nothing done");
            } else {
                println!("index");
                println!("  files scanned: {}", report.files_scanned);
                println!("  files changed: {}", report.files_changed);
                println!("  files deleted: {}", report.files_deleted);
                println!("  chunks written: {}", report.chunks_written);
                println!("  missing embeddings: {}", report.embeddings_missing);
                println!("  total chunks: {}", report.chunk_count);
            }
        }
        Commands::Search {
            query,
            top_k,
            min_score,
            json,
        } => {
            let r = &engine.config().retrieval;
            let hits = engine
                .search(
                    &query,
                    top_k.unwrap_or(r.top_k),
                    min_score.unwrap_or(r.min_score),
                )
                .await?;
            search::print_hits(&hits, json)?;
        }
        Commands::Context {
            query,
            max_snippets,
        } => {
            let limit = max_snippets.unwrap_or(engine.config().retrieval.context_snippets);
            let block = engine.get_context_for_prompt(&query, limit).await;
            if block.is_empty() {
                eprintln!("No relevant context.");
            } else {
                println!("{}", block);
            }
        }
        Commands::Stats { json } => {
            let s = engine.stats().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&s)?);
            } else {
                stats::print_stats(&s, &engine.config().db.path, engine.embedder().model_name());
            }
        }
        Commands::Embed { action } => match action {
            EmbedAction::Pending => {
                if !engine.embedder().is_enabled() {
                    anyhow::bail!(
                        "Embedding provider is disabled. Set [embedding] provider in config."
                    );
                }
                match engine.embed_pending().await? {
                    Some((embedded, missing)) => {
                        println!("embed pending");
                        println!("  embedded: {}", embedded);
                        println!("  still missing: {}", missing);
                    }
                    None => println!("embed pending: an index pass is running; try again"),
                }
            }
        },
    }

    engine.close().await;
    Ok(())
}

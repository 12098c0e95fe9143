//! # Journal Harness CLI (`journal`)
//!
//! The `journal` binary saves and processes journal entries, searches them,
//! answers questions over them, and serves the HTTP API.
//!
//! ## Usage
//!
//! ```bash
//! journal --config ./config/journal.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `journal init` | Create the SQLite database and schema |
//! | `journal save` | Save an entry and run the pipeline on it |
//! | `journal process <date>` | Re-run the pipeline on a stored entry |
//! | `journal import <dir>` | Import a folder of dated Markdown files |
//! | `journal list` | List entries with their processing status |
//! | `journal get <date>` | Show an entry, its analysis, and its chunks |
//! | `journal search "<query>"` | Similarity search over chunks |
//! | `journal ask "<question>"` | One-shot question over the journal |
//! | `journal chat` | Interactive conversation over the journal |
//! | `journal reindex` | Rebuild the index from the chunk corpus |
//! | `journal serve` | Start the HTTP server |
//!
//! Logs go to stderr and follow `RUST_LOG` (default `info`).

use std::path::PathBuf;

use anyhow::{bail, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use journal_harness::app::Services;
use journal_harness::ingest::IngestOutcome;
use journal_harness::{config, get, import, migrate, search, server};
use journal_harness_core::models::{parse_date, DATE_FORMAT};

/// Journal Harness: journal entry analysis, semantic chunking, and retrieval.
#[derive(Parser)]
#[command(
    name = "journal",
    about = "Journal Harness: analyse, chunk, index, and query a personal journal",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/journal.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Save an entry, then analyse, chunk, and index it.
    Save {
        /// Entry date (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        date: Option<String>,

        /// Read the entry text from a file.
        #[arg(long, conflicts_with = "text")]
        file: Option<PathBuf>,

        /// Entry text.
        #[arg(long)]
        text: Option<String>,

        /// Only store the raw entry; leave it pending.
        #[arg(long)]
        no_process: bool,
    },

    /// Re-run the pipeline on the stored text for a date.
    Process {
        /// Entry date (YYYY-MM-DD).
        date: String,
    },

    /// Import DD-MM-YYYY.md / YYYY-MM-DD.md files from a directory.
    Import {
        dir: PathBuf,

        /// Reprocess dates that are already done.
        #[arg(long)]
        force: bool,
    },

    /// List entries, most recent first.
    List,

    /// Show one entry with its enrichment.
    Get {
        /// Entry date (YYYY-MM-DD).
        date: String,

        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Similarity search over chunks.
    Search {
        query: String,

        /// Number of results. Defaults to `retrieval.top_k`.
        #[arg(short, long)]
        k: Option<usize>,
    },

    /// Ask one question over the journal.
    Ask { question: String },

    /// Interactive conversation over the journal.
    Chat,

    /// Rebuild the index from the stored chunk corpus.
    Reindex,

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

fn entry_date(arg: Option<&str>) -> Result<NaiveDate> {
    match arg {
        Some(d) => parse_date(d),
        None => Ok(chrono::Local::now().date_naive()),
    }
}

fn print_outcome(outcome: &IngestOutcome) {
    match outcome {
        IngestOutcome::Completed(r) => {
            println!("processed {}", r.date.format(DATE_FORMAT));
            println!("  entry: {}", r.entry_id);
            println!("  chunks: {}{}", r.chunks, if r.fallback { " (fallback)" } else { "" });
            println!("  chunking attempts: {}", r.chunking_attempts);
            if !r.defaulted_fields.is_empty() {
                println!("  defaulted fields: {}", r.defaulted_fields.join(", "));
            }
            println!("  corpus size: {}", r.corpus_size);
            println!("  index generation: {}", r.generation);
            println!("ok");
        }
        IngestOutcome::Superseded => {
            println!("entry changed while processing; result discarded");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    if let Commands::Init = cli.command {
        migrate::run_migrations(&cfg).await?;
        println!("Database initialized successfully.");
        return Ok(());
    }

    let services = Services::open(&cfg).await?;

    match cli.command {
        Commands::Init => {}
        Commands::Save {
            date,
            file,
            text,
            no_process,
        } => {
            let date = entry_date(date.as_deref())?;
            let text = match (file, text) {
                (Some(path), _) => std::fs::read_to_string(&path)?,
                (None, Some(t)) => t,
                (None, None) => bail!("provide the entry with --text or --file"),
            };
            if no_process {
                let entry = services.orchestrator.save(date, &text).await?;
                println!(
                    "saved {} ({} words, {})",
                    entry.date.format(DATE_FORMAT),
                    entry.word_count,
                    entry.status
                );
            } else {
                let outcome = services.orchestrator.save_and_process(date, &text).await?;
                print_outcome(&outcome);
            }
        }
        Commands::Process { date } => {
            let outcome = services.orchestrator.process_stored(parse_date(&date)?).await?;
            print_outcome(&outcome);
        }
        Commands::Import { dir, force } => {
            let report = import::import_dir(&services.orchestrator, &dir, force).await?;
            println!("import {}", dir.display());
            println!("  files found: {}", report.found);
            println!("  processed: {}", report.processed);
            println!("  skipped: {}", report.skipped);
            println!("  failed: {}", report.failed);
            println!("  chunks written: {}", report.chunks);
            println!("ok");
        }
        Commands::List => {
            get::run_list(services.store.as_ref()).await?;
        }
        Commands::Get { date, json } => {
            get::run_get(services.store.as_ref(), parse_date(&date)?, json).await?;
        }
        Commands::Search { query, k } => {
            let k = k.unwrap_or(cfg.retrieval.top_k);
            search::run_search(&services.query, &query, k).await?;
        }
        Commands::Ask { question } => {
            search::run_ask(&services.assistant, &question).await?;
        }
        Commands::Chat => {
            search::run_chat(services.assistant.clone()).await?;
        }
        Commands::Reindex => {
            let generation = services.orchestrator.reindex().await?;
            println!("index rebuilt (generation {})", generation);
        }
        Commands::Serve => {
            server::run_server(services).await?;
        }
    }

    Ok(())
}

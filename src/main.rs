use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use indexsync::config::Settings;
use indexsync::enrich::{EmbeddingProvider as _, provider_from_config};
use indexsync::index::SearchIndex;
use indexsync::state::FsStateStore;
use indexsync::sync::{Orchestrator, collect_status};

#[derive(Parser)]
#[command(name = "indexsync")]
#[command(about = "Keeps a search index in sync with a relational source and an import queue")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration file
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Run the sync service until interrupted
    Run,

    /// Print checkpoints, queue depths, and index counts as JSON
    Status,

    /// Queue a file for bulk import
    Import {
        /// File to copy into the incoming queue
        file: PathBuf,
    },

    /// Reset a failed import file back to pending
    Retry {
        /// File name in the error directory
        file: String,
    },

    /// Remove index documents whose source rows were deleted
    Reconcile,

    /// Re-embed documents that were indexed without vectors
    Enrich {
        /// Maximum documents to process
        #[arg(short, long, default_value_t = 500)]
        limit: usize,
    },

    /// Search the index
    Search {
        /// Query text
        query: String,

        /// Restrict to one table
        #[arg(short, long)]
        table: Option<String>,

        /// Maximum results
        #[arg(short, long, default_value_t = 10)]
        limit: usize,

        /// Vector similarity search instead of keyword search
        #[arg(long)]
        vector: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Init { force } = &cli.command {
        Settings::init_config_file(*force).map_err(|e| anyhow::anyhow!("{e}"))?;
        return Ok(());
    }

    let settings = Settings::load().context("failed to load configuration")?;
    indexsync::logging::init_with_config(&settings.logging);

    match cli.command {
        Commands::Init { .. } => unreachable!("handled above"),

        Commands::Run => {
            let orchestrator = Orchestrator::build(settings).await?;

            let cancel = CancellationToken::new();
            let signal_cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("shutting down, draining in-flight batches...");
                    signal_cancel.cancel();
                }
            });

            orchestrator.run(cancel).await?;
        }

        Commands::Status => {
            let store = FsStateStore::open(
                &settings.state_path,
                &settings.import.queue_dir,
                settings.import.max_attempts,
            )?;
            let index = SearchIndex::open(&settings.index_path)?;
            let report = collect_status(&settings, &store, &index)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Import { file } => {
            let store = FsStateStore::open(
                &settings.state_path,
                &settings.import.queue_dir,
                settings.import.max_attempts,
            )?;
            let job = store.enqueue(&file)?;
            println!("queued {} ({})", job.file_name, job.state);
        }

        Commands::Retry { file } => {
            let store = FsStateStore::open(
                &settings.state_path,
                &settings.import.queue_dir,
                settings.import.max_attempts,
            )?;
            let job = store.reset_error(&file)?;
            println!("reset {} to {}", job.file_name, job.state);
        }

        Commands::Reconcile => {
            let orchestrator = Orchestrator::build(settings).await?;
            let reports = orchestrator.reconcile().await?;
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }

        Commands::Enrich { limit } => {
            let orchestrator = Orchestrator::build(settings).await?;
            let outcome = orchestrator.re_enrich(limit).await?;
            println!(
                "enriched {} documents, {} still degraded",
                outcome.enriched, outcome.degraded
            );
        }

        Commands::Search {
            query,
            table,
            limit,
            vector,
        } => {
            let index = SearchIndex::open(&settings.index_path)?;

            let hits = if vector {
                let provider = provider_from_config(&settings.embedding)?;
                let query_vectors = provider.embed(&[query]).await?;
                let query_vector = query_vectors
                    .first()
                    .context("provider returned no embedding for the query")?;
                index.search_vector(query_vector, limit)?
            } else {
                index.search(&query, limit, table.as_deref())?
            };

            if hits.is_empty() {
                println!("no results");
            }
            for hit in hits {
                println!("{:.3}  {}  {}", hit.score, hit.document_id, hit.title);
            }
        }
    }

    Ok(())
}

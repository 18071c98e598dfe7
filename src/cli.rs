use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use retail_copilot::models::settings::AppConfig;
use retail_copilot::services::knowledge::{Bm25Index, DocumentIndex};
use retail_copilot::state::AppState;
use retail_copilot::storage::{ConfigService, SqliteGateway, StructuredStoreGateway};

#[derive(Debug, Parser)]
#[command(name = "retail-copilot", version, about = "Retail analytics copilot over docs and Northwind")]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Answer every question in a JSONL batch file
    Run(RunArgs),
    /// Print the structured store schema
    Schema(SchemaArgs),
    /// Rank document chunks against a query
    Search(SearchArgs),
}

#[derive(Debug, Args, Clone)]
struct CommonArgs {
    /// JSON config file (defaults to ./retail-copilot.json when present)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Debug logging
    #[arg(long, short)]
    verbose: bool,
}

#[derive(Debug, Args, Clone)]
struct RunArgs {
    #[command(flatten)]
    common: CommonArgs,
    /// Input questions, one JSON object per line
    #[arg(long)]
    batch: PathBuf,
    /// Output records, one JSON object per line
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    docs: Option<PathBuf>,
    #[arg(long)]
    db: Option<PathBuf>,
    /// Questions answered at once
    #[arg(long)]
    concurrency: Option<usize>,
}

#[derive(Debug, Args, Clone)]
struct SchemaArgs {
    #[command(flatten)]
    common: CommonArgs,
    #[arg(long)]
    db: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
struct SearchArgs {
    #[command(flatten)]
    common: CommonArgs,
    #[arg(value_name = "QUERY")]
    query: Vec<String>,
    #[arg(long)]
    docs: Option<PathBuf>,
    #[arg(long)]
    top_k: Option<usize>,
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        match self.command {
            Command::Run(args) => {
                init_logging(args.common.verbose);
                let mut config = load_config(args.common.config.as_deref())?;
                if let Some(docs) = args.docs {
                    config.paths.docs_dir = docs;
                }
                if let Some(db) = args.db {
                    config.paths.database = db;
                }
                if let Some(concurrency) = args.concurrency {
                    config.batch.concurrency = concurrency;
                }
                run_batch(config, &args.batch, &args.out).await
            }
            Command::Schema(args) => {
                init_logging(args.common.verbose);
                let mut config = load_config(args.common.config.as_deref())?;
                if let Some(db) = args.db {
                    config.paths.database = db;
                }
                let gateway = SqliteGateway::open(&config.paths.database, 1)?;
                let schema = gateway.describe_schema()?;
                println!("{}", schema.render());
                Ok(())
            }
            Command::Search(args) => {
                init_logging(args.common.verbose);
                let mut config = load_config(args.common.config.as_deref())?;
                if let Some(docs) = args.docs {
                    config.paths.docs_dir = docs;
                }
                let query = args.query.join(" ");
                anyhow::ensure!(!query.trim().is_empty(), "search query is empty");
                let top_k = args.top_k.unwrap_or(config.graph.top_k);

                let index = Bm25Index::from_dir(&config.paths.docs_dir)?;
                for chunk in index.search(&query, top_k) {
                    println!("{:>7.3}  {}", chunk.score, chunk.chunk_id);
                    for line in chunk.text.lines() {
                        println!("         {}", line);
                    }
                }
                Ok(())
            }
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let service = ConfigService::load(path)?;
    Ok(service.get_config_clone())
}

async fn run_batch(config: AppConfig, input: &Path, output: &Path) -> anyhow::Result<()> {
    let state = AppState::initialize(config).context("failed to initialize services")?;
    tracing::debug!(state = ?state, "services ready");
    state.check_backend().await;

    let runner = state.batch_runner();
    let cancel = runner.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling remaining questions");
            cancel.cancel();
        }
    });

    let summary = runner
        .run_file(input, output)
        .await
        .with_context(|| format!("batch {} failed", input.display()))?;
    eprintln!(
        "{} questions: {} answered, {} failed -> {}",
        summary.total,
        summary.answered,
        summary.failed,
        output.display()
    );
    Ok(())
}

/// Log to stderr; `RUST_LOG` wins over `--verbose`.
fn init_logging(verbose: bool) {
    let fallback_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(fallback_level))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();
}

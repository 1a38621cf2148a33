//! Synapse - run memory consolidation passes over a JSON snapshot

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use synapse::config::Config;
use synapse::error::{Result, SynapseError};
use synapse::memory::MemoryRecord;
use synapse::oracle::GuardedOracle;
use synapse::pipeline::{Engine, PassContext, Stage};
use synapse::storage::{InMemoryStore, RecordStore};

/// Synapse - four-stage memory consolidation pipeline
#[derive(Parser)]
#[command(name = "synapse")]
#[command(about = "Move memory records through working memory, episodes, consolidation and a semantic network")]
#[command(version)]
pub struct Cli {
    /// Path to config file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Snapshot file (defaults to <data_dir>/snapshot.json)
    #[arg(long, short = 'd', global = true)]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run one stage, or all of them in order
    Run {
        #[arg(value_enum)]
        stage: StageArg,

        /// Pass cutoff as RFC 3339 (defaults to now)
        #[arg(long)]
        cutoff: Option<String>,
    },
    /// Add a record to the snapshot
    Add {
        content: String,

        /// Tag to attach (repeatable)
        #[arg(long = "tag", short = 't')]
        tags: Vec<String>,
    },
    /// Print table sizes of the snapshot
    Stats,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum StageArg {
    WorkingMemory,
    Stm,
    Consolidation,
    Ltm,
    All,
}

impl StageArg {
    fn stage(self) -> Option<Stage> {
        match self {
            StageArg::WorkingMemory => Some(Stage::WorkingMemory),
            StageArg::Stm => Some(Stage::Stm),
            StageArg::Consolidation => Some(Stage::Consolidation),
            StageArg::Ltm => Some(Stage::Ltm),
            StageArg::All => None,
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    let data = cli
        .data
        .unwrap_or_else(|| config.pipeline.data_dir.join("snapshot.json"));

    match cli.command {
        Command::Run { stage, cutoff } => run_passes(config, &data, stage, cutoff).await,
        Command::Add { content, tags } => add_record(&data, content, tags).await,
        Command::Stats => stats(&data).await,
    }
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,synapse=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn parse_cutoff(raw: Option<String>) -> Result<DateTime<Utc>> {
    match raw {
        Some(s) => DateTime::parse_from_rfc3339(&s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| SynapseError::Config(format!("Invalid cutoff '{s}': {e}"))),
        None => Ok(Utc::now()),
    }
}

async fn run_passes(
    config: Config,
    data: &Path,
    stage: StageArg,
    cutoff: Option<String>,
) -> Result<()> {
    let cutoff = parse_cutoff(cutoff)?;
    let oracle = GuardedOracle::from_config(&config.oracle)?;
    let store = Arc::new(InMemoryStore::load(data).await?);
    let engine = Engine::new(store.clone(), oracle);
    let ctx = PassContext::new(cutoff, Arc::new(config));

    tracing::info!("Run {} at cutoff {}", ctx.run_id, cutoff.to_rfc3339());

    let summaries = match stage.stage() {
        Some(stage) => vec![engine.run(stage, &ctx).await?],
        None => engine.run_all(&ctx).await?,
    };

    store.save(data).await?;

    for summary in &summaries {
        println!("{summary}");
    }
    for letter in engine.dead_letters().list() {
        println!(
            "dead letter: {} {} {} after {} attempts: {}",
            letter.stage, letter.kind, letter.row_id, letter.attempts, letter.reason
        );
    }
    Ok(())
}

async fn add_record(data: &Path, content: String, tags: Vec<String>) -> Result<()> {
    if content.trim().is_empty() {
        return Err(SynapseError::InputMalformed(
            "record content is empty".to_string(),
        ));
    }
    let store = InMemoryStore::load(data).await?;
    let record = MemoryRecord::new(content, Utc::now()).with_tags(tags);
    store.upsert_record(&record).await?;
    store.save(data).await?;
    println!("{}", record.id);
    Ok(())
}

async fn stats(data: &Path) -> Result<()> {
    let snapshot = InMemoryStore::load(data).await?.snapshot();
    println!("records        {}", snapshot.records.len());
    println!("working_memory {}", snapshot.working_memory.len());
    println!("stm            {}", snapshot.stm.len());
    println!("episodes       {}", snapshot.episodes.len());
    println!("outcomes       {}", snapshot.outcomes.len());
    println!("edges          {}", snapshot.edges.len());
    println!("nodes          {}", snapshot.nodes.len());
    Ok(())
}

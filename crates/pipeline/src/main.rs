use anyhow::{Context, Result, bail};
use checkpoint::CheckpointStore;
use clap::{Args, Parser, Subcommand};
use pipeline::{AppConfig, OperationMode, PipelineDriver, export};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "kgpipe", version, about = "Resumable knowledge-graph extraction and canonicalization")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    overrides: Overrides,

    /// Emit logs as JSON lines
    #[arg(long, global = true, default_value_t = false)]
    log_json: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Extract every unprocessed chunk, then canonicalize and export
    Run {
        /// JSONL chunk file or directory of .txt/.md documents
        input: PathBuf,

        /// Where the canonical dataset is written
        #[arg(long, default_value = "data/output")]
        output: PathBuf,

        /// Stop after extraction; run `finish` later
        #[arg(long, default_value_t = false)]
        extract_only: bool,
    },
    /// Canonicalize and export whatever the checkpoint holds
    Finish {
        #[arg(long, default_value = "data/output")]
        output: PathBuf,
    },
    /// Print checkpoint progress
    Status,
    /// Delete all checkpoint state
    Reset {
        /// Required; reset cannot be undone
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
}

#[derive(Debug, Args)]
struct Overrides {
    /// JSON config file; flags below override it
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Preset used when no config file is given
    #[arg(long, global = true, value_enum)]
    mode: Option<OperationMode>,

    #[arg(long, global = true, value_name = "DIR")]
    checkpoint_dir: Option<PathBuf>,

    #[arg(long, global = true)]
    service_url: Option<String>,

    #[arg(long, global = true)]
    model: Option<String>,

    /// Embedding model for semantic deduplication
    #[arg(long, global = true)]
    embedding_model: Option<String>,

    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    #[arg(long, global = true)]
    max_retries: Option<usize>,

    #[arg(long, global = true)]
    concurrency: Option<usize>,

    #[arg(long, global = true)]
    snapshot_interval: Option<usize>,

    /// Cosine similarity (0-1) at which names are merged
    #[arg(long, global = true)]
    similarity_threshold: Option<f32>,

    #[arg(long, global = true)]
    min_importance: Option<u8>,

    #[arg(long, global = true)]
    min_connections: Option<usize>,
}

impl Overrides {
    async fn resolve(&self) -> Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => AppConfig::load(path).await?,
            None => AppConfig::for_mode(self.mode.unwrap_or(OperationMode::Balanced)),
        };

        if let Some(dir) = &self.checkpoint_dir {
            config.checkpoint.dir = dir.clone();
        }
        if let Some(url) = &self.service_url {
            config.service.base_url = url.clone();
        }
        if let Some(model) = &self.model {
            config.service.model = model.clone();
        }
        if let Some(model) = &self.embedding_model {
            config.service.embedding_model = Some(model.clone());
        }
        if let Some(secs) = self.timeout_secs {
            config.service.request_timeout_secs = secs;
        }
        if let Some(retries) = self.max_retries {
            config.retry.max_retries = retries;
        }
        if let Some(n) = self.concurrency {
            config.concurrency.max_concurrent_extractions = n;
        }
        if let Some(n) = self.snapshot_interval {
            config.checkpoint.snapshot_interval = n;
        }
        if let Some(threshold) = self.similarity_threshold {
            config.dedup.similarity_threshold = threshold;
        }
        if let Some(importance) = self.min_importance {
            config.filter.min_importance = importance;
        }
        if let Some(connections) = self.min_connections {
            config.filter.min_connections = connections;
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = cli.overrides.resolve().await?;
    info!(mode = ?config.mode, checkpoint_dir = %config.checkpoint.dir.display(), "Configuration loaded");

    match cli.command {
        Command::Run {
            input,
            output,
            extract_only,
        } => run(&config, &input, &output, extract_only).await,
        Command::Finish { output } => finish(&config, &output).await,
        Command::Status => status(&config).await,
        Command::Reset { yes } => reset(&config, yes).await,
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn run(config: &AppConfig, input: &Path, output: &Path, extract_only: bool) -> Result<()> {
    let chunks = ingest::load_chunks(input)
        .await
        .with_context(|| format!("Failed to load chunks from {}", input.display()))?;

    let store = CheckpointStore::open(&config.checkpoint.dir)
        .await
        .context("Failed to open checkpoint store")?;
    let extractor = pipeline::build_extractor(config)?;

    let mut driver = PipelineDriver::new(extractor, store)
        .with_snapshot_interval(config.checkpoint.snapshot_interval)
        .with_max_concurrent(config.concurrency.max_concurrent_extractions);

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after in-flight chunks");
            signal_token.cancel();
        }
    });

    let report = driver.run(&chunks, &cancel).await?;
    driver.into_store().close().await?;

    println!("{}", serde_json::to_string_pretty(&report.summary)?);

    if report.cancelled {
        info!("Run interrupted; rerun the same command to resume");
        return Ok(());
    }
    if extract_only {
        return Ok(());
    }

    let canonicalizer = pipeline::build_canonicalizer(config)?;
    let dataset = canonicalizer
        .run(&report.concepts, &report.relationships)
        .await;
    export::write_dataset(output, &dataset, Some(&report.summary)).await?;
    Ok(())
}

async fn finish(config: &AppConfig, output: &Path) -> Result<()> {
    let store = CheckpointStore::open(&config.checkpoint.dir)
        .await
        .context("Failed to open checkpoint store")?;
    let (concepts, relationships) = store.load_incremental().await?;
    if concepts.is_empty() && relationships.is_empty() {
        warn!("Checkpoint holds no extracted data");
    }

    let canonicalizer = pipeline::build_canonicalizer(config)?;
    let dataset = canonicalizer.run(&concepts, &relationships).await;
    export::write_dataset(output, &dataset, None).await?;
    Ok(())
}

async fn status(config: &AppConfig) -> Result<()> {
    let store = CheckpointStore::open(&config.checkpoint.dir)
        .await
        .context("Failed to open checkpoint store")?;
    let progress = store.progress();

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "checkpoint_dir": config.checkpoint.dir,
            "processed_chunks": progress.processed_chunk_ids.len(),
            "total_concepts": progress.total_concepts,
            "total_relationships": progress.total_relationships,
            "started_at": progress.started_at,
            "last_update": progress.last_update,
        }))?
    );
    Ok(())
}

async fn reset(config: &AppConfig, yes: bool) -> Result<()> {
    if !yes {
        bail!(
            "Refusing to reset {} without --yes",
            config.checkpoint.dir.display()
        );
    }
    let mut store = CheckpointStore::open(&config.checkpoint.dir)
        .await
        .context("Failed to open checkpoint store")?;
    store.reset().await?;
    println!("Checkpoint at {} reset", config.checkpoint.dir.display());
    Ok(())
}

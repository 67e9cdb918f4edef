use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use geodex::index::JsonLinesSource;
use geodex::merge::{InProcessWorker, MergeWorker, ProcessWorker};
use geodex::{
    FjallShardStore, FnvTokenizer, IndexConfig, IndexMetrics, IndexSource, Indexer, MergeConfig,
    MergeEngine, MultiMerge, ShardStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "geodex")]
#[command(about = "Sharded geocoding index builder", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Index a newline-delimited JSON document file
    Index {
        /// Documents, one JSON object per line
        #[arg(long)]
        input: PathBuf,

        /// Index directory
        #[arg(long)]
        output: PathBuf,

        /// JSON index configuration
        #[arg(long, env = "GEODEX_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Merge two indexes into a new one
    Merge {
        #[arg(long)]
        left: PathBuf,

        #[arg(long)]
        right: PathBuf,

        #[arg(long)]
        output: PathBuf,

        /// Shard writes allowed in flight
        #[arg(long, env = "GEODEX_MAX_PENDING", default_value = "1000")]
        max_pending: usize,
    },

    /// Merge any number of indexes into one
    Multimerge {
        #[arg(long)]
        output: PathBuf,

        /// Concurrent pairwise merges (defaults to CPU count)
        #[arg(long, env = "GEODEX_WORKERS")]
        workers: Option<usize>,

        /// Directory for intermediate indexes
        #[arg(long, env = "GEODEX_SCRATCH_DIR")]
        scratch_dir: Option<PathBuf>,

        /// Run pairwise merges as tasks instead of child processes
        #[arg(long)]
        in_process: bool,

        /// Indexes to merge
        #[arg(required = true, num_args = 2..)]
        inputs: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    info!("geodex v{}", geodex::VERSION);

    match args.command {
        Command::Index {
            input,
            output,
            config,
        } => {
            let config = match config {
                Some(path) => IndexConfig::from_file(&path)
                    .with_context(|| format!("loading config {}", path.display()))?,
                None => IndexConfig::default(),
            };
            let batch_size = config.batch_size;
            let tokenizer = Arc::new(FnvTokenizer::new(&config.tokenizer)?);
            let store: Arc<dyn ShardStore> = Arc::new(FjallShardStore::open(&output)?);
            let name = output.display().to_string();
            let metrics = IndexMetrics::new()?;
            let mut index = IndexSource::open(name, config, store)
                .await?
                .with_metrics(metrics.clone());
            let indexer = Indexer::new(tokenizer).with_metrics(metrics.clone());

            let mut source = JsonLinesSource::new(&input);
            let stats = indexer
                .index_source(&mut source, &mut index, batch_size)
                .await?;
            info!(
                documents = stats.documents,
                skipped = stats.skipped,
                batches = stats.batches,
                shards_fetched = metrics.shards_fetched.get(),
                "indexed {}",
                input.display()
            );
        }
        Command::Merge {
            left,
            right,
            output,
            max_pending,
        } => {
            let engine = MergeEngine::new(MergeConfig::default().with_max_pending(max_pending))
                .with_metrics(IndexMetrics::new()?);
            let stats = engine.merge_paths(&left, &right, &output).await?;
            info!(
                shards = stats.total_shards(),
                dictionary = stats.dictionary_entries,
                "merged into {}",
                output.display()
            );
        }
        Command::Multimerge {
            output,
            workers,
            scratch_dir,
            in_process,
            inputs,
        } => {
            let mut config = MergeConfig::default().with_cpu_workers();
            if let Some(workers) = workers {
                config = config.with_workers(workers);
            }
            if let Some(dir) = scratch_dir {
                config = config.with_scratch_dir(dir);
            }
            let worker: Arc<dyn MergeWorker> = if in_process {
                Arc::new(InProcessWorker::new(Arc::new(MergeEngine::new(
                    config.clone(),
                ))))
            } else {
                Arc::new(ProcessWorker::current_exe()?)
            };
            let stats = MultiMerge::new(config, worker).run(inputs, output.clone()).await?;
            info!(merges = stats.merges, "merged into {}", output.display());
        }
    }

    Ok(())
}

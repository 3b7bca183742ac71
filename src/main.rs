use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, trace};
use uuid::Uuid;

use serverless_mr::driver::{read_output, JobDriver, SourcePrefix};
use serverless_mr::invoker::LocalInvoker;
use serverless_mr::job::{JobDefinition, PartitionStrategy};
use serverless_mr::queue::InMemoryQueue;
use serverless_mr::storage::{JobStore, StorageConfig, StorageFactory};
use serverless_mr::EngineConfig;

/// Run MapReduce jobs over an object store with in-process workers
#[derive(Parser)]
#[command(name = "serverless-mr")]
#[command(about = "Fault-tolerant MapReduce over queues and an object store", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv for all)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to a TOML engine configuration
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    /// Root directory of the file object store (overrides the configuration)
    #[arg(long, global = true)]
    store_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Partition a bucket into mappings and print them as JSON
    Plan {
        /// Source bucket
        #[arg(long)]
        bucket: String,

        /// Only objects whose key starts with this prefix
        #[arg(long, default_value = "")]
        prefix: String,
    },
    /// Run a word count job end to end and print the counts as JSON
    Run {
        /// Source bucket
        #[arg(long)]
        bucket: String,

        /// Only objects whose key starts with this prefix
        #[arg(long, default_value = "")]
        prefix: String,

        /// Number of reduce partitions
        #[arg(short = 'p', long, default_value = "4")]
        partitions: usize,

        /// Job id (a fresh one when omitted)
        #[arg(long)]
        job_id: Option<String>,

        /// Route values to random partitions and merge them in a final reducer
        #[arg(long)]
        randomized: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        2 => "trace",
        _ => "trace,aws_config=debug,aws_smithy_runtime=debug",
    };

    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_writer(std::io::stderr)
        .with_target(cli.verbose >= 2)
        .with_thread_ids(cli.verbose >= 3)
        .with_line_number(cli.verbose >= 3)
        .init();

    debug!("serverless-mr started with verbosity level: {}", cli.verbose);
    trace!("Full CLI args: {:?}", std::env::args().collect::<Vec<_>>());

    if let Err(e) = run(cli).await {
        error!("Fatal error: {:#}", e);
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    if let Some(dir) = &cli.store_dir {
        config.storage = StorageConfig::file(dir);
    }
    let store = StorageFactory::from_config(&config.storage)
        .await
        .context("Failed to open object store")?;

    match cli.command {
        Commands::Plan { bucket, prefix } => {
            let definition = JobDefinition::word_count();
            let invoker = LocalInvoker::new(
                Arc::clone(&store),
                Arc::new(InMemoryQueue::new(config.visibility_timeout)),
                config.clone(),
                definition.clone(),
            );
            let driver = JobDriver::new(store, Arc::new(invoker), config, definition);
            let plan = driver.plan(&[SourcePrefix::new(bucket, prefix)]).await?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
        Commands::Run {
            bucket,
            prefix,
            partitions,
            job_id,
            randomized,
        } => {
            let strategy = if randomized {
                PartitionStrategy::Randomized
            } else {
                PartitionStrategy::Hashed
            };
            let definition = JobDefinition::word_count().with_strategy(strategy);
            let job_id = job_id.unwrap_or_else(|| Uuid::new_v4().to_string());

            let invoker = LocalInvoker::new(
                Arc::clone(&store),
                Arc::new(InMemoryQueue::new(config.visibility_timeout)),
                config.clone(),
                definition,
            );
            let driver = JobDriver::new(
                Arc::clone(&store),
                Arc::new(invoker.clone()),
                config.clone(),
                JobDefinition::word_count().with_strategy(strategy),
            );
            driver
                .start(&job_id, &[SourcePrefix::new(bucket, prefix)], partitions)
                .await?;
            invoker.wait_idle().await;

            let failures = invoker.failures().await;
            if let Some(failure) = failures.first() {
                bail!(
                    "{} invocation(s) failed, first: {} after {} attempt(s): {}",
                    failures.len(),
                    failure.worker,
                    failure.attempts,
                    failure.error
                );
            }

            let job = JobStore::new(store, config.state_bucket.clone(), job_id);
            let output = read_output(&job, strategy, partitions).await?;
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

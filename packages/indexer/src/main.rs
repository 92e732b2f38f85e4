//! Polymorph Indexer - mint/morph event ingestion and rarity ranking
//!
//! This binary provides:
//! - Recovery from the stored checkpoint followed by interval polling
//! - One-off runs over an explicit block range
//! - A status report of the projection

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use polymorph_indexer::collector::BlockRange;
use polymorph_indexer::store::ProjectionStore;
use polymorph_indexer::{
    EntityBuilder, Indexer, IndexerConfig, RedisStore, RpcClient, TraitCatalog,
};

#[derive(Parser)]
#[command(name = "polymorph-indexer")]
#[command(version, about = "Indexes Polymorph mints and morphs and ranks token rarity", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Recover from the checkpoint, then poll on the configured interval
    Run,

    /// Run the pipeline once
    Once {
        /// First block of an explicit window
        #[arg(long, requires = "to_block")]
        from_block: Option<u64>,

        /// Last block of an explicit window
        #[arg(long, requires = "from_block")]
        to_block: Option<u64>,
    },

    /// Show the checkpoint and projection size
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    init_logging(cli.debug);

    info!("Polymorph Indexer starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = IndexerConfig::from_env().context("Failed to load configuration")?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let indexer = build_indexer(&config).await?;
            indexer.run_forever().await;
        }
        Commands::Once {
            from_block,
            to_block,
        } => {
            let range = from_block
                .zip(to_block)
                .map(|(from, to)| BlockRange { from, to });
            let indexer = build_indexer(&config).await?;
            let report = indexer.run_once(range).await.context("Run failed")?;
            info!(
                "Run finished: {} logs, {} mints, {} morph events, {} ranks changed, checkpoint {}",
                report.logs,
                report.mints.inserted,
                report.morphs.applied,
                report.ranks_changed,
                report.checkpoint
            );
        }
        Commands::Status => show_status(&config).await?,
    }

    Ok(())
}

/// Initialize tracing subscriber for logging
fn init_logging(debug: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = if debug {
        EnvFilter::new("polymorph_indexer=debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("polymorph_indexer=info"))
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_line_number(true))
        .init();
}

async fn build_indexer(config: &IndexerConfig) -> Result<Indexer<RpcClient, RedisStore>> {
    let catalog = TraitCatalog::from_path(&config.traits_config_path).with_context(|| {
        format!(
            "Failed to load trait catalog from {}",
            config.traits_config_path.display()
        )
    })?;
    info!("Trait catalog loaded from {}", config.traits_config_path.display());

    let client = RpcClient::new(config.rpc()).context("Failed to create RPC client")?;
    info!("RPC client initialized for {}", config.rpc_url);

    let store = RedisStore::connect(&config.redis_url, config.redis_key_prefix.clone())
        .await
        .context("Failed to connect to Redis")?;
    info!("Connected to Redis at {}", config.redis_url);

    let builder = EntityBuilder::new(Arc::new(catalog), config.image_base_url.clone());
    Ok(Indexer::new(
        Arc::new(client),
        Arc::new(store),
        Arc::new(builder),
        config.indexer(),
    ))
}

async fn show_status(config: &IndexerConfig) -> Result<()> {
    let store = RedisStore::connect(&config.redis_url, config.redis_key_prefix.clone())
        .await
        .context("Failed to connect to Redis")?;

    let checkpoint = store.last_processed_block().await?;
    let entities = store.entity_count().await?;
    let transactions = store.processed_transactions().await?.len();

    println!("Polymorph Indexer Status");
    println!("========================");
    match checkpoint {
        Some(block) => println!("Next block:          {}", block),
        None => println!("Next block:          {} (nothing processed yet)", config.start_block),
    }
    println!("Tokens projected:    {}", entities);
    println!("Logs in ledger:      {}", transactions);

    Ok(())
}

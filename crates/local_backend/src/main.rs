//! Operator CLI for the entity search backend.

mod source;

use std::{
    path::{
        Path,
        PathBuf,
    },
    sync::Arc,
};

use clap::{
    Parser,
    Subcommand,
};
use common::knobs::INDEX_PREFIX;
use search::{
    ClientPool,
    ElasticsearchProvider,
    Indexer,
    SearchProvider,
};
use tracing_subscriber::EnvFilter;

use crate::source::FileUpdateSource;

#[derive(Parser)]
#[command(name = "screener-backend", about = "Sanctions entity search backend")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Re-index datasets whose catalog version changed.
    Reindex {
        /// Catalog manifest with datasets, versions and entity exports.
        #[arg(long)]
        manifest: PathBuf,
        /// Rebuild even when the indexed version matches the catalog.
        #[arg(short, long, default_value_t = false)]
        force: bool,
    },
    /// Apply published deltas without forcing rebuilds.
    DeltaUpdate {
        #[arg(long)]
        manifest: PathBuf,
    },
    /// Delete every index under the configured prefix.
    ClearIndex,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let pool = ClientPool::new();
    let result = match cli.command {
        Command::Reindex { manifest, force } => update(&pool, &manifest, force).await,
        Command::DeltaUpdate { manifest } => update(&pool, &manifest, false).await,
        Command::ClearIndex => clear_index(&pool).await,
    };
    pool.close().await;
    result
}

async fn update(pool: &ClientPool, manifest: &Path, force: bool) -> anyhow::Result<()> {
    let provider: Arc<dyn SearchProvider> = Arc::new(ElasticsearchProvider::create(pool).await?);
    let source = Arc::new(FileUpdateSource::load(manifest)?);
    let indexer = Indexer::new(provider, source);
    for (dataset, outcome) in indexer.update_all(force).await? {
        tracing::info!(dataset = %dataset, "Update finished: {outcome:?}");
    }
    Ok(())
}

async fn clear_index(pool: &ClientPool) -> anyhow::Result<()> {
    let provider = ElasticsearchProvider::create(pool).await?;
    for index in provider.list_indices(&INDEX_PREFIX).await? {
        tracing::info!(index = %index, "Deleting index");
        provider.delete_index(&index).await?;
    }
    Ok(())
}

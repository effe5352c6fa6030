//! Vestibule Seed - provision tenants and domain configs in MongoDB
//!
//! Usage:
//!   vestibule-seed --file seed.json --mongodb-uri mongodb://localhost:27017
//!
//! Environment variables:
//!   SEED_FILE - JSON seed file
//!   MONGODB_URI - MongoDB connection URI (default: mongodb://localhost:27017)
//!   MONGODB_DB - MongoDB database name (default: vestibule)

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use vestibule::db::MongoClient;
use vestibule::store::{apply_seed, MongoStore, SeedFile};

#[derive(Parser, Debug)]
#[command(name = "vestibule-seed")]
#[command(about = "Load tenants and domain configs into the Vestibule store")]
#[command(version)]
struct Args {
    /// JSON seed file
    #[arg(long, env = "SEED_FILE")]
    file: PathBuf,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "vestibule")]
    mongodb_db: String,

    /// Validate the seed file without touching the database
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let seed = SeedFile::load(&args.file)
        .with_context(|| format!("loading {}", args.file.display()))?;
    let configs: usize = seed.tenants.iter().map(|t| t.configs.len()).sum();
    info!(
        "Seed file {}: {} tenant(s), {} config(s)",
        args.file.display(),
        seed.tenants.len(),
        configs
    );

    if args.dry_run {
        info!("Dry run, nothing written");
        return Ok(());
    }

    let client = MongoClient::new(&args.mongodb_uri, &args.mongodb_db)
        .await
        .context("connecting to MongoDB")?;
    let store = MongoStore::open(&client).await.context("opening collections")?;

    match apply_seed(&store, &seed).await {
        Ok(report) => {
            info!(
                "Done: {} tenant(s) created, {} config(s) saved",
                report.tenants_created, report.configs_saved
            );
            Ok(())
        }
        Err(e) => {
            error!("Seeding failed: {}", e);
            Err(e.into())
        }
    }
}

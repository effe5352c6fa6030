//! Vestibule - multi-tenant caching reverse proxy

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};

use vestibule::{
    config::Args,
    db::MongoClient,
    logging::{self, AccessLogger},
    proxy::{HttpUpstream, ProxyService, ProxySettings},
    server::{self, AppState},
    store::{apply_seed, CacheStore, ConfigStore, MemoryStore, MongoStore, SeedFile, TenantStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    logging::init(&args.log_level, args.log_format);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Vestibule - caching reverse proxy");
    info!(
        "  build {} ({})",
        env!("GIT_COMMIT_SHORT"),
        env!("BUILD_TIMESTAMP")
    );
    info!("======================================");
    info!("Listen: {}", args.listen);
    if args.tls_enabled() {
        info!("Listen TLS: {}", args.listen_tls);
    }
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("MongoDB: {} (db {})", args.mongodb_uri, args.mongodb_db);
    match args.default_cache_ttl() {
        Some(ttl) => info!("Default cache TTL: {}ms", ttl.as_millis()),
        None => info!("Default cache TTL: none"),
    }
    info!("Upstream timeout: {}ms", args.upstream_timeout_ms);
    info!("======================================");

    let (configs, cache, tenants) = open_stores(&args).await;

    if let Some(path) = &args.seed_file {
        match SeedFile::load(path) {
            Ok(seed) => match apply_seed(tenants.as_ref(), &seed).await {
                Ok(report) => info!(
                    "Seed applied: {} tenant(s) created, {} config(s) saved",
                    report.tenants_created, report.configs_saved
                ),
                Err(e) => {
                    error!("Failed to apply seed {}: {}", path.display(), e);
                    std::process::exit(1);
                }
            },
            Err(e) => {
                error!("Invalid seed file {}: {}", path.display(), e);
                std::process::exit(1);
            }
        }
    }

    let upstream = Arc::new(HttpUpstream::new(args.max_body_bytes)?);
    let proxy = ProxyService::new(
        configs,
        cache,
        upstream,
        args.default_cache_ttl(),
        ProxySettings {
            upstream_timeout: args.upstream_timeout(),
            storage_timeout: args.storage_timeout(),
        },
    );

    let access_log = AccessLogger::new();
    if let Some(path) = &args.access_log_path {
        if let Err(e) = access_log.init_file(path.clone()).await {
            warn!("Access log file {} unavailable: {}", path.display(), e);
        }
    }

    let state = Arc::new(AppState::new(args, proxy, access_log));

    if let Err(e) = server::run(state).await {
        error!("Server error: {:?}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Store handle that can seed tenants and configs
trait SeedTarget: TenantStore + ConfigStore {}

impl<T: TenantStore + ConfigStore> SeedTarget for T {}

type Stores = (Arc<dyn ConfigStore>, Arc<dyn CacheStore>, Arc<dyn SeedTarget>);

/// MongoDB stores, or memory stores in dev mode when MongoDB is unreachable
async fn open_stores(args: &Args) -> Stores {
    let opened = match MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await {
        Ok(client) => {
            info!("MongoDB connected successfully");
            MongoStore::open(&client).await
        }
        Err(e) => Err(e),
    };

    match opened {
        Ok(store) => {
            let store = Arc::new(store);
            (store.clone(), store.clone(), store)
        }
        Err(e) if args.dev_mode => {
            warn!("MongoDB unavailable (dev mode, using in-memory store): {}", e);
            let store = Arc::new(MemoryStore::new());
            (store.clone(), store.clone(), store)
        }
        Err(e) => {
            error!("MongoDB connection failed: {}", e);
            std::process::exit(1);
        }
    }
}

//! Storage server binary

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use stratus_core::config::{LogFormat, ServerConfig, StoreBackend};
use stratus_core::runtime::{ServerRuntime, ShutdownSignal};
use stratus_core::service::{self, StorageService};
use stratus_core::storage::{InMemoryObjectStore, ObjectStore, S3Client};
use stratus_core::upload::{UploadCoordinator, WorkerPool};
use stratus_core::{telemetry, StratusError};

#[derive(Debug, Parser)]
#[command(name = "stratus-server", version, about = "Chunked multipart upload server")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "STRATUS_CONFIG")]
    config: Option<PathBuf>,

    /// Address the HTTP API listens on
    #[arg(long)]
    bind: Option<String>,

    /// Object store backend (s3 or memory)
    #[arg(long)]
    store: Option<StoreBackend>,

    /// Multipart part size in bytes
    #[arg(long)]
    part_size: Option<usize>,

    /// Maximum concurrent part uploads
    #[arg(long)]
    parallelism: Option<usize>,

    /// Default log filter
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn load_config(&self) -> stratus_core::Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_file(path)?,
            None => ServerConfig::default(),
        };
        config.apply_env()?;

        if let Some(bind) = &self.bind {
            config.http.bind_addr = bind.clone();
        }
        if let Some(store) = self.store {
            config.store = store;
        }
        if let Some(part_size) = self.part_size {
            config.upload.part_size = part_size;
        }
        if let Some(parallelism) = self.parallelism {
            config.pool.parallelism = parallelism;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if self.json_logs {
            config.logging.format = LogFormat::Json;
        }

        config.validate()?;
        Ok(config)
    }
}

fn build_store(config: &ServerConfig) -> stratus_core::Result<Arc<dyn ObjectStore>> {
    match config.store {
        StoreBackend::S3 => {
            info!(
                "Using S3 store at {} (bucket {})",
                config.s3.endpoint, config.s3.bucket
            );
            Ok(Arc::new(S3Client::new(config.s3.clone())?))
        }
        StoreBackend::Memory => {
            warn!("Using in-memory store; objects are lost on exit");
            Ok(Arc::new(InMemoryObjectStore::new()))
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = cli.load_config()?;
    telemetry::init(&config.logging)?;

    info!("Starting Stratus server v{}", env!("CARGO_PKG_VERSION"));

    let runtime = ServerRuntime::new(config.runtime.clone())?;
    let store = build_store(&config)?;
    let pool = WorkerPool::new(config.pool.clone(), runtime.upload_handle());
    info!(
        "Upload pool: {} permits ({:?}), part size {} bytes",
        pool.size(),
        pool.scope(),
        config.upload.part_size
    );

    let coordinator = Arc::new(UploadCoordinator::new(store, pool, config.upload.clone()));
    let app = service::router(Arc::new(StorageService::new(coordinator.clone())));
    let shutdown = ShutdownSignal::new();

    let served = runtime.block_on_io(async {
        shutdown.trigger_on_ctrl_c();

        let listener = tokio::net::TcpListener::bind(&config.http.bind_addr)
            .await
            .map_err(|e| StratusError::Internal {
                message: format!("cannot bind {}: {}", config.http.bind_addr, e),
            })?;
        let served = service::serve(listener, app, shutdown.clone()).await;

        if !coordinator.shutdown().await {
            warn!("Part uploads still running after the shutdown grace period");
        }
        served
    });

    runtime.shutdown();

    if let Err(e) = served {
        error!("Server stopped with error: {}", e);
        return Err(e.into());
    }
    info!("Server stopped");
    Ok(())
}

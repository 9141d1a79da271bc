#![cfg_attr(test, allow(clippy::disallowed_methods))]
// Forbid unwrap() in production code to prevent panics from corrupt data.
// Test code is allowed to use unwrap() for convenience.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use deltalog::{
    DataRegistry,
    config::ServerConfig,
    coord::{CoordinationService, Coordinator},
    lifecycle::Lifecycle,
    provider::{CoordinatedProvider, FileProvider, MemProvider, ProviderRegistry, SharedBodies},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Home of the `zk` provider under the base directory. Source names never
/// start with a dot, so the file provider's scan never takes it for a source.
const COORDINATION_DIR: &str = ".zk";

/// Hook levels. Lower levels start first and stop last.
const LEVEL_SERVER_AREA: i32 = 0;
const LEVEL_REGISTRY: i32 = 10;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "deltalog=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment variables
    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        "Loaded configuration: base_directory={}, listen_port={}, log_type={}",
        config.base_directory.display(),
        config.listen_port,
        config.log_type
    );

    let registry_slot: Arc<OnceLock<Arc<DataRegistry>>> = Arc::new(OnceLock::new());
    let lifecycle = build_lifecycle(&config, &registry_slot);
    if let Err(e) = lifecycle.start() {
        tracing::error!("{e}");
        lifecycle.stop();
        std::process::exit(1);
    }
    let Some(registry) = registry_slot.get().cloned() else {
        tracing::error!("Data source registry was not started");
        std::process::exit(1);
    };

    let app = deltalog::api::router(registry);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.listen_port));
    tracing::info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Failed to bind: {e}");
            std::process::exit(1);
        });

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("Failed to listen for shutdown signal: {e}");
            }
        })
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Server error: {e}");
            std::process::exit(1);
        });

    lifecycle.stop();
    tracing::info!("shutdown complete");
}

#[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
fn build_lifecycle(config: &ServerConfig, slot: &Arc<OnceLock<Arc<DataRegistry>>>) -> Lifecycle {
    let mut lifecycle = Lifecycle::new();

    let base = config.base_directory.clone();
    lifecycle.add(
        "server-area",
        LEVEL_SERVER_AREA,
        move || {
            std::fs::create_dir_all(&base)
                .map_err(|e| format!("cannot create {}: {e}", base.display()))
        },
        None,
    );

    let config = config.clone();
    let start_slot = Arc::clone(slot);
    let stop_slot = Arc::clone(slot);
    lifecycle.add(
        "registry",
        LEVEL_REGISTRY,
        move || {
            let providers = build_providers(&config)?;
            let registry = DataRegistry::attach(providers).map_err(|e| e.to_string())?;
            let count = registry.len().map_err(|e| e.to_string())?;
            tracing::info!("Registry started with {count} data source(s)");
            let _ = start_slot.set(Arc::new(registry));
            Ok(())
        },
        Some(Box::new(move || {
            if let Some(registry) = stop_slot.get() {
                let count = registry.len().map_err(|e| e.to_string())?;
                tracing::info!("Registry closed with {count} data source(s)");
            }
            Ok(())
        })),
    );

    lifecycle
}

/// The built-in providers. `zk` runs the coordination service in process,
/// with its node tree in `{base}/.zk/nodes` and patch bodies under
/// `{base}/.zk/bodies`.
fn build_providers(config: &ServerConfig) -> Result<ProviderRegistry, String> {
    let home = config.base_directory.join(COORDINATION_DIR);
    std::fs::create_dir_all(&home).map_err(|e| format!("cannot create {}: {e}", home.display()))?;
    let service = CoordinationService::persistent(home.join("nodes")).map_err(|e| e.to_string())?;
    let coord: Arc<dyn Coordinator> = Arc::new(service.connect().map_err(|e| e.to_string())?);
    let bodies = Arc::new(SharedBodies::on_disk(home.join("bodies")));

    Ok(ProviderRegistry::new(config.log_type.clone())
        .with(Arc::new(FileProvider::new(
            &config.base_directory,
            config.patch_cache_size,
        )))
        .with(Arc::new(MemProvider::new(config.patch_cache_size)))
        .with(Arc::new(CoordinatedProvider::new(
            coord,
            bodies,
            config.lock_timeout,
            config.patch_cache_size,
        ))))
}

//! Catalog Gateway API Server
//!
//! Serves paginated, authorization-aware listings of catalog entities.

use catalog_gateway_api::{
    authorizer_from_config, build_router, ApiKeyManager, AppState, EntityGateway, GatewayConfig,
    SecretsManagerProvider,
};
use catalog_gateway_storage::{backend_from_uri, DynCatalogBackend, SqliteEntityStore};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = GatewayConfig::from_env()?;
    config.validate()?;
    tracing::info!(config = ?config, "Loaded configuration");

    let backend: Arc<DynCatalogBackend> = Arc::from(backend_from_uri(&config.db_path)?);
    if !backend.exists().await? {
        tracing::warn!("Catalog does not exist, initializing new catalog");
        backend.initialize().await?;
    }

    // Build the secrets manager now so a bad key fails startup, not the first request
    let secrets = Arc::new(SecretsManagerProvider::from_config(&config));
    secrets.get()?;

    let authorizer = authorizer_from_config(&config)?;
    tracing::info!(authorizer = authorizer.name(), "Authorizer ready");

    let store = Arc::new(SqliteEntityStore::new(Arc::clone(&backend)));
    let gateway = EntityGateway::new(store, authorizer, Arc::clone(&secrets))
        .with_max_limit(config.max_limit)
        .with_redaction_concurrency(config.redaction_concurrency);

    let state = AppState {
        backend: Arc::clone(&backend),
        gateway: Arc::new(gateway),
        secrets,
        default_limit: config.default_limit,
    };
    let api_keys = Arc::new(ApiKeyManager::new(Arc::clone(&backend)));
    spawn_last_used_flush(Arc::clone(&api_keys));

    let app = build_router(state, api_keys);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Catalog gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Catalog gateway stopped");
    Ok(())
}

/// Periodically persist API key last-used timestamps.
fn spawn_last_used_flush(api_keys: Arc<ApiKeyManager>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            if let Err(e) = api_keys.flush_pending_updates().await {
                tracing::warn!(error = %e, "Failed to flush API key usage");
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

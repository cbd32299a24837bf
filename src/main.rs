use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use migration::MigratorTrait;
use sea_orm::ConnectOptions;
use sea_orm::Database;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tusdc_faucet::config::FaucetConfig;
use tusdc_faucet::http;
use tusdc_faucet::relayer::Relayer;
use tusdc_faucet::rpc::EthRpcClient;
use tusdc_faucet::state::{ApiCache, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let config = FaucetConfig::load().context("Failed to load configuration")?;
    let database = connect_database(&config).await?;
    run_migrations(&database).await?;

    let rpc = EthRpcClient::new(&config.chain.rpc_url, config.chain.request_timeout())
        .context("Failed to initialize RPC client")?;

    match rpc.chain_id().await {
        Ok(observed) if observed == config.chain.expected_chain_id => {
            info!(
                "Connected to {} (chain id {observed})",
                config.chain.network_name
            );
        }
        Ok(observed) => warn!(
            "RPC endpoint reports chain id {observed}, expected {} for {}",
            config.chain.expected_chain_id, config.chain.network_name
        ),
        Err(err) => warn!("Could not verify chain id at startup: {err}"),
    }

    let relay_key = std::env::var(&config.faucet.relay_key_env).with_context(|| {
        format!(
            "Relay signing key missing from environment variable {}",
            config.faucet.relay_key_env
        )
    })?;
    let relayer = Relayer::new(
        &relay_key,
        rpc.clone(),
        config.chain.expected_chain_id,
        config.faucet.contract_address.as_str(),
    )
    .context("Failed to initialize relayer")?;
    info!("Relaying faucet calls from {}", relayer.sender());

    let cache = Arc::new(ApiCache::new(&config.cache));
    let app_state = AppState::new(
        database.clone(),
        Arc::clone(&cache),
        rpc.clone(),
        Arc::new(relayer),
        config.controller(),
    );

    let listener = TcpListener::bind(config.server.address())
        .await
        .context("Failed to bind HTTP listener")?;
    let local_addr = listener
        .local_addr()
        .context("Failed to obtain listener address")?;
    info!("Faucet API listening on {local_addr}");

    let router: Router = http::router(app_state);
    let server = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    );
    server
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server exited with error")?;

    Ok(())
}

fn init_tracing() {
    let default_filter = "info";
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.to_string());
    assert!(!filter.is_empty(), "Tracing filter must not be empty");
    assert!(filter.len() < 256, "Tracing filter length exceeds bounds");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .compact()
        .init();
}

async fn connect_database(config: &FaucetConfig) -> Result<sea_orm::DatabaseConnection> {
    let mut options = ConnectOptions::new(config.database.url.clone());
    options
        .max_connections(config.database.max_connections)
        .sqlx_logging(true)
        .sqlx_logging_level(tracing::log::LevelFilter::Debug)
        .acquire_timeout(Duration::from_secs(10));

    if let Some(min) = config.database.min_connections {
        options.min_connections(min);
    }

    assert!(
        config.database.max_connections >= config.database.min_connections.unwrap_or(1),
        "Max connections must be >= min connections"
    );
    assert!(
        config.database.max_connections <= 128,
        "Connection pool oversized"
    );

    Database::connect(options)
        .await
        .context("Failed to connect to PostgreSQL")
}

async fn run_migrations(database: &sea_orm::DatabaseConnection) -> Result<()> {
    migration::Migrator::up(database, None)
        .await
        .context("Database migrations failed")
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {err}");
        return;
    }
    info!("Shutdown signal received");
}

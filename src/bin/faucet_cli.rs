//! Headless front end for relay deployments: drives the request controller
//! with a manually entered address, the relay dispatcher and a file-backed
//! cooldown store.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use tusdc_faucet::config::FaucetConfig;
use tusdc_faucet::controller::{Eligibility, FaucetController, TxStatus};
use tusdc_faucet::dispatch::RelayDispatcher;
use tusdc_faucet::rpc::EthRpcClient;
use tusdc_faucet::store::JsonFileStore;

#[derive(Parser)]
#[command(
    name = "tusdc-faucet-cli",
    about = "Request testnet USDC through the faucet relay"
)]
struct Args {
    /// Recipient address (0x + 40 hex characters)
    #[arg(long)]
    address: String,

    /// Base URL of the faucet relay
    #[arg(long, default_value = "http://127.0.0.1:5000")]
    relay_url: String,

    /// Path of the local cooldown store
    #[arg(long, default_value = "faucet-cooldowns.json")]
    store: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let config = FaucetConfig::load().context("Failed to load configuration")?;

    let store = JsonFileStore::open(&args.store).context("Failed to open cooldown store")?;
    let dispatcher = RelayDispatcher::new(&args.relay_url);
    let mut controller = FaucetController::new(config.controller(), dispatcher, store);
    controller.set_manual_address(&args.address);

    // No wallet in a relay deployment; the chain is observed over RPC.
    let rpc = EthRpcClient::new(&config.chain.rpc_url, config.chain.request_timeout())
        .context("Failed to initialize RPC client")?;
    match rpc.chain_id().await {
        Ok(chain_id) => controller.observed_chain(chain_id),
        Err(err) => warn!("Could not observe the chain id: {err}"),
    }

    let now = Utc::now();
    println!("[{}]", controller.action_label(now).await?);
    if let Some(hint) = controller.network_hint() {
        println!("{hint}");
    }

    match controller.eligibility(now).await? {
        Eligibility::Ready => {}
        Eligibility::InvalidAddress => {
            println!("'{}' is not a valid 0x-prefixed address", args.address);
            std::process::exit(1);
        }
        Eligibility::RateLimited { until } => {
            println!("Cooldown active; next request available at {until}");
            std::process::exit(1);
        }
        Eligibility::NetworkUnknown => {
            println!("Could not determine the active network; check the RPC endpoint");
            std::process::exit(1);
        }
        Eligibility::WrongNetwork { observed } => {
            println!(
                "RPC endpoint is on chain {observed}, expected {}",
                controller.config().expected_chain_id
            );
            std::process::exit(1);
        }
        Eligibility::RequestInFlight => unreachable!("no request started yet"),
    }

    // Stream lifecycle transitions while the request runs.
    let mut status_watch = controller.subscribe();
    let printer = tokio::spawn(async move {
        while status_watch.changed().await.is_ok() {
            match &*status_watch.borrow_and_update() {
                TxStatus::Pending { tx_hash: None } => println!("Submitting request..."),
                TxStatus::Pending {
                    tx_hash: Some(hash),
                } => println!("Accepted as {hash}, waiting for confirmation..."),
                TxStatus::Idle | TxStatus::Success { .. } | TxStatus::Error { .. } => {}
            }
        }
    });

    controller.request_tokens().await?;
    printer.abort();

    match controller.status() {
        TxStatus::Success { tx_hash } => {
            println!("Success! Tokens sent to {}", args.address);
            println!("{}", controller.config().explorer_tx_url(&tx_hash));
        }
        TxStatus::Error { message } => {
            println!("Request failed: {message}");
            std::process::exit(1);
        }
        other => {
            println!("Request ended in an unexpected state: {other:?}");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .compact()
        .init();
}

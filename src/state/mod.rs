use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::future::Cache;
use sea_orm::DatabaseConnection;
use serde_json::Value;

use crate::config::CacheConfig;
use crate::controller::ControllerConfig;
use crate::relayer::Relayer;
use crate::rpc::EthRpcClient;

#[derive(Clone)]
pub struct AppState {
    pub database: DatabaseConnection,
    pub cache: Arc<ApiCache>,
    pub rpc: EthRpcClient,
    pub relayer: Arc<Relayer>,
    /// Deployment constants shared with the faucet handlers: expected
    /// chain, cooldown, labels, explorer URL.
    pub settings: ControllerConfig,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        database: DatabaseConnection,
        cache: Arc<ApiCache>,
        rpc: EthRpcClient,
        relayer: Arc<Relayer>,
        settings: ControllerConfig,
    ) -> Self {
        assert!(
            settings.expected_chain_id > 0,
            "Expected chain id must be configured"
        );
        assert!(
            settings.cooldown > chrono::Duration::zero(),
            "Cooldown must be positive"
        );
        Self {
            database,
            cache,
            rpc,
            relayer,
            settings,
            start_time: Instant::now(),
        }
    }
}

pub struct ApiCache {
    pub faucet_status: Cache<String, Value>,
    pub status_capacity: u64,
}

impl ApiCache {
    pub fn new(config: &CacheConfig) -> Self {
        assert!(
            config.status_max_capacity >= 1,
            "Status cache capacity threshold"
        );

        let faucet_status = Cache::builder()
            .max_capacity(config.status_max_capacity)
            .time_to_live(Duration::from_secs(config.status_ttl_seconds))
            .build();

        Self {
            faucet_status,
            status_capacity: config.status_max_capacity,
        }
    }
}

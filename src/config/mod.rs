use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, ConfigError, File, FileFormat};
use serde::Deserialize;

use crate::address::Address;
use crate::controller::ControllerConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct FaucetConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub chain: ChainConfig,
    pub faucet: FaucetSettings,
    pub cache: CacheConfig,
}

impl FaucetConfig {
    pub fn load() -> Result<Self> {
        let configured_path = std::env::var("TUSDC_FAUCET_CONFIG")
            .unwrap_or_else(|_| "config/faucet.toml".to_string());
        assert!(
            !configured_path.is_empty(),
            "Configuration path must be non-empty"
        );
        assert!(
            configured_path.len() < 4096,
            "Configuration path length exceeds hard limit"
        );

        let mut builder = Config::builder()
            .add_source(File::new(&configured_path, FileFormat::Toml).required(true));

        if let Ok(env_override) = std::env::var("TUSDC_FAUCET_ENV") {
            if !env_override.is_empty() {
                let env_file = format!("config/faucet.{}.toml", env_override);
                if Path::new(&env_file).exists() {
                    builder = builder.add_source(File::new(&env_file, FileFormat::Toml));
                }
            }
        }

        let settings = builder
            .build()
            .map_err(|err| map_config_error(err, &configured_path))?;
        let mut config: Self = settings
            .try_deserialize()
            .context("Failed to deserialize faucet configuration")?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&mut self) -> Result<()> {
        assert!(
            !self.database.url.is_empty(),
            "Database URL must be specified"
        );
        assert!(
            self.server.port > 0,
            "Server port must be greater than zero"
        );
        assert!(
            self.chain.expected_chain_id > 0,
            "Expected chain id must be configured"
        );
        assert!(
            !self.chain.network_name.is_empty(),
            "Network name must be specified"
        );
        assert!(
            !self.chain.explorer_base_url.is_empty(),
            "Explorer base URL must be specified"
        );
        self.faucet.ensure_bounds()?;
        self.cache.ensure_bounds()?;
        Ok(())
    }

    /// The deployment-fixed slice of configuration the request controller
    /// is constructed with.
    pub fn controller(&self) -> ControllerConfig {
        ControllerConfig {
            expected_chain_id: self.chain.expected_chain_id,
            network_name: self.chain.network_name.clone(),
            cooldown: self.faucet.cooldown(),
            faucet_address: self.faucet.contract_address.clone(),
            explorer_base_url: self.chain.explorer_base_url.clone(),
            request_amount_label: self.faucet.request_amount_label.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: Option<IpAddr>,
    pub port: u16,
}

impl ServerConfig {
    pub fn address(&self) -> SocketAddr {
        let host = self.host.unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert!(self.port != 0, "HTTP port cannot be zero");
        assert!(self.port < 65535, "HTTP port must be below 65535");
        SocketAddr::new(host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub rpc_url: String,
    pub request_timeout_ms: Option<u64>,
    pub expected_chain_id: u64,
    pub network_name: String,
    pub explorer_base_url: String,
}

impl ChainConfig {
    pub fn request_timeout(&self) -> Duration {
        let millis = self.request_timeout_ms.unwrap_or(3_000);
        assert!(millis >= 100, "RPC timeout must be at least 100ms");
        assert!(millis <= 60_000, "RPC timeout cannot exceed 60 seconds");
        Duration::from_millis(millis)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FaucetSettings {
    pub contract_address: Address,
    pub request_amount_label: String,
    pub cooldown_hours: i64,
    #[serde(default = "FaucetSettings::default_relay_key_env")]
    pub relay_key_env: String,
}

impl FaucetSettings {
    pub fn cooldown(&self) -> chrono::Duration {
        assert!(self.cooldown_hours > 0, "Cooldown invariant broken");
        chrono::Duration::hours(self.cooldown_hours)
    }

    fn ensure_bounds(&self) -> Result<()> {
        assert!(self.cooldown_hours > 0, "Cooldown must be positive");
        assert!(
            self.cooldown_hours <= 720,
            "Cooldown exceeds defensive limit of 30 days"
        );
        assert!(
            !self.request_amount_label.is_empty(),
            "Request amount label must be specified"
        );
        assert!(
            !self.relay_key_env.is_empty(),
            "Relay key environment variable name must be specified"
        );
        Ok(())
    }

    fn default_relay_key_env() -> String {
        "FAUCET_RELAY_KEY".to_string()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub status_max_capacity: u64,
    pub status_ttl_seconds: u64,
}

impl CacheConfig {
    fn ensure_bounds(&self) -> Result<()> {
        assert!(
            self.status_max_capacity >= 1,
            "Status cache needs at least one slot"
        );
        assert!(
            self.status_ttl_seconds >= 1,
            "Status cache TTL must be at least one second"
        );
        assert!(
            self.status_ttl_seconds <= 3_600,
            "Status cache TTL cannot exceed one hour"
        );
        Ok(())
    }
}

fn map_config_error(err: ConfigError, path: &str) -> ConfigError {
    match err {
        ConfigError::NotFound(_) => ConfigError::NotFound(path.to_string()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn controller_slice_carries_the_deployment_constants() {
        let mut config = FaucetConfig {
            server: ServerConfig {
                host: None,
                port: 5000,
            },
            database: DatabaseConfig {
                url: "postgres://localhost/faucet".to_string(),
                max_connections: 8,
                min_connections: None,
            },
            chain: ChainConfig {
                rpc_url: "https://rpc.sepolia.org".to_string(),
                request_timeout_ms: None,
                expected_chain_id: 11_155_111,
                network_name: "Sepolia Testnet".to_string(),
                explorer_base_url: "https://sepolia.etherscan.io".to_string(),
            },
            faucet: FaucetSettings {
                contract_address: Address::parse("0x2cF83E27ff8AEfBb9e58aE328c5217fAf68a4BAE")
                    .expect("contract"),
                request_amount_label: "Request 1000 tUSDC".to_string(),
                cooldown_hours: 24,
                relay_key_env: FaucetSettings::default_relay_key_env(),
            },
            cache: CacheConfig {
                status_max_capacity: 4,
                status_ttl_seconds: 15,
            },
        };
        config.validate().expect("valid configuration");

        let controller = config.controller();
        assert_eq!(controller.expected_chain_id, 11_155_111);
        assert_eq!(controller.cooldown, chrono::Duration::hours(24));
        assert_eq!(controller.request_amount_label, "Request 1000 tUSDC");
        assert_eq!(
            config.server.address().to_string(),
            "127.0.0.1:5000"
        );
        assert_eq!(config.chain.request_timeout(), Duration::from_secs(3));
    }
}

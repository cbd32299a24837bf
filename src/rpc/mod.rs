use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use jsonrpsee::core::client::ClientT;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use serde::Deserialize;

use crate::address::TxHash;

/// Thin client over the standard Ethereum JSON-RPC surface the relay
/// needs. Quantities arrive as `0x`-prefixed hex strings.
#[derive(Clone)]
pub struct EthRpcClient {
    inner: HttpClient,
    timeout: Duration,
}

impl EthRpcClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        assert!(!endpoint.is_empty(), "RPC endpoint must be provided");
        assert!(
            timeout >= Duration::from_millis(100),
            "Timeout below 100ms is unsafe"
        );

        let client = HttpClientBuilder::default()
            .request_timeout(timeout)
            .build(endpoint)
            .with_context(|| format!("Failed to build RPC client for {endpoint}"))?;

        Ok(Self {
            inner: client,
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        assert!(
            self.timeout >= Duration::from_millis(100),
            "Timeout invariant broken"
        );
        assert!(
            self.timeout <= Duration::from_secs(60),
            "Timeout exceeds maximum bound"
        );
        self.timeout
    }

    pub async fn chain_id(&self) -> Result<u64> {
        let raw: String = self
            .inner
            .request("eth_chainId", rpc_params![])
            .await
            .context("RPC call eth_chainId failed")?;
        decode_quantity(&raw)
    }

    /// Pending-inclusive transaction count; used as the nonce for the next
    /// relay submission.
    pub async fn transaction_count(&self, address: &str) -> Result<u64> {
        assert!(!address.is_empty(), "Account address must be provided");
        let raw: String = self
            .inner
            .request("eth_getTransactionCount", rpc_params![address, "pending"])
            .await
            .context("RPC call eth_getTransactionCount failed")?;
        decode_quantity(&raw)
    }

    pub async fn send_raw_transaction(&self, raw_tx: &str) -> Result<TxHash> {
        assert!(
            raw_tx.starts_with("0x"),
            "Raw transaction must be 0x-prefixed hex"
        );
        let hash: String = self
            .inner
            .request("eth_sendRawTransaction", rpc_params![raw_tx])
            .await
            .context("RPC call eth_sendRawTransaction failed")?;
        if hash.is_empty() {
            return Err(anyhow!("RPC returned an empty transaction hash"));
        }
        Ok(TxHash::new(hash))
    }

    /// `None` until the transaction is mined.
    pub async fn transaction_receipt(&self, hash: &TxHash) -> Result<Option<EthReceipt>> {
        let receipt: Option<EthReceipt> = self
            .inner
            .request("eth_getTransactionReceipt", rpc_params![hash.as_str()])
            .await
            .context("RPC call eth_getTransactionReceipt failed")?;
        Ok(receipt)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EthReceipt {
    pub transaction_hash: String,
    pub block_number: Option<String>,
    /// `0x1` for success, `0x0` for a revert (post-Byzantium).
    pub status: Option<String>,
}

impl EthReceipt {
    pub fn succeeded(&self) -> bool {
        matches!(self.status.as_deref(), Some("0x1") | Some("0x01"))
    }
}

fn decode_quantity(raw: &str) -> Result<u64> {
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .ok_or_else(|| anyhow!("RPC quantity {raw:?} is missing the 0x prefix"))?;
    if digits.is_empty() {
        return Err(anyhow!("RPC quantity {raw:?} has no digits"));
    }
    u64::from_str_radix(digits, 16)
        .map_err(|err| anyhow!("RPC quantity {raw:?} is not valid hex: {err}"))
}

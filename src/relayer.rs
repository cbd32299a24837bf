//! Server-held-key signing path for the faucet relay.
//!
//! Builds, signs and submits the zero-argument `requestTokens()` call as an
//! EIP-1559 transaction, then polls for the receipt. Gas limits and fee
//! caps are fixed constants; the nonce is read fresh per submission.

use std::str::FromStr;
use std::time::Duration;

use alloy_consensus::{SignableTransaction, TxEip1559, TxEnvelope};
use alloy_eips::eip2718::Encodable2718;
use alloy_primitives::{Address as EvmAddress, Bytes, TxKind, U256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::address::TxHash;
use crate::dispatch::request_tokens_calldata;
use crate::rpc::{EthRpcClient, EthReceipt};

/// Generous bound for a mint-and-transfer; the call reverts long before
/// this on a drained faucet.
pub const RELAY_GAS_LIMIT: u64 = 120_000;
pub const RELAY_MAX_FEE_PER_GAS: u128 = 100_000_000_000;
pub const RELAY_MAX_PRIORITY_FEE_PER_GAS: u128 = 1_500_000_000;

pub const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(3);
pub const RECEIPT_POLL_ATTEMPTS: u32 = 40;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay signing key is invalid: {0}")]
    InvalidKey(String),
    #[error("faucet contract address is malformed: {0}")]
    InvalidContract(String),
    #[error("submission failed: {0}")]
    Submission(String),
    #[error("RPC error while awaiting receipt: {0}")]
    Receipt(String),
    #[error("transaction {0} reverted on-chain")]
    Reverted(TxHash),
    #[error("timed out waiting for transaction {0} to be mined")]
    ConfirmationTimeout(TxHash),
}

pub struct Relayer {
    signer: PrivateKeySigner,
    sender: EvmAddress,
    rpc: EthRpcClient,
    chain_id: u64,
    faucet: EvmAddress,
}

impl Relayer {
    pub fn new(
        key_hex: &str,
        rpc: EthRpcClient,
        chain_id: u64,
        faucet_address: &str,
    ) -> Result<Self, RelayError> {
        assert!(chain_id > 0, "Chain id must be configured");
        let signer = PrivateKeySigner::from_str(key_hex.trim())
            .map_err(|err| RelayError::InvalidKey(err.to_string()))?;
        let faucet = EvmAddress::from_str(faucet_address)
            .map_err(|err| RelayError::InvalidContract(err.to_string()))?;
        let sender = signer.address();
        Ok(Self {
            signer,
            sender,
            rpc,
            chain_id,
            faucet,
        })
    }

    pub fn sender(&self) -> EvmAddress {
        self.sender
    }

    pub fn faucet(&self) -> EvmAddress {
        self.faucet
    }

    /// Signs and submits the call; resolves once the chain has accepted it
    /// and handed back a transaction hash.
    pub async fn submit_request(&self) -> Result<TxHash, RelayError> {
        let nonce = self
            .rpc
            .transaction_count(&self.sender.to_string())
            .await
            .map_err(|err| RelayError::Submission(err.to_string()))?;

        let calldata = request_tokens_calldata();
        let input = hex::decode(&calldata[2..])
            .map_err(|err| RelayError::Submission(format!("calldata encoding: {err}")))?;

        let tx = TxEip1559 {
            chain_id: self.chain_id,
            nonce,
            gas_limit: RELAY_GAS_LIMIT,
            max_fee_per_gas: RELAY_MAX_FEE_PER_GAS,
            max_priority_fee_per_gas: RELAY_MAX_PRIORITY_FEE_PER_GAS,
            to: TxKind::Call(self.faucet),
            value: U256::ZERO,
            access_list: Default::default(),
            input: Bytes::from(input),
        };

        let signature = self
            .signer
            .sign_hash_sync(&tx.signature_hash())
            .map_err(|err| RelayError::Submission(err.to_string()))?;
        let envelope = TxEnvelope::Eip1559(tx.into_signed(signature));
        let raw = format!("0x{}", hex::encode(envelope.encoded_2718()));

        let hash = self
            .rpc
            .send_raw_transaction(&raw)
            .await
            .map_err(|err| RelayError::Submission(err.to_string()))?;
        info!("Relayed faucet call as {hash} (nonce {nonce})");
        Ok(hash)
    }

    /// Polls until the transaction is mined; a revert or exhausted polling
    /// budget is an error.
    pub async fn wait_for_receipt(&self, hash: &TxHash) -> Result<EthReceipt, RelayError> {
        for attempt in 0..RECEIPT_POLL_ATTEMPTS {
            if attempt > 0 {
                sleep(RECEIPT_POLL_INTERVAL).await;
            }
            match self.rpc.transaction_receipt(hash).await {
                Ok(Some(receipt)) if receipt.succeeded() => return Ok(receipt),
                Ok(Some(_)) => return Err(RelayError::Reverted(hash.clone())),
                Ok(None) => debug!("Transaction {hash} not mined yet (attempt {attempt})"),
                Err(err) => return Err(RelayError::Receipt(err.to_string())),
            }
        }
        Err(RelayError::ConfirmationTimeout(hash.clone()))
    }

    /// Submission plus the internal wait: the full server-side request.
    pub async fn request_tokens(&self) -> Result<TxHash, RelayError> {
        let hash = self.submit_request().await?;
        self.wait_for_receipt(&hash).await?;
        Ok(hash)
    }
}

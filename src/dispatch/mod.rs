//! Faucet call boundary.
//!
//! The controller drives a [`FaucetDispatcher`] through two sequential
//! suspension points: submission (a transaction identifier becomes
//! available) and confirmation (the outcome is authoritatively known).
//! Exactly one implementation is wired per deployment.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::keccak256;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::sleep;
use tracing::debug;

use crate::address::{Address, TxHash};
use crate::wallet::{CallRequest, ProviderError, WalletProvider};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("the user rejected the transaction prompt")]
    Rejected,
    #[error("submission failed: {0}")]
    Submission(String),
    #[error("transaction did not finalize successfully: {0}")]
    Confirmation(String),
    #[error("faucet relay returned {status}: {message}")]
    Relay { status: u16, message: String },
}

pub trait FaucetDispatcher: Send + Sync {
    /// Submits the token request. Resolves as soon as the external call
    /// accepts it and a transaction identifier exists.
    fn submit(
        &self,
        recipient: &Address,
    ) -> impl Future<Output = Result<TxHash, DispatchError>> + Send;

    /// Waits for finality of a previously submitted request.
    fn confirm(&self, hash: &TxHash) -> impl Future<Output = Result<(), DispatchError>> + Send;
}

/// The faucet contract entry point: a single zero-argument state-changing
/// call that mints to the caller.
pub const REQUEST_TOKENS_SIGNATURE: &str = "requestTokens()";

/// `0x`-prefixed 4-byte selector calldata for [`REQUEST_TOKENS_SIGNATURE`].
pub fn request_tokens_calldata() -> String {
    let digest = keccak256(REQUEST_TOKENS_SIGNATURE.as_bytes());
    format!("0x{}", hex::encode(&digest[..4]))
}

/// Server-relayed mechanism: `POST /api/faucet` with the target address,
/// performed by a backend holding the signing key. The relay waits for the
/// receipt before responding, so acceptance and finality arrive together.
pub struct RelayDispatcher {
    http: reqwest::Client,
    endpoint: String,
}

#[derive(Debug, Serialize)]
struct RelayRequestBody<'a> {
    address: &'a str,
}

#[derive(Debug, Deserialize)]
struct RelayResponseBody {
    success: bool,
    #[serde(rename = "txHash")]
    tx_hash: Option<String>,
    error: Option<String>,
}

impl RelayDispatcher {
    pub fn new(base_url: &str) -> Self {
        assert!(!base_url.is_empty(), "Relay base URL must be provided");
        Self {
            http: reqwest::Client::new(),
            endpoint: format!("{}/api/faucet", base_url.trim_end_matches('/')),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn parse_relay_response(status: u16, body: &str) -> Result<TxHash, DispatchError> {
    let parsed: RelayResponseBody = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(_) => {
            // Non-JSON body, e.g. a proxy error page.
            return Err(DispatchError::Relay {
                status,
                message: body.chars().take(200).collect(),
            });
        }
    };

    if !(200..300).contains(&status) || !parsed.success {
        return Err(DispatchError::Relay {
            status,
            message: parsed
                .error
                .unwrap_or_else(|| "faucet relay request failed".to_string()),
        });
    }

    match parsed.tx_hash {
        Some(hash) if !hash.is_empty() => Ok(TxHash::new(hash)),
        _ => Err(DispatchError::Submission(
            "relay response is missing txHash".to_string(),
        )),
    }
}

impl FaucetDispatcher for RelayDispatcher {
    async fn submit(&self, recipient: &Address) -> Result<TxHash, DispatchError> {
        debug!("Relaying faucet request for {recipient} via {}", self.endpoint);
        let response = self
            .http
            .post(&self.endpoint)
            .json(&RelayRequestBody {
                address: recipient.as_str(),
            })
            .send()
            .await
            .map_err(|err| DispatchError::Submission(err.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|err| DispatchError::Submission(err.to_string()))?;
        parse_relay_response(status, &body)
    }

    async fn confirm(&self, _hash: &TxHash) -> Result<(), DispatchError> {
        // The relay only responds once the receipt is in.
        Ok(())
    }
}

/// Client-signed mechanism: the connected wallet signs the zero-argument
/// `requestTokens()` call against the faucet contract, then the receipt is
/// polled for a bounded number of attempts.
pub struct WalletDispatcher<P> {
    provider: Arc<P>,
    faucet_address: Address,
    poll_interval: Duration,
    poll_attempts: u32,
}

impl<P: WalletProvider> WalletDispatcher<P> {
    pub fn new(provider: Arc<P>, faucet_address: Address) -> Self {
        Self::with_polling(provider, faucet_address, Duration::from_secs(4), 45)
    }

    pub fn with_polling(
        provider: Arc<P>,
        faucet_address: Address,
        poll_interval: Duration,
        poll_attempts: u32,
    ) -> Self {
        assert!(poll_attempts > 0, "Receipt polling needs at least one attempt");
        Self {
            provider,
            faucet_address,
            poll_interval,
            poll_attempts,
        }
    }
}

impl<P: WalletProvider> FaucetDispatcher for WalletDispatcher<P> {
    async fn submit(&self, recipient: &Address) -> Result<TxHash, DispatchError> {
        // The contract mints to the caller, so the connected wallet address
        // doubles as the recipient.
        let call = CallRequest {
            from: Some(recipient.clone()),
            to: self.faucet_address.clone(),
            data: request_tokens_calldata(),
        };
        self.provider
            .send_transaction(call)
            .await
            .map_err(|err| match err {
                ProviderError::UserRejected => DispatchError::Rejected,
                other => DispatchError::Submission(other.to_string()),
            })
    }

    async fn confirm(&self, hash: &TxHash) -> Result<(), DispatchError> {
        for attempt in 0..self.poll_attempts {
            if attempt > 0 {
                sleep(self.poll_interval).await;
            }
            match self.provider.transaction_receipt(hash).await {
                Ok(Some(receipt)) if receipt.success => return Ok(()),
                Ok(Some(_)) => {
                    return Err(DispatchError::Confirmation(format!(
                        "transaction {hash} reverted on-chain"
                    )));
                }
                Ok(None) => {}
                Err(err) => return Err(DispatchError::Confirmation(err.to_string())),
            }
        }
        Err(DispatchError::Confirmation(format!(
            "timed out waiting for transaction {hash} to be mined"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::TxReceipt;
    use crate::wallet::mock::MockProvider;

    const ACCOUNT: &str = "0x2cF83E27ff8AEfBb9e58aE328c5217fAf68a4BAE";
    const FAUCET: &str = "0x2cF83E27ff8AEfBb9e58aE328c5217fAf68a4BAE";

    fn account() -> Address {
        Address::parse(ACCOUNT).expect("account")
    }

    #[test]
    fn calldata_is_a_four_byte_selector() {
        let calldata = request_tokens_calldata();
        assert_eq!(calldata.len(), 10);
        assert!(calldata.starts_with("0x"));
        assert!(calldata[2..].bytes().all(|b| b.is_ascii_hexdigit()));
        // Deterministic across calls.
        assert_eq!(calldata, request_tokens_calldata());
    }

    #[test]
    fn relay_response_parsing() {
        let ok = parse_relay_response(200, r#"{"success":true,"txHash":"0xabc"}"#)
            .expect("accepted response");
        assert_eq!(ok.as_str(), "0xabc");

        let err = parse_relay_response(500, r#"{"success":false,"error":"out of funds"}"#)
            .unwrap_err();
        assert_eq!(
            err,
            DispatchError::Relay {
                status: 500,
                message: "out of funds".to_string()
            }
        );

        // 200 body that still reports failure.
        assert!(matches!(
            parse_relay_response(200, r#"{"success":false,"error":"nope"}"#),
            Err(DispatchError::Relay { status: 200, .. })
        ));

        // Accepted but missing the hash.
        assert!(matches!(
            parse_relay_response(200, r#"{"success":true}"#),
            Err(DispatchError::Submission(_))
        ));

        // Proxy error page.
        assert!(matches!(
            parse_relay_response(502, "<html>Bad Gateway</html>"),
            Err(DispatchError::Relay { status: 502, .. })
        ));
    }

    #[tokio::test]
    async fn wallet_dispatch_signs_the_zero_argument_call() {
        let provider = Arc::new(MockProvider::new("0xaa36a7"));
        provider.receipts.lock().expect("receipts").push_back(Some(TxReceipt {
            success: true,
            block_number: Some(1),
        }));

        let dispatcher = WalletDispatcher::with_polling(
            Arc::clone(&provider),
            Address::parse(FAUCET).expect("faucet"),
            Duration::from_millis(1),
            3,
        );

        let hash = dispatcher.submit(&account()).await.expect("submit");
        dispatcher.confirm(&hash).await.expect("confirm");

        let sent = provider.sent.lock().expect("sent");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].data, request_tokens_calldata());
        assert_eq!(sent[0].from, Some(account()));
    }

    #[tokio::test]
    async fn reverted_receipt_is_a_confirmation_failure() {
        let provider = Arc::new(MockProvider::new("0xaa36a7"));
        provider.receipts.lock().expect("receipts").push_back(Some(TxReceipt {
            success: false,
            block_number: Some(2),
        }));

        let dispatcher = WalletDispatcher::with_polling(
            Arc::clone(&provider),
            Address::parse(FAUCET).expect("faucet"),
            Duration::from_millis(1),
            3,
        );
        let hash = dispatcher.submit(&account()).await.expect("submit");
        assert!(matches!(
            dispatcher.confirm(&hash).await,
            Err(DispatchError::Confirmation(_))
        ));
    }

    #[tokio::test]
    async fn declined_prompt_maps_to_rejected() {
        let mut provider = MockProvider::new("0xaa36a7");
        provider.reject_transaction = true;
        let dispatcher = WalletDispatcher::with_polling(
            Arc::new(provider),
            Address::parse(FAUCET).expect("faucet"),
            Duration::from_millis(1),
            1,
        );
        assert_eq!(
            dispatcher.submit(&account()).await.unwrap_err(),
            DispatchError::Rejected
        );
    }

    #[tokio::test]
    async fn missing_receipt_times_out() {
        let provider = Arc::new(MockProvider::new("0xaa36a7"));
        let dispatcher = WalletDispatcher::with_polling(
            Arc::clone(&provider),
            Address::parse(FAUCET).expect("faucet"),
            Duration::from_millis(1),
            2,
        );
        let hash = dispatcher.submit(&account()).await.expect("submit");
        let err = dispatcher.confirm(&hash).await.unwrap_err();
        assert!(matches!(err, DispatchError::Confirmation(message) if message.contains("timed out")));
    }
}

//! Faucet request controller.
//!
//! Reconciles wallet state, network state and the per-address cooldown into
//! a single eligibility decision, and drives the one external side effect
//! (submitting the token request) through its lifecycle. All transitions are
//! sequential reactions to discrete events; at most one request is in
//! flight per controller instance.

use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::address::{Address, TxHash};
use crate::dispatch::FaucetDispatcher;
use crate::ratelimit::RateLimitTracker;
use crate::store::{KeyValueStore, StoreError};
use crate::wallet::{ProviderError, decode_chain_id};

/// Deployment-fixed settings handed to the controller at construction.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub expected_chain_id: u64,
    pub network_name: String,
    pub cooldown: Duration,
    pub faucet_address: Address,
    pub explorer_base_url: String,
    pub request_amount_label: String,
}

impl ControllerConfig {
    pub fn explorer_tx_url(&self, hash: &TxHash) -> String {
        format!("{}/tx/{}", self.explorer_base_url.trim_end_matches('/'), hash)
    }
}

/// Transaction lifecycle. The hash exists from the moment the external call
/// accepts the request; an error message exists only in `Error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    Idle,
    Pending { tx_hash: Option<TxHash> },
    Success { tx_hash: TxHash },
    Error { message: String },
}

impl TxStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, TxStatus::Pending { .. })
    }

    pub fn tx_hash(&self) -> Option<&TxHash> {
        match self {
            TxStatus::Pending { tx_hash } => tx_hash.as_ref(),
            TxStatus::Success { tx_hash } => Some(tx_hash),
            TxStatus::Idle | TxStatus::Error { .. } => None,
        }
    }
}

/// "No observation yet" is deliberately distinct from "wrong network":
/// a disconnected environment must not read as a chain mismatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    Unknown,
    Correct,
    Wrong(u64),
}

/// Why a request may not proceed right now, or `Ready` if it may.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    Ready,
    RequestInFlight,
    InvalidAddress,
    RateLimited { until: DateTime<Utc> },
    NetworkUnknown,
    WrongNetwork { observed: u64 },
}

pub struct FaucetController<D, S> {
    config: ControllerConfig,
    dispatcher: D,
    limiter: RateLimitTracker<S>,
    wallet_address: Option<Address>,
    manual_entry: String,
    observed_chain: Option<u64>,
    status: watch::Sender<TxStatus>,
}

impl<D, S> FaucetController<D, S>
where
    D: FaucetDispatcher,
    S: KeyValueStore,
{
    pub fn new(config: ControllerConfig, dispatcher: D, store: S) -> Self {
        assert!(
            config.expected_chain_id > 0,
            "Expected chain id must be configured"
        );
        let limiter = RateLimitTracker::new(store, config.cooldown);
        let (status, _) = watch::channel(TxStatus::Idle);
        Self {
            config,
            dispatcher,
            limiter,
            wallet_address: None,
            manual_entry: String::new(),
            observed_chain: None,
            status,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn rate_limiter(&self) -> &RateLimitTracker<S> {
        &self.limiter
    }

    /// Snapshot of the live transaction state.
    pub fn status(&self) -> TxStatus {
        self.status.borrow().clone()
    }

    /// Watch the transaction state; the hash becomes visible to receivers
    /// the moment submission is accepted, while the request stays pending.
    pub fn subscribe(&self) -> watch::Receiver<TxStatus> {
        self.status.subscribe()
    }

    // ------------------------------------------------------------------
    // Observed inputs
    // ------------------------------------------------------------------

    /// Feed from the account-change subscription; an empty set is a
    /// disconnection.
    pub fn observed_accounts(&mut self, accounts: &[Address]) {
        self.wallet_address = accounts.first().cloned();
    }

    pub fn observed_chain(&mut self, chain_id: u64) {
        self.observed_chain = Some(chain_id);
    }

    /// Feed from the provider-native chain notification (hex string).
    pub fn observed_chain_hex(&mut self, raw: &str) -> Result<(), ProviderError> {
        let chain_id = decode_chain_id(raw)?;
        self.observed_chain = Some(chain_id);
        Ok(())
    }

    /// Manually entered target for wallet-less deployments. The connected
    /// wallet address always takes precedence.
    pub fn set_manual_address(&mut self, input: &str) {
        self.manual_entry = input.trim().to_string();
    }

    /// Local-only disconnect: clears the held address, keeps the chain
    /// observation (the provider is still there).
    pub fn disconnect(&mut self) {
        self.wallet_address = None;
    }

    pub fn wallet_address(&self) -> Option<&Address> {
        self.wallet_address.as_ref()
    }

    /// Connected wallet address if present, otherwise the parsed manual
    /// entry.
    pub fn target_address(&self) -> Option<Address> {
        if let Some(address) = &self.wallet_address {
            return Some(address.clone());
        }
        Address::parse(&self.manual_entry).ok()
    }

    pub fn network_status(&self) -> NetworkStatus {
        match self.observed_chain {
            None => NetworkStatus::Unknown,
            Some(id) if id == self.config.expected_chain_id => NetworkStatus::Correct,
            Some(id) => NetworkStatus::Wrong(id),
        }
    }

    // ------------------------------------------------------------------
    // Eligibility
    // ------------------------------------------------------------------

    pub async fn eligibility(&self, now: DateTime<Utc>) -> Result<Eligibility, StoreError> {
        if self.status.borrow().is_pending() {
            return Ok(Eligibility::RequestInFlight);
        }
        let Some(target) = self.target_address() else {
            return Ok(Eligibility::InvalidAddress);
        };
        if let Some(until) = self.limiter.next_available_time(&target, now).await? {
            return Ok(Eligibility::RateLimited { until });
        }
        match self.network_status() {
            NetworkStatus::Unknown => Ok(Eligibility::NetworkUnknown),
            NetworkStatus::Wrong(observed) => Ok(Eligibility::WrongNetwork { observed }),
            NetworkStatus::Correct => Ok(Eligibility::Ready),
        }
    }

    pub async fn can_request(&self, now: DateTime<Utc>) -> Result<bool, StoreError> {
        Ok(self.eligibility(now).await? == Eligibility::Ready)
    }

    /// Label for the request action in the current state.
    pub async fn action_label(&self, now: DateTime<Utc>) -> Result<String, StoreError> {
        let label = match self.eligibility(now).await? {
            Eligibility::RequestInFlight => "Processing...".to_string(),
            Eligibility::RateLimited { .. } => "Rate Limited".to_string(),
            Eligibility::InvalidAddress => "Enter Valid Address".to_string(),
            Eligibility::NetworkUnknown => "Network Unknown".to_string(),
            Eligibility::WrongNetwork { .. } => "Wrong Network".to_string(),
            Eligibility::Ready => self.config.request_amount_label.clone(),
        };
        Ok(label)
    }

    /// Instruction shown alongside the action when the chain is wrong.
    pub fn network_hint(&self) -> Option<String> {
        match self.network_status() {
            NetworkStatus::Wrong(_) => Some(format!(
                "Please switch to {} to request tokens",
                self.config.network_name
            )),
            NetworkStatus::Unknown | NetworkStatus::Correct => None,
        }
    }

    // ------------------------------------------------------------------
    // The request lifecycle
    // ------------------------------------------------------------------

    /// Runs one token request to completion or failure.
    ///
    /// A no-op when not eligible: the presentation layer is expected to
    /// have disabled the action, and the controller re-validates anyway.
    /// Failures land in `TxStatus::Error` rather than being returned; only
    /// the storage capability can surface an `Err` here.
    pub async fn request_tokens(&mut self) -> Result<(), StoreError> {
        let now = Utc::now();
        match self.eligibility(now).await? {
            Eligibility::Ready => {}
            blocked => {
                debug!("Ignoring token request while not eligible: {blocked:?}");
                return Ok(());
            }
        }
        let Some(target) = self.target_address() else {
            return Ok(());
        };

        self.status.send_replace(TxStatus::Pending { tx_hash: None });
        info!("Requesting faucet tokens for {target}");

        let tx_hash = match self.dispatcher.submit(&target).await {
            Ok(tx_hash) => tx_hash,
            Err(err) => {
                self.fail(err.to_string());
                return Ok(());
            }
        };

        // Accepted: expose the identifier, stay pending until finality.
        self.status.send_replace(TxStatus::Pending {
            tx_hash: Some(tx_hash.clone()),
        });
        debug!("Faucet request accepted with hash {tx_hash}");

        match self.dispatcher.confirm(&tx_hash).await {
            Ok(()) => {
                info!(
                    "Faucet request confirmed: {}",
                    self.config.explorer_tx_url(&tx_hash)
                );
                self.status.send_replace(TxStatus::Success { tx_hash });
                if let Err(err) = self.limiter.record_request(&target, Utc::now()).await {
                    // The request itself succeeded; losing the cooldown
                    // record only allows an early retry.
                    error!("Failed to persist rate-limit record for {target}: {err}");
                    return Err(err);
                }
            }
            Err(err) => self.fail(err.to_string()),
        }
        Ok(())
    }

    /// Acknowledges a finished attempt. Valid from `Success` and `Error`;
    /// a no-op from `Idle`; never leaves `Pending`.
    pub fn dismiss(&mut self) {
        let dismissible = matches!(
            &*self.status.borrow(),
            TxStatus::Success { .. } | TxStatus::Error { .. }
        );
        if dismissible {
            self.status.send_replace(TxStatus::Idle);
        }
    }

    fn fail(&mut self, message: String) {
        assert!(!message.is_empty(), "Error transitions need a message");
        warn!("Faucet request failed: {message}");
        self.status.send_replace(TxStatus::Error { message });
    }

    #[cfg(test)]
    pub(crate) fn force_status(&mut self, status: TxStatus) {
        self.status.send_replace(status);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::dispatch::DispatchError;
    use crate::ratelimit::storage_key;
    use crate::store::MemoryStore;

    const ACCOUNT: &str = "0x2cF83E27ff8AEfBb9e58aE328c5217fAf68a4BAE";
    const FAUCET: &str = "0x0000000000000000000000000000000000000001";
    const SEPOLIA: u64 = 11_155_111;

    /// Scripted dispatcher: each submit/confirm pops the next outcome.
    #[derive(Default)]
    struct ScriptedDispatcher {
        submit_error: Option<DispatchError>,
        confirm_error: Option<DispatchError>,
        submissions: Mutex<Vec<Address>>,
    }

    impl FaucetDispatcher for ScriptedDispatcher {
        async fn submit(&self, recipient: &Address) -> Result<TxHash, DispatchError> {
            if let Some(err) = &self.submit_error {
                return Err(err.clone());
            }
            self.submissions
                .lock()
                .expect("submissions")
                .push(recipient.clone());
            Ok(TxHash::new(format!("0x{}", "cd".repeat(32))))
        }

        async fn confirm(&self, _hash: &TxHash) -> Result<(), DispatchError> {
            match &self.confirm_error {
                Some(err) => Err(err.clone()),
                None => Ok(()),
            }
        }
    }

    fn config() -> ControllerConfig {
        ControllerConfig {
            expected_chain_id: SEPOLIA,
            network_name: "Sepolia Testnet".to_string(),
            cooldown: Duration::hours(24),
            faucet_address: Address::parse(FAUCET).expect("faucet"),
            explorer_base_url: "https://sepolia.etherscan.io".to_string(),
            request_amount_label: "Request 1000 tUSDC".to_string(),
        }
    }

    fn controller(
        dispatcher: ScriptedDispatcher,
    ) -> FaucetController<ScriptedDispatcher, MemoryStore> {
        FaucetController::new(config(), dispatcher, MemoryStore::new())
    }

    fn account() -> Address {
        Address::parse(ACCOUNT).expect("account")
    }

    #[tokio::test]
    async fn disconnected_with_empty_entry_wants_an_address() {
        let controller = controller(ScriptedDispatcher::default());
        let now = Utc::now();
        assert_eq!(
            controller.eligibility(now).await.expect("eligibility"),
            Eligibility::InvalidAddress
        );
        assert_eq!(
            controller.action_label(now).await.expect("label"),
            "Enter Valid Address"
        );
        assert!(!controller.can_request(now).await.expect("can_request"));
    }

    #[tokio::test]
    async fn connected_on_expected_chain_is_ready() {
        let mut controller = controller(ScriptedDispatcher::default());
        controller.observed_accounts(&[account()]);
        controller.observed_chain(SEPOLIA);
        let now = Utc::now();
        assert!(controller.can_request(now).await.expect("can_request"));
        assert_eq!(
            controller.action_label(now).await.expect("label"),
            "Request 1000 tUSDC"
        );
        assert_eq!(controller.network_hint(), None);
    }

    #[tokio::test]
    async fn chain_mismatch_blocks_with_a_switch_instruction() {
        let mut controller = controller(ScriptedDispatcher::default());
        controller.observed_accounts(&[account()]);
        controller.observed_chain_hex("0x1").expect("decode");
        let now = Utc::now();
        assert_eq!(
            controller.eligibility(now).await.expect("eligibility"),
            Eligibility::WrongNetwork { observed: 1 }
        );
        assert_eq!(
            controller.action_label(now).await.expect("label"),
            "Wrong Network"
        );
        assert_eq!(
            controller.network_hint().expect("hint"),
            "Please switch to Sepolia Testnet to request tokens"
        );
    }

    #[tokio::test]
    async fn unobserved_network_is_not_reported_as_wrong() {
        let mut controller = controller(ScriptedDispatcher::default());
        controller.set_manual_address(ACCOUNT);
        let now = Utc::now();
        assert_eq!(
            controller.eligibility(now).await.expect("eligibility"),
            Eligibility::NetworkUnknown
        );
        assert_eq!(controller.network_hint(), None);
    }

    #[tokio::test]
    async fn confirmed_request_starts_the_cooldown() {
        let mut controller = controller(ScriptedDispatcher::default());
        controller.observed_accounts(&[account()]);
        controller.observed_chain(SEPOLIA);

        let mut watcher = controller.subscribe();
        controller.request_tokens().await.expect("request");

        let status = controller.status();
        let TxStatus::Success { tx_hash } = &status else {
            panic!("expected success, got {status:?}");
        };
        assert!(watcher.has_changed().expect("watch alive"));
        assert_eq!(watcher.borrow_and_update().tx_hash(), Some(tx_hash));
        assert_eq!(
            controller.config().explorer_tx_url(tx_hash),
            format!("https://sepolia.etherscan.io/tx/{tx_hash}")
        );

        // Cooldown active one hour in, gone after the window.
        let limiter = controller.rate_limiter();
        let in_an_hour = Utc::now() + Duration::hours(1);
        assert!(limiter.is_rate_limited(&account(), in_an_hour).await.expect("limited"));
        assert_eq!(
            controller.eligibility(in_an_hour).await.expect("eligibility"),
            match limiter
                .next_available_time(&account(), in_an_hour)
                .await
                .expect("next")
            {
                Some(until) => Eligibility::RateLimited { until },
                None => panic!("cooldown should be active"),
            }
        );
        assert!(
            !limiter
                .is_rate_limited(&account(), Utc::now() + Duration::hours(25))
                .await
                .expect("expired")
        );
    }

    #[tokio::test]
    async fn failed_request_consumes_no_cooldown() {
        let dispatcher = ScriptedDispatcher {
            confirm_error: Some(DispatchError::Confirmation("reverted".to_string())),
            ..ScriptedDispatcher::default()
        };
        let mut controller = controller(dispatcher);
        controller.observed_accounts(&[account()]);
        controller.observed_chain(SEPOLIA);

        controller.request_tokens().await.expect("request");
        let status = controller.status();
        let TxStatus::Error { message } = &status else {
            panic!("expected error, got {status:?}");
        };
        assert!(!message.is_empty());

        assert!(
            !controller
                .rate_limiter()
                .is_rate_limited(&account(), Utc::now() + Duration::seconds(1))
                .await
                .expect("not limited")
        );
        // The next attempt is immediately eligible again.
        controller.dismiss();
        assert!(controller.can_request(Utc::now()).await.expect("can_request"));
    }

    #[tokio::test]
    async fn submission_failure_reports_the_error() {
        let dispatcher = ScriptedDispatcher {
            submit_error: Some(DispatchError::Submission("rpc unreachable".to_string())),
            ..ScriptedDispatcher::default()
        };
        let mut controller = controller(dispatcher);
        controller.observed_accounts(&[account()]);
        controller.observed_chain(SEPOLIA);

        controller.request_tokens().await.expect("request");
        assert_eq!(
            controller.status(),
            TxStatus::Error {
                message: "submission failed: rpc unreachable".to_string()
            }
        );
    }

    #[tokio::test]
    async fn pending_blocks_requests_regardless_of_other_inputs() {
        let mut controller = controller(ScriptedDispatcher::default());
        controller.observed_accounts(&[account()]);
        controller.observed_chain(SEPOLIA);
        controller.force_status(TxStatus::Pending { tx_hash: None });

        let now = Utc::now();
        assert_eq!(
            controller.eligibility(now).await.expect("eligibility"),
            Eligibility::RequestInFlight
        );
        assert!(!controller.can_request(now).await.expect("can_request"));
        assert_eq!(
            controller.action_label(now).await.expect("label"),
            "Processing..."
        );

        // request_tokens is a defensive no-op and never double-submits.
        controller.request_tokens().await.expect("request");
        assert!(controller.dispatcher.submissions.lock().expect("subs").is_empty());

        // dismiss never leaves pending either.
        controller.dismiss();
        assert!(controller.status().is_pending());
    }

    #[tokio::test]
    async fn dismiss_is_idempotent_from_idle() {
        let mut controller = controller(ScriptedDispatcher::default());
        assert_eq!(controller.status(), TxStatus::Idle);
        controller.dismiss();
        assert_eq!(controller.status(), TxStatus::Idle);
    }

    #[tokio::test]
    async fn wallet_address_takes_precedence_over_manual_entry() {
        let mut controller = controller(ScriptedDispatcher::default());
        controller.set_manual_address("0x0000000000000000000000000000000000000002");
        controller.observed_accounts(&[account()]);
        assert_eq!(controller.target_address(), Some(account()));

        // Disconnection falls back to the manual entry.
        controller.observed_accounts(&[]);
        assert_eq!(
            controller.target_address().expect("manual").as_str(),
            "0x0000000000000000000000000000000000000002"
        );
    }

    #[tokio::test]
    async fn rate_limit_lookup_is_case_insensitive_through_the_controller() {
        let store = MemoryStore::new();
        let mut controller = FaucetController::new(config(), ScriptedDispatcher::default(), store);
        controller.observed_accounts(&[account()]);
        controller.observed_chain(SEPOLIA);
        controller.request_tokens().await.expect("request");

        // Same digits, different casing.
        let lower = Address::parse(&ACCOUNT.to_ascii_lowercase()).expect("lower");
        assert_eq!(storage_key(&lower), storage_key(&account()));
        assert!(
            controller
                .rate_limiter()
                .is_rate_limited(&lower, Utc::now() + Duration::hours(1))
                .await
                .expect("limited")
        );
    }
}

//! Wallet provider boundary: account access, network observation and the
//! wallet-signed transaction path.
//!
//! [`WalletProvider`] mirrors the browser wallet-injection interface the
//! faucet front ends talk to. The connector and observer are thin adapters
//! over it; everything downstream of them is provider-agnostic.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use thiserror::Error;
use tracing::warn;

use crate::address::{Address, TxHash};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// No wallet provider present in the environment. A distinct,
    /// reportable condition, not a silent empty state.
    #[error("no wallet provider detected; install a browser wallet to continue")]
    Unavailable,
    #[error("the user rejected the request")]
    UserRejected,
    #[error("wallet provider error: {0}")]
    Transport(String),
}

/// A state-changing call routed through the wallet for signing.
#[derive(Debug, Clone)]
pub struct CallRequest {
    pub from: Option<Address>,
    pub to: Address,
    /// `0x`-prefixed hex calldata.
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub success: bool,
    pub block_number: Option<u64>,
}

pub type AccountsHandler = Box<dyn Fn(&[Address]) + Send + Sync>;
pub type ChainHandler = Box<dyn Fn(&str) + Send + Sync>;

pub trait WalletProvider: Send + Sync {
    /// Interactive account-access request (prompts the user).
    fn request_accounts(&self)
    -> impl Future<Output = Result<Vec<Address>, ProviderError>> + Send;

    /// Non-interactive query of already-authorized accounts.
    fn accounts(&self) -> impl Future<Output = Result<Vec<Address>, ProviderError>> + Send;

    /// Active chain id in the provider-native hex string form.
    fn chain_id(&self) -> impl Future<Output = Result<String, ProviderError>> + Send;

    fn send_transaction(
        &self,
        call: CallRequest,
    ) -> impl Future<Output = Result<TxHash, ProviderError>> + Send;

    fn transaction_receipt(
        &self,
        hash: &TxHash,
    ) -> impl Future<Output = Result<Option<TxReceipt>, ProviderError>> + Send;

    fn on_accounts_changed(&self, handler: AccountsHandler) -> Subscription;

    fn on_chain_changed(&self, handler: ChainHandler) -> Subscription;
}

/// Cancellation handle for a provider event subscription. Dropping it
/// unregisters the handler, so reconnect cycles do not leak callbacks.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A handle with nothing to unregister.
    pub fn inert() -> Self {
        Self { cancel: None }
    }

    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

/// Keyed callback set backing provider implementations.
pub struct HandlerRegistry<H> {
    inner: Arc<Mutex<RegistryInner<H>>>,
}

struct RegistryInner<H> {
    next_id: u64,
    handlers: HashMap<u64, H>,
}

impl<H> Default for HandlerRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> HandlerRegistry<H> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner {
                next_id: 0,
                handlers: HashMap::new(),
            })),
        }
    }

    pub fn register(&self, handler: H) -> Subscription
    where
        H: Send + 'static,
    {
        let id = {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            let id = inner.next_id;
            inner.next_id += 1;
            inner.handlers.insert(id, handler);
            id
        };
        let weak: Weak<Mutex<RegistryInner<H>>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
                inner.handlers.remove(&id);
            }
        })
    }

    pub fn notify(&self, invoke: impl Fn(&H)) {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        for handler in inner.handlers.values() {
            invoke(handler);
        }
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handlers
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Decodes a provider-native chain id (hex string, `0x` prefix optional)
/// into an integer network id.
pub fn decode_chain_id(raw: &str) -> Result<u64, ProviderError> {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if digits.is_empty() {
        return Err(ProviderError::Transport(format!(
            "malformed chain id {trimmed:?}"
        )));
    }
    u64::from_str_radix(digits, 16)
        .map_err(|err| ProviderError::Transport(format!("malformed chain id {trimmed:?}: {err}")))
}

/// Stands in for an environment with no wallet installed: every operation
/// reports [`ProviderError::Unavailable`].
pub struct NoProvider;

impl WalletProvider for NoProvider {
    async fn request_accounts(&self) -> Result<Vec<Address>, ProviderError> {
        Err(ProviderError::Unavailable)
    }

    async fn accounts(&self) -> Result<Vec<Address>, ProviderError> {
        Err(ProviderError::Unavailable)
    }

    async fn chain_id(&self) -> Result<String, ProviderError> {
        Err(ProviderError::Unavailable)
    }

    async fn send_transaction(&self, _call: CallRequest) -> Result<TxHash, ProviderError> {
        Err(ProviderError::Unavailable)
    }

    async fn transaction_receipt(
        &self,
        _hash: &TxHash,
    ) -> Result<Option<TxReceipt>, ProviderError> {
        Err(ProviderError::Unavailable)
    }

    fn on_accounts_changed(&self, _handler: AccountsHandler) -> Subscription {
        Subscription::inert()
    }

    fn on_chain_changed(&self, _handler: ChainHandler) -> Subscription {
        Subscription::inert()
    }
}

/// Obtains and holds the active account address.
pub struct WalletConnector<P> {
    provider: Arc<P>,
    address: Option<Address>,
}

impl<P: WalletProvider> WalletConnector<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self {
            provider,
            address: None,
        }
    }

    /// Requests account access; the first granted account becomes the
    /// active address.
    pub async fn connect(&mut self) -> Result<Address, ProviderError> {
        let accounts = self.provider.request_accounts().await?;
        let address = accounts
            .into_iter()
            .next()
            .ok_or(ProviderError::UserRejected)?;
        self.address = Some(address.clone());
        Ok(address)
    }

    /// Non-interactive query of already-authorized accounts; empty when
    /// nothing has been connected yet.
    pub async fn current_accounts(&self) -> Result<Vec<Address>, ProviderError> {
        self.provider.accounts().await
    }

    /// `None` delivered to the handler signals disconnection; otherwise the
    /// first entry is the new active address.
    pub fn on_accounts_changed(
        &self,
        handler: impl Fn(Option<Address>) + Send + Sync + 'static,
    ) -> Subscription {
        self.provider
            .on_accounts_changed(Box::new(move |accounts| handler(accounts.first().cloned())))
    }

    /// Purely local: wallet providers expose no programmatic disconnect.
    pub fn disconnect(&mut self) {
        self.address = None;
    }

    pub fn address(&self) -> Option<&Address> {
        self.address.as_ref()
    }
}

/// Observes the active chain id, decoding the provider-native hex form.
pub struct NetworkObserver<P> {
    provider: Arc<P>,
}

impl<P: WalletProvider> NetworkObserver<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self { provider }
    }

    pub async fn current_chain_id(&self) -> Result<u64, ProviderError> {
        let raw = self.provider.chain_id().await?;
        decode_chain_id(&raw)
    }

    pub fn on_chain_changed(
        &self,
        handler: impl Fn(u64) + Send + Sync + 'static,
    ) -> Subscription {
        self.provider.on_chain_changed(Box::new(move |raw| {
            match decode_chain_id(raw) {
                Ok(chain_id) => handler(chain_id),
                Err(err) => warn!("Ignoring malformed chain id notification: {err}"),
            }
        }))
    }
}

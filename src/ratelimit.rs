//! Per-address cooldown bookkeeping over an injected key-value store.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use tracing::warn;

use crate::address::Address;
use crate::store::{KeyValueStore, StoreError};

/// Storage namespace: one entry per normalized address, value is the
/// RFC 3339 timestamp of the last successful request.
pub const STORE_KEY_PREFIX: &str = "faucet_last_request_";

pub fn storage_key(address: &Address) -> String {
    format!("{STORE_KEY_PREFIX}{}", address.normalized())
}

pub struct RateLimitTracker<S> {
    store: S,
    cooldown: Duration,
}

impl<S: KeyValueStore> RateLimitTracker<S> {
    pub fn new(store: S, cooldown: Duration) -> Self {
        assert!(cooldown > Duration::zero(), "Cooldown must be positive");
        assert!(
            cooldown <= Duration::days(30),
            "Cooldown exceeds defensive bound"
        );
        Self { store, cooldown }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Stores/overwrites the last-request time for the normalized address.
    /// Called only after a confirmed success; a failed attempt must not
    /// consume the cooldown.
    pub async fn record_request(
        &self,
        address: &Address,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let value = at.to_rfc3339_opts(SecondsFormat::Secs, true);
        self.store.set(&storage_key(address), &value).await
    }

    /// `last + cooldown` when that instant is still in the future, nothing
    /// otherwise. Expired records stay in the store; they simply stop
    /// counting. Re-evaluated against `now` on every call.
    pub async fn next_available_time(
        &self,
        address: &Address,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let Some(raw) = self.store.get(&storage_key(address)).await? else {
            return Ok(None);
        };
        let last = match DateTime::parse_from_rfc3339(&raw) {
            Ok(parsed) => parsed.with_timezone(&Utc),
            Err(err) => {
                warn!("Ignoring unparseable rate-limit record for {address}: {err}");
                return Ok(None);
            }
        };
        let next = last + self.cooldown;
        if next > now { Ok(Some(next)) } else { Ok(None) }
    }

    pub async fn is_rate_limited(
        &self,
        address: &Address,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(self.next_available_time(address, now).await?.is_some())
    }
}

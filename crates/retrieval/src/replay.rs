//! Anti-replay ledger for signed requests.

use std::{sync::Arc, time::Duration};

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use slabd_primitives::DealId;
use slabd_storage::{KvStore, Namespace, decode, encode};
use tracing::debug;

use crate::RetrievalError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct ReplayEntry {
    first_seen: u64,
    expires_at: u64,
}

/// Records each `(deal, owner, nonce)` the first time it is seen.
///
/// An entry lives until its signed expiry; the signed request cannot be
/// presented after that anyway.
#[derive(Clone)]
pub struct ReplayGuard {
    store: Arc<dyn KvStore>,
    max_window: Duration,
}

impl std::fmt::Debug for ReplayGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayGuard").field("max_window", &self.max_window).finish_non_exhaustive()
    }
}

impl ReplayGuard {
    /// Create a guard accepting expiries at most `max_window` ahead.
    pub fn new(store: Arc<dyn KvStore>, max_window: Duration) -> Self {
        Self { store, max_window }
    }

    /// Accept the nonce once. A repeat, an expired request or an expiry too
    /// far in the future is `ReplayRejected`.
    pub fn check_and_record(
        &self,
        deal: DealId,
        owner: &Address,
        nonce: u64,
        expires_at: u64,
        now: u64,
    ) -> Result<(), RetrievalError> {
        if expires_at <= now {
            return Err(RetrievalError::ReplayRejected(format!(
                "request expired at {expires_at}"
            )));
        }
        if expires_at - now > self.max_window.as_secs() {
            return Err(RetrievalError::ReplayRejected(format!(
                "expiry {expires_at} is more than {}s ahead",
                self.max_window.as_secs()
            )));
        }

        let key = replay_key(deal, owner, nonce);
        let fresh = encode(&ReplayEntry { first_seen: now, expires_at })?;
        let recorded = self.store.update(Namespace::Replay, &key, &mut |current| {
            let live = current
                .map(|bytes| decode::<ReplayEntry>(bytes).map_or(true, |seen| seen.expires_at > now))
                .unwrap_or(false);
            (!live).then(|| fresh.clone())
        })?;

        if !recorded {
            return Err(RetrievalError::ReplayRejected(format!(
                "nonce {nonce} already used for deal {deal}"
            )));
        }
        debug!(%deal, %owner, nonce, expires_at, "Recorded request nonce");
        Ok(())
    }

    /// Drop entries whose expiry has passed. Returns how many were removed.
    pub fn prune(&self, now: u64) -> Result<usize, RetrievalError> {
        let mut removed = 0;
        for (key, value) in self.store.scan(Namespace::Replay)? {
            let expired = decode::<ReplayEntry>(&value).map_or(true, |e| e.expires_at <= now);
            if expired {
                self.store.delete(Namespace::Replay, &key)?;
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, "Pruned replay entries");
        }
        Ok(removed)
    }
}

fn replay_key(deal: DealId, owner: &Address, nonce: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + 20 + 8);
    key.extend_from_slice(&deal.to_be_bytes());
    key.extend_from_slice(owner.as_slice());
    key.extend_from_slice(&nonce.to_be_bytes());
    key
}

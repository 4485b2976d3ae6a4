use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
};

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use parking_lot::RwLock;
use slabd_api::{Deal, LedgerError, LedgerQuery, OnChainSession};
use slabd_primitives::{CommitmentId, DealId};

/// In-memory ledger.
///
/// `fail_next` makes the next N calls return a transient error, which is how
/// retry paths are exercised.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    deals: RwLock<HashMap<DealId, Deal>>,
    endpoints: RwLock<HashMap<Address, Vec<String>>>,
    sessions: RwLock<HashMap<B256, OnChainSession>>,
    epoch: AtomicU64,
    transient_failures: AtomicUsize,
    calls: AtomicUsize,
}

impl MemoryLedger {
    /// Empty ledger at epoch 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a deal.
    pub fn insert_deal(&self, deal: Deal) {
        self.deals.write().insert(deal.id, deal);
    }

    /// Point a deal at a new content root.
    pub fn set_content_root(&self, deal: DealId, root: CommitmentId) {
        if let Some(deal) = self.deals.write().get_mut(&deal) {
            deal.content_root = Some(root);
        }
    }

    /// Advertise endpoints for a provider.
    pub fn set_endpoints(&self, provider: Address, endpoints: Vec<String>) {
        self.endpoints.write().insert(provider, endpoints);
    }

    /// Insert or replace an on-chain retrieval session.
    pub fn insert_session(&self, session: OnChainSession) {
        self.sessions.write().insert(session.id, session);
    }

    /// Set the current epoch.
    pub fn set_epoch(&self, epoch: u64) {
        self.epoch.store(epoch, Ordering::SeqCst);
    }

    /// Fail the next `n` calls with a transient error.
    pub fn fail_next(&self, n: usize) {
        self.transient_failures.store(n, Ordering::SeqCst);
    }

    /// Total calls served, failures included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn enter(&self) -> Result<(), LedgerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(LedgerError::Transient("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerQuery for MemoryLedger {
    async fn get_deal(&self, deal: DealId) -> Result<Deal, LedgerError> {
        self.enter()?;
        self.deals
            .read()
            .get(&deal)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("deal {deal}")))
    }

    async fn get_provider_endpoints(&self, provider: &Address) -> Result<Vec<String>, LedgerError> {
        self.enter()?;
        self.endpoints
            .read()
            .get(provider)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("provider {provider}")))
    }

    async fn current_epoch(&self) -> Result<u64, LedgerError> {
        self.enter()?;
        Ok(self.epoch.load(Ordering::SeqCst))
    }

    async fn get_retrieval_session(&self, session: &B256) -> Result<OnChainSession, LedgerError> {
        self.enter()?;
        self.sessions
            .read()
            .get(session)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("session {session}")))
    }
}

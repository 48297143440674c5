//! Resource pools: tellers, ATMs and security tokens
//!
//! Every pool is a fixed set of interchangeable slots ranked by a
//! least-recently-used stamp. Tokens are additionally bounded by a counting
//! gate (`tokio::sync::Semaphore`) acquired without waiting.
//!
//! All pool state, together with the branch-wide counters (available funds,
//! transaction capacity and per-customer quotas), sits behind one
//! resource-wide lock. Admission holds that lock across its quota check,
//! acquisitions and enqueue so that they observe one consistent snapshot.
//!
//! Acquisitions are handed out as owned leases. Releasing consumes the lease,
//! so a slot (and the token permit) is returned exactly once.

use crate::account::AccountId;
use crate::config::BranchConfig;
use crate::entropy::EntropySource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::RangeInclusive;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, OwnedSemaphorePermit, Semaphore};

/// Kind of service resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Teller,
    Atm,
    Token,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Teller => "teller",
            Self::Atm => "ATM",
            Self::Token => "token",
        })
    }
}

#[derive(Debug, Clone)]
struct Slot {
    available: bool,
    /// LRU key, a logical timestamp
    last_used: u64,
    /// Incremented on each acquisition; identifies the current holder
    generation: u64,
}

/// Claim on one pool slot. Not `Clone`: it can be released once.
#[derive(Debug, PartialEq, Eq)]
pub struct Lease {
    kind: ResourceKind,
    index: usize,
    generation: u64,
}

impl Lease {
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

/// A token slot plus its ticket from the counting gate
#[derive(Debug)]
pub struct TokenLease {
    lease: Lease,
    _permit: OwnedSemaphorePermit,
}

impl TokenLease {
    pub fn index(&self) -> usize {
        self.lease.index
    }
}

/// Everything admission acquired for one transaction
#[derive(Debug)]
pub struct ResourceGrant {
    token: Option<TokenLease>,
    station: Lease,
}

impl ResourceGrant {
    pub fn new(token: Option<TokenLease>, station: Lease) -> Self {
        Self { token, station }
    }

    pub fn holds_token(&self) -> bool {
        self.token.is_some()
    }

    pub fn token_index(&self) -> Option<usize> {
        self.token.as_ref().map(TokenLease::index)
    }

    /// Teller or ATM serving the transaction
    pub fn station(&self) -> &Lease {
        &self.station
    }
}

/// Fixed-capacity pool with LRU ranking
#[derive(Debug, Clone)]
pub struct ResourcePool {
    kind: ResourceKind,
    slots: Vec<Slot>,
}

impl ResourcePool {
    pub fn new(kind: ResourceKind, capacity: usize) -> Self {
        let slots = vec![
            Slot {
                available: true,
                last_used: 0,
                generation: 0,
            };
            capacity
        ];
        Self { kind, slots }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn busy(&self) -> usize {
        self.slots.iter().filter(|slot| !slot.available).count()
    }

    pub fn is_available(&self, index: usize) -> bool {
        self.slots.get(index).map(|slot| slot.available).unwrap_or(false)
    }

    pub fn last_used(&self, index: usize) -> Option<u64> {
        self.slots.get(index).map(|slot| slot.last_used)
    }

    /// Take the available slot with the smallest LRU stamp, lowest index on
    /// ties, and stamp it with `now`.
    pub fn acquire_lru(&mut self, now: u64) -> Option<Lease> {
        let (index, _) = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.available)
            .min_by_key(|(index, slot)| (slot.last_used, *index))?;

        let slot = &mut self.slots[index];
        slot.available = false;
        slot.last_used = now;
        slot.generation += 1;
        Some(Lease {
            kind: self.kind,
            index,
            generation: slot.generation,
        })
    }

    /// Free the slot held by `lease` and stamp it with `now`.
    ///
    /// Returns false when the lease is stale: the slot was reset or has been
    /// handed to someone else since.
    pub fn release(&mut self, lease: Lease, now: u64) -> bool {
        if lease.kind != self.kind {
            return false;
        }
        match self.slots.get_mut(lease.index) {
            Some(slot) if !slot.available && slot.generation == lease.generation => {
                slot.available = true;
                slot.last_used = now;
                true
            }
            _ => false,
        }
    }

    /// Mark every slot free. LRU stamps are kept.
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.available = true;
        }
    }
}

/// State guarded by the resource-wide lock
#[derive(Debug)]
pub struct ResourceState {
    tellers: ResourcePool,
    atms: ResourcePool,
    tokens: ResourcePool,
    /// Branch cash
    pub available_funds: i64,
    /// Remaining global transaction capacity
    pub transaction_capacity: i64,
    quotas: BTreeMap<AccountId, i64>,
    clock: u64,
}

impl ResourceState {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    pub fn pool(&self, kind: ResourceKind) -> &ResourcePool {
        match kind {
            ResourceKind::Teller => &self.tellers,
            ResourceKind::Atm => &self.atms,
            ResourceKind::Token => &self.tokens,
        }
    }

    fn pool_mut(&mut self, kind: ResourceKind) -> &mut ResourcePool {
        match kind {
            ResourceKind::Teller => &mut self.tellers,
            ResourceKind::Atm => &mut self.atms,
            ResourceKind::Token => &mut self.tokens,
        }
    }

    /// Remaining quota of a customer; unknown customers have none
    pub fn quota(&self, account: AccountId) -> i64 {
        self.quotas.get(&account).copied().unwrap_or(0)
    }

    pub fn set_quota(&mut self, account: AccountId, quota: i64) {
        self.quotas.insert(account, quota);
    }

    /// LRU acquisition of a teller or ATM
    pub fn acquire_station(&mut self, kind: ResourceKind) -> Option<Lease> {
        let now = self.tick();
        self.pool_mut(kind).acquire_lru(now)
    }

    /// Return a lease to its pool
    pub fn release_lease(&mut self, lease: Lease) -> bool {
        let now = self.tick();
        let kind = lease.kind;
        let released = self.pool_mut(kind).release(lease, now);
        if !released {
            tracing::debug!(resource = %kind, "stale lease, slot already reset");
        }
        released
    }

    /// Return a token slot; its gate ticket goes back when the lease drops
    pub fn release_token(&mut self, token: TokenLease) -> bool {
        let TokenLease { lease, _permit } = token;
        self.release_lease(lease)
    }

    /// Return everything in a grant
    pub fn release_grant(&mut self, grant: ResourceGrant) {
        let ResourceGrant { token, station } = grant;
        self.release_lease(station);
        if let Some(token) = token {
            self.release_token(token);
        }
    }

    /// Apply the shared-counter effects of a successful transaction
    pub fn record_success(&mut self, account: AccountId, balance_delta: i64) {
        self.available_funds += balance_delta;
        self.transaction_capacity -= 1;
        if let Some(quota) = self.quotas.get_mut(&account) {
            *quota -= 1;
        }
    }
}

/// Outcome of a replenishment cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replenishment {
    pub fund_transfer: i64,
    pub available_funds: i64,
    pub transaction_capacity: i64,
}

/// Point-in-time pool usage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatus {
    pub tellers_busy: usize,
    pub atms_busy: usize,
    pub tokens_busy: usize,
    pub tokens_outstanding: usize,
    pub available_funds: i64,
    pub transaction_capacity: i64,
}

/// Tellers, ATMs, tokens and branch counters
pub struct ResourcePools {
    state: Mutex<ResourceState>,
    token_gate: Arc<Semaphore>,
    token_capacity: usize,
    capacity_baseline: i64,
    quota_range: RangeInclusive<i64>,
    fund_transfer: (i64, i64),
}

impl ResourcePools {
    /// Create pools sized by `config`, with the opening quota for each account
    pub fn new(config: &BranchConfig, accounts: impl IntoIterator<Item = AccountId>) -> Self {
        let quotas = accounts
            .into_iter()
            .map(|id| (id, config.customer_quota))
            .collect();
        let state = ResourceState {
            tellers: ResourcePool::new(ResourceKind::Teller, config.tellers),
            atms: ResourcePool::new(ResourceKind::Atm, config.atms),
            tokens: ResourcePool::new(ResourceKind::Token, config.tokens),
            available_funds: config.initial_funds,
            transaction_capacity: config.transaction_capacity,
            quotas,
            clock: 0,
        };
        Self {
            state: Mutex::new(state),
            token_gate: Arc::new(Semaphore::new(config.tokens)),
            token_capacity: config.tokens,
            capacity_baseline: config.transaction_capacity,
            quota_range: config.replenished_quota.clone(),
            fund_transfer: config.fund_transfer,
        }
    }

    /// Acquire the resource-wide lock
    pub async fn lock(&self) -> MutexGuard<'_, ResourceState> {
        self.state.lock().await
    }

    /// Take a gate ticket without waiting, then the LRU token slot.
    ///
    /// Requires the resource lock; pass its guard in.
    pub fn try_acquire_token(&self, state: &mut ResourceState) -> Option<TokenLease> {
        let permit = Arc::clone(&self.token_gate).try_acquire_owned().ok()?;
        let lease = state.acquire_station(ResourceKind::Token)?;
        Some(TokenLease {
            lease,
            _permit: permit,
        })
    }

    /// Release a grant under the resource lock
    pub async fn release(&self, grant: ResourceGrant) {
        let mut state = self.state.lock().await;
        state.release_grant(grant);
    }

    /// Gate tickets currently held
    pub fn tokens_outstanding(&self) -> usize {
        self.token_capacity - self.token_gate.available_permits()
    }

    pub fn token_capacity(&self) -> usize {
        self.token_capacity
    }

    /// Free every slot, restore capacity, randomize quotas and receive a fund
    /// transfer. Gate tickets are untouched: they come back with their leases.
    pub async fn reset_pools(&self, entropy: &dyn EntropySource) -> Replenishment {
        let mut state = self.state.lock().await;
        let fund_transfer = entropy.between(self.fund_transfer.0..self.fund_transfer.1);
        state.available_funds += fund_transfer;
        state.transaction_capacity = self.capacity_baseline;
        state.tellers.reset();
        state.atms.reset();
        state.tokens.reset();

        let (low, high) = (*self.quota_range.start(), *self.quota_range.end());
        for quota in state.quotas.values_mut() {
            *quota = entropy.between(low..high.saturating_add(1));
        }

        Replenishment {
            fund_transfer,
            available_funds: state.available_funds,
            transaction_capacity: state.transaction_capacity,
        }
    }

    pub async fn status(&self) -> PoolStatus {
        let state = self.state.lock().await;
        PoolStatus {
            tellers_busy: state.tellers.busy(),
            atms_busy: state.atms.busy(),
            tokens_busy: state.tokens.busy(),
            tokens_outstanding: self.tokens_outstanding(),
            available_funds: state.available_funds,
            transaction_capacity: state.transaction_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entropy::FixedEntropy;

    fn pools(tokens: usize) -> ResourcePools {
        let config = BranchConfig::deterministic().with_pools(3, 2, tokens);
        ResourcePools::new(&config, 0..5)
    }

    #[test]
    fn test_acquire_lru_prefers_lowest_index_on_ties() {
        let mut pool = ResourcePool::new(ResourceKind::Teller, 3);
        let lease = pool.acquire_lru(1).unwrap();
        assert_eq!(lease.index(), 0);
        let lease = pool.acquire_lru(2).unwrap();
        assert_eq!(lease.index(), 1);
        assert_eq!(pool.busy(), 2);
    }

    #[test]
    fn test_acquire_lru_picks_longest_idle() {
        let mut pool = ResourcePool::new(ResourceKind::Atm, 2);
        let first = pool.acquire_lru(1).unwrap();
        let second = pool.acquire_lru(2).unwrap();
        // second released before first, so it has been idle longer
        assert!(pool.release(second, 3));
        assert!(pool.release(first, 4));
        assert_eq!(pool.acquire_lru(5).unwrap().index(), 1);
        assert_eq!(pool.acquire_lru(6).unwrap().index(), 0);
    }

    #[test]
    fn test_acquire_skips_busy_slots() {
        let mut pool = ResourcePool::new(ResourceKind::Teller, 2);
        let _held = pool.acquire_lru(1).unwrap();
        assert_eq!(pool.acquire_lru(2).unwrap().index(), 1);
        assert!(pool.acquire_lru(3).is_none());
        assert_eq!(pool.busy(), 2);
    }

    #[test]
    fn test_acquire_stamps_lru_key() {
        let mut pool = ResourcePool::new(ResourceKind::Teller, 2);
        let lease = pool.acquire_lru(42).unwrap();
        assert_eq!(pool.last_used(lease.index()), Some(42));
        assert!(pool.release(lease, 43));
        assert_eq!(pool.last_used(0), Some(43));
    }

    #[test]
    fn test_stale_release_after_reset_is_ignored() {
        let mut pool = ResourcePool::new(ResourceKind::Token, 1);
        let old = pool.acquire_lru(1).unwrap();
        pool.reset();
        let current = pool.acquire_lru(2).unwrap();
        assert!(!pool.release(old, 3));
        assert!(!pool.is_available(0));
        assert!(pool.release(current, 4));
        assert!(pool.is_available(0));
    }

    #[test]
    fn test_release_rejects_foreign_lease() {
        let mut tellers = ResourcePool::new(ResourceKind::Teller, 1);
        let mut atms = ResourcePool::new(ResourceKind::Atm, 1);
        let lease = atms.acquire_lru(1).unwrap();
        assert!(!tellers.release(lease, 2));
    }

    #[tokio::test]
    async fn test_token_gate_bounds_outstanding() {
        let pools = pools(2);
        let mut state = pools.lock().await;
        let a = pools.try_acquire_token(&mut state).unwrap();
        let b = pools.try_acquire_token(&mut state).unwrap();
        assert!(pools.try_acquire_token(&mut state).is_none());
        assert_eq!(pools.tokens_outstanding(), 2);
        assert_eq!(state.pool(ResourceKind::Token).busy(), 2);

        state.release_token(a);
        assert_eq!(pools.tokens_outstanding(), 1);
        state.release_token(b);
        assert_eq!(pools.tokens_outstanding(), 0);
        assert_eq!(state.pool(ResourceKind::Token).busy(), 0);
    }

    #[tokio::test]
    async fn test_release_grant_returns_everything() {
        let pools = pools(5);
        let grant = {
            let mut state = pools.lock().await;
            let token = pools.try_acquire_token(&mut state);
            let station = state.acquire_station(ResourceKind::Teller).unwrap();
            ResourceGrant::new(token, station)
        };
        assert!(grant.holds_token());
        assert_eq!(pools.tokens_outstanding(), 1);

        pools.release(grant).await;
        let status = pools.status().await;
        assert_eq!(status.tellers_busy, 0);
        assert_eq!(status.tokens_busy, 0);
        assert_eq!(status.tokens_outstanding, 0);
    }

    #[tokio::test]
    async fn test_reset_pools() {
        let pools = pools(5);
        let held = {
            let mut state = pools.lock().await;
            state.transaction_capacity = 0;
            state.set_quota(1, 0);
            let token = pools.try_acquire_token(&mut state);
            let station = state.acquire_station(ResourceKind::Atm).unwrap();
            ResourceGrant::new(token, station)
        };

        let replenishment = pools.reset_pools(&FixedEntropy { hit: false }).await;
        assert_eq!(replenishment.fund_transfer, 1000);
        assert_eq!(replenishment.available_funds, 51_000);
        assert_eq!(replenishment.transaction_capacity, 10);

        let status = pools.status().await;
        assert_eq!(status.atms_busy, 0);
        assert_eq!(status.tokens_busy, 0);
        // the gate ticket stays out until the grant is released
        assert_eq!(status.tokens_outstanding, 1);
        assert_eq!(pools.lock().await.quota(1), 5);

        pools.release(held).await;
        assert_eq!(pools.tokens_outstanding(), 0);
    }

    #[tokio::test]
    async fn test_reset_pools_with_quota_range_at_i64_max() {
        let mut config = BranchConfig::deterministic();
        config.replenished_quota = 3..=i64::MAX;
        let pools = ResourcePools::new(&config, [0]);

        pools.reset_pools(&FixedEntropy { hit: false }).await;
        assert_eq!(pools.lock().await.quota(0), 3);
    }

    #[tokio::test]
    async fn test_record_success_updates_counters() {
        let pools = pools(5);
        let mut state = pools.lock().await;
        state.record_success(2, -300);
        assert_eq!(state.available_funds, 49_700);
        assert_eq!(state.transaction_capacity, 9);
        assert_eq!(state.quota(2), 4);
        assert_eq!(state.quota(99), 0);
    }

    #[test]
    fn test_resource_kind_display() {
        assert_eq!(ResourceKind::Teller.to_string(), "teller");
        assert_eq!(ResourceKind::Atm.to_string(), "ATM");
        assert_eq!(ResourceKind::Token.to_string(), "token");
    }
}

//! Time-bounded read-through cache over the hot read paths: the agent roster,
//! the stats counts, and the pending-lead list.
//!
//! The cache is a snapshot, never the source of truth for writes. A refresh
//! failure serves the last good value and logs the absorbed error; before the
//! first successful fill an empty/zero default is served instead.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::warn;

use super::{
    Agent, AgentId, CollectionCounts, Lead, LeadDetails, LeadId, LeadStatus, Purchase, RecordStore,
    StoreError, StoreMode,
};

const DEFAULT_TTL: Duration = Duration::from_secs(30);

#[derive(Debug)]
struct Slot<T> {
    fetched_at: Instant,
    value: T,
}

#[derive(Debug, Default)]
struct CacheSlot<T>(Mutex<Option<Slot<T>>>);

impl<T: Clone + Default> CacheSlot<T> {
    /// Serve from the slot when fresh; otherwise refresh, falling back to the
    /// stale value (or the default when the slot was never filled) on error.
    fn get_or_refresh(
        &self,
        ttl: Duration,
        label: &str,
        fetch: impl FnOnce() -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self.0.lock().expect("cache mutex poisoned");
        if let Some(slot) = guard.as_ref() {
            if slot.fetched_at.elapsed() < ttl {
                return Ok(slot.value.clone());
            }
        }

        match fetch() {
            Ok(value) => {
                *guard = Some(Slot {
                    fetched_at: Instant::now(),
                    value: value.clone(),
                });
                Ok(value)
            }
            Err(err) => match guard.as_ref() {
                Some(stale) => {
                    warn!(%err, cache = label, "backend refresh failed, serving stale value");
                    Ok(stale.value.clone())
                }
                None => {
                    warn!(%err, cache = label, "backend refresh failed with empty cache, serving default");
                    Ok(T::default())
                }
            },
        }
    }
}

/// Read-through [`RecordStore`] decorator with a fixed TTL. Writes pass
/// through untouched; cached entries age out on their own rather than being
/// invalidated, so a fresh record becomes visible after cache expiry.
#[derive(Debug)]
pub struct CachedStore<S> {
    inner: S,
    ttl: Duration,
    agents: CacheSlot<Vec<Agent>>,
    counts: CacheSlot<CollectionCounts>,
    pending: CacheSlot<Vec<Lead>>,
}

impl<S: RecordStore> CachedStore<S> {
    pub fn new(inner: S) -> Self {
        Self::with_ttl(inner, DEFAULT_TTL)
    }

    pub fn with_ttl(inner: S, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            agents: CacheSlot::default(),
            counts: CacheSlot::default(),
            pending: CacheSlot::default(),
        }
    }
}

impl<S: RecordStore> RecordStore for CachedStore<S> {
    fn insert_agent(&self, agent: Agent) -> Result<(), StoreError> {
        self.inner.insert_agent(agent)
    }

    fn agent(&self, id: AgentId) -> Result<Option<Agent>, StoreError> {
        self.inner.agent(id)
    }

    fn agents(&self) -> Result<Vec<Agent>, StoreError> {
        self.agents
            .get_or_refresh(self.ttl, "agents", || self.inner.agents())
    }

    fn update_agent_balance(&self, id: AgentId, balance: u64) -> Result<(), StoreError> {
        self.inner.update_agent_balance(id, balance)
    }

    fn insert_lead(&self, lead: Lead) -> Result<(), StoreError> {
        self.inner.insert_lead(lead)
    }

    fn lead(&self, id: &LeadId) -> Result<Option<Lead>, StoreError> {
        self.inner.lead(id)
    }

    fn pending_leads(&self) -> Result<Vec<Lead>, StoreError> {
        self.pending
            .get_or_refresh(self.ttl, "pending_leads", || self.inner.pending_leads())
    }

    fn update_lead_status(&self, id: &LeadId, status: LeadStatus) -> Result<(), StoreError> {
        self.inner.update_lead_status(id, status)
    }

    fn update_lead_details(&self, id: &LeadId, details: &LeadDetails) -> Result<(), StoreError> {
        self.inner.update_lead_details(id, details)
    }

    fn insert_purchase(&self, purchase: Purchase) -> Result<(), StoreError> {
        self.inner.insert_purchase(purchase)
    }

    fn purchase_for(&self, agent: AgentId, lead: &LeadId) -> Result<Option<Purchase>, StoreError> {
        self.inner.purchase_for(agent, lead)
    }

    fn counts(&self) -> Result<CollectionCounts, StoreError> {
        self.counts
            .get_or_refresh(self.ttl, "counts", || self.inner.counts())
    }

    fn mode(&self) -> StoreMode {
        self.inner.mode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DealType, FileStore};
    use chrono::Utc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Store double whose read paths can be switched into a failing state.
    #[derive(Default)]
    struct FlakyStore {
        inner: FileStore,
        failing: AtomicBool,
        fetches: AtomicUsize,
    }

    impl FlakyStore {
        fn fail(&self, on: bool) {
            self.failing.store(on, Ordering::SeqCst);
        }

        fn check(&self) -> Result<(), StoreError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                Err(StoreError::Unavailable("injected outage".to_string()))
            } else {
                Ok(())
            }
        }
    }

    impl RecordStore for FlakyStore {
        fn insert_agent(&self, agent: Agent) -> Result<(), StoreError> {
            self.inner.insert_agent(agent)
        }
        fn agent(&self, id: AgentId) -> Result<Option<Agent>, StoreError> {
            self.inner.agent(id)
        }
        fn agents(&self) -> Result<Vec<Agent>, StoreError> {
            self.check()?;
            self.inner.agents()
        }
        fn update_agent_balance(&self, id: AgentId, balance: u64) -> Result<(), StoreError> {
            self.inner.update_agent_balance(id, balance)
        }
        fn insert_lead(&self, lead: Lead) -> Result<(), StoreError> {
            self.inner.insert_lead(lead)
        }
        fn lead(&self, id: &LeadId) -> Result<Option<Lead>, StoreError> {
            self.inner.lead(id)
        }
        fn pending_leads(&self) -> Result<Vec<Lead>, StoreError> {
            self.check()?;
            self.inner.pending_leads()
        }
        fn update_lead_status(&self, id: &LeadId, status: LeadStatus) -> Result<(), StoreError> {
            self.inner.update_lead_status(id, status)
        }
        fn update_lead_details(&self, id: &LeadId, details: &LeadDetails) -> Result<(), StoreError> {
            self.inner.update_lead_details(id, details)
        }
        fn insert_purchase(&self, purchase: Purchase) -> Result<(), StoreError> {
            self.inner.insert_purchase(purchase)
        }
        fn purchase_for(
            &self,
            agent: AgentId,
            lead: &LeadId,
        ) -> Result<Option<Purchase>, StoreError> {
            self.inner.purchase_for(agent, lead)
        }
        fn counts(&self) -> Result<CollectionCounts, StoreError> {
            self.check()?;
            self.inner.counts()
        }
        fn mode(&self) -> StoreMode {
            self.inner.mode()
        }
    }

    fn agent(id: i64) -> Agent {
        Agent {
            id: AgentId(id),
            display_name: "A".to_string(),
            region: "sergeli".to_string(),
            deal_type: DealType::Buy,
            phone: "+998900000000".to_string(),
            balance: 0,
            registered_at: Utc::now(),
        }
    }

    #[test]
    fn fresh_reads_are_served_from_cache_within_ttl() {
        let store = CachedStore::with_ttl(FlakyStore::default(), Duration::from_secs(60));
        store.insert_agent(agent(1)).expect("insert");

        assert_eq!(store.agents().expect("first read").len(), 1);
        let fetches = store.inner.fetches.load(Ordering::SeqCst);
        // Inserted after the fill, so invisible until the TTL lapses.
        store.insert_agent(agent(2)).expect("insert");
        assert_eq!(store.agents().expect("cached read").len(), 1);
        assert_eq!(store.inner.fetches.load(Ordering::SeqCst), fetches);
    }

    #[test]
    fn expired_cache_picks_up_new_records() {
        let store = CachedStore::with_ttl(FlakyStore::default(), Duration::from_millis(10));
        store.insert_agent(agent(1)).expect("insert");
        assert_eq!(store.agents().expect("fill").len(), 1);

        store.insert_agent(agent(2)).expect("insert");
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(store.agents().expect("refreshed").len(), 2);
    }

    #[test]
    fn outage_after_a_fill_serves_the_last_good_value() {
        let store = CachedStore::with_ttl(FlakyStore::default(), Duration::from_millis(10));
        store.insert_agent(agent(1)).expect("insert");
        assert_eq!(store.counts().expect("fill").agents, 1);

        store.inner.fail(true);
        std::thread::sleep(Duration::from_millis(20));
        // Expired and unreachable: the stale snapshot is still served.
        assert_eq!(store.counts().expect("stale read").agents, 1);
    }

    #[test]
    fn outage_before_any_fill_serves_the_zero_default() {
        let store = CachedStore::with_ttl(FlakyStore::default(), Duration::from_secs(60));
        store.inner.fail(true);
        assert_eq!(store.counts().expect("default"), CollectionCounts::default());
        assert!(store.pending_leads().expect("default").is_empty());
    }
}

//! Purchase execution: balance debit, ledger append, contact reveal.
//!
//! The balance check and the debit are two separate store calls, so the whole
//! sequence runs under a per-agent mutex; the storage backends have no
//! conditional update to lean on. Every writer of `Agent.balance` takes the
//! same [`AgentLocks`] guard — the administrative adjustment included — so
//! no two read-modify-write sequences on one agent can interleave. The guard
//! is in-process only, which limits the deployment to a single instance (a
//! known scaling constraint).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::error;

use crate::store::{AgentId, LeadId, Purchase, PurchaseId, RecordStore};

use super::service::BrokerError;

/// Fixed price of one contact reveal, in integer currency units.
pub const CONTACT_PRICE: u64 = 5000;

/// Client contact handed to the purchasing agent on success.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ContactInfo {
    pub lead_id: LeadId,
    pub client_phone: String,
}

/// Keyed lock table serializing all writers of one agent's balance.
#[derive(Default)]
pub(crate) struct AgentLocks(Mutex<HashMap<AgentId, Arc<Mutex<()>>>>);

impl AgentLocks {
    pub(crate) fn for_agent(&self, agent: AgentId) -> Arc<Mutex<()>> {
        let mut locks = self.0.lock().expect("lock table poisoned");
        locks.entry(agent).or_default().clone()
    }
}

pub struct PurchaseLedger {
    store: Arc<dyn RecordStore>,
    locks: Arc<AgentLocks>,
    price: u64,
}

impl PurchaseLedger {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self::with_price(store, CONTACT_PRICE)
    }

    pub fn with_price(store: Arc<dyn RecordStore>, price: u64) -> Self {
        Self {
            store,
            locks: Arc::new(AgentLocks::default()),
            price,
        }
    }

    pub fn price(&self) -> u64 {
        self.price
    }

    /// Handle to the balance lock table, shared with the service so the
    /// administrative adjustment serializes against the purchase debit.
    pub(crate) fn balance_locks(&self) -> Arc<AgentLocks> {
        self.locks.clone()
    }

    /// Execute a contact purchase. All preconditions (agent registered, lead
    /// present, not already purchased, balance sufficient) are validated
    /// before any mutation; a debit whose follow-up append fails is rolled
    /// back so no money is ever charged for nothing delivered.
    pub fn purchase(&self, agent_id: AgentId, lead_id: &LeadId) -> Result<ContactInfo, BrokerError> {
        let guard = self.locks.for_agent(agent_id);
        let _serialized = guard.lock().expect("agent lock poisoned");

        let agent = self
            .store
            .agent(agent_id)?
            .ok_or(BrokerError::NotRegistered)?;
        let lead = self.store.lead(lead_id)?.ok_or(BrokerError::LeadNotFound)?;

        if self.store.purchase_for(agent_id, lead_id)?.is_some() {
            return Err(BrokerError::AlreadyPurchased);
        }
        if agent.balance < self.price {
            return Err(BrokerError::InsufficientFunds {
                balance: agent.balance,
                price: self.price,
            });
        }

        let debited = agent.balance - self.price;
        self.store.update_agent_balance(agent_id, debited)?;

        let record = Purchase {
            id: PurchaseId::mint(Utc::now()),
            agent_id,
            lead_id: lead_id.clone(),
            amount: self.price,
            created_at: Utc::now(),
        };
        if let Err(append_err) = self.store.insert_purchase(record) {
            // Refund before reporting; a failed refund is the one state we
            // cannot repair from here, so it is logged as loudly as possible.
            if let Err(refund_err) = self.store.update_agent_balance(agent_id, agent.balance) {
                error!(
                    agent = %agent_id,
                    lead = %lead_id,
                    %append_err,
                    %refund_err,
                    "purchase append failed and the debit could not be refunded"
                );
            }
            return Err(append_err.into());
        }

        Ok(ContactInfo {
            lead_id: lead.id,
            client_phone: lead.client_phone,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{
        Agent, CollectionCounts, DealType, FileStore, Lead, LeadDetails, LeadStatus, StoreError,
        StoreMode,
    };
    use chrono::Utc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn seed(store: &dyn RecordStore, balance: u64) {
        store
            .insert_agent(Agent {
                id: AgentId(1),
                display_name: "Agent".to_string(),
                region: "chilonzor".to_string(),
                deal_type: DealType::Both,
                phone: "+998900000000".to_string(),
                balance,
                registered_at: Utc::now(),
            })
            .expect("seed agent");
        store
            .insert_lead(Lead {
                id: LeadId("lead-1".to_string()),
                deal_type: DealType::Buy,
                region: "Chilonzor".to_string(),
                rooms: "2".to_string(),
                price_range: "400-600".to_string(),
                client_phone: "+998901234567".to_string(),
                status: LeadStatus::Approved,
                created_at: Utc::now(),
            })
            .expect("seed lead");
    }

    #[test]
    fn successful_purchase_debits_exactly_the_price_and_reveals_the_contact() {
        let store = Arc::new(FileStore::in_memory());
        seed(store.as_ref(), 8000);
        let ledger = PurchaseLedger::new(store.clone());

        let contact = ledger
            .purchase(AgentId(1), &LeadId("lead-1".to_string()))
            .expect("purchase succeeds");

        assert_eq!(contact.client_phone, "+998901234567");
        let agent = store.agent(AgentId(1)).expect("lookup").expect("present");
        assert_eq!(agent.balance, 3000);
        assert!(store
            .purchase_for(AgentId(1), &LeadId("lead-1".to_string()))
            .expect("lookup")
            .is_some());
    }

    #[test]
    fn insufficient_funds_leaves_no_trace() {
        let store = Arc::new(FileStore::in_memory());
        seed(store.as_ref(), 3000);
        let ledger = PurchaseLedger::new(store.clone());

        let result = ledger.purchase(AgentId(1), &LeadId("lead-1".to_string()));
        assert!(matches!(
            result,
            Err(BrokerError::InsufficientFunds {
                balance: 3000,
                price: 5000
            })
        ));
        let agent = store.agent(AgentId(1)).expect("lookup").expect("present");
        assert_eq!(agent.balance, 3000);
        assert_eq!(store.counts().expect("counts").purchases, 0);
    }

    #[test]
    fn unknown_lead_fails_before_any_debit() {
        let store = Arc::new(FileStore::in_memory());
        seed(store.as_ref(), 8000);
        let ledger = PurchaseLedger::new(store.clone());

        let result = ledger.purchase(AgentId(1), &LeadId("missing".to_string()));
        assert!(matches!(result, Err(BrokerError::LeadNotFound)));
        let agent = store.agent(AgentId(1)).expect("lookup").expect("present");
        assert_eq!(agent.balance, 8000);
    }

    #[test]
    fn unregistered_agent_is_rejected() {
        let store = Arc::new(FileStore::in_memory());
        let ledger = PurchaseLedger::new(store);
        let result = ledger.purchase(AgentId(9), &LeadId("lead-1".to_string()));
        assert!(matches!(result, Err(BrokerError::NotRegistered)));
    }

    #[test]
    fn repeat_purchase_of_the_same_lead_is_refused_without_a_second_debit() {
        let store = Arc::new(FileStore::in_memory());
        seed(store.as_ref(), 20_000);
        let ledger = PurchaseLedger::new(store.clone());
        let lead = LeadId("lead-1".to_string());

        ledger.purchase(AgentId(1), &lead).expect("first purchase");
        let result = ledger.purchase(AgentId(1), &lead);
        assert!(matches!(result, Err(BrokerError::AlreadyPurchased)));

        let agent = store.agent(AgentId(1)).expect("lookup").expect("present");
        assert_eq!(agent.balance, 15_000);
        assert_eq!(store.counts().expect("counts").purchases, 1);
    }

    /// Store double whose purchase append always fails, to exercise the
    /// refund path.
    struct AppendFailingStore {
        inner: FileStore,
        fail_append: AtomicBool,
    }

    impl RecordStore for AppendFailingStore {
        fn insert_agent(&self, agent: Agent) -> Result<(), StoreError> {
            self.inner.insert_agent(agent)
        }
        fn agent(&self, id: AgentId) -> Result<Option<Agent>, StoreError> {
            self.inner.agent(id)
        }
        fn agents(&self) -> Result<Vec<Agent>, StoreError> {
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
            self.inner.pending_leads()
        }
        fn update_lead_status(&self, id: &LeadId, status: LeadStatus) -> Result<(), StoreError> {
            self.inner.update_lead_status(id, status)
        }
        fn update_lead_details(&self, id: &LeadId, details: &LeadDetails) -> Result<(), StoreError> {
            self.inner.update_lead_details(id, details)
        }
        fn insert_purchase(&self, purchase: Purchase) -> Result<(), StoreError> {
            if self.fail_append.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("append rejected".to_string()));
            }
            self.inner.insert_purchase(purchase)
        }
        fn purchase_for(&self, agent: AgentId, lead: &LeadId) -> Result<Option<Purchase>, StoreError> {
            self.inner.purchase_for(agent, lead)
        }
        fn counts(&self) -> Result<CollectionCounts, StoreError> {
            self.inner.counts()
        }
        fn mode(&self) -> StoreMode {
            self.inner.mode()
        }
    }

    #[test]
    fn failed_ledger_append_refunds_the_debit() {
        let store = Arc::new(AppendFailingStore {
            inner: FileStore::in_memory(),
            fail_append: AtomicBool::new(true),
        });
        seed(store.as_ref(), 8000);
        let ledger = PurchaseLedger::new(store.clone());

        let result = ledger.purchase(AgentId(1), &LeadId("lead-1".to_string()));
        assert!(matches!(result, Err(BrokerError::Store(_))));

        let agent = store.agent(AgentId(1)).expect("lookup").expect("present");
        assert_eq!(agent.balance, 8000);
        assert_eq!(store.counts().expect("counts").purchases, 0);
    }
}

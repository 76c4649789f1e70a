//! Local file-backed store, the offline/degraded counterpart to the Sheets
//! backend. Collections live in memory behind a mutex and are flushed to a
//! JSON file after every write, mirroring the original `mock_db.json` mode.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use super::{
    Agent, AgentId, CollectionCounts, Lead, LeadDetails, LeadId, LeadStatus, Purchase, RecordStore,
    StoreError, StoreMode,
};

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Collections {
    realtors: Vec<Agent>,
    requests: Vec<Lead>,
    transactions: Vec<Purchase>,
}

/// JSON-file-backed [`RecordStore`]. Without a path it is purely in-memory,
/// which is what tests and the CLI demo use.
#[derive(Debug, Default)]
pub struct FileStore {
    path: Option<PathBuf>,
    data: Mutex<Collections>,
}

impl FileStore {
    /// Purely in-memory store; nothing is persisted.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open (or create) a store persisted at `path`. A missing file starts
    /// empty; an unreadable one is reported rather than silently truncated.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let data = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .map_err(|err| StoreError::Unavailable(err.to_string()))?;
            serde_json::from_str(&raw).map_err(|err| StoreError::Malformed(err.to_string()))?
        } else {
            Collections::default()
        };
        Ok(Self {
            path: Some(path),
            data: Mutex::new(data),
        })
    }

    fn persist(&self, data: &Collections) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let raw = serde_json::to_string_pretty(data)
            .map_err(|err| StoreError::Malformed(err.to_string()))?;
        std::fs::write(path, raw).map_err(|err| StoreError::Unavailable(err.to_string()))
    }

    /// Run `op` under the lock, flushing to disk when it reports a mutation.
    /// A failed flush restores the pre-`op` snapshot, so a write the caller
    /// sees fail leaves no trace in later reads.
    fn with_data<T>(
        &self,
        op: impl FnOnce(&mut Collections) -> Result<(T, bool), StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self.data.lock().expect("store mutex poisoned");
        let snapshot = self.path.as_ref().map(|_| (*guard).clone());
        let (value, dirty) = op(&mut guard)?;
        if dirty {
            if let Err(err) = self.persist(&guard) {
                if let Some(snapshot) = snapshot {
                    *guard = snapshot;
                }
                return Err(err);
            }
        }
        Ok(value)
    }
}

impl RecordStore for FileStore {
    fn insert_agent(&self, agent: Agent) -> Result<(), StoreError> {
        self.with_data(|data| {
            if data.realtors.iter().any(|a| a.id == agent.id) {
                return Err(StoreError::Duplicate);
            }
            data.realtors.push(agent);
            Ok(((), true))
        })
    }

    fn agent(&self, id: AgentId) -> Result<Option<Agent>, StoreError> {
        self.with_data(|data| Ok((data.realtors.iter().find(|a| a.id == id).cloned(), false)))
    }

    fn agents(&self) -> Result<Vec<Agent>, StoreError> {
        self.with_data(|data| Ok((data.realtors.clone(), false)))
    }

    fn update_agent_balance(&self, id: AgentId, balance: u64) -> Result<(), StoreError> {
        self.with_data(|data| {
            let agent = data
                .realtors
                .iter_mut()
                .find(|a| a.id == id)
                .ok_or(StoreError::NotFound)?;
            agent.balance = balance;
            Ok(((), true))
        })
    }

    fn insert_lead(&self, lead: Lead) -> Result<(), StoreError> {
        self.with_data(|data| {
            if data.requests.iter().any(|l| l.id == lead.id) {
                return Err(StoreError::Duplicate);
            }
            data.requests.push(lead);
            Ok(((), true))
        })
    }

    fn lead(&self, id: &LeadId) -> Result<Option<Lead>, StoreError> {
        self.with_data(|data| Ok((data.requests.iter().find(|l| &l.id == id).cloned(), false)))
    }

    fn pending_leads(&self) -> Result<Vec<Lead>, StoreError> {
        self.with_data(|data| {
            Ok((
                data.requests
                    .iter()
                    .filter(|l| l.status == LeadStatus::New)
                    .cloned()
                    .collect(),
                false,
            ))
        })
    }

    fn update_lead_status(&self, id: &LeadId, status: LeadStatus) -> Result<(), StoreError> {
        self.with_data(|data| {
            let lead = data
                .requests
                .iter_mut()
                .find(|l| &l.id == id)
                .ok_or(StoreError::NotFound)?;
            lead.status = status;
            Ok(((), true))
        })
    }

    fn update_lead_details(&self, id: &LeadId, details: &LeadDetails) -> Result<(), StoreError> {
        self.with_data(|data| {
            let lead = data
                .requests
                .iter_mut()
                .find(|l| &l.id == id)
                .ok_or(StoreError::NotFound)?;
            lead.region = details.region.clone();
            lead.rooms = details.rooms.clone();
            lead.price_range = details.price_range.clone();
            Ok(((), true))
        })
    }

    fn insert_purchase(&self, purchase: Purchase) -> Result<(), StoreError> {
        self.with_data(|data| {
            data.transactions.push(purchase);
            Ok(((), true))
        })
    }

    fn purchase_for(&self, agent: AgentId, lead: &LeadId) -> Result<Option<Purchase>, StoreError> {
        self.with_data(|data| {
            Ok((
                data.transactions
                    .iter()
                    .find(|t| t.agent_id == agent && &t.lead_id == lead)
                    .cloned(),
                false,
            ))
        })
    }

    fn counts(&self) -> Result<CollectionCounts, StoreError> {
        self.with_data(|data| {
            Ok((
                CollectionCounts {
                    leads: data.requests.len(),
                    purchases: data.transactions.len(),
                    agents: data.realtors.len(),
                },
                false,
            ))
        })
    }

    fn mode(&self) -> StoreMode {
        StoreMode::Local
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DealType;
    use chrono::Utc;

    fn agent(id: i64) -> Agent {
        Agent {
            id: AgentId(id),
            display_name: format!("Agent {id}"),
            region: "chilonzor".to_string(),
            deal_type: DealType::Both,
            phone: "+998901112233".to_string(),
            balance: 0,
            registered_at: Utc::now(),
        }
    }

    fn lead(id: &str) -> Lead {
        Lead {
            id: LeadId(id.to_string()),
            deal_type: DealType::Buy,
            region: "Chilonzor".to_string(),
            rooms: "2".to_string(),
            price_range: "400-600".to_string(),
            client_phone: "+998901234567".to_string(),
            status: LeadStatus::New,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn duplicate_agent_insert_is_rejected() {
        let store = FileStore::in_memory();
        store.insert_agent(agent(1)).expect("first insert");
        assert!(matches!(
            store.insert_agent(agent(1)),
            Err(StoreError::Duplicate)
        ));
        assert_eq!(store.agents().expect("agents").len(), 1);
    }

    #[test]
    fn balance_update_targets_the_named_field_only() {
        let store = FileStore::in_memory();
        store.insert_agent(agent(7)).expect("insert");
        store
            .update_agent_balance(AgentId(7), 12_000)
            .expect("update");
        let stored = store.agent(AgentId(7)).expect("lookup").expect("present");
        assert_eq!(stored.balance, 12_000);
        assert_eq!(stored.phone, "+998901112233");
    }

    #[test]
    fn pending_leads_excludes_moderated_ones() {
        let store = FileStore::in_memory();
        store.insert_lead(lead("a")).expect("insert");
        store.insert_lead(lead("b")).expect("insert");
        store
            .update_lead_status(&LeadId("a".to_string()), LeadStatus::Approved)
            .expect("approve");
        let pending = store.pending_leads().expect("pending");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id.0, "b");
    }

    #[test]
    fn detail_edit_rewrites_region_rooms_and_price() {
        let store = FileStore::in_memory();
        store.insert_lead(lead("x")).expect("insert");
        let details = LeadDetails {
            region: "Yunusobod".to_string(),
            rooms: "3".to_string(),
            price_range: "700-900".to_string(),
        };
        store
            .update_lead_details(&LeadId("x".to_string()), &details)
            .expect("edit");
        let stored = store
            .lead(&LeadId("x".to_string()))
            .expect("lookup")
            .expect("present");
        assert_eq!(stored.region, "Yunusobod");
        assert_eq!(stored.rooms, "3");
        assert_eq!(stored.price_range, "700-900");
        // Everything else untouched.
        assert_eq!(stored.client_phone, "+998901234567");
        assert_eq!(stored.status, LeadStatus::New);
    }

    #[test]
    fn state_survives_a_reopen() {
        let path = std::env::temp_dir().join(format!("makler-store-{}.json", std::process::id()));
        let _ = std::fs::remove_file(&path);

        {
            let store = FileStore::open(&path).expect("open fresh");
            store.insert_agent(agent(42)).expect("insert");
            store.insert_lead(lead("persisted")).expect("insert");
        }

        let reopened = FileStore::open(&path).expect("reopen");
        assert!(reopened
            .agent(AgentId(42))
            .expect("lookup")
            .is_some());
        assert_eq!(reopened.counts().expect("counts").leads, 1);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn failed_flush_leaves_no_trace_in_memory() {
        let path =
            std::env::temp_dir().join(format!("makler-store-blocked-{}", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let _ = std::fs::remove_dir(&path);

        let store = FileStore::open(&path).expect("open fresh");
        store.insert_agent(agent(1)).expect("seed agent");
        store
            .update_agent_balance(AgentId(1), 8000)
            .expect("seed balance");

        // Replace the db file with a directory so every flush fails.
        std::fs::remove_file(&path).expect("drop db file");
        std::fs::create_dir(&path).expect("block the db path");

        let debit = store.update_agent_balance(AgentId(1), 3000);
        assert!(matches!(debit, Err(StoreError::Unavailable(_))));
        let stored = store.agent(AgentId(1)).expect("lookup").expect("present");
        assert_eq!(stored.balance, 8000);

        let insert = store.insert_agent(agent(2));
        assert!(matches!(insert, Err(StoreError::Unavailable(_))));
        assert_eq!(store.agents().expect("agents").len(), 1);

        let _ = std::fs::remove_dir(&path);
    }
}

//! Persistence layer for the three broker collections: realtors, leads, and
//! purchase transactions.
//!
//! Two interchangeable backends implement [`RecordStore`]: a JSON-file-backed
//! local store and a Google-Sheets-backed remote store. Callers see identical
//! behavior from either; key lookups are linear scans over the collection, so
//! nothing here may be assumed O(1).

pub mod cache;
pub mod file;
pub mod sheets;

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use cache::CachedStore;
pub use file::FileStore;
pub use sheets::GoogleSheetsStore;

/// Chat-platform user identifier, the natural key for a registered agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(pub i64);

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Time-derived lead identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeadId(pub String);

impl std::fmt::Display for LeadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

static RECORD_SEQUENCE: AtomicU64 = AtomicU64::new(1);

impl LeadId {
    /// Mint a fresh id: unix timestamp plus a process-local sequence so two
    /// submissions landing in the same second stay distinct.
    pub fn mint(now: DateTime<Utc>) -> Self {
        let seq = RECORD_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        Self(format!("{}-{}", now.timestamp(), seq))
    }
}

/// Identifier for an append-only purchase record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PurchaseId(pub String);

impl PurchaseId {
    pub fn mint(now: DateTime<Utc>) -> Self {
        let seq = RECORD_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        Self(format!("t{}-{}", now.timestamp(), seq))
    }
}

/// Which side of a deal a realtor works, or a client asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DealType {
    Buy,
    Rent,
    Both,
}

impl DealType {
    pub const fn label(self) -> &'static str {
        match self {
            DealType::Buy => "buy",
            DealType::Rent => "rent",
            DealType::Both => "both",
        }
    }

    /// Parse free-text input from the web form or the registration keyboard.
    /// The original deployment collects Uzbek labels, so those are accepted
    /// alongside the canonical names.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "buy" | "sotib olish" => Some(DealType::Buy),
            "rent" | "ijara" | "ijaraga olish" => Some(DealType::Rent),
            "both" | "ikkisi ham" => Some(DealType::Both),
            _ => None,
        }
    }
}

/// Moderation state of a lead. `Approved` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeadStatus {
    New,
    Approved,
    Rejected,
}

impl LeadStatus {
    pub const fn label(self) -> &'static str {
        match self {
            LeadStatus::New => "new",
            LeadStatus::Approved => "approved",
            LeadStatus::Rejected => "rejected",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "new" => Some(LeadStatus::New),
            "approved" => Some(LeadStatus::Approved),
            "rejected" => Some(LeadStatus::Rejected),
            _ => None,
        }
    }
}

/// A registered realtor. Created once at registration, mutated only through
/// balance adjustments, never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub display_name: String,
    /// Normalized (lowercase, trimmed) service region.
    pub region: String,
    pub deal_type: DealType,
    pub phone: String,
    /// Integer currency units; never negative.
    pub balance: u64,
    pub registered_at: DateTime<Utc>,
}

/// A client-submitted housing request awaiting moderation and broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: LeadId,
    pub deal_type: DealType,
    pub region: String,
    pub rooms: String,
    pub price_range: String,
    /// Revealed to an agent only through a completed purchase.
    pub client_phone: String,
    pub status: LeadStatus,
    pub created_at: DateTime<Utc>,
}

/// Mutable pre-approval subset of a lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadDetails {
    pub region: String,
    pub rooms: String,
    pub price_range: String,
}

/// Ledger entry recording a contact reveal. Append-only, immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Purchase {
    pub id: PurchaseId,
    pub agent_id: AgentId,
    pub lead_id: LeadId,
    pub amount: u64,
    pub created_at: DateTime<Utc>,
}

/// Collection sizes backing the dashboard stats aggregate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionCounts {
    pub leads: usize,
    pub purchases: usize,
    pub agents: usize,
}

/// Which backend a store instance talks to. Surfaced so a degraded fallback
/// is an observable mode rather than hidden control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreMode {
    Local,
    Remote,
}

/// Error enumeration for storage failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record already exists")]
    Duplicate,
    #[error("record not found")]
    NotFound,
    #[error("malformed record: {0}")]
    Malformed(String),
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
}

/// Storage abstraction shared by the web path and the chat path. Every method
/// may block on network I/O; callers must not hold locks across a call unless
/// that is the point (the ledger's per-agent guard).
pub trait RecordStore: Send + Sync {
    /// Insert a new agent; `StoreError::Duplicate` when the id is taken.
    fn insert_agent(&self, agent: Agent) -> Result<(), StoreError>;
    fn agent(&self, id: AgentId) -> Result<Option<Agent>, StoreError>;
    fn agents(&self) -> Result<Vec<Agent>, StoreError>;
    /// Overwrite an agent's balance field. The caller owns read-modify-write
    /// serialization; the store only performs the single-field update.
    fn update_agent_balance(&self, id: AgentId, balance: u64) -> Result<(), StoreError>;

    fn insert_lead(&self, lead: Lead) -> Result<(), StoreError>;
    fn lead(&self, id: &LeadId) -> Result<Option<Lead>, StoreError>;
    /// Leads still awaiting moderation, i.e. status `New`.
    fn pending_leads(&self) -> Result<Vec<Lead>, StoreError>;
    fn update_lead_status(&self, id: &LeadId, status: LeadStatus) -> Result<(), StoreError>;
    fn update_lead_details(&self, id: &LeadId, details: &LeadDetails) -> Result<(), StoreError>;

    fn insert_purchase(&self, purchase: Purchase) -> Result<(), StoreError>;
    /// Natural-key lookup for the at-most-one-purchase guarantee.
    fn purchase_for(&self, agent: AgentId, lead: &LeadId) -> Result<Option<Purchase>, StoreError>;

    fn counts(&self) -> Result<CollectionCounts, StoreError>;
    fn mode(&self) -> StoreMode;
}

/// Canonical region form used for matching and stored on agents.
pub fn normalize_region(raw: &str) -> String {
    raw.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deal_type_parses_canonical_and_uzbek_labels() {
        assert_eq!(DealType::parse("buy"), Some(DealType::Buy));
        assert_eq!(DealType::parse("Sotib olish"), Some(DealType::Buy));
        assert_eq!(DealType::parse(" Ijaraga olish "), Some(DealType::Rent));
        assert_eq!(DealType::parse("Ikkisi ham"), Some(DealType::Both));
        assert_eq!(DealType::parse("swap"), None);
    }

    #[test]
    fn lead_ids_minted_in_the_same_second_are_distinct() {
        let now = Utc::now();
        assert_ne!(LeadId::mint(now), LeadId::mint(now));
    }

    #[test]
    fn region_normalization_is_case_and_whitespace_insensitive() {
        assert_eq!(normalize_region("  Chilonzor "), "chilonzor");
        assert_eq!(normalize_region("chilonzor"), "chilonzor");
    }
}

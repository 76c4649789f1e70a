//! Service facade tying the store, matcher, notifier, and ledger together.
//! One instance is constructed at process start and shared by every inbound
//! interface; nothing here reattaches or rebuilds storage behind the scenes.

use std::sync::Arc;

use axum::http::StatusCode;
use chrono::Utc;
use serde::Serialize;
use tracing::info;

use crate::store::{
    normalize_region, Agent, AgentId, DealType, Lead, LeadDetails, LeadId, LeadStatus, RecordStore,
    StoreError,
};

use super::ledger::{AgentLocks, ContactInfo, PurchaseLedger};
use super::matcher::eligible_agents;
use super::notifier::{FanoutNotifier, NotifyReport};

/// Error raised by broker operations; the taxonomy the inbound interfaces
/// translate into user-facing failures.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("agent is not registered")]
    NotRegistered,
    #[error("agent is already registered")]
    DuplicateRegistration,
    #[error("insufficient funds: balance {balance}, price {price}")]
    InsufficientFunds { balance: u64, price: u64 },
    #[error("lead not found")]
    LeadNotFound,
    #[error("contact already purchased for this lead")]
    AlreadyPurchased,
    #[error("lead is {}, not awaiting moderation", .from.label())]
    InvalidTransition { from: LeadStatus },
    #[error("invalid submission: {0}")]
    Validation(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BrokerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            BrokerError::NotRegistered | BrokerError::LeadNotFound => StatusCode::NOT_FOUND,
            BrokerError::DuplicateRegistration
            | BrokerError::AlreadyPurchased
            | BrokerError::InvalidTransition { .. } => StatusCode::CONFLICT,
            BrokerError::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,
            BrokerError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            BrokerError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Raw registration input collected by the chat adapter's conversation.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct RegistrationForm {
    pub telegram_id: i64,
    pub full_name: String,
    pub phone: String,
    pub region: String,
    pub deal_type: String,
}

/// Raw web-form submission.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct LeadSubmission {
    pub request_type: String,
    pub region: String,
    pub rooms: String,
    pub price: String,
    pub phone: String,
}

/// What an approval produced: the updated lead plus the fan-out outcome.
#[derive(Debug, Serialize)]
pub struct ApprovalOutcome {
    pub lead_id: LeadId,
    pub matched: usize,
    pub report: NotifyReport,
}

/// Stats aggregate with the dashboard's historical field names.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StatsView {
    pub daily_requests: usize,
    pub daily_sales: usize,
    pub total_realtors: usize,
}

/// Everything the admin dashboard renders.
#[derive(Debug, Serialize)]
pub struct DashboardView {
    pub stats: StatsView,
    pub realtors: Vec<Agent>,
    pub pending_requests: Vec<Lead>,
}

pub struct BrokerService {
    store: Arc<dyn RecordStore>,
    notifier: FanoutNotifier,
    ledger: PurchaseLedger,
    balance_locks: Arc<AgentLocks>,
}

impl BrokerService {
    pub fn new(store: Arc<dyn RecordStore>, notifier: FanoutNotifier) -> Self {
        let ledger = PurchaseLedger::new(store.clone());
        let balance_locks = ledger.balance_locks();
        Self {
            store,
            notifier,
            ledger,
            balance_locks,
        }
    }

    /// Register a new agent with a zero balance. The id is the chat-platform
    /// user id; a second registration under the same id is rejected.
    pub fn register_agent(&self, form: RegistrationForm) -> Result<Agent, BrokerError> {
        let full_name = required(&form.full_name, "full_name")?;
        let phone = required(&form.phone, "phone")?;
        let region = required(&form.region, "region")?;
        let deal_type = DealType::parse(&form.deal_type)
            .ok_or_else(|| BrokerError::Validation(format!("unknown deal type: {}", form.deal_type)))?;

        let agent = Agent {
            id: AgentId(form.telegram_id),
            display_name: full_name,
            region: normalize_region(&region),
            deal_type,
            phone,
            balance: 0,
            registered_at: Utc::now(),
        };

        match self.store.insert_agent(agent.clone()) {
            Ok(()) => {
                info!(agent = %agent.id, region = %agent.region, "agent registered");
                Ok(agent)
            }
            Err(StoreError::Duplicate) => Err(BrokerError::DuplicateRegistration),
            Err(other) => Err(other.into()),
        }
    }

    pub fn agent_balance(&self, id: AgentId) -> Result<u64, BrokerError> {
        let agent = self.store.agent(id)?.ok_or(BrokerError::NotRegistered)?;
        Ok(agent.balance)
    }

    /// Accept a web submission and create the lead in `New` status.
    pub fn submit_lead(&self, submission: LeadSubmission) -> Result<LeadId, BrokerError> {
        let deal_type = DealType::parse(&submission.request_type).ok_or_else(|| {
            BrokerError::Validation(format!("unknown request type: {}", submission.request_type))
        })?;
        let region = required(&submission.region, "region")?;
        let rooms = required(&submission.rooms, "rooms")?;
        let price = required(&submission.price, "price")?;
        let phone = required(&submission.phone, "phone")?;
        if !looks_like_phone(&phone) {
            return Err(BrokerError::Validation(format!("bad phone number: {phone}")));
        }

        let now = Utc::now();
        let lead = Lead {
            id: LeadId::mint(now),
            deal_type,
            region,
            rooms,
            price_range: price,
            client_phone: phone,
            status: LeadStatus::New,
            created_at: now,
        };
        let id = lead.id.clone();
        self.store.insert_lead(lead)?;
        info!(lead = %id, "lead submitted for moderation");
        Ok(id)
    }

    /// Approve a pending lead and broadcast it to every eligible agent.
    /// Only valid from `New`; re-approving is a rejected no-op so a broadcast
    /// can never double-fire. Status lands before fan-out, and fan-out
    /// failures never roll the approval back.
    pub fn approve_lead(&self, id: &LeadId) -> Result<ApprovalOutcome, BrokerError> {
        let lead = self.expect_pending(id)?;
        self.store.update_lead_status(id, LeadStatus::Approved)?;
        let lead = Lead {
            status: LeadStatus::Approved,
            ..lead
        };

        let roster = self.store.agents()?;
        let matched = eligible_agents(&roster, &lead.region, lead.deal_type);
        let report = self.notifier.notify(&lead, &matched);
        info!(
            lead = %lead.id,
            matched = matched.len(),
            delivered = report.notified.len(),
            failed = report.failed.len(),
            "lead approved and broadcast"
        );

        Ok(ApprovalOutcome {
            lead_id: lead.id,
            matched: matched.len(),
            report,
        })
    }

    /// Reject a pending lead. Terminal; only valid from `New`.
    pub fn reject_lead(&self, id: &LeadId) -> Result<(), BrokerError> {
        self.expect_pending(id)?;
        self.store.update_lead_status(id, LeadStatus::Rejected)?;
        info!(lead = %id, "lead rejected");
        Ok(())
    }

    /// Edit region/rooms/price while the lead is still awaiting moderation.
    pub fn update_lead_details(&self, id: &LeadId, details: LeadDetails) -> Result<(), BrokerError> {
        self.expect_pending(id)?;
        self.store.update_lead_details(id, &details)?;
        Ok(())
    }

    /// Ledgered contact purchase; the only path that reveals a client phone.
    pub fn purchase_contact(
        &self,
        agent: AgentId,
        lead: &LeadId,
    ) -> Result<ContactInfo, BrokerError> {
        let contact = self.ledger.purchase(agent, lead)?;
        info!(agent = %agent, lead = %lead, amount = self.ledger.price(), "contact purchased");
        Ok(contact)
    }

    /// Administrative signed balance adjustment. Deliberately unledgered:
    /// top-ups happen out of band and are a distinct operation from the
    /// purchase debit. The balance invariant still holds, so a delta that
    /// would go negative is rejected. Runs under the same per-agent lock as
    /// the purchase debit; an adjustment racing a purchase can reorder but
    /// never lose a write.
    pub fn adjust_balance(&self, id: AgentId, delta: i64) -> Result<u64, BrokerError> {
        let lock = self.balance_locks.for_agent(id);
        let _serialized = lock.lock().expect("agent lock poisoned");

        let agent = self.store.agent(id)?.ok_or(BrokerError::NotRegistered)?;
        let updated = if delta >= 0 {
            agent.balance.saturating_add(delta as u64)
        } else {
            agent.balance.checked_sub(delta.unsigned_abs()).ok_or_else(|| {
                BrokerError::Validation(format!(
                    "adjustment of {delta} would take balance {} negative",
                    agent.balance
                ))
            })?
        };
        self.store.update_agent_balance(id, updated)?;
        info!(agent = %id, delta, balance = updated, "balance adjusted by administrator");
        Ok(updated)
    }

    /// Dashboard aggregate: stats, roster, pending queue. All three ride the
    /// store's cached read paths.
    pub fn dashboard(&self) -> Result<DashboardView, BrokerError> {
        let counts = self.store.counts()?;
        Ok(DashboardView {
            stats: StatsView {
                daily_requests: counts.leads,
                daily_sales: counts.purchases,
                total_realtors: counts.agents,
            },
            realtors: self.store.agents()?,
            pending_requests: self.store.pending_leads()?,
        })
    }

    fn expect_pending(&self, id: &LeadId) -> Result<Lead, BrokerError> {
        let lead = self.store.lead(id)?.ok_or(BrokerError::LeadNotFound)?;
        if lead.status != LeadStatus::New {
            return Err(BrokerError::InvalidTransition { from: lead.status });
        }
        Ok(lead)
    }
}

fn required(value: &str, field: &str) -> Result<String, BrokerError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(BrokerError::Validation(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

/// Loose sanity check only; the upstream form enforces the strict format.
fn looks_like_phone(value: &str) -> bool {
    let digits = value.chars().filter(|c| c.is_ascii_digit()).count();
    digits >= 7 && value.chars().all(|c| c.is_ascii_digit() || matches!(c, '+' | ' ' | '-'))
}

//! Lead distribution and monetization engine: matching, fan-out, and the
//! purchase ledger, fronted by [`BrokerService`] and its HTTP router.

pub mod ledger;
pub mod matcher;
pub mod notifier;
pub mod router;
pub mod service;

pub use ledger::{ContactInfo, PurchaseLedger, CONTACT_PRICE};
pub use matcher::eligible_agents;
pub use notifier::{FanoutNotifier, NotificationGateway, NotifyError, NotifyReport};
pub use router::broker_router;
pub use service::{
    ApprovalOutcome, BrokerError, BrokerService, DashboardView, LeadSubmission, RegistrationForm,
    StatsView,
};

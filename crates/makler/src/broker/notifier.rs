//! Best-effort fan-out of an approved lead to its matched agents.
//!
//! Delivery is at-most-once per agent per invocation with no retry. A failure
//! for one recipient is logged and never aborts the rest of the broadcast,
//! and the optional public-channel post is attempted once, independently of
//! the per-agent outcome.

use std::fmt::Write as _;
use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::store::{Agent, AgentId, Lead};

use super::ledger::CONTACT_PRICE;

/// Outbound seam to the chat platform. The conversational bot itself is an
/// external collaborator; the broker only needs these two delivery calls.
pub trait NotificationGateway: Send + Sync {
    /// Deliver a lead offer to one agent, carrying a purchase control bound
    /// to the lead id.
    fn send_offer(&self, agent: AgentId, text: &str, purchase_action: &str)
        -> Result<(), NotifyError>;

    /// Post an anonymized announcement to a public channel.
    fn broadcast(&self, channel: &str, text: &str) -> Result<(), NotifyError>;
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Outcome of one fan-out invocation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NotifyReport {
    pub notified: Vec<AgentId>,
    pub failed: Vec<AgentId>,
    pub channel_posted: bool,
}

pub struct FanoutNotifier {
    gateway: Arc<dyn NotificationGateway>,
    channel: Option<String>,
}

impl FanoutNotifier {
    /// `channel` must already be validated as a broadcast-channel id; pass
    /// `None` to skip the public post entirely.
    pub fn new(gateway: Arc<dyn NotificationGateway>, channel: Option<String>) -> Self {
        Self { gateway, channel }
    }

    /// Broadcast `lead` to `agents`, one delivery per agent.
    pub fn notify(&self, lead: &Lead, agents: &[Agent]) -> NotifyReport {
        let mut report = NotifyReport::default();

        if let Some(channel) = &self.channel {
            match self.gateway.broadcast(channel, &announcement_text(lead)) {
                Ok(()) => report.channel_posted = true,
                Err(err) => {
                    warn!(%err, channel, lead = %lead.id, "channel broadcast failed");
                }
            }
        }

        let text = offer_text(lead);
        for agent in agents {
            match self.gateway.send_offer(agent.id, &text, &lead.id.0) {
                Ok(()) => report.notified.push(agent.id),
                Err(err) => {
                    warn!(%err, agent = %agent.id, lead = %lead.id, "offer delivery failed");
                    report.failed.push(agent.id);
                }
            }
        }

        report
    }
}

/// Private offer shown to matched agents. Carries the lead summary but never
/// the client phone; that is what the purchase control is for.
pub fn offer_text(lead: &Lead) -> String {
    let mut text = String::new();
    writeln!(text, "New request in your region!").expect("write headline");
    writeln!(text, "Region: {}", lead.region).expect("write region");
    writeln!(text, "Rooms: {}", lead.rooms).expect("write rooms");
    writeln!(text, "Price: {}", lead.price_range).expect("write price");
    writeln!(text, "Type: {}", lead.deal_type.label()).expect("write type");
    write!(text, "Get the contact for {CONTACT_PRICE} sum.").expect("write price tag");
    text
}

/// Anonymized public-channel announcement.
pub fn announcement_text(lead: &Lead) -> String {
    let mut text = String::new();
    writeln!(text, "New listing request!").expect("write headline");
    writeln!(text, "Region: {}", lead.region).expect("write region");
    writeln!(text, "Rooms: {}", lead.rooms).expect("write rooms");
    writeln!(text, "Price: {}", lead.price_range).expect("write price");
    write!(text, "Type: {}", lead.deal_type.label()).expect("write type");
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DealType, LeadId, LeadStatus};
    use chrono::Utc;
    use std::sync::Mutex;

    fn lead() -> Lead {
        Lead {
            id: LeadId("100-1".to_string()),
            deal_type: DealType::Buy,
            region: "Chilonzor".to_string(),
            rooms: "2".to_string(),
            price_range: "400-600".to_string(),
            client_phone: "+998901234567".to_string(),
            status: LeadStatus::Approved,
            created_at: Utc::now(),
        }
    }

    fn agent(id: i64) -> Agent {
        Agent {
            id: AgentId(id),
            display_name: format!("Agent {id}"),
            region: "chilonzor".to_string(),
            deal_type: DealType::Both,
            phone: "+998900000000".to_string(),
            balance: 0,
            registered_at: Utc::now(),
        }
    }

    /// Gateway double that rejects deliveries to a chosen agent id.
    #[derive(Default)]
    struct SelectiveGateway {
        blocked: Option<i64>,
        offers: Mutex<Vec<(AgentId, String)>>,
        posts: Mutex<Vec<String>>,
    }

    impl NotificationGateway for SelectiveGateway {
        fn send_offer(
            &self,
            agent: AgentId,
            text: &str,
            purchase_action: &str,
        ) -> Result<(), NotifyError> {
            if Some(agent.0) == self.blocked {
                return Err(NotifyError::Delivery("bot was blocked".to_string()));
            }
            self.offers
                .lock()
                .expect("offers mutex poisoned")
                .push((agent, format!("{text}|{purchase_action}")));
            Ok(())
        }

        fn broadcast(&self, channel: &str, text: &str) -> Result<(), NotifyError> {
            self.posts
                .lock()
                .expect("posts mutex poisoned")
                .push(format!("{channel}: {text}"));
            Ok(())
        }
    }

    #[test]
    fn one_blocked_recipient_does_not_abort_the_rest() {
        let gateway = Arc::new(SelectiveGateway {
            blocked: Some(2),
            ..Default::default()
        });
        let notifier = FanoutNotifier::new(gateway.clone(), None);

        let report = notifier.notify(&lead(), &[agent(1), agent(2), agent(3)]);

        assert_eq!(report.notified, vec![AgentId(1), AgentId(3)]);
        assert_eq!(report.failed, vec![AgentId(2)]);
        assert_eq!(gateway.offers.lock().expect("offers").len(), 2);
    }

    #[test]
    fn channel_post_happens_once_and_only_when_configured() {
        let gateway = Arc::new(SelectiveGateway::default());
        let with_channel =
            FanoutNotifier::new(gateway.clone(), Some("-1001234567890".to_string()));
        let report = with_channel.notify(&lead(), &[agent(1)]);
        assert!(report.channel_posted);
        assert_eq!(gateway.posts.lock().expect("posts").len(), 1);

        let without = FanoutNotifier::new(gateway.clone(), None);
        let report = without.notify(&lead(), &[agent(1)]);
        assert!(!report.channel_posted);
        assert_eq!(gateway.posts.lock().expect("posts").len(), 1);
    }

    #[test]
    fn announcement_never_leaks_the_client_phone() {
        let lead = lead();
        assert!(!announcement_text(&lead).contains("+998901234567"));
        assert!(!offer_text(&lead).contains("+998901234567"));
    }

    #[test]
    fn offer_carries_the_purchase_price() {
        assert!(offer_text(&lead()).contains("5000"));
    }
}

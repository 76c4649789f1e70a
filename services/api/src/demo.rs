//! End-to-end CLI walkthrough of the broker flow against the in-memory
//! store: registration, submission, moderation, fan-out, and a purchase.

use std::sync::Arc;

use makler::broker::{
    BrokerService, FanoutNotifier, LeadSubmission, NotificationGateway, NotifyError,
    RegistrationForm,
};
use makler::error::AppError;
use makler::store::{AgentId, FileStore, RecordStore};

/// Gateway that prints deliveries to stdout so the demo output reads as a
/// transcript of the broadcast.
#[derive(Debug, Default)]
struct ConsoleGateway;

impl NotificationGateway for ConsoleGateway {
    fn send_offer(
        &self,
        agent: AgentId,
        text: &str,
        purchase_action: &str,
    ) -> Result<(), NotifyError> {
        println!("--- offer to agent {agent} (purchase action: {purchase_action})");
        for line in text.lines() {
            println!("    {line}");
        }
        Ok(())
    }

    fn broadcast(&self, channel: &str, text: &str) -> Result<(), NotifyError> {
        println!("--- public post to {channel}");
        for line in text.lines() {
            println!("    {line}");
        }
        Ok(())
    }
}

pub(crate) fn run_demo() -> Result<(), AppError> {
    let store: Arc<dyn RecordStore> = Arc::new(FileStore::in_memory());
    let gateway = Arc::new(ConsoleGateway);
    let notifier = FanoutNotifier::new(gateway, Some("-1001234567890".to_string()));
    let service = BrokerService::new(store, notifier);

    println!("== registering realtors");
    for (id, name, region, deal_type) in [
        (111, "Aziz Karimov", "Chilonzor", "both"),
        (222, "Malika Yusupova", "Chilonzor", "buy"),
        (333, "Bobur Rashidov", "Yunusobod", "rent"),
    ] {
        let agent = service.register_agent(RegistrationForm {
            telegram_id: id,
            full_name: name.to_string(),
            phone: format!("+99890000{id}"),
            region: region.to_string(),
            deal_type: deal_type.to_string(),
        })?;
        println!("   {} covers {} ({})", agent.display_name, agent.region, agent.deal_type.label());
    }

    println!("== client submits a request");
    let lead_id = service.submit_lead(LeadSubmission {
        request_type: "Sotib olish".to_string(),
        region: "Chilonzor".to_string(),
        rooms: "2".to_string(),
        price: "400-600".to_string(),
        phone: "+998901234567".to_string(),
    })?;
    println!("   lead {lead_id} awaiting moderation");

    println!("== administrator approves");
    let outcome = service.approve_lead(&lead_id)?;
    println!(
        "   matched {} realtors, delivered {}, failed {}",
        outcome.matched,
        outcome.report.notified.len(),
        outcome.report.failed.len()
    );

    println!("== realtor 111 tops up and buys the contact");
    service.adjust_balance(AgentId(111), 8000)?;
    match service.purchase_contact(AgentId(111), &lead_id) {
        Ok(contact) => println!("   revealed client phone: {}", contact.client_phone),
        Err(err) => println!("   purchase failed: {err}"),
    }
    println!(
        "   remaining balance: {}",
        service.agent_balance(AgentId(111))?
    );

    let view = service.dashboard()?;
    println!(
        "== dashboard: {} requests, {} sales, {} realtors",
        view.stats.daily_requests, view.stats.daily_sales, view.stats.total_realtors
    );

    Ok(())
}

//! Region and deal-type eligibility for a lead broadcast.
//!
//! Matching is exact on the lowercase-trimmed region string; free-text region
//! drift therefore produces false negatives, which is why registration feeds
//! agents through the same normalization and a fixed region keyboard upstream.
//! No ranking, no limit: every eligible agent is returned.

use crate::store::{normalize_region, Agent, DealType};

/// True when the agent covers the lead's deal type: a `Both` agent takes
/// anything, otherwise the types must be equal.
pub fn covers_deal_type(agent: DealType, lead: DealType) -> bool {
    agent == DealType::Both || agent == lead
}

/// Filter `agents` down to the set eligible for a lead in `region` with the
/// given deal type. Order follows the roster order; callers get no ordering
/// guarantee.
pub fn eligible_agents(agents: &[Agent], region: &str, deal_type: DealType) -> Vec<Agent> {
    let target = normalize_region(region);
    agents
        .iter()
        .filter(|agent| normalize_region(&agent.region) == target)
        .filter(|agent| covers_deal_type(agent.deal_type, deal_type))
        .cloned()
        .collect()
}

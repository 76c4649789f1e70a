//! HTTP surface for the documented inbound interfaces: the web submission
//! endpoint, the admin moderation/balance endpoints, and the chat adapter's
//! registration/balance/purchase calls.
//!
//! The admin endpoints carry no authentication; that is a known gap of the
//! current deployment, kept visible rather than silently fixed here.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::store::{AgentId, LeadDetails, LeadId};

use super::service::{BrokerError, BrokerService, LeadSubmission, RegistrationForm};

pub fn broker_router(service: Arc<BrokerService>) -> Router {
    Router::new()
        .route("/api/request", post(submit_request))
        .route("/admin", get(admin_dashboard))
        .route("/admin/action", post(admin_action))
        .route("/admin/balance", post(admin_balance))
        .route("/admin/request/:req_id/details", post(admin_edit_details))
        .route("/api/v1/agents", post(register_agent))
        .route("/api/v1/agents/:agent_id/balance", get(agent_balance))
        .route("/api/v1/purchase", post(purchase_contact))
        .with_state(service)
}

fn error_response(err: BrokerError) -> Response {
    let status = err.status_code();
    let body = json!({ "status": "error", "message": err.to_string() });
    (status, Json(body)).into_response()
}

/// The service and both store backends block on I/O, so every handler hops
/// onto the blocking pool.
async fn blocking<T, F>(service: Arc<BrokerService>, op: F) -> Result<T, BrokerError>
where
    T: Send + 'static,
    F: FnOnce(&BrokerService) -> Result<T, BrokerError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || op(&service))
        .await
        .unwrap_or_else(|join_err| {
            warn!(%join_err, "broker task panicked");
            Err(BrokerError::Store(crate::store::StoreError::Unavailable(
                "internal task failure".to_string(),
            )))
        })
}

async fn submit_request(
    State(service): State<Arc<BrokerService>>,
    Json(submission): Json<LeadSubmission>,
) -> Response {
    match blocking(service, move |s| s.submit_lead(submission)).await {
        Ok(id) => (
            StatusCode::OK,
            Json(json!({
                "status": "success",
                "id": id.0,
                "message": "submitted for moderation",
            })),
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

async fn admin_dashboard(State(service): State<Arc<BrokerService>>) -> Response {
    match blocking(service, |s| s.dashboard()).await {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Deserialize)]
struct AdminActionForm {
    req_id: String,
    action: String,
}

async fn admin_action(
    State(service): State<Arc<BrokerService>>,
    Form(form): Form<AdminActionForm>,
) -> Response {
    let lead_id = LeadId(form.req_id);
    match form.action.as_str() {
        "approve" => match blocking(service, move |s| s.approve_lead(&lead_id)).await {
            Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
            Err(err) => error_response(err),
        },
        "reject" => {
            let rejected = lead_id.0.clone();
            match blocking(service, move |s| s.reject_lead(&lead_id)).await {
                Ok(()) => (
                    StatusCode::OK,
                    Json(json!({ "status": "success", "id": rejected })),
                )
                    .into_response(),
                Err(err) => error_response(err),
            }
        }
        other => error_response(BrokerError::Validation(format!("unknown action: {other}"))),
    }
}

#[derive(Debug, Deserialize)]
struct BalanceForm {
    telegram_id: i64,
    amount: i64,
}

async fn admin_balance(
    State(service): State<Arc<BrokerService>>,
    Form(form): Form<BalanceForm>,
) -> Response {
    let result = blocking(service, move |s| {
        s.adjust_balance(AgentId(form.telegram_id), form.amount)
    })
    .await;
    match result {
        Ok(balance) => (
            StatusCode::OK,
            Json(json!({ "status": "success", "balance": balance })),
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Deserialize)]
struct DetailsForm {
    region: String,
    rooms: String,
    price: String,
}

async fn admin_edit_details(
    State(service): State<Arc<BrokerService>>,
    Path(req_id): Path<String>,
    Form(form): Form<DetailsForm>,
) -> Response {
    let lead_id = LeadId(req_id);
    let details = LeadDetails {
        region: form.region,
        rooms: form.rooms,
        price_range: form.price,
    };
    match blocking(service, move |s| s.update_lead_details(&lead_id, details)).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "success" }))).into_response(),
        Err(err) => error_response(err),
    }
}

async fn register_agent(
    State(service): State<Arc<BrokerService>>,
    Json(form): Json<RegistrationForm>,
) -> Response {
    match blocking(service, move |s| s.register_agent(form)).await {
        Ok(agent) => (StatusCode::CREATED, Json(agent)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn agent_balance(
    State(service): State<Arc<BrokerService>>,
    Path(agent_id): Path<i64>,
) -> Response {
    match blocking(service, move |s| s.agent_balance(AgentId(agent_id))).await {
        Ok(balance) => (
            StatusCode::OK,
            Json(json!({ "telegram_id": agent_id, "balance": balance })),
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Deserialize)]
struct PurchaseRequest {
    agent_id: i64,
    lead_id: String,
}

async fn purchase_contact(
    State(service): State<Arc<BrokerService>>,
    Json(request): Json<PurchaseRequest>,
) -> Response {
    let agent = AgentId(request.agent_id);
    let lead = LeadId(request.lead_id);
    match blocking(service, move |s| s.purchase_contact(agent, &lead)).await {
        Ok(contact) => (StatusCode::OK, Json(contact)).into_response(),
        Err(err) => error_response(err),
    }
}

//! Request handlers.

use crate::error::ServerError;
use crate::grafana::{GrafanaWebhookPayload, SkippedAlert, intents_from};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use infra_core::{ActionDefinition, ExecutionRecord, Intent, PlanNode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

// =============================================================================
// Probes
// =============================================================================

pub async fn live() -> Json<Value> {
    Json(json!({}))
}

pub async fn ready() -> Json<Value> {
    Json(json!({}))
}

// =============================================================================
// Intents and plans
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub plan_id: Uuid,
    pub nodes: Vec<PlanNode>,
}

/// Plan the intent, journal it and start executing in the background.
pub async fn submit_intent(
    State(state): State<AppState>,
    Json(intent): Json<Intent>,
) -> Result<(StatusCode, Json<SubmitResponse>), ServerError> {
    let plan = state.agent().submit(intent).await?;
    state.spawn_execution(plan.plan_id);
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            plan_id: plan.plan_id,
            nodes: plan.nodes,
        }),
    ))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PlanList {
    pub plans: Vec<Uuid>,
}

pub async fn list_plans(State(state): State<AppState>) -> Result<Json<PlanList>, ServerError> {
    Ok(Json(PlanList {
        plans: state.agent().plans().await?,
    }))
}

pub async fn get_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<Uuid>,
) -> Result<Json<ExecutionRecord>, ServerError> {
    Ok(Json(state.agent().status(plan_id).await?))
}

pub async fn cancel_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<Uuid>,
) -> Result<(StatusCode, Json<Value>), ServerError> {
    if !state.agent().cancel(plan_id) {
        return Err(ServerError::NotFound(format!("no active run for plan {plan_id}")));
    }
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "plan_id": plan_id, "cancelled": true })),
    ))
}

pub async fn list_actions(State(state): State<AppState>) -> Json<Vec<ActionDefinition>> {
    Json(
        state
            .agent()
            .registry()
            .definitions()
            .into_iter()
            .cloned()
            .collect(),
    )
}

// =============================================================================
// Webhooks
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct AcceptedAlert {
    pub index: usize,
    pub plan_id: Uuid,
    pub target: String,
    pub correlation_id: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub accepted: Vec<AcceptedAlert>,
    pub skipped: Vec<SkippedAlert>,
}

/// One intent per firing alert that names a target and a desired state.
/// Alerts that cannot be planned are reported as skipped, not as errors.
pub async fn grafana_webhook(
    State(state): State<AppState>,
    Json(payload): Json<GrafanaWebhookPayload>,
) -> Result<Json<WebhookResponse>, ServerError> {
    if !state.grafana().enabled {
        return Err(ServerError::NotFound("grafana webhook is disabled".into()));
    }
    tracing::info!(
        receiver = %payload.receiver,
        status = %payload.status,
        alerts = payload.alerts.len(),
        "Received Grafana notification"
    );

    let (intents, mut skipped) = intents_from(&payload, state.grafana());
    let mut accepted = Vec::new();
    for (index, intent) in intents {
        let target = intent.target.to_string();
        let correlation_id = intent.correlation_id.clone();
        match state.agent().submit(intent).await {
            Ok(plan) => {
                state.spawn_execution(plan.plan_id);
                accepted.push(AcceptedAlert {
                    index,
                    plan_id: plan.plan_id,
                    target,
                    correlation_id,
                });
            }
            Err(e) => {
                tracing::warn!(%target, %correlation_id, error = %e, "Alert not actionable");
                skipped.push(SkippedAlert {
                    index,
                    fingerprint: payload.alerts[index].fingerprint.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }
    skipped.sort_by_key(|s| s.index);
    Ok(Json(WebhookResponse { accepted, skipped }))
}

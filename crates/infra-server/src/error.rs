//! Error types for the HTTP surface.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use infra_planner::PlanError;
use infra_runtime::{AgentError, InventoryError};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to start server: {0}")]
    StartupFailed(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Agent(#[from] AgentError),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::StartupFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Agent(e) => match e {
                AgentError::Plan(PlanError::UnplannableIntent { .. }) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                AgentError::Plan(PlanError::CyclicDependency { .. }) => StatusCode::CONFLICT,
                AgentError::UnknownPlan(_) => StatusCode::NOT_FOUND,
                AgentError::Inventory(InventoryError::UnknownTarget(_)) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                AgentError::Inventory(InventoryError::Unavailable(_)) | AgentError::State(_) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

//! On-demand agent connect endpoint.
//!
//! POST /connect-agent with `{meetingId, agentId}`. 200 on success, 202
//! while another attempt is in flight, 4xx/5xx per the service error
//! taxonomy with an `error` string and optional `details`.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::post,
    Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::api::error::ApiError;
use crate::api::AppState;
use crate::lifecycle::{ConnectOutcome, ConnectRequest};

#[derive(Debug, Deserialize)]
pub struct ConnectAgentRequest {
    #[serde(rename = "meetingId", default)]
    pub meeting_id: String,
    #[serde(rename = "agentId", default)]
    pub agent_id: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/connect-agent", post(connect_agent))
        .with_state(state)
}

async fn connect_agent(
    State(state): State<AppState>,
    Json(body): Json<ConnectAgentRequest>,
) -> Response {
    info!(
        "Connect AI agent requested: meeting={}, agent={}",
        body.meeting_id, body.agent_id
    );

    let request = ConnectRequest {
        meeting_id: body.meeting_id,
        agent_id: body.agent_id,
    };

    match state.reconciler.connect_agent(&request, &state.locks).await {
        Ok(ConnectOutcome::Connected) => Json(json!({
            "success": true,
            "message": "AI agent connected successfully",
        }))
        .into_response(),
        Ok(ConnectOutcome::AlreadyConnected) => Json(json!({
            "success": true,
            "alreadyConnected": true,
            "message": "AI agent already connected",
        }))
        .into_response(),
        Ok(ConnectOutcome::InProgress) => (
            StatusCode::ACCEPTED,
            Json(json!({
                "success": false,
                "message": "Agent connection in progress",
            })),
        )
            .into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}

//! Agent persona API endpoints.

use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::info;

use crate::api::error::{ApiError, ApiResult};
use crate::api::AppState;
use crate::db::{AgentRecord, AgentRepository};

#[derive(Debug, Deserialize)]
pub struct CreateAgentRequest {
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub instructions: String,
    #[serde(rename = "userId", default)]
    pub user_id: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/agents", post(create_agent).get(list_agents))
        .route("/agents/:id", get(get_agent))
        .with_state(state)
}

fn agent_json(a: &AgentRecord) -> Value {
    json!({
        "id": a.id,
        "name": a.name,
        "instructions": a.instructions,
        "userId": a.user_id,
        "createdAt": a.created_at,
    })
}

async fn create_agent(
    State(state): State<AppState>,
    Json(body): Json<CreateAgentRequest>,
) -> ApiResult<Json<Value>> {
    if body.name.trim().is_empty() || body.user_id.trim().is_empty() {
        return Err(ApiError::bad_request("Missing name or userId"));
    }

    let id = body
        .id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let agent = {
        let id = id.clone();
        state
            .db
            .with(move |conn| {
                AgentRepository::insert(conn, &id, &body.name, &body.instructions, &body.user_id)?;
                AgentRepository::get(conn, &id)
            })
            .await?
    };

    let agent = agent.ok_or_else(|| ApiError::internal("Agent vanished after insert"))?;
    info!("Agent {} ({}) created", agent.id, agent.name);

    Ok(Json(agent_json(&agent)))
}

async fn list_agents(
    Query(params): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> ApiResult<Json<Value>> {
    let limit: usize = params
        .get("limit")
        .and_then(|v| v.parse().ok())
        .unwrap_or(20);

    let agents = state
        .db
        .with(move |conn| AgentRepository::list(conn, limit))
        .await?;

    let entries: Vec<Value> = agents.iter().map(agent_json).collect();
    Ok(Json(json!({ "agents": entries })))
}

async fn get_agent(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<Value>> {
    let agent = state
        .db
        .with(move |conn| AgentRepository::get(conn, &id))
        .await?
        .ok_or_else(|| ApiError::not_found("Agent not found"))?;

    Ok(Json(agent_json(&agent)))
}

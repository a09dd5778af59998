//! User API endpoints.
//!
//! Account management lives in an external layer; this surface only keeps
//! the local user table in sync for channel membership and speaker
//! resolution.

use axum::{extract::State, response::Json, routing::post, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::error::{ApiError, ApiResult};
use crate::api::AppState;
use crate::db::UserRepository;

#[derive(Debug, Deserialize)]
pub struct UpsertUserRequest {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/users", post(upsert_user))
        .with_state(state)
}

async fn upsert_user(
    State(state): State<AppState>,
    Json(body): Json<UpsertUserRequest>,
) -> ApiResult<Json<Value>> {
    if body.id.trim().is_empty() || body.name.trim().is_empty() {
        return Err(ApiError::bad_request("Missing id or name"));
    }

    state
        .db
        .with(move |conn| UserRepository::upsert(conn, &body.id, &body.name))
        .await?;

    Ok(Json(json!({ "success": true })))
}

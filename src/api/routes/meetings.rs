//! Meeting API endpoints.
//!
//! Provides HTTP endpoints for:
//! - Creating a meeting (POST /meetings)
//! - Listing meetings (GET /meetings)
//! - Getting a specific meeting (GET /meetings/:id)
//! - Cancelling an upcoming meeting (POST /meetings/:id/cancel)
//! - Regenerating a summary (POST /meetings/:id/regenerate-summary)
//! - End-of-call fallback (POST /meetings/mark-ended)

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
use crate::db::{MeetingRecord, MeetingRepository};

#[derive(Debug, Deserialize)]
pub struct CreateMeetingRequest {
    pub id: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "userId", default)]
    pub user_id: String,
    #[serde(rename = "agentId")]
    pub agent_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MarkEndedRequest {
    #[serde(rename = "meetingId", default)]
    pub meeting_id: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/meetings", post(create_meeting).get(list_meetings))
        .route("/meetings/mark-ended", post(mark_ended))
        .route("/meetings/:id", get(get_meeting))
        .route("/meetings/:id/cancel", post(cancel_meeting))
        .route("/meetings/:id/regenerate-summary", post(regenerate_summary))
        .with_state(state)
}

fn meeting_json(m: &MeetingRecord) -> Value {
    json!({
        "id": m.id,
        "name": m.name,
        "userId": m.user_id,
        "agentId": m.agent_id,
        "status": m.status.as_str(),
        "startedAt": m.started_at,
        "endedAt": m.ended_at,
        "transcriptUrl": m.transcript_url,
        "recordingUrl": m.recording_url,
        "summary": m.summary,
        "createdAt": m.created_at,
    })
}

async fn create_meeting(
    State(state): State<AppState>,
    Json(body): Json<CreateMeetingRequest>,
) -> ApiResult<Json<Value>> {
    if body.user_id.trim().is_empty() {
        return Err(ApiError::bad_request("Missing userId"));
    }

    let id = body
        .id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let meeting = {
        let id = id.clone();
        state
            .db
            .with(move |conn| {
                MeetingRepository::insert(
                    conn,
                    &id,
                    body.name.as_deref(),
                    &body.user_id,
                    body.agent_id.as_deref(),
                )?;
                MeetingRepository::get(conn, &id)
            })
            .await?
    };

    let meeting = meeting.ok_or_else(|| ApiError::internal("Meeting vanished after insert"))?;
    info!("Meeting {} created", meeting.id);

    Ok(Json(meeting_json(&meeting)))
}

async fn list_meetings(
    Query(params): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> ApiResult<Json<Value>> {
    let limit: usize = params
        .get("limit")
        .and_then(|v| v.parse().ok())
        .unwrap_or(20);

    let meetings = state
        .db
        .with(move |conn| MeetingRepository::list(conn, limit))
        .await?;

    let entries: Vec<Value> = meetings.iter().map(meeting_json).collect();
    Ok(Json(json!({ "meetings": entries })))
}

async fn get_meeting(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<Value>> {
    let meeting = state
        .db
        .with(move |conn| MeetingRepository::get(conn, &id))
        .await?
        .ok_or_else(|| ApiError::not_found("Meeting not found"))?;

    Ok(Json(meeting_json(&meeting)))
}

async fn cancel_meeting(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<Value>> {
    let cancelled = {
        let id = id.clone();
        state
            .db
            .with(move |conn| {
                let exists = MeetingRepository::get(conn, &id)?.is_some();
                let cancelled = exists && MeetingRepository::cancel_if_upcoming(conn, &id)?;
                Ok((exists, cancelled))
            })
            .await?
    };

    match cancelled {
        (false, _) => Err(ApiError::not_found("Meeting not found")),
        (true, false) => Err(ApiError::conflict("Only upcoming meetings can be cancelled")),
        (true, true) => {
            info!("Meeting {} cancelled", id);
            Ok(Json(json!({ "success": true })))
        }
    }
}

async fn regenerate_summary(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<Value>> {
    state.reconciler.regenerate_summary(&id).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Summary regeneration started",
    })))
}

async fn mark_ended(
    State(state): State<AppState>,
    Json(body): Json<MarkEndedRequest>,
) -> ApiResult<Json<Value>> {
    state.reconciler.mark_ended(&body.meeting_id).await?;

    Ok(Json(json!({ "success": true })))
}

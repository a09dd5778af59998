//! Provider webhook endpoint.
//!
//! POST /webhook (and PUT with identical semantics). The signature gate and
//! JSON parse run before any side effect; handler failures other than
//! validation/not-found are logged and answered ok so the provider does not
//! retry-storm. State correctness is protected by idempotent preconditions,
//! not by surfacing errors.

use axum::{
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Json, Response},
    routing::post,
    Router,
};
use serde_json::json;
use tracing::{debug, error};

use crate::api::error::ApiError;
use crate::api::AppState;
use crate::error::ServiceError;
use crate::lifecycle::{signature, CallEvent};

pub fn router(state: AppState) -> Router {
    Router::new()
        // Some provider versions deliver the same event class over PUT.
        .route("/webhook", post(handle_webhook).put(handle_webhook))
        .with_state(state)
}

async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    process(state, headers, body).await
}

async fn process(state: AppState, headers: HeaderMap, body: String) -> Response {
    let Some(signature_header) = headers.get("x-signature").and_then(|v| v.to_str().ok()) else {
        return ApiError::bad_request("Missing signature").into_response();
    };

    if body.is_empty() {
        return ApiError::bad_request("Empty body").into_response();
    }

    if !signature::verify(&state.webhook_secret, body.as_bytes(), signature_header) {
        return ApiError::unauthorized("Invalid signature").into_response();
    }

    let event = match CallEvent::parse(&body) {
        Ok(event) => event,
        Err(e) => {
            debug!("Rejecting malformed webhook payload: {}", e);
            return ApiError::bad_request("Invalid JSON").into_response();
        }
    };

    match state.reconciler.apply(event).await {
        Ok(()) => ok_response(),
        Err(err @ (ServiceError::Validation(_) | ServiceError::NotFound(_))) => {
            ApiError::from(err).into_response()
        }
        Err(err) => {
            // Swallow unexpected errors to prevent webhook retry storms.
            error!("Webhook handler error: {:#}", err);
            ok_response()
        }
    }
}

fn ok_response() -> Response {
    Json(json!({ "status": "ok" })).into_response()
}

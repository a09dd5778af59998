//! End-to-end lifecycle tests driving the HTTP router in process.
//!
//! Exercises the webhook signature gate, the idempotent event transitions,
//! the connect flow, and the processing pipeline against an in-memory
//! database and fake providers.

use anyhow::Result;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

use huddle::api::{ApiServer, AppState};
use huddle::config::PipelineConfig;
use huddle::db::{Db, MeetingRepository};
use huddle::jobs::{JobQueue, JobWorker};
use huddle::lifecycle::{signature, ConnectLockRegistry, LifecycleReconciler, MeetingStatus};
use huddle::pipeline::{ProcessingPipeline, TranscriptFetcher};
use huddle::providers::{
    ChatIdentity, ChatMessage, ChatProvider, LlmClient, LlmMessage, ProviderError, ProviderResult,
    RealtimeSession, VideoProvider,
};

const SECRET: &str = "test-secret";

#[derive(Default)]
struct FakeVideo {
    call_exists: AtomicBool,
    connected: Mutex<Vec<(String, String)>>,
    instructions: Arc<Mutex<Vec<String>>>,
}

struct FakeSession {
    instructions: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl RealtimeSession for FakeSession {
    async fn update_instructions(&self, instructions: &str) -> ProviderResult<()> {
        self.instructions.lock().unwrap().push(instructions.to_string());
        Ok(())
    }
}

#[async_trait]
impl VideoProvider for FakeVideo {
    async fn get_call(&self, call_id: &str) -> ProviderResult<()> {
        if self.call_exists.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ProviderError::NotFound(format!("no call {call_id}")))
        }
    }

    async fn create_call(&self, _call_id: &str, _created_by: &str) -> ProviderResult<()> {
        self.call_exists.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn upsert_user(&self, _id: &str, _name: &str) -> ProviderResult<()> {
        Ok(())
    }

    async fn connect_agent(
        &self,
        call_id: &str,
        agent_user_id: &str,
    ) -> ProviderResult<Box<dyn RealtimeSession>> {
        self.connected
            .lock()
            .unwrap()
            .push((call_id.to_string(), agent_user_id.to_string()));
        Ok(Box::new(FakeSession {
            instructions: self.instructions.clone(),
        }))
    }
}

#[derive(Default)]
struct FakeChat {
    channels: Mutex<Vec<String>>,
    members: Mutex<Vec<(String, String)>>,
    sent: Mutex<Vec<(String, String, String)>>,
}

#[async_trait]
impl ChatProvider for FakeChat {
    async fn ensure_channel(&self, channel_id: &str) -> ProviderResult<()> {
        self.channels.lock().unwrap().push(channel_id.to_string());
        Ok(())
    }

    async fn add_member(&self, channel_id: &str, user_id: &str) -> ProviderResult<()> {
        self.members
            .lock()
            .unwrap()
            .push((channel_id.to_string(), user_id.to_string()));
        Ok(())
    }

    async fn recent_messages(
        &self,
        _channel_id: &str,
        _limit: usize,
    ) -> ProviderResult<Vec<ChatMessage>> {
        Ok(Vec::new())
    }

    async fn upsert_user(&self, _identity: &ChatIdentity) -> ProviderResult<()> {
        Ok(())
    }

    async fn send_message(
        &self,
        channel_id: &str,
        sender: &ChatIdentity,
        text: &str,
    ) -> ProviderResult<()> {
        self.sent.lock().unwrap().push((
            channel_id.to_string(),
            sender.id.clone(),
            text.to_string(),
        ));
        Ok(())
    }
}

struct FakeLlm;

#[async_trait]
impl LlmClient for FakeLlm {
    async fn chat(&self, _messages: &[LlmMessage]) -> ProviderResult<String> {
        Ok("The team agreed on the rollout plan.".to_string())
    }
}

/// Serves an empty transcript body for any URL.
struct EmptyFetcher;

#[async_trait]
impl TranscriptFetcher for EmptyFetcher {
    async fn fetch(&self, _url: &str) -> Result<String> {
        Ok(String::new())
    }
}

struct TestApp {
    router: Router,
    db: Db,
    video: Arc<FakeVideo>,
    chat: Arc<FakeChat>,
}

fn build_app() -> TestApp {
    let db = Db::open_in_memory().unwrap();
    let video = Arc::new(FakeVideo::default());
    let chat = Arc::new(FakeChat::default());
    let llm: Arc<dyn LlmClient> = Arc::new(FakeLlm);

    let (jobs, wake_rx) = JobQueue::new(db.clone());
    let tuning = PipelineConfig {
        poll_attempts: 1,
        poll_backoff_secs: 0,
        fetch_attempts: 1,
        fetch_backoff_secs: 0,
        empty_retry_attempts: 0,
        empty_retry_backoff_secs: 0,
    };
    let pipeline = Arc::new(ProcessingPipeline::new(
        db.clone(),
        Arc::new(EmptyFetcher),
        Some(llm.clone()),
        tuning,
    ));
    JobWorker::new(db.clone(), pipeline, wake_rx).spawn();

    let reconciler = Arc::new(LifecycleReconciler::new(
        db.clone(),
        video.clone(),
        chat.clone(),
        Some(llm),
        jobs.clone(),
    ));

    let state = AppState {
        db: db.clone(),
        reconciler,
        locks: ConnectLockRegistry::default(),
        jobs,
        webhook_secret: SECRET.into(),
    };

    TestApp {
        router: ApiServer::build_router(state),
        db,
        video,
        chat,
    }
}

async fn send_json(router: &Router, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn send_webhook(router: &Router, event: Value) -> (StatusCode, Value) {
    let body = event.to_string();
    let sig = signature::sign(SECRET, body.as_bytes());

    let request = Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("x-signature", sig)
        .body(Body::from(body))
        .unwrap();

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

async fn seed(app: &TestApp, meeting_id: &str, agent_id: Option<&str>) {
    let (_, user) = send_json(
        &app.router,
        "POST",
        "/users",
        json!({"id": "user-1", "name": "Ada"}),
    )
    .await;
    assert_eq!(user["success"], json!(true));

    if let Some(agent_id) = agent_id {
        let (status, _) = send_json(
            &app.router,
            "POST",
            "/agents",
            json!({"id": agent_id, "name": "Scribe", "instructions": "Take notes.", "userId": "user-1"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, _) = send_json(
        &app.router,
        "POST",
        "/meetings",
        json!({"id": meeting_id, "name": "Standup", "userId": "user-1", "agentId": agent_id}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

async fn meeting_record(app: &TestApp, id: &str) -> huddle::db::MeetingRecord {
    let id = id.to_string();
    app.db
        .with(move |conn| Ok(MeetingRepository::get(conn, &id)?.unwrap()))
        .await
        .unwrap()
}

async fn wait_for_status(app: &TestApp, id: &str, expected: MeetingStatus) {
    for _ in 0..100 {
        if meeting_record(app, id).await.status == expected {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    panic!(
        "meeting {} never reached {:?}, currently {:?}",
        id,
        expected,
        meeting_record(app, id).await.status
    );
}

fn session_event(event_type: &str, meeting_id: &str) -> Value {
    json!({
        "type": event_type,
        "call_cid": format!("default:{meeting_id}"),
        "call": { "custom": { "meetingId": meeting_id } }
    })
}

#[tokio::test]
async fn webhook_rejects_missing_signature() {
    let app = build_app();

    let request = Request::builder()
        .method("POST")
        .uri("/webhook")
        .body(Body::from(r#"{"type":"call.session_started"}"#))
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn webhook_rejects_tampered_body_without_side_effects() {
    let app = build_app();
    seed(&app, "m1", None).await;

    let original = session_event("call.session_started", "m1").to_string();
    let sig = signature::sign(SECRET, original.as_bytes());
    let tampered = session_event("call.session_started", "m1").to_string() + " ";

    let request = Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("x-signature", sig)
        .body(Body::from(tampered))
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(meeting_record(&app, "m1").await.status, MeetingStatus::Upcoming);
}

#[tokio::test]
async fn webhook_rejects_invalid_json() {
    let app = build_app();

    let body = "not json at all";
    let sig = signature::sign(SECRET, body.as_bytes());
    let request = Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("x-signature", sig)
        .body(Body::from(body))
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_event_is_acknowledged() {
    let app = build_app();

    let (status, body) = send_webhook(&app.router, json!({"type": "call.reaction_new"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("ok"));
}

#[tokio::test]
async fn session_started_activates_meeting_and_connects_agent() {
    let app = build_app();
    seed(&app, "m1", Some("a1")).await;

    let (status, body) =
        send_webhook(&app.router, session_event("call.session_started", "m1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("ok"));

    let meeting = meeting_record(&app, "m1").await;
    assert_eq!(meeting.status, MeetingStatus::Active);
    assert!(meeting.started_at.is_some());
    assert_eq!(
        app.video.connected.lock().unwrap().clone(),
        vec![("m1".to_string(), "a1".to_string())]
    );
    assert_eq!(
        app.video.instructions.lock().unwrap().clone(),
        vec!["Take notes.".to_string()]
    );

    // Identical redelivery: acknowledged, no second connect, timestamps kept.
    let started_at = meeting.started_at;
    let (status, _) = send_webhook(&app.router, session_event("call.session_started", "m1")).await;
    assert_eq!(status, StatusCode::OK);

    let meeting = meeting_record(&app, "m1").await;
    assert_eq!(meeting.started_at, started_at);
    assert_eq!(app.video.connected.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn full_lifecycle_reaches_completed_with_fallback_summary() {
    let app = build_app();
    seed(&app, "m1", Some("a1")).await;

    send_webhook(&app.router, session_event("call.session_started", "m1")).await;
    send_webhook(&app.router, session_event("call.session_ended", "m1")).await;

    // Chat channel created with the owner as member
    assert_eq!(app.chat.channels.lock().unwrap().clone(), vec!["m1".to_string()]);
    assert_eq!(
        app.chat.members.lock().unwrap().clone(),
        vec![("m1".to_string(), "user-1".to_string())]
    );

    // Transcript-ready points at an artifact that parses to zero items; the
    // pipeline falls back and completes the meeting.
    let (status, _) = send_webhook(
        &app.router,
        json!({
            "type": "call.transcription_ready",
            "call_cid": "default:m1",
            "call_transcription": { "url": "https://x/t.jsonl" }
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    wait_for_status(&app, "m1", MeetingStatus::Completed).await;

    let meeting = meeting_record(&app, "m1").await;
    assert_eq!(meeting.transcript_url.as_deref(), Some("https://x/t.jsonl"));
    assert!(meeting.summary.is_some());
}

#[tokio::test]
async fn mark_ended_is_a_processing_fallback() {
    let app = build_app();
    seed(&app, "m1", None).await;

    let (status, body) = send_json(
        &app.router,
        "POST",
        "/meetings/mark-ended",
        json!({"meetingId": "m1"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));

    wait_for_status(&app, "m1", MeetingStatus::Completed).await;

    let (status, _) = send_json(
        &app.router,
        "POST",
        "/meetings/mark-ended",
        json!({"meetingId": "ghost"}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn connect_agent_flow() {
    let app = build_app();
    seed(&app, "m1", None).await;

    // Validation
    let (status, _) = send_json(
        &app.router,
        "POST",
        "/connect-agent",
        json!({"meetingId": "", "agentId": "a1"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Unknown meeting
    let (status, _) = send_json(
        &app.router,
        "POST",
        "/connect-agent",
        json!({"meetingId": "ghost", "agentId": "a1"}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Success: upcoming meeting promoted and agent persisted
    let (_, agent) = send_json(
        &app.router,
        "POST",
        "/agents",
        json!({"id": "a1", "name": "Scribe", "instructions": "Take notes.", "userId": "user-1"}),
    )
    .await;
    assert_eq!(agent["id"], json!("a1"));

    let (status, body) = send_json(
        &app.router,
        "POST",
        "/connect-agent",
        json!({"meetingId": "m1", "agentId": "a1"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));

    let meeting = meeting_record(&app, "m1").await;
    assert_eq!(meeting.status, MeetingStatus::Active);
    assert_eq!(meeting.agent_id.as_deref(), Some("a1"));

    // Same agent again: short-circuit success, no extra provider call
    let (status, body) = send_json(
        &app.router,
        "POST",
        "/connect-agent",
        json!({"meetingId": "m1", "agentId": "a1"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["alreadyConnected"], json!(true));
    assert_eq!(app.video.connected.lock().unwrap().len(), 1);

    // Different agent: conflict, agent_id untouched
    let (status, _) = send_json(
        &app.router,
        "POST",
        "/connect-agent",
        json!({"meetingId": "m1", "agentId": "a2"}),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(meeting_record(&app, "m1").await.agent_id.as_deref(), Some("a1"));
}

#[tokio::test]
async fn chat_message_gets_ai_reply_and_agent_messages_are_ignored() {
    let app = build_app();
    seed(&app, "m1", Some("a1")).await;

    // Drive the meeting to completed
    send_webhook(&app.router, session_event("call.session_started", "m1")).await;
    send_webhook(&app.router, session_event("call.session_ended", "m1")).await;
    wait_for_status(&app, "m1", MeetingStatus::Completed).await;

    // A user question produces one agent reply
    let (status, _) = send_webhook(
        &app.router,
        json!({
            "type": "message.new",
            "user": { "id": "user-1" },
            "channel_id": "m1",
            "message": { "text": "What did we decide?" }
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let sent = app.chat.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1, "a1");
    assert_eq!(sent[0].2, "The team agreed on the rollout plan.");

    // The agent's own message triggers no reply
    let (status, body) = send_webhook(
        &app.router,
        json!({
            "type": "message.new",
            "user": { "id": "a1" },
            "channel_id": "m1",
            "message": { "text": "The team agreed on the rollout plan." }
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("ok"));
    assert_eq!(app.chat.sent.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn regenerate_summary_requires_completed_meeting_with_transcript() {
    let app = build_app();
    seed(&app, "m1", None).await;

    // Not completed yet
    let (status, _) = send_json(
        &app.router,
        "POST",
        "/meetings/m1/regenerate-summary",
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    send_webhook(&app.router, session_event("call.session_started", "m1")).await;
    send_webhook(&app.router, session_event("call.session_ended", "m1")).await;
    send_webhook(
        &app.router,
        json!({
            "type": "call.transcription_ready",
            "call_cid": "default:m1",
            "call_transcription": { "url": "https://x/t.jsonl" }
        }),
    )
    .await;
    wait_for_status(&app, "m1", MeetingStatus::Completed).await;

    let (status, body) = send_json(
        &app.router,
        "POST",
        "/meetings/m1/regenerate-summary",
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));

    wait_for_status(&app, "m1", MeetingStatus::Completed).await;
}

#[tokio::test]
async fn cancel_only_from_upcoming() {
    let app = build_app();
    seed(&app, "m1", None).await;

    send_webhook(&app.router, session_event("call.session_started", "m1")).await;

    let (status, _) = send_json(&app.router, "POST", "/meetings/m1/cancel", json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);

    seed(&app, "m2", None).await;
    let (status, body) = send_json(&app.router, "POST", "/meetings/m2/cancel", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));
    assert_eq!(meeting_record(&app, "m2").await.status, MeetingStatus::Cancelled);

    // A cancelled meeting cannot be started by a late event
    let (status, _) = send_webhook(&app.router, session_event("call.session_started", "m2")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(meeting_record(&app, "m2").await.status, MeetingStatus::Cancelled);
}

//! On-demand agent connection.
//!
//! Synchronous path invoked from the call UI while a meeting is live. The
//! advisory connect lock keeps near-simultaneous requests for the same
//! meeting from racing; the flow itself is idempotent (already-connected
//! short-circuit), so a raced request after lock expiry is harmless.

use chrono::Utc;
use tracing::{info, warn};

use crate::db::{AgentRepository, MeetingRepository};
use crate::error::{ServiceError, ServiceResult};
use crate::lifecycle::connect_lock::ConnectLockRegistry;
use crate::lifecycle::reconciler::LifecycleReconciler;
use crate::lifecycle::status::MeetingStatus;

#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub meeting_id: String,
    pub agent_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Agent connected and persisted on the meeting.
    Connected,
    /// The requested agent was already assigned; no provider calls issued.
    AlreadyConnected,
    /// Another connect attempt for this meeting is in flight.
    InProgress,
}

impl LifecycleReconciler {
    /// Connect an agent to a live (or about-to-start) meeting.
    pub async fn connect_agent(
        &self,
        request: &ConnectRequest,
        locks: &ConnectLockRegistry,
    ) -> ServiceResult<ConnectOutcome> {
        let meeting_id = request.meeting_id.trim();
        let agent_id = request.agent_id.trim();

        if meeting_id.is_empty() || agent_id.is_empty() {
            return Err(ServiceError::validation("Missing meetingId or agentId"));
        }

        // Held for the rest of the call; dropped on every exit path,
        // including caller-side cancellation of the request future.
        let Some(_lock) = locks.try_acquire(meeting_id) else {
            info!("Agent connection already in progress for meeting {}", meeting_id);
            return Ok(ConnectOutcome::InProgress);
        };

        let meeting_id_owned = meeting_id.to_string();
        let meeting = self
            .db
            .with(|conn| MeetingRepository::get(conn, &meeting_id_owned))
            .await?
            .ok_or_else(|| ServiceError::not_found("Meeting not found"))?;

        if matches!(
            meeting.status,
            MeetingStatus::Completed | MeetingStatus::Cancelled
        ) {
            return Err(ServiceError::validation(
                "Meeting is already completed or cancelled",
            ));
        }

        if let Some(existing) = &meeting.agent_id {
            if existing != agent_id {
                return Err(ServiceError::conflict(
                    "Another AI agent is already connected to this meeting",
                ));
            }
            info!("Agent {} already connected to meeting {}", agent_id, meeting_id);
            return Ok(ConnectOutcome::AlreadyConnected);
        }

        // First connect effectively starts the meeting.
        if meeting.status == MeetingStatus::Upcoming {
            let now = Utc::now().to_rfc3339();
            self.db
                .with(|conn| MeetingRepository::start_if_eligible(conn, &meeting_id_owned, &now))
                .await?;
            info!("Meeting {} promoted to active by connect request", meeting_id);
        }

        let agent_id_owned = agent_id.to_string();
        let agent = self
            .db
            .with(|conn| AgentRepository::get(conn, &agent_id_owned))
            .await?
            .ok_or_else(|| ServiceError::not_found("Agent not found"))?;

        if self.llm.is_none() {
            return Err(ServiceError::configuration("AI service not configured"));
        }

        // Ensure the underlying call exists; create it on the fly when the
        // provider reports it missing.
        if let Err(get_err) = self.video.get_call(meeting_id).await {
            warn!("Call missing for meeting {} ({}), creating it", meeting_id, get_err);
            if let Err(create_err) = self.video.create_call(meeting_id, &meeting.user_id).await {
                return Err(ServiceError::NotFound(format!(
                    "Meeting call not found or not accessible: {create_err}"
                )));
            }
        }

        if let Err(e) = self.video.upsert_user(&agent.id, &agent.name).await {
            warn!("Failed to upsert agent user with video provider: {}", e);
        }

        let session = self
            .video
            .connect_agent(meeting_id, &agent.id)
            .await
            .map_err(|e| ServiceError::Provider {
                message: e.user_message().to_string(),
                detail: e.detail().to_string(),
            })?;

        info!("AI agent {} connected to meeting {}", agent.id, meeting_id);

        self.db
            .with(|conn| MeetingRepository::assign_agent(conn, &meeting_id_owned, &agent.id))
            .await?;

        if !agent.instructions.is_empty() {
            if let Err(e) = session.update_instructions(&agent.instructions).await {
                warn!("updateSession failed; continuing without instructions: {}", e);
            }
        }

        Ok(ConnectOutcome::Connected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::reconciler::test_support::*;
    use std::sync::atomic::Ordering;

    fn request(meeting_id: &str, agent_id: &str) -> ConnectRequest {
        ConnectRequest {
            meeting_id: meeting_id.to_string(),
            agent_id: agent_id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_connect_promotes_upcoming_meeting() {
        let h = harness();
        seed_meeting(&h.db, "m1", None).await;
        seed_agent(&h.db, "a1").await;
        h.video.call_exists.store(true, Ordering::SeqCst);

        let locks = ConnectLockRegistry::default();
        let outcome = h
            .reconciler
            .connect_agent(&request("m1", "a1"), &locks)
            .await
            .unwrap();

        assert_eq!(outcome, ConnectOutcome::Connected);

        let meeting = get_meeting(&h.db, "m1").await;
        assert_eq!(meeting.status, MeetingStatus::Active);
        assert_eq!(meeting.agent_id.as_deref(), Some("a1"));
        assert!(meeting.started_at.is_some());

        assert_eq!(h.video.instructions.lock().unwrap().clone(), vec!["Take notes."]);
    }

    #[tokio::test]
    async fn test_connect_creates_missing_call() {
        let h = harness();
        seed_meeting(&h.db, "m1", None).await;
        seed_agent(&h.db, "a1").await;
        // call_exists defaults to false: the provider reports the call missing

        let locks = ConnectLockRegistry::default();
        let outcome = h
            .reconciler
            .connect_agent(&request("m1", "a1"), &locks)
            .await
            .unwrap();

        assert_eq!(outcome, ConnectOutcome::Connected);
        assert_eq!(h.video.created_calls.lock().unwrap().clone(), vec!["m1".to_string()]);
    }

    #[tokio::test]
    async fn test_connect_validation() {
        let h = harness();
        let locks = ConnectLockRegistry::default();

        let result = h.reconciler.connect_agent(&request("  ", "a1"), &locks).await;
        assert!(matches!(result, Err(ServiceError::Validation(_))));

        let result = h.reconciler.connect_agent(&request("m1", ""), &locks).await;
        assert!(matches!(result, Err(ServiceError::Validation(_))));
    }

    #[tokio::test]
    async fn test_connect_missing_meeting() {
        let h = harness();
        let locks = ConnectLockRegistry::default();

        let result = h.reconciler.connect_agent(&request("ghost", "a1"), &locks).await;
        assert!(matches!(result, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_connect_rejects_finished_meeting() {
        let h = harness();
        seed_meeting(&h.db, "m1", None).await;
        h.db.with(|conn| MeetingRepository::cancel_if_upcoming(conn, "m1"))
            .await
            .unwrap();

        let locks = ConnectLockRegistry::default();
        let result = h.reconciler.connect_agent(&request("m1", "a1"), &locks).await;
        assert!(matches!(result, Err(ServiceError::Validation(_))));
    }

    #[tokio::test]
    async fn test_connect_conflicting_agent() {
        let h = harness();
        seed_meeting(&h.db, "m1", Some("a1")).await;
        seed_agent(&h.db, "a1").await;

        let locks = ConnectLockRegistry::default();
        let result = h.reconciler.connect_agent(&request("m1", "a2"), &locks).await;
        assert!(matches!(result, Err(ServiceError::Conflict(_))));

        // agent_id untouched
        assert_eq!(get_meeting(&h.db, "m1").await.agent_id.as_deref(), Some("a1"));
    }

    #[tokio::test]
    async fn test_connect_same_agent_short_circuits() {
        let h = harness();
        seed_meeting(&h.db, "m1", Some("a1")).await;
        seed_agent(&h.db, "a1").await;

        let locks = ConnectLockRegistry::default();
        let outcome = h
            .reconciler
            .connect_agent(&request("m1", "a1"), &locks)
            .await
            .unwrap();

        assert_eq!(outcome, ConnectOutcome::AlreadyConnected);
        // No provider calls issued
        assert!(h.video.connected.lock().unwrap().is_empty());
        assert!(h.video.created_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_connect_in_progress_when_locked() {
        let h = harness();
        seed_meeting(&h.db, "m1", None).await;
        seed_agent(&h.db, "a1").await;

        let locks = ConnectLockRegistry::default();
        let _held = locks.try_acquire("m1").unwrap();

        let outcome = h
            .reconciler
            .connect_agent(&request("m1", "a1"), &locks)
            .await
            .unwrap();
        assert_eq!(outcome, ConnectOutcome::InProgress);

        // State untouched
        assert_eq!(get_meeting(&h.db, "m1").await.status, MeetingStatus::Upcoming);
    }

    #[tokio::test]
    async fn test_connect_missing_agent() {
        let h = harness();
        seed_meeting(&h.db, "m1", None).await;

        let locks = ConnectLockRegistry::default();
        let result = h.reconciler.connect_agent(&request("m1", "ghost"), &locks).await;
        assert!(matches!(result, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_connect_without_llm_is_configuration_error() {
        let h = harness();
        seed_meeting(&h.db, "m1", None).await;
        seed_agent(&h.db, "a1").await;

        let reconciler = crate::lifecycle::reconciler::LifecycleReconciler::new(
            h.db.clone(),
            h.video.clone(),
            h.chat.clone(),
            None,
            h.reconciler.jobs.clone(),
        );

        let locks = ConnectLockRegistry::default();
        let result = reconciler.connect_agent(&request("m1", "a1"), &locks).await;
        assert!(matches!(result, Err(ServiceError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_connect_provider_failure_is_classified_and_releases_lock() {
        let h = harness();
        seed_meeting(&h.db, "m1", None).await;
        seed_agent(&h.db, "a1").await;
        h.video.call_exists.store(true, Ordering::SeqCst);
        *h.video.fail_connect_status.lock().unwrap() = Some(429);

        let locks = ConnectLockRegistry::default();
        let result = h.reconciler.connect_agent(&request("m1", "a1"), &locks).await;

        match result {
            Err(ServiceError::Provider { message, detail }) => {
                assert_eq!(message, "Rate limit exceeded - please try again in a moment");
                assert!(detail.contains("provider says no"));
            }
            other => panic!("unexpected result: {:?}", other),
        }

        // Lock released despite the failure: a retry is not "in progress".
        *h.video.fail_connect_status.lock().unwrap() = None;
        let outcome = h
            .reconciler
            .connect_agent(&request("m1", "a1"), &locks)
            .await
            .unwrap();
        assert_eq!(outcome, ConnectOutcome::Connected);
    }
}

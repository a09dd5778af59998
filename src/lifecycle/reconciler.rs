//! Lifecycle reconciliation.
//!
//! Translates authenticated, possibly-redelivered provider events into
//! idempotent state transitions on meeting records. Idempotency comes from
//! conditional status transitions in the repository, not from a dedup log:
//! every handler is safe to run twice with the same payload.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::db::{AgentRepository, Db, MeetingRepository};
use crate::error::{ServiceError, ServiceResult};
use crate::jobs::JobQueue;
use crate::lifecycle::events::{
    CallEvent, MessageNewEvent, RecordingReadyEvent, SessionEvent, TranscriptionReadyEvent,
};
use crate::lifecycle::status::MeetingStatus;
use crate::providers::{
    avatar_url, ChatIdentity, ChatProvider, LlmClient, LlmMessage, VideoProvider,
};

/// How many prior channel messages feed the chat reply as context.
const CHAT_CONTEXT_MESSAGES: usize = 5;

pub struct LifecycleReconciler {
    pub(crate) db: Db,
    pub(crate) video: Arc<dyn VideoProvider>,
    pub(crate) chat: Arc<dyn ChatProvider>,
    pub(crate) llm: Option<Arc<dyn LlmClient>>,
    pub(crate) jobs: JobQueue,
}

impl LifecycleReconciler {
    pub fn new(
        db: Db,
        video: Arc<dyn VideoProvider>,
        chat: Arc<dyn ChatProvider>,
        llm: Option<Arc<dyn LlmClient>>,
        jobs: JobQueue,
    ) -> Self {
        Self {
            db,
            video,
            chat,
            llm,
            jobs,
        }
    }

    /// Apply one decoded webhook event.
    pub async fn apply(&self, event: CallEvent) -> ServiceResult<()> {
        match event {
            CallEvent::SessionStarted(ev) => self.on_session_started(ev).await,
            // A single participant leaving never ends the call; the provider
            // emits session_ended when the call actually ends.
            CallEvent::ParticipantLeft(_) => Ok(()),
            CallEvent::SessionEnded(ev) => self.on_session_ended(ev).await,
            CallEvent::TranscriptionReady(ev) => self.on_transcription_ready(ev).await,
            CallEvent::RecordingReady(ev) => self.on_recording_ready(ev).await,
            CallEvent::MessageNew(ev) => self.on_message_new(ev).await,
            CallEvent::Unknown { event_type } => {
                debug!("Ignoring unknown event type: {}", event_type);
                Ok(())
            }
        }
    }

    async fn on_session_started(&self, event: SessionEvent) -> ServiceResult<()> {
        let meeting_id = event
            .meeting_id()
            .ok_or_else(|| ServiceError::validation("Missing meetingId"))?;

        info!("Session started for meeting {}", meeting_id);

        let now = Utc::now().to_rfc3339();
        let started = self
            .db
            .with(|conn| MeetingRepository::start_if_eligible(conn, &meeting_id, &now))
            .await?;

        if !started {
            let meeting = self
                .db
                .with(|conn| MeetingRepository::get(conn, &meeting_id))
                .await?;
            return match meeting {
                // Redelivery or already past upcoming: acknowledged no-op.
                Some(m) => {
                    debug!(
                        "Ignoring session_started for meeting {} in status {}",
                        meeting_id,
                        m.status.as_str()
                    );
                    Ok(())
                }
                None => Err(ServiceError::not_found("Meeting not found")),
            };
        }

        let meeting = self
            .db
            .with(|conn| MeetingRepository::get(conn, &meeting_id))
            .await?
            .ok_or_else(|| ServiceError::not_found("Meeting not found"))?;

        let Some(agent_id) = meeting.agent_id else {
            debug!("Meeting {} has no assigned agent", meeting_id);
            return Ok(());
        };

        let agent = self
            .db
            .with(|conn| AgentRepository::get(conn, &agent_id))
            .await?
            .ok_or_else(|| ServiceError::not_found("Agent not found"))?;

        if self.llm.is_none() {
            warn!(
                "No LLM credential configured; agent {} will not join meeting {}",
                agent.id, meeting_id
            );
            return Ok(());
        }

        // Provider failures here must not fail the webhook: the meeting is
        // active either way, and the client can connect the agent on demand.
        match self.video.connect_agent(&meeting_id, &agent.id).await {
            Ok(session) => {
                info!("AI agent {} connected to meeting {}", agent.id, meeting_id);
                if let Err(e) = session.update_instructions(&agent.instructions).await {
                    warn!("Failed to push agent instructions: {}", e);
                }
            }
            Err(e) => {
                error!("Failed to connect AI agent to meeting {}: {}", meeting_id, e);
            }
        }

        Ok(())
    }

    async fn on_session_ended(&self, event: SessionEvent) -> ServiceResult<()> {
        let meeting_id = event
            .meeting_id()
            .ok_or_else(|| ServiceError::validation("Missing meetingId"))?;

        let now = Utc::now().to_rfc3339();
        let transitioned = self
            .db
            .with(|conn| MeetingRepository::begin_processing_if_active(conn, &meeting_id, &now))
            .await?;

        if !transitioned {
            debug!(
                "Ignoring session_ended for meeting {} (not active)",
                meeting_id
            );
            return Ok(());
        }

        info!("Meeting {} ended, moving to processing", meeting_id);

        let meeting = self
            .db
            .with(|conn| MeetingRepository::get(conn, &meeting_id))
            .await?
            .ok_or_else(|| ServiceError::not_found("Meeting not found"))?;

        // Post-meeting Q&A channel; failure here must not block processing.
        if let Err(e) = self.chat.ensure_channel(&meeting_id).await {
            error!("Failed to create chat channel for meeting {}: {}", meeting_id, e);
        } else if let Err(e) = self.chat.add_member(&meeting_id, &meeting.user_id).await {
            error!("Failed to add owner to chat channel {}: {}", meeting_id, e);
        }

        self.jobs
            .enqueue(&meeting_id, meeting.transcript_url.as_deref(), false)
            .await?;

        Ok(())
    }

    async fn on_transcription_ready(&self, event: TranscriptionReadyEvent) -> ServiceResult<()> {
        let meeting_id = event
            .meeting_id()
            .ok_or_else(|| ServiceError::validation("Missing meetingId"))?;

        let url = event
            .call_transcription
            .url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ServiceError::validation("Missing transcript URL"))?;

        let updated = self
            .db
            .with(|conn| MeetingRepository::set_transcript_url(conn, &meeting_id, &url))
            .await?;

        if !updated {
            return Err(ServiceError::not_found("Meeting not found"));
        }

        info!("Transcript ready for meeting {}: {}", meeting_id, url);

        // Re-enqueue on redelivery is fine: the pipeline tolerates
        // duplicate jobs for the same meeting.
        self.jobs.enqueue(&meeting_id, Some(&url), false).await?;

        Ok(())
    }

    async fn on_recording_ready(&self, event: RecordingReadyEvent) -> ServiceResult<()> {
        let meeting_id = event
            .meeting_id()
            .ok_or_else(|| ServiceError::validation("Missing meetingId"))?;

        let url = event
            .call_recording
            .url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ServiceError::validation("Missing recording URL"))?;

        let updated = self
            .db
            .with(|conn| MeetingRepository::set_recording_url(conn, &meeting_id, &url))
            .await?;

        if !updated {
            warn!("Recording ready for unknown meeting {}", meeting_id);
        }

        Ok(())
    }

    async fn on_message_new(&self, event: MessageNewEvent) -> ServiceResult<()> {
        let (Some(sender_id), Some(channel_id), Some(text)) =
            (event.user.id, event.channel_id, event.message.text)
        else {
            return Err(ServiceError::validation("Missing required fields"));
        };

        let meeting = self
            .db
            .with(|conn| MeetingRepository::get(conn, &channel_id))
            .await?
            .filter(|m| m.status == MeetingStatus::Completed)
            .ok_or_else(|| ServiceError::not_found("Meeting not found"))?;

        let agent_id = meeting
            .agent_id
            .ok_or_else(|| ServiceError::not_found("Agent not found"))?;

        let agent = self
            .db
            .with(|conn| AgentRepository::get(conn, &agent_id))
            .await?
            .ok_or_else(|| ServiceError::not_found("Agent not found"))?;

        // The agent's own messages also arrive here; replying to them would
        // loop forever.
        if sender_id == agent.id {
            debug!("Skipping agent's own message in channel {}", channel_id);
            return Ok(());
        }

        let llm = self
            .llm
            .as_ref()
            .ok_or_else(|| ServiceError::configuration("AI service not configured"))?;

        let instructions = chat_instructions(
            meeting.summary.as_deref().unwrap_or(""),
            &agent.instructions,
        );

        let mut messages = vec![LlmMessage::system(instructions)];
        match self
            .chat
            .recent_messages(&channel_id, CHAT_CONTEXT_MESSAGES)
            .await
        {
            Ok(previous) => {
                for msg in previous {
                    if msg.text.trim().is_empty() {
                        continue;
                    }
                    if msg.sender_id == agent.id {
                        messages.push(LlmMessage::assistant(msg.text));
                    } else {
                        messages.push(LlmMessage::user(msg.text));
                    }
                }
            }
            Err(e) => {
                warn!("Failed to load channel history for {}: {}", channel_id, e);
            }
        }
        messages.push(LlmMessage::user(text));

        let reply = llm.chat(&messages).await.map_err(|e| ServiceError::Provider {
            message: "LLM completion failed".to_string(),
            detail: e.to_string(),
        })?;

        if reply.trim().is_empty() {
            return Err(ServiceError::validation("No response from LLM"));
        }

        let identity = ChatIdentity {
            id: agent.id.clone(),
            name: agent.name.clone(),
            avatar_url: Some(avatar_url(&agent.name)),
        };

        if let Err(e) = self.chat.upsert_user(&identity).await {
            warn!("Failed to upsert agent chat identity {}: {}", agent.id, e);
        }

        self.chat
            .send_message(&channel_id, &identity, &reply)
            .await
            .map_err(|e| ServiceError::Provider {
                message: "Failed to post chat reply".to_string(),
                detail: e.to_string(),
            })?;

        info!("AI reply posted in channel {}", channel_id);
        Ok(())
    }

    /// Best-effort end-of-call fallback: mark the meeting processing and
    /// enqueue the job even if the provider's session-ended event is late
    /// or lost. Safe to race with the webhook; enqueue is idempotent.
    pub async fn mark_ended(&self, meeting_id: &str) -> ServiceResult<()> {
        if meeting_id.trim().is_empty() {
            return Err(ServiceError::validation("Missing meetingId"));
        }

        let now = Utc::now().to_rfc3339();
        let meeting_id_owned = meeting_id.to_string();
        let updated = self
            .db
            .with(|conn| MeetingRepository::force_processing(conn, &meeting_id_owned, &now))
            .await?;

        if !updated {
            return Err(ServiceError::not_found("Meeting not found"));
        }

        let meeting = self
            .db
            .with(|conn| MeetingRepository::get(conn, &meeting_id_owned))
            .await?;

        let transcript_url = meeting.and_then(|m| m.transcript_url);
        if let Err(e) = self
            .jobs
            .enqueue(meeting_id, transcript_url.as_deref(), false)
            .await
        {
            // Kick off processing is best-effort here; the transcript-ready
            // event will enqueue again.
            warn!("Failed to enqueue processing for meeting {}: {:#}", meeting_id, e);
        }

        Ok(())
    }

    /// User-triggered summary regeneration for a completed meeting.
    pub async fn regenerate_summary(&self, meeting_id: &str) -> ServiceResult<()> {
        let meeting_id_owned = meeting_id.to_string();
        let meeting = self
            .db
            .with(|conn| MeetingRepository::get(conn, &meeting_id_owned))
            .await?
            .filter(|m| m.status == MeetingStatus::Completed)
            .ok_or_else(|| ServiceError::not_found("Meeting not found or not completed"))?;

        let url = meeting
            .transcript_url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                ServiceError::validation("No transcript available for this meeting")
            })?;

        self.jobs.enqueue(meeting_id, Some(&url), true).await?;

        info!("Summary regeneration queued for meeting {}", meeting_id);
        Ok(())
    }
}

fn chat_instructions(summary: &str, agent_instructions: &str) -> String {
    format!(
        "You are an AI assistant helping the user revisit a recently completed meeting.\n\
         Below is a summary of the meeting, generated from the transcript:\n\n\
         {summary}\n\n\
         The following are your original instructions from the live meeting assistant. \
         Please continue to follow these behavioral guidelines as you assist the user:\n\n\
         {agent_instructions}\n\n\
         The user may ask questions about the meeting, request clarifications, or ask for \
         follow-up actions. Always base your responses on the meeting summary above.\n\n\
         You also have access to the recent conversation history between you and the user. \
         Use the context of previous messages to provide relevant, coherent, and helpful \
         responses. If the user's question refers to something discussed earlier, make sure \
         to take that into account and maintain continuity in the conversation.\n\n\
         If the summary does not contain enough information to answer a question, politely \
         let the user know.\n\n\
         Be concise, helpful, and focus on providing accurate information from the meeting \
         and the ongoing conversation."
    )
}

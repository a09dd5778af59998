//! Webhook event envelope.
//!
//! Inbound events arrive as JSON with a `type` discriminator. The closed
//! `CallEvent` enum keeps dispatch exhaustive at compile time; event types
//! outside the set decode to `Unknown` and are acknowledged as no-ops so the
//! provider does not retry them.

use anyhow::Result;
use serde::Deserialize;
use serde_json::Value;

/// Call metadata embedded in session events.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallInfo {
    #[serde(default)]
    pub custom: CustomData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CustomData {
    #[serde(rename = "meetingId")]
    pub meeting_id: Option<String>,
}

/// Shared shape of session-scoped events (started / ended / participant
/// left). The meeting id lives either in the custom metadata or in the
/// `call_cid` ("type:id") field.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionEvent {
    #[serde(default)]
    pub call_cid: Option<String>,
    #[serde(default)]
    pub call: Option<CallInfo>,
}

impl SessionEvent {
    pub fn meeting_id(&self) -> Option<String> {
        if let Some(call) = &self.call {
            if let Some(id) = &call.custom.meeting_id {
                if !id.is_empty() {
                    return Some(id.clone());
                }
            }
        }
        meeting_id_from_cid(self.call_cid.as_deref())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArtifactRef {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TranscriptionReadyEvent {
    #[serde(default)]
    pub call_cid: Option<String>,
    #[serde(default)]
    pub call_transcription: ArtifactRef,
}

impl TranscriptionReadyEvent {
    pub fn meeting_id(&self) -> Option<String> {
        meeting_id_from_cid(self.call_cid.as_deref())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordingReadyEvent {
    #[serde(default)]
    pub call_cid: Option<String>,
    #[serde(default)]
    pub call_recording: ArtifactRef,
}

impl RecordingReadyEvent {
    pub fn meeting_id(&self) -> Option<String> {
        meeting_id_from_cid(self.call_cid.as_deref())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserRef {
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageRef {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageNewEvent {
    #[serde(default)]
    pub user: UserRef,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub message: MessageRef,
}

/// A decoded webhook event.
#[derive(Debug, Clone)]
pub enum CallEvent {
    SessionStarted(SessionEvent),
    ParticipantLeft(SessionEvent),
    SessionEnded(SessionEvent),
    TranscriptionReady(TranscriptionReadyEvent),
    RecordingReady(RecordingReadyEvent),
    MessageNew(MessageNewEvent),
    Unknown { event_type: String },
}

impl CallEvent {
    /// Decode a JSON envelope by its `type` discriminator.
    ///
    /// Returns Err only for malformed JSON or payloads whose fields have the
    /// wrong shape; an unrecognized `type` is a successful `Unknown`.
    pub fn parse(body: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(body)?;
        let event_type = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let event = match event_type.as_str() {
            "call.session_started" => Self::SessionStarted(serde_json::from_value(value)?),
            "call.session_participant_left" => Self::ParticipantLeft(serde_json::from_value(value)?),
            "call.session_ended" => Self::SessionEnded(serde_json::from_value(value)?),
            // Some provider versions deliver the session-scoped alias.
            "call.transcription_ready" | "call.session_transcription_ready" => {
                Self::TranscriptionReady(serde_json::from_value(value)?)
            }
            "call.recording_ready" => Self::RecordingReady(serde_json::from_value(value)?),
            "message.new" => Self::MessageNew(serde_json::from_value(value)?),
            other => Self::Unknown {
                event_type: other.to_string(),
            },
        };

        Ok(event)
    }
}

fn meeting_id_from_cid(call_cid: Option<&str>) -> Option<String> {
    let cid = call_cid?;
    let id = cid.split(':').nth(1)?;
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

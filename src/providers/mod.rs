//! External collaborator seams.
//!
//! The video/call provider, the chat provider and the LLM API are consumed
//! through object-safe traits so the reconciler and pipeline can be tested
//! with in-memory fakes. The HTTP implementations live alongside.

pub mod chat_api;
pub mod llm_api;
pub mod video_api;

use async_trait::async_trait;
use thiserror::Error;

pub use chat_api::ChatApiProvider;
pub use llm_api::OpenAiClient;
pub use video_api::VideoApiProvider;

/// Failure talking to an external provider, classified into the small set
/// of causes surfaced to users. The raw detail is kept for operators.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited: {0}")]
    RateLimit(String),

    #[error("provider request failed: {0}")]
    Other(String),
}

impl ProviderError {
    /// Classify an HTTP status into a provider error.
    pub fn from_status(status: u16, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        match status {
            401 | 403 => Self::Authentication(detail),
            404 => Self::NotFound(detail),
            429 => Self::RateLimit(detail),
            _ => Self::Other(detail),
        }
    }

    /// Short user-facing message for the connect flow.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Authentication(_) => {
                "Authentication failed - please check video provider configuration"
            }
            Self::NotFound(_) => "Meeting call not found - the meeting may not be active yet",
            Self::RateLimit(_) => "Rate limit exceeded - please try again in a moment",
            Self::Other(_) => "Failed to connect AI agent to the meeting",
        }
    }

    /// Raw provider detail.
    pub fn detail(&self) -> &str {
        match self {
            Self::Authentication(d) | Self::NotFound(d) | Self::RateLimit(d) | Self::Other(d) => d,
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// A live realtime session for a connected AI participant.
#[async_trait]
pub trait RealtimeSession: Send + Sync {
    /// Push the agent's instructions into the session context.
    async fn update_instructions(&self, instructions: &str) -> ProviderResult<()>;
}

/// Real-time video/call provider.
#[async_trait]
pub trait VideoProvider: Send + Sync {
    /// Check that the call exists. Err(NotFound) when the provider has no
    /// such call.
    async fn get_call(&self, call_id: &str) -> ProviderResult<()>;

    /// Create the call, attaching the meeting id as custom metadata.
    async fn create_call(&self, call_id: &str, created_by: &str) -> ProviderResult<()>;

    /// Register or refresh a user identity with the provider.
    async fn upsert_user(&self, id: &str, name: &str) -> ProviderResult<()>;

    /// Connect an AI participant to the call, returning its realtime session.
    async fn connect_agent(
        &self,
        call_id: &str,
        agent_user_id: &str,
    ) -> ProviderResult<Box<dyn RealtimeSession>>;
}

/// A message in a chat channel.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub sender_id: String,
    pub text: String,
}

/// Identity under which a message is posted.
#[derive(Debug, Clone)]
pub struct ChatIdentity {
    pub id: String,
    pub name: String,
    pub avatar_url: Option<String>,
}

/// Real-time chat provider.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Create the channel if it does not already exist.
    async fn ensure_channel(&self, channel_id: &str) -> ProviderResult<()>;

    async fn add_member(&self, channel_id: &str, user_id: &str) -> ProviderResult<()>;

    /// Most recent messages, oldest first.
    async fn recent_messages(&self, channel_id: &str, limit: usize)
        -> ProviderResult<Vec<ChatMessage>>;

    async fn upsert_user(&self, identity: &ChatIdentity) -> ProviderResult<()>;

    async fn send_message(
        &self,
        channel_id: &str,
        sender: &ChatIdentity,
        text: &str,
    ) -> ProviderResult<()>;
}

/// Chat role for LLM conversations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmRole {
    System,
    User,
    Assistant,
}

impl LlmRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmMessage {
    pub role: LlmRole,
    pub content: String,
}

impl LlmMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: LlmRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: LlmRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: LlmRole::Assistant,
            content: content.into(),
        }
    }
}

/// LLM completion API.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Run a chat completion and return the assistant's reply text.
    async fn chat(&self, messages: &[LlmMessage]) -> ProviderResult<String>;
}

/// Deterministic avatar URL for an agent identity, seeded by name.
pub fn avatar_url(seed: &str) -> String {
    let encoded: String = seed
        .bytes()
        .map(|b| match b {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' => (b as char).to_string(),
            _ => format!("%{:02X}", b),
        })
        .collect();
    format!("https://api.dicebear.com/9.x/bottts-neutral/svg?seed={encoded}")
}

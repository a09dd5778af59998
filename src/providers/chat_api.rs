//! HTTP implementation of the chat provider.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{ChatIdentity, ChatMessage, ChatProvider, ProviderError, ProviderResult};

#[derive(Debug, Serialize)]
struct CreateChannelRequest<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    channel_type: &'static str,
}

#[derive(Debug, Serialize)]
struct AddMemberRequest<'a> {
    user_id: &'a str,
}

#[derive(Debug, Serialize)]
struct UpsertUserRequest<'a> {
    id: &'a str,
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    text: &'a str,
    user: UpsertUserRequest<'a>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    messages: Vec<ApiMessage>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

pub struct ChatApiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ChatApiProvider {
    pub fn new(base_url: String, api_key: String) -> Self {
        info!("Initialized chat provider with base URL: {}", base_url);

        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
        }
    }

    async fn check_response(response: reqwest::Response) -> ProviderResult<String> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Other(format!("Failed to read response body: {e}")))?;

        if !status.is_success() {
            return Err(ProviderError::from_status(status.as_u16(), body));
        }

        Ok(body)
    }
}

#[async_trait]
impl ChatProvider for ChatApiProvider {
    async fn ensure_channel(&self, channel_id: &str) -> ProviderResult<()> {
        let url = format!("{}/channels", self.base_url);

        let request_body = CreateChannelRequest {
            id: channel_id,
            channel_type: "messaging",
        };

        debug!("Ensuring chat channel: {}", channel_id);

        let response = self
            .client
            .post(&url)
            .header("Authorization", &self.api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| ProviderError::Other(format!("Failed to reach chat API: {e}")))?;

        Self::check_response(response).await.map(|_| ())
    }

    async fn add_member(&self, channel_id: &str, user_id: &str) -> ProviderResult<()> {
        let url = format!("{}/channels/{}/members", self.base_url, channel_id);

        let response = self
            .client
            .post(&url)
            .header("Authorization", &self.api_key)
            .json(&AddMemberRequest { user_id })
            .send()
            .await
            .map_err(|e| ProviderError::Other(format!("Failed to reach chat API: {e}")))?;

        Self::check_response(response).await.map(|_| ())
    }

    async fn recent_messages(
        &self,
        channel_id: &str,
        limit: usize,
    ) -> ProviderResult<Vec<ChatMessage>> {
        let url = format!(
            "{}/channels/{}/messages?limit={}",
            self.base_url, channel_id, limit
        );

        let response = self
            .client
            .get(&url)
            .header("Authorization", &self.api_key)
            .send()
            .await
            .map_err(|e| ProviderError::Other(format!("Failed to reach chat API: {e}")))?;

        let body = Self::check_response(response).await?;

        let parsed: MessagesResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::Other(format!("Failed to parse messages response: {e}")))?;

        Ok(parsed
            .messages
            .into_iter()
            .filter_map(|m| {
                let sender_id = m.user_id?;
                let text = m.text?;
                if text.trim().is_empty() {
                    return None;
                }
                Some(ChatMessage { sender_id, text })
            })
            .collect())
    }

    async fn upsert_user(&self, identity: &ChatIdentity) -> ProviderResult<()> {
        let url = format!("{}/users", self.base_url);

        let request_body = UpsertUserRequest {
            id: &identity.id,
            name: &identity.name,
            image: identity.avatar_url.as_deref(),
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", &self.api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| ProviderError::Other(format!("Failed to reach chat API: {e}")))?;

        Self::check_response(response).await.map(|_| ())
    }

    async fn send_message(
        &self,
        channel_id: &str,
        sender: &ChatIdentity,
        text: &str,
    ) -> ProviderResult<()> {
        let url = format!("{}/channels/{}/messages", self.base_url, channel_id);

        let request_body = SendMessageRequest {
            text,
            user: UpsertUserRequest {
                id: &sender.id,
                name: &sender.name,
                image: sender.avatar_url.as_deref(),
            },
        };

        debug!("Posting chat message to channel {}", channel_id);

        let response = self
            .client
            .post(&url)
            .header("Authorization", &self.api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| ProviderError::Other(format!("Failed to reach chat API: {e}")))?;

        Self::check_response(response).await.map(|_| ())
    }
}

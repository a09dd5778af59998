//! HTTP implementation of the video/call provider.
//!
//! Talks to the provider's REST surface: call lookup/creation, user
//! identity upsert, and connecting an AI participant whose realtime session
//! accepts instruction updates.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use super::{ProviderError, ProviderResult, RealtimeSession, VideoProvider};

#[derive(Debug, Serialize)]
struct CreateCallRequest<'a> {
    id: &'a str,
    created_by_id: &'a str,
    custom: CallCustom<'a>,
}

#[derive(Debug, Serialize)]
struct CallCustom<'a> {
    #[serde(rename = "meetingId")]
    meeting_id: &'a str,
}

#[derive(Debug, Serialize)]
struct UpsertUserRequest<'a> {
    id: &'a str,
    name: &'a str,
    role: &'static str,
}

#[derive(Debug, Serialize)]
struct ConnectAgentRequest<'a> {
    agent_user_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct ConnectAgentResponse {
    session_id: String,
}

#[derive(Debug, Serialize)]
struct UpdateSessionRequest<'a> {
    instructions: &'a str,
}

pub struct VideoApiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl VideoApiProvider {
    pub fn new(base_url: String, api_key: String) -> Self {
        info!("Initialized video provider with base URL: {}", base_url);

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
impl VideoProvider for VideoApiProvider {
    async fn get_call(&self, call_id: &str) -> ProviderResult<()> {
        let url = format!("{}/calls/default/{}", self.base_url, call_id);

        debug!("Checking call existence: {}", call_id);

        let response = self
            .client
            .get(&url)
            .header("Authorization", &self.api_key)
            .send()
            .await
            .map_err(|e| ProviderError::Other(format!("Failed to reach video API: {e}")))?;

        Self::check_response(response).await.map(|_| ())
    }

    async fn create_call(&self, call_id: &str, created_by: &str) -> ProviderResult<()> {
        let url = format!("{}/calls/default/{}", self.base_url, call_id);

        let request_body = CreateCallRequest {
            id: call_id,
            created_by_id: created_by,
            custom: CallCustom {
                meeting_id: call_id,
            },
        };

        debug!("Creating call: {}", call_id);

        let response = self
            .client
            .post(&url)
            .header("Authorization", &self.api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| ProviderError::Other(format!("Failed to reach video API: {e}")))?;

        Self::check_response(response).await.map(|_| ())
    }

    async fn upsert_user(&self, id: &str, name: &str) -> ProviderResult<()> {
        let url = format!("{}/users", self.base_url);

        let request_body = UpsertUserRequest {
            id,
            name,
            role: "user",
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", &self.api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| ProviderError::Other(format!("Failed to reach video API: {e}")))?;

        Self::check_response(response).await.map(|_| ())
    }

    async fn connect_agent(
        &self,
        call_id: &str,
        agent_user_id: &str,
    ) -> ProviderResult<Box<dyn RealtimeSession>> {
        let url = format!("{}/calls/default/{}/agents", self.base_url, call_id);

        let request_body = ConnectAgentRequest { agent_user_id };

        info!("Connecting AI agent {} to call {}", agent_user_id, call_id);

        let response = self
            .client
            .post(&url)
            .header("Authorization", &self.api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| ProviderError::Other(format!("Failed to reach video API: {e}")))?;

        let body = Self::check_response(response).await?;

        let parsed: ConnectAgentResponse = serde_json::from_str(&body).map_err(|e| {
            error!("Malformed connect-agent response: {}", e);
            ProviderError::Other(format!("Failed to parse connect-agent response: {e}"))
        })?;

        Ok(Box::new(HttpRealtimeSession {
            client: self.client.clone(),
            api_key: self.api_key.clone(),
            url: format!(
                "{}/calls/default/{}/agents/{}/session",
                self.base_url, call_id, parsed.session_id
            ),
        }))
    }
}

/// Realtime session handle backed by the provider's session endpoint.
struct HttpRealtimeSession {
    client: reqwest::Client,
    api_key: String,
    url: String,
}

#[async_trait]
impl RealtimeSession for HttpRealtimeSession {
    async fn update_instructions(&self, instructions: &str) -> ProviderResult<()> {
        let request_body = UpdateSessionRequest { instructions };

        let response = self
            .client
            .post(&self.url)
            .header("Authorization", &self.api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| ProviderError::Other(format!("Failed to reach video API: {e}")))?;

        VideoApiProvider::check_response(response).await.map(|_| ())
    }
}

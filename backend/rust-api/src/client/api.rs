use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::json;
use std::sync::RwLock;

use super::reporter::HeartbeatTransport;
use crate::models::{AttentionState, JoinSessionResponse, SessionContent};

/// Result of polling the joined session's content.
#[derive(Debug)]
pub enum ContentPoll {
    Live(SessionContent),
    /// The teacher ended the session; the client must log out.
    SessionEnded,
    /// The token was rejected; the client must log in again.
    Unauthorized,
}

/// Student-side HTTP client for the presence API.
pub struct PresenceApiClient {
    http_client: Client,
    base_url: String,
    token: RwLock<Option<String>>,
}

impl PresenceApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: RwLock::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn bearer(&self) -> Result<String> {
        self.token
            .read()
            .map_err(|_| anyhow!("token lock poisoned"))?
            .clone()
            .ok_or_else(|| anyhow!("not joined to a session"))
    }

    /// Joins with a username and the session's join code; keeps the token.
    pub async fn join(&self, username: &str, password: &str) -> Result<JoinSessionResponse> {
        let response = self
            .http_client
            .post(self.url("/api/v1/student/join"))
            .json(&json!({ "username": username, "password": password }))
            .send()
            .await
            .context("Join request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Join rejected ({}): {}", status, body);
        }

        let joined: JoinSessionResponse = response
            .json()
            .await
            .context("Failed to decode join response")?;
        *self
            .token
            .write()
            .map_err(|_| anyhow!("token lock poisoned"))? = Some(joined.token.clone());
        Ok(joined)
    }

    pub async fn fetch_content(&self) -> Result<ContentPoll> {
        let response = self
            .http_client
            .get(self.url("/api/v1/student/session"))
            .bearer_auth(self.bearer()?)
            .send()
            .await
            .context("Content request failed")?;

        match response.status() {
            StatusCode::GONE => Ok(ContentPoll::SessionEnded),
            StatusCode::UNAUTHORIZED => Ok(ContentPoll::Unauthorized),
            status if status.is_success() => Ok(ContentPoll::Live(
                response
                    .json()
                    .await
                    .context("Failed to decode session content")?,
            )),
            status => bail!("Unexpected content response: {}", status),
        }
    }

    pub async fn set_hand_raised(&self, raised: bool) -> Result<()> {
        let response = self
            .http_client
            .post(self.url("/api/v1/student/hand"))
            .bearer_auth(self.bearer()?)
            .json(&json!({ "raised": raised }))
            .send()
            .await
            .context("Hand raise request failed")?;

        if !response.status().is_success() {
            bail!("Hand raise rejected: {}", response.status());
        }
        Ok(())
    }
}

#[async_trait]
impl HeartbeatTransport for PresenceApiClient {
    async fn send_heartbeat(&self, session_id: &str, state: AttentionState) -> Result<()> {
        let response = self
            .http_client
            .post(self.url("/api/v1/student/heartbeat"))
            .bearer_auth(self.bearer()?)
            .json(&json!({ "sessionId": session_id, "status": state }))
            .send()
            .await
            .context("Heartbeat request failed")?;

        if !response.status().is_success() {
            bail!("Heartbeat rejected: {}", response.status());
        }
        Ok(())
    }
}

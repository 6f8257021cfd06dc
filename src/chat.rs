//! Remote chat endpoint client.
//!
//! One outbound call per recognized command: POST {"message", "name"},
//! reply expected at data.reply in the JSON body. A network error or a
//! non-JSON body are uniformly a connectivity failure; a missing or empty
//! reply falls back to a fixed message, like the widget this replaces.

use reqwest::Client;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::config::ChatConfig;

#[derive(Debug, Error)]
pub enum ChatError {
    /// The request never produced a response (DNS, connect, timeout).
    #[error("chat request failed: {0}")]
    Request(reqwest::Error),
    /// The endpoint answered with something that is not JSON.
    #[error("chat response was not JSON: {0}")]
    InvalidBody(reqwest::Error),
}

pub struct ChatClient {
    config: ChatConfig,
    client: Client,
}

impl ChatClient {
    pub fn new(config: ChatConfig) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {e}"))?;

        Ok(Self { config, client })
    }

    /// Send one command and return the reply text.
    ///
    /// The endpoint signals its own errors inside the JSON body, so the
    /// HTTP status is not inspected; only transport and parse failures
    /// count as errors here.
    pub async fn send(&self, message: &str, name: &str) -> Result<String, ChatError> {
        debug!("Dispatching command for '{name}': {message}");

        let body = json!({
            "message": message,
            "name": name,
        });

        let resp = self
            .client
            .post(&self.config.url)
            .json(&body)
            .send()
            .await
            .map_err(ChatError::Request)?;

        let data: serde_json::Value = resp.json().await.map_err(ChatError::InvalidBody)?;

        let reply = data["data"]["reply"]
            .as_str()
            .filter(|s| !s.is_empty())
            .map_or_else(|| self.config.fallback_reply.clone(), str::to_string);

        debug!("Chat reply: {reply}");
        Ok(reply)
    }
}

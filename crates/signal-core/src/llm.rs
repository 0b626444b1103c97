use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::error::SignalError;

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

/// Minimal Anthropic Messages API client used by the best-effort enrichment
/// paths (fusion insights, narrative sentiment cache).
///
/// All failures surface as `Err` and are converted by callers into envelope
/// error entries; scoring never depends on this client succeeding.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

impl LlmClient {
    /// Build a client from `ANTHROPIC_API_KEY`. Returns `None` when the
    /// credential is absent, which callers treat as "enrichment disabled".
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").ok()?;
        let api_key = api_key.trim().to_string();
        if api_key.is_empty() {
            return None;
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());

        Some(Self { client, api_key })
    }

    /// Single-turn completion: send one user prompt under a system prompt and
    /// return the concatenated text blocks of the reply.
    pub async fn complete(
        &self,
        model: &str,
        max_tokens: u32,
        system: &str,
        prompt: &str,
    ) -> Result<String, SignalError> {
        let payload = json!({
            "model": model,
            "max_tokens": max_tokens,
            "system": system,
            "messages": [{"role": "user", "content": prompt}],
        });

        let response = self
            .client
            .post(MESSAGES_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SignalError::Upstream(format!(
                "anthropic HTTP {}: {}",
                status.as_u16(),
                body.chars().take(200).collect::<String>()
            )));
        }

        let parsed: MessagesResponse = response.json().await?;

        if parsed.stop_reason.as_deref() == Some("refusal") {
            return Err(SignalError::Upstream("anthropic refusal".to_string()));
        }

        let text: String = parsed
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .map(|block| block.text.as_str())
            .collect::<Vec<_>>()
            .join("");

        if text.is_empty() {
            return Err(SignalError::Upstream("anthropic empty response".to_string()));
        }

        Ok(text)
    }
}

use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::error::SignalError;

const USER_AGENT: &str = "web3-signals/0.1";

/// Thin JSON-over-HTTP helper shared by the collector agents.
///
/// Each agent builds one with its profile timeout; per-source retry policies
/// stay inside the agents.
#[derive(Clone)]
pub struct HttpJson {
    client: Client,
}

impl HttpJson {
    pub fn new(timeout_sec: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_sec))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { client }
    }

    /// GET a URL and decode the JSON body.
    pub async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T, SignalError> {
        self.get_with_query(url, &[]).await
    }

    /// GET a URL with query parameters and decode the JSON body.
    pub async fn get_with_query<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, SignalError> {
        let response = self.client.get(url).query(query).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SignalError::Upstream(format!(
                "HTTP {}: {}",
                status.as_u16(),
                body.chars().take(200).collect::<String>()
            )));
        }

        Ok(response.json::<T>().await?)
    }

    /// POST a JSON payload and decode the JSON body.
    pub async fn post_json<T: DeserializeOwned>(
        &self,
        url: &str,
        payload: &serde_json::Value,
    ) -> Result<T, SignalError> {
        let response = self.client.post(url).json(payload).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SignalError::Upstream(format!(
                "HTTP {}: {}",
                status.as_u16(),
                body.chars().take(200).collect::<String>()
            )));
        }

        Ok(response.json::<T>().await?)
    }
}

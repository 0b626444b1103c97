use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Instant;

use crate::envelope::{AgentStatus, Envelope, EnvelopeMeta};
use crate::error::SignalError;

/// Contract implemented by every data-collection agent.
///
/// Agents are stateless apart from their profile handle. `collect` returns the
/// normalized payload plus a list of short per-source failure notes; a fatal
/// failure is returned as `Err` and converted by [`execute`] into an envelope
/// with `empty_data()` and status `error`.
#[async_trait]
pub trait Agent: Send + Sync {
    type Data: Serialize + DeserializeOwned + Send + Sync;

    fn name(&self) -> &'static str;

    fn profile_name(&self) -> &str;

    /// Deterministic zero-value payload whose schema matches a successful run.
    fn empty_data(&self) -> Self::Data;

    async fn collect(&self) -> Result<(Self::Data, Vec<String>), SignalError>;
}

/// Run an agent, classify the result, and wrap it into an envelope.
///
/// Never fails: a fatal `collect` error becomes an `error`-status envelope
/// carrying `empty_data()` and the error message.
pub async fn execute<A: Agent>(agent: &A) -> Envelope<A::Data> {
    let start = Instant::now();

    let (status, data, errors) = match agent.collect().await {
        Ok((data, errors)) => {
            let status = if errors.is_empty() {
                AgentStatus::Success
            } else {
                AgentStatus::Partial
            };
            (status, data, errors)
        }
        Err(err) => (AgentStatus::Error, agent.empty_data(), vec![err.to_string()]),
    };

    Envelope {
        agent: agent.name().to_string(),
        profile: agent.profile_name().to_string(),
        timestamp: Utc::now(),
        status,
        data,
        meta: EnvelopeMeta {
            duration_ms: start.elapsed().as_millis() as u64,
            errors,
            ..Default::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct StubData {
        count: u32,
    }

    struct StubAgent {
        outcome: Result<(StubData, Vec<String>), String>,
    }

    #[async_trait]
    impl Agent for StubAgent {
        type Data = StubData;

        fn name(&self) -> &'static str {
            "stub_agent"
        }

        fn profile_name(&self) -> &str {
            "stub_default"
        }

        fn empty_data(&self) -> StubData {
            StubData { count: 0 }
        }

        async fn collect(&self) -> Result<(StubData, Vec<String>), SignalError> {
            match &self.outcome {
                Ok((data, errors)) => Ok((data.clone(), errors.clone())),
                Err(msg) => Err(SignalError::Upstream(msg.clone())),
            }
        }
    }

    #[tokio::test]
    async fn test_success_when_no_errors() {
        let agent = StubAgent {
            outcome: Ok((StubData { count: 3 }, vec![])),
        };
        let env = execute(&agent).await;
        assert_eq!(env.status, AgentStatus::Success);
        assert_eq!(env.data.count, 3);
        assert!(env.meta.errors.is_empty());
    }

    #[tokio::test]
    async fn test_partial_when_errors_present() {
        let agent = StubAgent {
            outcome: Ok((StubData { count: 1 }, vec!["BTC: timed out".to_string()])),
        };
        let env = execute(&agent).await;
        assert_eq!(env.status, AgentStatus::Partial);
        assert_eq!(env.meta.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_error_returns_empty_data() {
        let agent = StubAgent {
            outcome: Err("feed unavailable".to_string()),
        };
        let env = execute(&agent).await;
        assert_eq!(env.status, AgentStatus::Error);
        assert_eq!(env.data, agent.empty_data());
        assert_eq!(env.meta.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_data_envelope_round_trips() {
        let agent = StubAgent {
            outcome: Err("boom".to_string()),
        };
        let env = execute(&agent).await;
        let raw = serde_json::to_value(&env).unwrap();
        let back: Envelope<StubData> = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(serde_json::to_value(&back).unwrap(), raw);
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Run status of a collector agent or the fusion engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Success,
    Partial,
    Error,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Success => "success",
            AgentStatus::Partial => "partial",
            AgentStatus::Error => "error",
        }
    }
}

/// Timing and error metadata attached to every envelope.
///
/// The role lists are populated only by fusion envelopes; collector envelopes
/// leave them empty and they are omitted from the serialized form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvelopeMeta {
    pub duration_ms: u64,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub agents_available: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub agents_missing: Vec<String>,
}

/// The uniform result record produced by every agent run and by fusion.
///
/// `data` is the agent-specific payload; downstream consumers must tolerate
/// missing optional fields inside it (absent => "no data").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub agent: String,
    pub profile: String,
    pub timestamp: DateTime<Utc>,
    pub status: AgentStatus,
    pub data: T,
    pub meta: EnvelopeMeta,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&AgentStatus::Partial).unwrap(),
            "\"partial\""
        );
        let back: AgentStatus = serde_json::from_str("\"error\"").unwrap();
        assert_eq!(back, AgentStatus::Error);
    }

    #[test]
    fn test_envelope_round_trip() {
        let env = Envelope {
            agent: "technical_agent".to_string(),
            profile: "technical_default".to_string(),
            timestamp: Utc::now(),
            status: AgentStatus::Success,
            data: serde_json::json!({"by_asset": {}}),
            meta: EnvelopeMeta {
                duration_ms: 12,
                ..Default::default()
            },
        };

        let raw = serde_json::to_string(&env).unwrap();
        let back: Envelope<serde_json::Value> = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.agent, "technical_agent");
        assert_eq!(back.status, AgentStatus::Success);
        assert_eq!(back.meta.duration_ms, 12);
    }
}

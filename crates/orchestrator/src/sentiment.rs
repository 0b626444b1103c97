//! Periodic LLM sentiment refresh: turn the latest narrative headlines into a
//! per-asset sentiment block cached in the kv-json store. Narrative runs read
//! the cache; scoring is unchanged when it is absent.

use narrative_agent::{LlmSentiment, NarrativeData, LLM_SENTIMENT_NAMESPACE};
use signal_core::profile::LlmSentimentConfig;
use signal_core::{Envelope, LlmClient, Profile};
use signal_store::Storage;

const SYSTEM_PROMPT: &str = "You analyze crypto market narratives. Reply with only a JSON \
object: {\"sentiment\": \"bullish|bearish|neutral\", \"confidence\": 0.0-1.0, \
\"dominant_narrative\": \"...\", \"tone\": \"...\", \"narrative_topics\": [\"...\"]}";

/// Recompute and cache a sentiment block for every asset that has headlines in
/// the latest narrative envelope. Returns the number of refreshed assets.
pub async fn refresh_sentiment_cache(
    store: &Storage,
    profile: &Profile,
    client: &LlmClient,
) -> usize {
    let cfg = &profile.narrative.llm_sentiment;
    let narrative: Option<Envelope<NarrativeData>> = store.load_latest("narrative_agent").await;
    let Some(narrative) = narrative else {
        return 0;
    };

    let mut refreshed = 0usize;
    for asset in &profile.assets {
        let Some(block) = narrative.data.by_asset.get(asset) else {
            continue;
        };
        if block.top_headlines.is_empty() {
            continue;
        }

        match asset_sentiment(client, cfg, asset, &block.top_headlines).await {
            Some(sentiment) => {
                store
                    .save_kv_json(LLM_SENTIMENT_NAMESPACE, asset, &sentiment)
                    .await;
                refreshed += 1;
            }
            None => {
                tracing::debug!(asset, "sentiment refresh skipped");
            }
        }
    }
    refreshed
}

async fn asset_sentiment(
    client: &LlmClient,
    cfg: &LlmSentimentConfig,
    asset: &str,
    headlines: &[String],
) -> Option<LlmSentiment> {
    let sample: Vec<&String> = headlines.iter().take(cfg.max_headlines).collect();
    let prompt = format!(
        "Recent headlines mentioning {asset}:\n{}\n\nSummarize the narrative sentiment.",
        sample
            .iter()
            .map(|h| format!("- {h}"))
            .collect::<Vec<_>>()
            .join("\n")
    );

    let reply = client
        .complete(&cfg.model, cfg.max_tokens, SYSTEM_PROMPT, &prompt)
        .await
        .ok()?;

    parse_sentiment(&reply)
}

/// Parse the model reply, tolerating code fences around the JSON object.
pub(crate) fn parse_sentiment(reply: &str) -> Option<LlmSentiment> {
    let trimmed = reply.trim();
    let json = if let Some(start) = trimmed.find('{') {
        let end = trimmed.rfind('}')?;
        &trimmed[start..=end]
    } else {
        trimmed
    };
    serde_json::from_str::<LlmSentiment>(json).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json() {
        let reply = r#"{"sentiment": "bullish", "confidence": 0.8,
            "dominant_narrative": "ETF inflows", "tone": "optimistic",
            "narrative_topics": ["etf", "institutions"]}"#;
        let parsed = parse_sentiment(reply).unwrap();
        assert_eq!(parsed.sentiment, "bullish");
        assert_eq!(parsed.confidence, 0.8);
        assert_eq!(parsed.narrative_topics.len(), 2);
    }

    #[test]
    fn test_parse_fenced_json() {
        let reply = "```json\n{\"sentiment\": \"neutral\", \"confidence\": 0.5}\n```";
        let parsed = parse_sentiment(reply).unwrap();
        assert_eq!(parsed.sentiment, "neutral");
        // Missing optional fields default.
        assert!(parsed.narrative_topics.is_empty());
    }

    #[test]
    fn test_parse_garbage_is_none() {
        assert!(parse_sentiment("no json here").is_none());
    }
}

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NarrativeStatus {
    #[default]
    Unknown,
    TooEarly,
    EarlyPickup,
    PeakCrowded,
}

/// Cached LLM sentiment block produced by the enrichment cycle and merged
/// into the per-asset data on later runs. Scoring works identically with or
/// without it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSentiment {
    pub sentiment: String,
    pub confidence: f64,
    pub dominant_narrative: String,
    pub tone: String,
    pub narrative_topics: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrativeAssetData {
    pub reddit_mentions: f64,
    pub twitter_mentions: f64,
    pub news_mentions: f64,
    pub influencer_mentions: u32,
    pub trending_coingecko: bool,
    pub total_mentions: f64,
    pub normalised_score: f64,
    pub narrative_status: NarrativeStatus,
    pub top_headlines: Vec<String>,
    pub community_sentiment: f64,
    pub llm_sentiment: Option<LlmSentiment>,
    pub sources_with_data: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrativeSummary {
    pub early_pickup: Vec<String>,
    pub too_early: Vec<String>,
    pub peak_crowded: Vec<String>,
    pub no_data: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrativeData {
    pub by_asset: BTreeMap<String, NarrativeAssetData>,
    pub trending_on_coingecko: Vec<String>,
    pub sources_used: Vec<String>,
    pub summary: NarrativeSummary,
}

/// Rolling mention peak, appended to the kv-json store; the latest row wins
/// and decay is applied on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeakRecord {
    pub peak: f64,
    pub timestamp: String,
}

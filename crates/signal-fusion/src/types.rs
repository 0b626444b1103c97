use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use signal_core::Direction;

/// Closed enumeration of the five scoring dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Whale,
    Technical,
    Derivatives,
    Narrative,
    Market,
}

impl Dimension {
    pub const ALL: [Dimension; 5] = [
        Dimension::Whale,
        Dimension::Technical,
        Dimension::Derivatives,
        Dimension::Narrative,
        Dimension::Market,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Whale => "whale",
            Dimension::Technical => "technical",
            Dimension::Derivatives => "derivatives",
            Dimension::Narrative => "narrative",
            Dimension::Market => "market",
        }
    }

    /// Stream name of the agent feeding this dimension.
    pub fn agent_name(&self) -> &'static str {
        match self {
            Dimension::Whale => "whale_agent",
            Dimension::Technical => "technical_agent",
            Dimension::Derivatives => "derivatives_agent",
            Dimension::Narrative => "narrative_agent",
            Dimension::Market => "market_agent",
        }
    }
}

/// How much evidence the whale dimension actually carried this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WhaleTier {
    #[default]
    Full,
    Sparse,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionScore {
    pub score: f64,
    pub label: String,
    pub detail: String,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetSignal {
    pub composite_score: f64,
    pub label: String,
    pub direction: Direction,
    pub dimensions: BTreeMap<String, DimensionScore>,
    pub momentum: String,
    pub prev_score: Option<f64>,
    pub whale_data_tier: WhaleTier,
    pub conviction_boost: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_insight: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopBuy {
    pub asset: String,
    pub score: f64,
    pub label: String,
    pub conviction: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopSell {
    pub asset: String,
    pub score: f64,
    pub label: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PortfolioSummary {
    pub top_buys: Vec<TopBuy>,
    pub top_sells: Vec<TopSell>,
    pub market_regime: String,
    pub risk_level: String,
    pub signal_momentum: String,
    pub assets_improving: u32,
    pub assets_degrading: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_insight: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionData {
    pub signals: BTreeMap<String, AssetSignal>,
    pub portfolio_summary: PortfolioSummary,
}

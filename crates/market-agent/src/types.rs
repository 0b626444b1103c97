use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeStatus {
    Spike,
    Elevated,
    Normal,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FearGreedBand {
    ExtremeFear,
    Fear,
    Neutral,
    Greed,
    ExtremeGreed,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketAssetData {
    pub price: Option<f64>,
    pub change_24h_pct: Option<f64>,
    pub volume_24h: Option<f64>,
    pub market_cap: Option<f64>,
    pub volume_7d_avg: Option<f64>,
    pub volume_spike_ratio: Option<f64>,
    pub volume_status: VolumeStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketSentiment {
    pub fear_greed_index: Option<f64>,
    pub classification: Option<FearGreedBand>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalMarket {
    pub total_market_cap_usd: Option<f64>,
    pub total_market_cap_change_24h: Option<f64>,
    pub btc_dominance: Option<f64>,
    pub eth_dominance: Option<f64>,
    pub active_cryptocurrencies: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoinSummary {
    pub id: String,
    pub symbol: String,
    pub name: String,
    pub price: Option<f64>,
    pub change_24h_pct: Option<f64>,
    pub market_cap: Option<f64>,
    pub volume_24h: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendingCoin {
    pub id: String,
    pub symbol: String,
    pub name: String,
    pub market_cap_rank: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Breadth {
    pub top_gainers: Vec<CoinSummary>,
    pub top_losers: Vec<CoinSummary>,
    pub trending_tokens: Vec<TrendingCoin>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CategorySummary {
    pub name: String,
    pub change_24h: Option<f64>,
    pub market_cap: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Categories {
    pub top_gainers: Vec<CategorySummary>,
    pub top_losers: Vec<CategorySummary>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DexPair {
    pub chain_id: String,
    pub dex_id: String,
    pub pair_address: String,
    pub base_symbol: String,
    pub quote_symbol: String,
    pub price_usd: Option<f64>,
    pub volume_24h: Option<f64>,
    pub liquidity_usd: Option<f64>,
    pub change_24h: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DexData {
    pub top_pairs: Vec<DexPair>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketSummary {
    pub volume_spike_assets: Vec<String>,
    pub elevated_volume_assets: Vec<String>,
    pub top_gainer_asset: Option<String>,
    pub top_loser_asset: Option<String>,
    pub market_direction: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketData {
    pub per_asset: BTreeMap<String, MarketAssetData>,
    pub breadth: Breadth,
    pub categories: Categories,
    pub global_market: GlobalMarket,
    pub dex: DexData,
    pub sentiment: MarketSentiment,
    pub summary: MarketSummary,
}

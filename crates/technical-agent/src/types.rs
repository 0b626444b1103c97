use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Bullish,
    Bearish,
    Neutral,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RsiStatus {
    Overbought,
    Oversold,
    Bullish,
    Bearish,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MacdStatus {
    Bullish,
    Bearish,
    #[default]
    Unknown,
}

/// Indicator block for one asset. Optional fields stay `None` when a source
/// failed; downstream scoring treats `None` as "no data".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TechnicalAssetData {
    pub price: Option<f64>,
    pub rsi_14: Option<f64>,
    pub macd_line: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub ma_7d: Option<f64>,
    pub ma_30d: Option<f64>,
    pub price_vs_7d_ma: Option<f64>,
    pub price_vs_30d_ma: Option<f64>,
    pub trend_7d: Trend,
    pub trend_30d: Trend,
    pub rsi_status: RsiStatus,
    pub macd_status: MacdStatus,
    pub technical_condition: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TechnicalSummary {
    pub bullish_assets: Vec<String>,
    pub bearish_assets: Vec<String>,
    pub neutral_assets: Vec<String>,
    pub overbought_assets: Vec<String>,
    pub oversold_assets: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TechnicalData {
    pub by_asset: BTreeMap<String, TechnicalAssetData>,
    pub summary: TechnicalSummary,
}

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WhaleAction {
    Accumulate,
    Sell,
    Transfer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowDirection {
    Inflow,
    Outflow,
    Neutral,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetDirection {
    NetInflow,
    NetOutflow,
    Neutral,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletSignal {
    Accumulating,
    Reducing,
    #[default]
    Neutral,
}

/// One observed large movement, from any evidence layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhaleMove {
    pub source: String,
    pub asset: String,
    pub action: WhaleAction,
    pub amount_usd: f64,
    pub amount_native: f64,
    pub from_label: String,
    pub to_label: String,
    pub tx_hash: String,
    pub timestamp: String,
    pub blockchain: String,
}

/// Balance deltas for one tracked exchange since the previous cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeFlow {
    pub eth_balance: Option<f64>,
    pub btc_balance: Option<f64>,
    pub eth_change: Option<f64>,
    pub btc_change: Option<f64>,
    pub direction: FlowDirection,
}

/// Balance tracking for one labeled whale wallet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletStatus {
    pub chain: String,
    pub address: String,
    pub balance: f64,
    pub change: f64,
    pub signal: WalletSignal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedStats {
    pub total: u64,
    pub accumulate: u64,
    pub sell: u64,
    pub transfer: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WhaleSummary {
    pub total_moves: u64,
    pub credible_moves: u64,
    pub assets_with_activity: Vec<String>,
    pub net_exchange_direction: NetDirection,
    pub whale_wallet_signals: Vec<String>,
    pub lookback_hours: i64,
    pub feed_stats: FeedStats,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WhaleData {
    pub whale_moves: Vec<WhaleMove>,
    pub by_asset: BTreeMap<String, Vec<WhaleMove>>,
    pub exchange_flow: BTreeMap<String, ExchangeFlow>,
    pub whale_wallets: BTreeMap<String, WalletStatus>,
    pub sources_used: Vec<String>,
    pub summary: WhaleSummary,
}

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use signal_core::{Agent, HttpJson, Profile, SignalError};
use signal_store::Storage;

use crate::types::*;

/// Kv namespace holding previous-cycle balances for flow tracking.
pub const FLOW_NAMESPACE: &str = "whale_flow";

/// Multi-layer whale intelligence collector. Four independently toggleable
/// evidence layers: the paginated large-transaction feed, on-chain scans of
/// exchange wallets, exchange-flow balance deltas, and labeled whale wallet
/// tracking.
pub struct WhaleAgent {
    profile: Arc<Profile>,
    http: HttpJson,
    store: Storage,
}

impl WhaleAgent {
    pub fn new(profile: Arc<Profile>, store: Storage) -> Self {
        let http = HttpJson::new(profile.http_timeout_sec);
        Self {
            profile,
            http,
            store,
        }
    }

    fn env_key(name: &str) -> Option<String> {
        std::env::var(name)
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
    }

    // ================================================================ //
    // Layer 1: paginated large-transaction feed
    // ================================================================ //

    async fn layer_whale_alert(&self, api_key: &str) -> Result<Vec<WhaleMove>, SignalError> {
        let cfg = &self.profile.whale.whale_alert;
        let rate = &cfg.rate_limit;
        let start_ts = Utc::now().timestamp() - cfg.lookback_sec.max(0);

        let mut moves = Vec::new();
        let mut seen_hashes = std::collections::BTreeSet::new();
        let mut cursor: Option<String> = None;

        for page in 0..cfg.max_pages {
            let mut query: Vec<(&str, String)> = vec![
                ("api_key", api_key.to_string()),
                ("min_value", cfg.min_value_usd.to_string()),
                ("start", start_ts.to_string()),
                ("limit", cfg.max_results_per_page.to_string()),
            ];
            if let Some(c) = &cursor {
                query.push(("cursor", c.clone()));
            }

            // Exponential backoff on rate limiting.
            let url = format!("{}/transactions", cfg.base_url);
            let mut raw: Option<Value> = None;
            for attempt in 0..rate.max_retries {
                match self.http.get_with_query::<Value>(&url, &query).await {
                    Ok(value) => {
                        raw = Some(value);
                        break;
                    }
                    Err(e) => {
                        let rate_limited = e.to_string().contains("429");
                        if rate_limited && attempt + 1 < rate.max_retries {
                            let wait = rate.base_delay_sec * 2f64.powi(attempt as i32);
                            tokio::time::sleep(Duration::from_secs_f64(wait)).await;
                        } else {
                            return Err(e);
                        }
                    }
                }
            }
            let Some(raw) = raw else { break };

            let transactions = raw["transactions"].as_array().cloned().unwrap_or_default();
            if transactions.is_empty() {
                break;
            }

            for tx in &transactions {
                let hash = tx["hash"].as_str().unwrap_or_default().to_string();
                if !hash.is_empty() && !seen_hashes.insert(hash.clone()) {
                    continue;
                }

                let symbol = tx["symbol"].as_str().unwrap_or_default().to_uppercase();
                if !self.profile.assets.contains(&symbol) {
                    continue;
                }

                let from_owner = tx["from"]["owner_type"]
                    .as_str()
                    .unwrap_or("unknown")
                    .to_lowercase();
                let to_owner = tx["to"]["owner_type"]
                    .as_str()
                    .unwrap_or("unknown")
                    .to_lowercase();
                let action = classify_action(&from_owner, &to_owner);

                let from_label = tx["from"]["owner"].as_str().unwrap_or("unknown").to_string();
                let to_label = tx["to"]["owner"].as_str().unwrap_or("unknown").to_string();

                moves.push(WhaleMove {
                    source: "whale_alert_api".to_string(),
                    asset: symbol,
                    action,
                    amount_usd: tx["amount_usd"].as_f64().unwrap_or(0.0),
                    amount_native: tx["amount"].as_f64().unwrap_or(0.0),
                    from_label,
                    to_label,
                    tx_hash: hash,
                    timestamp: tx["timestamp"]
                        .as_i64()
                        .map(|t| t.to_string())
                        .unwrap_or_default(),
                    blockchain: tx["blockchain"].as_str().unwrap_or_default().to_string(),
                });
            }

            cursor = raw["cursor"].as_str().map(|s| s.to_string());
            if cursor.is_none() {
                break;
            }
            if page + 1 < cfg.max_pages {
                tokio::time::sleep(Duration::from_secs_f64(rate.page_delay_sec)).await;
            }
        }

        Ok(moves)
    }

    // ================================================================ //
    // Layer 2a: on-chain large transfers around tracked exchange wallets
    // ================================================================ //

    async fn layer_etherscan(&self, api_key: &str) -> Result<Vec<WhaleMove>, SignalError> {
        let cfg = &self.profile.whale.etherscan;
        let mut moves = Vec::new();
        let mut seen_hashes = std::collections::BTreeSet::new();

        for (exchange, addresses) in &cfg.exchange_wallets {
            for address in addresses {
                // Native transfers.
                let result: Result<Value, _> = self
                    .http
                    .get_with_query(
                        &cfg.base_url,
                        &[
                            ("chainid", cfg.chain_id.to_string()),
                            ("module", "account".to_string()),
                            ("action", "txlist".to_string()),
                            ("address", address.clone()),
                            ("page", "1".to_string()),
                            ("offset", cfg.max_txs_per_wallet.to_string()),
                            ("sort", "desc".to_string()),
                            ("apikey", api_key.to_string()),
                        ],
                    )
                    .await;

                if let Err(e) = &result {
                    tracing::debug!(exchange = %exchange, "eth tx scan failed: {e}");
                }
                if let Ok(payload) = result {
                    for tx in payload["result"].as_array().unwrap_or(&vec![]) {
                        let hash = tx["hash"].as_str().unwrap_or_default().to_string();
                        if hash.is_empty() || !seen_hashes.insert(hash.clone()) {
                            continue;
                        }
                        let value_eth = tx["value"]
                            .as_str()
                            .and_then(|s| s.parse::<f64>().ok())
                            .unwrap_or(0.0)
                            / 1e18;
                        if value_eth < cfg.min_eth_value {
                            continue;
                        }
                        let to_addr = tx["to"].as_str().unwrap_or_default().to_lowercase();
                        let is_inflow = to_addr == address.to_lowercase();
                        moves.push(exchange_chain_move(
                            "etherscan",
                            "ETH",
                            value_eth,
                            exchange,
                            is_inflow,
                            &hash,
                            tx["timeStamp"].as_str().unwrap_or_default(),
                            "ethereum",
                        ));
                    }
                }

                // Token transfers involving tracked assets.
                let result: Result<Value, _> = self
                    .http
                    .get_with_query(
                        &cfg.base_url,
                        &[
                            ("chainid", cfg.chain_id.to_string()),
                            ("module", "account".to_string()),
                            ("action", "tokentx".to_string()),
                            ("address", address.clone()),
                            ("page", "1".to_string()),
                            ("offset", cfg.max_txs_per_wallet.to_string()),
                            ("sort", "desc".to_string()),
                            ("apikey", api_key.to_string()),
                        ],
                    )
                    .await;

                if let Ok(payload) = result {
                    for tx in payload["result"].as_array().unwrap_or(&vec![]) {
                        let hash = tx["hash"].as_str().unwrap_or_default().to_string();
                        if hash.is_empty() || !seen_hashes.insert(hash.clone()) {
                            continue;
                        }
                        let symbol = tx["tokenSymbol"].as_str().unwrap_or_default().to_uppercase();
                        if !self.profile.assets.contains(&symbol) {
                            continue;
                        }
                        let decimals = tx["tokenDecimal"]
                            .as_str()
                            .and_then(|s| s.parse::<u32>().ok())
                            .unwrap_or(18);
                        let value = tx["value"]
                            .as_str()
                            .and_then(|s| s.parse::<f64>().ok())
                            .unwrap_or(0.0)
                            / 10f64.powi(decimals as i32);
                        let to_addr = tx["to"].as_str().unwrap_or_default().to_lowercase();
                        let is_inflow = to_addr == address.to_lowercase();
                        moves.push(exchange_chain_move(
                            "etherscan",
                            &symbol,
                            value,
                            exchange,
                            is_inflow,
                            &hash,
                            tx["timeStamp"].as_str().unwrap_or_default(),
                            "ethereum",
                        ));
                    }
                }
            }
        }

        Ok(moves)
    }

    // ================================================================ //
    // Layer 2b: BTC transfers around tracked exchange wallets
    // ================================================================ //

    async fn layer_blockchain_com(&self) -> Result<Vec<WhaleMove>, SignalError> {
        let cfg = &self.profile.whale.blockchain_com;
        let mut moves = Vec::new();
        let mut seen_hashes = std::collections::BTreeSet::new();

        for (exchange, addresses) in &cfg.exchange_wallets {
            for address in addresses {
                let url = format!(
                    "{}/rawaddr/{address}?limit={}",
                    cfg.base_url, cfg.max_txs_per_wallet
                );
                let payload = match self.http.get::<Value>(&url).await {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::debug!(exchange = %exchange, "btc wallet scan failed: {e}");
                        continue;
                    }
                };

                for tx in payload["txs"].as_array().unwrap_or(&vec![]) {
                    let hash = tx["hash"].as_str().unwrap_or_default().to_string();
                    if hash.is_empty() || !seen_hashes.insert(hash.clone()) {
                        continue;
                    }
                    let result_sat = tx["result"].as_i64().unwrap_or(0);
                    let result_btc = result_sat.unsigned_abs() as f64 / 1e8;
                    if result_btc < cfg.min_btc_value {
                        continue;
                    }
                    // result > 0: the tracked wallet received (inflow).
                    let is_inflow = result_sat > 0;
                    moves.push(exchange_chain_move(
                        "blockchain_com",
                        "BTC",
                        result_btc,
                        exchange,
                        is_inflow,
                        &hash,
                        &tx["time"].as_i64().map(|t| t.to_string()).unwrap_or_default(),
                        "bitcoin",
                    ));
                }
            }
        }

        Ok(moves)
    }

    // ================================================================ //
    // Layer 3: exchange flow via balance deltas
    // ================================================================ //

    async fn eth_balance(&self, api_key: &str, address: &str) -> Option<f64> {
        let cfg = &self.profile.whale.etherscan;
        let payload: Value = self
            .http
            .get_with_query(
                &cfg.base_url,
                &[
                    ("chainid", cfg.chain_id.to_string()),
                    ("module", "account".to_string()),
                    ("action", "balance".to_string()),
                    ("address", address.to_string()),
                    ("tag", "latest".to_string()),
                    ("apikey", api_key.to_string()),
                ],
            )
            .await
            .ok()?;
        if payload["status"].as_str() != Some("1") {
            return None;
        }
        payload["result"]
            .as_str()
            .and_then(|s| s.parse::<f64>().ok())
            .map(|wei| wei / 1e18)
    }

    async fn btc_balance(&self, address: &str) -> Option<f64> {
        let cfg = &self.profile.whale.blockchain_com;
        let url = format!("{}/balance?active={address}", cfg.base_url);
        let payload: Value = self.http.get(&url).await.ok()?;
        let mut total = 0.0;
        for (_, info) in payload.as_object()? {
            total += info["final_balance"].as_f64().unwrap_or(0.0) / 1e8;
        }
        Some(total)
    }

    async fn balance_delta(&self, entity: &str, chain: &str, balance: f64) -> Option<f64> {
        let key = format!("{entity}:{chain}");
        let prev = self.store.load_kv(FLOW_NAMESPACE, &key).await;
        self.store.save_kv(FLOW_NAMESPACE, &key, balance).await;
        prev.map(|p| balance - p)
    }

    async fn layer_exchange_flow(
        &self,
        etherscan_key: Option<&str>,
    ) -> BTreeMap<String, ExchangeFlow> {
        let cfg = &self.profile.whale.exchange_flow;
        let mut flows = BTreeMap::new();

        for exchange in &cfg.track_exchanges {
            let mut flow = ExchangeFlow::default();

            if let Some(key) = etherscan_key {
                if let Some(addresses) =
                    self.profile.whale.etherscan.exchange_wallets.get(exchange)
                {
                    let mut total = 0.0;
                    let mut any = false;
                    for address in addresses {
                        if let Some(balance) = self.eth_balance(key, address).await {
                            total += balance;
                            any = true;
                        }
                    }
                    if any {
                        flow.eth_balance = Some((total * 100.0).round() / 100.0);
                        flow.eth_change = self
                            .balance_delta(exchange, "eth", total)
                            .await
                            .map(|c| (c * 100.0).round() / 100.0);
                    }
                }
            }

            if let Some(addresses) = self
                .profile
                .whale
                .blockchain_com
                .exchange_wallets
                .get(exchange)
            {
                let mut total = 0.0;
                let mut any = false;
                for address in addresses {
                    if let Some(balance) = self.btc_balance(address).await {
                        total += balance;
                        any = true;
                    }
                }
                if any {
                    flow.btc_balance = Some((total * 10000.0).round() / 10000.0);
                    flow.btc_change = self
                        .balance_delta(exchange, "btc", total)
                        .await
                        .map(|c| (c * 10000.0).round() / 10000.0);
                }
            }

            flow.direction = flow_direction(
                flow.eth_change,
                flow.btc_change,
                cfg.eth_significant_change,
                cfg.btc_significant_change,
            );
            flows.insert(exchange.clone(), flow);
        }

        flows
    }

    // ================================================================ //
    // Layer 4: labeled whale wallet tracking
    // ================================================================ //

    async fn layer_whale_wallets(
        &self,
        etherscan_key: Option<&str>,
    ) -> BTreeMap<String, WalletStatus> {
        let cfg = &self.profile.whale.whale_wallets;
        let mut results = BTreeMap::new();

        if let Some(key) = etherscan_key {
            for (name, wallet) in &cfg.eth_wallets {
                let Some(balance) = self.eth_balance(key, &wallet.address).await else {
                    continue;
                };
                let change = self
                    .balance_delta(&format!("whale_{name}"), "eth", balance)
                    .await
                    .unwrap_or(0.0);
                results.insert(
                    name.clone(),
                    WalletStatus {
                        chain: "ETH".to_string(),
                        address: short_address(&wallet.address),
                        balance: (balance * 100.0).round() / 100.0,
                        change: (change * 100.0).round() / 100.0,
                        signal: wallet_signal(change, cfg.min_eth_change),
                    },
                );
            }
        }

        for (name, wallet) in &cfg.btc_wallets {
            let Some(balance) = self.btc_balance(&wallet.address).await else {
                continue;
            };
            let change = self
                .balance_delta(&format!("whale_{name}"), "btc", balance)
                .await
                .unwrap_or(0.0);
            results.insert(
                name.clone(),
                WalletStatus {
                    chain: "BTC".to_string(),
                    address: short_address(&wallet.address),
                    balance: (balance * 10000.0).round() / 10000.0,
                    change: (change * 10000.0).round() / 10000.0,
                    signal: wallet_signal(change, cfg.min_btc_change),
                },
            );
        }

        results
    }

    fn is_credible(&self, whale_move: &WhaleMove) -> bool {
        // On-chain and feed sources are verified transactions.
        if matches!(
            whale_move.source.as_str(),
            "whale_alert_api" | "etherscan" | "blockchain_com"
        ) {
            return true;
        }
        whale_move.amount_usd >= self.profile.whale.credibility.min_wallet_size_usd
    }
}

#[async_trait]
impl Agent for WhaleAgent {
    type Data = WhaleData;

    fn name(&self) -> &'static str {
        "whale_agent"
    }

    fn profile_name(&self) -> &str {
        &self.profile.name
    }

    fn empty_data(&self) -> WhaleData {
        WhaleData {
            by_asset: self
                .profile
                .assets
                .iter()
                .map(|a| (a.clone(), Vec::new()))
                .collect(),
            summary: WhaleSummary {
                lookback_hours: self.profile.whale.lookback_hours,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    async fn collect(&self) -> Result<(WhaleData, Vec<String>), SignalError> {
        let cfg = &self.profile.whale;
        let mut data = self.empty_data();
        let mut errors = Vec::new();
        let mut all_moves: Vec<WhaleMove> = Vec::new();

        let etherscan_key = Self::env_key("ETHERSCAN_API_KEY");

        if cfg.whale_alert.enabled {
            match Self::env_key("WHALE_ALERT_API_KEY") {
                Some(key) => match self.layer_whale_alert(&key).await {
                    Ok(moves) => {
                        all_moves.extend(moves);
                        data.sources_used.push("whale_alert_api".to_string());
                    }
                    Err(e) => errors.push(format!("whale_alert_api: {e}")),
                },
                None => errors.push("whale_alert_api: WHALE_ALERT_API_KEY not set".to_string()),
            }
        }

        if cfg.etherscan.enabled {
            match &etherscan_key {
                Some(key) => match self.layer_etherscan(key).await {
                    Ok(moves) => {
                        all_moves.extend(moves);
                        data.sources_used.push("etherscan".to_string());
                    }
                    Err(e) => errors.push(format!("etherscan: {e}")),
                },
                None => errors.push("etherscan: ETHERSCAN_API_KEY not set".to_string()),
            }
        }

        if cfg.blockchain_com.enabled {
            match self.layer_blockchain_com().await {
                Ok(moves) => {
                    all_moves.extend(moves);
                    data.sources_used.push("blockchain_com".to_string());
                }
                Err(e) => errors.push(format!("blockchain_com: {e}")),
            }
        }

        if cfg.exchange_flow.enabled {
            data.exchange_flow = self.layer_exchange_flow(etherscan_key.as_deref()).await;
            if !data.exchange_flow.is_empty() {
                data.sources_used.push("exchange_flow".to_string());
            }
        }

        if cfg.whale_wallets.enabled {
            data.whale_wallets = self.layer_whale_wallets(etherscan_key.as_deref()).await;
            if !data.whale_wallets.is_empty() {
                data.sources_used.push("whale_wallets".to_string());
            }
        }

        let total_moves = all_moves.len() as u64;
        let credible: Vec<WhaleMove> = all_moves
            .into_iter()
            .filter(|m| self.is_credible(m))
            .collect();

        for whale_move in &credible {
            if let Some(list) = data.by_asset.get_mut(&whale_move.asset) {
                list.push(whale_move.clone());
            }
        }

        data.summary = build_summary(
            total_moves,
            &credible,
            &data.by_asset,
            &data.exchange_flow,
            &data.whale_wallets,
            cfg.lookback_hours,
        );
        data.whale_moves = credible;

        Ok((data, errors))
    }
}

// ------------------------------------------------------------------ //
// Pure helpers
// ------------------------------------------------------------------ //

/// Whale withdrawing from an exchange accumulates; depositing sells; anything
/// else is a transfer.
pub(crate) fn classify_action(from_owner_type: &str, to_owner_type: &str) -> WhaleAction {
    if from_owner_type == "exchange" && to_owner_type != "exchange" {
        WhaleAction::Accumulate
    } else if from_owner_type != "exchange" && to_owner_type == "exchange" {
        WhaleAction::Sell
    } else {
        WhaleAction::Transfer
    }
}

pub(crate) fn flow_direction(
    eth_change: Option<f64>,
    btc_change: Option<f64>,
    eth_threshold: f64,
    btc_threshold: f64,
) -> FlowDirection {
    let eth = eth_change.unwrap_or(0.0);
    let btc = btc_change.unwrap_or(0.0);
    if eth_change.is_none() && btc_change.is_none() {
        FlowDirection::Unknown
    } else if eth > eth_threshold || btc > btc_threshold {
        FlowDirection::Inflow
    } else if eth < -eth_threshold || btc < -btc_threshold {
        FlowDirection::Outflow
    } else {
        FlowDirection::Neutral
    }
}

pub(crate) fn wallet_signal(change: f64, min_change: f64) -> WalletSignal {
    if change.abs() < min_change {
        WalletSignal::Neutral
    } else if change > 0.0 {
        WalletSignal::Accumulating
    } else {
        WalletSignal::Reducing
    }
}

fn short_address(address: &str) -> String {
    let head: String = address.chars().take(12).collect();
    format!("{head}...")
}

#[allow(clippy::too_many_arguments)]
fn exchange_chain_move(
    source: &str,
    asset: &str,
    amount_native: f64,
    exchange: &str,
    is_inflow: bool,
    tx_hash: &str,
    timestamp: &str,
    blockchain: &str,
) -> WhaleMove {
    let action = if is_inflow {
        WhaleAction::Sell
    } else {
        WhaleAction::Accumulate
    };
    WhaleMove {
        source: source.to_string(),
        asset: asset.to_string(),
        action,
        amount_usd: 0.0,
        amount_native: (amount_native * 10000.0).round() / 10000.0,
        from_label: if is_inflow { "unknown" } else { exchange }.to_string(),
        to_label: if is_inflow { exchange } else { "unknown" }.to_string(),
        tx_hash: tx_hash.to_string(),
        timestamp: timestamp.to_string(),
        blockchain: blockchain.to_string(),
    }
}

fn build_summary(
    total_moves: u64,
    credible: &[WhaleMove],
    by_asset: &BTreeMap<String, Vec<WhaleMove>>,
    exchange_flow: &BTreeMap<String, ExchangeFlow>,
    whale_wallets: &BTreeMap<String, WalletStatus>,
    lookback_hours: i64,
) -> WhaleSummary {
    let inflow = exchange_flow
        .values()
        .filter(|f| f.direction == FlowDirection::Inflow)
        .count();
    let outflow = exchange_flow
        .values()
        .filter(|f| f.direction == FlowDirection::Outflow)
        .count();
    let net_exchange_direction = if outflow > inflow {
        NetDirection::NetOutflow
    } else if inflow > outflow {
        NetDirection::NetInflow
    } else if exchange_flow.is_empty() {
        NetDirection::Unknown
    } else {
        NetDirection::Neutral
    };

    let whale_wallet_signals = whale_wallets
        .iter()
        .filter(|(_, w)| w.signal != WalletSignal::Neutral)
        .map(|(name, w)| {
            let signal = match w.signal {
                WalletSignal::Accumulating => "accumulating",
                WalletSignal::Reducing => "reducing",
                WalletSignal::Neutral => "neutral",
            };
            format!("{name}: {signal}")
        })
        .collect();

    let mut feed_stats = FeedStats::default();
    for whale_move in credible.iter().filter(|m| m.source == "whale_alert_api") {
        feed_stats.total += 1;
        match whale_move.action {
            WhaleAction::Accumulate => feed_stats.accumulate += 1,
            WhaleAction::Sell => feed_stats.sell += 1,
            WhaleAction::Transfer => feed_stats.transfer += 1,
        }
    }

    WhaleSummary {
        total_moves,
        credible_moves: credible.len() as u64,
        assets_with_activity: by_asset
            .iter()
            .filter(|(_, moves)| !moves.is_empty())
            .map(|(asset, _)| asset.clone())
            .collect(),
        net_exchange_direction,
        whale_wallet_signals,
        lookback_hours,
        feed_stats,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_action_by_owner_types() {
        assert_eq!(classify_action("exchange", "unknown"), WhaleAction::Accumulate);
        assert_eq!(classify_action("unknown", "exchange"), WhaleAction::Sell);
        assert_eq!(classify_action("exchange", "exchange"), WhaleAction::Transfer);
        assert_eq!(classify_action("unknown", "unknown"), WhaleAction::Transfer);
    }

    #[test]
    fn test_flow_direction_thresholds() {
        assert_eq!(
            flow_direction(Some(2000.0), None, 1000.0, 100.0),
            FlowDirection::Inflow
        );
        assert_eq!(
            flow_direction(Some(-2000.0), None, 1000.0, 100.0),
            FlowDirection::Outflow
        );
        assert_eq!(
            flow_direction(Some(10.0), Some(-5.0), 1000.0, 100.0),
            FlowDirection::Neutral
        );
        assert_eq!(
            flow_direction(None, None, 1000.0, 100.0),
            FlowDirection::Unknown
        );
        // BTC side can trigger on its own.
        assert_eq!(
            flow_direction(Some(0.0), Some(-150.0), 1000.0, 100.0),
            FlowDirection::Outflow
        );
    }

    #[test]
    fn test_wallet_signal() {
        assert_eq!(wallet_signal(80.0, 50.0), WalletSignal::Accumulating);
        assert_eq!(wallet_signal(-80.0, 50.0), WalletSignal::Reducing);
        assert_eq!(wallet_signal(10.0, 50.0), WalletSignal::Neutral);
    }

    fn feed_move(asset: &str, action: WhaleAction) -> WhaleMove {
        WhaleMove {
            source: "whale_alert_api".to_string(),
            asset: asset.to_string(),
            action,
            amount_usd: 1_000_000.0,
            amount_native: 10.0,
            from_label: "unknown".to_string(),
            to_label: "binance".to_string(),
            tx_hash: "abc".to_string(),
            timestamp: "0".to_string(),
            blockchain: "bitcoin".to_string(),
        }
    }

    #[test]
    fn test_summary_net_direction_and_stats() {
        let credible = vec![
            feed_move("BTC", WhaleAction::Accumulate),
            feed_move("BTC", WhaleAction::Accumulate),
            feed_move("ETH", WhaleAction::Sell),
        ];
        let mut by_asset = BTreeMap::new();
        by_asset.insert("BTC".to_string(), credible[..2].to_vec());
        by_asset.insert("ETH".to_string(), credible[2..].to_vec());
        by_asset.insert("SOL".to_string(), vec![]);

        let mut flows = BTreeMap::new();
        flows.insert(
            "binance".to_string(),
            ExchangeFlow {
                direction: FlowDirection::Outflow,
                ..Default::default()
            },
        );
        flows.insert(
            "coinbase".to_string(),
            ExchangeFlow {
                direction: FlowDirection::Neutral,
                ..Default::default()
            },
        );

        let mut wallets = BTreeMap::new();
        wallets.insert(
            "wintermute".to_string(),
            WalletStatus {
                chain: "ETH".to_string(),
                address: "0x4f3a120E72...".to_string(),
                balance: 1000.0,
                change: 120.0,
                signal: WalletSignal::Accumulating,
            },
        );

        let summary = build_summary(5, &credible, &by_asset, &flows, &wallets, 24);
        assert_eq!(summary.total_moves, 5);
        assert_eq!(summary.credible_moves, 3);
        assert_eq!(summary.assets_with_activity, vec!["BTC", "ETH"]);
        assert_eq!(summary.net_exchange_direction, NetDirection::NetOutflow);
        assert_eq!(summary.whale_wallet_signals, vec!["wintermute: accumulating"]);
        assert_eq!(summary.feed_stats.accumulate, 2);
        assert_eq!(summary.feed_stats.sell, 1);
    }

    #[tokio::test]
    async fn test_credibility_filter() {
        let store = Storage::sqlite_in_memory().await.unwrap();
        let agent = WhaleAgent::new(Arc::new(Profile::default()), store);

        let on_chain = feed_move("BTC", WhaleAction::Sell);
        assert!(agent.is_credible(&on_chain));

        let mut social = feed_move("BTC", WhaleAction::Sell);
        social.source = "social:somebody".to_string();
        social.amount_usd = 10_000.0;
        assert!(!agent.is_credible(&social));

        social.amount_usd = 5_000_000.0;
        assert!(agent.is_credible(&social));
    }

    #[tokio::test]
    async fn test_balance_delta_uses_kv() {
        let store = Storage::sqlite_in_memory().await.unwrap();
        let agent = WhaleAgent::new(Arc::new(Profile::default()), store.clone());

        // First sighting has no previous value.
        assert_eq!(agent.balance_delta("binance", "eth", 1000.0).await, None);
        // Second sighting reports the delta.
        assert_eq!(
            agent.balance_delta("binance", "eth", 1200.0).await,
            Some(200.0)
        );
        assert_eq!(
            store.load_kv(FLOW_NAMESPACE, "binance:eth").await,
            Some(1200.0)
        );
    }
}

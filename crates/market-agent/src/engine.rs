use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use signal_core::{Agent, HttpJson, Profile, SignalError};

use crate::types::*;

/// Tracks broad market health plus per-asset price/volume for the tracked
/// assets. Each data section is independently toggleable in the profile; a
/// failed section degrades to its empty shape with one error entry.
pub struct MarketAgent {
    profile: Arc<Profile>,
    http: HttpJson,
}

impl MarketAgent {
    pub fn new(profile: Arc<Profile>) -> Self {
        let http = HttpJson::new(profile.http_timeout_sec);
        Self { profile, http }
    }

    // ------------------------------------------------------------------ //
    // 1. Per-asset price/volume (batch request)
    // ------------------------------------------------------------------ //

    async fn fetch_per_asset(&self) -> Result<BTreeMap<String, MarketAssetData>, SignalError> {
        let cfg = &self.profile.market.coingecko;
        let vs = &cfg.vs_currency;

        let mut ids = Vec::new();
        let mut symbol_by_id = BTreeMap::new();
        for asset in &self.profile.assets {
            if let Some(id) = cfg.id_map.get(asset) {
                ids.push(id.clone());
                symbol_by_id.insert(id.clone(), asset.clone());
            }
        }
        if ids.is_empty() {
            return Ok(BTreeMap::new());
        }

        let payload: Value = self
            .http
            .get_with_query(
                &format!("{}/simple/price", cfg.base_url),
                &[
                    ("ids", ids.join(",")),
                    ("vs_currencies", vs.clone()),
                    ("include_market_cap", "true".to_string()),
                    ("include_24hr_vol", "true".to_string()),
                    ("include_24hr_change", "true".to_string()),
                ],
            )
            .await?;

        let mut result = BTreeMap::new();
        for (id, asset_name) in &symbol_by_id {
            let coin = &payload[id];
            result.insert(
                asset_name.clone(),
                MarketAssetData {
                    price: coin[vs].as_f64(),
                    change_24h_pct: coin[format!("{vs}_24h_change")].as_f64(),
                    volume_24h: coin[format!("{vs}_24h_vol")].as_f64(),
                    market_cap: coin[format!("{vs}_market_cap")].as_f64(),
                    ..Default::default()
                },
            );
        }
        Ok(result)
    }

    // ------------------------------------------------------------------ //
    // 2. Volume spikes from daily volume candles
    // ------------------------------------------------------------------ //

    async fn enrich_volume_spikes(&self, per_asset: &mut BTreeMap<String, MarketAssetData>) {
        let cfg = &self.profile.market.volume;

        for asset_name in &self.profile.assets {
            let Some(asset) = per_asset.get_mut(asset_name) else {
                continue;
            };
            let Some(symbol) = cfg.symbol_map.get(asset_name) else {
                continue;
            };

            let url = format!("{}{}", cfg.base_url, cfg.klines_endpoint);
            let raw: Result<Vec<Value>, _> = self
                .http
                .get_with_query(
                    &url,
                    &[
                        ("symbol", symbol.clone()),
                        ("interval", cfg.interval.clone()),
                        ("limit", cfg.lookback_days.to_string()),
                    ],
                )
                .await;

            // Per-asset volume failure is non-fatal.
            let raw = match raw {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::debug!(asset = %asset_name, "volume klines fetch failed: {e}");
                    continue;
                }
            };

            // Kline format: index 5 = base volume.
            let volumes: Vec<f64> = raw
                .iter()
                .filter_map(|candle| candle.get(5))
                .filter_map(|v| v.as_str().and_then(|s| s.parse::<f64>().ok()))
                .collect();
            if volumes.len() < 2 {
                continue;
            }

            let today = volumes[volumes.len() - 1];
            let prior = &volumes[..volumes.len() - 1];
            let avg = prior.iter().sum::<f64>() / prior.len() as f64;
            if avg <= 0.0 {
                continue;
            }
            let ratio = today / avg;

            asset.volume_7d_avg = Some((avg * 100.0).round() / 100.0);
            asset.volume_spike_ratio = Some((ratio * 100.0).round() / 100.0);
            asset.volume_status = if ratio >= cfg.spike_threshold {
                VolumeStatus::Spike
            } else if ratio >= cfg.elevated_threshold {
                VolumeStatus::Elevated
            } else {
                VolumeStatus::Normal
            };
        }
    }

    // ------------------------------------------------------------------ //
    // 3. Breadth: gainers/losers from a top-N sample, plus trending
    // ------------------------------------------------------------------ //

    async fn fetch_breadth(&self) -> Result<(Vec<CoinSummary>, Vec<CoinSummary>), SignalError> {
        let cg = &self.profile.market.coingecko;
        let cfg = &self.profile.market.breadth;

        let coins: Vec<Value> = self
            .http
            .get_with_query(
                &format!("{}/coins/markets", cg.base_url),
                &[
                    ("vs_currency", cg.vs_currency.clone()),
                    ("order", "market_cap_desc".to_string()),
                    ("per_page", cfg.market_sample.min(250).to_string()),
                    ("page", "1".to_string()),
                    ("sparkline", "false".to_string()),
                    ("price_change_percentage", "24h".to_string()),
                ],
            )
            .await?;

        let mut sorted: Vec<&Value> = coins.iter().collect();
        sorted.sort_by(|a, b| {
            let ca = a["price_change_percentage_24h"].as_f64().unwrap_or(0.0);
            let cb = b["price_change_percentage_24h"].as_f64().unwrap_or(0.0);
            cb.partial_cmp(&ca).unwrap_or(std::cmp::Ordering::Equal)
        });

        let gainers = sorted
            .iter()
            .take(cfg.top_gainers_count)
            .map(|c| normalize_coin(c))
            .collect();
        let losers = sorted
            .iter()
            .rev()
            .take(cfg.top_losers_count)
            .map(|c| normalize_coin(c))
            .collect();
        Ok((gainers, losers))
    }

    async fn fetch_trending(&self) -> Result<Vec<TrendingCoin>, SignalError> {
        let cg = &self.profile.market.coingecko;
        let count = self.profile.market.breadth.trending_count;

        let payload: Value = self.http.get(&format!("{}/search/trending", cg.base_url)).await?;
        let coins = payload["coins"].as_array().cloned().unwrap_or_default();

        Ok(coins
            .iter()
            .take(count)
            .map(|entry| {
                let item = &entry["item"];
                TrendingCoin {
                    id: item["id"].as_str().unwrap_or_default().to_string(),
                    symbol: item["symbol"].as_str().unwrap_or_default().to_uppercase(),
                    name: item["name"].as_str().unwrap_or_default().to_string(),
                    market_cap_rank: item["market_cap_rank"].as_i64(),
                }
            })
            .collect())
    }

    // ------------------------------------------------------------------ //
    // 4. Category/sector performance
    // ------------------------------------------------------------------ //

    async fn fetch_categories(&self) -> Result<Categories, SignalError> {
        let cg = &self.profile.market.coingecko;
        let cfg = &self.profile.market.categories;

        let raw: Vec<Value> = self
            .http
            .get(&format!("{}/coins/categories", cg.base_url))
            .await?;

        let mut by_cap: Vec<&Value> = raw.iter().collect();
        by_cap.sort_by(|a, b| {
            let ca = a["market_cap"].as_f64().unwrap_or(0.0);
            let cb = b["market_cap"].as_f64().unwrap_or(0.0);
            cb.partial_cmp(&ca).unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut categories: Vec<CategorySummary> = by_cap
            .iter()
            .take(cfg.sample_size)
            .map(|row| CategorySummary {
                name: row["name"].as_str().unwrap_or_default().to_string(),
                change_24h: row["market_cap_change_24h"].as_f64(),
                market_cap: row["market_cap"].as_f64(),
            })
            .collect();

        categories.sort_by(|a, b| {
            let ca = a.change_24h.unwrap_or(0.0);
            let cb = b.change_24h.unwrap_or(0.0);
            cb.partial_cmp(&ca).unwrap_or(std::cmp::Ordering::Equal)
        });

        let top_gainers = categories.iter().take(cfg.top_gainers_count).cloned().collect();
        let top_losers = categories
            .iter()
            .rev()
            .take(cfg.top_losers_count)
            .cloned()
            .collect();
        Ok(Categories {
            top_gainers,
            top_losers,
        })
    }

    // ------------------------------------------------------------------ //
    // 5. Global market block
    // ------------------------------------------------------------------ //

    async fn fetch_global(&self) -> Result<GlobalMarket, SignalError> {
        let cg = &self.profile.market.coingecko;
        let payload: Value = self.http.get(&format!("{}/global", cg.base_url)).await?;
        let data = &payload["data"];

        Ok(GlobalMarket {
            total_market_cap_usd: data["total_market_cap"]["usd"].as_f64(),
            total_market_cap_change_24h: data["market_cap_change_percentage_24h_usd"]
                .as_f64()
                .map(round2),
            btc_dominance: data["market_cap_percentage"]["btc"].as_f64().map(round2),
            eth_dominance: data["market_cap_percentage"]["eth"].as_f64().map(round2),
            active_cryptocurrencies: data["active_cryptocurrencies"].as_i64(),
        })
    }

    // ------------------------------------------------------------------ //
    // 6. DEX pairs (deduped by chain:pair key)
    // ------------------------------------------------------------------ //

    async fn fetch_dex_pairs(&self) -> Result<Vec<DexPair>, SignalError> {
        let cfg = &self.profile.market.dexscreener;
        let mut seen = std::collections::BTreeSet::new();
        let mut pairs: Vec<DexPair> = Vec::new();

        for query in &cfg.queries {
            let payload: Result<Value, _> = self
                .http
                .get_with_query(&format!("{}/search", cfg.base_url), &[("q", query.clone())])
                .await;
            let payload = match payload {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::debug!(query = %query, "dex pair search failed: {e}");
                    continue;
                }
            };

            for pair in payload["pairs"].as_array().unwrap_or(&vec![]) {
                let key = format!(
                    "{}:{}",
                    pair["chainId"].as_str().unwrap_or_default(),
                    pair["pairAddress"].as_str().unwrap_or_default()
                );
                if !seen.insert(key) {
                    continue;
                }
                pairs.push(DexPair {
                    chain_id: pair["chainId"].as_str().unwrap_or_default().to_string(),
                    dex_id: pair["dexId"].as_str().unwrap_or_default().to_string(),
                    pair_address: pair["pairAddress"].as_str().unwrap_or_default().to_string(),
                    base_symbol: pair["baseToken"]["symbol"]
                        .as_str()
                        .unwrap_or_default()
                        .to_string(),
                    quote_symbol: pair["quoteToken"]["symbol"]
                        .as_str()
                        .unwrap_or_default()
                        .to_string(),
                    price_usd: pair["priceUsd"].as_str().and_then(|s| s.parse().ok()),
                    volume_24h: pair["volume"]["h24"].as_f64(),
                    liquidity_usd: pair["liquidity"]["usd"].as_f64(),
                    change_24h: pair["priceChange"]["h24"].as_f64(),
                });
            }
        }

        pairs.sort_by(|a, b| {
            let va = a.volume_24h.unwrap_or(0.0);
            let vb = b.volume_24h.unwrap_or(0.0);
            vb.partial_cmp(&va).unwrap_or(std::cmp::Ordering::Equal)
        });
        pairs.truncate(cfg.top_pairs_count);
        Ok(pairs)
    }

    // ------------------------------------------------------------------ //
    // 7. Fear & Greed
    // ------------------------------------------------------------------ //

    async fn fetch_sentiment(&self) -> Result<MarketSentiment, SignalError> {
        let cfg = &self.profile.market.fear_greed;
        let payload: Value = self.http.get(&cfg.url).await?;
        let value = payload["data"][0]["value"]
            .as_str()
            .and_then(|s| s.parse::<f64>().ok())
            .or_else(|| payload["data"][0]["value"].as_f64());

        let Some(index) = value else {
            return Ok(MarketSentiment::default());
        };

        let classification = if index <= cfg.extreme_fear_max {
            FearGreedBand::ExtremeFear
        } else if index <= cfg.fear_max {
            FearGreedBand::Fear
        } else if index <= cfg.neutral_max {
            FearGreedBand::Neutral
        } else if index <= cfg.greed_max {
            FearGreedBand::Greed
        } else {
            FearGreedBand::ExtremeGreed
        };

        Ok(MarketSentiment {
            fear_greed_index: Some(index),
            classification: Some(classification),
        })
    }

    // ------------------------------------------------------------------ //
    // Summary builder
    // ------------------------------------------------------------------ //

    pub(crate) fn build_summary(data: &MarketData) -> MarketSummary {
        let mut summary = MarketSummary::default();
        let mut best = f64::NEG_INFINITY;
        let mut worst = f64::INFINITY;

        for (asset_name, asset) in &data.per_asset {
            match asset.volume_status {
                VolumeStatus::Spike => summary.volume_spike_assets.push(asset_name.clone()),
                VolumeStatus::Elevated => summary.elevated_volume_assets.push(asset_name.clone()),
                _ => {}
            }
            let change = asset.change_24h_pct.unwrap_or(0.0);
            if change > best {
                best = change;
                summary.top_gainer_asset = Some(asset_name.clone());
            }
            if change < worst {
                worst = change;
                summary.top_loser_asset = Some(asset_name.clone());
            }
        }

        summary.market_direction = data.global_market.total_market_cap_change_24h.map(|change| {
            if change > 1.0 {
                "bullish".to_string()
            } else if change < -1.0 {
                "bearish".to_string()
            } else {
                "neutral".to_string()
            }
        });

        summary
    }
}

#[async_trait]
impl Agent for MarketAgent {
    type Data = MarketData;

    fn name(&self) -> &'static str {
        "market_agent"
    }

    fn profile_name(&self) -> &str {
        &self.profile.name
    }

    fn empty_data(&self) -> MarketData {
        MarketData::default()
    }

    async fn collect(&self) -> Result<(MarketData, Vec<String>), SignalError> {
        let cfg = &self.profile.market;
        let mut data = MarketData::default();
        let mut errors = Vec::new();

        if cfg.coingecko.enabled {
            match self.fetch_per_asset().await {
                Ok(per_asset) => data.per_asset = per_asset,
                Err(e) => errors.push(format!("per_asset: {e}")),
            }
        }

        if cfg.volume.enabled {
            self.enrich_volume_spikes(&mut data.per_asset).await;
        }

        if cfg.breadth.enabled && cfg.coingecko.enabled {
            match self.fetch_breadth().await {
                Ok((gainers, losers)) => {
                    data.breadth.top_gainers = gainers;
                    data.breadth.top_losers = losers;
                }
                Err(e) => errors.push(format!("breadth: {e}")),
            }
            match self.fetch_trending().await {
                Ok(trending) => data.breadth.trending_tokens = trending,
                Err(e) => errors.push(format!("trending: {e}")),
            }
        }

        if cfg.categories.enabled && cfg.coingecko.enabled {
            match self.fetch_categories().await {
                Ok(categories) => data.categories = categories,
                Err(e) => errors.push(format!("categories: {e}")),
            }
        }

        if cfg.global_market.enabled && cfg.coingecko.enabled {
            match self.fetch_global().await {
                Ok(global) => data.global_market = global,
                Err(e) => errors.push(format!("global_market: {e}")),
            }
        }

        if cfg.dexscreener.enabled {
            match self.fetch_dex_pairs().await {
                Ok(pairs) => data.dex.top_pairs = pairs,
                Err(e) => errors.push(format!("dex: {e}")),
            }
        }

        if cfg.fear_greed.enabled {
            match self.fetch_sentiment().await {
                Ok(sentiment) => data.sentiment = sentiment,
                Err(e) => errors.push(format!("sentiment: {e}")),
            }
        }

        data.summary = Self::build_summary(&data);
        Ok((data, errors))
    }
}

fn normalize_coin(coin: &Value) -> CoinSummary {
    CoinSummary {
        id: coin["id"].as_str().unwrap_or_default().to_string(),
        symbol: coin["symbol"].as_str().unwrap_or_default().to_uppercase(),
        name: coin["name"].as_str().unwrap_or_default().to_string(),
        price: coin["current_price"].as_f64(),
        change_24h_pct: coin["price_change_percentage_24h"].as_f64(),
        market_cap: coin["market_cap"].as_f64(),
        volume_24h: coin["total_volume"].as_f64(),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(change: f64, status: VolumeStatus) -> MarketAssetData {
        MarketAssetData {
            price: Some(100.0),
            change_24h_pct: Some(change),
            volume_status: status,
            ..Default::default()
        }
    }

    #[test]
    fn test_summary_extremes_and_direction() {
        let mut data = MarketData::default();
        data.per_asset
            .insert("BTC".to_string(), asset(4.0, VolumeStatus::Spike));
        data.per_asset
            .insert("ETH".to_string(), asset(-3.0, VolumeStatus::Elevated));
        data.per_asset
            .insert("SOL".to_string(), asset(1.0, VolumeStatus::Normal));
        data.global_market.total_market_cap_change_24h = Some(2.1);

        let summary = MarketAgent::build_summary(&data);
        assert_eq!(summary.top_gainer_asset.as_deref(), Some("BTC"));
        assert_eq!(summary.top_loser_asset.as_deref(), Some("ETH"));
        assert_eq!(summary.volume_spike_assets, vec!["BTC"]);
        assert_eq!(summary.elevated_volume_assets, vec!["ETH"]);
        assert_eq!(summary.market_direction.as_deref(), Some("bullish"));
    }

    #[test]
    fn test_summary_without_global_block() {
        let data = MarketData::default();
        let summary = MarketAgent::build_summary(&data);
        assert!(summary.market_direction.is_none());
        assert!(summary.top_gainer_asset.is_none());
    }

    #[test]
    fn test_fear_greed_band_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&FearGreedBand::ExtremeFear).unwrap(),
            "\"extreme_fear\""
        );
    }

    #[test]
    fn test_normalize_coin() {
        let raw = serde_json::json!({
            "id": "bitcoin",
            "symbol": "btc",
            "name": "Bitcoin",
            "current_price": 97000.5,
            "price_change_percentage_24h": 2.4,
            "market_cap": 1.9e12,
            "total_volume": 3.1e10,
        });
        let coin = normalize_coin(&raw);
        assert_eq!(coin.symbol, "BTC");
        assert_eq!(coin.price, Some(97000.5));
        assert_eq!(coin.change_24h_pct, Some(2.4));
    }
}

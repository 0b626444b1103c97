use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

use signal_core::{Agent, HttpJson, Profile, SignalError};

use crate::indicators::{macd, rsi, sma};
use crate::types::{
    MacdStatus, RsiStatus, TechnicalAssetData, TechnicalData, TechnicalSummary, Trend,
};

/// Computes RSI, MACD, and moving-average trends for the tracked assets from
/// daily spot klines.
pub struct TechnicalAgent {
    profile: Arc<Profile>,
    http: HttpJson,
}

impl TechnicalAgent {
    pub fn new(profile: Arc<Profile>) -> Self {
        let http = HttpJson::new(profile.http_timeout_sec);
        Self { profile, http }
    }

    async fn fetch_closes(&self, symbol: &str) -> Result<Vec<f64>, SignalError> {
        let cfg = &self.profile.technical;
        let url = format!("{}{}", cfg.base_url, cfg.klines_endpoint);
        let raw: Vec<serde_json::Value> = self
            .http
            .get_with_query(
                &url,
                &[
                    ("symbol", symbol.to_string()),
                    ("interval", cfg.interval.clone()),
                    ("limit", cfg.candle_limit.to_string()),
                ],
            )
            .await?;

        // Kline format: [open_time, open, high, low, close, volume, ...]
        let closes: Vec<f64> = raw
            .iter()
            .filter_map(|candle| candle.get(4))
            .filter_map(|v| v.as_str().and_then(|s| s.parse::<f64>().ok()))
            .collect();
        Ok(closes)
    }

    fn analyze(&self, closes: &[f64]) -> TechnicalAssetData {
        let cfg = &self.profile.technical;
        let mut asset = TechnicalAssetData::default();

        let price = match closes.last() {
            Some(p) => *p,
            None => return asset,
        };
        asset.price = Some(price);

        let rsi_value = rsi(closes, cfg.rsi_period);
        if let Some(value) = rsi_value {
            asset.rsi_14 = Some((value * 100.0).round() / 100.0);
            asset.rsi_status = if value >= cfg.rsi_overbought {
                RsiStatus::Overbought
            } else if value <= cfg.rsi_oversold {
                RsiStatus::Oversold
            } else if value >= cfg.rsi_bullish {
                RsiStatus::Bullish
            } else {
                RsiStatus::Bearish
            };
        }

        if closes.len() >= cfg.ma_7d_period {
            if let Some(ma7) = sma(closes, cfg.ma_7d_period).last() {
                asset.ma_7d = Some(*ma7);
                asset.price_vs_7d_ma = Some(((price - ma7) / ma7 * 10000.0).round() / 100.0);
            }
        }
        if closes.len() >= cfg.ma_30d_period {
            if let Some(ma30) = sma(closes, cfg.ma_30d_period).last() {
                asset.ma_30d = Some(*ma30);
                asset.price_vs_30d_ma = Some(((price - ma30) / ma30 * 10000.0).round() / 100.0);
            }
        }

        let macd_result = macd(closes, cfg.macd_fast, cfg.macd_slow, cfg.macd_signal);
        if let Some(m) = &macd_result {
            asset.macd_line = Some(m.macd_line);
            asset.macd_signal = Some(m.signal_line);
            asset.macd_histogram = Some(m.histogram);
            asset.macd_status = if m.macd_line > m.signal_line {
                MacdStatus::Bullish
            } else {
                MacdStatus::Bearish
            };
        }

        // 30d trend: price vs 30d MA confirmed by RSI.
        asset.trend_30d = match (asset.ma_30d, rsi_value) {
            (Some(ma30), Some(r)) => {
                if price > ma30 && r > cfg.rsi_bullish {
                    Trend::Bullish
                } else if price < ma30 && r < cfg.rsi_bullish {
                    Trend::Bearish
                } else {
                    Trend::Neutral
                }
            }
            _ => Trend::Unknown,
        };

        // 7d trend: price vs 7d MA confirmed by MACD cross.
        asset.trend_7d = match (asset.ma_7d, &macd_result) {
            (Some(ma7), Some(m)) => {
                if price > ma7 && m.macd_line > m.signal_line {
                    Trend::Bullish
                } else if price < ma7 && m.macd_line < m.signal_line {
                    Trend::Bearish
                } else {
                    Trend::Neutral
                }
            }
            _ => Trend::Unknown,
        };

        asset.technical_condition =
            asset.trend_30d == Trend::Bullish && asset.trend_7d == Trend::Bullish;

        asset
    }

    fn build_summary(by_asset: &BTreeMap<String, TechnicalAssetData>) -> TechnicalSummary {
        let mut summary = TechnicalSummary::default();
        for (asset_name, asset) in by_asset {
            if asset.technical_condition {
                summary.bullish_assets.push(asset_name.clone());
            } else if asset.trend_30d == Trend::Bearish || asset.trend_7d == Trend::Bearish {
                summary.bearish_assets.push(asset_name.clone());
            } else {
                summary.neutral_assets.push(asset_name.clone());
            }
            match asset.rsi_status {
                RsiStatus::Overbought => summary.overbought_assets.push(asset_name.clone()),
                RsiStatus::Oversold => summary.oversold_assets.push(asset_name.clone()),
                _ => {}
            }
        }
        summary
    }
}

#[async_trait]
impl Agent for TechnicalAgent {
    type Data = TechnicalData;

    fn name(&self) -> &'static str {
        "technical_agent"
    }

    fn profile_name(&self) -> &str {
        &self.profile.name
    }

    fn empty_data(&self) -> TechnicalData {
        TechnicalData {
            by_asset: self
                .profile
                .assets
                .iter()
                .map(|a| (a.clone(), TechnicalAssetData::default()))
                .collect(),
            summary: TechnicalSummary::default(),
        }
    }

    async fn collect(&self) -> Result<(TechnicalData, Vec<String>), SignalError> {
        let cfg = &self.profile.technical;
        let min_candles = cfg.macd_slow + cfg.macd_signal;

        let mut data = self.empty_data();
        let mut errors = Vec::new();

        for asset_name in &self.profile.assets {
            let Some(symbol) = cfg.symbol_map.get(asset_name) else {
                errors.push(format!("{asset_name}: no spot symbol mapping in profile"));
                continue;
            };

            let closes = match self.fetch_closes(symbol).await {
                Ok(closes) => closes,
                Err(e) => {
                    errors.push(format!("{asset_name} klines: {e}"));
                    continue;
                }
            };
            if closes.len() < min_candles {
                errors.push(format!(
                    "{asset_name}: not enough candles ({})",
                    closes.len()
                ));
                continue;
            }

            data.by_asset
                .insert(asset_name.clone(), self.analyze(&closes));
        }

        data.summary = Self::build_summary(&data.by_asset);
        Ok((data, errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent() -> TechnicalAgent {
        TechnicalAgent::new(Arc::new(Profile::default()))
    }

    fn trending_up(n: usize) -> Vec<f64> {
        (0..n).map(|i| 100.0 + i as f64).collect()
    }

    fn trending_down(n: usize) -> Vec<f64> {
        (0..n).map(|i| 200.0 - i as f64).collect()
    }

    #[test]
    fn test_uptrend_is_bullish() {
        let asset = agent().analyze(&trending_up(50));
        assert_eq!(asset.trend_30d, Trend::Bullish);
        assert_eq!(asset.trend_7d, Trend::Bullish);
        assert!(asset.technical_condition);
        assert_eq!(asset.macd_status, MacdStatus::Bullish);
        assert!(asset.rsi_14.unwrap() > 50.0);
        assert!(asset.price_vs_30d_ma.unwrap() > 0.0);
    }

    #[test]
    fn test_downtrend_is_bearish() {
        let asset = agent().analyze(&trending_down(50));
        assert_eq!(asset.trend_30d, Trend::Bearish);
        assert_eq!(asset.trend_7d, Trend::Bearish);
        assert!(!asset.technical_condition);
        assert_eq!(asset.macd_status, MacdStatus::Bearish);
    }

    #[test]
    fn test_short_series_leaves_fields_unset() {
        let asset = agent().analyze(&trending_up(10));
        assert!(asset.macd_line.is_none());
        assert!(asset.ma_30d.is_none());
        assert_eq!(asset.trend_30d, Trend::Unknown);
    }

    #[test]
    fn test_empty_data_covers_all_assets() {
        let a = agent();
        let data = a.empty_data();
        assert_eq!(data.by_asset.len(), a.profile.assets.len());
        assert!(data.by_asset.values().all(|v| v.price.is_none()));
    }

    #[test]
    fn test_summary_buckets() {
        let a = agent();
        let mut by_asset = BTreeMap::new();
        by_asset.insert("BTC".to_string(), a.analyze(&trending_up(50)));
        by_asset.insert("ETH".to_string(), a.analyze(&trending_down(50)));

        let summary = TechnicalAgent::build_summary(&by_asset);
        assert_eq!(summary.bullish_assets, vec!["BTC"]);
        assert_eq!(summary.bearish_assets, vec!["ETH"]);
        // Monotone moves pin RSI to the extremes.
        assert_eq!(summary.overbought_assets, vec!["BTC"]);
        assert_eq!(summary.oversold_assets, vec!["ETH"]);
    }
}

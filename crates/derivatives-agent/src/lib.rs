//! Derivatives positioning collector: long/short account ratio, funding rate,
//! and open interest per asset from the futures API, classified against the
//! profile thresholds.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use signal_core::{Agent, HttpJson, Profile, SignalError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LsStatus {
    Healthy,
    Overcrowded,
    Bearish,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FundingStatus {
    Normal,
    High,
    Negative,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DerivativesAssetData {
    pub long_pct: Option<f64>,
    pub short_pct: Option<f64>,
    pub long_short_ratio: Option<f64>,
    pub funding_rate: Option<f64>,
    pub open_interest_usd: Option<f64>,
    pub ls_status: LsStatus,
    pub funding_status: FundingStatus,
    pub derivatives_condition: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DerivativesSummary {
    pub healthy_assets: Vec<String>,
    pub overcrowded_longs: Vec<String>,
    pub bearish_dominance: Vec<String>,
    pub high_funding: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DerivativesData {
    pub by_asset: BTreeMap<String, DerivativesAssetData>,
    pub summary: DerivativesSummary,
}

pub struct DerivativesAgent {
    profile: Arc<Profile>,
    http: HttpJson,
}

impl DerivativesAgent {
    pub fn new(profile: Arc<Profile>) -> Self {
        let http = HttpJson::new(profile.http_timeout_sec);
        Self { profile, http }
    }

    /// GET with linear backoff between retries (1s, 2s, ...).
    async fn get_retry(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<serde_json::Value, SignalError> {
        let retries = self.profile.derivatives.retries;
        let mut last_err = None;
        for attempt in 0..=retries {
            match self.http.get_with_query(url, query).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    last_err = Some(e);
                    if attempt < retries {
                        tokio::time::sleep(Duration::from_secs((attempt + 1) as u64)).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| SignalError::Upstream("request failed".to_string())))
    }

    async fn fetch_long_short(&self, symbol: &str) -> Result<Option<(f64, f64)>, SignalError> {
        let cfg = &self.profile.derivatives;
        let url = format!("{}{}", cfg.base_url, cfg.long_short_endpoint);
        let rows = self
            .get_retry(
                &url,
                &[
                    ("symbol", symbol.to_string()),
                    ("period", cfg.long_short_period.clone()),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;

        let Some(row) = rows.as_array().and_then(|a| a.first()) else {
            return Ok(None);
        };
        let long = parse_f64(row.get("longAccount"));
        let short = parse_f64(row.get("shortAccount"));
        Ok(long.zip(short))
    }

    async fn fetch_funding(&self, symbol: &str) -> Result<Option<f64>, SignalError> {
        let cfg = &self.profile.derivatives;
        let url = format!("{}{}", cfg.base_url, cfg.funding_endpoint);
        let row = self
            .get_retry(&url, &[("symbol", symbol.to_string())])
            .await?;
        Ok(parse_f64(row.get("lastFundingRate")))
    }

    async fn fetch_open_interest(&self, symbol: &str) -> Result<Option<f64>, SignalError> {
        let cfg = &self.profile.derivatives;
        let url = format!("{}{}", cfg.base_url, cfg.open_interest_endpoint);
        let row = self
            .get_retry(&url, &[("symbol", symbol.to_string())])
            .await?;
        Ok(parse_f64(row.get("openInterest")))
    }

    fn classify(&self, asset: &mut DerivativesAssetData) {
        let cfg = &self.profile.derivatives;

        if let Some(ls) = asset.long_short_ratio {
            asset.ls_status = if ls >= cfg.long_short_min && ls <= cfg.long_short_max {
                LsStatus::Healthy
            } else if ls > cfg.long_short_max {
                LsStatus::Overcrowded
            } else {
                LsStatus::Bearish
            };
        }

        if let Some(fr) = asset.funding_rate {
            asset.funding_status = if fr < 0.0 {
                FundingStatus::Negative
            } else if fr <= cfg.funding_rate_max {
                FundingStatus::Normal
            } else {
                FundingStatus::High
            };
        }

        asset.derivatives_condition = asset.ls_status == LsStatus::Healthy
            && matches!(
                asset.funding_status,
                FundingStatus::Normal | FundingStatus::Negative | FundingStatus::Unknown
            );
    }

    fn build_summary(by_asset: &BTreeMap<String, DerivativesAssetData>) -> DerivativesSummary {
        let mut summary = DerivativesSummary::default();
        for (name, asset) in by_asset {
            match asset.ls_status {
                LsStatus::Healthy => summary.healthy_assets.push(name.clone()),
                LsStatus::Overcrowded => summary.overcrowded_longs.push(name.clone()),
                LsStatus::Bearish => summary.bearish_dominance.push(name.clone()),
                LsStatus::Unknown => {}
            }
            if asset.funding_status == FundingStatus::High {
                summary.high_funding.push(name.clone());
            }
        }
        summary
    }
}

#[async_trait]
impl Agent for DerivativesAgent {
    type Data = DerivativesData;

    fn name(&self) -> &'static str {
        "derivatives_agent"
    }

    fn profile_name(&self) -> &str {
        &self.profile.name
    }

    fn empty_data(&self) -> DerivativesData {
        DerivativesData {
            by_asset: self
                .profile
                .assets
                .iter()
                .map(|a| (a.clone(), DerivativesAssetData::default()))
                .collect(),
            summary: DerivativesSummary::default(),
        }
    }

    async fn collect(&self) -> Result<(DerivativesData, Vec<String>), SignalError> {
        let mut data = self.empty_data();
        let mut errors = Vec::new();

        for asset_name in &self.profile.assets {
            let Some(symbol) = self.profile.derivatives.futures_map.get(asset_name) else {
                errors.push(format!("{asset_name}: no futures symbol mapping in profile"));
                continue;
            };

            let mut asset = DerivativesAssetData::default();

            match self.fetch_long_short(symbol).await {
                Ok(Some((long, short))) => {
                    asset.long_pct = Some(long);
                    asset.short_pct = Some(short);
                    asset.long_short_ratio = Some(long);
                }
                Ok(None) => {}
                Err(e) => errors.push(format!("long_short {asset_name}: {e}")),
            }

            match self.fetch_funding(symbol).await {
                Ok(value) => asset.funding_rate = value,
                Err(e) => errors.push(format!("funding {asset_name}: {e}")),
            }

            match self.fetch_open_interest(symbol).await {
                Ok(value) => asset.open_interest_usd = value,
                Err(e) => errors.push(format!("oi {asset_name}: {e}")),
            }

            self.classify(&mut asset);
            data.by_asset.insert(asset_name.clone(), asset);
        }

        data.summary = Self::build_summary(&data.by_asset);
        Ok((data, errors))
    }
}

fn parse_f64(value: Option<&serde_json::Value>) -> Option<f64> {
    match value? {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent() -> DerivativesAgent {
        DerivativesAgent::new(Arc::new(Profile::default()))
    }

    fn classified(ls: Option<f64>, funding: Option<f64>) -> DerivativesAssetData {
        let mut asset = DerivativesAssetData {
            long_short_ratio: ls,
            funding_rate: funding,
            ..Default::default()
        };
        agent().classify(&mut asset);
        asset
    }

    #[test]
    fn test_ls_classification() {
        assert_eq!(classified(Some(0.60), None).ls_status, LsStatus::Healthy);
        assert_eq!(classified(Some(0.80), None).ls_status, LsStatus::Overcrowded);
        assert_eq!(classified(Some(0.40), None).ls_status, LsStatus::Bearish);
        assert_eq!(classified(None, None).ls_status, LsStatus::Unknown);
    }

    #[test]
    fn test_funding_classification() {
        assert_eq!(
            classified(None, Some(-0.0001)).funding_status,
            FundingStatus::Negative
        );
        assert_eq!(
            classified(None, Some(0.0001)).funding_status,
            FundingStatus::Normal
        );
        assert_eq!(
            classified(None, Some(0.001)).funding_status,
            FundingStatus::High
        );
    }

    #[test]
    fn test_condition_requires_healthy_and_sane_funding() {
        assert!(classified(Some(0.60), Some(0.0001)).derivatives_condition);
        assert!(classified(Some(0.60), Some(-0.0001)).derivatives_condition);
        assert!(!classified(Some(0.60), Some(0.002)).derivatives_condition);
        assert!(!classified(Some(0.80), Some(0.0001)).derivatives_condition);
    }

    #[test]
    fn test_summary_buckets() {
        let mut by_asset = BTreeMap::new();
        by_asset.insert("BTC".to_string(), classified(Some(0.60), Some(0.0001)));
        by_asset.insert("ETH".to_string(), classified(Some(0.80), Some(0.002)));
        by_asset.insert("SOL".to_string(), classified(Some(0.40), None));

        let summary = DerivativesAgent::build_summary(&by_asset);
        assert_eq!(summary.healthy_assets, vec!["BTC"]);
        assert_eq!(summary.overcrowded_longs, vec!["ETH"]);
        assert_eq!(summary.bearish_dominance, vec!["SOL"]);
        assert_eq!(summary.high_funding, vec!["ETH"]);
    }

    #[test]
    fn test_parse_f64_accepts_strings_and_numbers() {
        assert_eq!(parse_f64(Some(&serde_json::json!("0.61"))), Some(0.61));
        assert_eq!(parse_f64(Some(&serde_json::json!(0.61))), Some(0.61));
        assert_eq!(parse_f64(Some(&serde_json::json!(null))), None);
        assert_eq!(parse_f64(None), None);
    }
}

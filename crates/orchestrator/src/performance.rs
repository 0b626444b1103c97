//! Performance snapshot recording and windowed evaluation.
//!
//! Snapshots pair the latest composite score with the latest market price for
//! each asset; evaluation later compares those prices against current prices
//! over the 24h / 48h / 7d windows.

use regex::Regex;
use std::sync::OnceLock;

use market_agent::MarketData;
use signal_core::{Envelope, HttpJson, Profile, SignalError};
use signal_fusion::FusionData;
use signal_store::{Storage, FUSION_STREAM};

pub const EVALUATION_WINDOWS: [i64; 3] = [24, 48, 168];
/// Neutral signals count as correct inside this band of realized movement.
pub const NEUTRAL_BAND_PCT: f64 = 2.0;

/// Direction recorded at snapshot time, derived from the composite score.
pub fn snapshot_direction(composite: f64) -> &'static str {
    if composite > 60.0 {
        "bullish"
    } else if composite < 40.0 {
        "bearish"
    } else {
        "neutral"
    }
}

/// Was a signal's direction borne out by the realized percent change?
pub fn direction_correct(direction: &str, pct_change: f64) -> bool {
    match direction {
        "bullish" => pct_change > 0.0,
        "bearish" => pct_change < 0.0,
        _ => pct_change.abs() <= NEUTRAL_BAND_PCT,
    }
}

/// Extract the contributing-source count from a narrative detail string
/// (e.g. "buzz 0.45; trending; 3 sources").
pub fn sources_count(detail: &str) -> i64 {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"(\d+)\s+sources").expect("static regex"));
    re.captures(detail)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<i64>().ok())
        .unwrap_or(0)
}

/// Record one snapshot row per asset that has both a current price and a
/// composite score. Returns the number of rows written.
pub async fn record_snapshots(store: &Storage, profile: &Profile) -> usize {
    let fusion: Option<Envelope<FusionData>> = store.load_latest(FUSION_STREAM).await;
    let market: Option<Envelope<MarketData>> = store.load_latest("market_agent").await;
    let (Some(fusion), Some(market)) = (fusion, market) else {
        return 0;
    };

    let mut written = 0usize;
    for asset in &profile.assets {
        let Some(signal) = fusion.data.signals.get(asset) else {
            continue;
        };
        let Some(price) = market.data.per_asset.get(asset).and_then(|b| b.price) else {
            continue;
        };

        let narrative_detail = signal
            .dimensions
            .get("narrative")
            .map(|d| d.detail.as_str())
            .unwrap_or("");
        let detail = format!("{}; {}", signal.label, narrative_detail);

        let id = store
            .save_performance_snapshot(
                asset,
                signal.composite_score,
                snapshot_direction(signal.composite_score),
                price,
                sources_count(narrative_detail),
                &detail,
            )
            .await;
        if id.is_some() {
            written += 1;
        }
    }
    written
}

/// Fetch current prices for all tracked assets in one batch request.
pub async fn fetch_current_prices(
    http: &HttpJson,
    profile: &Profile,
) -> Result<std::collections::BTreeMap<String, f64>, SignalError> {
    let cfg = &profile.market.coingecko;

    let mut ids = Vec::new();
    let mut symbol_by_id = std::collections::BTreeMap::new();
    for asset in &profile.assets {
        if let Some(id) = cfg.id_map.get(asset) {
            ids.push(id.clone());
            symbol_by_id.insert(id.clone(), asset.clone());
        }
    }

    let payload: serde_json::Value = http
        .get_with_query(
            &format!("{}/simple/price", cfg.base_url),
            &[
                ("ids", ids.join(",")),
                ("vs_currencies", cfg.vs_currency.clone()),
            ],
        )
        .await?;

    let mut prices = std::collections::BTreeMap::new();
    for (id, asset) in symbol_by_id {
        if let Some(price) = payload[&id][&cfg.vs_currency].as_f64() {
            prices.insert(asset, price);
        }
    }
    Ok(prices)
}

/// Evaluate all due snapshots against the given current prices. Returns the
/// number of accuracy rows written.
pub async fn evaluate_due_snapshots(
    store: &Storage,
    prices: &std::collections::BTreeMap<String, f64>,
) -> usize {
    let mut evaluated = 0usize;
    for window in EVALUATION_WINDOWS {
        let due = store.load_unevaluated_snapshots(window, window).await;
        for row in due {
            let Some(price_now) = prices.get(&row.asset) else {
                continue;
            };
            if row.price_at_signal <= 0.0 {
                continue;
            }
            let pct_change = (price_now - row.price_at_signal) / row.price_at_signal * 100.0;
            let correct = direction_correct(&row.signal_direction, pct_change);
            store
                .save_performance_accuracy(row.id, window, *price_now, correct)
                .await;
            evaluated += 1;
        }
    }
    evaluated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_direction_bands() {
        assert_eq!(snapshot_direction(72.0), "bullish");
        assert_eq!(snapshot_direction(60.0), "neutral");
        assert_eq!(snapshot_direction(50.0), "neutral");
        assert_eq!(snapshot_direction(40.0), "neutral");
        assert_eq!(snapshot_direction(31.0), "bearish");
    }

    #[test]
    fn test_direction_correct() {
        assert!(direction_correct("bullish", 4.2));
        assert!(!direction_correct("bullish", -0.1));
        assert!(direction_correct("bearish", -4.2));
        assert!(!direction_correct("bearish", 0.1));
        assert!(direction_correct("neutral", 1.5));
        assert!(direction_correct("neutral", -2.0));
        assert!(!direction_correct("neutral", 2.5));
    }

    #[test]
    fn test_sources_count_extraction() {
        assert_eq!(sources_count("buzz 0.45; trending; 3 sources"), 3);
        assert_eq!(sources_count("low buzz; 0 sources"), 0);
        assert_eq!(sources_count("12 sources"), 12);
        assert_eq!(sources_count("no data"), 0);
    }

    #[tokio::test]
    async fn test_evaluation_window_flow() {
        let store = Storage::sqlite_in_memory().await.unwrap();

        // A bullish BTC snapshot taken 25 hours ago at price 100.
        let aged = signal_store::iso_ago_hours(25);
        let id = store
            .save_performance_snapshot_at("BTC", 72.0, "bullish", 100.0, 3, "3 sources", &aged)
            .await
            .unwrap();

        let mut prices = std::collections::BTreeMap::new();
        prices.insert("BTC".to_string(), 110.0);

        // First run writes exactly one 24h accuracy row and flips the flag.
        assert_eq!(evaluate_due_snapshots(&store, &prices).await, 1);
        let stats = store.load_accuracy_stats(30).await;
        assert_eq!(stats.total, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.by_timeframe["24h"].total, 1);

        // A second run makes no further changes for that window.
        assert_eq!(evaluate_due_snapshots(&store, &prices).await, 0);
        let stats = store.load_accuracy_stats(30).await;
        assert_eq!(stats.total, 1);

        // The 48h window picks the same snapshot up once it ages past 48h.
        let _ = id;
    }

    #[tokio::test]
    async fn test_wrong_direction_counts_as_miss() {
        let store = Storage::sqlite_in_memory().await.unwrap();
        let aged = signal_store::iso_ago_hours(25);
        store
            .save_performance_snapshot_at("ETH", 72.0, "bullish", 100.0, 1, "1 sources", &aged)
            .await
            .unwrap();

        let mut prices = std::collections::BTreeMap::new();
        prices.insert("ETH".to_string(), 90.0);

        assert_eq!(evaluate_due_snapshots(&store, &prices).await, 1);
        let stats = store.load_accuracy_stats(30).await;
        assert_eq!(stats.total, 1);
        assert_eq!(stats.hits, 0);
    }
}

use std::collections::BTreeMap;

use derivatives_agent::DerivativesData;
use market_agent::MarketData;
use signal_core::profile::PortfolioConfig;

use crate::types::{AssetSignal, PortfolioSummary, TopBuy, TopSell};

/// Reduce per-asset signals plus the latest market/derivatives blocks into the
/// portfolio-level summary.
///
/// With fewer than `2 * top_n` assets the same asset may appear in both
/// `top_buys` and `top_sells`; consumers must not assume disjointness.
pub fn build_portfolio_summary(
    signals: &BTreeMap<String, AssetSignal>,
    market: Option<&MarketData>,
    derivatives: Option<&DerivativesData>,
    cfg: &PortfolioConfig,
) -> PortfolioSummary {
    let mut ranked: Vec<(&String, &AssetSignal)> = signals.iter().collect();
    ranked.sort_by(|a, b| {
        b.1.composite_score
            .partial_cmp(&a.1.composite_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(b.0))
    });

    let top_buys = ranked
        .iter()
        .take(cfg.top_n)
        .map(|(asset, signal)| TopBuy {
            asset: (*asset).clone(),
            score: signal.composite_score,
            label: signal.label.clone(),
            conviction: if signal.composite_score >= cfg.high_conviction_threshold {
                "high".to_string()
            } else {
                "moderate".to_string()
            },
        })
        .collect();

    // Tail of the descending ranking, kept in descending order.
    let tail_start = ranked.len().saturating_sub(cfg.top_n);
    let top_sells = ranked[tail_start..]
        .iter()
        .map(|(asset, signal)| TopSell {
            asset: (*asset).clone(),
            score: signal.composite_score,
            label: signal.label.clone(),
        })
        .collect();

    let fear_greed = market.and_then(|m| m.sentiment.fear_greed_index);
    let market_regime = match fear_greed {
        Some(fg) => {
            let t = &cfg.regime_thresholds;
            if fg < t.extreme_fear {
                "extreme_fear"
            } else if fg < t.fear {
                "fear"
            } else if fg < t.neutral {
                "neutral"
            } else if fg < t.greed {
                "greed"
            } else {
                "extreme_greed"
            }
        }
        None => "unknown",
    }
    .to_string();

    let risk_level = match derivatives {
        Some(deriv) if market.is_some() => {
            let avg_funding = average_abs_funding(deriv);
            let fg = fear_greed.unwrap_or(50.0);
            cfg.risk_levels
                .iter()
                .find(|level| avg_funding <= level.max_avg_funding && fg >= level.min_fear_greed)
                .map(|level| level.name.clone())
                .unwrap_or_else(|| "unknown".to_string())
        }
        _ => "unknown".to_string(),
    };

    let improving = signals.values().filter(|s| s.momentum == "improving").count() as u32;
    let degrading = signals.values().filter(|s| s.momentum == "degrading").count() as u32;
    let signal_momentum = if improving > degrading + 2 {
        "improving"
    } else if degrading > improving + 2 {
        "degrading"
    } else {
        "mixed"
    }
    .to_string();

    PortfolioSummary {
        top_buys,
        top_sells,
        market_regime,
        risk_level,
        signal_momentum,
        assets_improving: improving,
        assets_degrading: degrading,
        llm_insight: None,
    }
}

fn average_abs_funding(data: &DerivativesData) -> f64 {
    let rates: Vec<f64> = data
        .by_asset
        .values()
        .filter_map(|block| block.funding_rate)
        .map(f64::abs)
        .collect();
    if rates.is_empty() {
        0.0
    } else {
        rates.iter().sum::<f64>() / rates.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use signal_core::{Direction, Profile};
    use std::collections::BTreeMap;

    fn signal(score: f64, momentum: &str) -> AssetSignal {
        AssetSignal {
            composite_score: score,
            label: "NEUTRAL".to_string(),
            direction: Direction::Neutral,
            dimensions: BTreeMap::new(),
            momentum: momentum.to_string(),
            prev_score: None,
            whale_data_tier: crate::types::WhaleTier::Full,
            conviction_boost: false,
            llm_insight: None,
        }
    }

    fn signals(scores: &[(&str, f64)]) -> BTreeMap<String, AssetSignal> {
        scores
            .iter()
            .map(|(asset, score)| (asset.to_string(), signal(*score, "stable")))
            .collect()
    }

    #[test]
    fn test_top_buys_and_sells_ranking() {
        let cfg = Profile::default().portfolio;
        let signals = signals(&[
            ("BTC", 82.0),
            ("ETH", 71.0),
            ("SOL", 64.0),
            ("ADA", 44.0),
            ("XRP", 38.0),
            ("DOT", 31.0),
        ]);

        let summary = build_portfolio_summary(&signals, None, None, &cfg);
        let buys: Vec<&str> = summary.top_buys.iter().map(|b| b.asset.as_str()).collect();
        let sells: Vec<&str> = summary.top_sells.iter().map(|s| s.asset.as_str()).collect();
        assert_eq!(buys, vec!["BTC", "ETH", "SOL"]);
        assert_eq!(sells, vec!["ADA", "XRP", "DOT"]);
        assert_eq!(summary.top_buys[0].conviction, "high");
        assert_eq!(summary.top_buys[2].conviction, "moderate");
    }

    #[test]
    fn test_small_universe_may_overlap() {
        let cfg = Profile::default().portfolio;
        let signals = signals(&[("BTC", 60.0), ("ETH", 40.0)]);
        let summary = build_portfolio_summary(&signals, None, None, &cfg);
        assert_eq!(summary.top_buys.len(), 2);
        assert_eq!(summary.top_sells.len(), 2);
    }

    #[test]
    fn test_regime_and_risk() {
        let cfg = Profile::default().portfolio;
        let mut market = MarketData::default();
        market.sentiment.fear_greed_index = Some(30.0);

        let mut deriv = DerivativesData::default();
        deriv.by_asset.insert(
            "BTC".to_string(),
            derivatives_agent::DerivativesAssetData {
                funding_rate: Some(0.0004),
                ..Default::default()
            },
        );

        let summary =
            build_portfolio_summary(&signals(&[("BTC", 50.0)]), Some(&market), Some(&deriv), &cfg);
        assert_eq!(summary.market_regime, "fear");
        // avg funding 0.0004 <= 0.0005 and F&G 30 >= 25 -> moderate.
        assert_eq!(summary.risk_level, "moderate");
    }

    #[test]
    fn test_missing_inputs_are_unknown() {
        let cfg = Profile::default().portfolio;
        let summary = build_portfolio_summary(&signals(&[("BTC", 50.0)]), None, None, &cfg);
        assert_eq!(summary.market_regime, "unknown");
        assert_eq!(summary.risk_level, "unknown");
        assert_eq!(summary.signal_momentum, "mixed");
    }

    #[test]
    fn test_signal_momentum_counts() {
        let cfg = Profile::default().portfolio;
        let mut map = BTreeMap::new();
        for (i, momentum) in ["improving"; 4].iter().enumerate() {
            map.insert(format!("A{i}"), signal(50.0, momentum));
        }
        map.insert("B".to_string(), signal(50.0, "degrading"));

        let summary = build_portfolio_summary(&map, None, None, &cfg);
        assert_eq!(summary.signal_momentum, "improving");
        assert_eq!(summary.assets_improving, 4);
        assert_eq!(summary.assets_degrading, 1);
    }
}

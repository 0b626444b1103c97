//! Per-dimension scorers. Each one reduces an agent's per-asset block into a
//! `(score in [0,100], detail)` pair using only the profile's declarative
//! rules; the engine contains no hard-coded thresholds.

use signal_core::profile::{
    DerivativesRules, MarketRules, NarrativeRules, TechnicalRules, WhaleRules,
};

use derivatives_agent::DerivativesData;
use market_agent::MarketData;
use narrative_agent::NarrativeData;
use technical_agent::{TechnicalData, Trend};
use whale_agent::{NetDirection, WhaleAction, WhaleData};

pub const NO_DATA: &str = "no data";
const NEUTRAL_SCORE: f64 = 50.0;

pub fn score_whale(asset: &str, data: &WhaleData, rules: &WhaleRules) -> (f64, String) {
    let mut score = rules.base_score;
    let mut details: Vec<String> = Vec::new();

    let moves = data.by_asset.get(asset).cloned().unwrap_or_default();
    let accumulate = moves
        .iter()
        .filter(|m| m.action == WhaleAction::Accumulate)
        .count() as f64;
    let sell = moves.iter().filter(|m| m.action == WhaleAction::Sell).count() as f64;

    if accumulate + sell >= rules.min_directional_moves as f64 {
        let ratio = accumulate / (accumulate + sell);
        score += ratio * rules.ratio_max_points;
        details.push(format!("{accumulate:.0} accumulate, {sell:.0} sell"));
    }

    match data.summary.net_exchange_direction {
        NetDirection::NetOutflow => {
            score += rules.exchange_outflow_bonus;
            details.push("exchange outflow".to_string());
        }
        NetDirection::NetInflow => {
            score += rules.exchange_inflow_penalty;
            details.push("exchange inflow".to_string());
        }
        _ => {}
    }

    let mut wallet_signals = 0usize;
    for signal in &data.summary.whale_wallet_signals {
        let lower = signal.to_lowercase();
        if lower.contains("accumulating") {
            score += rules.wallet_accumulating_bonus;
            wallet_signals += 1;
        } else if lower.contains("reducing") {
            score += rules.wallet_reducing_penalty;
            wallet_signals += 1;
        }
    }
    if wallet_signals > 0 {
        details.push(format!("{wallet_signals} wallet signals"));
    }

    let score = score.clamp(rules.min_score, rules.max_score);
    let detail = if details.is_empty() {
        "no whale activity".to_string()
    } else {
        details.join("; ")
    };
    (score, detail)
}

pub fn score_technical(asset: &str, data: &TechnicalData, rules: &TechnicalRules) -> (f64, String) {
    let Some(block) = data.by_asset.get(asset) else {
        return (NEUTRAL_SCORE, NO_DATA.to_string());
    };
    if block.price.is_none() && block.rsi_14.is_none() {
        return (NEUTRAL_SCORE, NO_DATA.to_string());
    }

    let mut score = 0.0;
    let mut details: Vec<String> = Vec::new();

    if let Some(rsi) = block.rsi_14 {
        let r = &rules.rsi;
        if rsi < r.oversold_below {
            score += r.oversold_score;
            details.push(format!("RSI {rsi:.0} oversold"));
        } else if rsi > r.overbought_above {
            score += r.overbought_score;
            details.push(format!("RSI {rsi:.0} overbought"));
        } else {
            let ratio = (rsi - r.oversold_below) / (r.overbought_above - r.oversold_below);
            score += r.neutral_min_score + ratio * (r.neutral_max_score - r.neutral_min_score);
            details.push(format!("RSI {rsi:.0}"));
        }
    }

    if let (Some(macd_line), Some(macd_signal)) = (block.macd_line, block.macd_signal) {
        if macd_line > macd_signal {
            score += rules.macd.bullish_cross_points;
            details.push("MACD bullish".to_string());
        } else {
            score += rules.macd.bearish_cross_points;
            details.push("MACD bearish".to_string());
        }
    }

    if let (Some(price), Some(ma7)) = (block.price, block.ma_7d) {
        score += if price > ma7 {
            rules.ma.above_ma7_points
        } else {
            rules.ma.below_ma7_points
        };
    }
    if let (Some(price), Some(ma30)) = (block.price, block.ma_30d) {
        if price > ma30 {
            score += rules.ma.above_ma30_points;
            details.push("above MA30".to_string());
        } else {
            score += rules.ma.below_ma30_points;
        }
    }

    // 30d trend is the macro signal; fall back to 7d when it is unknown.
    let trend = if block.trend_30d != Trend::Unknown {
        block.trend_30d
    } else {
        block.trend_7d
    };
    match trend {
        Trend::Bullish => {
            score += rules.trend.bullish_points;
            details.push("trend bullish".to_string());
        }
        Trend::Bearish => {
            score += rules.trend.bearish_points;
            details.push("trend bearish".to_string());
        }
        _ => score += rules.trend.neutral_points,
    }

    let detail = if details.is_empty() {
        "no tech data".to_string()
    } else {
        details.join("; ")
    };
    (score.clamp(0.0, 100.0), detail)
}

pub fn score_derivatives(
    asset: &str,
    data: &DerivativesData,
    rules: &DerivativesRules,
    prev_open_interest: Option<f64>,
) -> (f64, String) {
    let Some(block) = data.by_asset.get(asset) else {
        return (NEUTRAL_SCORE, NO_DATA.to_string());
    };
    if block.long_short_ratio.is_none()
        && block.funding_rate.is_none()
        && block.open_interest_usd.is_none()
    {
        return (NEUTRAL_SCORE, NO_DATA.to_string());
    }

    let mut score = 0.0;
    let mut details: Vec<String> = Vec::new();

    if let Some(ls) = block.long_short_ratio {
        let r = &rules.long_short;
        if ls >= r.sweet_spot_min && ls <= r.sweet_spot_max {
            score += r.sweet_spot_score;
            details.push(format!("L/S {ls:.2} sweet spot"));
        } else if ls > r.overcrowded_above {
            score += r.overcrowded_score;
            details.push(format!("L/S {ls:.2} overcrowded"));
        } else if ls < r.contrarian_below {
            score += r.contrarian_score;
            details.push(format!("L/S {ls:.2} contrarian"));
        } else {
            score += r.default_score;
            details.push(format!("L/S {ls:.2}"));
        }
    }

    if let Some(funding) = block.funding_rate {
        let r = &rules.funding;
        if funding < 0.0 {
            score += r.negative_score;
            details.push(format!("funding {funding:.5} negative"));
        } else if funding < r.low_threshold {
            score += r.low_score;
            details.push("low funding".to_string());
        } else if funding < r.moderate_threshold {
            score += r.moderate_score;
        } else {
            score += r.high_score;
            details.push("high funding".to_string());
        }
    }

    if let Some(oi) = block.open_interest_usd {
        let r = &rules.open_interest;
        match prev_open_interest {
            Some(prev) if prev > 0.0 => {
                let delta_pct = (oi - prev) / prev * 100.0;
                if delta_pct > r.delta_threshold_pct {
                    score += r.rising_score;
                    details.push(format!("OI rising {delta_pct:.1}%"));
                } else if delta_pct < -r.delta_threshold_pct {
                    score += r.falling_score;
                    details.push(format!("OI falling {delta_pct:.1}%"));
                } else {
                    score += r.stable_score;
                }
            }
            _ => score += r.stable_score,
        }
    }

    let detail = if details.is_empty() {
        "no deriv data".to_string()
    } else {
        details.join("; ")
    };
    (score.clamp(0.0, 100.0), detail)
}

pub fn score_narrative(asset: &str, data: &NarrativeData, rules: &NarrativeRules) -> (f64, String) {
    let Some(block) = data.by_asset.get(asset) else {
        return (NEUTRAL_SCORE, NO_DATA.to_string());
    };

    let mut score = 0.0;
    let mut details: Vec<String> = Vec::new();

    if block.normalised_score > 0.0 {
        details.push(format!("buzz {:.2}", block.normalised_score));
    }
    score += block.normalised_score * rules.volume_multiplier;

    if let Some(llm) = &block.llm_sentiment {
        if llm.confidence >= rules.llm.confidence_threshold {
            let points = match llm.sentiment.to_lowercase().as_str() {
                "bullish" => rules.llm.bullish_points,
                "bearish" => rules.llm.bearish_points,
                _ => rules.llm.neutral_points,
            };
            score += points;
            details.push(format!("llm {}", llm.sentiment.to_lowercase()));
        }
    }

    if block.community_sentiment != 0.0 {
        score += block.community_sentiment * rules.community_multiplier;
        details.push(format!("community {:+.2}", block.community_sentiment));
    }

    if block.trending_coingecko {
        score += rules.trending_bonus;
        details.push("trending".to_string());
    }

    if block.influencer_mentions >= rules.influencer.min_mentions {
        score += rules.influencer.bonus;
        details.push(format!("{} influencer mentions", block.influencer_mentions));
    }

    if block.sources_with_data >= rules.multi_source.min_sources {
        score += rules.multi_source.bonus;
    }

    if details.is_empty() {
        details.push("low buzz".to_string());
    }
    // The snapshot recorder extracts the source count from this detail.
    details.push(format!("{} sources", block.sources_with_data));

    (score.clamp(0.0, rules.max_score), details.join("; "))
}

pub fn score_market(asset: &str, data: &MarketData, rules: &MarketRules) -> (f64, String) {
    let Some(block) = data.per_asset.get(asset) else {
        return (NEUTRAL_SCORE, NO_DATA.to_string());
    };

    let mut score = 0.0;
    let mut details: Vec<String> = Vec::new();

    if let Some(change) = block.change_24h_pct {
        let r = &rules.price_change;
        if change > r.strong_positive_above {
            score += r.strong_positive_score;
            details.push(format!("+{change:.1}% strong"));
        } else if change > r.positive_above {
            score += r.positive_score;
            details.push(format!("+{change:.1}%"));
        } else if change > r.mild_negative_above {
            score += r.mild_negative_score;
            details.push(format!("{change:.1}%"));
        } else {
            score += r.strong_negative_score;
            details.push(format!("{change:.1}% drop"));
        }
    }

    if let Some(ratio) = block.volume_spike_ratio {
        let r = &rules.volume;
        if ratio > r.spike_multiplier_above {
            score += r.spike_score;
            details.push(format!("{ratio:.1}x vol spike"));
        } else if ratio > r.elevated_multiplier_above {
            score += r.elevated_score;
            details.push(format!("{ratio:.1}x vol"));
        } else {
            score += r.normal_score;
        }
    }

    if let Some(fg) = data.sentiment.fear_greed_index {
        let r = &rules.fear_greed;
        if fg < r.extreme_fear_below {
            score += r.extreme_fear_score;
            details.push(format!("F&G {fg:.0} extreme fear"));
        } else if fg < r.fear_below {
            score += r.fear_score;
            details.push(format!("F&G {fg:.0} fear"));
        } else if fg < r.neutral_below {
            score += r.neutral_score;
        } else if fg < r.greed_below {
            score += r.greed_score;
        } else {
            score += r.extreme_greed_score;
            details.push(format!("F&G {fg:.0} extreme greed"));
        }
    }

    let detail = if details.is_empty() {
        "no market data".to_string()
    } else {
        details.join("; ")
    };
    (score.clamp(0.0, 100.0), detail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use signal_core::Profile;
    use whale_agent::{WhaleMove, WhaleSummary};

    fn whale_move(action: WhaleAction) -> WhaleMove {
        WhaleMove {
            source: "whale_alert_api".to_string(),
            asset: "BTC".to_string(),
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
    fn test_whale_ratio_award_and_clamp() {
        let rules = Profile::default().scoring.whale;
        let mut data = WhaleData::default();
        data.by_asset.insert(
            "BTC".to_string(),
            vec![
                whale_move(WhaleAction::Accumulate),
                whale_move(WhaleAction::Accumulate),
                whale_move(WhaleAction::Accumulate),
                whale_move(WhaleAction::Sell),
            ],
        );

        let (score, detail) = score_whale("BTC", &data, &rules);
        // base 50 + 0.75 * 30 = 72.5
        assert!((score - 72.5).abs() < 1e-9);
        assert!(detail.contains("3 accumulate, 1 sell"));
    }

    #[test]
    fn test_whale_flow_and_wallet_bonuses() {
        let rules = Profile::default().scoring.whale;
        let data = WhaleData {
            summary: WhaleSummary {
                net_exchange_direction: NetDirection::NetOutflow,
                whale_wallet_signals: vec!["wintermute: accumulating".to_string()],
                ..Default::default()
            },
            ..Default::default()
        };

        let (score, detail) = score_whale("BTC", &data, &rules);
        // base 50 + outflow 10 + wallet 8
        assert!((score - 68.0).abs() < 1e-9);
        assert!(detail.contains("exchange outflow"));
        assert!(detail.contains("wallet signals"));
    }

    #[test]
    fn test_whale_quiet_cycle_detail() {
        let rules = Profile::default().scoring.whale;
        let (score, detail) = score_whale("BTC", &WhaleData::default(), &rules);
        assert_eq!(score, 50.0);
        assert_eq!(detail, "no whale activity");
    }

    #[test]
    fn test_technical_full_bullish_stack() {
        let rules = Profile::default().scoring.technical;
        let mut data = TechnicalData::default();
        data.by_asset.insert(
            "BTC".to_string(),
            technical_agent::TechnicalAssetData {
                price: Some(110.0),
                rsi_14: Some(50.0),
                macd_line: Some(1.0),
                macd_signal: Some(0.5),
                ma_7d: Some(100.0),
                ma_30d: Some(95.0),
                trend_30d: Trend::Bullish,
                ..Default::default()
            },
        );

        let (score, detail) = score_technical("BTC", &data, &rules);
        // RSI 50 -> 15 + 0.5*25 = 27.5; MACD 20; MA7 10; MA30 10; trend 20
        assert!((score - 87.5).abs() < 1e-9);
        assert!(detail.contains("MACD bullish"));
        assert!(detail.contains("above MA30"));
        assert!(detail.contains("trend bullish"));
    }

    #[test]
    fn test_technical_missing_block_is_neutral() {
        let rules = Profile::default().scoring.technical;
        let (score, detail) = score_technical("BTC", &TechnicalData::default(), &rules);
        assert_eq!(score, 50.0);
        assert_eq!(detail, NO_DATA);
    }

    #[test]
    fn test_derivatives_oi_delta_bands() {
        let rules = Profile::default().scoring.derivatives;
        let mut data = DerivativesData::default();
        data.by_asset.insert(
            "BTC".to_string(),
            derivatives_agent::DerivativesAssetData {
                long_short_ratio: Some(0.60),
                funding_rate: Some(0.0001),
                open_interest_usd: Some(110.0),
                ..Default::default()
            },
        );

        // +10% vs previous -> rising.
        let (rising, detail) = score_derivatives("BTC", &data, &rules, Some(100.0));
        // sweet spot 40 + low funding 30 + rising 20
        assert!((rising - 90.0).abs() < 1e-9);
        assert!(detail.contains("OI rising"));

        // Small delta -> stable.
        let (stable, _) = score_derivatives("BTC", &data, &rules, Some(108.0));
        assert!((stable - 85.0).abs() < 1e-9);

        // No previous value -> stable.
        let (first, _) = score_derivatives("BTC", &data, &rules, None);
        assert!((first - 85.0).abs() < 1e-9);

        // Sharp drop -> falling.
        let (falling, detail) = score_derivatives("BTC", &data, &rules, Some(200.0));
        assert!((falling - 75.0).abs() < 1e-9);
        assert!(detail.contains("OI falling"));
    }

    #[test]
    fn test_narrative_components_and_detail_suffix() {
        let rules = Profile::default().scoring.narrative;
        let mut data = NarrativeData::default();
        data.by_asset.insert(
            "BTC".to_string(),
            narrative_agent::NarrativeAssetData {
                total_mentions: 40.0,
                normalised_score: 0.5,
                trending_coingecko: true,
                community_sentiment: 0.5,
                influencer_mentions: 4,
                sources_with_data: 3,
                llm_sentiment: Some(narrative_agent::LlmSentiment {
                    sentiment: "bullish".to_string(),
                    confidence: 0.8,
                    ..Default::default()
                }),
                ..Default::default()
            },
        );

        let (score, detail) = score_narrative("BTC", &data, &rules);
        // 0.5*40 + llm 15 + community 0.5*10 + trending 15 + influencer 10 + multi-source 10
        assert!((score - 70.0).abs() < 1e-9);
        assert!(detail.ends_with("3 sources"));
        assert!(detail.contains("trending"));
        assert!(detail.contains("llm bullish"));
    }

    #[test]
    fn test_narrative_low_confidence_llm_ignored() {
        let rules = Profile::default().scoring.narrative;
        let mut data = NarrativeData::default();
        data.by_asset.insert(
            "BTC".to_string(),
            narrative_agent::NarrativeAssetData {
                llm_sentiment: Some(narrative_agent::LlmSentiment {
                    sentiment: "bullish".to_string(),
                    confidence: 0.3,
                    ..Default::default()
                }),
                ..Default::default()
            },
        );

        let (score, detail) = score_narrative("BTC", &data, &rules);
        assert_eq!(score, 0.0);
        assert_eq!(detail, "low buzz; 0 sources");
    }

    #[test]
    fn test_market_bands() {
        let rules = Profile::default().scoring.market;
        let mut data = MarketData::default();
        data.per_asset.insert(
            "BTC".to_string(),
            market_agent::MarketAssetData {
                price: Some(97000.0),
                change_24h_pct: Some(6.2),
                volume_spike_ratio: Some(2.5),
                ..Default::default()
            },
        );
        data.sentiment.fear_greed_index = Some(20.0);

        let (score, detail) = score_market("BTC", &data, &rules);
        // strong move 40 + spike 30 + extreme fear 30
        assert!((score - 100.0).abs() < 1e-9);
        assert!(detail.contains("vol spike"));
        assert!(detail.contains("extreme fear"));
    }

    #[test]
    fn test_market_missing_asset_is_neutral() {
        let rules = Profile::default().scoring.market;
        let (score, detail) = score_market("BTC", &MarketData::default(), &rules);
        assert_eq!(score, 50.0);
        assert_eq!(detail, NO_DATA);
    }
}

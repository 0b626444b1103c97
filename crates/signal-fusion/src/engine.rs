use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use signal_core::profile::{ConvictionConfig, MomentumConfig, ReweightingConfig, Weights};
use signal_core::{classify, AgentStatus, Envelope, EnvelopeMeta, LlmClient, Profile};
use signal_store::{Storage, FUSION_STREAM};

use derivatives_agent::DerivativesData;
use market_agent::MarketData;
use narrative_agent::NarrativeData;
use technical_agent::TechnicalData;
use whale_agent::WhaleData;

use crate::insight::attach_insights;
use crate::portfolio::build_portfolio_summary;
use crate::scorers::{
    score_derivatives, score_market, score_narrative, score_technical, score_whale, NO_DATA,
};
use crate::types::{AssetSignal, Dimension, DimensionScore, FusionData, WhaleTier};

/// Kv namespace holding each asset's previous composite (momentum state).
pub const SCORES_NAMESPACE: &str = "fusion_scores";
/// Kv namespace holding each asset's previous open interest (delta scoring).
pub const OI_NAMESPACE: &str = "deriv_oi";

/// Fuses the latest envelope of each collector into composite per-asset
/// signals plus a portfolio summary. Pure computation apart from the momentum
/// and open-interest state kept in the kv store.
pub struct FusionEngine {
    profile: Arc<Profile>,
    store: Storage,
    llm: Option<LlmClient>,
}

#[derive(Default)]
struct RawEnvelopes {
    whale: Option<Envelope<WhaleData>>,
    technical: Option<Envelope<TechnicalData>>,
    derivatives: Option<Envelope<DerivativesData>>,
    narrative: Option<Envelope<NarrativeData>>,
    market: Option<Envelope<MarketData>>,
}

impl RawEnvelopes {
    fn available(&self) -> Vec<String> {
        let mut out = Vec::new();
        for dim in Dimension::ALL {
            if self.has(dim) {
                out.push(dim.as_str().to_string());
            }
        }
        out
    }

    fn missing(&self) -> Vec<String> {
        let mut out = Vec::new();
        for dim in Dimension::ALL {
            if !self.has(dim) {
                out.push(dim.as_str().to_string());
            }
        }
        out
    }

    fn has(&self, dim: Dimension) -> bool {
        match dim {
            Dimension::Whale => self.whale.is_some(),
            Dimension::Technical => self.technical.is_some(),
            Dimension::Derivatives => self.derivatives.is_some(),
            Dimension::Narrative => self.narrative.is_some(),
            Dimension::Market => self.market.is_some(),
        }
    }
}

impl FusionEngine {
    pub fn new(profile: Arc<Profile>, store: Storage) -> Self {
        Self {
            profile,
            store,
            llm: LlmClient::from_env(),
        }
    }

    /// Main entry: load the latest agent envelopes, score, classify,
    /// summarise, persist the fusion envelope, and return it.
    pub async fn fuse(&self) -> Envelope<FusionData> {
        let start = Instant::now();
        let mut errors: Vec<String> = Vec::new();

        let raw = self.load_envelopes(&mut errors).await;
        let prev_run: Option<Envelope<FusionData>> = self.store.load_latest(FUSION_STREAM).await;

        let mut signals: BTreeMap<String, AssetSignal> = BTreeMap::new();
        for asset in self.profile.assets.clone() {
            let signal = self.score_asset(&asset, &raw).await;
            signals.insert(asset, signal);
        }

        let mut data = FusionData {
            portfolio_summary: build_portfolio_summary(
                &signals,
                raw.market.as_ref().map(|e| &e.data),
                raw.derivatives.as_ref().map(|e| &e.data),
                &self.profile.portfolio,
            ),
            signals,
        };

        let llm_cfg = &self.profile.llm_insights;
        if llm_cfg.enabled {
            match &self.llm {
                Some(client) => {
                    if let Err(e) =
                        attach_insights(client, llm_cfg, &mut data, prev_run.as_ref().map(|p| &p.data))
                            .await
                    {
                        errors.push(format!("llm_insights: {e}"));
                    }
                }
                None => errors.push("llm_insights: ANTHROPIC_API_KEY not set".to_string()),
            }
        }

        let status = if errors.is_empty() {
            AgentStatus::Success
        } else {
            AgentStatus::Partial
        };

        let envelope = Envelope {
            agent: FUSION_STREAM.to_string(),
            profile: self.profile.name.clone(),
            timestamp: Utc::now(),
            status,
            data,
            meta: EnvelopeMeta {
                duration_ms: start.elapsed().as_millis() as u64,
                errors,
                agents_available: raw.available(),
                agents_missing: raw.missing(),
            },
        };

        self.store.save(FUSION_STREAM, &envelope).await;
        envelope
    }

    async fn load_envelopes(&self, errors: &mut Vec<String>) -> RawEnvelopes {
        let raw = RawEnvelopes {
            whale: self.store.load_latest(Dimension::Whale.agent_name()).await,
            technical: self
                .store
                .load_latest(Dimension::Technical.agent_name())
                .await,
            derivatives: self
                .store
                .load_latest(Dimension::Derivatives.agent_name())
                .await,
            narrative: self
                .store
                .load_latest(Dimension::Narrative.agent_name())
                .await,
            market: self.store.load_latest(Dimension::Market.agent_name()).await,
        };

        for dim in Dimension::ALL {
            if !raw.has(dim) {
                errors.push(format!("{}: no data in storage", dim.as_str()));
            }
        }
        raw
    }

    async fn score_asset(&self, asset: &str, raw: &RawEnvelopes) -> AssetSignal {
        let rules = &self.profile.scoring;

        // Previous open interest is read before this cycle's value replaces it.
        let prev_oi = self.store.load_kv(OI_NAMESPACE, asset).await;
        if let Some(oi) = raw
            .derivatives
            .as_ref()
            .and_then(|env| env.data.by_asset.get(asset))
            .and_then(|block| block.open_interest_usd)
        {
            self.store.save_kv(OI_NAMESPACE, asset, oi).await;
        }

        let mut scores: BTreeMap<Dimension, (f64, String)> = BTreeMap::new();
        for dim in Dimension::ALL {
            let scored = match dim {
                Dimension::Whale => raw
                    .whale
                    .as_ref()
                    .map(|env| score_whale(asset, &env.data, &rules.whale)),
                Dimension::Technical => raw
                    .technical
                    .as_ref()
                    .map(|env| score_technical(asset, &env.data, &rules.technical)),
                Dimension::Derivatives => raw.derivatives.as_ref().map(|env| {
                    score_derivatives(asset, &env.data, &rules.derivatives, prev_oi)
                }),
                Dimension::Narrative => raw
                    .narrative
                    .as_ref()
                    .map(|env| score_narrative(asset, &env.data, &rules.narrative)),
                Dimension::Market => raw
                    .market
                    .as_ref()
                    .map(|env| score_market(asset, &env.data, &rules.market)),
            };
            scores.insert(dim, scored.unwrap_or((50.0, NO_DATA.to_string())));
        }

        let whale_detail = scores
            .get(&Dimension::Whale)
            .map(|(_, detail)| detail.clone())
            .unwrap_or_default();
        let tier = whale_tier(&whale_detail, &self.profile.reweighting);
        let weights = adjust_weights(
            &self.profile.weights,
            tier,
            &self.profile.reweighting,
        );

        let mut composite = 0.0;
        let mut dimensions: BTreeMap<String, DimensionScore> = BTreeMap::new();
        for dim in Dimension::ALL {
            let (score, detail) = scores.get(&dim).cloned().unwrap_or((50.0, NO_DATA.into()));
            let weight = *weights.get(dim.as_str()).unwrap_or(&0.0);
            composite += score * weight;

            let (label, _) = classify(score, &self.profile.labels);
            dimensions.insert(
                dim.as_str().to_string(),
                DimensionScore {
                    score: round1(score),
                    label,
                    detail,
                    weight,
                },
            );
        }

        let composite = round1(composite);
        let dim_scores: Vec<f64> = Dimension::ALL
            .iter()
            .filter_map(|d| scores.get(d).map(|(s, _)| *s))
            .collect();
        let (composite, conviction_boost) =
            apply_conviction(composite, &dim_scores, &self.profile.conviction);

        let (label, direction) = classify(composite, &self.profile.labels);

        // Momentum vs the previous run's composite.
        let prev_score = self.store.load_kv(SCORES_NAMESPACE, asset).await;
        let momentum = momentum_label(composite, prev_score, &self.profile.momentum);
        self.store.save_kv(SCORES_NAMESPACE, asset, composite).await;

        AssetSignal {
            composite_score: composite,
            label,
            direction,
            dimensions,
            momentum,
            prev_score: prev_score.map(round1),
            whale_data_tier: tier,
            conviction_boost,
            llm_insight: None,
        }
    }
}

// ------------------------------------------------------------------ //
// Pure stages
// ------------------------------------------------------------------ //

pub(crate) fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Classify the whale evidence tier from the dimension's detail string.
/// Walks the configured keyword lists: directional-move evidence first, then
/// flow/wallet-only evidence, else `none`.
pub fn whale_tier(detail: &str, cfg: &ReweightingConfig) -> WhaleTier {
    if !cfg.enabled {
        return WhaleTier::Full;
    }
    let lower = detail.to_lowercase();
    if cfg.full_keywords.iter().any(|k| lower.contains(&k.to_lowercase())) {
        WhaleTier::Full
    } else if cfg
        .sparse_keywords
        .iter()
        .any(|k| lower.contains(&k.to_lowercase()))
    {
        WhaleTier::Sparse
    } else {
        WhaleTier::None
    }
}

/// Scale the whale weight by the tier multiplier and redistribute the freed
/// mass to the other four dimensions in proportion to their configured
/// weights. The result sums to the configured total.
pub fn adjust_weights(
    weights: &Weights,
    tier: WhaleTier,
    cfg: &ReweightingConfig,
) -> BTreeMap<String, f64> {
    let multiplier = match tier {
        WhaleTier::Full => cfg.tier_multipliers.full,
        WhaleTier::Sparse => cfg.tier_multipliers.sparse,
        WhaleTier::None => cfg.tier_multipliers.none,
    };

    let whale = weights.whale * multiplier;
    let freed = weights.whale - whale;
    let non_whale_sum =
        weights.technical + weights.derivatives + weights.narrative + weights.market;

    let mut out = BTreeMap::new();
    out.insert("whale".to_string(), whale);
    for (name, base) in [
        ("technical", weights.technical),
        ("derivatives", weights.derivatives),
        ("narrative", weights.narrative),
        ("market", weights.market),
    ] {
        let adjusted = if non_whale_sum > 0.0 {
            base + freed * base / non_whale_sum
        } else {
            base
        };
        out.insert(name.to_string(), adjusted);
    }
    out
}

/// Amplify the composite away from 50 when enough dimensions agree on
/// direction. Monotone: a bull boost never lowers the composite, a bear boost
/// never raises it.
pub fn apply_conviction(composite: f64, dim_scores: &[f64], cfg: &ConvictionConfig) -> (f64, bool) {
    if !cfg.enabled {
        return (composite, false);
    }

    let bull = dim_scores.iter().filter(|s| **s > cfg.bull_above).count() as u32;
    let bear = dim_scores.iter().filter(|s| **s < cfg.bear_below).count() as u32;

    let boosted = (bull >= cfg.min_agreeing_dimensions && composite > 50.0)
        || (bear >= cfg.min_agreeing_dimensions && composite < 50.0);
    if !boosted {
        return (composite, false);
    }

    let amplified = 50.0 + (composite - 50.0) * cfg.boost_factor;
    (round1(amplified.clamp(0.0, 100.0)), true)
}

pub fn momentum_label(composite: f64, prev: Option<f64>, cfg: &MomentumConfig) -> String {
    match prev {
        None => "new".to_string(),
        Some(prev) => {
            let delta = composite - prev;
            if delta > cfg.threshold {
                cfg.improving_label.clone()
            } else if delta < -cfg.threshold {
                cfg.degrading_label.clone()
            } else {
                cfg.stable_label.clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use signal_core::Direction;
    use technical_agent::{TechnicalAssetData, Trend};

    fn profile() -> Arc<Profile> {
        Arc::new(Profile::default())
    }

    fn bullish_technical_envelope() -> Envelope<TechnicalData> {
        let mut data = TechnicalData::default();
        data.by_asset.insert(
            "BTC".to_string(),
            TechnicalAssetData {
                price: Some(110.0),
                rsi_14: Some(60.0),
                macd_line: Some(1.0),
                macd_signal: Some(0.5),
                ma_7d: Some(100.0),
                ma_30d: Some(95.0),
                trend_30d: Trend::Bullish,
                ..Default::default()
            },
        );
        Envelope {
            agent: "technical_agent".to_string(),
            profile: "signals_default".to_string(),
            timestamp: Utc::now(),
            status: AgentStatus::Success,
            data,
            meta: EnvelopeMeta::default(),
        }
    }

    #[test]
    fn test_conviction_boost_fires() {
        let cfg = ConvictionConfig::default();
        let scores = [75.0, 80.0, 70.0, 72.0, 78.0];
        let (boosted, fired) = apply_conviction(74.9, &scores, &cfg);
        assert!(fired);
        assert!((boosted - 81.1).abs() < 1e-9);
    }

    #[test]
    fn test_conviction_boost_symmetric_for_bears() {
        let cfg = ConvictionConfig::default();
        let scores = [25.0, 30.0, 40.0, 35.0, 60.0];
        let (boosted, fired) = apply_conviction(34.0, &scores, &cfg);
        assert!(fired);
        // 50 - 16 * 1.25 = 30.0
        assert!((boosted - 30.0).abs() < 1e-9);
        assert!(boosted <= 34.0);
    }

    #[test]
    fn test_conviction_requires_agreement() {
        let cfg = ConvictionConfig::default();
        // Only two bullish dimensions.
        let scores = [75.0, 80.0, 50.0, 50.0, 50.0];
        let (result, fired) = apply_conviction(60.0, &scores, &cfg);
        assert!(!fired);
        assert_eq!(result, 60.0);
    }

    #[test]
    fn test_conviction_is_monotone() {
        let cfg = ConvictionConfig::default();
        let bull = [75.0, 80.0, 70.0, 72.0, 78.0];
        for composite in [51.0, 60.0, 74.9, 90.0] {
            let (boosted, _) = apply_conviction(composite, &bull, &cfg);
            assert!(boosted >= composite);
            assert!(boosted <= 100.0);
        }
    }

    #[test]
    fn test_whale_tier_keywords() {
        let cfg = ReweightingConfig::default();
        assert_eq!(whale_tier("3 accumulate, 1 sell", &cfg), WhaleTier::Full);
        assert_eq!(whale_tier("exchange outflow", &cfg), WhaleTier::Sparse);
        assert_eq!(whale_tier("2 wallet signals", &cfg), WhaleTier::Sparse);
        assert_eq!(whale_tier("no whale activity", &cfg), WhaleTier::None);
        assert_eq!(whale_tier("no data", &cfg), WhaleTier::None);

        let disabled = ReweightingConfig {
            enabled: false,
            ..Default::default()
        };
        assert_eq!(whale_tier("no data", &disabled), WhaleTier::Full);
    }

    #[test]
    fn test_adjust_weights_preserves_mass() {
        let weights = Weights::default();
        let cfg = ReweightingConfig::default();

        for tier in [WhaleTier::Full, WhaleTier::Sparse, WhaleTier::None] {
            let adjusted = adjust_weights(&weights, tier, &cfg);
            let total: f64 = adjusted.values().sum();
            assert!((total - 1.0).abs() < 1e-9, "mass broke for {tier:?}");
        }
    }

    #[test]
    fn test_adjust_weights_none_tier_redistribution() {
        let weights = Weights::default();
        let cfg = ReweightingConfig::default();
        let adjusted = adjust_weights(&weights, WhaleTier::None, &cfg);

        assert_eq!(adjusted["whale"], 0.0);
        assert!((adjusted["technical"] - 0.25 - 0.30 * 0.25 / 0.70).abs() < 1e-9);
        assert!((adjusted["derivatives"] - 0.20 - 0.30 * 0.20 / 0.70).abs() < 1e-9);

        // Composite over scores {tech 80, deriv 70, narr 72, mkt 78} with the
        // redistributed weights.
        let composite = 80.0 * adjusted["technical"]
            + 70.0 * adjusted["derivatives"]
            + 72.0 * adjusted["narrative"]
            + 78.0 * adjusted["market"];
        assert!((composite - 75.1).abs() < 0.1);
    }

    #[test]
    fn test_momentum_label() {
        let cfg = MomentumConfig::default();
        assert_eq!(momentum_label(66.2, None, &cfg), "new");
        assert_eq!(momentum_label(66.2, Some(60.0), &cfg), "improving");
        assert_eq!(momentum_label(53.0, Some(60.0), &cfg), "degrading");
        assert_eq!(momentum_label(62.0, Some(60.0), &cfg), "stable");
    }

    #[tokio::test]
    async fn test_cold_start_all_neutral() {
        let store = Storage::sqlite_in_memory().await.unwrap();
        let engine = FusionEngine::new(profile(), store.clone());

        let envelope = engine.fuse().await;

        // One missing-data error per dimension.
        for dim in ["whale", "technical", "derivatives", "narrative", "market"] {
            assert!(envelope
                .meta
                .errors
                .contains(&format!("{dim}: no data in storage")));
        }
        assert_eq!(envelope.status, AgentStatus::Partial);
        assert_eq!(envelope.meta.agents_missing.len(), 5);

        for (_, signal) in &envelope.data.signals {
            assert_eq!(signal.composite_score, 50.0);
            assert_eq!(signal.label, "NEUTRAL");
            assert_eq!(signal.direction, Direction::Neutral);
            assert_eq!(signal.momentum, "new");
            assert!(!signal.conviction_boost);
            assert!(signal.prev_score.is_none());
            for (_, dim) in &signal.dimensions {
                assert_eq!(dim.detail, "no data");
                assert!((0.0..=100.0).contains(&dim.score));
            }
            let weight_total: f64 = signal.dimensions.values().map(|d| d.weight).sum();
            assert!((weight_total - 1.0).abs() < 1e-9);
        }

        // The envelope was persisted for the read API.
        let stored: Option<Envelope<FusionData>> = store.load_latest(FUSION_STREAM).await;
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn test_momentum_transition_across_runs() {
        let store = Storage::sqlite_in_memory().await.unwrap();

        // Seed a strongly bullish technical envelope so the BTC composite sits
        // above 50.
        store.save("technical_agent", &bullish_technical_envelope()).await;

        let engine = FusionEngine::new(profile(), store.clone());

        let first = engine.fuse().await;
        let btc_first = &first.data.signals["BTC"];
        assert_eq!(btc_first.momentum, "new");
        assert!(btc_first.composite_score > 50.0);

        // Pretend the previous composite was much lower.
        store.save_kv(SCORES_NAMESPACE, "BTC", 10.0).await;
        let second = engine.fuse().await;
        let btc_second = &second.data.signals["BTC"];
        assert_eq!(btc_second.prev_score, Some(10.0));
        assert_eq!(btc_second.momentum, "improving");
    }

    #[tokio::test]
    async fn test_composite_always_in_range() {
        let store = Storage::sqlite_in_memory().await.unwrap();
        let engine = FusionEngine::new(profile(), store);
        let envelope = engine.fuse().await;
        for signal in envelope.data.signals.values() {
            assert!((0.0..=100.0).contains(&signal.composite_score));
        }
    }
}

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::SignalError;
use crate::labels::{Direction, LabelBand};

/// Environment variable pointing at a JSON profile override file.
pub const PROFILE_PATH_ENV: &str = "SIGNAL_PROFILE_PATH";

/// Process-wide declarative configuration: assets, weights, scoring rules,
/// label bands, and per-source collector settings.
///
/// `Profile::default()` is a complete working configuration; a JSON file can
/// override any subset of it. All fields carry `#[serde(default)]` so adding
/// new fields never breaks loading an older profile file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub name: String,
    pub assets: Vec<String>,
    pub http_timeout_sec: u64,
    pub weights: Weights,
    pub scoring: ScoringRules,
    pub labels: Vec<LabelBand>,
    pub reweighting: ReweightingConfig,
    pub conviction: ConvictionConfig,
    pub momentum: MomentumConfig,
    pub portfolio: PortfolioConfig,
    pub llm_insights: LlmInsightsConfig,
    pub technical: TechnicalConfig,
    pub derivatives: DerivativesConfig,
    pub market: MarketConfig,
    pub narrative: NarrativeConfig,
    pub whale: WhaleConfig,
}

fn default_assets() -> Vec<String> {
    [
        "BTC", "ETH", "SOL", "BNB", "XRP", "ADA", "AVAX", "DOT", "MATIC", "LINK", "UNI", "ATOM",
        "LTC", "FIL", "NEAR", "APT", "ARB", "OP", "INJ", "SUI",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn usdt_pairs(assets: &[String]) -> BTreeMap<String, String> {
    assets
        .iter()
        .map(|a| (a.clone(), format!("{a}USDT")))
        .collect()
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            name: "signals_default".to_string(),
            assets: default_assets(),
            http_timeout_sec: 20,
            weights: Weights::default(),
            scoring: ScoringRules::default(),
            labels: default_labels(),
            reweighting: ReweightingConfig::default(),
            conviction: ConvictionConfig::default(),
            momentum: MomentumConfig::default(),
            portfolio: PortfolioConfig::default(),
            llm_insights: LlmInsightsConfig::default(),
            technical: TechnicalConfig::default(),
            derivatives: DerivativesConfig::default(),
            market: MarketConfig::default(),
            narrative: NarrativeConfig::default(),
            whale: WhaleConfig::default(),
        }
    }
}

impl Profile {
    /// Load the profile: JSON file override when `SIGNAL_PROFILE_PATH` is set,
    /// built-in defaults otherwise. Misconfiguration fails here, at startup.
    pub fn load() -> Result<Self, SignalError> {
        let profile = match std::env::var(PROFILE_PATH_ENV) {
            Ok(path) => {
                tracing::info!(path, "loading profile override");
                Self::from_file(Path::new(&path))?
            }
            Err(_) => Self::default(),
        };
        profile.validate()?;
        Ok(profile)
    }

    pub fn from_file(path: &Path) -> Result<Self, SignalError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SignalError::Config(format!("profile {}: {e}", path.display())))?;
        let profile: Profile = serde_json::from_str(&raw)
            .map_err(|e| SignalError::Config(format!("profile {}: {e}", path.display())))?;
        Ok(profile)
    }

    pub fn validate(&self) -> Result<(), SignalError> {
        if self.assets.is_empty() {
            return Err(SignalError::Config(
                "profile must define at least one asset".to_string(),
            ));
        }
        let total = self.weights.total();
        if (total - 1.0).abs() > 1e-6 {
            return Err(SignalError::Config(format!(
                "dimension weights must sum to 1.0, got {total}"
            )));
        }
        if self.labels.is_empty() {
            return Err(SignalError::Config("profile must define label bands".to_string()));
        }
        let mut prev = f64::INFINITY;
        for band in &self.labels {
            if band.min_score > prev {
                return Err(SignalError::Config(
                    "label bands must be sorted descending by min_score".to_string(),
                ));
            }
            prev = band.min_score;
        }
        Ok(())
    }
}

// ------------------------------------------------------------------ //
//  Weights
// ------------------------------------------------------------------ //

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Weights {
    pub whale: f64,
    pub technical: f64,
    pub derivatives: f64,
    pub narrative: f64,
    pub market: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            whale: 0.30,
            technical: 0.25,
            derivatives: 0.20,
            narrative: 0.15,
            market: 0.10,
        }
    }
}

impl Weights {
    pub fn total(&self) -> f64 {
        self.whale + self.technical + self.derivatives + self.narrative + self.market
    }
}

// ------------------------------------------------------------------ //
//  Label bands
// ------------------------------------------------------------------ //

fn default_labels() -> Vec<LabelBand> {
    let band = |min_score: f64, name: &str, direction: Direction| LabelBand {
        min_score,
        name: name.to_string(),
        direction,
    };
    vec![
        band(80.0, "STRONG BUY", Direction::Buy),
        band(65.0, "BUY", Direction::Buy),
        band(55.0, "WEAK BUY", Direction::Buy),
        band(45.0, "NEUTRAL", Direction::Neutral),
        band(35.0, "WEAK SELL", Direction::Sell),
        band(20.0, "SELL", Direction::Sell),
        band(0.0, "STRONG SELL", Direction::Sell),
    ]
}

// ------------------------------------------------------------------ //
//  Scoring rules
// ------------------------------------------------------------------ //

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringRules {
    pub whale: WhaleRules,
    pub technical: TechnicalRules,
    pub derivatives: DerivativesRules,
    pub narrative: NarrativeRules,
    pub market: MarketRules,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhaleRules {
    pub base_score: f64,
    pub min_directional_moves: u32,
    pub ratio_max_points: f64,
    pub exchange_outflow_bonus: f64,
    pub exchange_inflow_penalty: f64,
    pub wallet_accumulating_bonus: f64,
    pub wallet_reducing_penalty: f64,
    pub min_score: f64,
    pub max_score: f64,
}

impl Default for WhaleRules {
    fn default() -> Self {
        Self {
            base_score: 50.0,
            min_directional_moves: 3,
            ratio_max_points: 30.0,
            exchange_outflow_bonus: 10.0,
            exchange_inflow_penalty: -10.0,
            wallet_accumulating_bonus: 8.0,
            wallet_reducing_penalty: -8.0,
            min_score: 0.0,
            max_score: 100.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TechnicalRules {
    pub rsi: RsiRules,
    pub macd: MacdRules,
    pub ma: MaRules,
    pub trend: TrendRules,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RsiRules {
    pub oversold_below: f64,
    pub overbought_above: f64,
    pub oversold_score: f64,
    pub overbought_score: f64,
    pub neutral_min_score: f64,
    pub neutral_max_score: f64,
}

impl Default for RsiRules {
    fn default() -> Self {
        Self {
            oversold_below: 30.0,
            overbought_above: 70.0,
            oversold_score: 30.0,
            overbought_score: 10.0,
            neutral_min_score: 15.0,
            neutral_max_score: 40.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MacdRules {
    pub bullish_cross_points: f64,
    pub bearish_cross_points: f64,
}

impl Default for MacdRules {
    fn default() -> Self {
        Self {
            bullish_cross_points: 20.0,
            bearish_cross_points: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaRules {
    pub above_ma7_points: f64,
    pub below_ma7_points: f64,
    pub above_ma30_points: f64,
    pub below_ma30_points: f64,
}

impl Default for MaRules {
    fn default() -> Self {
        Self {
            above_ma7_points: 10.0,
            below_ma7_points: 0.0,
            above_ma30_points: 10.0,
            below_ma30_points: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendRules {
    pub bullish_points: f64,
    pub bearish_points: f64,
    pub neutral_points: f64,
}

impl Default for TrendRules {
    fn default() -> Self {
        Self {
            bullish_points: 20.0,
            bearish_points: 0.0,
            neutral_points: 10.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DerivativesRules {
    pub long_short: LongShortRules,
    pub funding: FundingRules,
    pub open_interest: OpenInterestRules,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LongShortRules {
    pub sweet_spot_min: f64,
    pub sweet_spot_max: f64,
    pub overcrowded_above: f64,
    pub contrarian_below: f64,
    pub sweet_spot_score: f64,
    pub overcrowded_score: f64,
    pub contrarian_score: f64,
    pub default_score: f64,
}

impl Default for LongShortRules {
    fn default() -> Self {
        Self {
            sweet_spot_min: 0.55,
            sweet_spot_max: 0.65,
            overcrowded_above: 0.70,
            contrarian_below: 0.45,
            sweet_spot_score: 40.0,
            overcrowded_score: 10.0,
            contrarian_score: 35.0,
            default_score: 25.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FundingRules {
    pub low_threshold: f64,
    pub moderate_threshold: f64,
    pub negative_score: f64,
    pub low_score: f64,
    pub moderate_score: f64,
    pub high_score: f64,
}

impl Default for FundingRules {
    fn default() -> Self {
        Self {
            low_threshold: 0.0002,
            moderate_threshold: 0.0005,
            negative_score: 35.0,
            low_score: 30.0,
            moderate_score: 15.0,
            high_score: 5.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenInterestRules {
    /// Percent change vs the previous cycle's open interest below which the
    /// reading counts as stable.
    pub delta_threshold_pct: f64,
    pub rising_score: f64,
    pub falling_score: f64,
    pub stable_score: f64,
}

impl Default for OpenInterestRules {
    fn default() -> Self {
        Self {
            delta_threshold_pct: 5.0,
            rising_score: 20.0,
            falling_score: 5.0,
            stable_score: 15.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrativeRules {
    pub volume_multiplier: f64,
    pub llm: LlmSentimentRules,
    pub community_multiplier: f64,
    pub trending_bonus: f64,
    pub influencer: InfluencerRules,
    pub multi_source: MultiSourceRules,
    pub max_score: f64,
}

impl Default for NarrativeRules {
    fn default() -> Self {
        Self {
            volume_multiplier: 40.0,
            llm: LlmSentimentRules::default(),
            community_multiplier: 10.0,
            trending_bonus: 15.0,
            influencer: InfluencerRules::default(),
            multi_source: MultiSourceRules::default(),
            max_score: 100.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSentimentRules {
    pub confidence_threshold: f64,
    pub bullish_points: f64,
    pub bearish_points: f64,
    pub neutral_points: f64,
}

impl Default for LlmSentimentRules {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.6,
            bullish_points: 15.0,
            bearish_points: -15.0,
            neutral_points: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InfluencerRules {
    pub min_mentions: u32,
    pub bonus: f64,
}

impl Default for InfluencerRules {
    fn default() -> Self {
        Self {
            min_mentions: 3,
            bonus: 10.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiSourceRules {
    pub min_sources: u32,
    pub bonus: f64,
}

impl Default for MultiSourceRules {
    fn default() -> Self {
        Self {
            min_sources: 2,
            bonus: 10.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketRules {
    pub price_change: PriceChangeRules,
    pub volume: VolumeRules,
    pub fear_greed: FearGreedRules,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceChangeRules {
    pub strong_positive_above: f64,
    pub positive_above: f64,
    pub mild_negative_above: f64,
    pub strong_positive_score: f64,
    pub positive_score: f64,
    pub mild_negative_score: f64,
    pub strong_negative_score: f64,
}

impl Default for PriceChangeRules {
    fn default() -> Self {
        Self {
            strong_positive_above: 5.0,
            positive_above: 0.0,
            mild_negative_above: -5.0,
            strong_positive_score: 40.0,
            positive_score: 30.0,
            mild_negative_score: 20.0,
            strong_negative_score: 10.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeRules {
    pub spike_multiplier_above: f64,
    pub elevated_multiplier_above: f64,
    pub spike_score: f64,
    pub elevated_score: f64,
    pub normal_score: f64,
}

impl Default for VolumeRules {
    fn default() -> Self {
        Self {
            spike_multiplier_above: 2.0,
            elevated_multiplier_above: 1.5,
            spike_score: 30.0,
            elevated_score: 20.0,
            normal_score: 10.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FearGreedRules {
    pub extreme_fear_below: f64,
    pub fear_below: f64,
    pub neutral_below: f64,
    pub greed_below: f64,
    pub extreme_fear_score: f64,
    pub fear_score: f64,
    pub neutral_score: f64,
    pub greed_score: f64,
    pub extreme_greed_score: f64,
}

impl Default for FearGreedRules {
    fn default() -> Self {
        Self {
            extreme_fear_below: 25.0,
            fear_below: 45.0,
            neutral_below: 55.0,
            greed_below: 75.0,
            extreme_fear_score: 30.0,
            fear_score: 25.0,
            neutral_score: 15.0,
            greed_score: 10.0,
            extreme_greed_score: 5.0,
        }
    }
}

// ------------------------------------------------------------------ //
//  Reweighting / conviction / momentum / portfolio
// ------------------------------------------------------------------ //

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReweightingConfig {
    pub enabled: bool,
    pub tier_multipliers: TierMultipliers,
    /// Detail-string keywords that mark full directional-move evidence.
    pub full_keywords: Vec<String>,
    /// Detail-string keywords that mark flow/wallet-only evidence.
    pub sparse_keywords: Vec<String>,
}

impl Default for ReweightingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tier_multipliers: TierMultipliers::default(),
            full_keywords: vec!["accumulate".to_string(), "sell".to_string()],
            sparse_keywords: vec!["exchange".to_string(), "wallet".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TierMultipliers {
    pub full: f64,
    pub sparse: f64,
    pub none: f64,
}

impl Default for TierMultipliers {
    fn default() -> Self {
        Self {
            full: 1.0,
            sparse: 0.5,
            none: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvictionConfig {
    pub enabled: bool,
    pub min_agreeing_dimensions: u32,
    pub boost_factor: f64,
    pub bull_above: f64,
    pub bear_below: f64,
}

impl Default for ConvictionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_agreeing_dimensions: 3,
            boost_factor: 1.25,
            bull_above: 55.0,
            bear_below: 45.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MomentumConfig {
    pub threshold: f64,
    pub improving_label: String,
    pub degrading_label: String,
    pub stable_label: String,
}

impl Default for MomentumConfig {
    fn default() -> Self {
        Self {
            threshold: 5.0,
            improving_label: "improving".to_string(),
            degrading_label: "degrading".to_string(),
            stable_label: "stable".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortfolioConfig {
    pub top_n: usize,
    pub high_conviction_threshold: f64,
    pub regime_thresholds: RegimeThresholds,
    pub risk_levels: Vec<RiskLevel>,
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self {
            top_n: 3,
            high_conviction_threshold: 70.0,
            regime_thresholds: RegimeThresholds::default(),
            risk_levels: vec![
                RiskLevel {
                    name: "low".to_string(),
                    max_avg_funding: 0.0002,
                    min_fear_greed: 40.0,
                },
                RiskLevel {
                    name: "moderate".to_string(),
                    max_avg_funding: 0.0005,
                    min_fear_greed: 25.0,
                },
                RiskLevel {
                    name: "elevated".to_string(),
                    max_avg_funding: 0.001,
                    min_fear_greed: 0.0,
                },
                RiskLevel {
                    name: "high".to_string(),
                    max_avg_funding: f64::MAX,
                    min_fear_greed: 0.0,
                },
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeThresholds {
    pub extreme_fear: f64,
    pub fear: f64,
    pub neutral: f64,
    pub greed: f64,
}

impl Default for RegimeThresholds {
    fn default() -> Self {
        Self {
            extreme_fear: 25.0,
            fear: 45.0,
            neutral: 55.0,
            greed: 75.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLevel {
    pub name: String,
    pub max_avg_funding: f64,
    pub min_fear_greed: f64,
}

// ------------------------------------------------------------------ //
//  LLM enrichment
// ------------------------------------------------------------------ //

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmInsightsConfig {
    pub enabled: bool,
    pub portfolio_summary: bool,
    pub per_asset: bool,
    pub include_previous_run: bool,
    pub model: String,
    pub max_tokens: u32,
    pub system_prompt: String,
}

impl Default for LlmInsightsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            portfolio_summary: true,
            per_asset: true,
            include_previous_run: true,
            model: "claude-opus-5".to_string(),
            max_tokens: 1024,
            system_prompt: "You are a crypto market analyst. Be concise and concrete."
                .to_string(),
        }
    }
}

// ------------------------------------------------------------------ //
//  Technical agent
// ------------------------------------------------------------------ //

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TechnicalConfig {
    pub base_url: String,
    pub klines_endpoint: String,
    pub interval: String,
    pub candle_limit: u32,
    pub symbol_map: BTreeMap<String, String>,
    pub rsi_period: usize,
    pub rsi_bullish: f64,
    pub rsi_overbought: f64,
    pub rsi_oversold: f64,
    pub ma_7d_period: usize,
    pub ma_30d_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
}

impl Default for TechnicalConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.binance.com/api/v3".to_string(),
            klines_endpoint: "/klines".to_string(),
            interval: "1d".to_string(),
            candle_limit: 50,
            symbol_map: usdt_pairs(&default_assets()),
            rsi_period: 14,
            rsi_bullish: 50.0,
            rsi_overbought: 70.0,
            rsi_oversold: 30.0,
            ma_7d_period: 7,
            ma_30d_period: 30,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
        }
    }
}

// ------------------------------------------------------------------ //
//  Derivatives agent
// ------------------------------------------------------------------ //

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DerivativesConfig {
    pub base_url: String,
    pub long_short_endpoint: String,
    pub funding_endpoint: String,
    pub open_interest_endpoint: String,
    pub long_short_period: String,
    pub futures_map: BTreeMap<String, String>,
    pub long_short_min: f64,
    pub long_short_max: f64,
    pub funding_rate_max: f64,
    pub retries: u32,
}

impl Default for DerivativesConfig {
    fn default() -> Self {
        Self {
            base_url: "https://fapi.binance.com".to_string(),
            long_short_endpoint: "/futures/data/globalLongShortAccountRatio".to_string(),
            funding_endpoint: "/fapi/v1/premiumIndex".to_string(),
            open_interest_endpoint: "/fapi/v1/openInterest".to_string(),
            long_short_period: "1h".to_string(),
            futures_map: usdt_pairs(&default_assets()),
            long_short_min: 0.55,
            long_short_max: 0.65,
            funding_rate_max: 0.0005,
            retries: 2,
        }
    }
}

// ------------------------------------------------------------------ //
//  Market agent
// ------------------------------------------------------------------ //

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    pub coingecko: CoingeckoConfig,
    pub volume: MarketVolumeConfig,
    pub breadth: BreadthConfig,
    pub categories: CategoriesConfig,
    pub global_market: GlobalMarketConfig,
    pub dexscreener: DexScreenerConfig,
    pub fear_greed: FearGreedSourceConfig,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            coingecko: CoingeckoConfig::default(),
            volume: MarketVolumeConfig::default(),
            breadth: BreadthConfig::default(),
            categories: CategoriesConfig::default(),
            global_market: GlobalMarketConfig::default(),
            dexscreener: DexScreenerConfig::default(),
            fear_greed: FearGreedSourceConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoingeckoConfig {
    pub enabled: bool,
    pub base_url: String,
    pub vs_currency: String,
    pub id_map: BTreeMap<String, String>,
}

impl Default for CoingeckoConfig {
    fn default() -> Self {
        let id_map = [
            ("BTC", "bitcoin"),
            ("ETH", "ethereum"),
            ("SOL", "solana"),
            ("BNB", "binancecoin"),
            ("XRP", "ripple"),
            ("ADA", "cardano"),
            ("AVAX", "avalanche-2"),
            ("DOT", "polkadot"),
            ("MATIC", "matic-network"),
            ("LINK", "chainlink"),
            ("UNI", "uniswap"),
            ("ATOM", "cosmos"),
            ("LTC", "litecoin"),
            ("FIL", "filecoin"),
            ("NEAR", "near"),
            ("APT", "aptos"),
            ("ARB", "arbitrum"),
            ("OP", "optimism"),
            ("INJ", "injective-protocol"),
            ("SUI", "sui"),
        ]
        .iter()
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .collect();

        Self {
            enabled: true,
            base_url: "https://api.coingecko.com/api/v3".to_string(),
            vs_currency: "usd".to_string(),
            id_map,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketVolumeConfig {
    pub enabled: bool,
    pub base_url: String,
    pub klines_endpoint: String,
    pub interval: String,
    pub lookback_days: u32,
    pub spike_threshold: f64,
    pub elevated_threshold: f64,
    pub symbol_map: BTreeMap<String, String>,
}

impl Default for MarketVolumeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://api.binance.com/api/v3".to_string(),
            klines_endpoint: "/klines".to_string(),
            interval: "1d".to_string(),
            lookback_days: 8,
            spike_threshold: 2.0,
            elevated_threshold: 1.5,
            symbol_map: usdt_pairs(&default_assets()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreadthConfig {
    pub enabled: bool,
    pub market_sample: u32,
    pub top_gainers_count: usize,
    pub top_losers_count: usize,
    pub trending_count: usize,
}

impl Default for BreadthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            market_sample: 100,
            top_gainers_count: 10,
            top_losers_count: 10,
            trending_count: 7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoriesConfig {
    pub enabled: bool,
    pub sample_size: usize,
    pub top_gainers_count: usize,
    pub top_losers_count: usize,
}

impl Default for CategoriesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_size: 15,
            top_gainers_count: 5,
            top_losers_count: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalMarketConfig {
    pub enabled: bool,
}

impl Default for GlobalMarketConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DexScreenerConfig {
    pub enabled: bool,
    pub base_url: String,
    pub queries: Vec<String>,
    pub top_pairs_count: usize,
}

impl Default for DexScreenerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "https://api.dexscreener.com/latest/dex".to_string(),
            queries: vec!["SOL".to_string(), "ETH".to_string()],
            top_pairs_count: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FearGreedSourceConfig {
    pub enabled: bool,
    pub url: String,
    pub extreme_fear_max: f64,
    pub fear_max: f64,
    pub neutral_max: f64,
    pub greed_max: f64,
}

impl Default for FearGreedSourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "https://api.alternative.me/fng/?limit=1&format=json".to_string(),
            extreme_fear_max: 25.0,
            fear_max: 45.0,
            neutral_max: 55.0,
            greed_max: 75.0,
        }
    }
}

// ------------------------------------------------------------------ //
//  Narrative agent
// ------------------------------------------------------------------ //

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrativeConfig {
    pub asset_keywords: BTreeMap<String, Vec<String>>,
    pub reddit: RedditConfig,
    pub twitter: TwitterConfig,
    pub news: NewsConfig,
    pub coingecko_trending: TrendingConfig,
    pub peak: PeakConfig,
    pub status: NarrativeStatusBands,
    pub sentiment: SentimentKeywords,
    pub llm_sentiment: LlmSentimentConfig,
}

impl Default for NarrativeConfig {
    fn default() -> Self {
        let asset_keywords = [
            ("BTC", vec!["btc", "bitcoin"]),
            ("ETH", vec!["eth", "ethereum"]),
            ("SOL", vec!["sol", "solana"]),
            ("BNB", vec!["bnb", "binance coin"]),
            ("XRP", vec!["xrp", "ripple"]),
            ("ADA", vec!["ada", "cardano"]),
            ("AVAX", vec!["avax", "avalanche"]),
            ("DOT", vec!["dot", "polkadot"]),
            ("MATIC", vec!["matic", "polygon"]),
            ("LINK", vec!["link", "chainlink"]),
            ("UNI", vec!["uni", "uniswap"]),
            ("ATOM", vec!["atom", "cosmos"]),
            ("LTC", vec!["ltc", "litecoin"]),
            ("FIL", vec!["fil", "filecoin"]),
            ("NEAR", vec!["near protocol", "near"]),
            ("APT", vec!["apt", "aptos"]),
            ("ARB", vec!["arb", "arbitrum"]),
            ("OP", vec!["optimism", "op token"]),
            ("INJ", vec!["inj", "injective"]),
            ("SUI", vec!["sui"]),
        ]
        .iter()
        .map(|(a, kws)| {
            (
                a.to_string(),
                kws.iter().map(|k| k.to_string()).collect::<Vec<_>>(),
            )
        })
        .collect();

        Self {
            asset_keywords,
            reddit: RedditConfig::default(),
            twitter: TwitterConfig::default(),
            news: NewsConfig::default(),
            coingecko_trending: TrendingConfig::default(),
            peak: PeakConfig::default(),
            status: NarrativeStatusBands::default(),
            sentiment: SentimentKeywords::default(),
            llm_sentiment: LlmSentimentConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedditConfig {
    pub enabled: bool,
    pub base_url: String,
    pub search_keywords: Vec<String>,
    pub max_items: u32,
    pub min_score: i64,
    /// Karma tiers mapping raw mentions to a weighted count, sorted descending
    /// by `min_score` at use time.
    pub weight_tiers: Vec<KarmaTier>,
    pub time_filter: String,
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://www.reddit.com".to_string(),
            search_keywords: vec![
                "crypto".to_string(),
                "bitcoin".to_string(),
                "altcoin".to_string(),
            ],
            max_items: 100,
            min_score: 5,
            weight_tiers: vec![
                KarmaTier {
                    min_score: 500,
                    weight: 5.0,
                },
                KarmaTier {
                    min_score: 100,
                    weight: 3.0,
                },
                KarmaTier {
                    min_score: 0,
                    weight: 1.0,
                },
            ],
            time_filter: "day".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KarmaTier {
    pub min_score: i64,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TwitterConfig {
    pub enabled: bool,
    pub actor_id: String,
    pub run_timeout_sec: u64,
    pub max_items: u32,
    pub min_likes: i64,
    pub weight_tiers: Vec<LikeTier>,
    pub search_queries: Vec<String>,
    pub influencer_accounts: Vec<String>,
}

impl Default for TwitterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            actor_id: "kaitoeasyapi~twitter-x-data-tweet-scraper-pay-per-result-cheapest"
                .to_string(),
            run_timeout_sec: 60,
            max_items: 20,
            min_likes: 0,
            weight_tiers: vec![
                LikeTier {
                    min_likes: 1000,
                    weight: 5.0,
                },
                LikeTier {
                    min_likes: 100,
                    weight: 2.0,
                },
                LikeTier {
                    min_likes: 0,
                    weight: 1.0,
                },
            ],
            search_queries: vec!["crypto".to_string(), "$BTC".to_string()],
            influencer_accounts: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LikeTier {
    pub min_likes: i64,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NewsConfig {
    pub enabled: bool,
    pub base_url: String,
    pub lookback_hours: i64,
    pub max_items: usize,
}

impl Default for NewsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://min-api.cryptocompare.com/data/v2/news/?lang=EN".to_string(),
            lookback_hours: 24,
            max_items: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendingConfig {
    pub enabled: bool,
    pub base_url: String,
    pub trending_boost: f64,
}

impl Default for TrendingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://api.coingecko.com/api/v3/search/trending".to_string(),
            trending_boost: 20.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeakConfig {
    /// Daily exponential decay applied to the stored peak, in percent.
    pub daily_decay_pct: f64,
    pub min_peak: f64,
}

impl Default for PeakConfig {
    fn default() -> Self {
        Self {
            daily_decay_pct: 5.0,
            min_peak: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrativeStatusBands {
    pub too_early_below: f64,
    pub peak_crowded_above: f64,
}

impl Default for NarrativeStatusBands {
    fn default() -> Self {
        Self {
            too_early_below: 0.40,
            peak_crowded_above: 0.70,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SentimentKeywords {
    pub positive: Vec<String>,
    pub negative: Vec<String>,
}

impl Default for SentimentKeywords {
    fn default() -> Self {
        Self {
            positive: ["surge", "rally", "bullish", "record", "adoption", "breakout", "upgrade"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            negative: ["crash", "hack", "bearish", "lawsuit", "exploit", "dump", "ban"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSentimentConfig {
    pub enabled: bool,
    pub model: String,
    pub max_tokens: u32,
    pub max_headlines: usize,
}

impl Default for LlmSentimentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: "claude-opus-5".to_string(),
            max_tokens: 1024,
            max_headlines: 5,
        }
    }
}

// ------------------------------------------------------------------ //
//  Whale agent
// ------------------------------------------------------------------ //

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhaleConfig {
    pub lookback_hours: i64,
    pub whale_alert: WhaleAlertConfig,
    pub etherscan: EtherscanConfig,
    pub blockchain_com: BlockchainComConfig,
    pub exchange_flow: ExchangeFlowConfig,
    pub whale_wallets: WhaleWalletsConfig,
    pub credibility: CredibilityConfig,
}

impl Default for WhaleConfig {
    fn default() -> Self {
        Self {
            lookback_hours: 24,
            whale_alert: WhaleAlertConfig::default(),
            etherscan: EtherscanConfig::default(),
            blockchain_com: BlockchainComConfig::default(),
            exchange_flow: ExchangeFlowConfig::default(),
            whale_wallets: WhaleWalletsConfig::default(),
            credibility: CredibilityConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhaleAlertConfig {
    pub enabled: bool,
    pub base_url: String,
    pub min_value_usd: u64,
    pub max_results_per_page: u32,
    pub max_pages: u32,
    pub lookback_sec: i64,
    pub rate_limit: WhaleAlertRateLimit,
}

impl Default for WhaleAlertConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://api.whale-alert.io/v1".to_string(),
            min_value_usd: 500_000,
            max_results_per_page: 100,
            max_pages: 10,
            lookback_sec: 3600,
            rate_limit: WhaleAlertRateLimit::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhaleAlertRateLimit {
    pub max_retries: u32,
    pub base_delay_sec: f64,
    pub page_delay_sec: f64,
}

impl Default for WhaleAlertRateLimit {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_sec: 2.0,
            page_delay_sec: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EtherscanConfig {
    pub enabled: bool,
    pub base_url: String,
    pub chain_id: u64,
    pub min_eth_value: f64,
    pub max_txs_per_wallet: u32,
    pub exchange_wallets: BTreeMap<String, Vec<String>>,
}

impl Default for EtherscanConfig {
    fn default() -> Self {
        let exchange_wallets = [
            (
                "binance",
                vec![
                    "0x28C6c06298d514Db089934071355E5743bf21d60",
                    "0xDFd5293D8e347dFe59E90eFd55b2956a1343963d",
                ],
            ),
            (
                "coinbase",
                vec!["0x71660c4005BA85c37ccec55d0C4493E66Fe775d3"],
            ),
        ]
        .iter()
        .map(|(name, addrs)| {
            (
                name.to_string(),
                addrs.iter().map(|a| a.to_string()).collect::<Vec<_>>(),
            )
        })
        .collect();

        Self {
            enabled: true,
            base_url: "https://api.etherscan.io/v2/api".to_string(),
            chain_id: 1,
            min_eth_value: 100.0,
            max_txs_per_wallet: 20,
            exchange_wallets,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockchainComConfig {
    pub enabled: bool,
    pub base_url: String,
    pub min_btc_value: f64,
    pub max_txs_per_wallet: u32,
    pub exchange_wallets: BTreeMap<String, Vec<String>>,
}

impl Default for BlockchainComConfig {
    fn default() -> Self {
        let exchange_wallets = [(
            "binance",
            vec!["34xp4vRoCGJym3xR7yCVPFHoCNxv4Twseo"],
        )]
        .iter()
        .map(|(name, addrs)| {
            (
                name.to_string(),
                addrs.iter().map(|a| a.to_string()).collect::<Vec<_>>(),
            )
        })
        .collect();

        Self {
            enabled: true,
            base_url: "https://blockchain.info".to_string(),
            min_btc_value: 10.0,
            max_txs_per_wallet: 10,
            exchange_wallets,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeFlowConfig {
    pub enabled: bool,
    pub track_exchanges: Vec<String>,
    pub eth_significant_change: f64,
    pub btc_significant_change: f64,
}

impl Default for ExchangeFlowConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            track_exchanges: vec!["binance".to_string(), "coinbase".to_string()],
            eth_significant_change: 1000.0,
            btc_significant_change: 100.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhaleWalletsConfig {
    pub enabled: bool,
    pub min_eth_change: f64,
    pub min_btc_change: f64,
    pub eth_wallets: BTreeMap<String, TrackedWallet>,
    pub btc_wallets: BTreeMap<String, TrackedWallet>,
}

impl Default for WhaleWalletsConfig {
    fn default() -> Self {
        let eth_wallets = [(
            "wintermute".to_string(),
            TrackedWallet {
                address: "0x4f3a120E72C76c22ae802D129F599BFDbc31cb81".to_string(),
            },
        )]
        .into_iter()
        .collect();

        Self {
            enabled: true,
            min_eth_change: 50.0,
            min_btc_change: 5.0,
            eth_wallets,
            btc_wallets: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedWallet {
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredibilityConfig {
    pub min_wallet_size_usd: f64,
}

impl Default for CredibilityConfig {
    fn default() -> Self {
        Self {
            min_wallet_size_usd: 1_000_000.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_profile_validates() {
        let profile = Profile::default();
        profile.validate().unwrap();
        assert_eq!(profile.assets.len(), 20);
        assert!((profile.weights.total() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_partial_override_keeps_defaults() {
        let profile: Profile =
            serde_json::from_str(r#"{"assets": ["BTC", "ETH"], "http_timeout_sec": 5}"#).unwrap();
        assert_eq!(profile.assets, vec!["BTC", "ETH"]);
        assert_eq!(profile.http_timeout_sec, 5);
        assert_eq!(profile.weights.whale, 0.30);
        assert_eq!(profile.labels.len(), 7);
    }

    #[test]
    fn test_unbalanced_weights_rejected() {
        let profile: Profile =
            serde_json::from_str(r#"{"weights": {"whale": 0.9, "technical": 0.9}}"#).unwrap();
        assert!(profile.validate().is_err());
    }

    #[test]
    fn test_symbol_maps_cover_all_assets() {
        let profile = Profile::default();
        for asset in &profile.assets {
            assert!(profile.technical.symbol_map.contains_key(asset));
            assert!(profile.derivatives.futures_map.contains_key(asset));
            assert!(profile.market.coingecko.id_map.contains_key(asset));
            assert!(profile.narrative.asset_keywords.contains_key(asset));
        }
    }
}

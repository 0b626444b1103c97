pub mod engine;
pub mod insight;
pub mod portfolio;
pub mod scorers;
pub mod types;

pub use engine::{
    adjust_weights, apply_conviction, momentum_label, whale_tier, FusionEngine, OI_NAMESPACE,
    SCORES_NAMESPACE,
};
pub use portfolio::build_portfolio_summary;
pub use types::{
    AssetSignal, Dimension, DimensionScore, FusionData, PortfolioSummary, TopBuy, TopSell,
    WhaleTier,
};

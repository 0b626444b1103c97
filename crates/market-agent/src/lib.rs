pub mod engine;
pub mod types;

pub use engine::MarketAgent;
pub use types::{
    Breadth, Categories, CategorySummary, CoinSummary, DexData, DexPair, FearGreedBand,
    GlobalMarket, MarketAssetData, MarketData, MarketSentiment, MarketSummary, TrendingCoin,
    VolumeStatus,
};

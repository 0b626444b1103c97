pub mod engine;
pub mod indicators;
pub mod types;

pub use engine::TechnicalAgent;
pub use types::{
    MacdStatus, RsiStatus, TechnicalAssetData, TechnicalData, TechnicalSummary, Trend,
};

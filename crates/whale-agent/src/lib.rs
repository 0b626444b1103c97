pub mod engine;
pub mod types;

pub use engine::{WhaleAgent, FLOW_NAMESPACE};
pub use types::{
    ExchangeFlow, FeedStats, FlowDirection, NetDirection, WalletSignal, WalletStatus, WhaleAction,
    WhaleData, WhaleMove, WhaleSummary,
};

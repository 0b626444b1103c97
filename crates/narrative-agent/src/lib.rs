pub mod engine;
pub mod types;

pub use engine::{NarrativeAgent, LLM_SENTIMENT_NAMESPACE, PEAKS_NAMESPACE};
pub use types::{
    LlmSentiment, NarrativeAssetData, NarrativeData, NarrativeStatus, NarrativeSummary, PeakRecord,
};

//! Best-effort LLM insight generation for the portfolio summary and the
//! top buy/sell assets. Any failure here surfaces only as an envelope error
//! entry; scores are computed before this runs and are never altered by it.

use serde_json::json;
use std::collections::BTreeSet;

use signal_core::profile::LlmInsightsConfig;
use signal_core::{LlmClient, SignalError};

use crate::types::FusionData;

pub async fn attach_insights(
    client: &LlmClient,
    cfg: &LlmInsightsConfig,
    data: &mut FusionData,
    prev: Option<&FusionData>,
) -> Result<(), SignalError> {
    let mut focus: BTreeSet<String> = BTreeSet::new();
    for buy in &data.portfolio_summary.top_buys {
        focus.insert(buy.asset.clone());
    }
    for sell in &data.portfolio_summary.top_sells {
        focus.insert(sell.asset.clone());
    }

    if cfg.portfolio_summary {
        let context = portfolio_context(data, prev, &focus, cfg.include_previous_run);
        let prompt = format!(
            "Current fusion data:\n{}\n\nGive a portfolio-level market summary: \
             the dominant signal, key cross-dimensional patterns, and 1-2 actionable \
             takeaways. Compare with the previous run if present. Max 5 sentences.",
            serde_json::to_string_pretty(&context)?
        );
        let insight = client
            .complete(&cfg.model, cfg.max_tokens, &cfg.system_prompt, &prompt)
            .await?;
        data.portfolio_summary.llm_insight = Some(insight);
    }

    if cfg.per_asset {
        // Only the top buys and sells get per-asset insights.
        for asset in &focus {
            let Some(signal) = data.signals.get(asset) else {
                continue;
            };
            let mut context = json!({
                "asset": asset,
                "current": {
                    "score": signal.composite_score,
                    "label": signal.label,
                    "dimensions": signal.dimensions,
                    "momentum": signal.momentum,
                },
            });
            if cfg.include_previous_run {
                if let Some(prev_signal) = prev.and_then(|p| p.signals.get(asset)) {
                    context["previous"] = json!({
                        "score": prev_signal.composite_score,
                        "dimensions": prev_signal.dimensions,
                    });
                }
            }

            let prompt = format!(
                "Signal data for {asset}:\n{}\n\nGive a concise insight: the dominant \
                 signal across dimensions, any notable cross-dimensional patterns, and \
                 one actionable takeaway. Compare with previous data if present. \
                 Max 3 sentences.",
                serde_json::to_string_pretty(&context)?
            );
            let insight = client
                .complete(&cfg.model, cfg.max_tokens, &cfg.system_prompt, &prompt)
                .await?;
            if let Some(signal) = data.signals.get_mut(asset) {
                signal.llm_insight = Some(insight);
            }
        }
    }

    Ok(())
}

fn portfolio_context(
    data: &FusionData,
    prev: Option<&FusionData>,
    focus: &BTreeSet<String>,
    include_previous: bool,
) -> serde_json::Value {
    let mut top_signals = serde_json::Map::new();
    let mut prev_top_signals = serde_json::Map::new();

    for asset in focus {
        if let Some(signal) = data.signals.get(asset) {
            top_signals.insert(
                asset.clone(),
                json!({
                    "score": signal.composite_score,
                    "dimensions": signal.dimensions,
                    "momentum": signal.momentum,
                }),
            );
        }
        if include_previous {
            if let Some(prev_signal) = prev.and_then(|p| p.signals.get(asset)) {
                prev_top_signals.insert(
                    asset.clone(),
                    json!({
                        "score": prev_signal.composite_score,
                        "dimensions": prev_signal.dimensions,
                    }),
                );
            }
        }
    }

    json!({
        "portfolio": data.portfolio_summary,
        "top_signals": top_signals,
        "prev_top_signals": prev_top_signals,
    })
}

//! Periodic driver: runs every collector sequentially, then fusion, then the
//! lower-cadence performance snapshot / evaluation / sentiment passes, all on
//! one background task with an interruptible sleep between cycles.

pub mod performance;
pub mod sentiment;

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use derivatives_agent::DerivativesAgent;
use market_agent::MarketAgent;
use narrative_agent::NarrativeAgent;
use signal_core::{execute, Agent, HttpJson, LlmClient, Profile};
use signal_fusion::FusionEngine;
use signal_store::Storage;
use technical_agent::TechnicalAgent;
use whale_agent::WhaleAgent;

use performance::{evaluate_due_snapshots, fetch_current_prices, record_snapshots};
use sentiment::refresh_sentiment_cache;

const SNAPSHOT_BOOKMARK_NS: &str = "perf_snapshot";
const EVAL_BOOKMARK_NS: &str = "perf_eval";
const SENTIMENT_BOOKMARK_NS: &str = "llm_sentiment_cycle";
const BOOKMARK_KEY: &str = "last_run";

/// Cadence settings, read from the environment with the documented defaults.
#[derive(Debug, Clone)]
pub struct Cadence {
    pub cycle_interval: Duration,
    pub snapshot_hours: i64,
    pub eval_hours: i64,
    pub sentiment_hours: i64,
}

impl Cadence {
    pub fn from_env() -> Self {
        Self {
            cycle_interval: Duration::from_secs(env_i64("ORCHESTRATOR_INTERVAL_SEC", 900) as u64),
            snapshot_hours: env_i64("PERF_SNAPSHOT_INTERVAL_HOURS", 12),
            eval_hours: env_i64("PERF_EVAL_INTERVAL_HOURS", 4),
            sentiment_hours: env_i64("LLM_SENTIMENT_CYCLE_HOURS", 12),
        }
    }
}

fn env_i64(name: &str, default: i64) -> i64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

pub struct Orchestrator {
    profile: Arc<Profile>,
    store: Storage,
    cadence: Cadence,
    technical: TechnicalAgent,
    derivatives: DerivativesAgent,
    market: MarketAgent,
    narrative: NarrativeAgent,
    whale: WhaleAgent,
    fusion: FusionEngine,
    http: HttpJson,
    llm: Option<LlmClient>,
}

impl Orchestrator {
    pub fn new(profile: Arc<Profile>, store: Storage, cadence: Cadence) -> Self {
        Self {
            technical: TechnicalAgent::new(profile.clone()),
            derivatives: DerivativesAgent::new(profile.clone()),
            market: MarketAgent::new(profile.clone()),
            narrative: NarrativeAgent::new(profile.clone(), store.clone()),
            whale: WhaleAgent::new(profile.clone(), store.clone()),
            fusion: FusionEngine::new(profile.clone(), store.clone()),
            http: HttpJson::new(profile.http_timeout_sec),
            llm: LlmClient::from_env(),
            profile,
            store,
            cadence,
        }
    }

    /// Background loop. The sleep between cycles is interruptible; a shutdown
    /// signal received mid-cycle lets the current agent finish and starts no
    /// new work.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            backend = self.store.backend_name(),
            interval_sec = self.cadence.cycle_interval.as_secs(),
            "orchestrator starting"
        );

        let mut run_count = 0u64;
        loop {
            run_count += 1;
            tracing::info!(run = run_count, "orchestrator cycle starting");
            self.run_cycle(&shutdown).await;

            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.cadence.cycle_interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("orchestrator stopped");
    }

    /// One full cycle: agents, fusion, then the gated lower-cadence passes.
    pub async fn run_cycle(&self, shutdown: &watch::Receiver<bool>) {
        let cycle_start = std::time::Instant::now();
        let mut ok = 0u32;
        let mut partial = 0u32;
        let mut failed = 0u32;

        macro_rules! run_agent {
            ($agent:expr) => {
                if !*shutdown.borrow() {
                    let envelope = execute(&$agent).await;
                    match envelope.status {
                        signal_core::AgentStatus::Success => ok += 1,
                        signal_core::AgentStatus::Partial => partial += 1,
                        signal_core::AgentStatus::Error => failed += 1,
                    }
                    tracing::info!(
                        agent = $agent.name(),
                        status = envelope.status.as_str(),
                        duration_ms = envelope.meta.duration_ms,
                        errors = envelope.meta.errors.len(),
                        "agent run finished"
                    );
                    self.store.save($agent.name(), &envelope).await;
                }
            };
        }

        run_agent!(self.technical);
        run_agent!(self.derivatives);
        run_agent!(self.market);
        run_agent!(self.narrative);
        run_agent!(self.whale);

        if *shutdown.borrow() {
            return;
        }

        let fusion = self.fusion.fuse().await;
        tracing::info!(
            status = fusion.status.as_str(),
            duration_ms = fusion.meta.duration_ms,
            errors = fusion.meta.errors.len(),
            "fusion finished"
        );

        self.maybe_snapshot().await;
        self.maybe_evaluate().await;
        self.maybe_refresh_sentiment().await;

        tracing::info!(
            total_sec = cycle_start.elapsed().as_secs(),
            ok,
            partial,
            failed,
            "orchestrator cycle finished"
        );
    }

    /// The kv bookmark gates cadence only; the tables stay the source of
    /// truth for what has actually been recorded.
    async fn bookmark_due(&self, namespace: &str, interval_hours: i64) -> bool {
        let now = Utc::now().timestamp() as f64;
        match self.store.load_kv(namespace, BOOKMARK_KEY).await {
            Some(last) => now - last >= (interval_hours * 3600) as f64,
            None => true,
        }
    }

    async fn advance_bookmark(&self, namespace: &str) {
        let now = Utc::now().timestamp() as f64;
        self.store.save_kv(namespace, BOOKMARK_KEY, now).await;
    }

    async fn maybe_snapshot(&self) {
        if !self.bookmark_due(SNAPSHOT_BOOKMARK_NS, self.cadence.snapshot_hours).await {
            return;
        }
        let written = record_snapshots(&self.store, &self.profile).await;
        tracing::info!(written, "performance snapshots recorded");
        self.advance_bookmark(SNAPSHOT_BOOKMARK_NS).await;
    }

    async fn maybe_evaluate(&self) {
        if !self.bookmark_due(EVAL_BOOKMARK_NS, self.cadence.eval_hours).await {
            return;
        }
        match fetch_current_prices(&self.http, &self.profile).await {
            Ok(prices) => {
                let evaluated = evaluate_due_snapshots(&self.store, &prices).await;
                tracing::info!(evaluated, "performance snapshots evaluated");
                self.advance_bookmark(EVAL_BOOKMARK_NS).await;
            }
            Err(e) => {
                // Leave the bookmark so the next cycle retries.
                tracing::warn!("price fetch for evaluation failed: {e}");
            }
        }
    }

    async fn maybe_refresh_sentiment(&self) {
        if !self.profile.narrative.llm_sentiment.enabled {
            return;
        }
        let Some(client) = &self.llm else {
            return;
        };
        if !self
            .bookmark_due(SENTIMENT_BOOKMARK_NS, self.cadence.sentiment_hours)
            .await
        {
            return;
        }
        let refreshed = refresh_sentiment_cache(&self.store, &self.profile, client).await;
        tracing::info!(refreshed, "llm sentiment cache refreshed");
        self.advance_bookmark(SENTIMENT_BOOKMARK_NS).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bookmark_gating() {
        let store = Storage::sqlite_in_memory().await.unwrap();
        let orchestrator = Orchestrator::new(
            Arc::new(Profile::default()),
            store.clone(),
            Cadence {
                cycle_interval: Duration::from_secs(900),
                snapshot_hours: 12,
                eval_hours: 4,
                sentiment_hours: 12,
            },
        );

        // No bookmark yet: due.
        assert!(orchestrator.bookmark_due(SNAPSHOT_BOOKMARK_NS, 12).await);

        // Freshly advanced: not due.
        orchestrator.advance_bookmark(SNAPSHOT_BOOKMARK_NS).await;
        assert!(!orchestrator.bookmark_due(SNAPSHOT_BOOKMARK_NS, 12).await);

        // An old bookmark is due again.
        let thirteen_hours_ago = (Utc::now().timestamp() - 13 * 3600) as f64;
        store
            .save_kv(SNAPSHOT_BOOKMARK_NS, BOOKMARK_KEY, thirteen_hours_ago)
            .await;
        assert!(orchestrator.bookmark_due(SNAPSHOT_BOOKMARK_NS, 12).await);
    }

    #[test]
    fn test_cadence_defaults() {
        let cadence = Cadence::from_env();
        assert_eq!(cadence.cycle_interval, Duration::from_secs(900));
        assert_eq!(cadence.snapshot_hours, 12);
        assert_eq!(cadence.eval_hours, 4);
        assert_eq!(cadence.sentiment_hours, 12);
    }
}

//! Read API: latest fusion signals, per-agent health, reputation stats,
//! stream history, and request analytics, served concurrently with the
//! orchestrator worker.

use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, RwLock};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use orchestrator::{Cadence, Orchestrator};
use signal_core::{Envelope, Profile};
use signal_fusion::FusionData;
use signal_store::{AccuracyStats, Storage, FUSION_STREAM};

const AGENT_STREAMS: [&str; 5] = [
    "technical_agent",
    "derivatives_agent",
    "market_agent",
    "narrative_agent",
    "whale_agent",
];

struct CachedFusion {
    envelope: Envelope<FusionData>,
    fetched_at: Instant,
}

pub struct AppState {
    store: Storage,
    profile: Arc<Profile>,
    boot_time: DateTime<Utc>,
    cache_ttl: Duration,
    // A stale read only causes an extra reload, never corruption.
    fusion_cache: RwLock<Option<CachedFusion>>,
}

type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(store: Storage, profile: Arc<Profile>, cache_ttl: Duration) -> SharedState {
        Arc::new(Self {
            store,
            profile,
            boot_time: Utc::now(),
            cache_ttl,
            fusion_cache: RwLock::new(None),
        })
    }

    /// Latest fusion envelope, served from the in-memory cache within its TTL.
    async fn latest_fusion(&self) -> Option<Envelope<FusionData>> {
        {
            let cache = self.fusion_cache.read().await;
            if let Some(entry) = cache.as_ref() {
                if entry.fetched_at.elapsed() < self.cache_ttl {
                    return Some(entry.envelope.clone());
                }
            }
        }

        let envelope: Option<Envelope<FusionData>> = self.store.load_latest(FUSION_STREAM).await;
        if let Some(envelope) = &envelope {
            let mut cache = self.fusion_cache.write().await;
            *cache = Some(CachedFusion {
                envelope: envelope.clone(),
                fetched_at: Instant::now(),
            });
        }
        envelope
    }
}

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/signal", get(signal))
        .route("/signal/:asset", get(signal_asset))
        .route("/performance/reputation", get(reputation))
        .route("/performance/:asset", get(asset_performance))
        .route("/api/history", get(history))
        .route("/analytics", get(analytics))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            track_request,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ------------------------------------------------------------------ //
//  Handlers
// ------------------------------------------------------------------ //

async fn root(State(state): State<SharedState>) -> Json<serde_json::Value> {
    Json(json!({
        "name": "Web3 Signals API",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Multi-source crypto signal intelligence",
        "endpoints": {
            "/health": "Agent status and uptime",
            "/signal": "Full fusion: portfolio summary + per-asset signals",
            "/signal/{asset}": "Single asset signal (e.g. /signal/BTC)",
            "/performance/reputation": "Aggregated signal accuracy",
            "/performance/{asset}": "Per-asset accuracy",
            "/api/history": "Paginated stream history (?agent=&limit=&offset=)",
            "/analytics": "API usage analytics (?days=N)",
        },
        "assets": state.profile.assets,
    }))
}

async fn health(State(state): State<SharedState>) -> Json<serde_json::Value> {
    let latest = state.store.load_all_latest(&AGENT_STREAMS).await;

    let mut agents = serde_json::Map::new();
    for (name, envelope) in latest {
        let entry = match envelope {
            Some(envelope) => json!({
                "status": envelope["status"],
                "last_run": envelope["timestamp"],
                "duration_ms": envelope["meta"]["duration_ms"],
                "errors": envelope["meta"]["errors"].as_array().map(|e| e.len()).unwrap_or(0),
            }),
            None => json!({"status": "no_data", "last_run": null}),
        };
        agents.insert(name, entry);
    }

    let fusion: Option<Envelope<serde_json::Value>> = state.store.load_latest(FUSION_STREAM).await;
    let fusion_status = match fusion {
        Some(envelope) => json!({
            "status": envelope.status.as_str(),
            "last_run": envelope.timestamp,
        }),
        None => json!({"status": "no_data", "last_run": null}),
    };

    Json(json!({
        "status": "healthy",
        "boot_time": state.boot_time,
        "storage_backend": state.store.backend_name(),
        "agents": agents,
        "fusion": fusion_status,
    }))
}

async fn signal(State(state): State<SharedState>) -> Response {
    match state.latest_fusion().await {
        Some(envelope) => Json(envelope).into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "no_data", "message": "no fusion run recorded yet"})),
        )
            .into_response(),
    }
}

async fn signal_asset(
    State(state): State<SharedState>,
    Path(asset): Path<String>,
) -> Response {
    let asset = asset.to_uppercase();
    let Some(envelope) = state.latest_fusion().await else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "no_data", "message": "no fusion run recorded yet"})),
        )
            .into_response();
    };

    let Some(signal) = envelope.data.signals.get(&asset) else {
        let valid: Vec<&String> = envelope.data.signals.keys().collect();
        return (
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": format!("asset '{asset}' not found"),
                "valid_assets": valid,
            })),
        )
            .into_response();
    };

    let portfolio = &envelope.data.portfolio_summary;
    Json(json!({
        "asset": asset,
        "timestamp": envelope.timestamp,
        "signal": signal,
        "market_context": {
            "regime": portfolio.market_regime,
            "risk_level": portfolio.risk_level,
            "signal_momentum": portfolio.signal_momentum,
        },
    }))
    .into_response()
}

async fn reputation(State(state): State<SharedState>) -> Json<serde_json::Value> {
    let stats = state.store.load_accuracy_stats(30).await;
    let snapshots = state.store.count_snapshots(30).await;
    Json(reputation_payload(&stats, snapshots))
}

async fn asset_performance(
    State(state): State<SharedState>,
    Path(asset): Path<String>,
) -> Response {
    let asset = asset.to_uppercase();
    let stats = state.store.load_accuracy_stats(30).await;

    match stats.by_asset.get(&asset) {
        Some(accuracy) => Json(json!({
            "asset": asset,
            "accuracy_30d": accuracy,
            "last_updated": Utc::now(),
        }))
        .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("no evaluated signals for '{asset}'")})),
        )
            .into_response(),
    }
}

#[derive(Deserialize)]
struct HistoryQuery {
    agent: String,
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

fn default_limit() -> i64 {
    50
}

async fn history(
    State(state): State<SharedState>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    if !AGENT_STREAMS.contains(&query.agent.as_str()) && query.agent != FUSION_STREAM {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": format!("unknown stream '{}'", query.agent),
                "valid_streams": AGENT_STREAMS
                    .iter()
                    .chain(std::iter::once(&FUSION_STREAM))
                    .collect::<Vec<_>>(),
            })),
        )
            .into_response();
    }

    let limit = query.limit.clamp(1, 200);
    let offset = query.offset.max(0);
    let rows = state.store.load_history(&query.agent, limit, offset).await;
    let total = state.store.count_rows(&query.agent).await;

    Json(json!({
        "agent": query.agent,
        "total": total,
        "limit": limit,
        "offset": offset,
        "rows": rows,
    }))
    .into_response()
}

#[derive(Deserialize)]
struct AnalyticsQuery {
    #[serde(default = "default_days")]
    days: i64,
}

fn default_days() -> i64 {
    7
}

async fn analytics(
    State(state): State<SharedState>,
    Query(query): Query<AnalyticsQuery>,
) -> Json<serde_json::Value> {
    let days = query.days.clamp(1, 90);
    let analytics = state.store.load_api_analytics(days).await;
    Json(json!({"days": days, "analytics": analytics}))
}

/// Reputation response shaping: overall hit rate plus the per-timeframe and
/// per-asset reductions.
fn reputation_payload(stats: &AccuracyStats, snapshots_30d: i64) -> serde_json::Value {
    let accuracy_30d = if stats.total > 0 {
        (stats.hits as f64 / stats.total as f64 * 1000.0).round() / 10.0
    } else {
        0.0
    };

    json!({
        "reputation_score": accuracy_30d.round() as i64,
        "accuracy_30d": accuracy_30d,
        "signals_evaluated": stats.total,
        "signals_correct": stats.hits,
        "by_timeframe": stats.by_timeframe,
        "by_asset": stats.by_asset,
        "snapshots_collected_30d": snapshots_30d,
        "methodology": "Signals are snapshotted twice daily and scored against \
realized price moves over 24h, 48h, and 7d windows; bullish requires a rise, \
bearish a fall, neutral a move within 2%.",
        "last_updated": Utc::now(),
    })
}

// ------------------------------------------------------------------ //
//  Request logging middleware
// ------------------------------------------------------------------ //

async fn track_request(
    State(state): State<SharedState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let endpoint = request.uri().path().to_string();
    let method = request.method().to_string();
    let user_agent = request
        .headers()
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let response = next.run(request).await;

    let status = response.status().as_u16() as i64;
    let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
    let store = state.store.clone();
    let client_ip = addr.ip().to_string();

    // Fire-and-forget: analytics must never slow a response down.
    tokio::spawn(async move {
        store
            .save_api_request(&endpoint, &method, &user_agent, status, duration_ms, &client_ip)
            .await;
    });

    response
}

// ------------------------------------------------------------------ //
//  Process entry
// ------------------------------------------------------------------ //

/// Start the store, the orchestrator worker, and the HTTP server; block until
/// shutdown.
pub async fn run_server() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let profile = Arc::new(Profile::load()?);
    let store = Storage::connect().await?;

    let cache_ttl = Duration::from_secs(
        std::env::var("CACHE_TTL_SEC")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(300),
    );
    let state = AppState::new(store.clone(), profile.clone(), cache_ttl);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let orchestrator = Orchestrator::new(profile, store, Cadence::from_env());
    let worker = tokio::spawn(orchestrator.run(shutdown_rx));

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "api server listening");

    let app = build_router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
    })
    .await?;

    // Stop the orchestrator: finish the current agent call, no new work,
    // bounded join window.
    let _ = shutdown_tx.send(true);
    if tokio::time::timeout(Duration::from_secs(5), worker).await.is_err() {
        tracing::warn!("orchestrator did not stop within 5s");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use signal_store::TimeframeStats;

    #[test]
    fn test_reputation_payload_reduction() {
        let mut stats = AccuracyStats {
            total: 16,
            hits: 10,
            ..Default::default()
        };
        stats.by_timeframe.insert(
            "24h".to_string(),
            TimeframeStats {
                accuracy: 70.0,
                hits: 7,
                total: 10,
            },
        );
        stats.by_timeframe.insert(
            "48h".to_string(),
            TimeframeStats {
                accuracy: 50.0,
                hits: 2,
                total: 4,
            },
        );
        stats.by_timeframe.insert(
            "7d".to_string(),
            TimeframeStats {
                accuracy: 50.0,
                hits: 1,
                total: 2,
            },
        );

        let payload = reputation_payload(&stats, 16);
        assert_eq!(payload["accuracy_30d"], 62.5);
        assert_eq!(payload["reputation_score"], 63);
        assert_eq!(payload["signals_evaluated"], 16);
        assert_eq!(payload["signals_correct"], 10);
        assert_eq!(payload["by_timeframe"]["24h"]["accuracy"], 70.0);
        assert_eq!(payload["snapshots_collected_30d"], 16);
    }

    #[test]
    fn test_reputation_payload_empty() {
        let payload = reputation_payload(&AccuracyStats::default(), 0);
        assert_eq!(payload["accuracy_30d"], 0.0);
        assert_eq!(payload["reputation_score"], 0);
    }

    #[tokio::test]
    async fn test_fusion_cache_serves_within_ttl() {
        let store = Storage::sqlite_in_memory().await.unwrap();
        let profile = Arc::new(Profile::default());
        let state = AppState::new(store.clone(), profile.clone(), Duration::from_secs(300));

        assert!(state.latest_fusion().await.is_none());

        // Run fusion once so a stored envelope exists.
        let engine = signal_fusion::FusionEngine::new(profile, store.clone());
        let envelope = engine.fuse().await;

        let served = state.latest_fusion().await.unwrap();
        assert_eq!(served.timestamp, envelope.timestamp);

        // A newer envelope is hidden until the TTL lapses.
        let _second = engine.fuse().await;
        let cached = state.latest_fusion().await.unwrap();
        assert_eq!(cached.timestamp, envelope.timestamp);
    }
}

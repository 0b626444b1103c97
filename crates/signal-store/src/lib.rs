//! Dual-backend snapshot store: Postgres when `DATABASE_URL` is set, an
//! embedded SQLite file otherwise. Same public API regardless of backend.
//!
//! Streams are append-only; "update" exists only for the evaluation flags on
//! performance snapshot rows. Reads degrade to `None`/empty on failure and
//! writes log instead of surfacing, so callers never have to handle store
//! errors in steady state.

use chrono::{Duration, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{PgPool, Row, SqlitePool};

use signal_core::SignalError;

mod analytics;
mod performance;

pub use analytics::{ApiAnalytics, UserAgentCount};
pub use performance::{AccuracyStats, SnapshotRow, TimeframeStats};

/// Stream name used for fusion envelopes.
pub const FUSION_STREAM: &str = "signal_fusion";

#[derive(Clone)]
enum Backend {
    Sqlite(SqlitePool),
    Postgres(PgPool),
}

#[derive(Clone)]
pub struct Storage {
    backend: Backend,
}

/// One page entry of a stream's history.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HistoryRow {
    pub id: i64,
    pub timestamp: String,
    pub data: serde_json::Value,
}

pub(crate) fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn iso_ago_days(days: i64) -> String {
    (Utc::now() - Duration::days(days)).to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// RFC-3339 timestamp `hours` in the past, in the store's canonical format.
pub fn iso_ago_hours(hours: i64) -> String {
    (Utc::now() - Duration::hours(hours)).to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn sanitize(name: &str) -> Option<String> {
    let safe: String = name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if safe.chars().all(|c| c == '_') || safe.is_empty() {
        None
    } else {
        Some(safe)
    }
}

fn stream_table(name: &str) -> Option<String> {
    sanitize(name).map(|s| format!("agent_{s}"))
}

fn kv_table(namespace: &str) -> Option<String> {
    sanitize(namespace).map(|s| format!("kv_{s}"))
}

fn kvj_table(namespace: &str) -> Option<String> {
    sanitize(namespace).map(|s| format!("kvj_{s}"))
}

impl Storage {
    /// Connect per environment: `DATABASE_URL` selects Postgres; otherwise the
    /// embedded SQLite file at `SIGNALS_DB_PATH` (default `signals.db`).
    pub async fn connect() -> Result<Self, SignalError> {
        match std::env::var("DATABASE_URL") {
            Ok(url) => Self::connect_postgres(&url).await,
            Err(_) => {
                let path = std::env::var("SIGNALS_DB_PATH")
                    .unwrap_or_else(|_| "signals.db".to_string());
                Self::connect_sqlite(&path).await
            }
        }
    }

    pub async fn connect_postgres(url: &str) -> Result<Self, SignalError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await
            .map_err(|e| SignalError::Storage(format!("postgres connect: {e}")))?;
        Ok(Self {
            backend: Backend::Postgres(pool),
        })
    }

    pub async fn connect_sqlite(path: &str) -> Result<Self, SignalError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| SignalError::Storage(format!("sqlite connect: {e}")))?;
        Ok(Self {
            backend: Backend::Sqlite(pool),
        })
    }

    /// In-memory SQLite store, used by tests.
    pub async fn sqlite_in_memory() -> Result<Self, SignalError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| SignalError::Storage(format!("sqlite memory: {e}")))?;
        Ok(Self {
            backend: Backend::Sqlite(pool),
        })
    }

    pub fn backend_name(&self) -> &'static str {
        match &self.backend {
            Backend::Sqlite(_) => "sqlite",
            Backend::Postgres(_) => "postgres",
        }
    }

    pub(crate) fn sqlite(&self) -> Option<&SqlitePool> {
        match &self.backend {
            Backend::Sqlite(pool) => Some(pool),
            Backend::Postgres(_) => None,
        }
    }

    pub(crate) fn postgres(&self) -> Option<&PgPool> {
        match &self.backend {
            Backend::Postgres(pool) => Some(pool),
            Backend::Sqlite(_) => None,
        }
    }

    // ------------------------------------------------------------------ //
    //  Envelope streams
    // ------------------------------------------------------------------ //

    /// Append an envelope to a logical stream. The envelope's own `timestamp`
    /// field (when present) is preserved as the row timestamp.
    pub async fn save<T: Serialize>(&self, name: &str, envelope: &T) {
        if let Err(e) = self.try_save(name, envelope).await {
            tracing::warn!(stream = name, "store save failed: {e}");
        }
    }

    async fn try_save<T: Serialize>(&self, name: &str, envelope: &T) -> Result<(), SignalError> {
        let table = stream_table(name)
            .ok_or_else(|| SignalError::Storage(format!("bad stream name {name:?}")))?;

        let value = serde_json::to_value(envelope)?;
        let ts = value
            .get("timestamp")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(now_iso);
        let payload = serde_json::to_string(&value)?;

        match &self.backend {
            Backend::Sqlite(pool) => {
                sqlx::query(&format!(
                    "CREATE TABLE IF NOT EXISTS {table} ( \
                       id INTEGER PRIMARY KEY AUTOINCREMENT, \
                       timestamp TEXT NOT NULL, \
                       data_json TEXT NOT NULL \
                     )"
                ))
                .execute(pool)
                .await
                .map_err(storage_err)?;
                sqlx::query(&format!(
                    "CREATE INDEX IF NOT EXISTS idx_{table}_ts ON {table} (timestamp)"
                ))
                .execute(pool)
                .await
                .map_err(storage_err)?;
                sqlx::query(&format!(
                    "INSERT INTO {table} (timestamp, data_json) VALUES (?, ?)"
                ))
                .bind(&ts)
                .bind(&payload)
                .execute(pool)
                .await
                .map_err(storage_err)?;
            }
            Backend::Postgres(pool) => {
                sqlx::query(&format!(
                    "CREATE TABLE IF NOT EXISTS {table} ( \
                       id BIGSERIAL PRIMARY KEY, \
                       timestamp TEXT NOT NULL, \
                       data_json TEXT NOT NULL \
                     )"
                ))
                .execute(pool)
                .await
                .map_err(storage_err)?;
                sqlx::query(&format!(
                    "CREATE INDEX IF NOT EXISTS idx_{table}_ts ON {table} (timestamp)"
                ))
                .execute(pool)
                .await
                .map_err(storage_err)?;
                sqlx::query(&format!(
                    "INSERT INTO {table} (timestamp, data_json) VALUES ($1, $2)"
                ))
                .bind(&ts)
                .bind(&payload)
                .execute(pool)
                .await
                .map_err(storage_err)?;
            }
        }
        Ok(())
    }

    /// Newest envelope of a stream, or `None`.
    pub async fn load_latest<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let table = stream_table(name)?;
        let sql =
            format!("SELECT data_json FROM {table} ORDER BY timestamp DESC, id DESC LIMIT 1");

        let raw: Option<String> = match &self.backend {
            Backend::Sqlite(pool) => sqlx::query(&sql)
                .fetch_optional(pool)
                .await
                .ok()
                .flatten()
                .and_then(|row| row.try_get::<String, _>(0).ok()),
            Backend::Postgres(pool) => sqlx::query(&sql)
                .fetch_optional(pool)
                .await
                .ok()
                .flatten()
                .and_then(|row| row.try_get::<String, _>(0).ok()),
        };

        raw.and_then(|json| serde_json::from_str(&json).ok())
    }

    /// Envelopes with `timestamp >= now - days`, newest first.
    pub async fn load_recent<T: DeserializeOwned>(&self, name: &str, days: i64) -> Vec<T> {
        let Some(table) = stream_table(name) else {
            return vec![];
        };
        let since = iso_ago_days(days);

        let rows: Vec<String> = match &self.backend {
            Backend::Sqlite(pool) => {
                let sql = format!(
                    "SELECT data_json FROM {table} WHERE timestamp >= ? \
                     ORDER BY timestamp DESC, id DESC"
                );
                match sqlx::query(&sql).bind(&since).fetch_all(pool).await {
                    Ok(rows) => rows
                        .iter()
                        .filter_map(|r| r.try_get::<String, _>(0).ok())
                        .collect(),
                    Err(_) => vec![],
                }
            }
            Backend::Postgres(pool) => {
                let sql = format!(
                    "SELECT data_json FROM {table} WHERE timestamp >= $1 \
                     ORDER BY timestamp DESC, id DESC"
                );
                match sqlx::query(&sql).bind(&since).fetch_all(pool).await {
                    Ok(rows) => rows
                        .iter()
                        .filter_map(|r| r.try_get::<String, _>(0).ok())
                        .collect(),
                    Err(_) => vec![],
                }
            }
        };

        rows.iter()
            .filter_map(|json| serde_json::from_str(json).ok())
            .collect()
    }

    /// One page of a stream's history, newest first.
    pub async fn load_history(&self, name: &str, limit: i64, offset: i64) -> Vec<HistoryRow> {
        let Some(table) = stream_table(name) else {
            return vec![];
        };

        let rows = match &self.backend {
            Backend::Sqlite(pool) => {
                let sql = format!(
                    "SELECT id, timestamp, data_json FROM {table} \
                     ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?"
                );
                sqlx::query(&sql)
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(pool)
                    .await
                    .unwrap_or_default()
                    .iter()
                    .filter_map(|r| {
                        Some(HistoryRow {
                            id: r.try_get::<i64, _>(0).ok()?,
                            timestamp: r.try_get::<String, _>(1).ok()?,
                            data: serde_json::from_str(&r.try_get::<String, _>(2).ok()?).ok()?,
                        })
                    })
                    .collect()
            }
            Backend::Postgres(pool) => {
                let sql = format!(
                    "SELECT id, timestamp, data_json FROM {table} \
                     ORDER BY timestamp DESC, id DESC LIMIT $1 OFFSET $2"
                );
                sqlx::query(&sql)
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(pool)
                    .await
                    .unwrap_or_default()
                    .iter()
                    .filter_map(|r| {
                        Some(HistoryRow {
                            id: r.try_get::<i64, _>(0).ok()?,
                            timestamp: r.try_get::<String, _>(1).ok()?,
                            data: serde_json::from_str(&r.try_get::<String, _>(2).ok()?).ok()?,
                        })
                    })
                    .collect()
            }
        };
        rows
    }

    /// Latest raw envelope of each named stream, keyed by name.
    pub async fn load_all_latest(
        &self,
        names: &[&str],
    ) -> std::collections::BTreeMap<String, Option<serde_json::Value>> {
        let mut out = std::collections::BTreeMap::new();
        for name in names {
            out.insert(name.to_string(), self.load_latest(name).await);
        }
        out
    }

    /// Total rows in a stream.
    pub async fn count_rows(&self, name: &str) -> i64 {
        let Some(table) = stream_table(name) else {
            return 0;
        };
        let sql = format!("SELECT COUNT(*) FROM {table}");
        match &self.backend {
            Backend::Sqlite(pool) => sqlx::query(&sql)
                .fetch_one(pool)
                .await
                .ok()
                .and_then(|r| r.try_get::<i64, _>(0).ok())
                .unwrap_or(0),
            Backend::Postgres(pool) => sqlx::query(&sql)
                .fetch_one(pool)
                .await
                .ok()
                .and_then(|r| r.try_get::<i64, _>(0).ok())
                .unwrap_or(0),
        }
    }

    // ------------------------------------------------------------------ //
    //  Key-value store (balance snapshots, fusion scores, bookmarks)
    // ------------------------------------------------------------------ //

    /// Append a versioned numeric value; reads return the newest.
    pub async fn save_kv(&self, namespace: &str, key: &str, value: f64) {
        if let Err(e) = self.try_save_kv(namespace, key, value).await {
            tracing::warn!(namespace, key, "store kv save failed: {e}");
        }
    }

    async fn try_save_kv(&self, namespace: &str, key: &str, value: f64) -> Result<(), SignalError> {
        let table = kv_table(namespace)
            .ok_or_else(|| SignalError::Storage(format!("bad kv namespace {namespace:?}")))?;
        let now = now_iso();

        match &self.backend {
            Backend::Sqlite(pool) => {
                sqlx::query(&format!(
                    "CREATE TABLE IF NOT EXISTS {table} ( \
                       id INTEGER PRIMARY KEY AUTOINCREMENT, \
                       key TEXT NOT NULL, \
                       value REAL NOT NULL, \
                       timestamp TEXT NOT NULL \
                     )"
                ))
                .execute(pool)
                .await
                .map_err(storage_err)?;
                sqlx::query(&format!(
                    "INSERT INTO {table} (key, value, timestamp) VALUES (?, ?, ?)"
                ))
                .bind(key)
                .bind(value)
                .bind(&now)
                .execute(pool)
                .await
                .map_err(storage_err)?;
            }
            Backend::Postgres(pool) => {
                sqlx::query(&format!(
                    "CREATE TABLE IF NOT EXISTS {table} ( \
                       id BIGSERIAL PRIMARY KEY, \
                       key TEXT NOT NULL, \
                       value DOUBLE PRECISION NOT NULL, \
                       timestamp TEXT NOT NULL \
                     )"
                ))
                .execute(pool)
                .await
                .map_err(storage_err)?;
                sqlx::query(&format!(
                    "INSERT INTO {table} (key, value, timestamp) VALUES ($1, $2, $3)"
                ))
                .bind(key)
                .bind(value)
                .bind(&now)
                .execute(pool)
                .await
                .map_err(storage_err)?;
            }
        }
        Ok(())
    }

    /// Newest value for a key, or `None`.
    pub async fn load_kv(&self, namespace: &str, key: &str) -> Option<f64> {
        let table = kv_table(namespace)?;
        match &self.backend {
            Backend::Sqlite(pool) => {
                let sql =
                    format!("SELECT value FROM {table} WHERE key = ? ORDER BY id DESC LIMIT 1");
                sqlx::query(&sql)
                    .bind(key)
                    .fetch_optional(pool)
                    .await
                    .ok()
                    .flatten()
                    .and_then(|r| r.try_get::<f64, _>(0).ok())
            }
            Backend::Postgres(pool) => {
                let sql =
                    format!("SELECT value FROM {table} WHERE key = $1 ORDER BY id DESC LIMIT 1");
                sqlx::query(&sql)
                    .bind(key)
                    .fetch_optional(pool)
                    .await
                    .ok()
                    .flatten()
                    .and_then(|r| r.try_get::<f64, _>(0).ok())
            }
        }
    }

    /// Append a versioned JSON blob; reads return the newest.
    pub async fn save_kv_json<T: Serialize>(&self, namespace: &str, key: &str, value: &T) {
        if let Err(e) = self.try_save_kv_json(namespace, key, value).await {
            tracing::warn!(namespace, key, "store kv json save failed: {e}");
        }
    }

    async fn try_save_kv_json<T: Serialize>(
        &self,
        namespace: &str,
        key: &str,
        value: &T,
    ) -> Result<(), SignalError> {
        let table = kvj_table(namespace)
            .ok_or_else(|| SignalError::Storage(format!("bad kv namespace {namespace:?}")))?;
        let now = now_iso();
        let payload = serde_json::to_string(value)?;

        match &self.backend {
            Backend::Sqlite(pool) => {
                sqlx::query(&format!(
                    "CREATE TABLE IF NOT EXISTS {table} ( \
                       id INTEGER PRIMARY KEY AUTOINCREMENT, \
                       key TEXT NOT NULL, \
                       value_json TEXT NOT NULL, \
                       timestamp TEXT NOT NULL \
                     )"
                ))
                .execute(pool)
                .await
                .map_err(storage_err)?;
                sqlx::query(&format!(
                    "INSERT INTO {table} (key, value_json, timestamp) VALUES (?, ?, ?)"
                ))
                .bind(key)
                .bind(&payload)
                .bind(&now)
                .execute(pool)
                .await
                .map_err(storage_err)?;
            }
            Backend::Postgres(pool) => {
                sqlx::query(&format!(
                    "CREATE TABLE IF NOT EXISTS {table} ( \
                       id BIGSERIAL PRIMARY KEY, \
                       key TEXT NOT NULL, \
                       value_json TEXT NOT NULL, \
                       timestamp TEXT NOT NULL \
                     )"
                ))
                .execute(pool)
                .await
                .map_err(storage_err)?;
                sqlx::query(&format!(
                    "INSERT INTO {table} (key, value_json, timestamp) VALUES ($1, $2, $3)"
                ))
                .bind(key)
                .bind(&payload)
                .bind(&now)
                .execute(pool)
                .await
                .map_err(storage_err)?;
            }
        }
        Ok(())
    }

    /// Newest JSON value for a key, or `None`.
    pub async fn load_kv_json<T: DeserializeOwned>(&self, namespace: &str, key: &str) -> Option<T> {
        let table = kvj_table(namespace)?;
        let raw: Option<String> = match &self.backend {
            Backend::Sqlite(pool) => {
                let sql = format!(
                    "SELECT value_json FROM {table} WHERE key = ? ORDER BY id DESC LIMIT 1"
                );
                sqlx::query(&sql)
                    .bind(key)
                    .fetch_optional(pool)
                    .await
                    .ok()
                    .flatten()
                    .and_then(|r| r.try_get::<String, _>(0).ok())
            }
            Backend::Postgres(pool) => {
                let sql = format!(
                    "SELECT value_json FROM {table} WHERE key = $1 ORDER BY id DESC LIMIT 1"
                );
                sqlx::query(&sql)
                    .bind(key)
                    .fetch_optional(pool)
                    .await
                    .ok()
                    .flatten()
                    .and_then(|r| r.try_get::<String, _>(0).ok())
            }
        };
        raw.and_then(|json| serde_json::from_str(&json).ok())
    }
}

pub(crate) fn storage_err(e: sqlx::Error) -> SignalError {
    SignalError::Storage(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Blob {
        timestamp: String,
        value: u32,
    }

    #[tokio::test]
    async fn test_stream_append_and_latest() {
        let store = Storage::sqlite_in_memory().await.unwrap();

        assert!(store.load_latest::<Blob>("technical_agent").await.is_none());

        store
            .save(
                "technical_agent",
                &Blob {
                    timestamp: "2026-01-01T00:00:00.000000Z".to_string(),
                    value: 1,
                },
            )
            .await;
        store
            .save(
                "technical_agent",
                &Blob {
                    timestamp: "2026-01-02T00:00:00.000000Z".to_string(),
                    value: 2,
                },
            )
            .await;

        let latest: Blob = store.load_latest("technical_agent").await.unwrap();
        assert_eq!(latest.value, 2);
        assert_eq!(store.count_rows("technical_agent").await, 2);
    }

    #[tokio::test]
    async fn test_load_recent_filters_by_age() {
        let store = Storage::sqlite_in_memory().await.unwrap();

        store
            .save(
                "market_agent",
                &Blob {
                    timestamp: crate::iso_ago_hours(26),
                    value: 1,
                },
            )
            .await;
        store
            .save(
                "market_agent",
                &Blob {
                    timestamp: crate::iso_ago_hours(1),
                    value: 2,
                },
            )
            .await;

        let recent: Vec<Blob> = store.load_recent("market_agent", 1).await;
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].value, 2);

        let both: Vec<Blob> = store.load_recent("market_agent", 7).await;
        assert_eq!(both.len(), 2);
        // Newest first.
        assert_eq!(both[0].value, 2);
    }

    #[tokio::test]
    async fn test_history_pagination_newest_first() {
        let store = Storage::sqlite_in_memory().await.unwrap();
        for i in 0..5u32 {
            store
                .save(
                    "whale_agent",
                    &Blob {
                        timestamp: format!("2026-01-0{}T00:00:00.000000Z", i + 1),
                        value: i,
                    },
                )
                .await;
        }

        let page = store.load_history("whale_agent", 2, 1).await;
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].data["value"], 3);
        assert_eq!(page[1].data["value"], 2);
    }

    #[tokio::test]
    async fn test_kv_latest_wins() {
        let store = Storage::sqlite_in_memory().await.unwrap();
        assert!(store.load_kv("fusion_scores", "BTC").await.is_none());

        store.save_kv("fusion_scores", "BTC", 60.0).await;
        store.save_kv("fusion_scores", "BTC", 66.2).await;
        store.save_kv("fusion_scores", "ETH", 41.0).await;

        assert_eq!(store.load_kv("fusion_scores", "BTC").await, Some(66.2));
        assert_eq!(store.load_kv("fusion_scores", "ETH").await, Some(41.0));
    }

    #[tokio::test]
    async fn test_kv_json_round_trip() {
        let store = Storage::sqlite_in_memory().await.unwrap();
        let blob = serde_json::json!({"sentiment": "bullish", "confidence": 0.8});
        store.save_kv_json("llm_sentiment", "BTC", &blob).await;

        let back: serde_json::Value = store.load_kv_json("llm_sentiment", "BTC").await.unwrap();
        assert_eq!(back, blob);
    }

    #[tokio::test]
    async fn test_reads_degrade_on_missing_tables() {
        let store = Storage::sqlite_in_memory().await.unwrap();
        assert!(store.load_latest::<Blob>("never_saved").await.is_none());
        assert!(store.load_recent::<Blob>("never_saved", 7).await.is_empty());
        assert!(store.load_history("never_saved", 10, 0).await.is_empty());
        assert_eq!(store.count_rows("never_saved").await, 0);
    }
}

//! Performance snapshot and accuracy tables.
//!
//! A snapshot records the composite signal and price for one asset at
//! snapshot cadence; accuracy rows record how the signal fared over the 24h /
//! 48h / 7d windows. The `evaluated_*` flags on snapshots are the only
//! mutable fields in the whole store, flipped in the same call that inserts
//! the matching accuracy row.

use sqlx::Row;
use std::collections::BTreeMap;

use crate::{iso_ago_days, iso_ago_hours, now_iso, storage_err, Storage};
use signal_core::SignalError;

const SNAP_TABLE: &str = "performance_snapshots";
const ACC_TABLE: &str = "performance_accuracy";

/// An unevaluated snapshot row, as returned by [`Storage::load_unevaluated_snapshots`].
#[derive(Debug, Clone)]
pub struct SnapshotRow {
    pub id: i64,
    pub timestamp: String,
    pub asset: String,
    pub signal_score: f64,
    pub signal_direction: String,
    pub price_at_signal: f64,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct TimeframeStats {
    pub accuracy: f64,
    pub hits: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct AccuracyStats {
    pub total: i64,
    pub hits: i64,
    pub by_timeframe: BTreeMap<String, TimeframeStats>,
    pub by_asset: BTreeMap<String, f64>,
}

fn evaluated_column(window_hours: i64) -> &'static str {
    match window_hours {
        24 => "evaluated_24h",
        48 => "evaluated_48h",
        _ => "evaluated_7d",
    }
}

fn timeframe_label(window_hours: i64) -> String {
    if window_hours == 168 {
        "7d".to_string()
    } else {
        format!("{window_hours}h")
    }
}

impl Storage {
    async fn ensure_performance_tables(&self) -> Result<(), SignalError> {
        if let Some(pool) = self.sqlite() {
            sqlx::query(&format!(
                "CREATE TABLE IF NOT EXISTS {SNAP_TABLE} ( \
                   id INTEGER PRIMARY KEY AUTOINCREMENT, \
                   timestamp TEXT NOT NULL, \
                   asset TEXT NOT NULL, \
                   signal_score REAL NOT NULL, \
                   signal_direction TEXT NOT NULL, \
                   price_at_signal REAL NOT NULL, \
                   sources_count INTEGER NOT NULL, \
                   detail TEXT, \
                   evaluated_24h INTEGER DEFAULT 0, \
                   evaluated_48h INTEGER DEFAULT 0, \
                   evaluated_7d INTEGER DEFAULT 0 \
                 )"
            ))
            .execute(pool)
            .await
            .map_err(storage_err)?;
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{SNAP_TABLE}_ts ON {SNAP_TABLE} (timestamp)"
            ))
            .execute(pool)
            .await
            .map_err(storage_err)?;
            sqlx::query(&format!(
                "CREATE TABLE IF NOT EXISTS {ACC_TABLE} ( \
                   id INTEGER PRIMARY KEY AUTOINCREMENT, \
                   snapshot_id INTEGER NOT NULL, \
                   window_hours INTEGER NOT NULL, \
                   price_at_window REAL NOT NULL, \
                   direction_correct INTEGER NOT NULL, \
                   evaluated_at TEXT NOT NULL \
                 )"
            ))
            .execute(pool)
            .await
            .map_err(storage_err)?;
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{ACC_TABLE}_snap ON {ACC_TABLE} (snapshot_id)"
            ))
            .execute(pool)
            .await
            .map_err(storage_err)?;
        } else if let Some(pool) = self.postgres() {
            sqlx::query(&format!(
                "CREATE TABLE IF NOT EXISTS {SNAP_TABLE} ( \
                   id BIGSERIAL PRIMARY KEY, \
                   timestamp TEXT NOT NULL, \
                   asset TEXT NOT NULL, \
                   signal_score DOUBLE PRECISION NOT NULL, \
                   signal_direction TEXT NOT NULL, \
                   price_at_signal DOUBLE PRECISION NOT NULL, \
                   sources_count INTEGER NOT NULL, \
                   detail TEXT, \
                   evaluated_24h BOOLEAN DEFAULT FALSE, \
                   evaluated_48h BOOLEAN DEFAULT FALSE, \
                   evaluated_7d BOOLEAN DEFAULT FALSE \
                 )"
            ))
            .execute(pool)
            .await
            .map_err(storage_err)?;
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{SNAP_TABLE}_ts ON {SNAP_TABLE} (timestamp)"
            ))
            .execute(pool)
            .await
            .map_err(storage_err)?;
            sqlx::query(&format!(
                "CREATE TABLE IF NOT EXISTS {ACC_TABLE} ( \
                   id BIGSERIAL PRIMARY KEY, \
                   snapshot_id BIGINT NOT NULL, \
                   window_hours INTEGER NOT NULL, \
                   price_at_window DOUBLE PRECISION NOT NULL, \
                   direction_correct BOOLEAN NOT NULL, \
                   evaluated_at TEXT NOT NULL \
                 )"
            ))
            .execute(pool)
            .await
            .map_err(storage_err)?;
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{ACC_TABLE}_snap ON {ACC_TABLE} (snapshot_id)"
            ))
            .execute(pool)
            .await
            .map_err(storage_err)?;
        }
        Ok(())
    }

    /// Record a performance snapshot. Returns the row id.
    pub async fn save_performance_snapshot(
        &self,
        asset: &str,
        signal_score: f64,
        signal_direction: &str,
        price_at_signal: f64,
        sources_count: i64,
        detail: &str,
    ) -> Option<i64> {
        match self
            .try_save_snapshot(
                asset,
                signal_score,
                signal_direction,
                price_at_signal,
                sources_count,
                detail,
                None,
            )
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(asset, "snapshot save failed: {e}");
                None
            }
        }
    }

    /// Test-only variant with an explicit timestamp (aged snapshots).
    pub async fn save_performance_snapshot_at(
        &self,
        asset: &str,
        signal_score: f64,
        signal_direction: &str,
        price_at_signal: f64,
        sources_count: i64,
        detail: &str,
        timestamp: &str,
    ) -> Option<i64> {
        self.try_save_snapshot(
            asset,
            signal_score,
            signal_direction,
            price_at_signal,
            sources_count,
            detail,
            Some(timestamp),
        )
        .await
        .ok()
    }

    #[allow(clippy::too_many_arguments)]
    async fn try_save_snapshot(
        &self,
        asset: &str,
        signal_score: f64,
        signal_direction: &str,
        price_at_signal: f64,
        sources_count: i64,
        detail: &str,
        timestamp: Option<&str>,
    ) -> Result<i64, SignalError> {
        self.ensure_performance_tables().await?;
        let ts = timestamp.map(|s| s.to_string()).unwrap_or_else(now_iso);

        if let Some(pool) = self.sqlite() {
            let result = sqlx::query(&format!(
                "INSERT INTO {SNAP_TABLE} \
                 (timestamp, asset, signal_score, signal_direction, price_at_signal, \
                  sources_count, detail) VALUES (?, ?, ?, ?, ?, ?, ?)"
            ))
            .bind(&ts)
            .bind(asset)
            .bind(signal_score)
            .bind(signal_direction)
            .bind(price_at_signal)
            .bind(sources_count)
            .bind(detail)
            .execute(pool)
            .await
            .map_err(storage_err)?;
            Ok(result.last_insert_rowid())
        } else if let Some(pool) = self.postgres() {
            let row = sqlx::query(&format!(
                "INSERT INTO {SNAP_TABLE} \
                 (timestamp, asset, signal_score, signal_direction, price_at_signal, \
                  sources_count, detail) VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING id"
            ))
            .bind(&ts)
            .bind(asset)
            .bind(signal_score)
            .bind(signal_direction)
            .bind(price_at_signal)
            .bind(sources_count)
            .bind(detail)
            .fetch_one(pool)
            .await
            .map_err(storage_err)?;
            row.try_get::<i64, _>(0).map_err(storage_err)
        } else {
            Err(SignalError::Storage("no backend".to_string()))
        }
    }

    /// Record an accuracy evaluation and flip the matching `evaluated_*` flag
    /// on the snapshot in the same call.
    pub async fn save_performance_accuracy(
        &self,
        snapshot_id: i64,
        window_hours: i64,
        price_at_window: f64,
        direction_correct: bool,
    ) {
        if let Err(e) = self
            .try_save_accuracy(snapshot_id, window_hours, price_at_window, direction_correct)
            .await
        {
            tracing::warn!(snapshot_id, window_hours, "accuracy save failed: {e}");
        }
    }

    async fn try_save_accuracy(
        &self,
        snapshot_id: i64,
        window_hours: i64,
        price_at_window: f64,
        direction_correct: bool,
    ) -> Result<(), SignalError> {
        self.ensure_performance_tables().await?;
        let now = now_iso();
        let column = evaluated_column(window_hours);

        if let Some(pool) = self.sqlite() {
            sqlx::query(&format!(
                "INSERT INTO {ACC_TABLE} \
                 (snapshot_id, window_hours, price_at_window, direction_correct, evaluated_at) \
                 VALUES (?, ?, ?, ?, ?)"
            ))
            .bind(snapshot_id)
            .bind(window_hours)
            .bind(price_at_window)
            .bind(direction_correct as i64)
            .bind(&now)
            .execute(pool)
            .await
            .map_err(storage_err)?;
            sqlx::query(&format!(
                "UPDATE {SNAP_TABLE} SET {column} = 1 WHERE id = ?"
            ))
            .bind(snapshot_id)
            .execute(pool)
            .await
            .map_err(storage_err)?;
        } else if let Some(pool) = self.postgres() {
            sqlx::query(&format!(
                "INSERT INTO {ACC_TABLE} \
                 (snapshot_id, window_hours, price_at_window, direction_correct, evaluated_at) \
                 VALUES ($1, $2, $3, $4, $5)"
            ))
            .bind(snapshot_id)
            .bind(window_hours)
            .bind(price_at_window)
            .bind(direction_correct)
            .bind(&now)
            .execute(pool)
            .await
            .map_err(storage_err)?;
            sqlx::query(&format!(
                "UPDATE {SNAP_TABLE} SET {column} = TRUE WHERE id = $1"
            ))
            .bind(snapshot_id)
            .execute(pool)
            .await
            .map_err(storage_err)?;
        }
        Ok(())
    }

    /// Snapshots old enough for a window but not yet evaluated for it, oldest
    /// first, capped at 100 rows per call.
    pub async fn load_unevaluated_snapshots(
        &self,
        window_hours: i64,
        min_age_hours: i64,
    ) -> Vec<SnapshotRow> {
        if self.ensure_performance_tables().await.is_err() {
            return vec![];
        }
        let column = evaluated_column(window_hours);
        let cutoff = iso_ago_hours(min_age_hours);

        if let Some(pool) = self.sqlite() {
            let to_row = |r: &sqlx::sqlite::SqliteRow| -> Option<SnapshotRow> {
                Some(SnapshotRow {
                    id: r.try_get::<i64, _>(0).ok()?,
                    timestamp: r.try_get::<String, _>(1).ok()?,
                    asset: r.try_get::<String, _>(2).ok()?,
                    signal_score: r.try_get::<f64, _>(3).ok()?,
                    signal_direction: r.try_get::<String, _>(4).ok()?,
                    price_at_signal: r.try_get::<f64, _>(5).ok()?,
                })
            };
            let sql = format!(
                "SELECT id, timestamp, asset, signal_score, signal_direction, price_at_signal \
                 FROM {SNAP_TABLE} WHERE {column} = 0 AND timestamp <= ? \
                 ORDER BY timestamp ASC LIMIT 100"
            );
            sqlx::query(&sql)
                .bind(&cutoff)
                .fetch_all(pool)
                .await
                .unwrap_or_default()
                .iter()
                .filter_map(to_row)
                .collect()
        } else if let Some(pool) = self.postgres() {
            let sql = format!(
                "SELECT id, timestamp, asset, signal_score, signal_direction, price_at_signal \
                 FROM {SNAP_TABLE} WHERE {column} = FALSE AND timestamp <= $1 \
                 ORDER BY timestamp ASC LIMIT 100"
            );
            sqlx::query(&sql)
                .bind(&cutoff)
                .fetch_all(pool)
                .await
                .unwrap_or_default()
                .iter()
                .filter_map(|r| {
                    Some(SnapshotRow {
                        id: r.try_get::<i64, _>(0).ok()?,
                        timestamp: r.try_get::<String, _>(1).ok()?,
                        asset: r.try_get::<String, _>(2).ok()?,
                        signal_score: r.try_get::<f64, _>(3).ok()?,
                        signal_direction: r.try_get::<String, _>(4).ok()?,
                        price_at_signal: r.try_get::<f64, _>(5).ok()?,
                    })
                })
                .collect()
        } else {
            vec![]
        }
    }

    /// Aggregated hit/miss statistics over snapshots from the last `days`.
    pub async fn load_accuracy_stats(&self, days: i64) -> AccuracyStats {
        if self.ensure_performance_tables().await.is_err() {
            return AccuracyStats::default();
        }
        let since = iso_ago_days(days);
        let mut stats = AccuracyStats::default();

        if let Some(pool) = self.sqlite() {
            if let Ok(row) = sqlx::query(&format!(
                "SELECT COUNT(*), COALESCE(SUM(a.direction_correct), 0) \
                 FROM {ACC_TABLE} a JOIN {SNAP_TABLE} s ON a.snapshot_id = s.id \
                 WHERE s.timestamp >= ?"
            ))
            .bind(&since)
            .fetch_one(pool)
            .await
            {
                stats.total = row.try_get::<i64, _>(0).unwrap_or(0);
                stats.hits = row.try_get::<i64, _>(1).unwrap_or(0);
            }

            if let Ok(rows) = sqlx::query(&format!(
                "SELECT a.window_hours, COUNT(*), COALESCE(SUM(a.direction_correct), 0) \
                 FROM {ACC_TABLE} a JOIN {SNAP_TABLE} s ON a.snapshot_id = s.id \
                 WHERE s.timestamp >= ? GROUP BY a.window_hours"
            ))
            .bind(&since)
            .fetch_all(pool)
            .await
            {
                for row in rows {
                    let window: i64 = row.try_get(0).unwrap_or(0);
                    let total: i64 = row.try_get(1).unwrap_or(0);
                    let hits: i64 = row.try_get(2).unwrap_or(0);
                    stats.by_timeframe.insert(
                        timeframe_label(window),
                        TimeframeStats {
                            accuracy: pct(hits, total),
                            hits,
                            total,
                        },
                    );
                }
            }

            if let Ok(rows) = sqlx::query(&format!(
                "SELECT s.asset, COUNT(*), COALESCE(SUM(a.direction_correct), 0) \
                 FROM {ACC_TABLE} a JOIN {SNAP_TABLE} s ON a.snapshot_id = s.id \
                 WHERE s.timestamp >= ? GROUP BY s.asset"
            ))
            .bind(&since)
            .fetch_all(pool)
            .await
            {
                for row in rows {
                    let asset: String = row.try_get(0).unwrap_or_default();
                    let total: i64 = row.try_get(1).unwrap_or(0);
                    let hits: i64 = row.try_get(2).unwrap_or(0);
                    stats.by_asset.insert(asset, pct(hits, total));
                }
            }
        } else if let Some(pool) = self.postgres() {
            if let Ok(row) = sqlx::query(&format!(
                "SELECT COUNT(*), COALESCE(SUM(CASE WHEN a.direction_correct THEN 1 ELSE 0 END), 0) \
                 FROM {ACC_TABLE} a JOIN {SNAP_TABLE} s ON a.snapshot_id = s.id \
                 WHERE s.timestamp >= $1"
            ))
            .bind(&since)
            .fetch_one(pool)
            .await
            {
                stats.total = row.try_get::<i64, _>(0).unwrap_or(0);
                stats.hits = row.try_get::<i64, _>(1).unwrap_or(0);
            }

            if let Ok(rows) = sqlx::query(&format!(
                "SELECT a.window_hours, COUNT(*), \
                 COALESCE(SUM(CASE WHEN a.direction_correct THEN 1 ELSE 0 END), 0) \
                 FROM {ACC_TABLE} a JOIN {SNAP_TABLE} s ON a.snapshot_id = s.id \
                 WHERE s.timestamp >= $1 GROUP BY a.window_hours"
            ))
            .bind(&since)
            .fetch_all(pool)
            .await
            {
                for row in rows {
                    let window: i64 = row.try_get::<i32, _>(0).unwrap_or(0) as i64;
                    let total: i64 = row.try_get(1).unwrap_or(0);
                    let hits: i64 = row.try_get(2).unwrap_or(0);
                    stats.by_timeframe.insert(
                        timeframe_label(window),
                        TimeframeStats {
                            accuracy: pct(hits, total),
                            hits,
                            total,
                        },
                    );
                }
            }

            if let Ok(rows) = sqlx::query(&format!(
                "SELECT s.asset, COUNT(*), \
                 COALESCE(SUM(CASE WHEN a.direction_correct THEN 1 ELSE 0 END), 0) \
                 FROM {ACC_TABLE} a JOIN {SNAP_TABLE} s ON a.snapshot_id = s.id \
                 WHERE s.timestamp >= $1 GROUP BY s.asset"
            ))
            .bind(&since)
            .fetch_all(pool)
            .await
            {
                for row in rows {
                    let asset: String = row.try_get(0).unwrap_or_default();
                    let total: i64 = row.try_get(1).unwrap_or(0);
                    let hits: i64 = row.try_get(2).unwrap_or(0);
                    stats.by_asset.insert(asset, pct(hits, total));
                }
            }
        }

        stats
    }

    /// Total snapshots in the last `days`.
    pub async fn count_snapshots(&self, days: i64) -> i64 {
        if self.ensure_performance_tables().await.is_err() {
            return 0;
        }
        let since = iso_ago_days(days);

        if let Some(pool) = self.sqlite() {
            sqlx::query(&format!(
                "SELECT COUNT(*) FROM {SNAP_TABLE} WHERE timestamp >= ?"
            ))
            .bind(&since)
            .fetch_one(pool)
            .await
            .ok()
            .and_then(|r| r.try_get::<i64, _>(0).ok())
            .unwrap_or(0)
        } else if let Some(pool) = self.postgres() {
            sqlx::query(&format!(
                "SELECT COUNT(*) FROM {SNAP_TABLE} WHERE timestamp >= $1"
            ))
            .bind(&since)
            .fetch_one(pool)
            .await
            .ok()
            .and_then(|r| r.try_get::<i64, _>(0).ok())
            .unwrap_or(0)
        } else {
            0
        }
    }
}

fn pct(hits: i64, total: i64) -> f64 {
    if total > 0 {
        (hits as f64 / total as f64 * 1000.0).round() / 10.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iso_ago_hours;

    #[tokio::test]
    async fn test_snapshot_evaluation_flow() {
        let store = Storage::sqlite_in_memory().await.unwrap();

        let aged = iso_ago_hours(25);
        let id = store
            .save_performance_snapshot_at("BTC", 72.0, "bullish", 100.0, 3, "3 sources", &aged)
            .await
            .unwrap();

        let due = store.load_unevaluated_snapshots(24, 24).await;
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, id);
        assert_eq!(due[0].asset, "BTC");
        assert_eq!(due[0].price_at_signal, 100.0);

        store.save_performance_accuracy(id, 24, 110.0, true).await;

        // Flag flipped: the snapshot is no longer due for the 24h window.
        assert!(store.load_unevaluated_snapshots(24, 24).await.is_empty());
        // The 48h window is still pending (not old enough, so filter by age 0).
        assert_eq!(store.load_unevaluated_snapshots(48, 0).await.len(), 1);

        let stats = store.load_accuracy_stats(30).await;
        assert_eq!(stats.total, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.by_timeframe["24h"].accuracy, 100.0);
        assert_eq!(stats.by_asset["BTC"], 100.0);
    }

    #[tokio::test]
    async fn test_reputation_reduction() {
        let store = Storage::sqlite_in_memory().await.unwrap();
        let aged = iso_ago_hours(200);

        // 10 rows in 24h window with 7 hits, 4 rows in 48h with 2 hits,
        // 2 rows in 7d with 1 hit.
        let mut plan = vec![];
        for i in 0..10 {
            plan.push((24i64, i < 7));
        }
        for i in 0..4 {
            plan.push((48i64, i < 2));
        }
        for i in 0..2 {
            plan.push((168i64, i < 1));
        }

        for (window, correct) in plan {
            let id = store
                .save_performance_snapshot_at("BTC", 65.0, "bullish", 100.0, 2, "2 sources", &aged)
                .await
                .unwrap();
            store
                .save_performance_accuracy(id, window, 101.0, correct)
                .await;
        }

        let stats = store.load_accuracy_stats(30).await;
        assert_eq!(stats.total, 16);
        assert_eq!(stats.hits, 10);
        assert_eq!(stats.by_timeframe["24h"].accuracy, 70.0);
        assert_eq!(stats.by_timeframe["24h"].hits, 7);
        assert_eq!(stats.by_timeframe["24h"].total, 10);
        assert_eq!(stats.by_timeframe["48h"].accuracy, 50.0);
        assert_eq!(stats.by_timeframe["7d"].accuracy, 50.0);
        assert_eq!(store.count_snapshots(30).await, 16);
    }

    #[tokio::test]
    async fn test_young_snapshots_are_not_due() {
        let store = Storage::sqlite_in_memory().await.unwrap();
        store
            .save_performance_snapshot("ETH", 55.0, "neutral", 2000.0, 1, "1 sources")
            .await
            .unwrap();
        assert!(store.load_unevaluated_snapshots(24, 24).await.is_empty());
    }
}

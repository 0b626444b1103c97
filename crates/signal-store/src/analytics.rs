//! API request log and usage analytics.

use sqlx::Row;
use std::collections::BTreeMap;

use crate::{iso_ago_days, now_iso, storage_err, Storage};
use signal_core::SignalError;

const TABLE: &str = "api_requests";

#[derive(Debug, Clone, serde::Serialize)]
pub struct UserAgentCount {
    pub user_agent: String,
    pub requests: i64,
    pub client_type: String,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ApiAnalytics {
    pub total_requests: i64,
    pub unique_clients: i64,
    pub avg_duration_ms: f64,
    pub by_endpoint: BTreeMap<String, i64>,
    pub by_client_type: BTreeMap<String, i64>,
    pub requests_per_day: BTreeMap<String, i64>,
    pub top_user_agents: Vec<UserAgentCount>,
}

/// Bucket a raw user-agent string into a coarse client type.
pub fn classify_user_agent(ua: &str) -> &'static str {
    let ua = ua.to_lowercase();
    if ua.contains("claude") || ua.contains("anthropic") {
        return "claude";
    }
    if ua.contains("openai") || ua.contains("chatgpt") || ua.contains("gpt") {
        return "openai";
    }
    if ua.contains("langchain") {
        return "langchain";
    }
    if ua.contains("mcp") {
        return "mcp_client";
    }
    if ua.contains("python") {
        return "python";
    }
    if ua.contains("node") || ua.contains("axios") || ua.contains("fetch") {
        return "node_js";
    }
    if ua.contains("curl") {
        return "curl";
    }
    if ua.contains("postman") {
        return "postman";
    }
    if ua.contains("bot") || ua.contains("crawler") || ua.contains("spider") {
        return "bot";
    }
    if ua.contains("mozilla") || ua.contains("chrome") || ua.contains("safari") {
        return "browser";
    }
    "other"
}

impl Storage {
    async fn ensure_requests_table(&self) -> Result<(), SignalError> {
        if let Some(pool) = self.sqlite() {
            sqlx::query(&format!(
                "CREATE TABLE IF NOT EXISTS {TABLE} ( \
                   id INTEGER PRIMARY KEY AUTOINCREMENT, \
                   timestamp TEXT NOT NULL, \
                   endpoint TEXT NOT NULL, \
                   method TEXT NOT NULL, \
                   user_agent TEXT, \
                   status_code INTEGER NOT NULL, \
                   duration_ms REAL, \
                   client_ip TEXT \
                 )"
            ))
            .execute(pool)
            .await
            .map_err(storage_err)?;
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{TABLE}_ts ON {TABLE} (timestamp)"
            ))
            .execute(pool)
            .await
            .map_err(storage_err)?;
        } else if let Some(pool) = self.postgres() {
            sqlx::query(&format!(
                "CREATE TABLE IF NOT EXISTS {TABLE} ( \
                   id BIGSERIAL PRIMARY KEY, \
                   timestamp TEXT NOT NULL, \
                   endpoint TEXT NOT NULL, \
                   method TEXT NOT NULL, \
                   user_agent TEXT, \
                   status_code INTEGER NOT NULL, \
                   duration_ms DOUBLE PRECISION, \
                   client_ip TEXT \
                 )"
            ))
            .execute(pool)
            .await
            .map_err(storage_err)?;
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{TABLE}_ts ON {TABLE} (timestamp)"
            ))
            .execute(pool)
            .await
            .map_err(storage_err)?;
        }
        Ok(())
    }

    /// Log one API request (best-effort, called fire-and-forget).
    pub async fn save_api_request(
        &self,
        endpoint: &str,
        method: &str,
        user_agent: &str,
        status_code: i64,
        duration_ms: f64,
        client_ip: &str,
    ) {
        if let Err(e) = self
            .try_save_api_request(endpoint, method, user_agent, status_code, duration_ms, client_ip)
            .await
        {
            tracing::debug!(endpoint, "request log failed: {e}");
        }
    }

    async fn try_save_api_request(
        &self,
        endpoint: &str,
        method: &str,
        user_agent: &str,
        status_code: i64,
        duration_ms: f64,
        client_ip: &str,
    ) -> Result<(), SignalError> {
        self.ensure_requests_table().await?;
        let now = now_iso();

        if let Some(pool) = self.sqlite() {
            sqlx::query(&format!(
                "INSERT INTO {TABLE} \
                 (timestamp, endpoint, method, user_agent, status_code, duration_ms, client_ip) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)"
            ))
            .bind(&now)
            .bind(endpoint)
            .bind(method)
            .bind(user_agent)
            .bind(status_code)
            .bind(duration_ms)
            .bind(client_ip)
            .execute(pool)
            .await
            .map_err(storage_err)?;
        } else if let Some(pool) = self.postgres() {
            sqlx::query(&format!(
                "INSERT INTO {TABLE} \
                 (timestamp, endpoint, method, user_agent, status_code, duration_ms, client_ip) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)"
            ))
            .bind(&now)
            .bind(endpoint)
            .bind(method)
            .bind(user_agent)
            .bind(status_code)
            .bind(duration_ms)
            .bind(client_ip)
            .execute(pool)
            .await
            .map_err(storage_err)?;
        }
        Ok(())
    }

    /// Aggregated API usage for the last `days`.
    pub async fn load_api_analytics(&self, days: i64) -> ApiAnalytics {
        if self.ensure_requests_table().await.is_err() {
            return ApiAnalytics::default();
        }
        let since = iso_ago_days(days);
        let mut out = ApiAnalytics::default();

        // Per-backend SQL: placeholder syntax and the substring function differ.
        let (total_sql, unique_sql, avg_sql, endpoint_sql, ua_sql, per_day_sql) =
            if self.sqlite().is_some() {
                (
                    format!("SELECT COUNT(*) FROM {TABLE} WHERE timestamp >= ?"),
                    format!(
                        "SELECT COUNT(DISTINCT client_ip) FROM {TABLE} \
                         WHERE timestamp >= ? AND client_ip != ''"
                    ),
                    format!(
                        "SELECT COALESCE(AVG(duration_ms), 0) FROM {TABLE} \
                         WHERE timestamp >= ? AND duration_ms > 0"
                    ),
                    format!(
                        "SELECT endpoint, COUNT(*) FROM {TABLE} WHERE timestamp >= ? \
                         GROUP BY endpoint ORDER BY COUNT(*) DESC"
                    ),
                    format!(
                        "SELECT COALESCE(user_agent, 'unknown'), COUNT(*) FROM {TABLE} \
                         WHERE timestamp >= ? GROUP BY user_agent ORDER BY COUNT(*) DESC LIMIT 50"
                    ),
                    format!(
                        "SELECT SUBSTR(timestamp, 1, 10), COUNT(*) FROM {TABLE} \
                         WHERE timestamp >= ? GROUP BY SUBSTR(timestamp, 1, 10) ORDER BY 1"
                    ),
                )
            } else {
                (
                    format!("SELECT COUNT(*) FROM {TABLE} WHERE timestamp >= $1"),
                    format!(
                        "SELECT COUNT(DISTINCT client_ip) FROM {TABLE} \
                         WHERE timestamp >= $1 AND client_ip != ''"
                    ),
                    format!(
                        "SELECT COALESCE(AVG(duration_ms), 0) FROM {TABLE} \
                         WHERE timestamp >= $1 AND duration_ms > 0"
                    ),
                    format!(
                        "SELECT endpoint, COUNT(*) FROM {TABLE} WHERE timestamp >= $1 \
                         GROUP BY endpoint ORDER BY COUNT(*) DESC"
                    ),
                    format!(
                        "SELECT COALESCE(user_agent, 'unknown'), COUNT(*) FROM {TABLE} \
                         WHERE timestamp >= $1 GROUP BY user_agent ORDER BY COUNT(*) DESC LIMIT 50"
                    ),
                    format!(
                        "SELECT LEFT(timestamp, 10), COUNT(*) FROM {TABLE} \
                         WHERE timestamp >= $1 GROUP BY LEFT(timestamp, 10) ORDER BY 1"
                    ),
                )
            };

        if let Some(pool) = self.sqlite() {
            if let Ok(row) = sqlx::query(&total_sql).bind(&since).fetch_one(pool).await {
                out.total_requests = row.try_get(0).unwrap_or(0);
            }
            if let Ok(row) = sqlx::query(&unique_sql).bind(&since).fetch_one(pool).await {
                out.unique_clients = row.try_get(0).unwrap_or(0);
            }
            if let Ok(row) = sqlx::query(&avg_sql).bind(&since).fetch_one(pool).await {
                out.avg_duration_ms =
                    (row.try_get::<f64, _>(0).unwrap_or(0.0) * 10.0).round() / 10.0;
            }
            if let Ok(rows) = sqlx::query(&endpoint_sql).bind(&since).fetch_all(pool).await {
                for row in rows {
                    let endpoint: String = row.try_get(0).unwrap_or_default();
                    out.by_endpoint.insert(endpoint, row.try_get(1).unwrap_or(0));
                }
            }
            if let Ok(rows) = sqlx::query(&ua_sql).bind(&since).fetch_all(pool).await {
                for row in rows {
                    let ua: String = row.try_get(0).unwrap_or_default();
                    let count: i64 = row.try_get(1).unwrap_or(0);
                    let client_type = classify_user_agent(&ua);
                    *out.by_client_type.entry(client_type.to_string()).or_insert(0) += count;
                    if out.top_user_agents.len() < 20 {
                        out.top_user_agents.push(UserAgentCount {
                            user_agent: ua,
                            requests: count,
                            client_type: client_type.to_string(),
                        });
                    }
                }
            }
            if let Ok(rows) = sqlx::query(&per_day_sql).bind(&since).fetch_all(pool).await {
                for row in rows {
                    let day: String = row.try_get(0).unwrap_or_default();
                    out.requests_per_day.insert(day, row.try_get(1).unwrap_or(0));
                }
            }
        } else if let Some(pool) = self.postgres() {
            if let Ok(row) = sqlx::query(&total_sql).bind(&since).fetch_one(pool).await {
                out.total_requests = row.try_get(0).unwrap_or(0);
            }
            if let Ok(row) = sqlx::query(&unique_sql).bind(&since).fetch_one(pool).await {
                out.unique_clients = row.try_get(0).unwrap_or(0);
            }
            if let Ok(row) = sqlx::query(&avg_sql).bind(&since).fetch_one(pool).await {
                out.avg_duration_ms =
                    (row.try_get::<f64, _>(0).unwrap_or(0.0) * 10.0).round() / 10.0;
            }
            if let Ok(rows) = sqlx::query(&endpoint_sql).bind(&since).fetch_all(pool).await {
                for row in rows {
                    let endpoint: String = row.try_get(0).unwrap_or_default();
                    out.by_endpoint.insert(endpoint, row.try_get(1).unwrap_or(0));
                }
            }
            if let Ok(rows) = sqlx::query(&ua_sql).bind(&since).fetch_all(pool).await {
                for row in rows {
                    let ua: String = row.try_get(0).unwrap_or_default();
                    let count: i64 = row.try_get(1).unwrap_or(0);
                    let client_type = classify_user_agent(&ua);
                    *out.by_client_type.entry(client_type.to_string()).or_insert(0) += count;
                    if out.top_user_agents.len() < 20 {
                        out.top_user_agents.push(UserAgentCount {
                            user_agent: ua,
                            requests: count,
                            client_type: client_type.to_string(),
                        });
                    }
                }
            }
            if let Ok(rows) = sqlx::query(&per_day_sql).bind(&since).fetch_all(pool).await {
                for row in rows {
                    let day: String = row.try_get(0).unwrap_or_default();
                    out.requests_per_day.insert(day, row.try_get(1).unwrap_or(0));
                }
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_user_agent() {
        assert_eq!(classify_user_agent("Claude-Agent/1.0"), "claude");
        assert_eq!(classify_user_agent("python-requests/2.31"), "python");
        assert_eq!(classify_user_agent("curl/8.0.1"), "curl");
        assert_eq!(
            classify_user_agent("Mozilla/5.0 (Macintosh) Chrome/120"),
            "browser"
        );
        assert_eq!(classify_user_agent("Googlebot/2.1"), "bot");
        assert_eq!(classify_user_agent(""), "other");
    }

    #[tokio::test]
    async fn test_analytics_aggregation() {
        let store = Storage::sqlite_in_memory().await.unwrap();
        store
            .save_api_request("/signal", "GET", "curl/8.0.1", 200, 12.0, "10.0.0.1")
            .await;
        store
            .save_api_request("/signal", "GET", "curl/8.0.1", 200, 8.0, "10.0.0.2")
            .await;
        store
            .save_api_request("/health", "GET", "python-requests/2.31", 200, 4.0, "10.0.0.1")
            .await;

        let analytics = store.load_api_analytics(7).await;
        assert_eq!(analytics.total_requests, 3);
        assert_eq!(analytics.unique_clients, 2);
        assert_eq!(analytics.by_endpoint["/signal"], 2);
        assert_eq!(analytics.by_endpoint["/health"], 1);
        assert_eq!(analytics.by_client_type["curl"], 2);
        assert_eq!(analytics.by_client_type["python"], 1);
        assert_eq!(analytics.requests_per_day.len(), 1);
        assert!(analytics.avg_duration_ms > 0.0);
    }
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use signal_core::profile::{KarmaTier, LikeTier, SentimentKeywords};
use signal_core::{Agent, HttpJson, Profile, SignalError};
use signal_store::Storage;

use crate::types::*;

/// Kv-json namespace holding the per-asset rolling mention peaks.
pub const PEAKS_NAMESPACE: &str = "narrative_peaks";
/// Kv-json namespace holding the cached per-asset LLM sentiment blocks.
pub const LLM_SENTIMENT_NAMESPACE: &str = "llm_sentiment";

/// Scores narrative momentum from social and news mentions. Each source is
/// independently toggleable; mention counts are authority-weighted and
/// normalised against a decaying rolling peak.
pub struct NarrativeAgent {
    profile: Arc<Profile>,
    http: HttpJson,
    store: Storage,
}

#[derive(Default)]
struct MentionAccumulator {
    reddit: BTreeMap<String, f64>,
    twitter: BTreeMap<String, f64>,
    news: BTreeMap<String, f64>,
    influencer: BTreeMap<String, u32>,
    headlines: BTreeMap<String, Vec<String>>,
}

impl MentionAccumulator {
    fn add_headline(&mut self, asset: &str, headline: &str) {
        let list = self.headlines.entry(asset.to_string()).or_default();
        let snippet: String = headline.chars().take(100).collect();
        if !snippet.is_empty() && !list.contains(&snippet) {
            list.push(snippet);
        }
    }
}

impl NarrativeAgent {
    pub fn new(profile: Arc<Profile>, store: Storage) -> Self {
        let http = HttpJson::new(profile.http_timeout_sec);
        Self {
            profile,
            http,
            store,
        }
    }

    fn keywords_for(&self, asset: &str) -> Vec<String> {
        self.profile
            .narrative
            .asset_keywords
            .get(asset)
            .cloned()
            .unwrap_or_else(|| vec![asset.to_lowercase()])
    }

    fn matched_assets(&self, text_lower: &str) -> Vec<String> {
        self.profile
            .assets
            .iter()
            .filter(|asset| {
                self.keywords_for(asset)
                    .iter()
                    .any(|kw| text_lower.contains(&kw.to_lowercase()))
            })
            .cloned()
            .collect()
    }

    // ------------------------------------------------------------------ //
    // Source 1: reddit public search
    // ------------------------------------------------------------------ //

    async fn fetch_reddit(&self, acc: &mut MentionAccumulator) -> Result<(), SignalError> {
        let cfg = &self.profile.narrative.reddit;
        let mut seen_ids = std::collections::BTreeSet::new();

        for keyword in &cfg.search_keywords {
            let payload: Result<Value, _> = self
                .http
                .get_with_query(
                    &format!("{}/search.json", cfg.base_url),
                    &[
                        ("q", keyword.clone()),
                        ("t", cfg.time_filter.clone()),
                        ("limit", cfg.max_items.to_string()),
                        ("sort", "new".to_string()),
                    ],
                )
                .await;
            // Per-keyword failure is non-fatal.
            let payload = match payload {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::debug!(keyword = %keyword, "reddit search failed: {e}");
                    continue;
                }
            };

            for child in payload["data"]["children"].as_array().unwrap_or(&vec![]) {
                let post = &child["data"];
                let id = post["id"].as_str().unwrap_or_default().to_string();
                if id.is_empty() || !seen_ids.insert(id) {
                    continue;
                }

                let score = post["score"].as_i64().unwrap_or(0);
                if score < cfg.min_score {
                    continue;
                }

                let title = post["title"].as_str().unwrap_or_default();
                let body = post["selftext"].as_str().unwrap_or_default();
                let text_lower = format!("{title} {body}").to_lowercase();
                let weight = karma_weight(score, &cfg.weight_tiers);

                for asset in self.matched_assets(&text_lower) {
                    *acc.reddit.entry(asset.clone()).or_insert(0.0) += weight;
                    acc.add_headline(&asset, title);
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------ //
    // Source 2: twitter via the Apify actor
    // ------------------------------------------------------------------ //

    async fn fetch_twitter(&self, acc: &mut MentionAccumulator) -> Result<(), SignalError> {
        let cfg = &self.profile.narrative.twitter;
        let api_key = std::env::var("APIFY_API_KEY")
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| SignalError::Config("APIFY_API_KEY not set".to_string()))?;

        let url = format!(
            "https://api.apify.com/v2/acts/{}/run-sync-get-dataset-items?token={}&timeout={}",
            cfg.actor_id, api_key, cfg.run_timeout_sec
        );
        let influencers: Vec<String> = cfg
            .influencer_accounts
            .iter()
            .map(|a| a.to_lowercase())
            .collect();
        let mut seen_ids = std::collections::BTreeSet::new();

        for query in &cfg.search_queries {
            let payload = serde_json::json!({
                "searchTerms": [query],
                "maxItems": cfg.max_items,
                "searchMode": "live",
            });
            let items: Result<Vec<Value>, _> = self.http.post_json(&url, &payload).await;
            let items = match items {
                Ok(items) => items,
                Err(e) => {
                    tracing::debug!(query = %query, "tweet scrape failed: {e}");
                    continue;
                }
            };

            for tweet in &items {
                let id = tweet["id"].as_str().unwrap_or_default().to_string();
                if id.is_empty() || !seen_ids.insert(id) {
                    continue;
                }

                let text = tweet["text"].as_str().unwrap_or_default();
                let likes = tweet["likeCount"].as_i64().unwrap_or(0);
                if likes < cfg.min_likes {
                    continue;
                }

                let author = tweet["author"]["userName"]
                    .as_str()
                    .unwrap_or_default()
                    .to_lowercase();
                let text_lower = text.to_lowercase();
                let weight = like_weight(likes, &cfg.weight_tiers);

                for asset in self.matched_assets(&text_lower) {
                    *acc.twitter.entry(asset.clone()).or_insert(0.0) += weight;
                    if influencers.contains(&author) {
                        *acc.influencer.entry(asset.clone()).or_insert(0) += 1;
                    }
                    acc.add_headline(&asset, text);
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------ //
    // Source 3: news headlines
    // ------------------------------------------------------------------ //

    async fn fetch_news(&self, acc: &mut MentionAccumulator) -> Result<(), SignalError> {
        let cfg = &self.profile.narrative.news;
        let payload: Value = self.http.get(&cfg.base_url).await?;
        let cutoff = Utc::now() - chrono::Duration::hours(cfg.lookback_hours);

        let articles = payload["Data"].as_array().cloned().unwrap_or_default();
        for article in articles.iter().take(cfg.max_items) {
            let published = article["published_on"].as_i64().unwrap_or(0);
            match DateTime::from_timestamp(published, 0) {
                Some(ts) if ts >= cutoff => {}
                _ => continue,
            }

            let title = article["title"].as_str().unwrap_or_default();
            let body = article["body"].as_str().unwrap_or_default();
            let tags = article["tags"].as_str().unwrap_or_default();
            let text_lower = format!("{title} {body} {tags}").to_lowercase();

            for asset in self.matched_assets(&text_lower) {
                *acc.news.entry(asset.clone()).or_insert(0.0) += 1.0;
                acc.add_headline(&asset, title);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------ //
    // Source 4: trending coins
    // ------------------------------------------------------------------ //

    async fn fetch_trending(&self) -> Result<Vec<String>, SignalError> {
        let cfg = &self.profile.narrative.coingecko_trending;
        let payload: Value = self.http.get(&cfg.base_url).await?;

        Ok(payload["coins"]
            .as_array()
            .unwrap_or(&vec![])
            .iter()
            .filter_map(|entry| entry["item"]["symbol"].as_str())
            .map(|s| s.to_uppercase())
            .filter(|sym| self.profile.assets.contains(sym))
            .collect())
    }

    // ------------------------------------------------------------------ //
    // Rolling peak (kv-json, append-on-growth, decay on read)
    // ------------------------------------------------------------------ //

    async fn effective_peak(&self, asset: &str, total: f64) -> f64 {
        let cfg = &self.profile.narrative.peak;
        let record: Option<PeakRecord> = self.store.load_kv_json(PEAKS_NAMESPACE, asset).await;

        let decayed = record
            .as_ref()
            .map(|r| decayed_peak(r, cfg.daily_decay_pct, Utc::now()))
            .unwrap_or(0.0);

        if total > decayed {
            self.store
                .save_kv_json(
                    PEAKS_NAMESPACE,
                    asset,
                    &PeakRecord {
                        peak: total,
                        timestamp: Utc::now().to_rfc3339(),
                    },
                )
                .await;
        }

        decayed.max(total).max(cfg.min_peak)
    }
}

#[async_trait]
impl Agent for NarrativeAgent {
    type Data = NarrativeData;

    fn name(&self) -> &'static str {
        "narrative_agent"
    }

    fn profile_name(&self) -> &str {
        &self.profile.name
    }

    fn empty_data(&self) -> NarrativeData {
        NarrativeData {
            by_asset: self
                .profile
                .assets
                .iter()
                .map(|a| (a.clone(), NarrativeAssetData::default()))
                .collect(),
            ..Default::default()
        }
    }

    async fn collect(&self) -> Result<(NarrativeData, Vec<String>), SignalError> {
        let cfg = &self.profile.narrative;
        let mut data = self.empty_data();
        let mut errors = Vec::new();
        let mut acc = MentionAccumulator::default();
        let mut trending: Vec<String> = Vec::new();

        if cfg.reddit.enabled {
            match self.fetch_reddit(&mut acc).await {
                Ok(()) => data.sources_used.push("reddit".to_string()),
                Err(e) => errors.push(format!("reddit: {e}")),
            }
        }
        if cfg.twitter.enabled {
            match self.fetch_twitter(&mut acc).await {
                Ok(()) => data.sources_used.push("twitter".to_string()),
                Err(e) => errors.push(format!("twitter: {e}")),
            }
        }
        if cfg.news.enabled {
            match self.fetch_news(&mut acc).await {
                Ok(()) => data.sources_used.push("news".to_string()),
                Err(e) => errors.push(format!("news: {e}")),
            }
        }
        if cfg.coingecko_trending.enabled {
            match self.fetch_trending().await {
                Ok(list) => {
                    trending = list;
                    data.trending_on_coingecko = trending.clone();
                    data.sources_used.push("coingecko_trending".to_string());
                }
                Err(e) => errors.push(format!("coingecko_trending: {e}")),
            }
        }

        for asset_name in self.profile.assets.clone() {
            let reddit = acc.reddit.get(&asset_name).copied().unwrap_or(0.0);
            let twitter = acc.twitter.get(&asset_name).copied().unwrap_or(0.0);
            let news = acc.news.get(&asset_name).copied().unwrap_or(0.0);
            let is_trending = trending.contains(&asset_name);
            let boost = if is_trending {
                cfg.coingecko_trending.trending_boost
            } else {
                0.0
            };
            let total = reddit + twitter + news + boost;

            let peak = self.effective_peak(&asset_name, total).await;
            let normalised = (total / peak).clamp(0.0, 1.0);
            let normalised = (normalised * 10000.0).round() / 10000.0;

            let status = narrative_status(total, normalised, &cfg.status);
            match status {
                NarrativeStatus::Unknown => data.summary.no_data.push(asset_name.clone()),
                NarrativeStatus::TooEarly => data.summary.too_early.push(asset_name.clone()),
                NarrativeStatus::EarlyPickup => data.summary.early_pickup.push(asset_name.clone()),
                NarrativeStatus::PeakCrowded => data.summary.peak_crowded.push(asset_name.clone()),
            }

            let headlines = acc.headlines.get(&asset_name).cloned().unwrap_or_default();
            let community = community_sentiment(&headlines, &cfg.sentiment);

            let mut sources_with_data = 0u32;
            for present in [reddit > 0.0, twitter > 0.0, news > 0.0, is_trending] {
                if present {
                    sources_with_data += 1;
                }
            }

            let llm_sentiment = if cfg.llm_sentiment.enabled {
                self.store
                    .load_kv_json::<LlmSentiment>(LLM_SENTIMENT_NAMESPACE, &asset_name)
                    .await
            } else {
                None
            };

            data.by_asset.insert(
                asset_name.clone(),
                NarrativeAssetData {
                    reddit_mentions: reddit,
                    twitter_mentions: twitter,
                    news_mentions: news,
                    influencer_mentions: acc.influencer.get(&asset_name).copied().unwrap_or(0),
                    trending_coingecko: is_trending,
                    total_mentions: total,
                    normalised_score: normalised,
                    narrative_status: status,
                    top_headlines: headlines.into_iter().take(5).collect(),
                    community_sentiment: community,
                    llm_sentiment,
                    sources_with_data,
                },
            );
        }

        Ok((data, errors))
    }
}

// ------------------------------------------------------------------ //
// Pure helpers
// ------------------------------------------------------------------ //

pub(crate) fn karma_weight(score: i64, tiers: &[KarmaTier]) -> f64 {
    let mut sorted: Vec<&KarmaTier> = tiers.iter().collect();
    sorted.sort_by(|a, b| b.min_score.cmp(&a.min_score));
    for tier in sorted {
        if score >= tier.min_score {
            return tier.weight;
        }
    }
    1.0
}

pub(crate) fn like_weight(likes: i64, tiers: &[LikeTier]) -> f64 {
    let mut sorted: Vec<&LikeTier> = tiers.iter().collect();
    sorted.sort_by(|a, b| b.min_likes.cmp(&a.min_likes));
    for tier in sorted {
        if likes >= tier.min_likes {
            return tier.weight;
        }
    }
    1.0
}

/// Keyword sentiment over headlines, in [-1, 1].
pub(crate) fn community_sentiment(headlines: &[String], cfg: &SentimentKeywords) -> f64 {
    if headlines.is_empty() {
        return 0.0;
    }
    let mut pos = 0i64;
    let mut neg = 0i64;
    for headline in headlines {
        let lower = headline.to_lowercase();
        pos += cfg.positive.iter().filter(|w| lower.contains(*w)).count() as i64;
        neg += cfg.negative.iter().filter(|w| lower.contains(*w)).count() as i64;
    }
    let total = pos + neg;
    if total == 0 {
        return 0.0;
    }
    ((pos - neg) as f64 / total as f64 * 10000.0).round() / 10000.0
}

pub(crate) fn narrative_status(
    total: f64,
    normalised: f64,
    bands: &signal_core::profile::NarrativeStatusBands,
) -> NarrativeStatus {
    if total <= 0.0 {
        NarrativeStatus::Unknown
    } else if normalised < bands.too_early_below {
        NarrativeStatus::TooEarly
    } else if normalised <= bands.peak_crowded_above {
        NarrativeStatus::EarlyPickup
    } else {
        NarrativeStatus::PeakCrowded
    }
}

/// Apply exponential decay to a stored peak given its age in days.
pub(crate) fn decayed_peak(record: &PeakRecord, daily_decay_pct: f64, now: DateTime<Utc>) -> f64 {
    let Ok(stored_at) = DateTime::parse_from_rfc3339(&record.timestamp) else {
        return record.peak;
    };
    let age_days = (now - stored_at.with_timezone(&Utc)).num_seconds().max(0) as f64 / 86_400.0;
    record.peak * (1.0 - daily_decay_pct / 100.0).powf(age_days)
}

#[cfg(test)]
mod tests {
    use super::*;
    use signal_core::profile::NarrativeStatusBands;

    #[test]
    fn test_karma_tiers_pick_highest_matching() {
        let tiers = signal_core::Profile::default().narrative.reddit.weight_tiers;
        assert_eq!(karma_weight(600, &tiers), 5.0);
        assert_eq!(karma_weight(150, &tiers), 3.0);
        assert_eq!(karma_weight(10, &tiers), 1.0);
    }

    #[test]
    fn test_community_sentiment_bounds() {
        let cfg = signal_core::Profile::default().narrative.sentiment;
        let bullish = vec!["BTC surge continues, rally extends".to_string()];
        let bearish = vec!["Exchange hack triggers crash".to_string()];
        let mixed = vec!["Rally fades as lawsuit lands".to_string()];

        assert_eq!(community_sentiment(&bullish, &cfg), 1.0);
        assert_eq!(community_sentiment(&bearish, &cfg), -1.0);
        let mixed_score = community_sentiment(&mixed, &cfg);
        assert!(mixed_score > -1.0 && mixed_score < 1.0);
        assert_eq!(community_sentiment(&[], &cfg), 0.0);
    }

    #[test]
    fn test_status_bands() {
        let bands = NarrativeStatusBands::default();
        assert_eq!(narrative_status(0.0, 0.0, &bands), NarrativeStatus::Unknown);
        assert_eq!(
            narrative_status(3.0, 0.2, &bands),
            NarrativeStatus::TooEarly
        );
        assert_eq!(
            narrative_status(10.0, 0.5, &bands),
            NarrativeStatus::EarlyPickup
        );
        assert_eq!(
            narrative_status(40.0, 0.9, &bands),
            NarrativeStatus::PeakCrowded
        );
    }

    #[test]
    fn test_peak_decay() {
        let now = Utc::now();
        let record = PeakRecord {
            peak: 100.0,
            timestamp: (now - chrono::Duration::days(10)).to_rfc3339(),
        };
        let decayed = decayed_peak(&record, 5.0, now);
        // 100 * 0.95^10 ≈ 59.87
        assert!((decayed - 59.87).abs() < 0.1);

        let fresh = PeakRecord {
            peak: 100.0,
            timestamp: now.to_rfc3339(),
        };
        assert!((decayed_peak(&fresh, 5.0, now) - 100.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_effective_peak_grows_and_persists() {
        let store = Storage::sqlite_in_memory().await.unwrap();
        let agent = NarrativeAgent::new(Arc::new(Profile::default()), store.clone());

        // First sighting establishes the peak.
        let p1 = agent.effective_peak("BTC", 10.0).await;
        assert_eq!(p1, 10.0);

        // A smaller total keeps the stored peak.
        let p2 = agent.effective_peak("BTC", 4.0).await;
        assert!((p2 - 10.0).abs() < 0.01);

        // A larger total raises it.
        let p3 = agent.effective_peak("BTC", 25.0).await;
        assert_eq!(p3, 25.0);

        let record: PeakRecord = store.load_kv_json(PEAKS_NAMESPACE, "BTC").await.unwrap();
        assert_eq!(record.peak, 25.0);
    }

    #[tokio::test]
    async fn test_zero_mentions_uses_min_peak() {
        let store = Storage::sqlite_in_memory().await.unwrap();
        let agent = NarrativeAgent::new(Arc::new(Profile::default()), store);
        let peak = agent.effective_peak("ETH", 0.0).await;
        assert_eq!(peak, 1.0);
    }
}

//! # DailyFeed — 高速トレンド収集バックエンド
//!
//! デイリートレンドフィードを 1 回の GET で取得する低レイテンシ経路。
//! 件数はフィード上限 (~20) まで。それ以上は Dispatcher が bulk へ回す。

use crate::util::{parse_trending_search, read_trends_json, transport_error};
use async_trait::async_trait;
use serde_json::Value;
use shared::config::TrendkitConfig;
use trendkit_core::contracts::{Operation, TimeWindow, TrendRecord};
use trendkit_core::error::TrendkitError;
use trendkit_core::traits::{BackendClass, PartialSink, TrendBackend};

const DEFAULT_BASE_URL: &str = "https://trends.google.com";

/// デイリーフィードクライアント
pub struct DailyFeedBackend {
    client: reqwest::Client,
    base_url: String,
}

impl DailyFeedBackend {
    pub fn new(config: &TrendkitConfig) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, base_url: DEFAULT_BASE_URL.to_string() }
    }

    /// テスト・プロキシ用にエンドポイントを差し替える
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// フィード応答から当日分のレコードを取り出す
    fn parse_feed(payload: &Value, limit: usize) -> Vec<TrendRecord> {
        let days = payload
            .pointer("/default/trendingSearchesDays")
            .and_then(|v| v.as_array());
        let searches = days
            .and_then(|days| days.first())
            .and_then(|day| day.get("trendingSearches"))
            .and_then(|v| v.as_array());

        match searches {
            Some(items) => items
                .iter()
                .filter_map(parse_trending_search)
                .take(limit)
                .enumerate()
                .map(|(i, record)| record.with_rank(i as u32 + 1))
                .collect(),
            None => Vec::new(),
        }
    }
}

#[async_trait]
impl TrendBackend for DailyFeedBackend {
    fn name(&self) -> &'static str {
        "daily_feed"
    }

    fn class(&self) -> BackendClass {
        BackendClass::Fast
    }

    fn supports(&self, operation: Operation) -> bool {
        operation == Operation::Trending
    }

    async fn fetch_trending(
        &self,
        region: &str,
        limit: usize,
        _window: TimeWindow,
        _sink: &PartialSink,
    ) -> Result<Vec<TrendRecord>, TrendkitError> {
        let url = format!("{}/trends/api/dailytrends", self.base_url);
        tracing::debug!("DailyFeed: fetching realtime trends for {}", region);

        let response = self
            .client
            .get(&url)
            .query(&[("hl", "ko"), ("tz", "540"), ("geo", region), ("ns", "15")])
            .send()
            .await
            .map_err(transport_error)?;

        let payload = read_trends_json(response).await?;
        let records = Self::parse_feed(&payload, limit);
        tracing::info!("📡 DailyFeed: {} 件のトレンドを取得 ({})", records.len(), region);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn feed_payload() -> Value {
        json!({
            "default": {
                "trendingSearchesDays": [
                    {
                        "date": "20241216",
                        "trendingSearches": [
                            { "title": { "query": "환율" }, "formattedTraffic": "20만+" },
                            { "title": { "query": "신한카드" }, "formattedTraffic": "10만+" },
                            { "title": { "query": "국가장학금" }, "formattedTraffic": "5만+" }
                        ]
                    },
                    {
                        "date": "20241215",
                        "trendingSearches": [
                            { "title": { "query": "전날 키워드" }, "formattedTraffic": "1만+" }
                        ]
                    }
                ]
            }
        })
    }

    #[test]
    fn test_parse_feed_takes_first_day_in_rank_order() {
        let records = DailyFeedBackend::parse_feed(&feed_payload(), 10);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].keyword, "환율");
        assert_eq!(records[0].rank, Some(1));
        assert_eq!(records[2].rank, Some(3));
        // 前日分は含まれない
        assert!(records.iter().all(|r| r.keyword != "전날 키워드"));
    }

    #[test]
    fn test_parse_feed_applies_limit() {
        let records = DailyFeedBackend::parse_feed(&feed_payload(), 2);
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_parse_feed_empty_payload() {
        assert!(DailyFeedBackend::parse_feed(&json!({}), 10).is_empty());
    }

    #[test]
    fn test_capability_declaration() {
        let backend = DailyFeedBackend::new(&TrendkitConfig::default());
        assert_eq!(backend.class(), BackendClass::Fast);
        assert!(backend.supports(Operation::Trending));
        assert!(!backend.supports(Operation::Compare));
        assert!(!backend.supports(Operation::BulkTrending));
    }
}

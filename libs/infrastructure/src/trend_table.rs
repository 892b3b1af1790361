//! # TrendTable — バルク収集バックエンド
//!
//! 時間窓を日単位のページへ分割し、ページごとに収集して rank を連番で振る。
//! 完了したページは即座に `PartialSink` へ積むため、デッドライン到達時にも
//! 途中までの結果が呼び出し側へ返る。

use crate::util::{parse_trending_search, read_trends_json, transport_error};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use shared::config::TrendkitConfig;
use trendkit_core::contracts::{Operation, TimeWindow, TrendRecord};
use trendkit_core::error::TrendkitError;
use trendkit_core::traits::{BackendClass, PartialSink, TrendBackend};

const DEFAULT_BASE_URL: &str = "https://trends.google.com";

/// ページ送りで収集するバルククライアント
pub struct TrendTableBackend {
    client: reqwest::Client,
    base_url: String,
}

impl TrendTableBackend {
    pub fn new(config: &TrendkitConfig) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, base_url: DEFAULT_BASE_URL.to_string() }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// 時間窓をページ数 (= さかのぼる日数) へ写像する
    fn pages_for(window: TimeWindow) -> u32 {
        (window.hours() / 24).max(1)
    }

    /// 1 ページ分の応答をパースする
    fn parse_page(payload: &Value) -> Vec<TrendRecord> {
        payload
            .pointer("/default/trendingSearchesDays")
            .and_then(|v| v.as_array())
            .and_then(|days| days.first())
            .and_then(|day| day.get("trendingSearches"))
            .and_then(|v| v.as_array())
            .map(|items| items.iter().filter_map(parse_trending_search).collect())
            .unwrap_or_default()
    }

    async fn fetch_page(&self, region: &str, date: &str) -> Result<Vec<TrendRecord>, TrendkitError> {
        let url = format!("{}/trends/api/dailytrends", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("hl", "ko"), ("tz", "540"), ("geo", region), ("ed", date)])
            .send()
            .await
            .map_err(transport_error)?;
        let payload = read_trends_json(response).await?;
        Ok(Self::parse_page(&payload))
    }
}

#[async_trait]
impl TrendBackend for TrendTableBackend {
    fn name(&self) -> &'static str {
        "trend_table"
    }

    fn class(&self) -> BackendClass {
        BackendClass::Bulk
    }

    fn supports(&self, operation: Operation) -> bool {
        matches!(operation, Operation::Trending | Operation::BulkTrending)
    }

    async fn fetch_trending(
        &self,
        region: &str,
        limit: usize,
        window: TimeWindow,
        sink: &PartialSink,
    ) -> Result<Vec<TrendRecord>, TrendkitError> {
        let pages = Self::pages_for(window);
        let today = Utc::now().date_naive();
        let mut all: Vec<TrendRecord> = Vec::new();

        for page in 0..pages {
            let date = (today - chrono::Duration::days(page as i64))
                .format("%Y%m%d")
                .to_string();
            tracing::debug!("TrendTable: page {}/{} (ed={})", page + 1, pages, date);

            let rows = self.fetch_page(region, &date).await?;
            let ranked: Vec<TrendRecord> = rows
                .into_iter()
                .enumerate()
                .map(|(i, record)| record.with_rank((all.len() + i) as u32 + 1))
                .collect();

            // ページ完了分を即時シンクへ — タイムアウト時の部分結果になる
            sink.extend(ranked.clone());
            all.extend(ranked);

            if all.len() >= limit {
                break;
            }
        }

        all.truncate(limit);
        tracing::info!(
            "🗂️ TrendTable: {} 件を収集 ({}; {}h window)",
            all.len(),
            region,
            window.hours()
        );
        Ok(all)
    }
}
